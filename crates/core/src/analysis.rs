//! Client for the remote disaster-risk analysis backend.

use crate::models::{AnalyzeRequest, ErrorDetail, HealthStatus, PredictionResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{error, info};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AnalysisError {
    /// The backend answered with a non-2xx status, or could not be reached.
    #[error("Analysis request failed: {0}")]
    RequestFailed(String),
}

/// A client able to ask the backend for a risk report.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Runs a full analysis for a location.
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<PredictionResult, AnalysisError>;

    /// Checks that the backend is reachable.
    async fn health(&self) -> Result<HealthStatus, AnalysisError>;
}

/// `AnalysisClient` over the backend's JSON REST API.
pub struct HttpAnalysisClient {
    http: reqwest::Client,
    api_base: String,
}

impl HttpAnalysisClient {
    /// Creates a client for a backend rooted at `backend_url` (without the `/api` suffix).
    pub fn new(backend_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: format!("{}/api", backend_url.trim_end_matches('/')),
        }
    }

    /// Turns a non-2xx response into the `detail` message the backend supplied.
    async fn failure_message(response: reqwest::Response) -> String {
        let status = response.status();
        match response.json::<ErrorDetail>().await {
            Ok(ErrorDetail {
                detail: Some(detail),
            }) => detail,
            Ok(ErrorDetail { detail: None }) => server_error(status),
            Err(_) => "Unknown error".to_string(),
        }
    }
}

fn server_error(status: StatusCode) -> String {
    format!("Server error: {}", status.as_u16())
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<PredictionResult, AnalysisError> {
        let url = format!("{}/analyze", self.api_base);
        info!(%url, location = %request.location, reports = request.reports.len(), lang = %request.lang, "Requesting risk analysis");

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Analysis request could not be sent");
                AnalysisError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        info!(status = status.as_u16(), "Analysis response received");
        if !status.is_success() {
            let message = Self::failure_message(response).await;
            error!(status = status.as_u16(), %message, "Analysis backend returned an error");
            return Err(AnalysisError::RequestFailed(message));
        }

        response.json::<PredictionResult>().await.map_err(|e| {
            error!(error = %e, "Analysis response was not a valid prediction");
            AnalysisError::RequestFailed(e.to_string())
        })
    }

    async fn health(&self) -> Result<HealthStatus, AnalysisError> {
        let url = format!("{}/health", self.api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnalysisError::RequestFailed(
                Self::failure_message(response).await,
            ));
        }
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| AnalysisError::RequestFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, ReportSeverity, UserReport, fixtures};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chennai_request() -> AnalyzeRequest {
        AnalyzeRequest {
            location: "Chennai".to_string(),
            reports: vec![],
            lang: Language::En,
        }
    }

    #[tokio::test]
    async fn test_analyze_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .and(body_json(serde_json::json!({
                "location": "Chennai",
                "reports": [],
                "lang": "en"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(fixtures::prediction_json("Chennai")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpAnalysisClient::new(&server.uri());
        let result = client.analyze(&chennai_request()).await.unwrap();

        assert_eq!(result.location, "Chennai");
        assert!(!result.risks.is_empty());
        assert!(result.prediction_confidence <= 100);
    }

    #[tokio::test]
    async fn test_analyze_forwards_reports() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .and(body_json(serde_json::json!({
                "location": "Lima",
                "reports": [{
                    "id": "r-1",
                    "type": "Landslide",
                    "description": "Road blocked",
                    "severity": "Severe",
                    "timestamp": "2025-03-01T08:00:00Z",
                    "location": "Lima"
                }],
                "lang": "es"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(fixtures::prediction_json("Lima")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = AnalyzeRequest {
            location: "Lima".to_string(),
            reports: vec![UserReport {
                id: "r-1".to_string(),
                kind: "Landslide".to_string(),
                description: "Road blocked".to_string(),
                severity: ReportSeverity::Severe,
                timestamp: "2025-03-01T08:00:00Z".to_string(),
                location: "Lima".to_string(),
            }],
            lang: Language::Es,
        };
        let client = HttpAnalysisClient::new(&format!("{}/", server.uri()));
        assert!(client.analyze(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_analyze_failure_carries_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({ "detail": "bad location" })),
            )
            .mount(&server)
            .await;

        let client = HttpAnalysisClient::new(&server.uri());
        let err = client.analyze(&chennai_request()).await.unwrap_err();
        assert_eq!(err, AnalysisError::RequestFailed("bad location".to_string()));
    }

    #[tokio::test]
    async fn test_analyze_failure_without_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = HttpAnalysisClient::new(&server.uri());
        let err = client.analyze(&chennai_request()).await.unwrap_err();
        assert_eq!(err, AnalysisError::RequestFailed("Unknown error".to_string()));
    }

    #[tokio::test]
    async fn test_analyze_failure_without_detail_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = HttpAnalysisClient::new(&server.uri());
        let err = client.analyze(&chennai_request()).await.unwrap_err();
        assert_eq!(
            err,
            AnalysisError::RequestFailed("Server error: 500".to_string())
        );
    }

    #[tokio::test]
    async fn test_analyze_malformed_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/analyze"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "location": "x" })),
            )
            .mount(&server)
            .await;

        let client = HttpAnalysisClient::new(&server.uri());
        assert!(matches!(
            client.analyze(&chennai_request()).await,
            Err(AnalysisError::RequestFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_analyze_unreachable_backend() {
        // Port 9 (discard) is closed on test machines.
        let client = HttpAnalysisClient::new("http://127.0.0.1:9");
        assert!(matches!(
            client.analyze(&chennai_request()).await,
            Err(AnalysisError::RequestFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "online",
                "engine": "Neural-X V4.2",
                "language": "python"
            })))
            .mount(&server)
            .await;

        let client = HttpAnalysisClient::new(&server.uri());
        let health = client.health().await.unwrap();
        assert_eq!(health.status, "online");
    }
}
