//! Analysis and Community Report Models
//!
//! Wire shapes exchanged with the analysis backend and persisted in the local
//! store. Field names follow the backend's camelCase JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Languages the analysis backend can answer in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
    Fr,
    Hi,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::Hi => "hi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            "fr" => Ok(Language::Fr),
            "hi" => Ok(Language::Hi),
            other => Err(format!("unsupported language '{}'", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallRiskLevel {
    Low,
    Moderate,
    High,
    Extreme,
}

impl fmt::Display for OverallRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallRiskLevel::Low => "Low",
            OverallRiskLevel::Moderate => "Moderate",
            OverallRiskLevel::High => "High",
            OverallRiskLevel::Extreme => "Extreme",
        };
        f.write_str(s)
    }
}

/// Severity a community member assigns to a reported event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSeverity {
    Minor,
    Moderate,
    Severe,
}

impl FromStr for ReportSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minor" => Ok(ReportSeverity::Minor),
            "moderate" => Ok(ReportSeverity::Moderate),
            "severe" => Ok(ReportSeverity::Severe),
            other => Err(format!("unsupported severity '{}'", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DisasterRisk {
    #[serde(rename = "type")]
    pub kind: String,
    pub probability: u32,
    pub severity: RiskSeverity,
    pub description: String,
    pub recommendations: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// A community-submitted observation, sent along with every analysis request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserReport {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub severity: ReportSeverity,
    pub timestamp: String,
    pub location: String,
}

/// A report as entered by the user, before an id and timestamp are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub kind: String,
    pub description: String,
    pub severity: ReportSeverity,
    pub location: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalTrend {
    pub period: String,
    pub event_count: u32,
    pub intensity_score: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FutureHotspot {
    pub location: String,
    pub threat: String,
    pub timeframe: String,
    pub reasoning: String,
    pub probability_score: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub data_points_analyzed: u64,
    pub training_epochs: u32,
    pub neural_accuracy: f64,
    pub algorithm_version: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FutureForecast {
    pub long_term_outlook: String,
    pub vulnerability_score: u32,
    pub hotspots: Vec<FutureHotspot>,
}

/// The full risk report returned by `POST /api/analyze`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub location: String,
    pub overall_risk_level: OverallRiskLevel,
    pub prediction_confidence: u32,
    pub summary: String,
    pub risks: Vec<DisasterRisk>,
    #[serde(default)]
    pub visualization_image: Option<String>,
    #[serde(default)]
    pub active_alerts: Vec<serde_json::Value>,
    pub community_insights: String,
    pub historical_trends: Vec<HistoricalTrend>,
    pub model_metadata: ModelMetadata,
    pub future_forecast: FutureForecast,
    #[serde(default)]
    pub sources: Vec<GroundingSource>,
    pub timestamp: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct AnalyzeRequest {
    pub location: String,
    pub reports: Vec<UserReport>,
    pub lang: Language,
}

/// Error body the backend attaches to non-2xx responses.
#[derive(Deserialize, Debug)]
pub struct ErrorDetail {
    pub detail: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    pub engine: String,
    pub language: String,
}
