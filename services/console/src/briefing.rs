//! Plain-text rendering of analysis results and community reports.

use disasterguard_core::models::{PredictionResult, UserReport};
use std::fmt::Write;

/// Formats a risk report as a terminal briefing.
pub fn render_prediction(result: &PredictionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== RISK BRIEFING: {} ==", result.location.to_uppercase());
    let _ = writeln!(
        out,
        "Overall risk: {}   Confidence: {}%",
        result.overall_risk_level, result.prediction_confidence
    );
    let _ = writeln!(out, "\n{}", result.summary);

    if !result.risks.is_empty() {
        let _ = writeln!(out, "\nRisks:");
        for risk in &result.risks {
            let _ = writeln!(
                out,
                "  - {} ({:?}, {}%): {}",
                risk.kind, risk.severity, risk.probability, risk.description
            );
            for recommendation in &risk.recommendations {
                let _ = writeln!(out, "      * {}", recommendation);
            }
        }
    }

    let forecast = &result.future_forecast;
    let _ = writeln!(
        out,
        "\nForecast (vulnerability {}/100): {}",
        forecast.vulnerability_score, forecast.long_term_outlook
    );
    for hotspot in &forecast.hotspots {
        let _ = writeln!(
            out,
            "  - {} [{}] {} within {} ({}%)",
            hotspot.location, hotspot.threat, hotspot.reasoning, hotspot.timeframe, hotspot.probability_score
        );
    }

    if !result.historical_trends.is_empty() {
        let _ = writeln!(out, "\nHistorical trends:");
        for trend in &result.historical_trends {
            let _ = writeln!(
                out,
                "  {:<12} events {:>4}  intensity {:>3}",
                trend.period, trend.event_count, trend.intensity_score
            );
        }
    }

    if !result.community_insights.is_empty() {
        let _ = writeln!(out, "\nCommunity insights: {}", result.community_insights);
    }
    if !result.sources.is_empty() {
        let _ = writeln!(out, "\nSources:");
        for source in &result.sources {
            let _ = writeln!(out, "  {} <{}>", source.title, source.uri);
        }
    }

    let meta = &result.model_metadata;
    let _ = write!(
        out,
        "\nModel {} | {} data points | accuracy {:.1}% | {}",
        meta.algorithm_version, meta.data_points_analyzed, meta.neural_accuracy, result.timestamp
    );
    out
}

pub fn render_reports(reports: &[UserReport]) -> String {
    if reports.is_empty() {
        return "No community reports stored.".to_string();
    }
    reports
        .iter()
        .map(|r| {
            format!(
                "[{}] {:?} {} at {}: {} ({})",
                r.timestamp, r.severity, r.kind, r.location, r.description, r.id
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
