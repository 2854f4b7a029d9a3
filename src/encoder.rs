//! Report encoding
//!
//! Wraps a [`ReserveResult`] in a self-describing envelope: producer
//! metadata, the observed time range and a few run-level quality figures.
//! The result itself is flattened into the top level unchanged.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ComputeError;
use crate::types::{iso_timestamp, ReserveResult, SeriesRow};
use crate::{PRODUCER_NAME, RESERVE_VERSION};

/// Current report envelope version
pub const REPORT_VERSION: &str = "1.0.0";

/// Average confidence below which a run is flagged
const LOW_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportProvenance {
    pub computed_at_utc: String,
    pub observed_from_utc: Option<String>,
    pub observed_to_utc: Option<String>,
    /// Input epochs, forecast rows excluded
    pub epochs: usize,
    pub forecast_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuality {
    pub avg_confidence: f64,
    pub imputed_epochs: usize,
    /// Share of epochs with an observed heart rate
    pub coverage: f64,
    pub flags: Vec<String>,
}

/// Encoded engine output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub provenance: ReportProvenance,
    pub quality: ReportQuality,
    #[serde(flatten)]
    pub result: ReserveResult,
}

/// Report encoder for producing JSON envelopes
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wrap a result in the report envelope
    pub fn encode(&self, result: &ReserveResult) -> ReserveReport {
        let observed: Vec<&SeriesRow> = result.series.iter().filter(|r| !r.is_forecast()).collect();
        let forecast_rows = result.series.len() - observed.len();

        let producer = ReportProducer {
            name: PRODUCER_NAME.to_string(),
            version: RESERVE_VERSION.to_string(),
            instance_id: self.instance_id.clone(),
        };

        let provenance = ReportProvenance {
            computed_at_utc: Utc::now().to_rfc3339(),
            observed_from_utc: observed.iter().find_map(|r| r.ts_ms).and_then(iso_timestamp),
            observed_to_utc: observed.iter().rev().find_map(|r| r.ts_ms).and_then(iso_timestamp),
            epochs: observed.len(),
            forecast_rows,
        };

        ReserveReport {
            report_version: REPORT_VERSION.to_string(),
            producer,
            provenance,
            quality: build_quality(result, &observed),
            result: result.clone(),
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(&self, result: &ReserveResult) -> Result<String, ComputeError> {
        let report = self.encode(result);
        serde_json::to_string_pretty(&report).map_err(ComputeError::JsonError)
    }
}

fn build_quality(result: &ReserveResult, observed: &[&SeriesRow]) -> ReportQuality {
    let imputed_epochs = observed.iter().filter(|r| !r.imputed.is_empty()).count();
    let with_hr = observed
        .iter()
        .filter(|r| r.input.hr.is_some() && r.imputed.hr.is_none())
        .count();
    let coverage = if observed.is_empty() {
        0.0
    } else {
        with_hr as f64 / observed.len() as f64
    };

    let mut flags = Vec::new();
    if observed.is_empty() {
        flags.push("empty".to_string());
    } else if result.summary.avg_confidence < LOW_CONFIDENCE {
        flags.push("low_confidence".to_string());
    }
    if imputed_epochs > 0 {
        flags.push("imputed_vitals".to_string());
    }
    if observed.iter().any(|r| r.ts_ms.is_none()) {
        flags.push("untimed_epochs".to_string());
    }
    if result.summary.main_sleep.is_none() && !observed.is_empty() {
        flags.push("no_sleep".to_string());
    }
    if result
        .behavior_baseline
        .as_ref()
        .is_some_and(|b| b.enabled && !b.ready)
    {
        flags.push("behavior_baseline_pending".to_string());
    }

    ReportQuality {
        avg_confidence: result.summary.avg_confidence,
        imputed_epochs,
        coverage,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::pipeline::{compute_series, RunInput};
    use crate::types::Epoch;

    fn sample_result() -> ReserveResult {
        let epochs = (0..4)
            .map(|i| Epoch {
                timestamp_ms: Some(1_735_689_600_000 + i * 300_000),
                sleep_stage: Some("core".to_string()),
                hr_bpm: (i != 2).then_some(55.0),
                hrv_sdnn_ms: Some(60.0),
                ..Default::default()
            })
            .collect();
        compute_series(RunInput {
            epochs,
            ..Default::default()
        })
    }

    #[test]
    fn test_encoder_uses_instance_id() {
        let encoder = ReportEncoder::with_instance_id("test-instance".to_string());
        let report = encoder.encode(&sample_result());
        assert_eq!(report.producer.instance_id, "test-instance");
        assert_eq!(report.producer.name, PRODUCER_NAME);
        assert_eq!(report.report_version, REPORT_VERSION);
    }

    #[test]
    fn test_provenance_and_quality() {
        let report = ReportEncoder::new().encode(&sample_result());
        assert_eq!(report.provenance.epochs, 4);
        assert_eq!(report.provenance.forecast_rows, 0);
        assert_eq!(
            report.provenance.observed_from_utc.as_deref(),
            Some("2025-01-01T00:00:00.000Z")
        );
        assert_eq!(
            report.provenance.observed_to_utc.as_deref(),
            Some("2025-01-01T00:15:00.000Z")
        );
        assert_eq!(report.quality.imputed_epochs, 1);
        assert!((report.quality.coverage - 0.75).abs() < 1e-12);
        assert!(report.quality.flags.contains(&"imputed_vitals".to_string()));
    }

    #[test]
    fn test_forecast_rows_counted_separately() {
        let mut result = sample_result();
        let last = result.series.len();
        result.series.push(SeriesRow::new(last, None, 5.0, Context::Forecast));
        let report = ReportEncoder::new().encode(&result);
        assert_eq!(report.provenance.epochs, 4);
        assert_eq!(report.provenance.forecast_rows, 1);
    }

    #[test]
    fn test_json_flattens_result() {
        let json = ReportEncoder::new().encode_to_json(&sample_result()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["reportVersion"], REPORT_VERSION);
        assert_eq!(v["version"], RESERVE_VERSION);
        assert!(v["series"].is_array());
        assert!(v["summary"]["morningBB"].is_number());
        assert!(v["producer"]["instanceId"].is_string());
    }
}
