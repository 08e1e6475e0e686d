// src/api/types.rs
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Response of `/predict` and `/predict-frame`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PredictionResult {
    #[serde(default)]
    pub disease: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub low_confidence: Option<bool>,
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub inference_time_ms: Option<f64>,
}

#[derive(Serialize)]
pub struct FrameRequest<'a> {
    pub frame: &'a str,
}

#[derive(Debug, Serialize)]
pub struct FeedbackRequest<'a> {
    pub true_label: &'a str,
    pub predicted_label: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackResponse {
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStats {
    pub total_predictions: u64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub avg_confidence: f64,
    #[serde(default)]
    pub health_score: i64,
    #[serde(default)]
    pub class_distribution: BTreeMap<String, u64>,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// Response of `/detailed-stats`
#[derive(Debug, Clone, Deserialize)]
pub struct DetailedStats {
    pub summary: StatsSummary,
    #[serde(default)]
    pub class_statistics: Vec<ClassStatistics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsSummary {
    pub total_with_feedback: u64,
    pub inference_time_ms: InferenceTimeRange,
    pub confidence_distribution: ConfidenceDistribution,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceTimeRange {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Prediction counts per confidence band (>= 0.9, 0.7..0.9, < 0.7)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceDistribution {
    pub high_90_to_100: u64,
    pub medium_70_to_90: u64,
    pub low_below_70: u64,
}

/// Per predicted class, over predictions that received feedback
#[derive(Debug, Clone, Deserialize)]
pub struct ClassStatistics {
    #[serde(rename = "class")]
    pub class_name: String,
    pub total: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub avg_confidence: f64,
}

/// Response of `/model-performance`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelPerformance {
    pub total_predictions: u64,
    pub predictions_with_feedback: u64,
    pub correct_predictions: u64,
    pub accuracy_percent: f64,
    pub avg_confidence_percent: f64,
    pub avg_inference_time_ms: f64,
    pub feedback_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(deserialize_with = "required_id_as_string")]
    pub id: String,
    pub predicted_label: String,
    pub confidence: f64,
    #[serde(default)]
    pub true_label: Option<String>,
    #[serde(default)]
    pub is_correct: Option<i64>,
    #[serde(default)]
    pub inference_time: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub model_version: String,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub input_shape: Vec<i64>,
    #[serde(default)]
    pub quantized: bool,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub inference_engine: Option<String>,
    #[serde(default)]
    pub demo_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvExport {
    pub csv: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Number(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

// The service hands out integer row ids; older builds sent strings.
fn id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(raw.map(RawId::into_string).filter(|s| !s.is_empty()))
}

fn required_id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(RawId::into_string)
}
