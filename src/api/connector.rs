// src/api/connector.rs
use anyhow::Result;

use super::types::{FeedbackResponse, PredictionResult};

/// Trait defining the calls the capture controller makes against the prediction service
pub trait PredictorApi: Send + Sync {
    /// Submit an uploaded file as multipart form data (`POST /predict`)
    fn predict_file(&self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<PredictionResult>;

    /// Submit a captured frame as a data URL (`POST /predict-frame`)
    fn predict_frame(&self, data_url: &str) -> Result<PredictionResult>;

    /// Report the correct label for an earlier prediction (`POST /feedback/{id}`)
    fn send_feedback(&self, prediction_id: &str, true_label: &str, predicted_label: &str) -> Result<FeedbackResponse>;
}
