// src/controller.rs
//! Capture-and-predict state: the selected image, the camera session, the
//! rendered prediction and the queue of user-facing alerts.
//!
//! Frontends drive it with user actions and render from its accessors. Network
//! work is split into `begin_*` (UI thread, builds an owned job), `Job::run`
//! (any thread) and `finish_*` (UI thread) so the GUI can keep painting while a
//! request is in flight.
use anyhow::{Context, Result};
use image::DynamicImage;
use log::{error, info, warn};
use std::collections::VecDeque;
use std::path::Path;

use crate::api::connector::PredictorApi;
use crate::api::types::{FeedbackResponse, PredictionResult};
use crate::capture::camera::{CameraBackend, CameraRequest, CameraSession};
use crate::capture::frame;

pub const ALERT_NO_IMAGE: &str = "Please upload or capture an image first.";
pub const ALERT_CAMERA_UNAVAILABLE: &str = "Camera access denied or not available.";
pub const ALERT_NO_PREDICTION_ID: &str = "No prediction id available to feedback.";

/// The image waiting to be submitted
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// A file picked by the user, sent as-is
    FileBlob {
        name: String,
        mime: String,
        bytes: Vec<u8>,
    },
    /// A camera snapshot, held as JPEG bytes
    CapturedFrame { bytes: Vec<u8> },
}

impl ImageSource {
    pub fn bytes(&self) -> &[u8] {
        match self {
            ImageSource::FileBlob { bytes, .. } | ImageSource::CapturedFrame { bytes } => bytes,
        }
    }
}

/// What the result card shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultView {
    pub label: String,
    pub bar_width_percent: f64,
    pub confidence_text: String,
    pub model_version: Option<String>,
    pub low_warning_visible: bool,
    pub prediction_id: Option<String>,
    pub inference_time_ms: Option<f64>,
}

impl ResultView {
    /// Apply a response on top of the current card. Fields the response leaves
    /// out keep whatever the card showed before.
    fn apply(&mut self, response: &PredictionResult) {
        self.label = response
            .disease
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        let confidence = response.confidence.unwrap_or(0.0);
        self.bar_width_percent = confidence;
        self.confidence_text = format!("{}%", confidence);
        if let Some(version) = response.model_version.as_ref().filter(|v| !v.is_empty()) {
            self.model_version = Some(version.clone());
        }
        if let Some(low) = response.low_confidence {
            self.low_warning_visible = low;
        }
        self.prediction_id = response.id.clone();
        self.inference_time_ms = response.inference_time_ms;
    }
}

/// A prediction request detached from the controller
pub struct PredictJob {
    source: ImageSource,
}

impl PredictJob {
    pub fn run(self, api: &dyn PredictorApi) -> Result<PredictionResult> {
        match &self.source {
            ImageSource::FileBlob { name, mime, bytes } => api.predict_file(name, mime, bytes),
            ImageSource::CapturedFrame { bytes } => {
                let data_url = frame::to_data_url("image/jpeg", bytes);
                api.predict_frame(&data_url)
            }
        }
    }
}

/// A feedback request detached from the controller
pub struct FeedbackJob {
    prediction_id: String,
    true_label: String,
    predicted_label: String,
}

impl FeedbackJob {
    pub fn run(self, api: &dyn PredictorApi) -> Result<FeedbackResponse> {
        api.send_feedback(&self.prediction_id, &self.true_label, &self.predicted_label)
    }
}

#[derive(Default)]
pub struct CaptureController {
    image: Option<ImageSource>,
    preview: Option<DynamicImage>,
    preview_revision: u64,
    camera: Option<CameraSession>,
    loading: bool,
    feedback_pending: bool,
    result: Option<ResultView>,
    alerts: VecDeque<String>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a file from disk and make it the current image
    pub fn select_file(&mut self, path: &Path) {
        match std::fs::read(path).with_context(|| format!("Could not read {}", path.display())) {
            Ok(bytes) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                let mime = frame::guess_mime(path, &bytes);
                self.select_file_bytes(name, mime, bytes);
            }
            Err(e) => {
                error!("{:#}", e);
                self.alert(format!("{:#}", e));
            }
        }
    }

    /// Make an in-memory file the current image. Any open camera is released.
    pub fn select_file_bytes(&mut self, name: String, mime: String, bytes: Vec<u8>) {
        info!("Selected file {} ({} bytes, {})", name, bytes.len(), mime);
        self.reset_camera();
        let preview = decode_preview(&bytes);
        self.set_image(ImageSource::FileBlob { name, mime, bytes }, preview);
    }

    /// Start the camera, or stop it if it is already streaming
    pub fn toggle_camera(&mut self, backend: &dyn CameraBackend) {
        if self.camera.is_some() {
            info!("Camera toggled off");
            self.reset_camera();
            return;
        }
        let request = CameraRequest::default();
        match backend.open(&request) {
            Ok(stream) => {
                info!("Camera toggled on ({:?}, width {})", request.facing, request.width_hint);
                self.camera = Some(CameraSession::new(stream));
            }
            Err(e) => {
                warn!("Camera unavailable: {:#}", e);
                self.alert(ALERT_CAMERA_UNAVAILABLE);
            }
        }
    }

    /// Pull the newest camera frame. Returns true when the live view changed.
    pub fn poll_camera(&mut self) -> bool {
        self.camera.as_mut().map_or(false, CameraSession::poll)
    }

    /// Snapshot the live feed into the current image and release the camera
    pub fn capture(&mut self) {
        let Some(mut session) = self.camera.take() else {
            return;
        };
        session.poll();
        let snapshot = match session.last_frame() {
            Some(image) => frame::snapshot_data_url(image),
            None => {
                warn!("No camera frame yet, capturing a blank frame");
                frame::snapshot_data_url(&frame::blank_frame())
            }
        };
        session.stop();

        match snapshot.and_then(|url| frame::from_data_url(&url)) {
            Ok((_, bytes)) => {
                info!("Captured frame ({} bytes)", bytes.len());
                let preview = decode_preview(&bytes);
                self.set_image(ImageSource::CapturedFrame { bytes }, preview);
            }
            Err(e) => {
                error!("Capture failed: {:#}", e);
                self.alert(format!("Capture failed: {:#}", e));
            }
        }
    }

    /// Stop and forget the camera session, if any
    pub fn reset_camera(&mut self) {
        if let Some(mut session) = self.camera.take() {
            session.stop();
        }
    }

    fn set_image(&mut self, source: ImageSource, preview: Option<DynamicImage>) {
        self.image = Some(source);
        self.preview = preview;
        self.preview_revision += 1;
    }

    /// Validate and enter the loading state. `None` means nothing to send.
    pub fn begin_predict(&mut self) -> Option<PredictJob> {
        let Some(source) = self.image.clone() else {
            self.alert(ALERT_NO_IMAGE);
            return None;
        };
        info!("Submitting {} bytes for prediction", source.bytes().len());
        self.loading = true;
        Some(PredictJob { source })
    }

    /// Leave the loading state and render the outcome
    pub fn finish_predict(&mut self, outcome: Result<PredictionResult>) {
        self.loading = false;
        match outcome {
            Ok(response) => {
                info!(
                    "Prediction: {:?} at {:?}% (id {:?})",
                    response.disease, response.confidence, response.id
                );
                self.result.get_or_insert_with(ResultView::default).apply(&response);
            }
            Err(e) => {
                error!("Prediction failed: {:#}", e);
                self.alert(format!("Prediction failed: {:#}", e));
            }
        }
    }

    pub fn predict(&mut self, api: &dyn PredictorApi) {
        if let Some(job) = self.begin_predict() {
            let outcome = job.run(api);
            self.finish_predict(outcome);
        }
    }

    pub fn feedback_enabled(&self) -> bool {
        !self.loading
            && !self.feedback_pending
            && self.result.as_ref().map_or(false, |r| r.prediction_id.is_some())
    }

    /// Validate a correction label. `None` means nothing to send.
    pub fn begin_feedback(&mut self, true_label: &str) -> Option<FeedbackJob> {
        let rendered = self
            .result
            .as_ref()
            .and_then(|r| r.prediction_id.clone().map(|id| (id, r.label.clone())));
        let Some((prediction_id, predicted_label)) = rendered else {
            self.alert(ALERT_NO_PREDICTION_ID);
            return None;
        };
        // Whitespace-only input counts as no answer, the same as a cancelled prompt
        let true_label = true_label.trim();
        if true_label.is_empty() {
            return None;
        }
        self.feedback_pending = true;
        Some(FeedbackJob {
            prediction_id,
            true_label: true_label.to_string(),
            predicted_label,
        })
    }

    /// Report how a feedback request went. Returns true when the service recorded it.
    pub fn finish_feedback(&mut self, outcome: Result<FeedbackResponse>) -> bool {
        self.feedback_pending = false;
        match outcome {
            Ok(response) => {
                let accuracy = format_accuracy(response.accuracy);
                info!("Feedback recorded, accuracy {}", accuracy);
                self.alert(format!("Feedback recorded. Current accuracy: {}", accuracy));
                true
            }
            Err(e) => {
                error!("Feedback failed: {:#}", e);
                self.alert(format!("Feedback failed: {:#}", e));
                false
            }
        }
    }

    /// Send a correction synchronously. False when nothing was recorded.
    pub fn submit_feedback(&mut self, api: &dyn PredictorApi, true_label: &str) -> bool {
        match self.begin_feedback(true_label) {
            Some(job) => {
                let outcome = job.run(api);
                self.finish_feedback(outcome)
            }
            None => false,
        }
    }

    fn alert(&mut self, message: impl Into<String>) {
        self.alerts.push_back(message.into());
    }

    /// Oldest alert the frontend has not shown yet
    pub fn take_alert(&mut self) -> Option<String> {
        self.alerts.pop_front()
    }

    pub fn image_source(&self) -> Option<&ImageSource> {
        self.image.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn camera_active(&self) -> bool {
        self.camera.is_some()
    }

    /// The capture button is shown only while streaming
    pub fn capture_visible(&self) -> bool {
        self.camera_active()
    }

    /// The still preview is hidden while the live feed is shown
    pub fn preview_visible(&self) -> bool {
        !self.camera_active() && self.preview.is_some()
    }

    pub fn preview(&self) -> Option<&DynamicImage> {
        self.preview.as_ref()
    }

    /// Bumped whenever the preview image changes
    pub fn preview_revision(&self) -> u64 {
        self.preview_revision
    }

    pub fn live_frame(&self) -> Option<&DynamicImage> {
        self.camera.as_ref().and_then(CameraSession::last_frame)
    }

    pub fn result(&self) -> Option<&ResultView> {
        self.result.as_ref()
    }
}

/// Accuracy as the service reports it. Zero means no feedback has been scored yet.
pub fn format_accuracy(accuracy: Option<f64>) -> String {
    accuracy
        .filter(|a| *a != 0.0)
        .map_or_else(|| "N/A".to_string(), |a| a.to_string())
}

fn decode_preview(bytes: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory(bytes) {
        Ok(image) => Some(image),
        Err(e) => {
            warn!("Could not decode preview: {}", e);
            None
        }
    }
}
