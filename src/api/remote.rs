// src/api/remote.rs
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::connector::PredictorApi;
use super::types::{
    CsvExport, DetailedStats, FeedbackRequest, FeedbackResponse, FrameRequest, HistoryEntry,
    ModelInfo, ModelPerformance, PredictionResult, ServiceStats,
};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
pub const SERVER_ENV: &str = "LEAFCHECK_SERVER";

//Field and file name the service expects on /predict
const UPLOAD_FIELD: &str = "file";
const UPLOAD_FILE_NAME: &str = "image.jpg";

/// HTTP client for the leaf disease prediction service
#[derive(Clone)]
pub struct RemotePredictor {
    base_url: String,
    client: Client,
}

impl RemotePredictor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!("Using prediction service at {} (timeout {:?})", base_url, timeout);

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| request_error(&url, e))?;
        parse_json(response)
    }

    pub fn stats(&self) -> Result<ServiceStats> {
        self.get_json("/stats")
    }

    pub fn detailed_stats(&self) -> Result<DetailedStats> {
        self.get_json("/detailed-stats")
    }

    pub fn model_performance(&self) -> Result<ModelPerformance> {
        self.get_json("/model-performance")
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.get_json("/history")
    }

    pub fn model_info(&self) -> Result<ModelInfo> {
        self.get_json("/model-info")
    }

    pub fn export_csv(&self) -> Result<String> {
        let export: CsvExport = self.get_json("/export/csv")?;
        Ok(export.csv)
    }
}

impl PredictorApi for RemotePredictor {
    fn predict_file(&self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<PredictionResult> {
        info!("Uploading {} ({} bytes, {}) to /predict", file_name, bytes.len(), mime);

        let part = Part::bytes(bytes.to_vec())
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(mime)
            .with_context(|| format!("Invalid mime type: {}", mime))?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = self.url("/predict");
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| request_error(&url, e))?;
        parse_json(response)
    }

    fn predict_frame(&self, data_url: &str) -> Result<PredictionResult> {
        info!("Submitting captured frame ({} chars) to /predict-frame", data_url.len());

        let url = self.url("/predict-frame");
        let response = self
            .client
            .post(&url)
            .json(&FrameRequest { frame: data_url })
            .send()
            .map_err(|e| request_error(&url, e))?;
        parse_json(response)
    }

    fn send_feedback(&self, prediction_id: &str, true_label: &str, predicted_label: &str) -> Result<FeedbackResponse> {
        info!("Sending feedback for prediction {}: {} (predicted {})", prediction_id, true_label, predicted_label);

        let url = self.url(&format!("/feedback/{}", prediction_id));
        let response = self
            .client
            .post(&url)
            .json(&FeedbackRequest { true_label, predicted_label })
            .send()
            .map_err(|e| request_error(&url, e))?;
        parse_json(response)
    }
}

fn request_error(url: &str, e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("Request to {} timed out", url)
    } else if e.is_connect() {
        warn!("Could not connect to prediction service at {}: {}", url, e);
        anyhow!("Could not connect to {}: {}", url, e)
    } else {
        anyhow!("Request to {} failed: {}", url, e)
    }
}

fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().unwrap_or_default();
        return Err(anyhow!("Server responded with {}: {}", status, error_text));
    }
    let body = response.text()?;
    serde_json::from_str(&body).with_context(|| format!("Malformed response: {}", body))
}

/// Resolve the service URL from an explicit argument, then the environment, then the default
pub fn get_server_url(url_arg: Option<String>) -> String {
    url_arg.unwrap_or_else(|| {
        std::env::var(SERVER_ENV).unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string())
    })
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    /// What the stub saw on the wire
    pub struct Captured {
        pub head: String,
        pub body: Vec<u8>,
    }

    impl Captured {
        pub fn request_line(&self) -> &str {
            self.head.lines().next().unwrap_or("")
        }

        pub fn body_text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    /// Serve exactly one request with `status` and a JSON body
    pub fn serve_once(status: &str, body: &str) -> (String, Receiver<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let captured = read_request(&mut stream);
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
                let _ = tx.send(captured);
            }
        });
        (format!("http://{}", addr), rx)
    }

    fn read_request(stream: &mut impl Read) -> Captured {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = stream.read(&mut buf).unwrap_or(0);
            if n == 0 {
                break data.len();
            }
            data.extend_from_slice(&buf[..n]);
            if let Some(pos) = find(&data, b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&data[..header_end]).into_owned();
        let lower = head.to_ascii_lowercase();
        let content_length = lower
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        let chunked = lower.contains("transfer-encoding: chunked");

        let mut body = data[header_end.min(data.len())..].to_vec();
        loop {
            let done = match content_length {
                Some(len) => body.len() >= len,
                None if chunked => body.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if done {
                break;
            }
            let n = stream.read(&mut buf).unwrap_or(0);
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        Captured { head, body }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::serve_once;
    use super::*;

    fn predictor(url: &str) -> RemotePredictor {
        RemotePredictor::new(url, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn predict_file_posts_multipart_file_field() {
        let (url, rx) = serve_once(
            "200 OK",
            r#"{"id": 7, "disease": "Early_blight", "confidence": 64.2, "model_version": "v1.0-tflite-int8", "low_confidence": false}"#,
        );
        let result = predictor(&url)
            .predict_file("leaf.png", "image/png", b"\x89PNG fake")
            .unwrap();
        assert_eq!(result.disease.as_deref(), Some("Early_blight"));
        assert_eq!(result.id.as_deref(), Some("7"));

        let captured = rx.recv().unwrap();
        assert!(captured.request_line().starts_with("POST /predict "));
        assert!(captured.head.to_ascii_lowercase().contains("multipart/form-data"));
        let body = captured.body_text().to_ascii_lowercase();
        assert!(body.contains(r#"name="file""#));
        assert!(body.contains(r#"filename="image.jpg""#));
        assert!(body.contains("content-type: image/png"));
    }

    #[test]
    fn predict_frame_posts_json_data_url() {
        let (url, rx) = serve_once("200 OK", r#"{"disease": "Healthy", "confidence": 99.0}"#);
        let result = predictor(&url)
            .predict_frame("data:image/jpeg;base64,AAAA")
            .unwrap();
        assert_eq!(result.confidence, Some(99.0));

        let captured = rx.recv().unwrap();
        assert!(captured.request_line().starts_with("POST /predict-frame "));
        let json: serde_json::Value = serde_json::from_slice(&captured.body).unwrap();
        assert_eq!(json["frame"], "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn feedback_posts_labels_to_prediction_path() {
        let (url, rx) = serve_once("200 OK", r#"{"status": "ok", "accuracy": 75.0}"#);
        let response = predictor(&url)
            .send_feedback("12", "Late_blight", "Early_blight")
            .unwrap();
        assert_eq!(response.accuracy, Some(75.0));

        let captured = rx.recv().unwrap();
        assert!(captured.request_line().starts_with("POST /feedback/12 "));
        let json: serde_json::Value = serde_json::from_slice(&captured.body).unwrap();
        assert_eq!(json["true_label"], "Late_blight");
        assert_eq!(json["predicted_label"], "Early_blight");
    }

    #[test]
    fn non_success_status_is_an_error_with_body() {
        let (url, _rx) = serve_once("400 Bad Request", r#"{"detail": "No frame data"}"#);
        let err = predictor(&url).predict_frame("").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("No frame data"));
    }

    #[test]
    fn malformed_body_is_an_error() {
        let (url, _rx) = serve_once("200 OK", "not json");
        let err = predictor(&url).predict_frame("data:,").unwrap_err();
        assert!(err.to_string().contains("Malformed response"));
    }

    #[test]
    fn history_parses_rows() {
        let (url, rx) = serve_once(
            "200 OK",
            r#"[{"id": 2, "image_path": "predictions/pred_1.jpg", "predicted_label": "Healthy", "confidence": 0.93, "true_label": null, "is_correct": null, "inference_time": 11.2, "created_at": "2024-05-01T10:00:00"}]"#,
        );
        let rows = predictor(&url).history().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "2");
        assert_eq!(rows[0].predicted_label, "Healthy");
        assert!(rx.recv().unwrap().request_line().starts_with("GET /history "));
    }

    #[test]
    fn model_performance_is_fetched_from_its_endpoint() {
        let (url, rx) = serve_once(
            "200 OK",
            r#"{"total_predictions": 5, "predictions_with_feedback": 2, "correct_predictions": 1, "accuracy_percent": 50.0, "avg_confidence_percent": 82.4, "avg_inference_time_ms": 9.7, "feedback_rate": 40.0}"#,
        );
        let perf = predictor(&url).model_performance().unwrap();
        assert_eq!(perf.total_predictions, 5);
        assert_eq!(perf.feedback_rate, 40.0);
        assert!(rx.recv().unwrap().request_line().starts_with("GET /model-performance "));
    }

    #[test]
    fn detailed_stats_is_fetched_from_its_endpoint() {
        let (url, rx) = serve_once(
            "200 OK",
            r#"{"summary": {"total_with_feedback": 1, "inference_time_ms": {"min": 5.0, "max": 5.0, "avg": 5.0}, "confidence_distribution": {"high_90_to_100": 1, "medium_70_to_90": 0, "low_below_70": 0}}, "class_statistics": [{"class": "Healthy", "total": 1, "correct": 1, "accuracy": 100.0, "avg_confidence": 0.97}]}"#,
        );
        let stats = predictor(&url).detailed_stats().unwrap();
        assert_eq!(stats.class_statistics.len(), 1);
        assert!(rx.recv().unwrap().request_line().starts_with("GET /detailed-stats "));
    }

    #[test]
    fn trailing_slash_is_trimmed_from_base_url() {
        let p = predictor("http://localhost:8000/");
        assert_eq!(p.base_url(), "http://localhost:8000");
    }

    #[test]
    fn server_url_prefers_argument() {
        assert_eq!(get_server_url(Some("http://pi:8000".to_string())), "http://pi:8000");
    }
}
