// src/gui.rs
use anyhow::Result;
use eframe::egui;
use egui::{Align, Color32, Layout, RichText, Stroke, Ui, Vec2};
use image::DynamicImage;
use log::{error, info};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::api::remote::RemotePredictor;
use crate::api::types::{FeedbackResponse, PredictionResult};
use crate::capture::camera::{default_backend, CameraBackend};
use crate::controller::CaptureController;

const WINDOW_WIDTH: f32 = 520.0;
const WINDOW_HEIGHT: f32 = 720.0;
const IMAGE_MAX_HEIGHT: f32 = 360.0;
const LIVE_REFRESH: Duration = Duration::from_millis(33);

const ACCENT: Color32 = Color32::from_rgb(46, 125, 50);
const WARNING: Color32 = Color32::from_rgb(230, 150, 30);

enum WorkerOutcome {
    Prediction(Result<PredictionResult>),
    Feedback(Result<FeedbackResponse>),
}

pub struct LeafCheckApp {
    was_style_initialized: bool,

    controller: CaptureController,
    api: RemotePredictor,
    camera: Box<dyn CameraBackend>,
    outcome_tx: Sender<WorkerOutcome>,
    outcome_rx: Receiver<WorkerOutcome>,

    preview_texture: Option<(u64, egui::TextureHandle)>,
    live_texture: Option<egui::TextureHandle>,
    feedback_prompt: Option<String>,
}

impl LeafCheckApp {
    fn new(api: RemotePredictor, camera: Box<dyn CameraBackend>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Self {
            was_style_initialized: false,
            controller: CaptureController::new(),
            api,
            camera,
            outcome_tx,
            outcome_rx,
            preview_texture: None,
            live_texture: None,
            feedback_prompt: None,
        }
    }
}

impl eframe::App for LeafCheckApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.was_style_initialized {
            let mut style = (*ctx.style()).clone();
            style.visuals.widgets.inactive.rounding = egui::Rounding::same(6.0);
            style.visuals.widgets.hovered.rounding = egui::Rounding::same(6.0);
            style.visuals.widgets.active.rounding = egui::Rounding::same(6.0);
            style.visuals.selection.bg_fill = ACCENT;
            style.text_styles.insert(
                egui::TextStyle::Body,
                egui::FontId::new(15.0, egui::FontFamily::Proportional)
            );
            style.text_styles.insert(
                egui::TextStyle::Button,
                egui::FontId::new(15.0, egui::FontFamily::Proportional)
            );
            style.text_styles.insert(
                egui::TextStyle::Heading,
                egui::FontId::new(22.0, egui::FontFamily::Proportional)
            );
            ctx.set_style(style);
            self.was_style_initialized = true;
        }

        apply_worker_outcomes(&mut self.controller, &self.outcome_rx);

        if self.controller.camera_active() {
            if self.controller.poll_camera() {
                self.refresh_live_texture(ctx);
            }
            ctx.request_repaint_after(LIVE_REFRESH);
        } else {
            self.live_texture = None;
        }
        self.refresh_preview_texture(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.add_space(6.0);
            ui.heading(RichText::new("🍅 Leaf Disease Check").size(22.0));
            ui.label(RichText::new(self.api.base_url()).small().color(Color32::GRAY));
            ui.separator();
            ui.add_space(4.0);

            self.draw_controls(ui);
            ui.add_space(8.0);
            self.draw_image_area(ui);
            ui.add_space(8.0);
            self.draw_result_card(ui);
        });

        self.draw_feedback_prompt(ctx);
        self.show_alerts();
    }
}

impl LeafCheckApp {
    fn draw_controls(&mut self, ui: &mut Ui) {
        let loading = self.controller.is_loading();
        let button_size = egui::vec2(112.0, 34.0);

        ui.horizontal(|ui| {
            if ui.add_enabled(!loading, egui::Button::new(
                RichText::new("📁 Upload").size(14.0))
                .rounding(8.0)
                .min_size(button_size)
            ).clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("Images", &["jpg", "jpeg", "png", "bmp", "webp"])
                    .pick_file()
                {
                    self.select_file(path);
                }
            }

            let camera_label = if self.controller.camera_active() { "⏹ Stop Camera" } else { "📷 Use Camera" };
            if ui.add_enabled(!loading, egui::Button::new(
                RichText::new(camera_label).size(14.0))
                .rounding(8.0)
                .min_size(button_size)
            ).clicked() {
                self.controller.toggle_camera(self.camera.as_ref());
            }

            if self.controller.capture_visible() {
                if ui.add_enabled(!loading, egui::Button::new(
                    RichText::new("📸 Capture").size(14.0))
                    .fill(Color32::from_rgb(42, 90, 170))
                    .rounding(8.0)
                    .min_size(button_size)
                ).clicked() {
                    self.controller.capture();
                }
            }
        });

        ui.add_space(6.0);
        ui.horizontal(|ui| {
            if ui.add_enabled(!loading, egui::Button::new(
                RichText::new("🔍 Predict").size(15.0).color(Color32::WHITE))
                .fill(ACCENT)
                .rounding(8.0)
                .min_size(egui::vec2(button_size.x * 2.0, 36.0))
            ).clicked() {
                self.start_prediction(ui.ctx().clone());
            }
            if loading {
                ui.spinner();
                ui.label("Analyzing...");
            }
        });
    }

    fn draw_image_area(&self, ui: &mut Ui) {
        let texture = if self.controller.camera_active() {
            self.live_texture.as_ref()
        } else if self.controller.preview_visible() {
            self.preview_texture.as_ref().map(|(_, t)| t)
        } else {
            None
        };

        egui::Frame::none()
            .fill(Color32::from_rgb(35, 35, 35))
            .rounding(8.0)
            .stroke(Stroke::new(1.0, Color32::from_rgb(60, 60, 60)))
            .inner_margin(8.0)
            .show(ui, |ui| {
                ui.set_min_width(ui.available_width());
                match texture {
                    Some(texture) => {
                        ui.with_layout(Layout::top_down(Align::Center), |ui| {
                            ui.image((texture.id(), fit_size(texture.size_vec2(), ui.available_width())));
                        });
                    }
                    None => {
                        let hint = if self.controller.camera_active() {
                            "Waiting for camera..."
                        } else {
                            "Upload a photo or use the camera"
                        };
                        ui.add_sized(
                            [ui.available_width(), 160.0],
                            egui::Label::new(RichText::new(hint).color(Color32::GRAY)),
                        );
                    }
                }
            });
    }

    fn draw_result_card(&mut self, ui: &mut Ui) {
        let Some(result) = self.controller.result().cloned() else {
            return;
        };
        let feedback_enabled = self.controller.feedback_enabled();

        egui::Frame::none()
            .fill(Color32::from_rgb(30, 40, 30))
            .rounding(8.0)
            .inner_margin(12.0)
            .show(ui, |ui| {
                ui.set_min_width(ui.available_width());
                ui.label(RichText::new(&result.label).size(20.0).strong());
                ui.add_space(4.0);
                ui.add(
                    egui::ProgressBar::new((result.bar_width_percent / 100.0).clamp(0.0, 1.0) as f32)
                        .text(result.confidence_text.clone()),
                );
                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    if let Some(version) = &result.model_version {
                        ui.label(RichText::new(format!("Model {}", version)).small().color(Color32::GRAY));
                    }
                    if let Some(ms) = result.inference_time_ms {
                        ui.label(RichText::new(format!("{:.1} ms", ms)).small().color(Color32::GRAY));
                    }
                });
                if result.low_warning_visible {
                    ui.add_space(4.0);
                    ui.label(RichText::new("⚠ Low confidence. Try a clearer, closer photo of the leaf.").color(WARNING));
                }
                ui.add_space(6.0);
                if ui.add_enabled(feedback_enabled, egui::Button::new("✍ Wrong? Send correction").rounding(6.0)).clicked() {
                    self.feedback_prompt = Some(String::new());
                }
            });
    }

    fn draw_feedback_prompt(&mut self, ctx: &egui::Context) {
        let Some(mut label) = self.feedback_prompt.take() else {
            return;
        };
        let mut submitted = None;
        let mut keep_open = true;

        egui::Window::new("Correct label")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label("Enter the correct label (exact class name):");
                let response = ui.add(egui::TextEdit::singleline(&mut label).desired_width(260.0));
                response.request_focus();
                let entered = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                ui.horizontal(|ui| {
                    if ui.button("OK").clicked() || entered {
                        submitted = Some(label.clone());
                        keep_open = false;
                    }
                    if ui.button("Cancel").clicked() {
                        keep_open = false;
                    }
                });
            });

        if let Some(true_label) = submitted {
            self.start_feedback(&true_label, ctx.clone());
        } else if keep_open {
            self.feedback_prompt = Some(label);
        }
    }

    fn show_alerts(&mut self) {
        while let Some(message) = self.controller.take_alert() {
            rfd::MessageDialog::new()
                .set_title("Leaf Disease Check")
                .set_description(message.as_str())
                .set_level(rfd::MessageLevel::Warning)
                .set_buttons(rfd::MessageButtons::Ok)
                .show();
        }
    }

    fn select_file(&mut self, path: PathBuf) {
        info!("File picked: {}", path.display());
        self.controller.select_file(&path);
    }

    fn start_prediction(&mut self, ctx: egui::Context) {
        let Some(job) = self.controller.begin_predict() else {
            return;
        };
        let api = self.api.clone();
        let outcome_tx = self.outcome_tx.clone();
        info!("Starting prediction request");
        thread::spawn(move || {
            let outcome = job.run(&api);
            send_outcome(&outcome_tx, WorkerOutcome::Prediction(outcome));
            ctx.request_repaint();
        });
    }

    fn start_feedback(&mut self, true_label: &str, ctx: egui::Context) {
        let Some(job) = self.controller.begin_feedback(true_label) else {
            return;
        };
        let api = self.api.clone();
        let outcome_tx = self.outcome_tx.clone();
        thread::spawn(move || {
            let outcome = job.run(&api);
            send_outcome(&outcome_tx, WorkerOutcome::Feedback(outcome));
            ctx.request_repaint();
        });
    }

    fn refresh_preview_texture(&mut self, ctx: &egui::Context) {
        let revision = self.controller.preview_revision();
        if self.preview_texture.as_ref().map(|(r, _)| *r) == Some(revision) {
            return;
        }
        self.preview_texture = self
            .controller
            .preview()
            .map(|image| (revision, ctx.load_texture("preview_texture", to_color_image(image), egui::TextureOptions::LINEAR)));
    }

    fn refresh_live_texture(&mut self, ctx: &egui::Context) {
        let Some(frame) = self.controller.live_frame() else {
            return;
        };
        let color_image = to_color_image(frame);
        match &mut self.live_texture {
            Some(texture) => texture.set(color_image, egui::TextureOptions::LINEAR),
            None => {
                self.live_texture = Some(ctx.load_texture("camera_texture", color_image, egui::TextureOptions::LINEAR));
            }
        }
    }
}

fn send_outcome(outcome_tx: &Sender<WorkerOutcome>, outcome: WorkerOutcome) {
    if outcome_tx.send(outcome).is_err() {
        error!("Window closed before the worker finished");
    }
}

/// Hand every finished worker result back to the controller
fn apply_worker_outcomes(controller: &mut CaptureController, outcomes: &Receiver<WorkerOutcome>) {
    while let Ok(outcome) = outcomes.try_recv() {
        match outcome {
            WorkerOutcome::Prediction(result) => controller.finish_predict(result),
            WorkerOutcome::Feedback(result) => {
                controller.finish_feedback(result);
            }
        }
    }
}

fn to_color_image(image: &DynamicImage) -> egui::ColorImage {
    let size = [image.width() as usize, image.height() as usize];
    egui::ColorImage::from_rgba_unmultiplied(size, image.to_rgba8().as_flat_samples().as_slice())
}

/// Scale an image to the available width without exceeding the image area height
fn fit_size(image_size: Vec2, available_width: f32) -> Vec2 {
    if image_size.x <= 0.0 || image_size.y <= 0.0 {
        return Vec2::ZERO;
    }
    let aspect_ratio = image_size.x / image_size.y;
    let mut width = available_width.min(image_size.x);
    let mut height = width / aspect_ratio;
    if height > IMAGE_MAX_HEIGHT {
        height = IMAGE_MAX_HEIGHT;
        width = height * aspect_ratio;
    }
    Vec2::new(width, height)
}

pub fn run_gui(server_url: &str, timeout: Duration, camera_device: &str) -> Result<()> {
    info!("Leaf disease check GUI starting up...");

    let api = RemotePredictor::new(server_url, timeout)?;
    let camera = default_backend(camera_device);

    let native_options = eframe::NativeOptions {
        initial_window_size: Some(egui::vec2(WINDOW_WIDTH, WINDOW_HEIGHT)),
        min_window_size: Some(egui::vec2(360.0, 480.0)),
        ..eframe::NativeOptions::default()
    };

    eframe::run_native(
        "Leaf Disease Check",
        native_options,
        Box::new(move |_cc| {
            Box::new(LeafCheckApp::new(api, camera))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to start GUI: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_size_keeps_aspect_ratio_within_bounds() {
        let wide = fit_size(Vec2::new(1280.0, 720.0), 480.0);
        assert_eq!(wide.x, 480.0);
        assert!((wide.y - 270.0).abs() < 0.01);

        let tall = fit_size(Vec2::new(600.0, 1200.0), 480.0);
        assert_eq!(tall.y, IMAGE_MAX_HEIGHT);
        assert!((tall.x - 180.0).abs() < 0.01);

        let small = fit_size(Vec2::new(100.0, 50.0), 480.0);
        assert_eq!(small, Vec2::new(100.0, 50.0));
    }

    #[test]
    fn results_arriving_in_the_same_frame_are_all_applied() {
        let mut controller = CaptureController::new();
        controller.finish_predict(Ok(PredictionResult {
            id: Some("4".to_string()),
            disease: Some("Rust".to_string()),
            confidence: Some(70.0),
            ..PredictionResult::default()
        }));
        controller.select_file_bytes("leaf.jpg".to_string(), "image/jpeg".to_string(), vec![1, 2, 3]);

        assert!(controller.begin_feedback("Healthy").is_some());
        assert!(controller.begin_predict().is_some());
        assert!(controller.is_loading());

        let (tx, rx) = mpsc::channel();
        send_outcome(&tx, WorkerOutcome::Prediction(Ok(PredictionResult {
            id: Some("5".to_string()),
            disease: Some("Healthy".to_string()),
            confidence: Some(95.0),
            ..PredictionResult::default()
        })));
        send_outcome(&tx, WorkerOutcome::Feedback(Ok(FeedbackResponse { accuracy: Some(50.0) })));
        apply_worker_outcomes(&mut controller, &rx);

        assert!(!controller.is_loading());
        assert!(controller.feedback_enabled());
        assert_eq!(controller.result().map(|r| r.label.as_str()), Some("Healthy"));
        assert_eq!(
            controller.take_alert().as_deref(),
            Some("Feedback recorded. Current accuracy: 50")
        );
    }

    #[test]
    fn color_image_matches_source_dimensions() {
        let image = DynamicImage::new_rgb8(7, 3);
        let color = to_color_image(&image);
        assert_eq!(color.size, [7, 3]);
    }
}
