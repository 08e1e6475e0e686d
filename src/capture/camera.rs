// src/capture/camera.rs
use anyhow::{anyhow, Result};
use image::DynamicImage;
use log::info;

/// Which way the requested camera should face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    /// Rear camera, pointed at the plant
    Environment,
}

/// Parameters for opening a camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRequest {
    pub facing: Facing,
    pub width_hint: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        Self {
            facing: Facing::Environment,
            width_hint: 640,
        }
    }
}

/// A running camera feed
pub trait CameraStream: Send {
    /// Newest frame delivered since the last call, if any
    fn next_frame(&mut self) -> Option<DynamicImage>;

    /// Release the device. Must be idempotent.
    fn stop(&mut self);
}

/// Something that can open a camera feed
pub trait CameraBackend {
    fn open(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>>;
}

/// An open camera owned by the capture controller
pub struct CameraSession {
    stream: Box<dyn CameraStream>,
    last_frame: Option<DynamicImage>,
    stopped: bool,
}

impl CameraSession {
    pub fn new(stream: Box<dyn CameraStream>) -> Self {
        Self {
            stream,
            last_frame: None,
            stopped: false,
        }
    }

    /// Pull any pending frame from the stream. Returns true when the frame changed.
    pub fn poll(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        match self.stream.next_frame() {
            Some(frame) => {
                self.last_frame = Some(frame);
                true
            }
            None => false,
        }
    }

    pub fn last_frame(&self) -> Option<&DynamicImage> {
        self.last_frame.as_ref()
    }

    pub fn stop(&mut self) {
        if !self.stopped {
            info!("Stopping camera stream");
            self.stream.stop();
            self.stopped = true;
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Backend used when the binary is built without camera support
#[cfg_attr(feature = "camera", allow(dead_code))]
pub struct UnavailableCamera;

impl CameraBackend for UnavailableCamera {
    fn open(&self, _request: &CameraRequest) -> Result<Box<dyn CameraStream>> {
        Err(anyhow!("Camera support not compiled in (rebuild with --features camera)"))
    }
}

pub const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
pub const CAMERA_ENV: &str = "LEAFCHECK_CAMERA";

pub fn get_camera_device(device_arg: Option<String>) -> String {
    device_arg.unwrap_or_else(|| {
        std::env::var(CAMERA_ENV).unwrap_or_else(|_| DEFAULT_CAMERA_DEVICE.to_string())
    })
}

/// Camera backend for this build
pub fn default_backend(device: &str) -> Box<dyn CameraBackend> {
    #[cfg(feature = "camera")]
    {
        Box::new(gst_camera::GstCamera::new(device))
    }
    #[cfg(not(feature = "camera"))]
    {
        log::warn!("Built without camera support; {} will not be opened", device);
        Box::new(UnavailableCamera)
    }
}

#[cfg(feature = "camera")]
pub mod gst_camera {
    use super::{CameraBackend, CameraRequest, CameraStream};
    use anyhow::{anyhow, Context, Result};
    use gstreamer as gst;
    use gstreamer::prelude::*;
    use gstreamer_app as gst_app;
    use image::{DynamicImage, RgbaImage};
    use log::{debug, error, info};

    /// V4L2 camera read through a GStreamer `v4l2src ! videoconvert ! videoscale ! appsink` pipeline
    pub struct GstCamera {
        device: String,
    }

    impl GstCamera {
        pub fn new(device: &str) -> Self {
            Self {
                device: device.to_string(),
            }
        }
    }

    impl CameraBackend for GstCamera {
        fn open(&self, request: &CameraRequest) -> Result<Box<dyn CameraStream>> {
            gst::init().context("Failed to initialize GStreamer")?;
            // v4l2 has no notion of facing; the configured device wins
            debug!("Facing {:?} requested, using {}", request.facing, self.device);

            let pipeline = gst::Pipeline::new();

            let source = gst::ElementFactory::make("v4l2src")
                .property("device", &self.device)
                .build()
                .context("Failed to create v4l2src element")?;

            let videoconvert = gst::ElementFactory::make("videoconvert")
                .build()
                .context("Failed to create videoconvert element")?;

            let videoscale = gst::ElementFactory::make("videoscale")
                .build()
                .context("Failed to create videoscale element")?;

            let caps = gst::Caps::builder("video/x-raw")
                .field("format", "RGBA")
                .field("width", request.width_hint as i32)
                .build();

            let appsink = gst_app::AppSink::builder()
                .caps(&caps)
                .max_buffers(1)
                .drop(true)
                .sync(false)
                .build();

            pipeline.add_many([&source, &videoconvert, &videoscale, appsink.upcast_ref()])?;
            gst::Element::link_many([&source, &videoconvert, &videoscale, appsink.upcast_ref()])?;

            pipeline
                .set_state(gst::State::Playing)
                .with_context(|| format!("Could not start camera {}", self.device))?;

            let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(5));
            if let Err(e) = result {
                let _ = pipeline.set_state(gst::State::Null);
                return Err(anyhow!("Camera {} failed to start: {:?}", self.device, e));
            }

            info!("Camera {} streaming at width {}", self.device, request.width_hint);
            Ok(Box::new(GstStream {
                pipeline,
                appsink,
                running: true,
            }))
        }
    }

    struct GstStream {
        pipeline: gst::Pipeline,
        appsink: gst_app::AppSink,
        running: bool,
    }

    impl CameraStream for GstStream {
        fn next_frame(&mut self) -> Option<DynamicImage> {
            if !self.running {
                return None;
            }
            let sample = self.appsink.try_pull_sample(gst::ClockTime::ZERO)?;
            let structure = sample.caps()?.structure(0)?;
            let width = structure.get::<i32>("width").ok()? as u32;
            let height = structure.get::<i32>("height").ok()? as u32;
            let buffer = sample.buffer()?;
            let map = buffer.map_readable().ok()?;
            let expected = (width * height * 4) as usize;
            if map.len() < expected {
                error!("Short camera buffer: {} < {}", map.len(), expected);
                return None;
            }
            RgbaImage::from_raw(width, height, map.as_slice()[..expected].to_vec())
                .map(DynamicImage::ImageRgba8)
        }

        fn stop(&mut self) {
            if self.running {
                if let Err(e) = self.pipeline.set_state(gst::State::Null) {
                    error!("Failed to stop camera pipeline: {:?}", e);
                }
                self.running = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingStream {
        stops: Arc<AtomicUsize>,
    }

    impl CameraStream for CountingStream {
        fn next_frame(&mut self) -> Option<DynamicImage> {
            Some(DynamicImage::new_rgb8(2, 2))
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn session_stops_once_even_when_dropped_after_stop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut session = CameraSession::new(Box::new(CountingStream { stops: stops.clone() }));
        assert!(session.poll());
        assert!(session.last_frame().is_some());
        session.stop();
        assert!(!session.poll());
        drop(session);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_a_live_session_releases_the_camera() {
        let stops = Arc::new(AtomicUsize::new(0));
        drop(CameraSession::new(Box::new(CountingStream { stops: stops.clone() })));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_request_asks_for_the_rear_camera() {
        let request = CameraRequest::default();
        assert_eq!(request.facing, Facing::Environment);
        assert_eq!(request.width_hint, 640);
    }

    #[test]
    fn unavailable_backend_refuses_to_open() {
        assert!(UnavailableCamera.open(&CameraRequest::default()).is_err());
    }
}
