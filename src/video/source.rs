//! Frame source: capture, digital zoom, JPEG + base64 encoding, publication.
//!
//! The capture loop runs on its own task and publishes into the shared [`FrameBuffer`].
//! Publication is drop-oldest, so a slow network never stalls capture.

use crate::config::VideoConfig;
use crate::error::{RigError, RigResult};
use crate::hardware::FrameCapture;
use crate::video::frame_buffer::{EncodedFrame, FrameBuffer};
use base64::Engine;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Region of the sensor kept by the digital zoom
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    /// Left edge in pixels
    pub x: u32,
    /// Top edge in pixels
    pub y: u32,
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
}

impl CropWindow {
    /// Number of pixels inside the window
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Compute the centered crop window for a zoom level
///
/// Level 0 keeps the whole frame. Any other level keeps a square of half-size
/// `crop_base - level` (at least 1), clipped to the frame.
pub fn crop_window(crop_base: u32, level: u32, frame_width: u32, frame_height: u32) -> CropWindow {
    if level == 0 {
        return CropWindow {
            x: 0,
            y: 0,
            width: frame_width,
            height: frame_height,
        };
    }

    let half = crop_base.saturating_sub(level).max(1);
    let side = half
        .saturating_mul(2)
        .min(frame_width)
        .min(frame_height)
        .max(1);
    CropWindow {
        x: frame_width.saturating_sub(side) / 2,
        y: frame_height.saturating_sub(side) / 2,
        width: side.min(frame_width.max(1)),
        height: side.min(frame_height.max(1)),
    }
}

/// Shared, clamped zoom level
///
/// Cloned into the command authority so granted clients can change zoom without touching
/// the capture task.
#[derive(Debug, Clone)]
pub struct ZoomControl {
    level: Arc<AtomicU32>,
    min: u32,
    max: u32,
}

impl ZoomControl {
    /// Create a control clamped to `min..=max`
    pub fn new(initial: u32, min: u32, max: u32) -> Self {
        let (min, max) = (min.min(max), max.max(min));
        Self {
            level: Arc::new(AtomicU32::new(initial.clamp(min, max))),
            min,
            max,
        }
    }

    /// Set the zoom level, clamped to the configured range; returns the applied level
    pub fn set(&self, level: i64) -> u32 {
        let clamped = level.clamp(i64::from(self.min), i64::from(self.max));
        let applied = u32::try_from(clamped).unwrap_or(self.min);
        self.level.store(applied, Ordering::SeqCst);
        applied
    }

    /// Current zoom level
    pub fn level(&self) -> u32 {
        self.level.load(Ordering::SeqCst)
    }

    /// Accepted range
    pub fn range(&self) -> (u32, u32) {
        (self.min, self.max)
    }
}

/// Result of [`FrameSource::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The device was open and has been released
    Stopped,
    /// The device was not open; nothing happened
    AlreadyStopped,
}

#[derive(Debug, Clone, Copy)]
struct EncodeSettings {
    jpeg_quality: u8,
    output_width: u32,
    crop_base: u32,
}

/// Captures frames, applies zoom, encodes and publishes them
pub struct FrameSource {
    camera: Arc<dyn FrameCapture>,
    buffer: Arc<FrameBuffer>,
    zoom: ZoomControl,
    settings: EncodeSettings,
    started: AtomicBool,
    sequence: AtomicU64,
}

impl FrameSource {
    /// Create a frame source publishing into `buffer`
    pub fn new(camera: Arc<dyn FrameCapture>, buffer: Arc<FrameBuffer>, config: &VideoConfig) -> Self {
        Self {
            camera,
            buffer,
            zoom: ZoomControl::new(config.zoom_initial, config.zoom_min, config.zoom_max),
            settings: EncodeSettings {
                jpeg_quality: config.jpeg_quality.clamp(1, 100),
                output_width: config.output_width.max(1),
                crop_base: config.zoom_crop_base,
            },
            started: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    /// Open the capture device
    ///
    /// Fails with `DeviceUnavailable` if the source is already started or the device cannot
    /// be opened.
    pub async fn start(&self) -> RigResult<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RigError::DeviceUnavailable(
                "capture device is already open".to_string(),
            ));
        }

        if let Err(e) = self.camera.open().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(RigError::DeviceUnavailable(e.to_string()));
        }

        let (width, height) = self.camera.resolution();
        info!(width, height, "Frame source started");
        Ok(())
    }

    /// Release the capture device; a second call reports `AlreadyStopped`
    pub async fn stop(&self) -> RigResult<StopOutcome> {
        if !self.started.swap(false, Ordering::SeqCst) {
            debug!("Frame source already stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }

        self.camera
            .release()
            .await
            .map_err(|e| RigError::DeviceUnavailable(e.to_string()))?;
        info!("Frame source stopped");
        Ok(StopOutcome::Stopped)
    }

    /// Whether the device is open
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Grab a raw frame with the current zoom applied
    pub async fn read_frame(&self) -> RigResult<RgbImage> {
        if !self.is_started() {
            return Err(RigError::NoFrame);
        }

        let raw = self
            .camera
            .capture()
            .await
            .map_err(|e| RigError::DeviceUnavailable(e.to_string()))?
            .ok_or(RigError::NoFrame)?;

        Ok(self.apply_zoom(&raw))
    }

    /// Update the digital zoom level; returns the clamped level in effect
    pub fn set_zoom(&self, level: i64) -> u32 {
        self.zoom.set(level)
    }

    /// Handle sharing this source's zoom level
    pub fn zoom_control(&self) -> ZoomControl {
        self.zoom.clone()
    }

    /// Crop window for the given frame size at the current zoom level
    pub fn current_crop(&self, frame_width: u32, frame_height: u32) -> CropWindow {
        crop_window(self.settings.crop_base, self.zoom.level(), frame_width, frame_height)
    }

    fn apply_zoom(&self, frame: &RgbImage) -> RgbImage {
        let (width, height) = frame.dimensions();
        let window = self.current_crop(width, height);
        let cropped = imageops::crop_imm(frame, window.x, window.y, window.width, window.height)
            .to_image();

        let out_width = self.settings.output_width;
        let out_height = scaled_height(window.width, window.height, out_width);
        if (out_width, out_height) == cropped.dimensions() {
            return cropped;
        }
        imageops::resize(&cropped, out_width, out_height, FilterType::Triangle)
    }

    /// Encode a frame as JPEG and wrap it in base64 text
    pub fn encode(&self, frame: &RgbImage) -> RigResult<Bytes> {
        encode_frame(frame, self.settings.jpeg_quality)
    }

    /// Capture, encode and publish one frame
    pub async fn capture_once(&self) -> RigResult<EncodedFrame> {
        let frame = self.read_frame().await?;
        let quality = self.settings.jpeg_quality;
        let payload = tokio::task::spawn_blocking(move || encode_frame(&frame, quality))
            .await
            .map_err(|e| RigError::Encode(e.to_string()))??;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let encoded = EncodedFrame::new(sequence, payload);
        if self.buffer.publish(encoded.clone()).is_some() {
            debug!(sequence, "Frame buffer full, dropped oldest frame");
        }
        Ok(encoded)
    }

    /// Run the capture loop until the source is stopped
    pub async fn run(self: Arc<Self>, capture_interval: Duration) {
        let mut ticker = interval(capture_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.is_started() {
            ticker.tick().await;
            match self.capture_once().await {
                Ok(_) => {}
                Err(RigError::NoFrame) => debug!("No frame found"),
                Err(e) => warn!(error = %e, "Frame capture failed"),
            }
        }
        debug!("Capture loop exited");
    }

    /// Spawn the capture loop on the runtime
    pub fn spawn(self: Arc<Self>, capture_interval: Duration) -> JoinHandle<()> {
        tokio::spawn(self.run(capture_interval))
    }
}

fn scaled_height(width: u32, height: u32, out_width: u32) -> u32 {
    if width == 0 {
        return 1;
    }
    let scaled = u64::from(height) * u64::from(out_width) / u64::from(width);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

fn encode_frame(frame: &RgbImage, quality: u8) -> RigResult<Bytes> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(frame)?;
    let text = base64::engine::general_purpose::STANDARD.encode(&jpeg);
    Ok(Bytes::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCamera;

    fn source(camera: MockCamera) -> (Arc<FrameSource>, Arc<FrameBuffer>) {
        let config = VideoConfig {
            output_width: 100,
            ..VideoConfig::default()
        };
        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity));
        let source = FrameSource::new(Arc::new(camera), buffer.clone(), &config);
        (Arc::new(source), buffer)
    }

    #[test]
    fn test_crop_window_shrinks_with_zoom() {
        let mut previous = crop_window(200, 0, 640, 480);
        assert_eq!(previous.area(), 640 * 480);

        for level in 1..=250 {
            let window = crop_window(200, level, 640, 480);
            assert!(window.width <= previous.width, "level {level}");
            assert!(window.height <= previous.height, "level {level}");
            assert!(window.x + window.width <= 640);
            assert!(window.y + window.height <= 480);
            previous = window;
        }
        assert_eq!(previous.width, 2);
    }

    #[test]
    fn test_crop_window_is_centered() {
        let window = crop_window(200, 100, 640, 480);
        assert_eq!(window.width, 200);
        assert_eq!(window, CropWindow { x: 220, y: 140, width: 200, height: 200 });
    }

    #[test]
    fn test_zoom_control_clamps() {
        let zoom = ZoomControl::new(0, 0, 199);
        assert_eq!(zoom.set(42), 42);
        assert_eq!(zoom.set(500), 199);
        assert_eq!(zoom.set(-3), 0);
        assert_eq!(zoom.level(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_device_unavailable() {
        let (source, _) = source(MockCamera::new(64, 48));
        source.start().await.unwrap();
        assert!(matches!(
            source.start().await,
            Err(RigError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_start_without_device_fails() {
        let (source, _) = source(MockCamera::unavailable(64, 48));
        assert!(matches!(
            source.start().await,
            Err(RigError::DeviceUnavailable(_))
        ));
        assert!(!source.is_started());
    }

    #[tokio::test]
    async fn test_stop_twice_reports_already_stopped() {
        let (source, _) = source(MockCamera::new(64, 48));
        source.start().await.unwrap();
        assert_eq!(source.stop().await.unwrap(), StopOutcome::Stopped);
        assert_eq!(source.stop().await.unwrap(), StopOutcome::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_read_frame_before_start_is_no_frame() {
        let (source, _) = source(MockCamera::new(64, 48));
        assert!(matches!(source.read_frame().await, Err(RigError::NoFrame)));
    }

    #[tokio::test]
    async fn test_read_frame_resizes_to_output_width() {
        let (source, _) = source(MockCamera::new(640, 480));
        source.start().await.unwrap();

        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (100, 75));

        // Square crop once zoomed in
        source.set_zoom(50);
        let frame = source.read_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (100, 100));
    }

    #[tokio::test]
    async fn test_capture_once_publishes_base64_jpeg() {
        let (source, buffer) = source(MockCamera::new(64, 48));
        source.start().await.unwrap();

        let frame = source.capture_once().await.unwrap();
        assert_eq!(buffer.len(), 1);

        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(&frame.payload)
            .unwrap();
        // JPEG SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_run_loop_stops_with_source() {
        let (source, buffer) = source(MockCamera::new(64, 48));
        source.start().await.unwrap();
        let handle = source.clone().spawn(Duration::from_millis(5));

        let mut subscriber = buffer.subscribe();
        assert!(subscriber.next_frame().await.is_some());

        source.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(buffer.len() <= buffer.capacity());
    }
}
