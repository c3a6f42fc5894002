//! Mock Hardware Implementations
//!
//! Simulated devices for running the station and its tests without a physical rig.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockStepper` - Simulated stepper with settle time, step counting and fault injection
//! - `MockServo` - Simulated servo recording every commanded angle
//! - `MockCamera` - Simulated camera producing a moving RGB test pattern

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::trace;

use crate::hardware::capabilities::{Actuator, Direction, FrameCapture, Servo};

type StepHook = Box<dyn Fn(u64) + Send + Sync>;

// =============================================================================
// MockStepper - Simulated Stepper Motor
// =============================================================================

/// Mock stepper motor
///
/// Simulates a stepper with:
/// - Configurable settle time per increment
/// - Net position and total step counters
/// - Optional fault injection (every call fails while `fail` is set)
/// - Optional hook called after each completed step with the step count
///
/// # Example
///
/// ```rust,ignore
/// let stepper = MockStepper::new();
/// stepper.move_step(Direction::Up).await?;
/// assert_eq!(stepper.steps_taken(), 1);
/// ```
#[derive(Clone)]
pub struct MockStepper {
    inner: Arc<StepperState>,
}

struct StepperState {
    settle: Duration,
    steps: AtomicU64,
    net_position: Mutex<i64>,
    fail: AtomicBool,
    on_step: Mutex<Option<StepHook>>,
}

impl MockStepper {
    /// Create a stepper that settles instantly
    pub fn new() -> Self {
        Self::with_settle(Duration::ZERO)
    }

    /// Create a stepper with a simulated settle time per increment
    pub fn with_settle(settle: Duration) -> Self {
        Self {
            inner: Arc::new(StepperState {
                settle,
                steps: AtomicU64::new(0),
                net_position: Mutex::new(0),
                fail: AtomicBool::new(false),
                on_step: Mutex::new(None),
            }),
        }
    }

    /// Total increments completed since creation
    pub fn steps_taken(&self) -> u64 {
        self.inner.steps.load(Ordering::SeqCst)
    }

    /// Net displacement in increments (up minus down)
    pub fn net_position(&self) -> i64 {
        self.inner.net_position.lock().map(|p| *p).unwrap_or_default()
    }

    /// Make every following call fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    /// Install a hook invoked after each completed step with the running step count
    pub fn on_step<F>(&self, hook: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.inner.on_step.lock() {
            *slot = Some(Box::new(hook));
        }
    }
}

impl Default for MockStepper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Actuator for MockStepper {
    async fn move_step(&self, direction: Direction) -> Result<()> {
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("MockStepper: driver not responding"));
        }

        if !self.inner.settle.is_zero() {
            sleep(self.inner.settle).await;
        }

        if let Ok(mut position) = self.inner.net_position.lock() {
            *position += direction.delta();
        }
        let count = self.inner.steps.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(count, ?direction, "MockStepper: step");

        if let Ok(hook) = self.inner.on_step.lock() {
            if let Some(hook) = hook.as_ref() {
                hook(count);
            }
        }
        Ok(())
    }
}

// =============================================================================
// MockServo - Simulated Servo
// =============================================================================

/// Mock servo recording commanded angles
#[derive(Clone, Default)]
pub struct MockServo {
    angles: Arc<Mutex<Vec<i64>>>,
    fail: Arc<AtomicBool>,
}

impl MockServo {
    /// Create a servo with no recorded moves
    pub fn new() -> Self {
        Self::default()
    }

    /// Every angle commanded so far, oldest first
    pub fn angles(&self) -> Vec<i64> {
        self.angles.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Last commanded angle
    pub fn last_angle(&self) -> Option<i64> {
        self.angles().last().copied()
    }

    /// Make every following call fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Servo for MockServo {
    async fn set_angle(&self, angle: i64) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("MockServo: PWM driver not responding"));
        }
        if let Ok(mut angles) = self.angles.lock() {
            angles.push(angle);
        }
        trace!(angle, "MockServo: set angle");
        Ok(())
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera producing a diagonal gradient that shifts every frame
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new(640, 480);
/// camera.open().await?;
/// let frame = camera.capture().await?.unwrap();
/// assert_eq!(frame.dimensions(), (640, 480));
/// ```
pub struct MockCamera {
    resolution: (u32, u32),
    open: AtomicBool,
    frame_count: AtomicU64,
    unavailable: AtomicBool,
}

impl MockCamera {
    /// Create a mock camera with the given resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            open: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Create a camera whose `open()` always fails
    pub fn unavailable(width: u32, height: u32) -> Self {
        let camera = Self::new(width, height);
        camera.unavailable.store(true, Ordering::SeqCst);
        camera
    }

    /// Frames produced since creation
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Whether the device is currently open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

#[async_trait]
impl FrameCapture for MockCamera {
    async fn open(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("MockCamera: no device at index 0");
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture(&self) -> Result<Option<RgbImage>> {
        if !self.open.load(Ordering::SeqCst) {
            anyhow::bail!("MockCamera: capture on a closed device");
        }

        let frame_num = self.frame_count.fetch_add(1, Ordering::SeqCst);
        let (width, height) = self.resolution;
        let shift = (frame_num % 256) as u32;
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        });
        Ok(Some(image))
    }

    async fn release(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_stepper_counts_steps() {
        let stepper = MockStepper::new();

        stepper.move_step(Direction::Up).await.unwrap();
        stepper.move_step(Direction::Up).await.unwrap();
        stepper.move_step(Direction::Down).await.unwrap();

        assert_eq!(stepper.steps_taken(), 3);
        assert_eq!(stepper.net_position(), 1);
    }

    #[tokio::test]
    async fn test_mock_stepper_fault_injection() {
        let stepper = MockStepper::new();
        stepper.set_failing(true);
        assert!(stepper.move_step(Direction::Up).await.is_err());
        assert_eq!(stepper.steps_taken(), 0);

        stepper.set_failing(false);
        assert!(stepper.move_step(Direction::Up).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_stepper_hook() {
        let stepper = MockStepper::new();
        let seen = Arc::new(AtomicU64::new(0));
        let seen_hook = seen.clone();
        stepper.on_step(move |count| seen_hook.store(count, Ordering::SeqCst));

        stepper.move_step(Direction::Down).await.unwrap();
        stepper.move_step(Direction::Down).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mock_servo_records_angles() {
        let servo = MockServo::new();
        servo.set_angle(90).await.unwrap();
        servo.set_angle(100).await.unwrap();
        assert_eq!(servo.angles(), vec![90, 100]);
        assert_eq!(servo.last_angle(), Some(100));
    }

    #[tokio::test]
    async fn test_mock_camera_lifecycle() {
        let camera = MockCamera::new(64, 48);

        // Capture before open fails
        assert!(camera.capture().await.is_err());

        camera.open().await.unwrap();
        let frame = camera.capture().await.unwrap().unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert_eq!(camera.frame_count(), 1);

        camera.release().await.unwrap();
        camera.release().await.unwrap();
        assert!(!camera.is_open());
    }

    #[tokio::test]
    async fn test_mock_camera_unavailable() {
        let camera = MockCamera::unavailable(64, 48);
        assert!(camera.open().await.is_err());
    }
}
