//! Atomic Hardware Capabilities
//!
//! The rig is built from three kinds of device, each described by one small trait:
//!
//! - A stepper driving the stage or the lens turret implements [`Actuator`]
//! - A hobby servo (pan, tilt, LED diaphragm) implements [`Servo`]
//! - A camera implements [`FrameCapture`]
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! The actuator coordinator only ever talks to these traits, so physical GPIO/PWM drivers
//! and the simulated devices in [`crate::hardware::mock`] are interchangeable.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn jog<A: Actuator>(stepper: &A, steps: u32) -> Result<()> {
//!     for _ in 0..steps {
//!         stepper.move_step(Direction::Up).await?;
//!     }
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Direction of a single stepper increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards higher positions
    Up,
    /// Towards lower positions
    Down,
}

impl Direction {
    /// Direction that moves `from` towards `to`, or `None` when they are equal
    pub fn towards(from: i64, to: i64) -> Option<Self> {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Some(Direction::Up),
            std::cmp::Ordering::Less => Some(Direction::Down),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Signed position change of one increment
    pub fn delta(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

/// Capability: Stepper Motion
///
/// Devices that move one fixed increment per call (stage lead screw, turret wheel).
///
/// # Contract
/// - `move_step` returns once the increment has settled
/// - The device keeps no notion of absolute position; the coordinator tracks it
/// - A failed call must leave the device where it was
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Move one increment in `direction`
    ///
    /// # Returns
    /// - Ok(()) once the increment completed
    /// - Err if the driver or the hardware is unavailable
    async fn move_step(&self, direction: Direction) -> Result<()>;
}

/// Capability: Angular Positioning
///
/// Hobby servos driven by PWM. Moves are absolute and not interruptible.
#[async_trait]
pub trait Servo: Send + Sync {
    /// Drive the servo to `angle` degrees
    ///
    /// # Returns
    /// - Ok(()) once the pulse train was issued
    /// - Err if the PWM driver is unavailable
    async fn set_angle(&self, angle: i64) -> Result<()>;
}

/// Capability: Raw Frame Capture
///
/// Devices that deliver uncompressed RGB frames on demand (USB and CSI cameras).
///
/// # Contract
/// - `open()` must be called before `capture()`
/// - `capture()` returns `Ok(None)` when the device is open but had no frame ready
/// - `release()` is idempotent
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Open the capture device
    async fn open(&self) -> Result<()>;

    /// Grab the next raw frame
    async fn capture(&self) -> Result<Option<RgbImage>>;

    /// Release the capture device
    async fn release(&self) -> Result<()>;

    /// Sensor resolution (width, height) in pixels
    fn resolution(&self) -> (u32, u32);
}
