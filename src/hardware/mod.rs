//! Hardware Abstractions
//!
//! Capability traits consumed by the station core, plus simulated devices.

pub mod capabilities;
pub mod mock;

pub use capabilities::{Actuator, Direction, FrameCapture, Servo};
