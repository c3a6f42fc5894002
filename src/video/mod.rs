//! Video pipeline
//!
//! [`FrameSource`] captures and encodes frames; [`FrameBuffer`] holds the most recent ones
//! and fans the newest out to every client worker.

pub mod frame_buffer;
pub mod source;

pub use frame_buffer::{EncodedFrame, FrameBuffer, FrameSubscriber};
pub use source::{crop_window, CropWindow, FrameSource, StopOutcome, ZoomControl};
