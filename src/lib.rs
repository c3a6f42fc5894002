//! # Rig Control Library
//!
//! Remote camera-rig controller: one station (camera, vertical stage, lens turret and
//! pan/tilt/brightness servos) watched by many TCP clients, of which only one at a time holds
//! control.
//!
//! ## Crate Structure
//!
//! - **`config`**: `RigConfig`, loaded from TOML and `RIG_` environment variables with figment.
//! - **`error`**: the `RigError` enum shared by every module.
//! - **`logging`**: tracing subscriber setup (pretty, compact or JSON output).
//! - **`hardware`**: capability traits for steppers, servos and cameras, plus simulated devices.
//! - **`video`**: frame capture, digital zoom, JPEG/base64 encoding and the drop-oldest
//!   frame buffer.
//! - **`network`**: the length-prefixed wire protocol, the client registry with its control
//!   grant, the frame distribution server and a wire client.
//! - **`control`**: command parsing and admission, and the serialized actuator coordinator.
//! - **`rig`**: assembles all of the above into a running `Station`.
//! - **`console`**: the operator's line-oriented control surface.

pub mod config;
pub mod console;
pub mod control;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod network;
pub mod rig;
pub mod video;

pub use error::{RigError, RigResult};
pub use rig::{Station, StationHardware};
