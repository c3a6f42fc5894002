//! Custom error types for the rig controller.
//!
//! `RigError` is the single error enum for the library. Each variant maps onto one failure
//! kind of the station:
//!
//! - **`AddressInUse`**: the listener could not bind after exhausting its retries. This is the
//!   only failure that is fatal to the frame distribution server.
//! - **`ClientHandshakeRejected`**: a connecting client announced a duplicate or empty name.
//!   The connection is dropped without a reply.
//! - **`ClientDisconnected`**: a socket error or EOF on a live client. Only that client's
//!   worker ends; the registry evicts it and clears the grant if it held control.
//! - **`CommandUnauthorized`** / **`CommandUnsupported`**: a command was rejected by the
//!   command authority. Nothing is sent back to the sender.
//! - **`HardwareUnavailable`**: an actuator or servo call failed. The coordinator logs it and
//!   keeps the last good position.
//! - **`ActuatorBacklogFull`**: too many actuator requests are waiting for the slot. The
//!   request is dropped.
//! - **`DeviceUnavailable`** / **`NoFrame`**: the capture device could not be opened or did not
//!   deliver a frame.
//!
//! Reaching a travel bound is not an error; see `control::StopReason::BoundsReached`.

use std::net::SocketAddr;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Errors produced by the rig controller.
#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unable to bind {address} after {attempts} attempts")]
    AddressInUse { address: String, attempts: u32 },

    #[error("Handshake rejected for client '{name}' from {address}")]
    ClientHandshakeRejected { name: String, address: SocketAddr },

    #[error("Client '{0}' disconnected")]
    ClientDisconnected(String),

    #[error("Client '{sender}' does not hold control")]
    CommandUnauthorized { sender: String },

    #[error("Unsupported command: {0}")]
    CommandUnsupported(String),

    #[error("Malformed command argument: {0}")]
    CommandMalformed(String),

    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("No frame available")]
    NoFrame,

    #[error("Frame of {0} bytes exceeds the 8-digit length prefix")]
    FrameTooLarge(usize),

    #[error("Malformed frame header: {0}")]
    MalformedFrame(String),

    #[error("Frame encoding failed: {0}")]
    Encode(String),

    #[error("Actuator coordinator is not running")]
    CoordinatorClosed,

    #[error("Actuator backlog is full")]
    ActuatorBacklogFull,
}

impl From<figment::Error> for RigError {
    fn from(value: figment::Error) -> Self {
        RigError::Config(Box::new(value))
    }
}

impl From<image::ImageError> for RigError {
    fn from(value: image::ImageError) -> Self {
        RigError::Encode(value.to_string())
    }
}

impl RigError {
    /// Whether the error ends the affected client or request only, leaving the rest of the
    /// station running.
    pub fn is_isolated(&self) -> bool {
        !matches!(
            self,
            RigError::AddressInUse { .. } | RigError::Config(_) | RigError::Configuration(_)
        )
    }
}
