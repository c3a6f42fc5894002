//! Networking: wire protocol, client registry, frame distribution server and client

pub mod client;
pub mod protocol;
pub mod registry;
pub mod server_actor;

pub use client::{CommandWriter, FrameClient, FrameReader};
pub use protocol::{encode_frame_header, read_frame, write_frame, MAX_FRAME_LEN};
pub use registry::{Client, ClientRegistry, RemovedClient};
pub use server_actor::{FrameDistributionServer, ServerEvent};
