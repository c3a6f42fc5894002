//! Station assembly
//!
//! Wires the frame pipeline, the client registry, the command authority, the actuator
//! coordinator and the frame distribution server into one [`Station`].
//!
//! ```text
//! FrameSource ──> FrameBuffer ──> client workers ──> sockets
//!                                     │
//!                                     └──> command inbox ──> CommandAuthority ──┐
//!                                                                                  ├──> RequestQueue ──> ActuatorCoordinator
//!                                                      operator console ───────────┘
//! ```

use crate::config::RigConfig;
use crate::control::{
    initial_positions, ActuatorCoordinator, ActuatorDevices, ActuatorHandle, CommandAuthority,
    PositionState, RequestFactory, RequestQueue,
};
use crate::error::{RigError, RigResult};
use crate::hardware::mock::{MockCamera, MockServo, MockStepper};
use crate::hardware::FrameCapture;
use crate::network::{Client, ClientRegistry, FrameDistributionServer};
use crate::video::{FrameBuffer, FrameSource};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Devices the station drives
pub struct StationHardware {
    pub actuators: ActuatorDevices,
    pub camera: Arc<dyn FrameCapture>,
}

impl StationHardware {
    /// Simulated rig built from the mock devices
    pub fn simulated(config: &RigConfig) -> Self {
        let settle = Duration::from_millis(config.actuators.step_settle_ms);
        Self {
            actuators: ActuatorDevices {
                stage: Arc::new(MockStepper::with_settle(settle)),
                turret: Arc::new(MockStepper::with_settle(settle)),
                pan: Arc::new(MockServo::new()),
                tilt: Arc::new(MockServo::new()),
                brightness: Arc::new(MockServo::new()),
            },
            camera: Arc::new(MockCamera::new(
                config.video.sensor_width,
                config.video.sensor_height,
            )),
        }
    }
}

/// Snapshot reported by the operator console
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub listening: Option<SocketAddr>,
    pub grantee: Option<String>,
    pub clients: Vec<Client>,
    pub positions: PositionState,
    pub zoom: u32,
    pub camera_started: bool,
    pub frames_buffered: usize,
    pub frames_dropped: u64,
}

/// A fully wired station
pub struct Station {
    config: RigConfig,
    registry: ClientRegistry,
    frames: Arc<FrameBuffer>,
    source: Arc<FrameSource>,
    actuators: ActuatorHandle,
    queue: RequestQueue,
    requests: RequestFactory,
    authority: Arc<CommandAuthority>,
    server: FrameDistributionServer,
    tasks: Vec<JoinHandle<()>>,
}

impl Station {
    /// Assemble the station and spawn its coordinator, request queue and command inbox
    ///
    /// Must be called inside a Tokio runtime. Nothing listens until [`Station::start`].
    pub fn new(config: RigConfig, hardware: StationHardware) -> Self {
        let registry = ClientRegistry::with_grantee(config.control.initial_grantee.clone());
        let frames = Arc::new(FrameBuffer::new(config.video.buffer_capacity));
        let source = Arc::new(FrameSource::new(
            hardware.camera,
            frames.clone(),
            &config.video,
        ));

        let (coordinator, actuators) = ActuatorCoordinator::new(
            hardware.actuators,
            initial_positions(&config),
            config.actuators.event_capacity,
        );
        let (queue, queue_task) = actuators.spawn_queue(config.control.inbox_capacity);
        let requests = RequestFactory::new(&config);
        let authority = Arc::new(CommandAuthority::new(
            registry.clone(),
            actuators.clone(),
            queue.clone(),
            requests.clone(),
            source.zoom_control(),
        ));

        let mut tasks = vec![coordinator.spawn(), queue_task];
        let (inbox, inbox_task) = authority.clone().spawn_inbox(config.control.inbox_capacity);
        tasks.push(inbox_task);

        let server = FrameDistributionServer::new(
            config.server.clone(),
            registry.clone(),
            frames.clone(),
            inbox,
        );

        Self {
            config,
            registry,
            frames,
            source,
            actuators,
            queue,
            requests,
            authority,
            server,
            tasks,
        }
    }

    /// Station running on simulated hardware
    pub fn simulated(config: RigConfig) -> Self {
        let hardware = StationHardware::simulated(&config);
        Self::new(config, hardware)
    }

    /// Open the camera, start the capture loop and listen for clients
    ///
    /// A camera that cannot be opened is logged and the station serves controls without
    /// video. A bind failure is returned.
    pub async fn start(&mut self) -> RigResult<SocketAddr> {
        match self.source.start().await {
            Ok(()) => {
                let capture = self
                    .source
                    .clone()
                    .spawn(self.config.video.capture_interval());
                self.tasks.push(capture);
            }
            Err(e @ RigError::DeviceUnavailable(_)) => {
                warn!(error = %e, "Serving without video");
            }
            Err(e) => return Err(e),
        }

        let address = self.config.server.bind_address.clone();
        let local_addr = self.server.start(&address).await?;
        info!(station = %self.config.application.name, address = %local_addr, "Station started");
        Ok(local_addr)
    }

    /// Stop the server and the camera
    pub async fn shutdown(&mut self) {
        self.server.stop().await;
        if let Err(e) = self.source.stop().await {
            warn!(error = %e, "Camera release failed");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Station stopped");
    }

    pub async fn status(&self) -> StationStatus {
        StationStatus {
            listening: self.server.local_addr(),
            grantee: self.registry.current_grantee().await,
            clients: self.registry.clients().await,
            positions: self.actuators.positions(),
            zoom: self.source.zoom_control().level(),
            camera_started: self.source.is_started(),
            frames_buffered: self.frames.len(),
            frames_dropped: self.frames.evicted_count(),
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    pub fn source(&self) -> &Arc<FrameSource> {
        &self.source
    }

    pub fn actuators(&self) -> &ActuatorHandle {
        &self.actuators
    }

    pub fn requests(&self) -> &RequestFactory {
        &self.requests
    }

    /// Non-blocking path into the actuator slot
    pub fn request_queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Grant-checked command entry point, as used by client workers
    pub fn authority(&self) -> &Arc<CommandAuthority> {
        &self.authority
    }

    pub fn server(&self) -> &FrameDistributionServer {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut FrameDistributionServer {
        &mut self.server
    }
}
