//! Command authority
//!
//! Admits commands only from the client holding the control grant and turns them into zoom
//! changes or actuator requests. Rejections are logged and never reported to the sender.
//!
//! Client workers do not call the authority directly: they push [`InboundCommand`]s into a
//! bounded inbox drained by one task, so commands from one client keep their socket order.
//! Movement requests leave through a [`RequestQueue`] and never hold up the inbox, which
//! lets a zoom change apply at once while the actuator slot is busy.

use crate::control::command::{Command, Verb};
use crate::control::coordinator::{ActuatorHandle, RequestQueue};
use crate::control::messages::{ActuatorRequest, InboundCommand, ServoAxis, ServoMotion};
use crate::control::requests::RequestFactory;
use crate::error::{RigError, RigResult};
use crate::hardware::Direction;
use crate::network::registry::ClientRegistry;
use crate::video::ZoomControl;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sending half of the command inbox, cloned into every client worker
pub type CommandInbox = mpsc::Sender<InboundCommand>;

/// Effect of an admitted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Digital zoom changed to this (clamped) level
    ZoomSet(u32),
    /// Brightness servo asked to move to this (clamped) value
    BrightnessSet(i64),
    /// Movement request queued for the actuator coordinator
    Queued(ActuatorRequest),
}

/// Grant check plus verb dispatch
pub struct CommandAuthority {
    registry: ClientRegistry,
    actuators: ActuatorHandle,
    queue: RequestQueue,
    requests: RequestFactory,
    zoom: ZoomControl,
}

impl CommandAuthority {
    pub fn new(
        registry: ClientRegistry,
        actuators: ActuatorHandle,
        queue: RequestQueue,
        requests: RequestFactory,
        zoom: ZoomControl,
    ) -> Self {
        Self {
            registry,
            actuators,
            queue,
            requests,
            zoom,
        }
    }

    /// Admit and execute a command from `sender`
    ///
    /// Fails with `CommandUnauthorized` without touching any state unless `sender` holds
    /// the grant; unknown verbs fail with `CommandUnsupported`.
    pub async fn submit_command(&self, sender: &str, text: &str) -> RigResult<CommandOutcome> {
        if !self.registry.is_grantee(sender).await {
            return Err(RigError::CommandUnauthorized {
                sender: sender.to_string(),
            });
        }

        let command = Command::parse(sender, text)?;
        self.dispatch(command)
    }

    /// Execute an already admitted command
    ///
    /// Never waits on the actuator slot.
    pub fn dispatch(&self, command: Command) -> RigResult<CommandOutcome> {
        let positions = self.actuators.positions();
        let request = match command.verb {
            Verb::Zoom => {
                let level = self.zoom.set(command.argument.unwrap_or_default());
                debug!(sender = %command.sender, level, "Zoom set");
                return Ok(CommandOutcome::ZoomSet(level));
            }
            Verb::Brightness => {
                let value = self
                    .requests
                    .clamp_brightness(command.argument.unwrap_or_default());
                self.queue
                    .enqueue(self.requests.brightness(value, &positions))?;
                return Ok(CommandOutcome::BrightnessSet(value));
            }
            Verb::Forward => {
                self.requests
                    .servo(ServoAxis::Tilt, ServoMotion::Increase, &positions)
            }
            Verb::Backward => {
                self.requests
                    .servo(ServoAxis::Tilt, ServoMotion::Decrease, &positions)
            }
            Verb::Left => self
                .requests
                .servo(ServoAxis::Pan, ServoMotion::Increase, &positions),
            Verb::Right => self
                .requests
                .servo(ServoAxis::Pan, ServoMotion::Decrease, &positions),
            Verb::Up => self.requests.stage_nudge(Direction::Up, &positions),
            Verb::Down => self.requests.stage_nudge(Direction::Down, &positions),
        };

        self.queue.enqueue(request)?;
        Ok(CommandOutcome::Queued(request))
    }

    /// Start the task draining the command inbox
    pub fn spawn_inbox(self: Arc<Self>, capacity: usize) -> (CommandInbox, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(self.run_inbox(rx));
        (tx, handle)
    }

    async fn run_inbox(self: Arc<Self>, mut rx: mpsc::Receiver<InboundCommand>) {
        info!("Command inbox started");

        while let Some(inbound) = rx.recv().await {
            match self.submit_command(&inbound.sender, &inbound.text).await {
                Ok(outcome) => {
                    debug!(sender = %inbound.sender, ?outcome, "Command admitted");
                }
                Err(RigError::CommandUnauthorized { sender }) => {
                    info!(%sender, command = %inbound.text, "Dropped command from client without control");
                }
                Err(e @ (RigError::CommandUnsupported(_) | RigError::CommandMalformed(_))) => {
                    warn!(sender = %inbound.sender, error = %e, "Ignored command");
                }
                Err(RigError::ActuatorBacklogFull) => {
                    warn!(sender = %inbound.sender, command = %inbound.text, "Actuator backlog full, dropping command");
                }
                Err(e) => {
                    error!(sender = %inbound.sender, error = %e, "Command failed");
                }
            }
        }

        info!("Command inbox closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RigConfig;
    use crate::control::coordinator::{ActuatorCoordinator, ActuatorDevices};
    use crate::control::messages::{ActuatorGroup, PositionState};
    use crate::control::requests::initial_positions;
    use crate::hardware::mock::{MockServo, MockStepper};
    use std::time::Duration;
    use tokio::time::timeout;

    fn authority(registry: ClientRegistry) -> (CommandAuthority, ActuatorHandle, ZoomControl) {
        authority_with_stage(registry, MockStepper::new())
    }

    fn authority_with_stage(
        registry: ClientRegistry,
        stage: MockStepper,
    ) -> (CommandAuthority, ActuatorHandle, ZoomControl) {
        let config = RigConfig::default();
        let devices = ActuatorDevices {
            stage: Arc::new(stage),
            turret: Arc::new(MockStepper::new()),
            pan: Arc::new(MockServo::new()),
            tilt: Arc::new(MockServo::new()),
            brightness: Arc::new(MockServo::new()),
        };
        let (coordinator, handle) =
            ActuatorCoordinator::new(devices, initial_positions(&config), 256);
        coordinator.spawn();
        let (queue, _) = handle.spawn_queue(16);

        let zoom = ZoomControl::new(0, 0, 199);
        let authority = CommandAuthority::new(
            registry,
            handle.clone(),
            queue,
            RequestFactory::new(&config),
            zoom.clone(),
        );
        (authority, handle, zoom)
    }

    #[tokio::test]
    async fn test_non_grantee_is_rejected_without_side_effects() {
        let registry = ClientRegistry::new();
        registry.grant("scope-1").await;
        let (authority, handle, zoom) = authority(registry);
        let before: PositionState = handle.positions();

        for text in ["zoom:50", "up", "left", "brightness:30", "jump"] {
            assert!(matches!(
                authority.submit_command("scope-2", text).await,
                Err(RigError::CommandUnauthorized { .. })
            ));
        }

        assert_eq!(zoom.level(), 0);
        assert_eq!(handle.positions(), before);
    }

    #[tokio::test]
    async fn test_no_grantee_rejects_everyone() {
        let (authority, _, _) = authority(ClientRegistry::new());
        assert!(authority.submit_command("scope-1", "up").await.is_err());
    }

    #[tokio::test]
    async fn test_grantee_sets_zoom() {
        let registry = ClientRegistry::new();
        registry.grant("scope-1").await;
        let (authority, _, zoom) = authority(registry);

        let outcome = authority.submit_command("scope-1", "zoom:250").await.unwrap();
        assert_eq!(outcome, CommandOutcome::ZoomSet(199));
        assert_eq!(zoom.level(), 199);
    }

    #[tokio::test]
    async fn test_grantee_moves_stage() {
        let registry = ClientRegistry::new();
        registry.grant("scope-1").await;
        let (authority, handle, _) = authority(registry);
        let mut events = handle.subscribe();

        let outcome = authority.submit_command("scope-1", "up").await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Queued(ActuatorRequest::Stage(_))));

        loop {
            let event = events.recv().await.unwrap();
            if event.is_finished() {
                assert_eq!(event.position(), 1);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_verb_is_unsupported() {
        let registry = ClientRegistry::new();
        registry.grant("scope-1").await;
        let (authority, _, _) = authority(registry);
        assert!(matches!(
            authority.submit_command("scope-1", "jump").await,
            Err(RigError::CommandUnsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_zoom_applies_while_actuator_slot_is_occupied() {
        let registry = ClientRegistry::new();
        registry.grant("scope-1").await;
        let (authority, handle, zoom) =
            authority_with_stage(registry, MockStepper::with_settle(Duration::from_millis(10)));
        let requests = RequestFactory::new(&RigConfig::default());

        // One long move running and a second one waiting in the slot
        handle
            .submit(requests.stage_to(150, &handle.positions()))
            .await
            .unwrap();
        let mut positions = handle.watch_positions();
        positions.wait_for(|p| p.stage >= 1).await.unwrap();
        handle
            .submit(requests.stage_to(10, &handle.positions()))
            .await
            .unwrap();

        let (inbox, _) = Arc::new(authority).spawn_inbox(8);
        for text in ["up", "zoom:50"] {
            inbox
                .send(InboundCommand::new("scope-1", text))
                .await
                .unwrap();
        }

        timeout(Duration::from_millis(500), async {
            while zoom.level() != 50 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(handle.is_running(ActuatorGroup::Stage));
    }
}
