//! Command admission and actuator coordination
//!
//! - [`authority`]: grant check and verb dispatch for client commands
//! - [`coordinator`]: the serialized, cancellable executor for stage, turret and servo moves
//! - [`requests`]: request construction from configuration and tracked positions

pub mod authority;
pub mod command;
pub mod coordinator;
pub mod messages;
pub mod requests;

pub use authority::{CommandAuthority, CommandInbox, CommandOutcome};
pub use command::{Command, Verb};
pub use coordinator::{ActuatorCoordinator, ActuatorDevices, ActuatorHandle, RequestQueue};
pub use messages::{
    ActuatorEvent, ActuatorGroup, ActuatorRequest, InboundCommand, LensChange, LensIndex,
    MotionOutcome, MotionTarget, PositionState, ServoAxis, ServoMotion, ServoMove, StageMove,
    StageTarget, StopReason,
};
pub use requests::{initial_positions, RequestFactory};
