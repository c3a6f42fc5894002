//! Message types for the command path and the actuator coordinator.
//!
//! # Message Flow
//!
//! ```text
//! Client worker          Command inbox task              Coordinator task
//! -------------          ------------------              ----------------
//! 1. InboundCommand  --> 2. grant check + parse
//!                        3. ActuatorRequest  -- slot --> 4. dequeue, raise run flag
//!                                                        5. step loop
//!                                        <-- events --   6. Started / Progress / Finished
//! ```
//!
//! # Channel Types
//!
//! - **mpsc, capacity 1**: the actuator request slot. A second submitter waits until the
//!   coordinator has dequeued the pending request.
//! - **broadcast**: progress and completion events for any number of observers.
//! - **watch**: the latest [`PositionState`], readable at any time without waiting.
//! - **oneshot**: optional completion reply for callers that want to await a motion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

use crate::hardware::Direction;

/// A raw message received from a client, tagged with its registered name
#[derive(Debug, Clone)]
pub struct InboundCommand {
    /// Registered display name of the sending client
    pub sender: String,
    /// Message text with liveness probes removed
    pub text: String,
    /// Time the message was read from the socket
    pub received_at: DateTime<Utc>,
}

impl InboundCommand {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// The three mutually exclusive actuator groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorGroup {
    /// Vertical focus/elevation stage
    Stage,
    /// Lens turret
    Turret,
    /// Pan, tilt and brightness servos
    Servo,
}

impl ActuatorGroup {
    pub const ALL: [ActuatorGroup; 3] = [Self::Stage, Self::Turret, Self::Servo];

    /// Parse a group name as typed on the operator console
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "stage" => Some(Self::Stage),
            "turret" | "lens" => Some(Self::Turret),
            "servo" | "servos" => Some(Self::Servo),
            _ => None,
        }
    }
}

impl fmt::Display for ActuatorGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stage => "stage",
            Self::Turret => "turret",
            Self::Servo => "servo",
        };
        f.write_str(name)
    }
}

/// Individual servo within the servo group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoAxis {
    Pan,
    Tilt,
    Brightness,
}

/// Lens turret index, always 0, 1 or 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LensIndex(u8);

impl LensIndex {
    /// Index of a lens stop; `None` outside 0..=2
    pub fn new(index: u8) -> Option<Self> {
        (index <= 2).then_some(Self(index))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Next index in the 0 → 1 → 2 → 0 cycle
    pub fn next(self) -> Self {
        Self((self.0 + 1) % 3)
    }

    /// Stepping direction of the transition to [`LensIndex::next`]
    pub fn transition_direction(self) -> Direction {
        if self.0 == 2 {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

impl fmt::Display for LensIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a stage move should end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTarget {
    /// A fixed stage position
    Absolute(i64),
    /// An offset from wherever the stage is when the move starts
    Relative(i64),
}

impl StageTarget {
    /// Goal position for a stage currently at `current`
    pub fn resolve(self, current: i64) -> i64 {
        match self {
            Self::Absolute(position) => position,
            Self::Relative(offset) => current.saturating_add(offset),
        }
    }
}

/// Move the stage to a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMove {
    pub target: StageTarget,
    pub current: i64,
    pub min: i64,
    pub max: i64,
}

/// Rotate the turret to the next lens stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LensChange {
    /// Index the turret is leaving
    pub lens: LensIndex,
    pub current: i64,
    /// Stepper position of lens 0, 1 and 2
    pub stops: [i64; 3],
}

impl LensChange {
    /// Stepper position of the lens being moved to
    pub fn target(&self) -> i64 {
        self.stops[usize::from(self.lens.next().value())]
    }
}

/// How a servo request changes the angle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoMotion {
    /// Current angle plus the step
    Increase,
    /// Current angle minus the step
    Decrease,
    /// Absolute angle (brightness slider)
    Set(i64),
}

/// Single atomic servo move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoMove {
    pub axis: ServoAxis,
    pub motion: ServoMotion,
    pub current: i64,
    pub step: i64,
    pub min: i64,
    pub max: i64,
}

impl ServoMove {
    /// Requested angle before clamping
    pub fn unclamped_target(&self) -> i64 {
        match self.motion {
            ServoMotion::Increase => self.current.saturating_add(self.step),
            ServoMotion::Decrease => self.current.saturating_sub(self.step),
            ServoMotion::Set(angle) => angle,
        }
    }

    /// Requested angle clamped into `[min, max]`
    pub fn target(&self) -> i64 {
        self.unclamped_target().clamp(self.min, self.max)
    }
}

/// A movement for one actuator group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorRequest {
    Stage(StageMove),
    Turret(LensChange),
    Servo(ServoMove),
}

impl ActuatorRequest {
    pub fn group(&self) -> ActuatorGroup {
        match self {
            Self::Stage(_) => ActuatorGroup::Stage,
            Self::Turret(_) => ActuatorGroup::Turret,
            Self::Servo(_) => ActuatorGroup::Servo,
        }
    }

    /// Event target describing this request before it runs
    pub fn target(&self) -> MotionTarget {
        match self {
            Self::Stage(_) => MotionTarget::Stage,
            Self::Turret(change) => MotionTarget::Turret(change.lens),
            Self::Servo(servo) => MotionTarget::Servo(servo.axis),
        }
    }
}

/// What an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionTarget {
    Stage,
    /// Turret with the lens index in effect when the event was emitted
    Turret(LensIndex),
    Servo(ServoAxis),
}

impl MotionTarget {
    pub fn group(&self) -> ActuatorGroup {
        match self {
            Self::Stage => ActuatorGroup::Stage,
            Self::Turret(_) => ActuatorGroup::Turret,
            Self::Servo(_) => ActuatorGroup::Servo,
        }
    }
}

/// Why a motion ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Every planned step was attempted
    Completed,
    /// `stop(group)` was observed between steps
    Cancelled,
    /// The next step would have left `[min, max]`
    BoundsReached,
}

/// Progress and completion notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorEvent {
    Started {
        target: MotionTarget,
        position: i64,
    },
    Progress {
        target: MotionTarget,
        position: i64,
    },
    Finished {
        target: MotionTarget,
        position: i64,
        reason: StopReason,
        /// Increments actually completed
        steps: u64,
        /// Hardware calls that failed and did not advance the position
        faults: u64,
    },
}

impl ActuatorEvent {
    pub fn target(&self) -> MotionTarget {
        match self {
            Self::Started { target, .. }
            | Self::Progress { target, .. }
            | Self::Finished { target, .. } => *target,
        }
    }

    pub fn position(&self) -> i64 {
        match self {
            Self::Started { position, .. }
            | Self::Progress { position, .. }
            | Self::Finished { position, .. } => *position,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Summary of a finished motion, returned to callers that await it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionOutcome {
    pub target: MotionTarget,
    pub position: i64,
    pub reason: StopReason,
    pub steps: u64,
    pub faults: u64,
}

impl From<MotionOutcome> for ActuatorEvent {
    fn from(outcome: MotionOutcome) -> Self {
        ActuatorEvent::Finished {
            target: outcome.target,
            position: outcome.position,
            reason: outcome.reason,
            steps: outcome.steps,
            faults: outcome.faults,
        }
    }
}

/// Position of every actuator, as tracked by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionState {
    pub stage: i64,
    pub turret: i64,
    pub lens: LensIndex,
    pub pan: i64,
    pub tilt: i64,
    pub brightness: i64,
}

impl PositionState {
    pub fn servo(&self, axis: ServoAxis) -> i64 {
        match axis {
            ServoAxis::Pan => self.pan,
            ServoAxis::Tilt => self.tilt,
            ServoAxis::Brightness => self.brightness,
        }
    }

    pub fn set_servo(&mut self, axis: ServoAxis, angle: i64) {
        match axis {
            ServoAxis::Pan => self.pan = angle,
            ServoAxis::Tilt => self.tilt = angle,
            ServoAxis::Brightness => self.brightness = angle,
        }
    }
}

/// A request in the coordinator slot, with an optional completion reply
#[derive(Debug)]
pub(crate) struct Job {
    pub request: ActuatorRequest,
    pub done: Option<oneshot::Sender<MotionOutcome>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lens_cycle() {
        let lens = LensIndex::new(0).unwrap();
        assert_eq!(lens.next().value(), 1);
        assert_eq!(lens.next().next().value(), 2);
        assert_eq!(lens.next().next().next(), lens);
        assert!(LensIndex::new(3).is_none());
    }

    #[test]
    fn test_lens_transition_direction() {
        assert_eq!(LensIndex(0).transition_direction(), Direction::Up);
        assert_eq!(LensIndex(1).transition_direction(), Direction::Up);
        assert_eq!(LensIndex(2).transition_direction(), Direction::Down);

        let change = LensChange {
            lens: LensIndex(2),
            current: 4000,
            stops: [0, 2000, 4000],
        };
        assert_eq!(change.target(), 0);
    }

    #[test]
    fn test_servo_target_is_clamped() {
        let servo = ServoMove {
            axis: ServoAxis::Pan,
            motion: ServoMotion::Increase,
            current: 175,
            step: 10,
            min: 0,
            max: 180,
        };
        assert_eq!(servo.unclamped_target(), 185);
        assert_eq!(servo.target(), 180);

        let set = ServoMove {
            motion: ServoMotion::Set(-20),
            ..servo
        };
        assert_eq!(set.target(), 0);
    }

    #[test]
    fn test_stage_target_resolution() {
        assert_eq!(StageTarget::Absolute(150).resolve(20), 150);
        assert_eq!(StageTarget::Relative(1).resolve(20), 21);
        assert_eq!(StageTarget::Relative(-1).resolve(100), 99);
    }

    #[test]
    fn test_group_parse() {
        assert_eq!(ActuatorGroup::parse("Stage"), Some(ActuatorGroup::Stage));
        assert_eq!(ActuatorGroup::parse("lens"), Some(ActuatorGroup::Turret));
        assert_eq!(ActuatorGroup::parse("motor"), None);
    }
}
