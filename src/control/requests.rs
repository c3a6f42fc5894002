//! Building actuator requests from configuration and tracked positions
//!
//! Bounds and step sizes are copied into each request when it is built, so a running motion
//! never consults shared configuration.

use crate::config::{RigConfig, ServoProfile, StageConfig};
use crate::control::messages::{
    ActuatorRequest, LensChange, LensIndex, PositionState, ServoAxis, ServoMotion, ServoMove,
    StageMove, StageTarget,
};
use crate::hardware::Direction;

/// Creates requests for every actuator group
#[derive(Debug, Clone)]
pub struct RequestFactory {
    stage: StageConfig,
    turret_stops: [i64; 3],
    pan: ServoProfile,
    tilt: ServoProfile,
    brightness: ServoProfile,
}

impl RequestFactory {
    pub fn new(config: &RigConfig) -> Self {
        Self {
            stage: config.stage.clone(),
            turret_stops: config.turret.stops,
            pan: config.servos.pan.clone(),
            tilt: config.servos.tilt.clone(),
            brightness: config.servos.brightness.clone(),
        }
    }

    /// Move the stage to an absolute position
    pub fn stage_to(&self, target: i64, positions: &PositionState) -> ActuatorRequest {
        self.stage_move(StageTarget::Absolute(target), positions)
    }

    /// Move the stage one position up or down from wherever it is when the move starts
    pub fn stage_nudge(&self, direction: Direction, positions: &PositionState) -> ActuatorRequest {
        self.stage_move(StageTarget::Relative(direction.delta()), positions)
    }

    fn stage_move(&self, target: StageTarget, positions: &PositionState) -> ActuatorRequest {
        ActuatorRequest::Stage(StageMove {
            target,
            current: positions.stage,
            min: self.stage.min_position,
            max: self.stage.max_position,
        })
    }

    /// Rotate the turret to the next lens
    pub fn lens_change(&self, positions: &PositionState) -> ActuatorRequest {
        ActuatorRequest::Turret(LensChange {
            lens: positions.lens,
            current: positions.turret,
            stops: self.turret_stops,
        })
    }

    /// Step a servo by its configured increment, or set it outright
    pub fn servo(
        &self,
        axis: ServoAxis,
        motion: ServoMotion,
        positions: &PositionState,
    ) -> ActuatorRequest {
        let profile = self.profile(axis);
        ActuatorRequest::Servo(ServoMove {
            axis,
            motion,
            current: positions.servo(axis),
            step: profile.step,
            min: profile.min,
            max: profile.max,
        })
    }

    /// Absolute brightness request; the value is clamped to the servo range
    pub fn brightness(&self, value: i64, positions: &PositionState) -> ActuatorRequest {
        let value = self.clamp_brightness(value);
        self.servo(ServoAxis::Brightness, ServoMotion::Set(value), positions)
    }

    pub fn clamp_brightness(&self, value: i64) -> i64 {
        value.clamp(self.brightness.min, self.brightness.max)
    }

    fn profile(&self, axis: ServoAxis) -> &ServoProfile {
        match axis {
            ServoAxis::Pan => &self.pan,
            ServoAxis::Tilt => &self.tilt,
            ServoAxis::Brightness => &self.brightness,
        }
    }
}

/// Initial positions taken from configuration
pub fn initial_positions(config: &RigConfig) -> PositionState {
    PositionState {
        stage: config.stage.position,
        turret: config.turret.position,
        lens: LensIndex::new(config.turret.index).unwrap_or_default(),
        pan: config.servos.pan.position,
        tilt: config.servos.tilt.position,
        brightness: config.servos.brightness.position,
    }
}
