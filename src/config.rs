//! Station configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/rig.toml` by default)
//! 2. environment variables prefixed with `RIG_` (nested keys split on `__`)
//!
//! Every field carries a serde default, so a partial file (or no file at all) still yields a
//! runnable station. Actuator bounds and step sizes are read once at startup and copied into
//! each movement request; nothing consults the configuration while a motion runs.
//!
//! # Example
//! ```no_run
//! use rig_control::config::RigConfig;
//!
//! let config = RigConfig::load()?;
//! config.validate()?;
//! println!("Serving on {}", config.server.bind_address);
//! # Ok::<(), rig_control::error::RigError>(())
//! ```

use crate::error::{RigError, RigResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the station configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/rig.toml";

/// Top-level station configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Frame distribution server settings
    pub server: ServerConfig,
    /// Capture, zoom and encoding settings
    pub video: VideoConfig,
    /// Vertical stage travel
    pub stage: StageConfig,
    /// Lens turret stops
    pub turret: TurretConfig,
    /// Pan, tilt and brightness servos
    pub servos: ServoConfig,
    /// Control grant and command inbox settings
    pub control: ControlConfig,
    /// Actuator coordinator settings
    pub actuators: ActuatorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Station name, shown in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rig-station".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Frame distribution server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_address: String,
    /// Bind attempts before giving up with `AddressInUse`
    pub bind_retries: u32,
    /// Pause between bind attempts in milliseconds
    pub bind_retry_delay_ms: u64,
    /// Maximum bytes read for the handshake name
    pub handshake_max_bytes: usize,
    /// Time allowed for a client to announce its name, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Maximum bytes read per inbound command
    pub command_max_bytes: usize,
    /// Pause between frame pushes to one client, in milliseconds
    pub frame_interval_ms: u64,
    /// Time a single frame write may take before the client is evicted, in milliseconds
    pub write_timeout_ms: u64,
    /// Literal message clients send to signal they are alive
    pub liveness_token: String,
    /// Capacity of the server event broadcast channel
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9766".to_string(),
            bind_retries: 20,
            bind_retry_delay_ms: 500,
            handshake_max_bytes: 32,
            handshake_timeout_ms: 5000,
            command_max_bytes: 126,
            frame_interval_ms: 24,
            write_timeout_ms: 5000,
            liveness_token: "alive".to_string(),
            event_capacity: 64,
        }
    }
}

impl ServerConfig {
    /// Frame pacing interval
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Handshake read deadline
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Deadline for writing one frame to a client
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    /// Pause between bind attempts
    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bind_retry_delay_ms)
    }
}

/// Capture and encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Number of encoded frames the frame buffer keeps
    pub buffer_capacity: usize,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Width of every published frame; height follows the aspect ratio
    pub output_width: u32,
    /// Half-size of the crop window at zoom level zero
    pub zoom_crop_base: u32,
    /// Lowest accepted zoom level
    pub zoom_min: u32,
    /// Highest accepted zoom level
    pub zoom_max: u32,
    /// Initial zoom level
    pub zoom_initial: u32,
    /// Pause between captures, in milliseconds
    pub capture_interval_ms: u64,
    /// Simulated sensor width in pixels
    pub sensor_width: u32,
    /// Simulated sensor height in pixels
    pub sensor_height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 5,
            jpeg_quality: 40,
            output_width: 320,
            zoom_crop_base: 200,
            zoom_min: 0,
            zoom_max: 199,
            zoom_initial: 0,
            capture_interval_ms: 33,
            sensor_width: 640,
            sensor_height: 480,
        }
    }
}

impl VideoConfig {
    /// Pause between captures
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}

/// Vertical stage travel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Position at startup
    pub position: i64,
    /// Lowest reachable position
    pub min_position: i64,
    /// Highest reachable position
    pub max_position: i64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            position: 0,
            min_position: 0,
            max_position: 200,
        }
    }
}

/// Lens turret configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurretConfig {
    /// Lens index at startup (0, 1 or 2)
    pub index: u8,
    /// Stepper position at startup
    pub position: i64,
    /// Stepper position of each lens stop
    pub stops: [i64; 3],
}

impl Default for TurretConfig {
    fn default() -> Self {
        Self {
            index: 0,
            position: 0,
            stops: [0, 2000, 4000],
        }
    }
}

/// Travel profile shared by all servos
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoProfile {
    /// Angle at startup
    pub position: i64,
    /// Angle change per button press
    pub step: i64,
    /// Lowest angle
    pub min: i64,
    /// Highest angle
    pub max: i64,
}

impl Default for ServoProfile {
    fn default() -> Self {
        Self {
            position: 90,
            step: 10,
            min: 0,
            max: 180,
        }
    }
}

/// Pan, tilt and brightness servo profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Left/right servo
    pub pan: ServoProfile,
    /// Forward/backward servo
    pub tilt: ServoProfile,
    /// Diaphragm servo driving LED brightness
    pub brightness: ServoProfile,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            pan: ServoProfile::default(),
            tilt: ServoProfile::default(),
            brightness: ServoProfile {
                position: 0,
                step: 0,
                min: 0,
                max: 180,
            },
        }
    }
}

/// Control grant configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Client name granted control at startup
    pub initial_grantee: Option<String>,
    /// Inbound commands queued between client workers and the command authority
    pub inbox_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            initial_grantee: None,
            inbox_capacity: 64,
        }
    }
}

/// Actuator coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Capacity of the progress/completion event channel
    pub event_capacity: usize,
    /// Simulated settle time per stepper increment, in milliseconds
    pub step_settle_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            step_settle_ms: 5,
        }
    }
}

impl RigConfig {
    /// Load configuration from `config/rig.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `RIG_`, nested keys separated by
    /// a double underscore. Example: `RIG_SERVER__BIND_ADDRESS=127.0.0.1:9000`
    pub fn load() -> RigResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults fill every key it would have set.
    pub fn load_from<P: AsRef<Path>>(path: P) -> RigResult<Self> {
        let config = Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RIG_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> RigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(RigError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.server.bind_retries == 0 {
            return Err(RigError::Configuration(
                "bind_retries must be at least 1".to_string(),
            ));
        }

        if self.server.liveness_token.is_empty() {
            return Err(RigError::Configuration(
                "liveness_token must not be empty".to_string(),
            ));
        }

        if self.server.handshake_max_bytes == 0 || self.server.command_max_bytes == 0 {
            return Err(RigError::Configuration(
                "handshake_max_bytes and command_max_bytes must be positive".to_string(),
            ));
        }

        if self.video.buffer_capacity == 0 {
            return Err(RigError::Configuration(
                "video.buffer_capacity must be positive".to_string(),
            ));
        }

        if !(1..=100).contains(&self.video.jpeg_quality) {
            return Err(RigError::Configuration(format!(
                "Invalid jpeg_quality {}. Must be 1-100",
                self.video.jpeg_quality
            )));
        }

        if self.video.output_width == 0 {
            return Err(RigError::Configuration(
                "video.output_width must be positive".to_string(),
            ));
        }

        if self.video.zoom_min > self.video.zoom_max
            || !(self.video.zoom_min..=self.video.zoom_max).contains(&self.video.zoom_initial)
        {
            return Err(RigError::Configuration(format!(
                "Zoom range {}..={} must contain the initial level {}",
                self.video.zoom_min, self.video.zoom_max, self.video.zoom_initial
            )));
        }

        check_range(
            "stage",
            self.stage.position,
            self.stage.min_position,
            self.stage.max_position,
        )?;

        if self.turret.index > 2 {
            return Err(RigError::Configuration(format!(
                "Invalid turret index {}. Must be 0, 1 or 2",
                self.turret.index
            )));
        }
        let [p0, p1, p2] = self.turret.stops;
        if !(p0 < p1 && p1 < p2) {
            return Err(RigError::Configuration(format!(
                "Turret stops must be strictly increasing, got {:?}",
                self.turret.stops
            )));
        }
        check_range("turret", self.turret.position, p0, p2)?;

        for (name, profile) in [
            ("servos.pan", &self.servos.pan),
            ("servos.tilt", &self.servos.tilt),
            ("servos.brightness", &self.servos.brightness),
        ] {
            check_range(name, profile.position, profile.min, profile.max)?;
            if profile.step < 0 {
                return Err(RigError::Configuration(format!(
                    "{name}.step must not be negative"
                )));
            }
        }

        Ok(())
    }
}

fn check_range(name: &str, position: i64, min: i64, max: i64) -> RigResult<()> {
    if min > max {
        return Err(RigError::Configuration(format!(
            "{name}: min {min} is above max {max}"
        )));
    }
    if !(min..=max).contains(&position) {
        return Err(RigError::Configuration(format!(
            "{name}: position {position} outside {min}..={max}"
        )));
    }
    Ok(())
}
