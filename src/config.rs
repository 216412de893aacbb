// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;
use crate::display::YScale;
use crate::drivers::{ChannelSpec, Motion, SessionSettings, SimSettings, VoltageRange};

/// Environment variable naming an optional JSON file that overrides defaults.
pub const CONFIG_ENV: &str = "STAGESCAN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} is not a positive number")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Sim,
    Hardware,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DaqSettings {
    pub channel: String,
    pub sample_rate_hz: f64,
    pub samples_per_read: usize,
    pub read_timeout_secs: f64,
    pub range: VoltageRange,
}

impl Default for DaqSettings {
    fn default() -> Self {
        Self {
            channel: "Dev1/ai0".to_owned(),
            sample_rate_hz: 1000.0,
            samples_per_read: 200,
            read_timeout_secs: 10.0,
            range: VoltageRange::default(),
        }
    }
}

impl DaqSettings {
    pub fn session(&self) -> Result<SessionSettings, ConfigError> {
        let channel: ChannelSpec = self
            .channel
            .parse()
            .map_err(|e| invalid("daq.channel", format!("{e}")))?;
        Ok(SessionSettings {
            channel,
            range: self.range,
            sample_rate_hz: self.sample_rate_hz,
            block_size: self.samples_per_read,
            read_timeout: self.read_timeout(),
        })
    }

    pub fn read_timeout(&self) -> Duration {
        secs(self.read_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MotorSettings {
    pub serial: String,
    pub channel: u8,
    pub motion: Motion,
    /// `None` waits for the move as long as the device takes.
    pub move_timeout_secs: Option<f64>,
    pub poll_interval_secs: f64,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            serial: "12345678".to_owned(),
            channel: 1,
            motion: Motion::By(10.0),
            move_timeout_secs: None,
            poll_interval_secs: 0.01,
        }
    }
}

impl MotorSettings {
    pub fn move_timeout(&self) -> Option<Duration> {
        self.move_timeout_secs.map(secs)
    }
    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub ready_timeout_secs: f64,
    pub grace_period_secs: f64,
    /// Open the motion gate only once the stage reports movement, instead
    /// of as soon as the move is commanded.
    pub wait_for_motion_start: bool,
    pub motion_start_timeout_secs: f64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 5.0,
            grace_period_secs: 0.01,
            wait_for_motion_start: false,
            motion_start_timeout_secs: 1.0,
        }
    }
}

impl RunSettings {
    pub fn ready_timeout(&self) -> Duration {
        secs(self.ready_timeout_secs)
    }
    pub fn grace_period(&self) -> Duration {
        secs(self.grace_period_secs)
    }
    pub fn motion_start_timeout(&self) -> Duration {
        secs(self.motion_start_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub wait_interval_secs: f64,
    pub idle_intervals_after_stop: u32,
    pub y_scale: YScale,
    pub headless: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            wait_interval_secs: 0.05,
            idle_intervals_after_stop: 1,
            y_scale: YScale::default(),
            headless: false,
        }
    }
}

impl DisplaySettings {
    pub fn wait_interval(&self) -> Duration {
        secs(self.wait_interval_secs)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub backend: Backend,
    pub daq: DaqSettings,
    pub motor: MotorSettings,
    pub run: RunSettings,
    pub display: DisplaySettings,
    pub sim: SimSettings,
}

impl RunConfig {
    /// Defaults, overlaid by the file named in `STAGESCAN_CONFIG` if set.
    pub fn load() -> Result<Self, ConfigError> {
        let config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.daq.session()?;
        require_positive("daq.sample_rate_hz", self.daq.sample_rate_hz)?;
        if self.daq.samples_per_read == 0 {
            return Err(invalid("daq.samples_per_read", "must be at least 1"));
        }
        require_positive("daq.read_timeout_secs", self.daq.read_timeout_secs)?;
        if !(self.daq.range.min < self.daq.range.max) {
            return Err(invalid(
                "daq.range",
                format!("{}..{} is empty", self.daq.range.min, self.daq.range.max),
            ));
        }
        if self.motor.channel == 0 {
            return Err(invalid("motor.channel", "channels are numbered from 1"));
        }
        if self.motor.serial.trim().is_empty() {
            return Err(invalid("motor.serial", "must not be empty"));
        }
        let travel = match self.motor.motion {
            Motion::By(d) | Motion::To(d) => d,
        };
        if !travel.is_finite() {
            return Err(invalid("motor.motion", format!("{travel} is not finite")));
        }
        if let Some(timeout) = self.motor.move_timeout_secs {
            require_positive("motor.move_timeout_secs", timeout)?;
        }
        require_positive("motor.poll_interval_secs", self.motor.poll_interval_secs)?;
        require_positive("run.ready_timeout_secs", self.run.ready_timeout_secs)?;
        if !(self.run.grace_period_secs.is_finite() && self.run.grace_period_secs >= 0.0) {
            return Err(invalid("run.grace_period_secs", "must be zero or more"));
        }
        require_positive(
            "run.motion_start_timeout_secs",
            self.run.motion_start_timeout_secs,
        )?;
        require_positive("display.wait_interval_secs", self.display.wait_interval_secs)?;
        if self.display.idle_intervals_after_stop == 0 {
            return Err(invalid(
                "display.idle_intervals_after_stop",
                "must be at least 1",
            ));
        }
        if let YScale::Fixed { min, max } = self.display.y_scale {
            if !(min < max) {
                return Err(invalid("display.y_scale", format!("{min}..{max} is empty")));
            }
        }
        require_positive("sim.stage_velocity", self.sim.stage_velocity)?;
        Ok(())
    }
}
