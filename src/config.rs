//! Governor configuration.
//!
//! A [`GovernorConfig`] is immutable once handed to a governor. The two
//! presets, [`GovernorConfig::steering`] and [`GovernorConfig::brake`], carry
//! the calibration of the front-zone controller; a JSON [`ZoneConfig`] can
//! override either of them for the simulator.

use crate::diagnostics::DtcCode;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::path::Path;
use thiserror::Error;

/// Highest escalation level a fault latch can reach.
pub const MAX_DISABLE_LEVEL: u8 = 3;

// Steering calibration, internal unit = 0.1 degree
const STEER_SCALE: i32 = 10;
const STEER_ANGLE_MAX: i32 = 450;
const STEER_ANGLE_MIN: i32 = -450;
const STEER_PLAUS_THRESHOLD: i32 = 50;
const STEER_PLAUS_DEBOUNCE: u16 = 5;
const STEER_RATE_LIMIT: i32 = 3;
const STEER_CMD_TIMEOUT_CYCLES: u16 = 10;
const STEER_RTC_RATE: i32 = 3;
const STEER_PWM_MIN_US: u16 = 1000;
const STEER_PWM_CENTER_US: u16 = 1500;
const STEER_PWM_MAX_US: u16 = 2000;

// Brake calibration, internal unit = 1 percent
const BRAKE_MIN: i32 = 0;
const BRAKE_MAX: i32 = 100;
const BRAKE_DEVIATION_THRESHOLD: i32 = 2;
const BRAKE_DEVIATION_DEBOUNCE: u16 = 3;
const BRAKE_CMD_TIMEOUT_CYCLES: u16 = 10;
const BRAKE_CUTOFF_REPEAT: u8 = 10;

const LATCH_CLEAR_CYCLES: u16 = 50;

const_assert!(STEER_ANGLE_MIN < 0 && STEER_ANGLE_MAX > 0);
const_assert!(STEER_PWM_MIN_US < STEER_PWM_CENTER_US && STEER_PWM_CENTER_US < STEER_PWM_MAX_US);
const_assert!(STEER_RATE_LIMIT > 0 && STEER_RTC_RATE > 0);
const_assert!(BRAKE_MIN < BRAKE_MAX);
const_assert!(BRAKE_CUTOFF_REPEAT > 0);
const_assert!(LATCH_CLEAR_CYCLES > 0);

/// Fail-safe behaviour once the command stream goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailSafePolicy {
    /// Walk back to the safe value by `rate_per_cycle` internal units per cycle.
    Ramp { rate_per_cycle: i32 },
    /// Jump to the safe value and latch.
    Snap,
}

impl FailSafePolicy {
    pub fn latches_timeout(self) -> bool {
        matches!(self, FailSafePolicy::Snap)
    }
}

/// What a confirmed fault does beyond forcing the safe output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationAction {
    /// Level 1 neutral drive, level 2 primary disable line, level 3 both lines.
    DisableLines,
    /// Broadcast the motor-cutoff frame for `repeat_count` consecutive cycles.
    CutoffBroadcast { repeat_count: u8 },
}

/// Where the plausibility monitor gets its reference reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackSource {
    /// Independent position sensor read through the HAL.
    Sensor,
    /// The governor's own previously accepted command.
    LoopBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: i32,
    pub max: i32,
}

impl Range {
    pub fn contains(&self, value: i32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }
}

/// Drive-signal domain, e.g. PWM microseconds or duty percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDomain {
    pub min: u16,
    pub center: u16,
    pub max: u16,
}

/// Diagnostic event identifiers per fault kind. `None` means the kind is not
/// reported for this actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DtcMap {
    pub out_of_range: Option<DtcCode>,
    pub plausibility: Option<DtcCode>,
    pub cmd_timeout: Option<DtcCode>,
    pub sensor_fail: Option<DtcCode>,
    /// Reported alongside every confirmed fault of this actuator.
    pub summary: Option<DtcCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub name: String,
    /// Multiplier from command/feedback signal units to internal units.
    pub signal_scale: i32,
    pub range: Range,
    pub safe_value: i32,
    pub initial_position: i32,
    pub plausibility_threshold: i32,
    pub plausibility_debounce_cycles: u16,
    pub rate_limit: i32,
    pub cmd_timeout_cycles: u16,
    pub fail_safe: FailSafePolicy,
    pub latch_clear_cycles: u16,
    pub output: OutputDomain,
    pub escalation: EscalationAction,
    pub feedback: FeedbackSource,
    pub dtc: DtcMap,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("range is empty: min {min} > max {max}")]
    EmptyRange { min: i32, max: i32 },
    #[error("{field} ({value}) lies outside the configured range")]
    OutsideRange { field: &'static str, value: i32 },
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("output domain must satisfy min <= center <= max")]
    OutputDomain,
    #[error("cannot read config file: {0}")]
    Io(String),
    #[error("invalid config json: {0}")]
    Json(String),
}

impl GovernorConfig {
    /// Front-axle steering servo: +/-45 degrees, PWM 1000-2000 us.
    pub fn steering() -> Self {
        Self {
            name: "steering".into(),
            signal_scale: STEER_SCALE,
            range: Range {
                min: STEER_ANGLE_MIN,
                max: STEER_ANGLE_MAX,
            },
            safe_value: 0,
            initial_position: 0,
            plausibility_threshold: STEER_PLAUS_THRESHOLD,
            plausibility_debounce_cycles: STEER_PLAUS_DEBOUNCE,
            rate_limit: STEER_RATE_LIMIT,
            cmd_timeout_cycles: STEER_CMD_TIMEOUT_CYCLES,
            fail_safe: FailSafePolicy::Ramp {
                rate_per_cycle: STEER_RTC_RATE,
            },
            latch_clear_cycles: LATCH_CLEAR_CYCLES,
            output: OutputDomain {
                min: STEER_PWM_MIN_US,
                center: STEER_PWM_CENTER_US,
                max: STEER_PWM_MAX_US,
            },
            escalation: EscalationAction::DisableLines,
            feedback: FeedbackSource::Sensor,
            dtc: DtcMap {
                out_of_range: Some(DtcCode::STEER_RANGE),
                plausibility: Some(DtcCode::STEER_PLAUSIBILITY),
                cmd_timeout: Some(DtcCode::STEER_TIMEOUT),
                sensor_fail: Some(DtcCode::STEER_SENSOR),
                summary: None,
            },
        }
    }

    /// Brake actuator: 0-100 % force, 100 % is the safe (full braking) value.
    pub fn brake() -> Self {
        Self {
            name: "brake".into(),
            signal_scale: 1,
            range: Range {
                min: BRAKE_MIN,
                max: BRAKE_MAX,
            },
            safe_value: BRAKE_MAX,
            initial_position: BRAKE_MIN,
            plausibility_threshold: BRAKE_DEVIATION_THRESHOLD,
            plausibility_debounce_cycles: BRAKE_DEVIATION_DEBOUNCE,
            // Brake force may be applied or released in a single cycle
            rate_limit: BRAKE_MAX - BRAKE_MIN,
            cmd_timeout_cycles: BRAKE_CMD_TIMEOUT_CYCLES,
            fail_safe: FailSafePolicy::Snap,
            latch_clear_cycles: LATCH_CLEAR_CYCLES,
            output: OutputDomain {
                min: 0,
                center: 0,
                max: 100,
            },
            escalation: EscalationAction::CutoffBroadcast {
                repeat_count: BRAKE_CUTOFF_REPEAT,
            },
            feedback: FeedbackSource::LoopBack,
            dtc: DtcMap {
                out_of_range: None,
                plausibility: Some(DtcCode::BRAKE_PWM_FAIL),
                cmd_timeout: Some(DtcCode::BRAKE_TIMEOUT),
                sensor_fail: None,
                summary: Some(DtcCode::BRAKE_FAULT),
            },
        }
    }

    /// Check internal consistency. Governors refuse to initialise from a
    /// config that fails this check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.range.min > self.range.max {
            return Err(ConfigError::EmptyRange {
                min: self.range.min,
                max: self.range.max,
            });
        }
        if !self.range.contains(self.safe_value) {
            return Err(ConfigError::OutsideRange {
                field: "safe_value",
                value: self.safe_value,
            });
        }
        if !self.range.contains(self.initial_position) {
            return Err(ConfigError::OutsideRange {
                field: "initial_position",
                value: self.initial_position,
            });
        }
        if self.signal_scale <= 0 {
            return Err(ConfigError::NotPositive { field: "signal_scale" });
        }
        if self.rate_limit <= 0 {
            return Err(ConfigError::NotPositive { field: "rate_limit" });
        }
        if self.plausibility_threshold < 0 {
            return Err(ConfigError::NotPositive {
                field: "plausibility_threshold",
            });
        }
        if self.plausibility_debounce_cycles == 0 {
            return Err(ConfigError::NotPositive {
                field: "plausibility_debounce_cycles",
            });
        }
        if self.cmd_timeout_cycles == 0 {
            return Err(ConfigError::NotPositive {
                field: "cmd_timeout_cycles",
            });
        }
        if self.latch_clear_cycles == 0 {
            return Err(ConfigError::NotPositive {
                field: "latch_clear_cycles",
            });
        }
        if let FailSafePolicy::Ramp { rate_per_cycle } = self.fail_safe {
            if rate_per_cycle <= 0 {
                return Err(ConfigError::NotPositive {
                    field: "fail_safe.rate_per_cycle",
                });
            }
        }
        if let EscalationAction::CutoffBroadcast { repeat_count: 0 } = self.escalation {
            return Err(ConfigError::NotPositive {
                field: "escalation.repeat_count",
            });
        }
        let out = self.output;
        if out.min > out.center || out.center > out.max {
            return Err(ConfigError::OutputDomain);
        }
        Ok(())
    }

    /// Convert a value in signal units (degrees, percent) to internal units.
    pub fn to_internal(&self, signal: i32) -> i32 {
        signal.saturating_mul(self.signal_scale)
    }

    /// Convert an internal value back to signal units, rounding toward zero.
    pub fn to_signal(&self, internal: i32) -> i32 {
        internal / self.signal_scale
    }
}

/// Everything the simulator needs to stand up a front-zone controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub steering: GovernorConfig,
    pub brake: GovernorConfig,
    /// Emit one telemetry frame every N control cycles.
    pub telemetry_every_cycles: u32,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            steering: GovernorConfig::steering(),
            brake: GovernorConfig::brake(),
            telemetry_every_cycles: 10,
        }
    }
}

impl ZoneConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ZoneConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.steering.validate()?;
        self.brake.validate()?;
        if self.telemetry_every_cycles == 0 {
            return Err(ConfigError::NotPositive {
                field: "telemetry_every_cycles",
            });
        }
        Ok(())
    }
}
