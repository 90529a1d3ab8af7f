use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ─── Output smoother ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Initial sample-rate hint (Hz), refined from query timestamps.
    pub frequency: f64,
    pub min_cutoff: f64,
    /// Derivative sensitivity: cutoff grows by `beta * |speed|`.
    pub beta: f64,
    pub derivative_cutoff: f64,
    pub max_cutoff: Option<f64>,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            frequency: 90.0,
            min_cutoff: 5.0,
            beta: 0.2,
            derivative_cutoff: 1.0,
            max_cutoff: None,
        }
    }
}

// ─── Position filter ─────────────────────────────────────────────────────────

/// Tunables of the position filter. All durations in seconds, distances
/// in world units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    // ── Latency ──
    /// Subtracted from position arrival times.
    pub position_latency: f64,
    /// Render look-ahead applied by the tag host to frame queries.
    pub prediction_delay: f64,

    // ── Staleness ──
    pub max_prediction_delay_since_last_measurement: f64,
    pub max_delay_since_last_measurement: f64,
    pub acceleration_only_tracking_delay: f64,
    pub max_speed_viability_delay: f64,
    pub max_acceleration_viability_delay: f64,

    // ── Jump rejection ──
    pub discard_speed: f64,
    pub discard_distance: f64,

    // ── Speed estimation ──
    pub speed_calculation_delay: f64,

    // ── Dead reckoning ──
    pub inertial_kinematic_window: f64,
    pub position_kinematic_window: f64,
    pub min_inertial_interval: f64,

    // ── Correction offsets ──
    pub correction_threshold: f64,
    pub correction_decay_per_unit: f64,

    pub buffer_capacity: usize,
    pub smoother: SmootherConfig,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            position_latency: 0.065,
            prediction_delay: 0.02,
            max_prediction_delay_since_last_measurement: 0.5,
            max_delay_since_last_measurement: 0.1,
            acceleration_only_tracking_delay: 0.3,
            max_speed_viability_delay: 0.5,
            max_acceleration_viability_delay: 0.1,
            discard_speed: 2.0,
            discard_distance: 0.15,
            speed_calculation_delay: 0.14,
            inertial_kinematic_window: 0.11,
            position_kinematic_window: 0.03,
            min_inertial_interval: 0.002,
            correction_threshold: 0.04,
            correction_decay_per_unit: 1.5,
            buffer_capacity: 100,
            smoother: SmootherConfig::default(),
        }
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::InvalidParameter {
            name,
            reason: format!("expected a finite value >= 0, got {}", value),
        });
    }
    Ok(())
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidParameter {
            name,
            reason: format!("expected a finite value > 0, got {}", value),
        });
    }
    Ok(())
}

impl FilterConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity < 2 {
            return Err(ConfigError::InvalidParameter {
                name: "buffer_capacity",
                reason: format!("need room for at least 2 samples, got {}", self.buffer_capacity),
            });
        }

        non_negative("position_latency", self.position_latency)?;
        non_negative("prediction_delay", self.prediction_delay)?;
        non_negative("discard_speed", self.discard_speed)?;
        non_negative("discard_distance", self.discard_distance)?;
        non_negative("min_inertial_interval", self.min_inertial_interval)?;
        non_negative("correction_threshold", self.correction_threshold)?;
        non_negative("correction_decay_per_unit", self.correction_decay_per_unit)?;
        non_negative("inertial_kinematic_window", self.inertial_kinematic_window)?;
        non_negative("position_kinematic_window", self.position_kinematic_window)?;

        positive(
            "max_prediction_delay_since_last_measurement",
            self.max_prediction_delay_since_last_measurement,
        )?;
        positive("max_delay_since_last_measurement", self.max_delay_since_last_measurement)?;
        positive("acceleration_only_tracking_delay", self.acceleration_only_tracking_delay)?;
        positive("max_speed_viability_delay", self.max_speed_viability_delay)?;
        positive("max_acceleration_viability_delay", self.max_acceleration_viability_delay)?;
        positive("speed_calculation_delay", self.speed_calculation_delay)?;

        positive("smoother.frequency", self.smoother.frequency)?;
        positive("smoother.min_cutoff", self.smoother.min_cutoff)?;
        non_negative("smoother.beta", self.smoother.beta)?;
        positive("smoother.derivative_cutoff", self.smoother.derivative_cutoff)?;
        if let Some(max) = self.smoother.max_cutoff {
            positive("smoother.max_cutoff", max)?;
            if max < self.smoother.min_cutoff {
                return Err(ConfigError::InvalidParameter {
                    name: "smoother.max_cutoff",
                    reason: format!(
                        "{} is below min_cutoff {}",
                        max, self.smoother.min_cutoff
                    ),
                });
            }
        }
        Ok(())
    }
}

// ─── Tag host ────────────────────────────────────────────────────────────────

/// What the tag is attached to. Only a label; each role maps to its own
/// independent filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagRole {
    Head,
    Gun,
    LeftController,
    RightController,
    LeftFoot,
    RightFoot,
    CameraSpectator,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub uid: String,
    pub role: TagRole,
    /// When off, frames show the raw last received position.
    pub filtering_enabled: bool,
    pub filter: FilterConfig,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            uid: String::new(),
            role: TagRole::Other,
            filtering_enabled: true,
            filter: FilterConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = FilterConfig::from_json_str(
            r#"{"discard_speed": 3.5, "smoother": {"beta": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(config.discard_speed, 3.5);
        assert_eq!(config.smoother.beta, 0.5);
        assert_eq!(config.smoother.frequency, 90.0);
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.position_latency, 0.065);
    }

    #[test]
    fn test_rejects_tiny_buffer() {
        let config = FilterConfig {
            buffer_capacity: 1,
            ..FilterConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("buffer_capacity"));
    }

    #[test]
    fn test_rejects_bad_delays() {
        let config = FilterConfig {
            acceleration_only_tracking_delay: 0.0,
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FilterConfig {
            position_latency: f64::NAN,
            ..FilterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_cutoffs() {
        let mut config = FilterConfig::default();
        config.smoother.max_cutoff = Some(1.0);
        assert!(config.validate().is_err());
        config.smoother.max_cutoff = Some(20.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = FilterConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_tag_config_roundtrip_role() {
        let config: TagConfig =
            serde_json::from_str(r#"{"uid": "tag-7", "role": "left_controller"}"#).unwrap();
        assert_eq!(config.role, TagRole::LeftController);
        assert!(config.filtering_enabled);
    }
}
