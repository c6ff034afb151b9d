//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::TransportMode;
use crate::retry::RetryPolicy;

/// What to do with an origin when every member of some group is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnreachablePolicy {
    /// Drop the origin from the ranking and report it as disqualified.
    Disqualify,
    /// Charge the group a fixed cost (seconds) and keep ranking the origin.
    Penalty { cost: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripDirection {
    /// Origin to destination, departing at `departure_time_to`.
    Outbound,
    /// Outbound leg plus destination back to origin at `departure_time_from`.
    RoundTrip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Sampling lattice scored against the routing provider.
    pub lattice_rows: usize,
    pub lattice_cols: usize,
    /// Dense output field interpolated from the samples.
    pub dense_rows: usize,
    pub dense_cols: usize,
    /// Bounding box expansion as a fraction of its span on each axis.
    pub margin_fraction: f64,
    /// Lower bound on the expansion, in degrees.
    pub min_margin_degrees: f64,
    /// Inverse-distance weighting exponent; must exceed 1 for a C1 field.
    pub idw_power: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            lattice_rows: 8,
            lattice_cols: 8,
            dense_rows: 50,
            dense_cols: 50,
            margin_fraction: 0.1,
            min_margin_degrees: 0.005,
            idw_power: 2.0,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::InvalidParameter {
                field,
                reason: reason.to_string(),
            })
        };
        if self.lattice_rows == 0 || self.lattice_cols == 0 {
            return invalid("grid.lattice", "needs at least one row and column");
        }
        if self.dense_rows < 2 || self.dense_cols < 2 {
            return invalid("grid.dense", "needs at least two rows and columns");
        }
        if !(self.margin_fraction.is_finite() && self.margin_fraction >= 0.0) {
            return invalid("grid.margin_fraction", "must be finite and >= 0");
        }
        if !(self.min_margin_degrees.is_finite() && self.min_margin_degrees >= 0.0) {
            return invalid("grid.min_margin_degrees", "must be finite and >= 0");
        }
        if !(self.idw_power.is_finite() && self.idw_power > 1.0) {
            return invalid("grid.idw_power", "must be finite and > 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Decimal digits kept when canonicalizing coordinates for cache keys.
    pub coordinate_precision: u32,
    pub route_ttl_secs: u64,
    pub geocode_ttl_secs: u64,
    /// Worker threads issuing provider calls.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub unreachable: UnreachablePolicy,
    /// Replaces every destination's own transport mode when set.
    pub mode_override: Option<TransportMode>,
    pub trip: TripDirection,
    pub grid: Option<GridConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coordinate_precision: 5,
            route_ttl_secs: 24 * 3600,
            geocode_ttl_secs: 30 * 24 * 3600,
            concurrency: 16,
            retry: RetryPolicy::default(),
            unreachable: UnreachablePolicy::Disqualify,
            mode_override: None,
            trip: TripDirection::Outbound,
            grid: Some(GridConfig::default()),
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
            what: path.display().to_string(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinate_precision > 9 {
            return Err(ConfigError::InvalidParameter {
                field: "coordinate_precision",
                reason: format!("{} digits exceeds 9", self.coordinate_precision),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if let UnreachablePolicy::Penalty { cost } = self.unreachable {
            if !(cost.is_finite() && cost >= 0.0) {
                return Err(ConfigError::InvalidParameter {
                    field: "unreachable.cost",
                    reason: format!("{} is not a finite non-negative cost", cost),
                });
            }
        }
        self.retry.validate()?;
        if let Some(grid) = &self.grid {
            grid.validate()?;
        }
        Ok(())
    }

    pub fn route_ttl(&self) -> Duration {
        Duration::from_secs(self.route_ttl_secs)
    }

    pub fn geocode_ttl(&self) -> Duration {
        Duration::from_secs(self.geocode_ttl_secs)
    }
}
