//! Engine configuration.
//!
//! Loaded from an optional TOML file, then overridden field by field from
//! environment variables, then validated. Every field has a default, so an
//! empty file (or no file) yields a working configuration for the default
//! operational area.

use std::collections::BTreeMap;
use std::path::Path;

use civic_dispatch_models::{BoundingBox, GeoPoint, IncidentCategory, UnitCategory};
use serde::{Deserialize, Serialize};

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for [`DispatchConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed.
    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Raw value found.
        value: String,
    },

    /// A value is out of range.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// Which constraint failed.
        message: String,
    },
}

/// Operational area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            south: 12.80,
            north: 13.30,
            west: 79.95,
            east: 80.35,
        }
    }
}

impl RegionConfig {
    #[must_use]
    pub const fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.west, self.south, self.east, self.north)
    }
}

/// External routing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// OSRM base URL.
    #[serde(default = "default_routing_base_url")]
    pub base_url: String,
    /// Upper bound on a single route request.
    #[serde(default = "default_routing_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: default_routing_base_url(),
            timeout_secs: default_routing_timeout_secs(),
        }
    }
}

/// A hospital ambulances can deliver patients to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hospital {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Hospital {
    #[must_use]
    pub const fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub region: RegionConfig,

    /// H3 resolution of the grid.
    #[serde(default = "default_resolution")]
    pub resolution: u8,

    /// Incidents per cell before high-density alerts start.
    #[serde(default = "default_density_threshold")]
    pub density_threshold: u64,

    /// Accidents per cell before pre-stationing is suggested.
    #[serde(default = "default_accident_threshold")]
    pub accident_threshold: u64,

    /// How long a green corridor lasts after activation.
    #[serde(default = "default_corridor_duration_secs")]
    pub corridor_duration_secs: u64,

    /// A unit within this distance of its target has arrived.
    #[serde(default = "default_arrival_threshold_km")]
    pub arrival_threshold_km: f64,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default = "default_hospitals")]
    pub hospitals: Vec<Hospital>,

    /// Per-category replacements for the default capability table.
    #[serde(default)]
    pub capabilities: BTreeMap<IncidentCategory, Vec<UnitCategory>>,
}

const fn default_resolution() -> u8 {
    7
}

const fn default_density_threshold() -> u64 {
    5
}

const fn default_accident_threshold() -> u64 {
    3
}

const fn default_corridor_duration_secs() -> u64 {
    600
}

const fn default_arrival_threshold_km() -> f64 {
    0.15
}

fn default_routing_base_url() -> String {
    civic_dispatch_routing::osrm::DEFAULT_OSRM_BASE_URL.to_string()
}

const fn default_routing_timeout_secs() -> u64 {
    4
}

fn default_hospitals() -> Vec<Hospital> {
    [
        ("Rajiv Gandhi Govt Hospital", 13.0826, 80.2750),
        ("Stanley Medical College", 13.1009, 80.2937),
        ("OMR Private Hospital", 12.9684, 80.2414),
    ]
    .into_iter()
    .map(|(name, lat, lng)| Hospital {
        name: name.to_string(),
        lat,
        lng,
    })
    .collect()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            region: RegionConfig::default(),
            resolution: default_resolution(),
            density_threshold: default_density_threshold(),
            accident_threshold: default_accident_threshold(),
            corridor_duration_secs: default_corridor_duration_secs(),
            arrival_threshold_km: default_arrival_threshold_km(),
            routing: RoutingConfig::default(),
            hospitals: default_hospitals(),
            capabilities: BTreeMap::new(),
        }
    }
}

impl DispatchConfig {
    /// Parses a TOML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is malformed.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Loads the config file at `path` (or the defaults when `None`),
    /// applies process environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file can't be read or parsed, an
    /// override is malformed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => Self::default(),
        };

        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from variables visible through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if a variable is set but does
    /// not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        override_from(&lookup, "REGION_SOUTH", &mut self.region.south)?;
        override_from(&lookup, "REGION_NORTH", &mut self.region.north)?;
        override_from(&lookup, "REGION_WEST", &mut self.region.west)?;
        override_from(&lookup, "REGION_EAST", &mut self.region.east)?;
        override_from(&lookup, "H3_RESOLUTION", &mut self.resolution)?;
        override_from(
            &lookup,
            "INCIDENT_DENSITY_THRESHOLD",
            &mut self.density_threshold,
        )?;
        override_from(
            &lookup,
            "ACCIDENT_ALERT_THRESHOLD",
            &mut self.accident_threshold,
        )?;
        override_from(
            &lookup,
            "CORRIDOR_DURATION_SECS",
            &mut self.corridor_duration_secs,
        )?;
        override_from(
            &lookup,
            "ARRIVAL_THRESHOLD_KM",
            &mut self.arrival_threshold_km,
        )?;
        override_from(&lookup, "ROUTING_TIMEOUT_SECS", &mut self.routing.timeout_secs)?;

        if let Some(url) = lookup("OSRM_BASE_URL") {
            self.routing.base_url = url;
        }

        Ok(())
    }

    /// Checks ranges and orderings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first failed constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let region = &self.region;

        if self.resolution > 15 {
            return invalid(format!("resolution {} is outside 0-15", self.resolution));
        }
        if !(-90.0..=90.0).contains(&region.south) || !(-90.0..=90.0).contains(&region.north) {
            return invalid("region latitudes must be within -90..90".to_string());
        }
        if !(-180.0..=180.0).contains(&region.west) || !(-180.0..=180.0).contains(&region.east) {
            return invalid("region longitudes must be within -180..180".to_string());
        }
        if region.south >= region.north {
            return invalid(format!(
                "region south {} must be below north {}",
                region.south, region.north
            ));
        }
        if region.west >= region.east {
            return invalid(format!(
                "region west {} must be below east {}",
                region.west, region.east
            ));
        }
        if self.density_threshold == 0 || self.accident_threshold == 0 {
            return invalid("alert thresholds must be at least 1".to_string());
        }
        if self.corridor_duration_secs == 0 {
            return invalid("corridor duration must be at least 1 second".to_string());
        }
        if self.routing.timeout_secs == 0 {
            return invalid("routing timeout must be at least 1 second".to_string());
        }
        if !self.arrival_threshold_km.is_finite() || self.arrival_threshold_km <= 0.0 {
            return invalid("arrival threshold must be a positive distance".to_string());
        }

        Ok(())
    }
}

fn override_from<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(());
    };

    *target = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: raw.clone(),
    })?;

    Ok(())
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = DispatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.resolution, 7);
        assert_eq!(config.density_threshold, 5);
        assert_eq!(config.accident_threshold, 3);
        assert_eq!(config.corridor_duration_secs, 600);
        assert_eq!(config.hospitals.len(), 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = DispatchConfig::from_toml_str(
            r#"
            resolution = 8
            density_threshold = 2

            [routing]
            timeout_secs = 2

            [capabilities]
            civic = ["municipal", "police"]
            "#,
        )
        .unwrap();

        assert_eq!(config.resolution, 8);
        assert_eq!(config.density_threshold, 2);
        assert_eq!(config.accident_threshold, 3);
        assert_eq!(config.routing.timeout_secs, 2);
        assert_eq!(config.routing.base_url, "https://router.project-osrm.org");
        assert_eq!(
            config.capabilities[&IncidentCategory::Civic],
            vec![UnitCategory::Municipal, UnitCategory::Police]
        );
        assert_eq!(config.region, RegionConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = DispatchConfig::default();
        config
            .apply_env(env(&[
                ("H3_RESOLUTION", "9"),
                ("REGION_NORTH", " 13.4 "),
                ("OSRM_BASE_URL", "http://localhost:5000"),
            ]))
            .unwrap();

        assert_eq!(config.resolution, 9);
        assert!((config.region.north - 13.4).abs() < f64::EPSILON);
        assert_eq!(config.routing.base_url, "http://localhost:5000");
    }

    #[test]
    fn malformed_env_is_reported() {
        let mut config = DispatchConfig::default();
        let err = config
            .apply_env(env(&[("INCIDENT_DENSITY_THRESHOLD", "five")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == "INCIDENT_DENSITY_THRESHOLD"));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = DispatchConfig {
            resolution: 16,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_err());

        config.resolution = 7;
        config.region.south = 13.5;
        assert!(config.validate().is_err());

        config.region = RegionConfig::default();
        config.density_threshold = 0;
        assert!(config.validate().is_err());

        config.density_threshold = 5;
        config.corridor_duration_secs = 0;
        assert!(config.validate().is_err());
    }
}
