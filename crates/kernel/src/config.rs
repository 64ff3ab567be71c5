use std::path::Path;
use std::time::Duration;

use cellfield_render::{AdaptiveConfig, BandRatios, BatchConfig, DensityConfig, LodConfig, VisibilityConfig};
use cellfield_stream::{RegionLimits, StreamConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// When a full render pass is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerenderConfig {
    /// Reference movement (meters) since the last pass that triggers a new one.
    pub threshold_m: f32,
    /// Minimum time between two full passes, in milliseconds.
    pub min_interval_ms: u64,
}

impl Default for RerenderConfig {
    fn default() -> Self {
        Self {
            threshold_m: 2.0,
            min_interval_ms: 500,
        }
    }
}

impl RerenderConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// Every knob of the cell field, grouped by subsystem.
///
/// ```yaml
/// stream:
///   max_resident: 200000
/// lod:
///   near_m: 8.0
/// visibility:
///   enabled: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub region: RegionLimits,
    pub stream: StreamConfig,
    pub lod: LodConfig,
    pub visibility: VisibilityConfig,
    pub adaptive: AdaptiveConfig,
    pub density: DensityConfig,
    pub batch: BatchConfig,
    pub rerender: RerenderConfig,
}

impl FieldConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` file, or YAML for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        tracing::debug!(path = %path.display(), json = is_json, "loading field config");
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values no subsystem can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.region.max_cells == 0 {
            return invalid("region.max_cells must be positive".into());
        }
        if !(self.region.radius_reduction > 0.0 && self.region.radius_reduction < 1.0) {
            return invalid(format!(
                "region.radius_reduction must be in (0, 1), got {}",
                self.region.radius_reduction
            ));
        }
        if self.stream.load_radius_cells <= 0 {
            return invalid("stream.load_radius_cells must be positive".into());
        }
        if self.stream.max_resident == 0 {
            return invalid("stream.max_resident must be positive".into());
        }
        check_thresholds("lod", self.lod.near_m, self.lod.far_m)?;
        check_thresholds("density", self.density.near_m, self.density.far_m)?;
        check_ratios("density.ratios", &self.density.ratios)?;
        let expensive = &self.density.expensive;
        check_thresholds("density.expensive", expensive.near_m, expensive.far_m)?;
        check_ratios("density.expensive.ratios", &expensive.ratios)?;
        if !(0.0..=1.0).contains(&expensive.medium_share) {
            return invalid(format!(
                "density.expensive.medium_share must be in 0..=1, got {}",
                expensive.medium_share
            ));
        }
        let ladder = &self.adaptive.ladder;
        if !(ladder.min <= ladder.low && ladder.low <= ladder.medium && ladder.medium <= ladder.max) {
            return invalid("adaptive.ladder must be non-decreasing".into());
        }
        let fps = &self.adaptive.fps_thresholds;
        if !(fps.low <= fps.medium && fps.medium <= fps.high) {
            return invalid("adaptive.fps_thresholds must be non-decreasing".into());
        }
        if self.batch.max_instances_per_batch == 0 {
            return invalid("batch.max_instances_per_batch must be positive".into());
        }
        if self.rerender.threshold_m.is_nan() || self.rerender.threshold_m < 0.0 {
            return invalid("rerender.threshold_m must be non-negative".into());
        }
        Ok(())
    }
}

fn check_thresholds(section: &str, near: f32, far: f32) -> Result<(), ConfigError> {
    if near >= 0.0 && near <= far {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{section}: near ({near}) must be non-negative and not beyond far ({far})"
        )))
    }
}

fn check_ratios(section: &str, ratios: &BandRatios) -> Result<(), ConfigError> {
    for (name, r) in [("medium", ratios.medium), ("far", ratios.far)] {
        if !(0.0..=1.0).contains(&r) {
            return Err(ConfigError::Invalid(format!(
                "{section}.{name} must be in 0..=1, got {r}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = FieldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.max_instances_per_batch, 100_000);
        assert_eq!(config.rerender.min_interval(), Duration::from_millis(500));
        assert!(!config.visibility.enabled);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = FieldConfig::from_yaml_str(
            "stream:\n  max_resident: 1234\nlod:\n  near_m: 8.0\nvisibility:\n  enabled: true\n",
        )
        .unwrap();
        assert_eq!(config.stream.max_resident, 1234);
        assert_eq!(config.stream.load_radius_cells, 50);
        assert_eq!(config.lod.near_m, 8.0);
        assert_eq!(config.lod.far_m, 20.0);
        assert!(config.visibility.enabled);
    }

    #[test]
    fn json_round_trip() {
        let mut config = FieldConfig::default();
        config.density.expensive.types = vec!["lava".into()];
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(FieldConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn rejects_nonsense() {
        let err = FieldConfig::from_yaml_str("batch:\n  max_instances_per_batch: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = FieldConfig::from_yaml_str("lod:\n  near_m: 30.0\n  far_m: 10.0\n").unwrap_err();
        assert!(err.to_string().contains("lod"));

        let err = FieldConfig::from_yaml_str("density:\n  ratios:\n    medium: 1.5\n    far: 0.2\n")
            .unwrap_err();
        assert!(err.to_string().contains("density.ratios.medium"));

        assert!(matches!(
            FieldConfig::from_yaml_str("stream: plenty"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("field.yaml");
        std::fs::write(&yaml, "rerender:\n  threshold_m: 4.0\n").unwrap();
        assert_eq!(FieldConfig::load(&yaml).unwrap().rerender.threshold_m, 4.0);

        let json = dir.path().join("field.json");
        std::fs::write(&json, r#"{"adaptive": {"enabled": false}}"#).unwrap();
        assert!(!FieldConfig::load(&json).unwrap().adaptive.enabled);

        assert!(matches!(
            FieldConfig::load(dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }
}
