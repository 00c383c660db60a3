//! Experiment configuration

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{SplatError, SplatResult};
use crate::params::{FixedGroups, ParamGroup};

/// Fitting algorithm, chosen once per run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMethod {
    /// Adam on a pixel MSE loss
    Gradient,
    /// Alternating least-squares updates of color and opacity
    ClosedForm,
}

impl fmt::Display for FitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitMethod::Gradient => write!(f, "gradient"),
            FitMethod::ClosedForm => write!(f, "closed-form"),
        }
    }
}

impl FromStr for FitMethod {
    type Err = SplatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gd" | "gradient" => Ok(FitMethod::Gradient),
            "em" | "closed-form" | "closed_form" => Ok(FitMethod::ClosedForm),
            other => Err(SplatError::UnknownMethod(other.to_string())),
        }
    }
}

/// Per-group learning rates
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearningRates {
    pub xy: f64,
    pub rgb: f64,
    pub opacity: f64,
    pub scale: f64,
    pub rotation: f64,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            xy: 0.1,
            rgb: 0.025,
            opacity: 0.05,
            scale: 0.01,
            rotation: 0.1,
        }
    }
}

impl LearningRates {
    pub fn get(&self, group: ParamGroup) -> f64 {
        match group {
            ParamGroup::Xy => self.xy,
            ParamGroup::Rgb => self.rgb,
            ParamGroup::Opacity => self.opacity,
            ParamGroup::Scale => self.scale,
            ParamGroup::Rotation => self.rotation,
        }
    }
}

/// Sample offsets along every line: `xmin, xmin + step, ...` below `xmax`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRange {
    pub xmin: f32,
    pub xmax: f32,
    pub step: f32,
}

impl Default for SampleRange {
    fn default() -> Self {
        Self {
            xmin: -6.0,
            xmax: 6.0,
            step: 0.05,
        }
    }
}

/// Family of observation lines
///
/// Line `i` has normal `(a_i, b_i)` with `a` running linearly from
/// `slope_min` to `slope_max` and `b` the other way round, and a bias drawn
/// uniformly from `[bias_min, bias_min + bias_span)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineSweep {
    pub count: usize,
    pub slope_min: f32,
    pub slope_max: f32,
    pub bias_min: f32,
    pub bias_span: f32,
}

impl Default for LineSweep {
    fn default() -> Self {
        Self {
            count: 25,
            slope_min: 1.0,
            slope_max: 3.0,
            bias_min: 1.0,
            bias_span: 4.0,
        }
    }
}

/// Full experiment configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub method: FitMethod,
    /// Number of splats in both scenes
    pub splats: usize,
    /// Draw the ground truth at random instead of using a literal scene
    pub random_ground_truth: bool,
    /// Gradient steps
    pub iterations: usize,
    /// Closed-form passes over all observations
    pub passes: usize,
    pub learning_rates: LearningRates,
    /// Groups copied from the ground truth and never updated
    pub fixed: FixedGroups,
    pub samples: SampleRange,
    pub lines: LineSweep,
    pub seed: u64,
    /// Iterations between progress messages
    pub log_interval: usize,
    /// Apply the exponential decay schedule to the center learning rate
    pub schedule_xy: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            method: FitMethod::ClosedForm,
            splats: 3,
            random_ground_truth: false,
            iterations: 1000,
            passes: 20,
            learning_rates: LearningRates::default(),
            fixed: [ParamGroup::Xy, ParamGroup::Scale, ParamGroup::Rotation, ParamGroup::Rgb]
                .into_iter()
                .collect(),
            samples: SampleRange::default(),
            lines: LineSweep::default(),
            seed: 0,
            log_interval: 50,
            schedule_xy: false,
        }
    }
}

impl FitConfig {
    /// Gradient-descent preset: every group trainable, random ground truth
    pub fn gradient() -> Self {
        Self {
            method: FitMethod::Gradient,
            random_ground_truth: true,
            fixed: FixedGroups::none(),
            ..Self::default()
        }
    }

    /// Read a JSON config; missing fields take their defaults
    pub fn load(path: &Path) -> SplatResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> SplatResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// True when the closed-form fitter would update `group`
    pub fn updates(&self, group: ParamGroup) -> bool {
        !self.fixed.contains(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_reference_experiment() {
        let config = FitConfig::default();
        assert_eq!(config.method, FitMethod::ClosedForm);
        assert_eq!(config.splats, 3);
        assert_eq!(config.passes, 20);
        assert!(config.updates(ParamGroup::Opacity));
        assert!(!config.updates(ParamGroup::Rgb));
        assert_eq!(config.learning_rates.get(ParamGroup::Rgb), 0.025);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("GD".parse::<FitMethod>().unwrap(), FitMethod::Gradient);
        assert_eq!("em".parse::<FitMethod>().unwrap(), FitMethod::ClosedForm);
        assert_eq!("closed-form".parse::<FitMethod>().unwrap(), FitMethod::ClosedForm);
        assert!(matches!("lbfgs".parse::<FitMethod>(), Err(SplatError::UnknownMethod(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = FitConfig::gradient();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"method\":\"gradient\""));
        let back: FitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"splats": 2, "fixed": ["xy", "rgb"]}"#;
        let config: FitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.splats, 2);
        assert!(config.fixed.contains(ParamGroup::Rgb));
        assert!(!config.fixed.contains(ParamGroup::Scale));
        assert_eq!(config.samples, SampleRange::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = FitConfig::default();
        config.seed = 99;
        config.save(&path).unwrap();
        let loaded = FitConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
