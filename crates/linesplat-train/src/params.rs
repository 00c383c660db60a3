//! Raw parameter store for a splat scene
//!
//! `SplatParams` holds the unconstrained values of all five parameter groups
//! as parallel rows, independent of any tensor backend. Models are built from
//! it and exported back to it, which is also how parameter groups are copied
//! between the ground-truth and trainable scenes.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use glam::Vec2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation;
use crate::error::{SplatError, SplatResult};

/// One of the five independently trainable parameter groups
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamGroup {
    Xy,
    Rgb,
    Scale,
    Rotation,
    Opacity,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 5] = [
        ParamGroup::Xy,
        ParamGroup::Rgb,
        ParamGroup::Scale,
        ParamGroup::Rotation,
        ParamGroup::Opacity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamGroup::Xy => "xy",
            ParamGroup::Rgb => "rgb",
            ParamGroup::Scale => "scale",
            ParamGroup::Rotation => "rotation",
            ParamGroup::Opacity => "opacity",
        }
    }
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ParamGroup {
    type Err = SplatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xy" => Ok(ParamGroup::Xy),
            "rgb" => Ok(ParamGroup::Rgb),
            "scale" | "scaling" => Ok(ParamGroup::Scale),
            "rotation" => Ok(ParamGroup::Rotation),
            "opacity" => Ok(ParamGroup::Opacity),
            other => Err(SplatError::UnknownGroup(other.to_string())),
        }
    }
}

/// Parameter groups frozen during a fit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedGroups(BTreeSet<ParamGroup>);

impl FixedGroups {
    pub fn none() -> Self {
        Self::default()
    }

    /// Parse a comma separated list such as `"xy,scale"`; `""` and `"none"` give no groups
    pub fn parse_list(list: &str) -> SplatResult<Self> {
        let list = list.trim();
        if list.is_empty() || list.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }
        list.split(',').map(ParamGroup::from_str).collect()
    }

    pub fn contains(&self, group: ParamGroup) -> bool {
        self.0.contains(&group)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ParamGroup> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ParamGroup> for FixedGroups {
    fn from_iter<I: IntoIterator<Item = ParamGroup>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FixedGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(ParamGroup::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Raw (unconstrained) parameters of N splats
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplatParams {
    /// Centers, stored as-is
    pub xy: Vec<[f32; 2]>,
    /// Colors in logit space
    pub rgb: Vec<[f32; 3]>,
    /// Semi-axis scales in log space
    pub scaling: Vec<[f32; 2]>,
    /// Rotation before `tanh(·) * π`
    pub rotation: Vec<f32>,
    /// Opacity in logit space
    pub opacity: Vec<f32>,
}

impl SplatParams {
    /// Build from raw rows, checking that all groups agree on N
    pub fn from_raw(
        xy: Vec<[f32; 2]>,
        rgb: Vec<[f32; 3]>,
        scaling: Vec<[f32; 2]>,
        rotation: Vec<f32>,
        opacity: Vec<f32>,
    ) -> SplatResult<Self> {
        let params = Self {
            xy,
            rgb,
            scaling,
            rotation,
            opacity,
        };
        params.validate()?;
        Ok(params)
    }

    /// Literal scenes used for controlled experiments; only N = 2 and N = 3 exist
    pub fn ground_truth(n: usize) -> SplatResult<Self> {
        match n {
            2 => Self::from_raw(
                vec![[2.0, 5.0], [5.0, 2.0]],
                logit_rows(&[[0.1, 0.9, 0.9], [0.9, 0.9, 0.1]]),
                vec![[0.4, 1.2], [0.9, 1.1]],
                vec![1.3, -1.6],
                vec![2.3, 1.6],
            ),
            3 => Self::from_raw(
                vec![[3.0, 3.0], [6.0, 3.0], [2.0, 6.0]],
                logit_rows(&[[0.9, 0.1, 0.1], [0.1, 0.9, 0.1], [0.1, 0.1, 0.9]]),
                vec![[0.5, 0.9], [0.4, 1.2], [0.9, 1.1]],
                vec![1.3, -1.6, 2.2],
                vec![20.0, 5.0, -1.0],
            ),
            other => Err(SplatError::GroundTruthNotImplemented(other)),
        }
    }

    /// Random scene for fitting
    ///
    /// Centers spread over roughly [-0.5, 14.5]², permuted palette colors,
    /// raw log-scales in [0.2, 1.2), zero rotation and raw opacity in
    /// [1.5, 2.5) so that every splat starts out clearly visible.
    pub fn random<R: Rng>(n: usize, rng: &mut R) -> SplatResult<Self> {
        if n == 0 {
            return Err(SplatError::EmptyScene);
        }

        let xy = (0..n)
            .map(|_| {
                let shift = rng.gen::<f32>() * 10.0 + 2.0;
                [
                    (rng.gen::<f32>() - 0.5) * 5.0 + shift,
                    (rng.gen::<f32>() - 0.5) * 5.0 + shift,
                ]
            })
            .collect();
        let rgb = logit_rows(&random_palette(n, rng));
        let scaling = (0..n)
            .map(|_| [rng.gen::<f32>() + 0.2, rng.gen::<f32>() + 0.2])
            .collect();
        let opacity = (0..n).map(|_| rng.gen::<f32>() + 1.5).collect();

        Self::from_raw(xy, rgb, scaling, vec![0.0; n], opacity)
    }

    /// Replace the `fixed` groups with deep copies from `reference`
    pub fn with_fixed(
        mut self,
        fixed: &FixedGroups,
        reference: Option<&SplatParams>,
    ) -> SplatResult<Self> {
        if fixed.is_empty() {
            return Ok(self);
        }
        let reference = reference.ok_or(SplatError::MissingReference)?;
        if reference.len() != self.len() {
            return Err(SplatError::SplatCountMismatch {
                expected: self.len(),
                found: reference.len(),
            });
        }

        for group in fixed.iter() {
            match group {
                ParamGroup::Xy => self.xy = reference.xy.clone(),
                ParamGroup::Rgb => self.rgb = reference.rgb.clone(),
                ParamGroup::Scale => self.scaling = reference.scaling.clone(),
                ParamGroup::Rotation => self.rotation = reference.rotation.clone(),
                ParamGroup::Opacity => self.opacity = reference.opacity.clone(),
            }
        }
        Ok(self)
    }

    /// Number of splats
    pub fn len(&self) -> usize {
        self.xy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xy.is_empty()
    }

    fn validate(&self) -> SplatResult<()> {
        let n = self.xy.len();
        if n == 0 {
            return Err(SplatError::EmptyScene);
        }
        for found in [
            self.rgb.len(),
            self.scaling.len(),
            self.rotation.len(),
            self.opacity.len(),
        ] {
            if found != n {
                return Err(SplatError::SplatCountMismatch { expected: n, found });
            }
        }
        Ok(())
    }

    pub fn centers(&self) -> Vec<Vec2> {
        self.xy.iter().map(|p| Vec2::from_array(*p)).collect()
    }

    /// Colors in [0, 1]
    pub fn colors(&self) -> Vec<[f32; 3]> {
        self.rgb
            .iter()
            .map(|c| c.map(activation::sigmoid))
            .collect()
    }

    /// Opacities in [0, 1]
    pub fn opacities(&self) -> Vec<f32> {
        self.opacity.iter().map(|&o| activation::sigmoid(o)).collect()
    }

    /// Semi-axis scales
    pub fn scales(&self) -> Vec<Vec2> {
        self.scaling
            .iter()
            .map(|s| Vec2::new(activation::scale(s[0]), activation::scale(s[1])))
            .collect()
    }

    /// Rotation angles in (-π, π)
    pub fn rotations(&self) -> Vec<f32> {
        self.rotation.iter().map(|&r| activation::rotation(r)).collect()
    }
}

fn logit_rows(rows: &[[f32; 3]]) -> Vec<[f32; 3]> {
    rows.iter().map(|c| c.map(activation::logit)).collect()
}

/// `n` saturated colors with evenly spaced hues, in random order
pub fn random_palette<R: Rng>(n: usize, rng: &mut R) -> Vec<[f32; 3]> {
    let offset = rng.gen::<f32>();
    let mut colors: Vec<[f32; 3]> = (0..n)
        .map(|i| hsv_to_rgb((offset + i as f32 / n as f32).fract(), 0.85, 0.9))
        .collect();
    colors.shuffle(rng);
    colors
}

/// HSV with all components in [0, 1] to RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let sector = h * 6.0;
    let i = sector.floor();
    let f = sector - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match (i as i32).rem_euclid(6) {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}
