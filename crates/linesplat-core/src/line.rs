//! Scan lines in implicit form

use glam::Vec2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MIN_NORMAL_LENGTH;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("scan line normal ({0}, {1}) has zero length")]
    DegenerateNormal(f32, f32),

    #[error("scan line bias {0} is not finite")]
    NonFiniteBias(f32),
}

/// The line `normal · p + bias = 0` with a unit normal
///
/// Deserialized lines go through [`ScanLine::new`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScanLine")]
pub struct ScanLine {
    pub normal: Vec2,
    pub bias: f32,
}

#[derive(Deserialize)]
struct RawScanLine {
    normal: Vec2,
    bias: f32,
}

impl TryFrom<RawScanLine> for ScanLine {
    type Error = GeometryError;

    fn try_from(raw: RawScanLine) -> Result<Self, Self::Error> {
        ScanLine::new(raw.normal, raw.bias)
    }
}

impl ScanLine {
    /// Build a line, normalizing `normal`
    pub fn new(normal: Vec2, bias: f32) -> Result<Self, GeometryError> {
        let length = normal.length();
        if !(length.is_finite() && length > MIN_NORMAL_LENGTH) {
            return Err(GeometryError::DegenerateNormal(normal.x, normal.y));
        }
        if !bias.is_finite() {
            return Err(GeometryError::NonFiniteBias(bias));
        }
        Ok(Self {
            normal: normal / length,
            bias,
        })
    }

    /// Unit vector along the line: the normal rotated by +90°
    #[inline]
    pub fn direction(&self) -> Vec2 {
        Vec2::new(-self.normal.y, self.normal.x)
    }

    /// Point of the line closest to the origin
    #[inline]
    pub fn bias_point(&self) -> Vec2 {
        -self.bias * self.normal
    }

    /// Point at `offset` along the direction, measured from the bias point
    #[inline]
    pub fn point_at(&self, offset: f32) -> Vec2 {
        self.bias_point() + offset * self.direction()
    }

    /// Coordinate of the orthogonal projection of `p` along the direction
    #[inline]
    pub fn offset_of(&self, p: Vec2) -> f32 {
        p.dot(self.direction())
    }

    /// Orthogonal projection of `p` onto the line
    pub fn project(&self, p: Vec2) -> Vec2 {
        self.offset_of(p) * self.direction() + self.bias_point()
    }

    /// Signed value of the implicit equation at `p`
    #[inline]
    pub fn signed_distance(&self, p: Vec2) -> f32 {
        self.normal.dot(p) + self.bias
    }

    /// Euclidean distance from `p` to its projection
    pub fn distance(&self, p: Vec2) -> f32 {
        (p - self.project(p)).length()
    }
}
