//! Geometry shared by the line-scan renderer and its tooling
//!
//! Scan lines are stored in implicit form `p·x + q·y + b = 0` with a unit
//! normal `(p, q)`. Covariance helpers mirror the tensor code in
//! `linesplat-train` for a single splat.

pub mod constants;
pub mod covariance;
pub mod line;


pub use covariance::*;
pub use line::{GeometryError, ScanLine};
