//! 2D Gaussian covariance mathematics
//!
//! Single-splat versions of the batched tensor code: building Σ from scale
//! and rotation, reducing it to a variance along a direction, and inverting it
//! for point evaluation.

use glam::{Mat2, Vec2, Vec3};

/// Rotation matrix for an angle in radians
#[inline]
pub fn rotation_matrix(theta: f32) -> Mat2 {
    Mat2::from_angle(theta)
}

/// Build a 2D covariance matrix from semi-axis scales and a rotation angle
///
/// Σ = R * S * (R * S)^T with S = diag(scale). Symmetric positive-definite
/// whenever both scales are non-zero.
pub fn build_covariance_2d(scale: Vec2, theta: f32) -> Mat2 {
    let r = rotation_matrix(theta);
    // S is diagonal, so R*S scales the columns of R
    let rs = Mat2::from_cols(r.col(0) * scale.x, r.col(1) * scale.y);
    rs * rs.transpose()
}

/// Variance of a Gaussian along a unit direction: d^T Σ d
#[inline]
pub fn variance_along(cov: Mat2, direction: Vec2) -> f32 {
    direction.dot(cov * direction)
}

/// Eigenvalues of a symmetric 2x2 matrix as (λ_max, λ_min)
pub fn eigenvalues_2x2(cov: Mat2) -> (f32, f32) {
    let a = cov.col(0).x;
    let b = cov.col(1).x;
    let c = cov.col(1).y;

    let half_trace = (a + c) * 0.5;
    let det = a * c - b * b;
    let sqrt_disc = (half_trace * half_trace - det).max(0.0).sqrt();

    (half_trace + sqrt_disc, half_trace - sqrt_disc)
}

/// Conic form (a, b, c) of the inverse covariance
///
/// Returns `None` when the determinant is not positive.
pub fn covariance_to_conic(cov: Mat2) -> Option<Vec3> {
    let det = cov.determinant();
    if det <= 1e-12 {
        return None;
    }
    let det_inv = 1.0 / det;
    Some(Vec3::new(
        cov.col(1).y * det_inv,
        -cov.col(1).x * det_inv,
        cov.col(0).x * det_inv,
    ))
}

/// Unnormalized Gaussian exp(-½ d^T Σ^-1 d) from conic coefficients
#[inline]
pub fn evaluate_conic(conic: Vec3, offset: Vec2) -> f32 {
    let power = conic.x * offset.x * offset.x
        + 2.0 * conic.y * offset.x * offset.y
        + conic.z * offset.y * offset.y;
    (-0.5 * power).exp()
}

/// Unnormalized 1D Gaussian exp(-½ d² / σ²)
#[inline]
pub fn gaussian_1d(distance_sq: f32, variance: f32) -> f32 {
    (-0.5 * distance_sq / variance).exp()
}
