//! Projection of splats onto a scan line

use burn::prelude::*;
use glam::Vec2;
use linesplat_core::constants::NEAR_CULL_DISTANCE;
use linesplat_core::ScanLine;

use crate::error::SplatResult;
use crate::model::{tensor_to_vec, SplatModel};

/// Every splat's Gaussian reduced to one dimension along a line
#[derive(Clone, Debug)]
pub struct LineProjection<B: Backend> {
    /// Unit vector along the line
    pub direction: Vec2,
    /// Point of the line closest to the origin
    pub bias_point: Vec2,
    /// Orthogonal projections of the centers [N, 2]
    pub means: Tensor<B, 2>,
    /// Center to line distances [N, 1]
    pub distances: Tensor<B, 2>,
    /// Variances along the line direction [N, 1]
    pub variances: Tensor<B, 2>,
    /// Host copy of `distances`
    pub distance_values: Vec<f32>,
    /// Near-cull AND back-cull
    pub visible: Vec<bool>,
}

/// Project with the default near-cull threshold
pub fn project_splats<B: Backend>(
    model: &SplatModel<B>,
    line: &ScanLine,
) -> SplatResult<LineProjection<B>> {
    project_splats_with(model, line, NEAR_CULL_DISTANCE)
}

/// Project every splat of `model` onto `line`
///
/// A splat is visible when its distance to the line is at least `near_cull`
/// and it lies on the positive side (`n·center + b > 0`). The visibility mask
/// is informational: the renderer composites every splat regardless.
pub fn project_splats_with<B: Backend>(
    model: &SplatModel<B>,
    line: &ScanLine,
    near_cull: f32,
) -> SplatResult<LineProjection<B>> {
    let n = model.num_splats();
    let direction = line.direction();
    let bias_point = line.bias_point();

    let xy = model.xy();
    let x = xy.clone().slice([0..n, 0..1]);
    let y = xy.clone().slice([0..n, 1..2]);

    // coordinate of each center along the line, then back to 2D
    let along = x.clone().mul_scalar(direction.x) + y.clone().mul_scalar(direction.y);
    let means = Tensor::cat(
        vec![
            along.clone().mul_scalar(direction.x).add_scalar(bias_point.x),
            along.mul_scalar(direction.y).add_scalar(bias_point.y),
        ],
        1,
    );
    let distances = (xy - means.clone()).powf_scalar(2.0).sum_dim(1).sqrt();

    // d^T Σ d from the flattened [Σ00, Σ01, Σ10, Σ11]
    let cov = model.covariance().reshape([n, 4]);
    let variances = cov.clone().slice([0..n, 0..1]).mul_scalar(direction.x * direction.x)
        + cov.clone().slice([0..n, 1..2]).mul_scalar(direction.x * direction.y)
        + cov.clone().slice([0..n, 2..3]).mul_scalar(direction.y * direction.x)
        + cov.slice([0..n, 3..4]).mul_scalar(direction.y * direction.y);

    let signed = x.mul_scalar(line.normal.x) + y.mul_scalar(line.normal.y);
    let signed = tensor_to_vec(signed.add_scalar(line.bias))?;
    let distance_values = tensor_to_vec(distances.clone())?;

    let visible = distance_values
        .iter()
        .zip(&signed)
        .map(|(&distance, &side)| distance >= near_cull && side > 0.0)
        .collect();

    Ok(LineProjection {
        direction,
        bias_point,
        means,
        distances,
        variances,
        distance_values,
        visible,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use linesplat_core::{build_covariance_2d, variance_along};

    use crate::params::SplatParams;

    type TestBackend = NdArray<f32>;

    fn model(params: &SplatParams) -> SplatModel<TestBackend> {
        SplatModel::from_params(params, &Default::default())
    }

    #[test]
    fn test_vertical_line() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let line = ScanLine::new(Vec2::new(1.0, 0.0), -3.5).unwrap();
        let proj = project_splats(&model(&gt), &line).unwrap();

        let means = tensor_to_vec(proj.means).unwrap();
        assert_relative_eq!(means[0], 3.5, epsilon = 1e-5);
        assert_relative_eq!(means[1], 5.0, epsilon = 1e-5);
        assert_relative_eq!(means[2], 3.5, epsilon = 1e-5);
        assert_relative_eq!(means[3], 2.0, epsilon = 1e-5);
        assert_relative_eq!(proj.distance_values[0], 1.5, epsilon = 1e-5);
        assert_relative_eq!(proj.distance_values[1], 1.5, epsilon = 1e-5);

        // (2, 5) is on the negative side of x - 3.5 = 0, (5, 2) on the positive side
        assert_eq!(proj.visible, vec![false, true]);
    }

    #[test]
    fn test_variance_matches_scalar() {
        let gt = SplatParams::ground_truth(3).unwrap();
        let line = ScanLine::new(Vec2::new(1.0, 2.0), 1.5).unwrap();
        let proj = project_splats(&model(&gt), &line).unwrap();
        let variances = tensor_to_vec(proj.variances).unwrap();

        for (i, (scale, theta)) in gt.scales().into_iter().zip(gt.rotations()).enumerate() {
            let cov = build_covariance_2d(scale, theta);
            let expected = variance_along(cov, line.direction());
            assert_relative_eq!(variances[i], expected, max_relative = 1e-4);
            assert!(variances[i] > 0.0);
        }
    }

    #[test]
    fn test_center_on_line_is_near_culled() {
        let mut params = SplatParams::ground_truth(2).unwrap();
        params.xy = vec![[2.0, 5.0], [9.0, 9.0]];
        // x + y = 7 passes through (2, 5)
        let line = ScanLine::new(Vec2::new(1.0, 1.0), -7.0 / 2f32.sqrt()).unwrap();
        let proj = project_splats(&model(&params), &line).unwrap();

        let means = tensor_to_vec(proj.means).unwrap();
        assert_relative_eq!(means[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(means[1], 5.0, epsilon = 1e-4);
        assert!(proj.distance_values[0] < NEAR_CULL_DISTANCE);
        assert!(!proj.visible[0]);
        // (9, 9) is in front of the line and far from it
        assert!(proj.visible[1]);
    }

    #[test]
    fn test_near_cull_threshold_is_configurable() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let line = ScanLine::new(Vec2::new(-1.0, 0.0), 3.5).unwrap();
        let strict = project_splats_with(&model(&gt), &line, 2.0).unwrap();
        assert_eq!(strict.visible, vec![false, false]);
        let loose = project_splats_with(&model(&gt), &line, 0.5).unwrap();
        // flipping the normal flips the back-cull side
        assert_eq!(loose.visible, vec![true, false]);
    }
}
