//! Front-to-back alpha compositing of splats along a scan line
//!
//! Splats are sorted by their perpendicular distance to the line (nearest
//! first) and composited over the sample points:
//!
//! ```text
//! alpha_i = opacity_i * exp(-½ |x - μ_i|² / σ_i²)
//! C      += T * alpha_i * color_i
//! T      *= 1 - alpha_i
//! ```
//!
//! The whole pass is expressed with burn tensor ops, so the same code renders
//! on a plain backend for closed-form fitting and on an autodiff backend for
//! gradient descent.

use burn::prelude::*;
use linesplat_core::ScanLine;

use crate::error::{SplatError, SplatResult};
use crate::model::{matrix, tensor_to_vec, SplatModel};
use crate::projection::project_splats;

/// Composited colors plus the per-splat intermediates used by the fitters
#[derive(Clone, Debug)]
pub struct RenderOutput<B: Backend> {
    /// Composited color per sample [k, 3]
    pub colors: Tensor<B, 2>,
    /// Compositing weights alpha·T in splat order [N, k, 1]
    pub weights: Tensor<B, 3>,
    /// Transmittance in front of each splat, in render order [N, k, 1]
    pub transmittance: Tensor<B, 3>,
    /// Unnormalized Gaussian density, in render order [N, k, 1]
    pub density: Tensor<B, 3>,
    /// Alpha of the last composited splat only [k, 1]
    ///
    /// Every other intermediate is stacked per splat; this one holds only the
    /// value from the final loop iteration (likely a latent defect).
    pub alpha: Tensor<B, 2>,
    /// Splat indices, nearest first
    pub order: Vec<usize>,
    /// Cull mask from the projection; not applied during compositing
    pub visible: Vec<bool>,
}

impl<B: Backend> RenderOutput<B> {
    pub fn num_samples(&self) -> usize {
        self.colors.dims()[0]
    }
}

/// Sample points on `line` for scalar offsets [k, 2]
pub fn sample_points<B: Backend>(
    line: &ScanLine,
    samples: &[f32],
    device: &B::Device,
) -> Tensor<B, 2> {
    let points: Vec<f32> = samples
        .iter()
        .flat_map(|&offset| line.point_at(offset).to_array())
        .collect();
    matrix(points, 2, device)
}

/// Depth order: ascending distance, ties kept in index order
pub fn depth_order(distances: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..distances.len()).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
    order
}

/// Render `model` along `line` at the given sample offsets
pub fn render_line<B: Backend>(
    model: &SplatModel<B>,
    samples: &[f32],
    line: &ScanLine,
) -> SplatResult<RenderOutput<B>> {
    let k = samples.len();
    if k == 0 {
        return Err(SplatError::NoSamples);
    }
    let n = model.num_splats();
    let device = model.device();

    let projection = project_splats(model, line)?;
    let order = depth_order(&projection.distance_values);

    let points = sample_points::<B>(line, samples, &device);
    let opacities = model.opacities();
    let colors = model.colors();

    let mut composite = Tensor::<B, 2>::zeros([k, 3], &device);
    let mut transmittance = Tensor::<B, 2>::ones([k, 1], &device);
    let mut sorted_weights = Vec::with_capacity(n);
    let mut transmittances = Vec::with_capacity(n);
    let mut densities = Vec::with_capacity(n);
    let mut last_alpha = None;

    for &i in &order {
        let mean = projection.means.clone().slice([i..i + 1, 0..2]).repeat_dim(0, k);
        let variance = projection.variances.clone().slice([i..i + 1, 0..1]).repeat_dim(0, k);
        let opacity = opacities.clone().slice([i..i + 1, 0..1]).repeat_dim(0, k);
        let color = colors.clone().slice([i..i + 1, 0..3]).repeat_dim(0, k);

        let distance_sq = (points.clone() - mean).powf_scalar(2.0).sum_dim(1);
        let density = (distance_sq / variance).mul_scalar(-0.5).exp();
        let alpha = density.clone() * opacity;
        let weight = alpha.clone() * transmittance.clone();

        composite = composite + weight.clone().repeat_dim(1, 3) * color;

        sorted_weights.push(weight);
        transmittances.push(transmittance.clone());
        densities.push(density);
        transmittance = transmittance * alpha.clone().neg().add_scalar(1.0);
        last_alpha = Some(alpha);
    }

    // scatter weights back to splat order
    let mut slots: Vec<Option<Tensor<B, 2>>> = (0..n).map(|_| None).collect();
    for (&splat, weight) in order.iter().zip(sorted_weights) {
        slots[splat] = Some(weight);
    }
    let weights: Vec<Tensor<B, 2>> = slots.into_iter().flatten().collect();

    Ok(RenderOutput {
        colors: composite,
        weights: Tensor::stack(weights, 0),
        transmittance: Tensor::stack(transmittances, 0),
        density: Tensor::stack(densities, 0),
        alpha: last_alpha.ok_or(SplatError::EmptyScene)?,
        order,
        visible: projection.visible,
    })
}

/// Composited colors only, copied to the host
pub fn render_colors<B: Backend>(
    model: &SplatModel<B>,
    samples: &[f32],
    line: &ScanLine,
) -> SplatResult<Vec<[f32; 3]>> {
    let flat = tensor_to_vec(render_line(model, samples, line)?.colors)?;
    Ok(flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
}
