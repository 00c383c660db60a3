//! Reconstruction losses

use burn::prelude::*;

/// Mean squared error over every sample and channel
pub fn mse_loss<B: Backend, const D: usize>(
    rendered: Tensor<B, D>,
    target: Tensor<B, D>,
) -> Tensor<B, 1> {
    (rendered - target).powf_scalar(2.0).mean()
}

/// Host-side MSE between two color sequences
pub fn mse(a: &[[f32; 3]], b: &[[f32; 3]]) -> f32 {
    let count = a.len().min(b.len()) * 3;
    if count == 0 {
        return 0.0;
    }
    let total: f32 = a
        .iter()
        .zip(b)
        .flat_map(|(x, y)| x.iter().zip(y).map(|(p, q)| (p - q) * (p - q)))
        .sum();
    total / count as f32
}
