//! Parameterization between raw training values and physical quantities
//!
//! | quantity        | physical          | raw storage         |
//! |-----------------|-------------------|---------------------|
//! | color, opacity  | `sigmoid(raw)`    | `logit(clamped)`    |
//! | scale           | `exp(raw)`        | log                 |
//! | rotation        | `tanh(raw) * π`   | pre-tanh value      |
//!
//! Colors and opacities written from physical space are clamped into
//! `(ε, 1 - ε)` first. A value of exactly 0 or 1 comes back as ε or 1 - ε
//! rather than failing with an infinite logit.

use std::f32::consts::PI;

use burn::prelude::*;
use burn::tensor::activation;
use linesplat_core::constants::PARAM_EPSILON;

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Unclamped logit; infinite at 0 and 1
#[inline]
pub fn inverse_sigmoid(x: f32) -> f32 {
    (x / (1.0 - x)).ln()
}

/// Clamp into `(eps, 1 - eps)`
#[inline]
pub fn clamp_unit(x: f32, eps: f32) -> f32 {
    x.clamp(eps, 1.0 - eps)
}

/// Raw value for a color channel or opacity
#[inline]
pub fn logit(x: f32) -> f32 {
    inverse_sigmoid(clamp_unit(x, PARAM_EPSILON))
}

#[inline]
pub fn scale(raw: f32) -> f32 {
    raw.exp()
}

#[inline]
pub fn inverse_scale(scale: f32) -> f32 {
    scale.ln()
}

#[inline]
pub fn rotation(raw: f32) -> f32 {
    raw.tanh() * PI
}

/// Raw rotation for an angle strictly inside (-π, π)
#[inline]
pub fn inverse_rotation(angle: f32) -> f32 {
    (angle / PI).atanh()
}

/// True when `x` would be moved by [`clamp_unit`]
#[inline]
pub fn needs_clamp(x: f32) -> bool {
    !(PARAM_EPSILON..=1.0 - PARAM_EPSILON).contains(&x)
}

pub fn sigmoid_tensor<B: Backend, const D: usize>(raw: Tensor<B, D>) -> Tensor<B, D> {
    activation::sigmoid(raw)
}

/// Clamped logit of a tensor in physical space
pub fn logit_tensor<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let x = x.clamp(PARAM_EPSILON, 1.0 - PARAM_EPSILON);
    let complement = x.clone().neg().add_scalar(1.0);
    (x / complement).log()
}

pub fn scale_tensor<B: Backend, const D: usize>(raw: Tensor<B, D>) -> Tensor<B, D> {
    raw.exp()
}

pub fn rotation_tensor<B: Backend, const D: usize>(raw: Tensor<B, D>) -> Tensor<B, D> {
    raw.tanh().mul_scalar(PI)
}
