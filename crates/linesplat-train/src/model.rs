//! Splat scene as a burn module

use burn::module::{Module, Param};
use burn::prelude::*;
use burn::tensor::TensorData;
use tracing::debug;

use crate::activation::{self, logit_tensor, rotation_tensor, scale_tensor, sigmoid_tensor};
use crate::error::{SplatError, SplatResult};
use crate::params::SplatParams;

/// Learnable splat parameters, all stored unconstrained
#[derive(Module, Debug)]
pub struct SplatModel<B: Backend> {
    /// Centers [N, 2]
    pub xy: Param<Tensor<B, 2>>,
    /// Logit colors [N, 3]
    pub rgb: Param<Tensor<B, 2>>,
    /// Log-scales [N, 2]
    pub scaling: Param<Tensor<B, 2>>,
    /// Pre-tanh rotation [N, 1]
    pub rotation: Param<Tensor<B, 2>>,
    /// Logit opacities [N, 1]
    pub opacity: Param<Tensor<B, 2>>,
}

impl<B: Backend> SplatModel<B> {
    /// Upload a parameter store to `device`
    pub fn from_params(params: &SplatParams, device: &B::Device) -> Self {
        let xy: Vec<f32> = params.xy.iter().flatten().copied().collect();
        let rgb: Vec<f32> = params.rgb.iter().flatten().copied().collect();
        let scaling: Vec<f32> = params.scaling.iter().flatten().copied().collect();

        Self {
            xy: Param::from_tensor(matrix(xy, 2, device)),
            rgb: Param::from_tensor(matrix(rgb, 3, device)),
            scaling: Param::from_tensor(matrix(scaling, 2, device)),
            rotation: Param::from_tensor(matrix(params.rotation.clone(), 1, device)),
            opacity: Param::from_tensor(matrix(params.opacity.clone(), 1, device)),
        }
    }

    /// Download the raw parameters
    pub fn to_params(&self) -> SplatResult<SplatParams> {
        let xy = tensor_to_vec(self.xy.val())?;
        let rgb = tensor_to_vec(self.rgb.val())?;
        let scaling = tensor_to_vec(self.scaling.val())?;

        SplatParams::from_raw(
            xy.chunks_exact(2).map(|c| [c[0], c[1]]).collect(),
            rgb.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
            scaling.chunks_exact(2).map(|c| [c[0], c[1]]).collect(),
            tensor_to_vec(self.rotation.val())?,
            tensor_to_vec(self.opacity.val())?,
        )
    }

    /// Number of splats
    pub fn num_splats(&self) -> usize {
        self.xy.val().dims()[0]
    }

    pub fn device(&self) -> B::Device {
        self.xy.val().device()
    }

    /// Centers [N, 2]
    pub fn xy(&self) -> Tensor<B, 2> {
        self.xy.val()
    }

    /// Colors in (0, 1) [N, 3]
    pub fn colors(&self) -> Tensor<B, 2> {
        sigmoid_tensor(self.rgb.val())
    }

    /// Opacities in (0, 1) [N, 1]
    pub fn opacities(&self) -> Tensor<B, 2> {
        sigmoid_tensor(self.opacity.val())
    }

    /// Semi-axis scales [N, 2]
    pub fn scales(&self) -> Tensor<B, 2> {
        scale_tensor(self.scaling.val())
    }

    /// Rotation angles in (-π, π) [N, 1]
    pub fn rotations(&self) -> Tensor<B, 2> {
        rotation_tensor(self.rotation.val())
    }

    /// Per-splat covariance R·S·(R·S)^T [N, 2, 2]
    pub fn covariance(&self) -> Tensor<B, 3> {
        let n = self.num_splats();
        let theta = self.rotations();
        let (cos, sin) = (theta.clone().cos(), theta.sin());

        let scales = self.scales();
        let sx = scales.clone().slice([0..n, 0..1]);
        let sy = scales.slice([0..n, 1..2]);

        // R·S scales the columns of R: [[c·sx, -s·sy], [s·sx, c·sy]]
        let rs = Tensor::cat(
            vec![
                cos.clone() * sx.clone(),
                sin.clone().neg() * sy.clone(),
                sin * sx,
                cos * sy,
            ],
            1,
        )
        .reshape([n, 2, 2]);

        rs.clone().matmul(rs.swap_dims(1, 2))
    }

    /// Write colors given in physical space, clamped into (ε, 1 - ε)
    pub fn set_colors(&mut self, colors: Tensor<B, 2>) -> SplatResult<()> {
        self.check_rows("colors", &colors, 3)?;
        self.rgb = Param::from_tensor(logit_tensor(colors));
        Ok(())
    }

    /// Write opacities given in physical space, clamped into (ε, 1 - ε)
    pub fn set_opacities(&mut self, opacities: Tensor<B, 2>) -> SplatResult<()> {
        self.check_rows("opacities", &opacities, 1)?;
        self.opacity = Param::from_tensor(logit_tensor(opacities));
        Ok(())
    }

    /// Host-side variant of [`Self::set_colors`]
    pub fn set_colors_from(&mut self, colors: &[[f32; 3]]) -> SplatResult<()> {
        let clamped = colors.iter().flatten().filter(|c| activation::needs_clamp(**c)).count();
        if clamped > 0 {
            debug!("Clamping {} color channels into the open unit interval", clamped);
        }
        let flat: Vec<f32> = colors.iter().flatten().copied().collect();
        let tensor = matrix(flat, 3, &self.device());
        self.set_colors(tensor)
    }

    /// Host-side variant of [`Self::set_opacities`]
    pub fn set_opacities_from(&mut self, opacities: &[f32]) -> SplatResult<()> {
        let clamped = opacities.iter().filter(|o| activation::needs_clamp(**o)).count();
        if clamped > 0 {
            debug!("Clamping {} opacities into the open unit interval", clamped);
        }
        let tensor = matrix(opacities.to_vec(), 1, &self.device());
        self.set_opacities(tensor)
    }

    fn check_rows(
        &self,
        what: &'static str,
        values: &Tensor<B, 2>,
        columns: usize,
    ) -> SplatResult<()> {
        let [rows, found] = values.dims();
        if found != columns {
            return Err(SplatError::ShapeMismatch {
                what,
                expected: columns,
                found,
            });
        }
        let expected = self.num_splats();
        if rows != expected {
            return Err(SplatError::SplatCountMismatch {
                expected,
                found: rows,
            });
        }
        Ok(())
    }
}

/// Row-major `[len / columns, columns]` tensor from host values
pub(crate) fn matrix<B: Backend>(
    values: Vec<f32>,
    columns: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let rows = values.len() / columns;
    Tensor::from_data(TensorData::new(values, [rows, columns]), device)
}

/// Flatten any tensor to host `f32` values
pub(crate) fn tensor_to_vec<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> SplatResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SplatError::TensorData(format!("{e:?}")))
}
