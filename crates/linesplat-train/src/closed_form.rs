//! Alternating closed-form updates of color and opacity
//!
//! Geometry stays fixed while each observation contributes one small
//! least-squares solve per free group. With `w` the compositing weights of a
//! render and `y` the observed colors:
//!
//! ```text
//! color   = (mean_s w wᵀ)⁻¹ · mean_s w yᵀ
//! P_c     = T ⊙ g ⊙ color[:, c]                  per channel c
//! opacity = mean_c (P_c P_cᵀ)⁻¹ · (N - 1) Σ_s P_c y_c
//! ```
//!
//! `T` and `g` are taken in render order exactly as the renderer emits them
//! while `color` is in splat order.

use burn::prelude::*;
use nalgebra::DMatrix;
use tracing::{debug, info};

use linesplat_core::constants::CHANNELS;

use crate::config::FitConfig;
use crate::error::{SolveStage, SplatError, SplatResult};
use crate::loss::mse;
use crate::model::{tensor_to_vec, SplatModel};
use crate::observation::Observation;
use crate::params::ParamGroup;
use crate::progress::progress_bar;
use crate::rasterizer::render_line;

/// Result of a closed-form run
#[derive(Debug)]
pub struct ClosedFormFit<B: Backend> {
    pub model: SplatModel<B>,
    /// Mean reconstruction error seen during the last pass, before each update
    pub final_loss: f32,
    pub passes: usize,
}

/// Alternating least-squares fitter
#[derive(Clone, Debug)]
pub struct ClosedFormFitter {
    pub passes: usize,
    pub update_colors: bool,
    pub update_opacity: bool,
}

impl Default for ClosedFormFitter {
    fn default() -> Self {
        Self {
            passes: 20,
            update_colors: false,
            update_opacity: true,
        }
    }
}

impl ClosedFormFitter {
    pub fn from_config(config: &FitConfig) -> Self {
        Self {
            passes: config.passes,
            update_colors: config.updates(ParamGroup::Rgb),
            update_opacity: config.updates(ParamGroup::Opacity),
        }
    }

    /// Visit every observation once per pass, in order
    pub fn fit<B: Backend>(
        &self,
        mut model: SplatModel<B>,
        observations: &[Observation],
        samples: &[f32],
    ) -> SplatResult<ClosedFormFit<B>> {
        if observations.is_empty() {
            return Err(SplatError::NoObservations);
        }
        info!(
            "Closed-form fit: {} splats, {} observations, {} passes (color: {}, opacity: {})",
            model.num_splats(),
            observations.len(),
            self.passes,
            self.update_colors,
            self.update_opacity
        );

        let pb = progress_bar((self.passes * observations.len()) as u64);
        let mut final_loss = f32::NAN;

        for pass in 0..self.passes {
            let mut pass_loss = 0.0;
            for (index, observation) in observations.iter().enumerate() {
                pass_loss += self.update(&mut model, observation, samples, index)?;
                pb.inc(1);
            }
            final_loss = pass_loss / observations.len() as f32;
            pb.set_message(format!("{:.6}", final_loss));
            debug!("pass {} mean loss={:.6}", pass, final_loss);
        }

        pb.finish_with_message(format!("final={:.6}", final_loss));
        info!("Closed-form fit done: final loss {:.6}", final_loss);

        Ok(ClosedFormFit {
            model,
            final_loss,
            passes: self.passes,
        })
    }

    /// Render one observation, then solve the free groups in turn
    ///
    /// Returns the reconstruction error of the render taken before the
    /// updates. The opacity solve sees the colors written by the color solve.
    pub fn update<B: Backend>(
        &self,
        model: &mut SplatModel<B>,
        observation: &Observation,
        samples: &[f32],
        index: usize,
    ) -> SplatResult<f32> {
        if observation.num_samples() != samples.len() {
            return Err(SplatError::SampleCountMismatch {
                expected: samples.len(),
                found: observation.num_samples(),
            });
        }
        let n = model.num_splats();
        let rendered = render_line(&*model, samples, &observation.line)?;

        let predicted = rows(tensor_to_vec(rendered.colors)?);
        let loss = mse(&predicted, &observation.colors);

        if self.update_colors {
            let weights = tensor_to_vec(rendered.weights)?;
            let colors = solve_colors(&weights, &observation.colors, n).ok_or(
                SplatError::SingularSystem {
                    stage: SolveStage::Color,
                    observation: index,
                },
            )?;
            model.set_colors_from(&colors)?;
        }

        if self.update_opacity {
            let transmittance = tensor_to_vec(rendered.transmittance)?;
            let density = tensor_to_vec(rendered.density)?;
            let colors = rows(tensor_to_vec(model.colors())?);
            let opacities = solve_opacity(&transmittance, &density, &colors, &observation.colors)
                .ok_or(SplatError::SingularSystem {
                    stage: SolveStage::Opacity,
                    observation: index,
                })?;
            model.set_opacities_from(&opacities)?;
        }

        Ok(loss)
    }
}

fn rows(flat: Vec<f32>) -> Vec<[f32; 3]> {
    flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

/// Inverse with a finiteness check on the result
fn invert(m: DMatrix<f64>) -> Option<DMatrix<f64>> {
    m.try_inverse().filter(|inv| inv.iter().all(|v| v.is_finite()))
}

/// Least-squares colors from `[N, k]` weights in splat order
///
/// `None` when the weight Gram matrix is singular.
pub fn solve_colors(weights: &[f32], observed: &[[f32; 3]], n: usize) -> Option<Vec<[f32; 3]>> {
    let k = observed.len();
    if n == 0 || k == 0 || weights.len() != n * k {
        return None;
    }

    let w = DMatrix::from_fn(n, k, |i, s| weights[i * k + s] as f64);
    let y = DMatrix::from_fn(k, CHANNELS, |s, ch| observed[s][ch] as f64);

    let x_c = (&w * w.transpose()) / k as f64;
    let y_c = (&w * y) / k as f64;
    let solution = invert(x_c)? * y_c;

    if !solution.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some(
        (0..n)
            .map(|i| [solution[(i, 0)] as f32, solution[(i, 1)] as f32, solution[(i, 2)] as f32])
            .collect(),
    )
}

/// Opacities averaged over the three per-channel solves
///
/// `transmittance` and `density` are `[N, k]` in render order, `colors` is
/// in splat order.
pub fn solve_opacity(
    transmittance: &[f32],
    density: &[f32],
    colors: &[[f32; 3]],
    observed: &[[f32; 3]],
) -> Option<Vec<f32>> {
    let n = colors.len();
    let k = observed.len();
    if n == 0 || k == 0 || transmittance.len() != n * k || density.len() != n * k {
        return None;
    }

    let mut total = DMatrix::<f64>::zeros(n, 1);
    for ch in 0..CHANNELS {
        let p = DMatrix::from_fn(n, k, |i, s| {
            transmittance[i * k + s] as f64 * density[i * k + s] as f64 * colors[i][ch] as f64
        });
        let y = DMatrix::from_fn(k, 1, |s, _| observed[s][ch] as f64);

        let x_o = &p * p.transpose();
        let y_o = (&p * y) * (n as f64 - 1.0);
        total += invert(x_o)? * y_o;
    }

    let opacities: Vec<f32> = total.iter().map(|v| (v / CHANNELS as f64) as f32).collect();
    opacities.iter().all(|v| v.is_finite()).then_some(opacities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use glam::Vec2;
    use linesplat_core::ScanLine;

    use crate::observation::{generate_observations, sample_offsets};
    use crate::params::SplatParams;

    type TestBackend = NdArray<f32>;

    fn observations(gt: &SplatParams, lines: &[ScanLine], samples: &[f32]) -> Vec<Observation> {
        let model = SplatModel::<TestBackend>::from_params(gt, &Default::default());
        generate_observations(&model, lines, samples).unwrap()
    }

    fn cross_lines() -> Vec<ScanLine> {
        vec![
            ScanLine::new(Vec2::new(1.0, 0.0), -3.5).unwrap(),
            ScanLine::new(Vec2::new(0.0, 1.0), -3.5).unwrap(),
        ]
    }

    #[test]
    fn test_solve_colors_exact() {
        // two splats with disjoint support
        let weights = [0.5, 0.5, 0.0, 0.0, 0.0, 0.0, 0.25, 0.75];
        let observed = [[0.1, 0.2, 0.3], [0.1, 0.2, 0.3], [0.2, 0.1, 0.05], [0.6, 0.3, 0.15]];
        let colors = solve_colors(&weights, &observed, 2).unwrap();
        assert_relative_eq!(colors[0][0], 0.2, epsilon = 1e-6);
        assert_relative_eq!(colors[0][2], 0.6, epsilon = 1e-6);
        assert_relative_eq!(colors[1][0], 0.8, epsilon = 1e-6);
        assert_relative_eq!(colors[1][1], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_solve_colors_singular() {
        // second splat never contributes
        let weights = [0.5, 0.2, 0.1, 0.0, 0.0, 0.0];
        let observed = [[0.5; 3], [0.2; 3], [0.1; 3]];
        assert!(solve_colors(&weights, &observed, 2).is_none());
        assert!(solve_colors(&weights, &observed, 3).is_none());
    }

    #[test]
    fn test_solve_opacity_single_channel_scale() {
        // one splat: (N - 1) = 0 forces a zero solution
        let t = [1.0, 1.0];
        let g = [0.5, 0.25];
        let solved = solve_opacity(&t, &g, &[[0.5, 0.5, 0.5]], &[[0.1; 3], [0.05; 3]]).unwrap();
        assert_eq!(solved, vec![0.0]);
    }

    #[test]
    fn test_solve_opacity_diagonal() {
        // disjoint support: each channel solve is (N - 1) * y / (T g c)
        let t = [1.0, 1.0, 1.0, 1.0];
        let g = [0.5, 0.0, 0.0, 0.5];
        let colors = [[0.5, 0.5, 0.5], [1.0, 1.0, 1.0]];
        let observed = [[0.1; 3], [0.2; 3]];
        let solved = solve_opacity(&t, &g, &colors, &observed).unwrap();
        assert_relative_eq!(solved[0], 0.4, epsilon = 1e-6);
        assert_relative_eq!(solved[1], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_color_only_recovers_ground_truth() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let samples = sample_offsets(-6.0, 6.0, 0.05);
        let observations = observations(&gt, &cross_lines(), &samples);

        let mut init = gt.clone();
        init.rgb = vec![[0.0; 3]; 2];
        let fitter = ClosedFormFitter {
            passes: 2,
            update_colors: true,
            update_opacity: false,
        };
        let model = SplatModel::<TestBackend>::from_params(&init, &Default::default());
        let fit = fitter.fit(model, &observations, &samples).unwrap();

        let recovered = fit.model.to_params().unwrap().colors();
        for (got, want) in recovered.iter().zip(gt.colors()) {
            for ch in 0..3 {
                assert_relative_eq!(got[ch], want[ch], epsilon = 1e-2);
            }
        }
        assert!(fit.final_loss < 1e-4);
    }

    #[test]
    fn test_opacity_update_stays_in_range() {
        let gt = SplatParams::ground_truth(3).unwrap();
        let samples = sample_offsets(-6.0, 6.0, 0.05);
        let lines = vec![
            ScanLine::new(Vec2::new(1.0, 3.0), 2.0).unwrap(),
            ScanLine::new(Vec2::new(2.0, 2.0), 3.0).unwrap(),
            ScanLine::new(Vec2::new(3.0, 1.0), 4.0).unwrap(),
        ];
        let observations = observations(&gt, &lines, &samples);

        let mut init = gt.clone();
        init.opacity = vec![2.0; 3];
        let model = SplatModel::<TestBackend>::from_params(&init, &Default::default());
        let fit = ClosedFormFitter {
            passes: 2,
            ..ClosedFormFitter::default()
        }
        .fit(model, &observations, &samples)
        .unwrap();

        let trained = fit.model.to_params().unwrap();
        assert_eq!(trained.rgb, init.rgb);
        for opacity in trained.opacities() {
            assert!(opacity.is_finite());
            assert!((1e-4 - 1e-6..=1.0 - 1e-4 + 1e-6).contains(&opacity));
        }
        assert_eq!(fit.passes, 2);
    }

    #[test]
    fn test_singular_color_system_is_reported() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let samples = sample_offsets(-6.0, 6.0, 0.1);
        let observations = observations(&gt, &cross_lines(), &samples);

        // an opacity that underflows to zero gives splat 1 no weight at all
        let mut init = gt.clone();
        init.opacity[1] = -1000.0;
        let model = SplatModel::<TestBackend>::from_params(&init, &Default::default());
        let fitter = ClosedFormFitter {
            passes: 1,
            update_colors: true,
            update_opacity: false,
        };
        let result = fitter.fit(model, &observations, &samples);
        assert!(matches!(
            result,
            Err(SplatError::SingularSystem {
                stage: SolveStage::Color,
                observation: 0
            })
        ));
    }

    #[test]
    fn test_singular_opacity_system_is_reported() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let samples = sample_offsets(-6.0, 6.0, 0.1);
        let observations = observations(&gt, &cross_lines(), &samples);

        // splat 1 sits far off every sample, so its density row is all zeros
        let mut init = gt.clone();
        init.xy[1] = [5.0, 500.0];
        let model = SplatModel::<TestBackend>::from_params(&init, &Default::default());
        let fitter = ClosedFormFitter {
            passes: 1,
            update_colors: false,
            update_opacity: true,
        };
        let result = fitter.fit(model, &observations, &samples);
        assert!(matches!(
            result,
            Err(SplatError::SingularSystem {
                stage: SolveStage::Opacity,
                observation: 0
            })
        ));
    }

    #[test]
    fn test_sample_count_checked() {
        let gt = SplatParams::ground_truth(2).unwrap();
        let observations = observations(&gt, &cross_lines(), &sample_offsets(-6.0, 6.0, 0.5));
        let model = SplatModel::<TestBackend>::from_params(&gt, &Default::default());
        let coarse = sample_offsets(-6.0, 6.0, 1.0);
        let result = ClosedFormFitter::default().fit(model, &observations, &coarse);
        assert!(matches!(result, Err(SplatError::SampleCountMismatch { .. })));
        let model = SplatModel::<TestBackend>::from_params(&gt, &Default::default());
        assert!(matches!(
            ClosedFormFitter::default().fit(model, &[], &[0.0]),
            Err(SplatError::NoObservations)
        ));
    }
}
