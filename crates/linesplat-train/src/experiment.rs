//! End-to-end experiment: scenes, observations, fit, evaluation

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use linesplat_core::ScanLine;

use crate::closed_form::ClosedFormFitter;
use crate::config::{FitConfig, FitMethod};
use crate::error::{SplatError, SplatResult};
use crate::loss::mse;
use crate::model::SplatModel;
use crate::observation::{generate_observations, line_sweep, sample_offsets, Observation};
use crate::params::SplatParams;
use crate::rasterizer::render_colors;
use crate::trainer::GradientTrainer;

/// Everything derived from the config before fitting starts
#[derive(Clone, Debug)]
pub struct Scene {
    pub ground_truth: SplatParams,
    pub initial: SplatParams,
    pub samples: Vec<f32>,
    pub lines: Vec<ScanLine>,
}

impl Scene {
    /// Draw both scenes and the observation lines from one seeded RNG
    pub fn prepare(config: &FitConfig) -> SplatResult<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);

        let ground_truth = if config.random_ground_truth {
            SplatParams::random(config.splats, &mut rng)?
        } else {
            SplatParams::ground_truth(config.splats)?
        };
        let initial = SplatParams::random(config.splats, &mut rng)?
            .with_fixed(&config.fixed, Some(&ground_truth))?;

        let range = &config.samples;
        let samples = sample_offsets(range.xmin, range.xmax, range.step);
        if samples.is_empty() {
            return Err(SplatError::NoSamples);
        }
        let lines = line_sweep(&config.lines, &mut rng)?;
        if lines.is_empty() {
            return Err(SplatError::NoObservations);
        }

        Ok(Self {
            ground_truth,
            initial,
            samples,
            lines,
        })
    }

    pub fn observe<B: Backend>(&self, device: &B::Device) -> SplatResult<Vec<Observation>> {
        let model = SplatModel::<B>::from_params(&self.ground_truth, device);
        generate_observations(&model, &self.lines, &self.samples)
    }
}

/// Summary written after a run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub method: FitMethod,
    pub splats: usize,
    /// Loss reported by the fitter for its last iteration or pass
    pub final_loss: f32,
    /// Reconstruction error of the fitted scene per observation
    pub observation_mse: Vec<f32>,
    pub mean_mse: f32,
    pub colors: Vec<[f32; 3]>,
    pub opacities: Vec<f32>,
    pub ground_truth_colors: Vec<[f32; 3]>,
    pub ground_truth_opacities: Vec<f32>,
}

/// Fitted scene plus everything needed to render previews
#[derive(Clone, Debug)]
pub struct ExperimentOutcome {
    pub scene: Scene,
    pub observations: Vec<Observation>,
    pub fitted: SplatParams,
    pub report: FitReport,
}

impl ExperimentOutcome {
    pub fn write_report(&self, path: &std::path::Path) -> SplatResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(&self.report)?)?;
        Ok(())
    }
}

/// Reconstruction error of `model` on every observation
pub fn evaluate<B: Backend>(
    model: &SplatModel<B>,
    observations: &[Observation],
    samples: &[f32],
) -> SplatResult<Vec<f32>> {
    observations
        .iter()
        .map(|observation| {
            let predicted = render_colors(model, samples, &observation.line)?;
            Ok(mse(&predicted, &observation.colors))
        })
        .collect()
}

/// Run the configured method
///
/// The gradient method runs on `B`; the closed-form method on its inner,
/// non-differentiable backend.
pub fn run_experiment<B: AutodiffBackend>(
    config: &FitConfig,
    device: &B::Device,
) -> SplatResult<ExperimentOutcome> {
    let scene = Scene::prepare(config)?;
    let observations = scene.observe::<B::InnerBackend>(device)?;
    info!(
        "Experiment: {} with {} splats, {} lines of {} samples, fixed {}",
        config.method,
        config.splats,
        scene.lines.len(),
        scene.samples.len(),
        config.fixed
    );

    let (fitted, final_loss, observation_mse) = match config.method {
        FitMethod::Gradient => {
            let model = SplatModel::<B>::from_params(&scene.initial, device);
            let fit = GradientTrainer::<B>::from_config(config, device.clone()).fit(
                model,
                &observations,
                &scene.samples,
            )?;
            let model = fit.model.valid();
            let errors = evaluate(&model, &observations, &scene.samples)?;
            (model.to_params()?, fit.final_loss, errors)
        }
        FitMethod::ClosedForm => {
            let model = SplatModel::<B::InnerBackend>::from_params(&scene.initial, device);
            let fit =
                ClosedFormFitter::from_config(config).fit(model, &observations, &scene.samples)?;
            let errors = evaluate(&fit.model, &observations, &scene.samples)?;
            (fit.model.to_params()?, fit.final_loss, errors)
        }
    };

    let mean_mse = observation_mse.iter().sum::<f32>() / observation_mse.len() as f32;
    info!("Mean reconstruction error over {} observations: {:.6}", observation_mse.len(), mean_mse);

    let report = FitReport {
        method: config.method,
        splats: config.splats,
        final_loss,
        observation_mse,
        mean_mse,
        colors: fitted.colors(),
        opacities: fitted.opacities(),
        ground_truth_colors: scene.ground_truth.colors(),
        ground_truth_opacities: scene.ground_truth.opacities(),
    };

    Ok(ExperimentOutcome {
        scene,
        observations,
        fitted,
        report,
    })
}
