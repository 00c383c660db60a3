//! Gradient-descent fitting with one Adam optimizer per parameter group

use std::collections::BTreeMap;

use burn::module::Param;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use tracing::{debug, info};

use crate::config::{FitConfig, LearningRates};
use crate::error::{SplatError, SplatResult};
use crate::loss::mse_loss;
use crate::model::SplatModel;
use crate::observation::{Observation, ObservationQueue};
use crate::params::{FixedGroups, ParamGroup};
use crate::progress::progress_bar;
use crate::rasterizer::render_line;
use crate::schedule::ExponentialLr;

/// Adam epsilon shared by every group
pub const ADAM_EPSILON: f32 = 1e-15;

/// Learning rate and freeze flag of one parameter group
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupSettings {
    pub learning_rate: f64,
    pub frozen: bool,
}

/// Per-group optimizer settings, evaluated once before fitting
#[derive(Clone, Debug)]
pub struct TrainingSetup {
    groups: BTreeMap<ParamGroup, GroupSettings>,
    /// Decay for the center group, applied only when `schedule_xy` is set
    pub xy_schedule: ExponentialLr,
    pub schedule_xy: bool,
}

impl TrainingSetup {
    /// Frozen groups get a zero learning rate
    pub fn new(rates: &LearningRates, fixed: &FixedGroups, iterations: usize) -> Self {
        let groups = ParamGroup::ALL
            .into_iter()
            .map(|group| {
                let frozen = fixed.contains(group);
                let learning_rate = if frozen { 0.0 } else { rates.get(group) };
                (group, GroupSettings { learning_rate, frozen })
            })
            .collect();

        Self {
            groups,
            xy_schedule: ExponentialLr::for_centers(iterations),
            schedule_xy: false,
        }
    }

    pub fn from_config(config: &FitConfig) -> Self {
        let mut setup = Self::new(&config.learning_rates, &config.fixed, config.iterations);
        setup.schedule_xy = config.schedule_xy;
        setup
    }

    pub fn group(&self, group: ParamGroup) -> GroupSettings {
        self.groups.get(&group).copied().unwrap_or(GroupSettings {
            learning_rate: 0.0,
            frozen: true,
        })
    }

    /// Learning rate of `group` at `step`
    pub fn learning_rate(&self, group: ParamGroup, step: usize) -> f64 {
        let settings = self.group(group);
        if settings.frozen {
            return 0.0;
        }
        if group == ParamGroup::Xy && self.schedule_xy {
            return self.xy_schedule.at(step);
        }
        settings.learning_rate
    }

    /// True when `group` receives optimizer steps at `step`
    pub fn is_active(&self, group: ParamGroup, step: usize) -> bool {
        self.learning_rate(group, step) > 0.0
    }
}

/// Result of a gradient run
#[derive(Debug)]
pub struct GradientFit<B: AutodiffBackend> {
    pub model: SplatModel<B>,
    /// Loss of the last step
    pub final_loss: f32,
    pub best_loss: f32,
    /// Passes over the observations started by the work queue
    pub passes: usize,
}

/// Fits a model to observations by backpropagating the pixel MSE
pub struct GradientTrainer<B: AutodiffBackend> {
    setup: TrainingSetup,
    iterations: usize,
    log_interval: usize,
    seed: u64,
    device: B::Device,
}

impl<B: AutodiffBackend> GradientTrainer<B> {
    pub fn new(setup: TrainingSetup, iterations: usize, device: B::Device) -> Self {
        Self {
            setup,
            iterations,
            log_interval: 50,
            seed: 0,
            device,
        }
    }

    pub fn from_config(config: &FitConfig, device: B::Device) -> Self {
        Self::new(TrainingSetup::from_config(config), config.iterations, device)
            .with_log_interval(config.log_interval)
            .with_seed(config.seed)
    }

    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn setup(&self) -> &TrainingSetup {
        &self.setup
    }

    /// Run the full iteration budget
    pub fn fit(
        &self,
        mut model: SplatModel<B>,
        observations: &[Observation],
        samples: &[f32],
    ) -> SplatResult<GradientFit<B>> {
        let mut queue = ObservationQueue::new(observations.len(), self.seed)?;
        if let Some(obs) = observations.iter().find(|o| o.num_samples() != samples.len()) {
            return Err(SplatError::SampleCountMismatch {
                expected: samples.len(),
                found: obs.num_samples(),
            });
        }

        info!(
            "Gradient fit: {} splats, {} observations, {} iterations",
            model.num_splats(),
            observations.len(),
            self.iterations
        );
        for group in ParamGroup::ALL {
            let settings = self.setup.group(group);
            debug!("{}: lr={} frozen={}", group, settings.learning_rate, settings.frozen);
        }

        let adam = AdamConfig::new().with_epsilon(ADAM_EPSILON);
        let mut optim_xy = adam.init::<B, Param<Tensor<B, 2>>>();
        let mut optim_rgb = adam.init::<B, Param<Tensor<B, 2>>>();
        let mut optim_scaling = adam.init::<B, Param<Tensor<B, 2>>>();
        let mut optim_rotation = adam.init::<B, Param<Tensor<B, 2>>>();
        let mut optim_opacity = adam.init::<B, Param<Tensor<B, 2>>>();

        let pb = progress_bar(self.iterations as u64);
        let mut final_loss = f32::NAN;
        let mut best_loss = f32::INFINITY;

        for iter in 0..self.iterations {
            let observation = &observations[queue.next_index()];
            let target = observation.target::<B>(&self.device);

            let rendered = render_line(&model, samples, &observation.line)?;
            let loss = mse_loss(rendered.colors, target);
            let loss_val = loss.clone().into_scalar().elem::<f32>();
            final_loss = loss_val;
            best_loss = best_loss.min(loss_val);

            let mut grads = loss.backward();

            let lr = |group| self.setup.learning_rate(group, iter);
            if self.setup.is_active(ParamGroup::Xy, iter) {
                model.xy = step_group(&mut optim_xy, lr(ParamGroup::Xy), model.xy, &mut grads);
            }
            if self.setup.is_active(ParamGroup::Rgb, iter) {
                model.rgb = step_group(&mut optim_rgb, lr(ParamGroup::Rgb), model.rgb, &mut grads);
            }
            if self.setup.is_active(ParamGroup::Scale, iter) {
                let group_lr = lr(ParamGroup::Scale);
                model.scaling = step_group(&mut optim_scaling, group_lr, model.scaling, &mut grads);
            }
            if self.setup.is_active(ParamGroup::Rotation, iter) {
                let group_lr = lr(ParamGroup::Rotation);
                model.rotation = step_group(&mut optim_rotation, group_lr, model.rotation, &mut grads);
            }
            if self.setup.is_active(ParamGroup::Opacity, iter) {
                let group_lr = lr(ParamGroup::Opacity);
                model.opacity = step_group(&mut optim_opacity, group_lr, model.opacity, &mut grads);
            }
            // remaining gradients of frozen groups are dropped here
            drop(grads);

            if iter % self.log_interval == 0 {
                pb.set_message(format!("{:.6}", loss_val));
                debug!("iter {} loss={:.6}", iter, loss_val);
            }
            pb.inc(1);
        }

        pb.finish_with_message(format!("final={:.6}", final_loss));
        info!(
            "Gradient fit done: final loss {:.6}, best {:.6}, {} passes",
            final_loss,
            best_loss,
            queue.passes()
        );

        Ok(GradientFit {
            model,
            final_loss,
            best_loss,
            passes: queue.passes(),
        })
    }
}

/// One optimizer step on a single parameter tensor
fn step_group<B, O>(
    optim: &mut O,
    lr: f64,
    param: Param<Tensor<B, 2>>,
    grads: &mut B::Gradients,
) -> Param<Tensor<B, 2>>
where
    B: AutodiffBackend,
    O: Optimizer<Param<Tensor<B, 2>>, B>,
{
    let group_grads = GradientsParams::from_module(grads, &param);
    optim.step(lr, param, group_grads)
}
