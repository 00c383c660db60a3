//! Line-scan rendering of 2D Gaussian splat scenes and the two fitters
//! built on it: per-group Adam on an autodiff backend, and alternating
//! closed-form color and opacity solves on a plain one.

pub mod activation;
pub mod closed_form;
pub mod config;
pub mod error;
pub mod experiment;
pub mod loss;
pub mod model;
pub mod observation;
pub mod params;
pub mod preview;
pub mod projection;
pub mod rasterizer;
pub mod schedule;
pub mod trainer;

mod progress;


pub use closed_form::{ClosedFormFit, ClosedFormFitter};
pub use config::{FitConfig, FitMethod, LearningRates, LineSweep, SampleRange};
pub use error::{SolveStage, SplatError, SplatResult};
pub use experiment::{run_experiment, ExperimentOutcome, FitReport, Scene};
pub use model::SplatModel;
pub use observation::{Observation, ObservationQueue};
pub use params::{FixedGroups, ParamGroup, SplatParams};
pub use rasterizer::{render_colors, render_line, RenderOutput};
pub use trainer::{GradientFit, GradientTrainer, GroupSettings, TrainingSetup};
