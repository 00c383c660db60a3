//! Error types for rendering and fitting

use std::fmt;

use linesplat_core::GeometryError;
use thiserror::Error;

/// Result type for rendering and fitting operations
pub type SplatResult<T> = Result<T, SplatError>;

/// Parameter update that needs a matrix inverse
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStage {
    Color,
    Opacity,
}

impl fmt::Display for SolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStage::Color => write!(f, "color"),
            SolveStage::Opacity => write!(f, "opacity"),
        }
    }
}

/// Errors that can occur while building, rendering or fitting a scene
#[derive(Error, Debug)]
pub enum SplatError {
    #[error("ground truth scene with {0} splats is not implemented (only 2 or 3)")]
    GroundTruthNotImplemented(usize),

    #[error("fixed parameter groups require a reference model")]
    MissingReference,

    #[error("scene must contain at least one splat")]
    EmptyScene,

    #[error("expected {expected} splats, found {found}")]
    SplatCountMismatch { expected: usize, found: usize },

    #[error("{what} must have {expected} columns, found {found}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("no sample offsets to render")]
    NoSamples,

    #[error("observation has {found} samples, renderer produced {expected}")]
    SampleCountMismatch { expected: usize, found: usize },

    #[error("no observations to fit")]
    NoObservations,

    #[error("singular {stage} system at observation {observation}")]
    SingularSystem {
        stage: SolveStage,
        observation: usize,
    },

    #[error("unknown parameter group: {0}")]
    UnknownGroup(String),

    #[error("unknown fit method: {0}")]
    UnknownMethod(String),

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
