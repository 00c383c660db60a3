//! Synthetic line-scan observations

use burn::prelude::*;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use linesplat_core::ScanLine;

use crate::config::LineSweep;
use crate::error::{SplatError, SplatResult};
use crate::model::{matrix, SplatModel};
use crate::rasterizer::render_colors;

/// One rendered line of the ground-truth scene
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub line: ScanLine,
    /// Composited color per sample offset
    pub colors: Vec<[f32; 3]>,
}

impl Observation {
    pub fn num_samples(&self) -> usize {
        self.colors.len()
    }

    /// Stored colors as a [k, 3] tensor
    pub fn target<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let flat: Vec<f32> = self.colors.iter().flatten().copied().collect();
        matrix(flat, 3, device)
    }
}

/// Offsets `xmin, xmin + step, ...` strictly below `xmax`
///
/// Empty when the range is empty or `step` is not positive.
pub fn sample_offsets(xmin: f32, xmax: f32, step: f32) -> Vec<f32> {
    if !(step > 0.0) || !(xmax > xmin) {
        return Vec::new();
    }
    // tolerance keeps 12 / 0.05 at 240 despite f32 rounding of the step
    let span = (xmax as f64 - xmin as f64) / step as f64;
    let count = (span - 1e-9).ceil().max(0.0) as usize;
    (0..count)
        .map(|i| (xmin as f64 + i as f64 * step as f64) as f32)
        .collect()
}

fn linspace(start: f32, end: f32, count: usize) -> Vec<f32> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..count)
            .map(|i| start + (end - start) * i as f32 / (count - 1) as f32)
            .collect(),
    }
}

/// Build the observation lines of a sweep
///
/// Normal components run in opposite directions across the sweep, so the
/// lines fan out between the two diagonals `(1, 3)` and `(3, 1)` by default.
pub fn line_sweep<R: Rng>(sweep: &LineSweep, rng: &mut R) -> SplatResult<Vec<ScanLine>> {
    let xs = linspace(sweep.slope_min, sweep.slope_max, sweep.count);
    let ys = linspace(sweep.slope_max, sweep.slope_min, sweep.count);

    xs.into_iter()
        .zip(ys)
        .map(|(x, y)| {
            let bias = rng.gen::<f32>() * sweep.bias_span + sweep.bias_min;
            Ok(ScanLine::new(Vec2::new(x, y), bias)?)
        })
        .collect()
}

/// Render `model` once per line
pub fn generate_observations<B: Backend>(
    model: &SplatModel<B>,
    lines: &[ScanLine],
    samples: &[f32],
) -> SplatResult<Vec<Observation>> {
    let observations = lines
        .iter()
        .map(|line| {
            Ok(Observation {
                line: *line,
                colors: render_colors(model, samples, line)?,
            })
        })
        .collect::<SplatResult<Vec<_>>>()?;

    debug!(
        "Generated {} observations with {} samples each",
        observations.len(),
        samples.len()
    );
    Ok(observations)
}

/// Shuffled work queue over observation indices
///
/// Every index is handed out once per pass. An exhausted queue refills and
/// reshuffles itself.
#[derive(Debug)]
pub struct ObservationQueue {
    len: usize,
    pending: Vec<usize>,
    passes: usize,
    rng: StdRng,
}

impl ObservationQueue {
    pub fn new(len: usize, seed: u64) -> SplatResult<Self> {
        if len == 0 {
            return Err(SplatError::NoObservations);
        }
        Ok(Self {
            len,
            pending: Vec::with_capacity(len),
            passes: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Next observation index
    pub fn next_index(&mut self) -> usize {
        if self.pending.is_empty() {
            self.pending.extend(0..self.len);
            self.pending.shuffle(&mut self.rng);
            self.passes += 1;
        }
        // refilled above, never empty here
        self.pending.pop().unwrap_or(0)
    }

    /// Number of passes started so far
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Indices left in the current pass
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    use crate::model::tensor_to_vec;
    use crate::params::SplatParams;
    use crate::rasterizer::render_line;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_sample_offsets_default_range() {
        let samples = sample_offsets(-6.0, 6.0, 0.05);
        assert_eq!(samples.len(), 240);
        assert_relative_eq!(samples[0], -6.0);
        assert_relative_eq!(samples[1], -5.95, epsilon = 1e-6);
        assert_relative_eq!(samples[239], 5.95, epsilon = 1e-5);
    }

    #[test]
    fn test_sample_offsets_excludes_end() {
        assert_eq!(sample_offsets(-3.0, 3.0, 0.5).len(), 12);
        let thirds = sample_offsets(0.0, 1.0, 0.3);
        assert_eq!(thirds.len(), 4);
        assert_relative_eq!(thirds[3], 0.9, epsilon = 1e-6);
        assert!(sample_offsets(1.0, 1.0, 0.1).is_empty());
        assert!(sample_offsets(0.0, 1.0, 0.0).is_empty());
        assert!(sample_offsets(2.0, 1.0, 0.1).is_empty());
    }

    #[test]
    fn test_line_sweep() {
        let mut rng = StdRng::seed_from_u64(3);
        let lines = line_sweep(&LineSweep::default(), &mut rng).unwrap();
        assert_eq!(lines.len(), 25);

        let first = lines[0].normal;
        let inv_sqrt10 = 1.0 / 10f32.sqrt();
        assert_relative_eq!(first.x, inv_sqrt10, epsilon = 1e-6);
        assert_relative_eq!(first.y, 3.0 * inv_sqrt10, epsilon = 1e-6);
        let middle = lines[12].normal;
        assert_relative_eq!(middle.x, middle.y, epsilon = 1e-6);
        let last = lines[24].normal;
        assert_relative_eq!(last.x, 3.0 * inv_sqrt10, epsilon = 1e-6);

        for line in &lines {
            assert_relative_eq!(line.normal.length(), 1.0, epsilon = 1e-6);
            assert!((1.0..5.0).contains(&line.bias));
        }
    }

    #[test]
    fn test_line_sweep_is_seeded() {
        let sweep = LineSweep {
            count: 4,
            ..LineSweep::default()
        };
        let a = line_sweep(&sweep, &mut StdRng::seed_from_u64(11)).unwrap();
        let b = line_sweep(&sweep, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(a, b);
        let empty = LineSweep { count: 0, ..sweep };
        assert!(line_sweep(&empty, &mut StdRng::seed_from_u64(1)).unwrap().is_empty());
    }

    #[test]
    fn test_generate_observations() {
        let device = Default::default();
        let gt = SplatParams::ground_truth(3).unwrap();
        let model = SplatModel::<TestBackend>::from_params(&gt, &device);
        let samples = sample_offsets(-6.0, 6.0, 0.1);
        let lines = vec![
            ScanLine::new(Vec2::new(1.0, 3.0), 2.0).unwrap(),
            ScanLine::new(Vec2::new(3.0, 1.0), 4.0).unwrap(),
        ];

        let observations = generate_observations(&model, &lines, &samples).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].num_samples(), samples.len());
        assert_eq!(observations[1].line, lines[1]);

        let target = observations[0].target::<TestBackend>(&device);
        assert_eq!(target.dims(), [samples.len(), 3]);
        let rendered = render_line(&model, &samples, &lines[0]).unwrap();
        let rendered = tensor_to_vec(rendered.colors).unwrap();
        assert_eq!(tensor_to_vec(target).unwrap(), rendered);
    }

    #[test]
    fn test_queue_visits_each_index_once_per_pass() {
        let mut queue = ObservationQueue::new(5, 42).unwrap();
        for pass in 1..=3 {
            let mut seen: Vec<usize> = (0..5).map(|_| queue.next_index()).collect();
            assert_eq!(queue.passes(), pass);
            assert_eq!(queue.remaining(), 0);
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_queue_reshuffles() {
        let mut queue = ObservationQueue::new(12, 7).unwrap();
        let passes: Vec<Vec<usize>> = (0..4)
            .map(|_| (0..12).map(|_| queue.next_index()).collect())
            .collect();
        assert!(passes.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_empty_queue_rejected() {
        assert!(matches!(ObservationQueue::new(0, 0), Err(SplatError::NoObservations)));
    }
}
