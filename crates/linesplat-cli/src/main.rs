use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::backend::{Autodiff, NdArray};
use clap::{Parser, Subcommand};
use glam::Vec2;
use tracing::info;

use linesplat_core::ScanLine;
use linesplat_train::observation::sample_offsets;
use linesplat_train::preview::{line_strip, side_by_side, ScenePreview};
use linesplat_train::{
    render_colors, run_experiment, ExperimentOutcome, FitConfig, FitMethod, FixedGroups, SplatModel,
    SplatParams,
};

type Backend = NdArray<f32>;
type TrainBackend = Autodiff<Backend>;

const STRIP_HEIGHT: u32 = 24;
const PREVIEW_SIZE: u32 = 256;
const GAP: u32 = 10;

#[derive(Parser)]
#[command(name = "linesplat")]
#[command(about = "Fit 2D Gaussian splat scenes to line-scan observations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate observations from a ground-truth scene and fit a model to them
    Fit {
        /// JSON config; flags below override its fields
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// "gd" / "gradient" or "em" / "closed-form"
        #[arg(short, long)]
        method: Option<FitMethod>,

        #[arg(short = 'n', long)]
        splats: Option<usize>,

        /// Gradient steps
        #[arg(long)]
        iterations: Option<usize>,

        /// Closed-form passes
        #[arg(long)]
        passes: Option<usize>,

        /// Comma-separated groups copied from the ground truth, or "none"
        #[arg(long)]
        fixed: Option<String>,

        #[arg(long)]
        seed: Option<u64>,

        /// Draw a random ground-truth scene
        #[arg(long)]
        random_ground_truth: bool,

        /// Decay the center learning rate over the run
        #[arg(long)]
        schedule_xy: bool,

        /// Directory for previews and the report
        #[arg(short, long, default_value = "fig")]
        output: PathBuf,

        /// Skip writing preview images
        #[arg(long)]
        no_images: bool,

        /// Print the effective config as JSON and exit
        #[arg(long)]
        dump_config: bool,
    },

    /// Render the ground-truth scene along one line and print the samples
    Render {
        #[arg(short = 'n', long, default_value = "3")]
        splats: usize,

        /// Line normal as "x,y"; normalized before use
        #[arg(long, default_value = "1,0")]
        normal: String,

        /// Line offset b in n·p + b = 0
        #[arg(long, default_value = "-3.5", allow_hyphen_values = true)]
        bias: f32,

        #[arg(long, default_value = "-6", allow_hyphen_values = true)]
        xmin: f32,

        #[arg(long, default_value = "6", allow_hyphen_values = true)]
        xmax: f32,

        #[arg(long, default_value = "0.05")]
        step: f32,

        /// Also save the scan as a color strip
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_normal(text: &str) -> Result<Vec2> {
    let parts: Vec<f32> = text
        .split(',')
        .map(|s| s.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid normal {:?}", text))?;
    if parts.len() != 2 {
        bail!("normal must have two components, got {}", parts.len());
    }
    Ok(Vec2::new(parts[0], parts[1]))
}

fn write_previews(outcome: &ExperimentOutcome, output: &Path) -> Result<()> {
    let scene = &outcome.scene;
    let preview = ScenePreview::covering(
        &[&scene.ground_truth, &scene.initial, &outcome.fitted],
        PREVIEW_SIZE,
    );

    preview.render(&scene.initial, None).save(output.join("plot_init.png"))?;
    preview.render(&scene.ground_truth, None).save(output.join("plot_init_gt.png"))?;

    let device = Default::default();
    let fitted = SplatModel::<Backend>::from_params(&outcome.fitted, &device);

    for (i, observation) in outcome.observations.iter().enumerate() {
        let line = &observation.line;
        let plot = side_by_side(
            &preview.render(&outcome.fitted, Some(line)),
            &preview.render(&scene.ground_truth, Some(line)),
            GAP,
        );
        plot.save(output.join(format!("plot{:03}.png", i)))?;

        let predicted = render_colors(&fitted, &scene.samples, line)?;
        let strip = side_by_side(
            &line_strip(&observation.colors, STRIP_HEIGHT),
            &line_strip(&predicted, STRIP_HEIGHT),
            GAP,
        );
        strip.save(output.join(format!("render{:03}.png", i)))?;
    }

    info!("Wrote previews for {} lines to {:?}", outcome.observations.len(), output);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fit {
            config,
            method,
            splats,
            iterations,
            passes,
            fixed,
            seed,
            random_ground_truth,
            schedule_xy,
            output,
            no_images,
            dump_config,
        } => {
            let mut config = match (&config, method) {
                (Some(path), _) => {
                    FitConfig::load(path).with_context(|| format!("loading {:?}", path))?
                }
                (None, Some(FitMethod::Gradient)) => FitConfig::gradient(),
                (None, _) => FitConfig::default(),
            };

            if let Some(method) = method {
                config.method = method;
            }
            if let Some(splats) = splats {
                config.splats = splats;
            }
            if let Some(iterations) = iterations {
                config.iterations = iterations;
            }
            if let Some(passes) = passes {
                config.passes = passes;
            }
            if let Some(fixed) = fixed {
                config.fixed = FixedGroups::parse_list(&fixed)?;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            config.random_ground_truth |= random_ground_truth;
            config.schedule_xy |= schedule_xy;

            if config.splats == 0 {
                bail!("--splats must be at least 1");
            }

            if dump_config {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            std::fs::create_dir_all(&output)?;
            config.save(&output.join("config.json"))?;

            let outcome = run_experiment::<TrainBackend>(&config, &Default::default())?;
            outcome.write_report(&output.join("report.json"))?;

            println!("Method:      {}", outcome.report.method);
            println!("Final loss:  {:.6}", outcome.report.final_loss);
            println!("Mean MSE:    {:.6}", outcome.report.mean_mse);
            for (i, (color, opacity)) in outcome
                .report
                .colors
                .iter()
                .zip(&outcome.report.opacities)
                .enumerate()
            {
                let gt_color = outcome.report.ground_truth_colors[i];
                let gt_opacity = outcome.report.ground_truth_opacities[i];
                println!(
                    "  splat {}: rgb=({:.3}, {:.3}, {:.3}) opacity={:.3}   \
                     gt rgb=({:.3}, {:.3}, {:.3}) opacity={:.3}",
                    i,
                    color[0],
                    color[1],
                    color[2],
                    opacity,
                    gt_color[0],
                    gt_color[1],
                    gt_color[2],
                    gt_opacity
                );
            }

            if !no_images {
                write_previews(&outcome, &output)?;
            }
        }

        Commands::Render {
            splats,
            normal,
            bias,
            xmin,
            xmax,
            step,
            output,
        } => {
            let line = ScanLine::new(parse_normal(&normal)?, bias)?;
            let samples = sample_offsets(xmin, xmax, step);
            if samples.is_empty() {
                bail!("empty sample range [{}, {}) with step {}", xmin, xmax, step);
            }

            let params = SplatParams::ground_truth(splats)?;
            let model = SplatModel::<Backend>::from_params(&params, &Default::default());
            let colors = render_colors(&model, &samples, &line)?;

            println!("# offset r g b");
            for (offset, c) in samples.iter().zip(&colors) {
                println!("{:.3} {:.5} {:.5} {:.5}", offset, c[0], c[1], c[2]);
            }

            if let Some(path) = output {
                line_strip(&colors, STRIP_HEIGHT).save(&path)?;
                info!("Saved strip to {:?}", path);
            }
        }
    }

    Ok(())
}
