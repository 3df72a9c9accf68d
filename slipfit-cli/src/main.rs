//! slipfit-cli: Command-line interface for slipfit.
//!
//! Scores and refines detector panel geometry from a JSON session snapshot.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::redundant_closure_for_method_calls,
    clippy::too_many_lines
)]

mod session_file;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use slipfit_algorithms::{CalibrationSession, RefineMode};
use slipfit_core::{Crystallography, PanelId, RayTracePredictor, ScoringConfig, StoredPredictions};
use thiserror::Error;

use session_file::{resolve_panels, write_offsets_csv, write_powder_csv, SessionFile};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] slipfit_core::Error),

    #[error("no panel named '{0}'")]
    UnknownPanel(String),
}

/// Objective selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Peak-to-peak agreement within each image
    Intra,
    /// Peak-to-prediction agreement
    Inter,
}

impl From<Mode> for RefineMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Intra => RefineMode::Intra,
            Mode::Inter => RefineMode::Inter,
        }
    }
}

/// Prediction backend selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Predictor {
    /// Trace each reflection's scattering vector onto the live panels
    RayTrace,
    /// Use the positions stored with each reflection
    Stored,
}

impl Predictor {
    fn backend(self) -> Arc<dyn Crystallography> {
        match self {
            Predictor::RayTrace => Arc::new(RayTracePredictor),
            Predictor::Stored => Arc::new(StoredPredictions),
        }
    }
}

/// Panel detector geometry refinement.
#[derive(Parser)]
#[command(name = "slipfit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that scores panels.
#[derive(Args, Debug, Clone)]
struct ScoringArgs {
    /// Session snapshot (JSON)
    session: PathBuf,

    /// Panels to select, comma separated (default: all)
    #[arg(short, long, value_delimiter = ',')]
    panels: Vec<String>,

    /// Prediction backend for inter-panel scoring
    #[arg(long, value_enum, default_value = "ray-trace")]
    predictor: Predictor,

    /// Override the minimum reflection/peak intensity
    #[arg(long)]
    min_intensity: Option<f64>,

    /// Override the number of images used for pairing
    #[arg(long)]
    max_images: Option<usize>,

    /// Override the peak search window (pixels)
    #[arg(long)]
    window: Option<f64>,
}

impl ScoringArgs {
    fn apply(&self, mut config: ScoringConfig) -> Result<ScoringConfig> {
        if let Some(v) = self.min_intensity {
            config = config.with_min_intensity(v);
        }
        if let Some(v) = self.max_images {
            config = config.with_max_images(v);
        }
        if let Some(v) = self.window {
            config = config.with_match_window(v);
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads the snapshot and opens a session with the requested panels
    /// selected and their peaks gathered. `cycles` overrides the simplex
    /// iteration cap.
    fn open(&self, cycles: Option<usize>) -> Result<(SessionFile, CalibrationSession, Vec<PanelId>)> {
        let mut file = SessionFile::load(&self.session)?;
        if let Some(cycles) = cycles {
            file.refine.cycles = cycles;
        }
        let scoring = self.apply(file.scoring.clone())?;
        let arena = file.arena()?;
        let selected = resolve_panels(&arena, &self.panels)?;

        let mut session = CalibrationSession::with_crystallography(arena, self.predictor.backend())
            .with_scoring(scoring)?
            .with_refine_config(file.refine.clone());
        session.load_images(file.images.iter().cloned())?;
        select(&mut session, &selected)?;
        Ok((file, session, selected))
    }
}

fn select(session: &mut CalibrationSession, panels: &[PanelId]) -> Result<()> {
    session.clear_selection()?;
    for &id in panels {
        session.toggle_selection(id)?;
    }
    session.supply_images_to_selection()?;
    Ok(())
}

#[derive(Subcommand)]
enum Commands {
    /// Show the panels and images in a session snapshot
    Info {
        /// Session snapshot (JSON)
        session: PathBuf,
    },

    /// Score the selected panels
    Score {
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Objective to evaluate (default: both)
        #[arg(short, long, value_enum)]
        mode: Option<Mode>,
    },

    /// Refine the selected panels and write the refined snapshot
    Refine {
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Output snapshot path
        #[arg(short, long)]
        output: PathBuf,

        /// Objective to minimise
        #[arg(short, long, value_enum, default_value = "inter")]
        mode: Mode,

        /// Refinement rounds
        #[arg(long, default_value = "1")]
        rounds: usize,

        /// Refine each selected panel on its own instead of as one group
        #[arg(long)]
        per_panel: bool,

        /// Override the simplex iteration cap
        #[arg(long)]
        cycles: Option<usize>,
    },

    /// Histogram intra-image peak separations of the selected panels
    Powder {
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Write occupied bins as CSV instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Predicted-minus-observed offsets of the selected panels
    Offsets {
        #[command(flatten)]
        scoring: ScoringArgs,

        /// Write offsets as CSV instead of printing a summary
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Split panels into quadrants and write the new snapshot
    Split {
        /// Session snapshot (JSON)
        session: PathBuf,

        /// Panels to split, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        panels: Vec<String>,

        /// Output snapshot path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    match cli.command {
        Commands::Info { session } => {
            let file = SessionFile::load(&session)?;
            let arena = file.arena()?;

            println!("File: {}", session.display());
            println!("Panels: {}", arena.len());
            for panel in arena.iter() {
                let g = panel.backup();
                let centre = panel.centre();
                println!(
                    "  {:<12} {}x{} px, centre ({:.4}, {:.4}, {:.4}) m",
                    panel.name(),
                    g.width,
                    g.height,
                    centre.x,
                    centre.y,
                    centre.z
                );
            }

            let peaks: usize = file.images.iter().map(|im| im.peaks.len()).sum();
            let reflections: usize = file
                .images
                .iter()
                .flat_map(|im| &im.crystals)
                .map(|c| c.reflections.len())
                .sum();
            println!("Images: {}", file.images.len());
            println!("Peaks: {}", peaks);
            println!("Reflections: {}", reflections);
        }

        Commands::Score { scoring, mode } => {
            let (_, mut session, _) = scoring.open(None)?;
            println!("Selection: {}", session.describe_selection()?);
            if mode != Some(Mode::Inter) {
                println!("Intra-panel score: {:.6}", session.intra_score()?);
            }
            if mode != Some(Mode::Intra) {
                println!("Inter-panel score: {:.6}", session.inter_score()?);
            }
        }

        Commands::Refine {
            scoring,
            output,
            mode,
            rounds,
            per_panel,
            cycles,
        } => {
            let (mut file, mut session, selected) = scoring.open(cycles)?;

            let targets: Vec<Vec<PanelId>> = if per_panel {
                selected.iter().map(|&id| vec![id]).collect()
            } else {
                vec![selected]
            };

            let start = Instant::now();
            let mut accepted = 0usize;
            for round in 1..=rounds {
                for target in &targets {
                    select(&mut session, target)?;
                    let label = session.describe_selection()?;
                    let report = session.refine(mode.into())?;

                    if report.final_score < report.initial_score {
                        session.accept()?;
                        accepted += 1;
                        info!(
                            "round {round}: {label}: {:.4} -> {:.4} accepted",
                            report.initial_score, report.final_score
                        );
                    } else {
                        session.discard()?;
                        info!("round {round}: {label}: no improvement");
                    }
                }
            }

            file.update_panels(&session.panels().read());
            file.save(&output)?;

            println!(
                "Refined {} group(s) over {} round(s) in {:.2}s, {} accepted",
                targets.len(),
                rounds,
                start.elapsed().as_secs_f64(),
                accepted
            );
            println!("Wrote: {}", output.display());
        }

        Commands::Powder { scoring, output } => {
            let (_, mut session, _) = scoring.open(None)?;
            let histogram = session.powder(true)?;
            if histogram.total() == 0 {
                warn!("no peak pairs fell inside the histogram range");
            }
            match output {
                Some(path) => {
                    write_powder_csv(&path, &histogram)?;
                    println!("Wrote: {}", path.display());
                }
                None => {
                    println!("{:<12} | {:<8}", "q (1/A)", "count");
                    println!("{:-<23}", "");
                    for (q, count) in histogram.occupied() {
                        println!("{:<12.6} | {:<8}", q, count);
                    }
                }
            }
        }

        Commands::Offsets { scoring, output } => {
            let (_, mut session, _) = scoring.open(None)?;
            let offsets = session.target_offsets(false)?;
            match output {
                Some(path) => {
                    write_offsets_csv(&path, &offsets)?;
                    println!("Wrote: {}", path.display());
                }
                None => {
                    println!("Pairings: {}", offsets.len());
                    if !offsets.is_empty() {
                        let n = offsets.len() as f64;
                        let mean_fs = offsets.iter().map(|o| o[0]).sum::<f64>() / n;
                        let mean_ss = offsets.iter().map(|o| o[1]).sum::<f64>() / n;
                        let rms = (offsets.iter().map(|o| o[0] * o[0] + o[1] * o[1]).sum::<f64>()
                            / n)
                            .sqrt();
                        println!("Mean offset: ({:.3}, {:.3}) px", mean_fs, mean_ss);
                        println!("RMS offset: {:.3} px", rms);
                    }
                }
            }
        }

        Commands::Split {
            session,
            panels,
            output,
        } => {
            let mut file = SessionFile::load(&session)?;
            let mut arena = file.arena()?;
            for id in resolve_panels(&arena, &panels)? {
                let quadrants = arena.split(id)?;
                println!(
                    "Split {} into panels {}..={}",
                    arena.get(id)?.name(),
                    quadrants[0].0,
                    quadrants[3].0
                );
            }
            file.update_panels(&arena);
            file.save(&output)?;
            println!("Wrote: {}", output.display());
        }
    }

    Ok(())
}
