use anyhow::Result;
use clap::{Parser, Subcommand};
use spt_squares::config::{AnalysisParams, NeighbourMode};

#[derive(Parser, Debug)]
#[command(
    name = "spt-squares",
    about = "Square-grid attribute computation and selection for single-particle-tracking recordings",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process one recording's track table and write its squares bundle.
    ProcessRecording(ProcessRecordingArgs),
    /// Process all recordings of an experiment manifest in parallel.
    ProcessExperiment(ProcessExperimentArgs),
}

#[derive(Parser, Debug)]
struct CommonArgs {
    /// Output directory (created if missing).
    #[arg(long)]
    out: String,

    /// Total number of grid squares per recording. Must be a perfect square.
    #[arg(long, default_value_t = 400)]
    squares: usize,

    /// Minimum number of tracks a population needs before a Tau fit is attempted.
    #[arg(long, default_value_t = 20)]
    min_tracks_for_tau: usize,

    /// Minimum R² for a Tau fit to count as successful (and for selection).
    #[arg(long, default_value_t = 0.1)]
    min_r_squared: f64,

    /// Minimum density ratio over background for a square to be selected.
    #[arg(long, default_value_t = 2.0)]
    min_density_ratio: f64,

    /// Maximum allowed spatial variability for a square to be selected.
    #[arg(long, default_value_t = 10.0)]
    max_variability: f64,

    /// Neighbour constraint on selection: free, relaxed, or strict.
    #[arg(long, default_value = "free")]
    neighbour_mode: String,

    /// Fraction of squares (floored) averaged for the background estimate.
    #[arg(long, default_value_t = 0.1)]
    background_fraction: f64,

    /// Explicit square count for the ordinal background variant.
    #[arg(long, default_value_t = 10)]
    background_squares: usize,

    /// Sub-grid dimension used by the spatial variability estimator.
    #[arg(long, default_value_t = 10)]
    granularity: usize,

    /// Concentration factor used in density normalization.
    #[arg(long, default_value_t = 1.0)]
    concentration: f64,

    /// Number of threads (rayon worker threads).
    #[arg(long, default_value_t = 1)]
    threads: usize,
}

#[derive(Parser, Debug)]
struct ProcessRecordingArgs {
    /// Track table (CSV/TSV, optionally .gz, or Parquet).
    /// Required columns: track_id, x_um, y_um, duration.
    #[arg(long)]
    tracks: String,

    /// Recording name (defaults to the track file's stem).
    #[arg(long)]
    name: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
struct ProcessExperimentArgs {
    /// Experiment manifest (JSON) listing recordings, track paths and concentrations.
    #[arg(long)]
    manifest: String,

    #[command(flatten)]
    common: CommonArgs,
}

fn params_from(common: &CommonArgs) -> Result<AnalysisParams> {
    let neighbour_mode: NeighbourMode = common.neighbour_mode.parse()?;
    Ok(AnalysisParams {
        number_of_squares: common.squares,
        min_tracks_for_tau: common.min_tracks_for_tau,
        min_required_r_squared: common.min_r_squared,
        min_required_density_ratio: common.min_density_ratio,
        max_allowable_variability: common.max_variability,
        neighbour_mode,
        background_fraction: common.background_fraction,
        background_square_count: common.background_squares,
        variability_granularity: common.granularity,
        concentration: common.concentration,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::ProcessRecording(args) => {
            let params = params_from(&args.common)?;
            spt_squares::process_recording(spt_squares::ProcessRecordingConfig {
                tracks_path: args.tracks,
                out_dir: args.common.out,
                recording_name: args.name,
                threads: args.common.threads,
                params,
            })
        }
        Commands::ProcessExperiment(args) => {
            let params = params_from(&args.common)?;
            spt_squares::process_experiment(spt_squares::ProcessExperimentConfig {
                manifest_path: args.manifest,
                out_dir: args.common.out,
                threads: args.common.threads,
                params,
            })
        }
    }
}
