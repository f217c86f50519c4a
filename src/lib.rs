use anyhow::{anyhow, Context, Result};

pub mod config;
pub mod grid;
pub mod io;
pub mod squares;

/// Side length of the (square) imaging area: 512 px at 0.1602804 µm/px.
pub const IMAGE_EXTENT_UM: f64 = 82.0864;

/// Standard observation window of one recording, in seconds.
pub const RECORDING_DURATION_S: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct ProcessRecordingConfig {
    pub tracks_path: String,
    pub out_dir: String,
    pub recording_name: Option<String>,
    pub threads: usize,
    pub params: config::AnalysisParams,
}

#[derive(Debug, Clone)]
pub struct ProcessExperimentConfig {
    pub manifest_path: String,
    pub out_dir: String,
    pub threads: usize,
    pub params: config::AnalysisParams,
}

pub fn process_recording(cfg: ProcessRecordingConfig) -> Result<()> {
    cfg.params.validate()?;
    let pool = build_pool(cfg.threads)?;

    pool.install(|| {
        crate::squares::pipeline::process_recording(crate::squares::pipeline::PipelineConfig {
            tracks_path: cfg.tracks_path,
            out_dir: cfg.out_dir,
            recording_name: cfg.recording_name,
            params: cfg.params,
        })
    })
}

pub fn process_experiment(cfg: ProcessExperimentConfig) -> Result<()> {
    cfg.params.validate()?;
    let pool = build_pool(cfg.threads)?;

    pool.install(|| {
        crate::squares::pipeline::process_experiment(crate::squares::pipeline::ExperimentConfig {
            manifest_path: cfg.manifest_path,
            out_dir: cfg.out_dir,
            params: cfg.params,
        })
    })
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool> {
    if threads == 0 {
        return Err(anyhow!("--threads must be >= 1"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("failed creating rayon thread pool")
}
