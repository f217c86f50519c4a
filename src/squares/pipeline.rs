use crate::config::AnalysisParams;
use crate::grid::assign::assign_tracks;
use crate::grid::layout::GridLayout;
use crate::io::tracks::{read_tracks, Track};
use crate::io::tsv::{na_f64, na_usize};
use crate::squares::background::{density, density_ratio, estimate_background, sparsest_mean};
use crate::squares::fit::{estimate_tau, TauEstimate};
use crate::squares::select::apply_selection;
use crate::squares::variability::variability;
use crate::squares::{Recording, RecordingStats, Square, SquareMetrics};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub tracks_path: String,
    pub out_dir: String,
    pub recording_name: Option<String>,
    pub params: AnalysisParams,
}

#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub manifest_path: String,
    pub out_dir: String,
    pub params: AnalysisParams,
}

/// Extension point invoked after each square's decay fit, before selection.
/// An external collaborator can hang per-square diagnostics (e.g. fit plots)
/// here; the engine itself never renders anything.
pub trait SquareFitHook: Sync {
    fn on_square_fit(
        &self,
        recording: &str,
        square_number: usize,
        tracks: &[Track],
        members: &[usize],
        fit: &TauEstimate,
    ) {
        let _ = (recording, square_number, tracks, members, fit);
    }
}

pub struct NoopHook;

impl SquareFitHook for NoopHook {}

/// Runs the full per-recording pass: grid, assignment, per-square attributes,
/// selection, then recording-level aggregation over the selected squares.
///
/// A pathological square (failed fit, empty, anomalous tracks) never aborts
/// the recording; its attributes carry NaN/sentinel values instead.
pub fn analyze_recording(
    name: &str,
    experiment: Option<&str>,
    tracks: Vec<Track>,
    concentration: f64,
    params: &AnalysisParams,
    hook: &dyn SquareFitHook,
) -> Result<Recording> {
    let layout = GridLayout::new(
        params.number_of_squares,
        crate::IMAGE_EXTENT_UM,
        crate::IMAGE_EXTENT_UM,
    )?;

    let assignment = assign_tracks(&tracks, &layout);
    let counts = assignment.track_counts();

    // Both background conventions are kept: the fraction-driven mean feeds
    // density_ratio, the explicit-count mean feeds density_ratio_ori.
    let bg = estimate_background(&counts, params.background_fraction);
    let bg_ori = sparsest_mean(&counts, params.background_square_count);

    let cell_area = layout.cell_area_um2();
    let metrics: Vec<SquareMetrics> = (0..layout.square_count())
        .into_par_iter()
        .map(|sq| -> Result<SquareMetrics> {
            let members = &assignment.tracks_by_square[sq];
            let durations: Vec<f64> = members.iter().map(|&ti| tracks[ti].duration_s).collect();

            let tau = estimate_tau(
                &durations,
                params.min_tracks_for_tau,
                params.min_required_r_squared,
            );
            hook.on_square_fit(name, sq, &tracks, members, &tau);

            Ok(SquareMetrics {
                track_count: counts[sq],
                tau,
                variability: variability(
                    &tracks,
                    members,
                    layout.bounds(sq),
                    params.variability_granularity,
                ),
                density: density(
                    counts[sq],
                    cell_area,
                    crate::RECORDING_DURATION_S,
                    concentration,
                )?,
                density_ratio: density_ratio(counts[sq], bg.mean_track_count),
                density_ratio_ori: density_ratio(counts[sq], bg_ori.mean_track_count),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut squares: Vec<Square> = metrics
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            let (row, col) = layout.row_col(i);
            Square {
                square_number: i,
                row,
                col,
                bounds: layout.bounds(i),
                track_indices: assignment.tracks_by_square[i].clone(),
                metrics: m,
                selected: false,
                label_number: None,
            }
        })
        .collect();

    // Selection reads sibling metrics (neighbour modes), so it runs strictly
    // after the per-square phase has finished for every square.
    apply_selection(&mut squares, &layout, params);

    // Recording aggregates: the same fitter/estimator over the pooled tracks
    // of the selected squares; background stats over the full square set.
    let pooled: Vec<usize> = squares
        .iter()
        .filter(|s| s.selected)
        .flat_map(|s| s.track_indices.iter().copied())
        .collect();
    let pooled_durations: Vec<f64> = pooled.iter().map(|&ti| tracks[ti].duration_s).collect();
    let pooled_tau = estimate_tau(
        &pooled_durations,
        params.min_tracks_for_tau,
        params.min_required_r_squared,
    );
    let pooled_density = density(
        pooled.len() as u64,
        layout.image_area_um2(),
        crate::RECORDING_DURATION_S,
        concentration,
    )?;

    let stats = RecordingStats {
        tau: pooled_tau,
        density: pooled_density,
        background_square_count: bg.square_indices.len(),
        background_total_tracks: bg.total_tracks,
        background_mean_track_count: bg.mean_track_count,
    };

    Ok(Recording {
        name: name.to_string(),
        experiment: experiment.map(str::to_string),
        concentration,
        out_of_bounds_tracks: assignment.out_of_bounds.len(),
        square_of_track: assignment.square_of_track,
        ordinal_of_track: assignment.ordinal_of_track,
        tracks,
        squares,
        stats,
    })
}

pub fn process_recording(cfg: PipelineConfig) -> Result<()> {
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("failed creating out dir: {}", cfg.out_dir))?;

    let name = cfg
        .recording_name
        .clone()
        .unwrap_or_else(|| file_stem(&cfg.tracks_path));
    let tracks = read_tracks(&cfg.tracks_path)
        .with_context(|| format!("failed reading tracks: {}", cfg.tracks_path))?;

    let recording = analyze_recording(
        &name,
        None,
        tracks,
        cfg.params.concentration,
        &cfg.params,
        &NoopHook,
    )?;

    let out = Path::new(&cfg.out_dir);
    write_squares_gz(out.join(format!("{name}_squares.tsv.gz")), &recording)?;
    write_recordings_summary(
        out.join(format!("{name}_summary.tsv")),
        std::slice::from_ref(&recording),
        &cfg.params,
    )?;

    if recording.stats.tau.is_success() {
        println!("{:.6}", recording.stats.tau.tau_s);
    } else {
        println!("NA");
    }
    Ok(())
}

pub fn process_experiment(cfg: ExperimentConfig) -> Result<()> {
    fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("failed creating out dir: {}", cfg.out_dir))?;

    let manifest = crate::io::manifest::read_manifest(&cfg.manifest_path)?;

    // Recordings are independent; process them in parallel.
    let recordings: Vec<Recording> = manifest
        .recordings
        .par_iter()
        .map(|entry| -> Result<Recording> {
            let tracks = read_tracks(&entry.tracks)
                .with_context(|| format!("failed reading tracks for '{}'", entry.name))?;
            analyze_recording(
                &entry.name,
                Some(&manifest.experiment),
                tracks,
                entry.concentration,
                &cfg.params,
                &NoopHook,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let out = Path::new(&cfg.out_dir);
    for recording in &recordings {
        write_squares_gz(
            out.join(format!("{}_squares.tsv.gz", recording.name)),
            recording,
        )?;
    }
    write_recordings_summary(out.join("recordings_summary.tsv"), &recordings, &cfg.params)?;
    Ok(())
}

fn file_stem(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("recording");
    // Strip compound extensions like .tsv.gz in one go.
    name.split('.').next().unwrap_or("recording").to_string()
}

fn squares_header() -> &'static str {
    "recording\tsquare\trow\tcol\tx0_um\ty0_um\tx1_um\ty1_um\tn_tracks\ttau_s\tr_squared\tvariability\tdensity\tdensity_ratio\tdensity_ratio_ori\tselected\tlabel"
}

fn write_squares_gz(path: PathBuf, recording: &Recording) -> Result<()> {
    let rows = recording.squares.iter().map(|s| {
        format!(
            "{}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            recording.name,
            s.square_number,
            s.row,
            s.col,
            s.bounds.x0,
            s.bounds.y0,
            s.bounds.x1,
            s.bounds.y1,
            s.metrics.track_count,
            na_f64(s.metrics.tau.tau_s),
            na_f64(s.metrics.tau.r_squared),
            na_f64(s.metrics.variability),
            na_f64(s.metrics.density),
            na_f64(s.metrics.density_ratio),
            na_f64(s.metrics.density_ratio_ori),
            u8::from(s.selected),
            na_usize(s.label_number)
        )
    });
    crate::io::tsv::write_tsv_gz(path, squares_header(), rows)
}

fn summary_header() -> &'static str {
    "recording\texperiment\tn_tracks\tn_out_of_bounds\tn_squares\tn_selected\ttau_s\tr_squared\tdensity\tconcentration\tbg_square_count\tbg_total_tracks\tbg_mean_track_count\tsquares\tmin_tracks_for_tau\tmin_r_squared\tmin_density_ratio\tmax_variability\tneighbour_mode\tbackground_fraction\tbackground_squares"
}

fn write_recordings_summary(
    path: PathBuf,
    recordings: &[Recording],
    params: &AnalysisParams,
) -> Result<()> {
    let rows = recordings.iter().map(|r| {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.name,
            r.experiment.as_deref().unwrap_or("NA"),
            r.tracks.len(),
            r.out_of_bounds_tracks,
            r.squares.len(),
            r.selected_squares().count(),
            na_f64(r.stats.tau.tau_s),
            na_f64(r.stats.tau.r_squared),
            na_f64(r.stats.density),
            na_f64(r.concentration),
            r.stats.background_square_count,
            r.stats.background_total_tracks,
            na_f64(r.stats.background_mean_track_count),
            params.number_of_squares,
            params.min_tracks_for_tau,
            na_f64(params.min_required_r_squared),
            na_f64(params.min_required_density_ratio),
            na_f64(params.max_allowable_variability),
            params.neighbour_mode,
            na_f64(params.background_fraction),
            params.background_square_count
        )
    });
    crate::io::tsv::write_tsv(path, summary_header(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::squares::fit::FitStatus;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn track(id: &str, x: f64, y: f64, duration: f64) -> Track {
        Track {
            id: id.to_string(),
            x_um: x,
            y_um: y,
            duration_s: duration,
            max_speed: None,
            median_speed: None,
            displacement: None,
            total_distance: None,
            confinement_ratio: None,
        }
    }

    /// ~150 tracks in one quadrant whose duration histogram decays with the
    /// given tau, spread so the fit and variability are well behaved.
    fn quadrant_tracks(x0: f64, y0: f64, tau: f64, prefix: &str) -> Vec<Track> {
        let mut out = Vec::new();
        let mut i = 0usize;
        for k in 1..=10 {
            let t = k as f64;
            let count = (100.0 * (-t / tau).exp()).round().max(1.0) as usize;
            for _ in 0..count {
                // Deterministic scatter inside the quadrant.
                let fx = (i % 13) as f64 / 13.0;
                let fy = (i % 7) as f64 / 7.0;
                out.push(track(
                    &format!("{prefix}-{i}"),
                    x0 + fx * 40.0,
                    y0 + fy * 40.0,
                    t,
                ));
                i += 1;
            }
        }
        out
    }

    fn permissive_params() -> AnalysisParams {
        let mut p = AnalysisParams::default();
        p.number_of_squares = 4;
        p.min_tracks_for_tau = 5;
        p.min_required_r_squared = 0.0;
        p.min_required_density_ratio = 0.0;
        p.max_allowable_variability = 100.0;
        p
    }

    #[test]
    fn end_to_end_four_quadrants_all_selected() {
        let mut tracks = Vec::new();
        tracks.extend(quadrant_tracks(0.5, 0.5, 2.0, "q0"));
        tracks.extend(quadrant_tracks(41.5, 0.5, 2.0, "q1"));
        tracks.extend(quadrant_tracks(0.5, 41.5, 2.0, "q2"));
        tracks.extend(quadrant_tracks(41.5, 41.5, 2.0, "q3"));
        let n_tracks = tracks.len();

        let params = permissive_params();
        let rec =
            analyze_recording("r1", None, tracks, 1.0, &params, &NoopHook).unwrap();

        assert_eq!(rec.squares.len(), 4);
        assert_eq!(rec.out_of_bounds_tracks, 0);

        let per_square = n_tracks / 4;
        for sq in &rec.squares {
            assert_eq!(sq.metrics.track_count as usize, per_square);
            assert!(sq.metrics.tau.is_success(), "square {}", sq.square_number);
            assert!((sq.metrics.tau.tau_s - 2.0).abs() < 0.5);
            let expected_density = per_square as f64
                / (crate::IMAGE_EXTENT_UM / 2.0).powi(2)
                / crate::RECORDING_DURATION_S;
            assert!((sq.metrics.density - expected_density).abs() < 1e-12);
        }

        let labels: Vec<Option<usize>> = rec.squares.iter().map(|s| s.label_number).collect();
        assert_eq!(labels, vec![Some(0), Some(1), Some(2), Some(3)]);

        // Assignment is a partition with square-traversal ordinals.
        let mut ordinals: Vec<usize> = rec.ordinal_of_track.iter().flatten().copied().collect();
        ordinals.sort_unstable();
        assert_eq!(ordinals, (0..n_tracks).collect::<Vec<_>>());
    }

    #[test]
    fn aggregate_tau_matches_direct_pooled_fit() {
        let mut tracks = Vec::new();
        tracks.extend(quadrant_tracks(0.5, 0.5, 1.5, "q0"));
        tracks.extend(quadrant_tracks(41.5, 41.5, 3.0, "q3"));

        let params = permissive_params();
        let rec =
            analyze_recording("r1", None, tracks, 1.0, &params, &NoopHook).unwrap();

        let pooled_durations: Vec<f64> = rec
            .selected_squares()
            .flat_map(|s| s.track_indices.iter().map(|&ti| rec.tracks[ti].duration_s))
            .collect();
        let direct = estimate_tau(
            &pooled_durations,
            params.min_tracks_for_tau,
            params.min_required_r_squared,
        );
        assert_eq!(rec.stats.tau.status, direct.status);
        assert_eq!(rec.stats.tau.tau_s.to_bits(), direct.tau_s.to_bits());
        assert_eq!(rec.stats.tau.r_squared.to_bits(), direct.r_squared.to_bits());
    }

    #[test]
    fn sparse_recording_has_nan_taus_but_full_attributes() {
        // One track per quadrant: fits fail, nothing selected under defaults,
        // but every square still carries a complete attribute set.
        let tracks = vec![
            track("a", 10.0, 10.0, 1.0),
            track("b", 50.0, 10.0, 1.0),
            track("c", 10.0, 50.0, 1.0),
            track("d", 50.0, 50.0, 1.0),
        ];
        let mut params = AnalysisParams::default();
        params.number_of_squares = 4;

        let rec =
            analyze_recording("sparse", None, tracks, 1.0, &params, &NoopHook).unwrap();
        for sq in &rec.squares {
            assert_eq!(sq.metrics.track_count, 1);
            assert_eq!(sq.metrics.tau.status, FitStatus::Failure);
            assert!(sq.metrics.tau.tau_s.is_nan());
            assert!(sq.metrics.density > 0.0);
            assert!(!sq.selected);
            assert_eq!(sq.label_number, None);
        }
        assert_eq!(rec.stats.tau.status, FitStatus::Failure);
        assert_eq!(rec.stats.density, 0.0);
    }

    #[test]
    fn out_of_bounds_tracks_are_anomalies_not_errors() {
        let tracks = vec![
            track("in", 10.0, 10.0, 1.0),
            track("out", 1000.0, 10.0, 1.0),
        ];
        let mut params = AnalysisParams::default();
        params.number_of_squares = 4;
        let rec = analyze_recording("r", None, tracks, 1.0, &params, &NoopHook).unwrap();
        assert_eq!(rec.out_of_bounds_tracks, 1);
        assert_eq!(rec.square_of_track, vec![Some(0), None]);
    }

    #[test]
    fn hook_fires_once_per_square() {
        struct Counting(AtomicUsize);
        impl SquareFitHook for Counting {
            fn on_square_fit(
                &self,
                _recording: &str,
                _square: usize,
                _tracks: &[Track],
                _members: &[usize],
                _fit: &TauEstimate,
            ) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let hook = Counting(AtomicUsize::new(0));
        let tracks = vec![track("a", 10.0, 10.0, 1.0)];
        let mut params = AnalysisParams::default();
        params.number_of_squares = 9;
        analyze_recording("r", None, tracks, 1.0, &params, &hook).unwrap();
        assert_eq!(hook.0.load(Ordering::Relaxed), 9);
    }

    #[test]
    fn writes_squares_and_summary_files() {
        let dir = std::env::temp_dir().join("spt-squares-pipeline-test");
        std::fs::create_dir_all(&dir).unwrap();
        let tracks_path = dir.join("rec7.csv");
        std::fs::write(
            &tracks_path,
            "track_id,x_um,y_um,duration\n1,10.0,10.0,0.5\n2,50.0,50.0,0.8\n",
        )
        .unwrap();

        let mut params = AnalysisParams::default();
        params.number_of_squares = 4;
        process_recording(PipelineConfig {
            tracks_path: tracks_path.to_string_lossy().into_owned(),
            out_dir: dir.to_string_lossy().into_owned(),
            recording_name: None,
            params,
        })
        .unwrap();

        assert!(dir.join("rec7_squares.tsv.gz").exists());
        let summary = std::fs::read_to_string(dir.join("rec7_summary.tsv")).unwrap();
        let mut lines = summary.lines();
        assert_eq!(lines.next().unwrap(), summary_header());
        let row = lines.next().unwrap();
        assert!(row.starts_with("rec7\tNA\t2\t0\t4\t0\t"), "{row}");
    }
}
