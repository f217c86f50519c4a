use crate::grid::layout::SquareBounds;
use crate::squares::fit::TauEstimate;

pub mod background;
pub mod fit;
pub mod pipeline;
pub mod select;
pub mod variability;

/// Computed attributes of one grid square.
#[derive(Debug, Clone)]
pub struct SquareMetrics {
    pub track_count: u64,
    pub tau: TauEstimate,
    /// Coefficient of variation of track counts over the sub-grid.
    pub variability: f64,
    /// Tracks per µm² per second per concentration unit.
    pub density: f64,
    /// Track count over the fraction-driven background mean.
    pub density_ratio: f64,
    /// Track count over the explicit-count ("ordinal") background mean.
    pub density_ratio_ori: f64,
}

/// One cell of a recording's grid, with its assigned tracks and attributes.
#[derive(Debug, Clone)]
pub struct Square {
    pub square_number: usize,
    pub row: usize,
    pub col: usize,
    pub bounds: SquareBounds,
    /// Indices into the recording's track list.
    pub track_indices: Vec<usize>,
    pub metrics: SquareMetrics,
    pub selected: bool,
    /// Dense 0-based ordinal, defined only while selected.
    pub label_number: Option<usize>,
}

/// Recording-level aggregates over the selected squares, plus background
/// statistics over the full square set.
#[derive(Debug, Clone)]
pub struct RecordingStats {
    pub tau: TauEstimate,
    pub density: f64,
    pub background_square_count: usize,
    pub background_total_tracks: u64,
    pub background_mean_track_count: f64,
}

/// One fully processed imaging session.
#[derive(Debug, Clone)]
pub struct Recording {
    pub name: String,
    pub experiment: Option<String>,
    pub concentration: f64,
    pub tracks: Vec<crate::io::tracks::Track>,
    pub squares: Vec<Square>,
    /// Square number per track; `None` for out-of-bounds anomalies.
    pub square_of_track: Vec<Option<usize>>,
    /// Sequential per-recording track numbers, square-traversal order.
    pub ordinal_of_track: Vec<Option<usize>>,
    pub out_of_bounds_tracks: usize,
    pub stats: RecordingStats,
}

impl Recording {
    pub fn selected_squares(&self) -> impl Iterator<Item = &Square> {
        self.squares.iter().filter(|s| s.selected)
    }
}
