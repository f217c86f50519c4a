use crate::config::{AnalysisParams, NeighbourMode};
use crate::grid::layout::GridLayout;
use crate::squares::{Square, SquareMetrics};

/// Per-square threshold check. A square whose Tau fit failed (NaN R²) or
/// whose density ratio / variability is non-finite can never be eligible.
fn eligible(m: &SquareMetrics, params: &AnalysisParams) -> bool {
    m.density_ratio.is_finite()
        && m.variability.is_finite()
        && m.tau.r_squared.is_finite()
        && m.density_ratio >= params.min_required_density_ratio
        && m.variability <= params.max_allowable_variability
        && m.tau.r_squared >= params.min_required_r_squared
}

/// Spatial consistency predicate over a square's neighbourhood.
///
/// `Free` imposes nothing. `Relaxed` wants at least one eligible 8-neighbour
/// (vacuously true when the grid has no neighbours). `Strict` wants every
/// in-grid 4-neighbour eligible. The stricter semantics are a domain policy
/// still awaiting confirmation; keep them behind this one function.
fn neighbour_ok(
    mode: NeighbourMode,
    square: usize,
    eligibility: &[bool],
    layout: &GridLayout,
) -> bool {
    match mode {
        NeighbourMode::Free => true,
        NeighbourMode::Relaxed => {
            let neighbours = layout.neighbours8(square);
            neighbours.is_empty() || neighbours.iter().any(|&n| eligibility[n])
        }
        NeighbourMode::Strict => layout.neighbours4(square).iter().all(|&n| eligibility[n]),
    }
}

/// Classifies every square as selected/unselected and assigns dense 0-based
/// labels to the selected ones in square-traversal order.
///
/// The classification is recomputed from scratch: running it again on the
/// same metrics and thresholds reproduces the same selection and labels.
pub fn apply_selection(squares: &mut [Square], layout: &GridLayout, params: &AnalysisParams) {
    let eligibility: Vec<bool> = squares.iter().map(|s| eligible(&s.metrics, params)).collect();

    let mut next_label = 0usize;
    for (i, sq) in squares.iter_mut().enumerate() {
        let selected =
            eligibility[i] && neighbour_ok(params.neighbour_mode, i, &eligibility, layout);
        sq.selected = selected;
        sq.label_number = if selected {
            let label = next_label;
            next_label += 1;
            Some(label)
        } else {
            None
        };
    }
}
