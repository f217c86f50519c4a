use crate::grid::layout::SquareBounds;
use crate::io::tracks::Track;

/// Coefficient of variation of track counts over a granularity×granularity
/// sub-grid of one square.
///
/// Sub-cell counts include empty cells; the statistic uses the population
/// standard deviation. Tracks whose sub-index falls outside the grid
/// (floating-point edge cases on the square boundary) are dropped from the
/// histogram. A square contributing no counts at all yields exactly `0.0`.
pub fn variability(
    tracks: &[Track],
    members: &[usize],
    bounds: SquareBounds,
    granularity: usize,
) -> f64 {
    let g = granularity;
    let mut counts = vec![0u64; g * g];

    let sub_w = (bounds.x1 - bounds.x0) / g as f64;
    let sub_h = (bounds.y1 - bounds.y0) / g as f64;
    if !(sub_w > 0.0 && sub_h > 0.0) {
        return 0.0;
    }

    for &ti in members {
        let t = &tracks[ti];
        let i = ((t.x_um - bounds.x0) / sub_w).floor();
        let j = ((t.y_um - bounds.y0) / sub_h).floor();
        if !(i.is_finite() && j.is_finite()) {
            continue;
        }
        if i < 0.0 || j < 0.0 || i >= g as f64 || j >= g as f64 {
            continue;
        }
        counts[j as usize * g + i as usize] += 1;
    }

    let n = counts.len() as f64;
    let mean = counts.iter().sum::<u64>() as f64 / n;
    if mean == 0.0 {
        return 0.0;
    }
    let var = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(x: f64, y: f64) -> Track {
        Track {
            id: String::new(),
            x_um: x,
            y_um: y,
            duration_s: 1.0,
            max_speed: None,
            median_speed: None,
            displacement: None,
            total_distance: None,
            confinement_ratio: None,
        }
    }

    const BOUNDS: SquareBounds = SquareBounds {
        x0: 0.0,
        y0: 0.0,
        x1: 10.0,
        y1: 10.0,
    };

    #[test]
    fn empty_square_is_exactly_zero() {
        assert_eq!(variability(&[], &[], BOUNDS, 10), 0.0);
    }

    #[test]
    fn uniform_spread_has_zero_variability() {
        // One track per sub-cell center on a 2x2 sub-grid.
        let tracks = vec![
            track(2.5, 2.5),
            track(7.5, 2.5),
            track(2.5, 7.5),
            track(7.5, 7.5),
        ];
        let members: Vec<usize> = (0..tracks.len()).collect();
        assert_eq!(variability(&tracks, &members, BOUNDS, 2), 0.0);
    }

    #[test]
    fn concentration_raises_variability() {
        // All tracks in one sub-cell of a 2x2 sub-grid: counts [4,0,0,0],
        // mean 1, population std sqrt(3) -> cv = sqrt(3).
        let tracks = vec![
            track(1.0, 1.0),
            track(1.5, 1.5),
            track(2.0, 2.0),
            track(1.2, 2.1),
        ];
        let members: Vec<usize> = (0..tracks.len()).collect();
        let cv = variability(&tracks, &members, BOUNDS, 2);
        assert!((cv - 3.0f64.sqrt()).abs() < 1e-12, "cv = {cv}");
    }

    #[test]
    fn out_of_range_sub_indices_are_dropped() {
        // A track exactly on the square's upper-right corner computes
        // sub-index g, outside [0, g); it must be dropped silently.
        let tracks = vec![track(10.0, 10.0), track(1.0, 1.0)];
        let members = vec![0, 1];
        let cv_with_edge = variability(&tracks, &members, BOUNDS, 2);
        let cv_without = variability(&tracks, &[1], BOUNDS, 2);
        assert_eq!(cv_with_edge, cv_without);
    }
}
