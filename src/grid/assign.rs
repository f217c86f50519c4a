use crate::grid::layout::GridLayout;
use crate::io::tracks::Track;

/// Index tables produced by one assignment pass. Tracks themselves stay
/// immutable; all back-references live here.
#[derive(Debug, Clone)]
pub struct TrackAssignment {
    /// Square number per track; `None` for tracks outside the imaging area.
    pub square_of_track: Vec<Option<usize>>,
    /// Track indices per square, square-number order. Empty squares hold an
    /// empty list, never an absent entry.
    pub tracks_by_square: Vec<Vec<usize>>,
    /// Recording-scoped sequential number per assigned track, handed out in
    /// square-traversal order.
    pub ordinal_of_track: Vec<Option<usize>>,
    /// Indices of tracks whose location fell outside every square.
    pub out_of_bounds: Vec<usize>,
}

impl TrackAssignment {
    pub fn track_counts(&self) -> Vec<u64> {
        self.tracks_by_square
            .iter()
            .map(|v| v.len() as u64)
            .collect()
    }
}

/// Bins every track into its grid square by (x, y) location.
///
/// Assignment is a partition: each in-bounds track lands in exactly one
/// square. Out-of-bounds tracks are recorded as anomalies and never abort
/// the recording.
pub fn assign_tracks(tracks: &[Track], layout: &GridLayout) -> TrackAssignment {
    let n_squares = layout.square_count();
    let mut square_of_track: Vec<Option<usize>> = vec![None; tracks.len()];
    let mut tracks_by_square: Vec<Vec<usize>> = vec![Vec::new(); n_squares];
    let mut out_of_bounds: Vec<usize> = Vec::new();

    for (ti, t) in tracks.iter().enumerate() {
        match layout.point_to_square(t.x_um, t.y_um) {
            Some(sq) => {
                square_of_track[ti] = Some(sq);
                tracks_by_square[sq].push(ti);
            }
            None => out_of_bounds.push(ti),
        }
    }

    let mut ordinal_of_track: Vec<Option<usize>> = vec![None; tracks.len()];
    let mut next = 0usize;
    for members in &tracks_by_square {
        for &ti in members {
            ordinal_of_track[ti] = Some(next);
            next += 1;
        }
    }

    TrackAssignment {
        square_of_track,
        tracks_by_square,
        ordinal_of_track,
        out_of_bounds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(id: &str, x: f64, y: f64) -> Track {
        Track {
            id: id.to_string(),
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

    #[test]
    fn assignment_is_a_partition() {
        let layout = GridLayout::new(4, 10.0, 10.0).unwrap();
        let tracks = vec![
            track("a", 1.0, 1.0),
            track("b", 6.0, 1.0),
            track("c", 1.0, 6.0),
            track("d", 6.0, 6.0),
            track("e", 6.5, 6.5),
        ];
        let asg = assign_tracks(&tracks, &layout);

        let mut seen: Vec<usize> = asg.tracks_by_square.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(asg.out_of_bounds.is_empty());
        assert_eq!(asg.square_of_track, vec![Some(0), Some(1), Some(2), Some(3), Some(3)]);
    }

    #[test]
    fn empty_squares_get_empty_lists() {
        let layout = GridLayout::new(4, 10.0, 10.0).unwrap();
        let tracks = vec![track("a", 1.0, 1.0)];
        let asg = assign_tracks(&tracks, &layout);
        assert_eq!(asg.tracks_by_square.len(), 4);
        assert_eq!(asg.tracks_by_square[0], vec![0]);
        for sq in 1..4 {
            assert!(asg.tracks_by_square[sq].is_empty());
        }
        assert_eq!(asg.track_counts(), vec![1, 0, 0, 0]);
    }

    #[test]
    fn image_edge_tracks_land_in_last_row_and_column() {
        let layout = GridLayout::new(4, 10.0, 10.0).unwrap();
        let tracks = vec![track("edge", 10.0, 10.0), track("out", 10.5, 5.0)];
        let asg = assign_tracks(&tracks, &layout);
        assert_eq!(asg.square_of_track[0], Some(3));
        assert_eq!(asg.square_of_track[1], None);
        assert_eq!(asg.out_of_bounds, vec![1]);
    }

    #[test]
    fn ordinals_follow_square_traversal_order() {
        let layout = GridLayout::new(4, 10.0, 10.0).unwrap();
        // Input order deliberately reversed vs. square order.
        let tracks = vec![
            track("d", 6.0, 6.0),
            track("c", 1.0, 6.0),
            track("b", 6.0, 1.0),
            track("a", 1.0, 1.0),
        ];
        let asg = assign_tracks(&tracks, &layout);
        assert_eq!(
            asg.ordinal_of_track,
            vec![Some(3), Some(2), Some(1), Some(0)]
        );
    }
}
