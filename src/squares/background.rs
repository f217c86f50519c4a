use anyhow::{anyhow, Result};

/// The squares taken as local background, with their mean track count.
/// Produced fresh per call; never cached across different populations.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundEstimate {
    /// Indices (into the counts slice) of the background squares.
    pub square_indices: Vec<usize>,
    pub total_tracks: u64,
    pub mean_track_count: f64,
}

impl BackgroundEstimate {
    fn empty() -> Self {
        Self {
            square_indices: Vec::new(),
            total_tracks: 0,
            mean_track_count: 0.0,
        }
    }
}

/// Normalized track density: count / area / duration / concentration.
/// All three divisors must be strictly positive.
pub fn density(track_count: u64, area_um2: f64, duration_s: f64, concentration: f64) -> Result<f64> {
    if !(area_um2.is_finite() && area_um2 > 0.0) {
        return Err(anyhow!("area must be positive; got {}", area_um2));
    }
    if !(duration_s.is_finite() && duration_s > 0.0) {
        return Err(anyhow!("duration must be positive; got {}", duration_s));
    }
    if !(concentration.is_finite() && concentration > 0.0) {
        return Err(anyhow!("concentration must be positive; got {}", concentration));
    }
    Ok(track_count as f64 / area_um2 / duration_s / concentration)
}

/// Mean track count over the `k` most sparsely populated squares, ranked
/// ascending by count with all-zero squares discarded first.
pub fn sparsest_mean(counts: &[u64], k: usize) -> BackgroundEstimate {
    if k == 0 {
        return BackgroundEstimate::empty();
    }

    let mut ranked: Vec<usize> = (0..counts.len()).filter(|&i| counts[i] > 0).collect();
    if ranked.is_empty() {
        return BackgroundEstimate::empty();
    }
    // Stable tie order by square index keeps the subset deterministic.
    ranked.sort_by_key(|&i| (counts[i], i));
    ranked.truncate(k);

    let total: u64 = ranked.iter().map(|&i| counts[i]).sum();
    let mean = total as f64 / ranked.len() as f64;
    BackgroundEstimate {
        square_indices: ranked,
        total_tracks: total,
        mean_track_count: mean,
    }
}

/// Fraction-driven background estimate: averages the lowest
/// `floor(fraction * counts.len())` non-zero squares.
pub fn estimate_background(counts: &[u64], fraction: f64) -> BackgroundEstimate {
    let k = (fraction * counts.len() as f64).floor() as usize;
    sparsest_mean(counts, k)
}

/// Track count relative to the background mean. A zero background mean (no
/// populated squares at all) yields the sentinel `0.0` rather than infinity,
/// so the pathological case can never pass a positive selection threshold.
pub fn density_ratio(track_count: u64, background_mean: f64) -> f64 {
    if !(background_mean.is_finite() && background_mean > 0.0) {
        return 0.0;
    }
    track_count as f64 / background_mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn density_formula() {
        let d = density(50, 10.0, 100.0, 5.0).unwrap();
        assert_eq!(d, 50.0 / 10.0 / 100.0 / 5.0);
    }

    #[test]
    fn density_rejects_non_positive_divisors() {
        assert!(density(1, 0.0, 1.0, 1.0).is_err());
        assert!(density(1, 1.0, -1.0, 1.0).is_err());
        assert!(density(1, 1.0, 1.0, 0.0).is_err());
        assert!(density(1, f64::NAN, 1.0, 1.0).is_err());
    }

    #[test]
    fn sparsest_mean_skips_zero_squares() {
        let counts = vec![0, 5, 0, 1, 3, 9, 0, 2];
        let bg = sparsest_mean(&counts, 3);
        assert_eq!(bg.square_indices, vec![3, 7, 4]);
        assert_eq!(bg.total_tracks, 6);
        assert_eq!(bg.mean_track_count, 2.0);
    }

    #[test]
    fn sparsest_mean_with_fewer_nonzero_than_k() {
        let counts = vec![0, 4, 0, 0];
        let bg = sparsest_mean(&counts, 3);
        assert_eq!(bg.square_indices, vec![1]);
        assert_eq!(bg.mean_track_count, 4.0);
    }

    #[test]
    fn all_zero_counts_give_empty_estimate() {
        let bg = sparsest_mean(&[0, 0, 0], 2);
        assert_eq!(bg, BackgroundEstimate::empty());
        assert_eq!(sparsest_mean(&[1, 2], 0), BackgroundEstimate::empty());
    }

    #[test]
    fn fraction_floors_to_a_count() {
        // 10% of 25 squares -> 2 background squares.
        let mut counts = vec![10u64; 25];
        counts[0] = 1;
        counts[1] = 2;
        let bg = estimate_background(&counts, 0.1);
        assert_eq!(bg.square_indices.len(), 2);
        assert_eq!(bg.mean_track_count, 1.5);

        // Fraction too small for the grid floors to zero squares.
        let bg = estimate_background(&[5, 5, 5], 0.1);
        assert_eq!(bg.square_indices.len(), 0);
        assert_eq!(bg.mean_track_count, 0.0);
    }

    #[test]
    fn density_ratio_exact_and_zero_policy() {
        assert_eq!(density_ratio(50, 10.0), 5.0);
        assert_eq!(density_ratio(50, 0.0), 0.0);
        assert_eq!(density_ratio(0, 10.0), 0.0);
        assert_eq!(density_ratio(50, f64::NAN), 0.0);
    }
}
