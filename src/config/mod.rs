use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Strictness of the spatial consistency constraint applied during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourMode {
    /// Per-square thresholds only; no spatial constraint.
    Free,
    /// At least one 8-neighbour must also pass the per-square thresholds.
    Relaxed,
    /// Every in-grid 4-neighbour must also pass the per-square thresholds.
    Strict,
}

impl FromStr for NeighbourMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(NeighbourMode::Free),
            "relaxed" => Ok(NeighbourMode::Relaxed),
            "strict" => Ok(NeighbourMode::Strict),
            other => Err(anyhow!(
                "invalid neighbour mode '{}' (expected free, relaxed or strict)",
                other
            )),
        }
    }
}

impl fmt::Display for NeighbourMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NeighbourMode::Free => "free",
            NeighbourMode::Relaxed => "relaxed",
            NeighbourMode::Strict => "strict",
        };
        f.write_str(s)
    }
}

/// Threshold bundle for one processing run. Passed explicitly into every
/// component; there is no global configuration state.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    /// Total grid squares per recording; must be a perfect square >= 1.
    pub number_of_squares: usize,
    /// Minimum track count before a Tau fit is attempted.
    pub min_tracks_for_tau: usize,
    /// Minimum R² for a fit to be accepted and for selection.
    pub min_required_r_squared: f64,
    /// Minimum density ratio over background for selection.
    pub min_required_density_ratio: f64,
    /// Maximum spatial variability for selection.
    pub max_allowable_variability: f64,
    pub neighbour_mode: NeighbourMode,
    /// Fraction of squares (floored to a count) averaged for the background mean.
    pub background_fraction: f64,
    /// Explicit square count for the ordinal background variant.
    pub background_square_count: usize,
    /// Sub-grid dimension of the variability estimator.
    pub variability_granularity: usize,
    /// Concentration factor in the density denominator.
    pub concentration: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            number_of_squares: 400,
            min_tracks_for_tau: 20,
            min_required_r_squared: 0.1,
            min_required_density_ratio: 2.0,
            max_allowable_variability: 10.0,
            neighbour_mode: NeighbourMode::Free,
            background_fraction: 0.1,
            background_square_count: 10,
            variability_granularity: 10,
            concentration: 1.0,
        }
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_squares == 0 {
            return Err(anyhow!("--squares must be >= 1"));
        }
        let d = (self.number_of_squares as f64).sqrt().floor() as usize;
        if d * d != self.number_of_squares {
            return Err(anyhow!(
                "--squares ({}) must be a perfect square (e.g. {} or {})",
                self.number_of_squares,
                d * d,
                (d + 1) * (d + 1)
            ));
        }
        if !(0.0 < self.background_fraction && self.background_fraction <= 1.0) {
            return Err(anyhow!("--background-fraction must be in (0, 1]"));
        }
        if self.background_square_count == 0 {
            return Err(anyhow!("--background-squares must be >= 1"));
        }
        if self.variability_granularity == 0 {
            return Err(anyhow!("--granularity must be >= 1"));
        }
        if !(self.concentration.is_finite() && self.concentration > 0.0) {
            return Err(anyhow!(
                "--concentration must be a positive finite number; got {}",
                self.concentration
            ));
        }
        if !self.min_required_r_squared.is_finite() {
            return Err(anyhow!("--min-r-squared must be finite"));
        }
        if !self.min_required_density_ratio.is_finite() {
            return Err(anyhow!("--min-density-ratio must be finite"));
        }
        if !self.max_allowable_variability.is_finite() {
            return Err(anyhow!("--max-variability must be finite"));
        }
        Ok(())
    }
}
