//! Single-exponential decay fit of a track-duration histogram.
//!
//! The same routine serves two call sites: each square's own tracks, and the
//! pooled tracks of a recording's selected squares. A failed fit is a normal
//! outcome, reported as `FitStatus::Failure` with NaN Tau/R² so downstream
//! averaging can tell "no data" from "zero decay".

/// Durations are grouped to 1 ms when building the frequency histogram;
/// acquisition quantizes them to the frame interval anyway.
const HISTOGRAM_RESOLUTION_S: f64 = 1e-3;

const MAX_ITERATIONS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy)]
pub struct TauEstimate {
    pub status: FitStatus,
    pub tau_s: f64,
    pub r_squared: f64,
}

impl TauEstimate {
    pub fn failure() -> Self {
        Self {
            status: FitStatus::Failure,
            tau_s: f64::NAN,
            r_squared: f64::NAN,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FitStatus::Success
    }
}

/// Fitted parameters of `f(t) = A·exp(-t/τ) + B`.
#[derive(Debug, Clone, Copy)]
pub struct ExpDecayFit {
    pub amplitude: f64,
    pub tau_s: f64,
    pub offset: f64,
    pub r_squared: f64,
}

/// Frequency histogram of track durations, ascending by duration.
pub fn duration_histogram(durations: &[f64]) -> Vec<(f64, f64)> {
    use std::collections::BTreeMap;

    let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
    for &d in durations {
        if !d.is_finite() || d < 0.0 {
            continue;
        }
        let key = (d / HISTOGRAM_RESOLUTION_S).round() as i64;
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(k, c)| (k as f64 * HISTOGRAM_RESOLUTION_S, c as f64))
        .collect()
}

/// Estimates Tau over one track population.
///
/// Gates: at least `min_tracks` tracks before a fit is attempted, and
/// `r_squared >= min_r_squared` for the fit to count as a success. Degenerate
/// histograms (fewer than 3 distinct durations, zero count variance) map to
/// failure, never to a panic.
pub fn estimate_tau(durations: &[f64], min_tracks: usize, min_r_squared: f64) -> TauEstimate {
    if durations.len() < min_tracks {
        return TauEstimate::failure();
    }

    let hist = duration_histogram(durations);
    let Some(fit) = fit_exponential_decay(&hist) else {
        return TauEstimate::failure();
    };

    if !(fit.r_squared.is_finite() && fit.r_squared >= min_r_squared) {
        return TauEstimate::failure();
    }

    TauEstimate {
        status: FitStatus::Success,
        tau_s: fit.tau_s,
        r_squared: fit.r_squared,
    }
}

/// Levenberg–Marquardt fit of `A·exp(-t/τ) + B` to `(t, count)` points.
///
/// Fully deterministic: fixed initialization heuristics, fixed damping
/// schedule, no randomness. Returns `None` for under-determined or
/// numerically degenerate inputs.
pub fn fit_exponential_decay(points: &[(f64, f64)]) -> Option<ExpDecayFit> {
    let n = points.len();
    if n < 3 {
        return None;
    }

    let y_mean = points.iter().map(|&(_, y)| y).sum::<f64>() / n as f64;
    let ss_tot: f64 = points.iter().map(|&(_, y)| (y - y_mean).powi(2)).sum();
    if !(ss_tot.is_finite() && ss_tot > 0.0) {
        return None;
    }

    let (t_first, y_first) = points[0];
    let (t_last, y_last) = points[n - 1];
    let span = t_last - t_first;
    if !(span.is_finite() && span > 0.0) {
        return None;
    }

    let y_min = points.iter().map(|&(_, y)| y).fold(f64::INFINITY, f64::min);
    let y_max = points
        .iter()
        .map(|&(_, y)| y)
        .fold(f64::NEG_INFINITY, f64::max);

    // Deterministic initial guess: offset at the floor, amplitude spanning the
    // counts, rate from the end-to-end log ratio.
    let mut b = y_min;
    let mut a = (y_max - y_min).max(1e-6);
    let num = (y_first - b + 1.0).max(1e-9);
    let den = (y_last - b + 1.0).max(1e-9);
    let mut lambda = ((num / den).ln() / span).max(1e-6);

    let model = |a: f64, lambda: f64, b: f64, t: f64| a * (-lambda * t).exp() + b;
    let sse_of = |a: f64, lambda: f64, b: f64| -> f64 {
        points
            .iter()
            .map(|&(t, y)| (y - model(a, lambda, b, t)).powi(2))
            .sum()
    };

    let mut sse = sse_of(a, lambda, b);
    if !sse.is_finite() {
        return None;
    }

    let mut mu = 1e-3;
    for _ in 0..MAX_ITERATIONS {
        // Normal equations over the 3-parameter Jacobian.
        let mut jtj = [[0.0f64; 3]; 3];
        let mut jtr = [0.0f64; 3];
        for &(t, y) in points {
            let e = (-lambda * t).exp();
            let r = y - model(a, lambda, b, t);
            let j = [e, -a * t * e, 1.0];
            for (row, &ji) in j.iter().enumerate() {
                for (col, &jk) in j.iter().enumerate() {
                    jtj[row][col] += ji * jk;
                }
                jtr[row] += ji * r;
            }
        }

        let damped = [
            [jtj[0][0] * (1.0 + mu), jtj[0][1], jtj[0][2]],
            [jtj[1][0], jtj[1][1] * (1.0 + mu), jtj[1][2]],
            [jtj[2][0], jtj[2][1], jtj[2][2] * (1.0 + mu)],
        ];
        let Some(delta) = solve3(&damped, &jtr) else {
            mu *= 10.0;
            if mu > 1e12 {
                break;
            }
            continue;
        };

        let (a2, lambda2, b2) = (a + delta[0], lambda + delta[1], b + delta[2]);
        if !(a2.is_finite() && lambda2.is_finite() && b2.is_finite()) || lambda2 <= 0.0 {
            mu *= 10.0;
            if mu > 1e12 {
                break;
            }
            continue;
        }

        let sse2 = sse_of(a2, lambda2, b2);
        if sse2.is_finite() && sse2 < sse {
            let improvement = sse - sse2;
            a = a2;
            lambda = lambda2;
            b = b2;
            sse = sse2;
            mu = (mu * 0.3).max(1e-12);
            if improvement < 1e-12 * (1.0 + sse) {
                break;
            }
        } else {
            mu *= 10.0;
            if mu > 1e12 {
                break;
            }
        }
    }

    let tau = 1.0 / lambda;
    if !(tau.is_finite() && tau > 0.0 && a.is_finite() && b.is_finite()) {
        return None;
    }

    let r_squared = 1.0 - sse / ss_tot;
    if !r_squared.is_finite() {
        return None;
    }

    Some(ExpDecayFit {
        amplitude: a,
        tau_s: tau,
        offset: b,
        r_squared,
    })
}

/// Solves a 3×3 linear system by Cramer's rule; `None` on a singular matrix.
fn solve3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> Option<[f64; 3]> {
    let det = det3(m);
    if !det.is_finite() || det.abs() < 1e-300 {
        return None;
    }
    let mut out = [0.0f64; 3];
    for col in 0..3 {
        let mut mc = *m;
        for row in 0..3 {
            mc[row][col] = v[row];
        }
        out[col] = det3(&mc) / det;
    }
    if out.iter().all(|x| x.is_finite()) {
        Some(out)
    } else {
        None
    }
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}
