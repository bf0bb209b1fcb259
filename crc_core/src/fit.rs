//! Decay-curve fit over the rolling window.
//!
//! Two-parameter Levenberg–Marquardt on `A(t) = A0 * 0.5^(t / T½)` with `t`
//! in minutes from the fit origin. Goodness of fit is scored in log space.
//! Reported uncertainties are three times the diagonal of the parameter
//! covariance `(JᵀJ)⁻¹ · SSR / (n − 2)`.

use crate::decay;
use crate::error::FitError;
use crate::isotope::Isotope;
use crate::types::{Sample, Unit};
use crate::util::SECS_PER_MIN;
use serde::Serialize;
use std::fmt;

/// Fewer windowed samples than this and only the raw series is shown.
pub const MIN_FIT_SAMPLES: usize = 4;
pub const DEFAULT_MAX_ITERATIONS: u32 = 200;
pub const DEFAULT_TOLERANCE: f64 = 0.05;

const UNCERTAINTY_SCALE: f64 = 3.0;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;
const STEP_TOL: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitResult {
    pub initial_activity: f64,
    pub initial_activity_uncertainty: f64,
    /// Minutes.
    pub half_life: f64,
    pub half_life_uncertainty: f64,
    pub r_squared: f64,
    pub fit_origin_timestamp: i64,
    pub sample_count: usize,
}

impl FitResult {
    /// Pass iff the whole `half_life ± uncertainty` band sits inside
    /// `reference ± tolerance` (relative).
    pub fn within_tolerance(&self, reference_half_life: f64, tolerance: f64) -> bool {
        within_tolerance(
            self.half_life,
            self.half_life_uncertainty,
            reference_half_life,
            tolerance,
        )
    }

    /// Fitted activity at an absolute timestamp.
    pub fn activity_at(&self, timestamp: i64) -> f64 {
        let t = (timestamp - self.fit_origin_timestamp) as f64 / SECS_PER_MIN;
        decay::eval(t, self.initial_activity, self.half_life)
    }
}

pub fn within_tolerance(
    half_life: f64,
    uncertainty: f64,
    reference_half_life: f64,
    tolerance: f64,
) -> bool {
    reference_half_life * (1.0 - tolerance) <= half_life - uncertainty
        && half_life + uncertainty <= reference_half_life * (1.0 + tolerance)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitOutcome {
    /// Not enough samples; show the raw series only.
    RawOnly,
    Fitted(FitResult),
    Failed {
        #[serde(serialize_with = "error_string")]
        error: FitError,
    },
}

fn error_string<S: serde::Serializer>(e: &FitError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

#[derive(Debug, Clone, Copy)]
pub struct FitEngine {
    max_iterations: u32,
}

impl Default for FitEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl FitEngine {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
        }
    }

    /// Fit the windowed `samples` (oldest first) from
    /// `max(requested_fit_from, oldest)` onward.
    pub fn evaluate(
        &self,
        samples: &[Sample],
        requested_fit_from: Option<i64>,
        reference_half_life: f64,
    ) -> FitOutcome {
        let Some(oldest) = samples.first() else {
            return FitOutcome::RawOnly;
        };
        if samples.len() < MIN_FIT_SAMPLES {
            return FitOutcome::RawOnly;
        }
        let fit_from = requested_fit_from.map_or(oldest.timestamp, |f| f.max(oldest.timestamp));
        let points: Vec<(f64, f64)> = samples
            .iter()
            .filter(|s| s.timestamp >= fit_from)
            .map(|s| ((s.timestamp - fit_from) as f64 / SECS_PER_MIN, s.activity))
            .collect();
        if points.len() < MIN_FIT_SAMPLES {
            return FitOutcome::RawOnly;
        }
        match self.fit_points(&points, reference_half_life) {
            Ok(curve) => FitOutcome::Fitted(FitResult {
                initial_activity: curve.a0,
                initial_activity_uncertainty: curve.u_a0,
                half_life: curve.half_life,
                half_life_uncertainty: curve.u_half_life,
                r_squared: curve.r_squared,
                fit_origin_timestamp: fit_from,
                sample_count: points.len(),
            }),
            Err(error) => {
                tracing::debug!(%error, n = points.len(), "fit failed");
                FitOutcome::Failed { error }
            }
        }
    }

    /// Fit `(t, activity)` points; `half_life_guess` seeds `T½`, the first
    /// activity seeds `A0`.
    pub fn fit_points(
        &self,
        points: &[(f64, f64)],
        half_life_guess: f64,
    ) -> Result<Curve, FitError> {
        if let Some(&(_, a)) = points.iter().find(|(_, a)| !a.is_finite() || *a <= 0.0) {
            return Err(FitError::NonPositiveActivity(a));
        }
        let n = points.len();
        if n < MIN_FIT_SAMPLES {
            return Err(FitError::SingularCovariance);
        }

        let mut p = [points[0].1, half_life_guess];
        if !p[1].is_finite() || p[1] <= 0.0 {
            return Err(FitError::NonFinite);
        }
        let mut ssr = sum_sq_residuals(points, p);
        let mut lambda = LAMBDA_INIT;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_iterations {
            iterations += 1;
            let (jtj, jtr) = normal_equations(points, p);
            let damped = [
                [jtj[0][0] * (1.0 + lambda), jtj[0][1]],
                [jtj[1][0], jtj[1][1] * (1.0 + lambda)],
            ];
            let Some(step) = solve2(damped, jtr) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    converged = true;
                    break;
                }
                continue;
            };
            let candidate = [p[0] + step[0], p[1] + step[1]];
            let candidate_ssr = if candidate[1] > 0.0 && candidate[0].is_finite() {
                sum_sq_residuals(points, candidate)
            } else {
                f64::INFINITY
            };

            if candidate_ssr.is_finite() && candidate_ssr <= ssr {
                let small = step[0].abs() <= STEP_TOL * (p[0].abs() + STEP_TOL)
                    && step[1].abs() <= STEP_TOL * (p[1].abs() + STEP_TOL);
                p = candidate;
                ssr = candidate_ssr;
                lambda = (lambda / 10.0).max(f64::MIN_POSITIVE);
                if small || ssr == 0.0 {
                    converged = true;
                    break;
                }
            } else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    // no downhill step left
                    converged = true;
                    break;
                }
            }
        }
        if !converged {
            return Err(FitError::NotConverged { iterations });
        }
        if !(p[0].is_finite() && p[1].is_finite() && ssr.is_finite()) {
            return Err(FitError::NonFinite);
        }

        let (jtj, _) = normal_equations(points, p);
        let inv = invert2(jtj).ok_or(FitError::SingularCovariance)?;
        let variance = ssr / (n - 2) as f64;
        let u_a0 = UNCERTAINTY_SCALE * inv[0][0] * variance;
        let u_half_life = UNCERTAINTY_SCALE * inv[1][1] * variance;
        let r_squared = log_r_squared(points, p)?;

        let curve = Curve {
            a0: p[0],
            half_life: p[1],
            u_a0,
            u_half_life,
            r_squared,
            iterations,
        };
        if curve.is_finite() {
            Ok(curve)
        } else {
            Err(FitError::NonFinite)
        }
    }
}

/// Raw fitted parameters; `FitResult` adds the time origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curve {
    pub a0: f64,
    pub half_life: f64,
    pub u_a0: f64,
    pub u_half_life: f64,
    pub r_squared: f64,
    pub iterations: u32,
}

impl Curve {
    fn is_finite(&self) -> bool {
        [
            self.a0,
            self.half_life,
            self.u_a0,
            self.u_half_life,
            self.r_squared,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

fn sum_sq_residuals(points: &[(f64, f64)], p: [f64; 2]) -> f64 {
    points
        .iter()
        .map(|&(t, a)| {
            let r = a - decay::eval(t, p[0], p[1]);
            r * r
        })
        .sum()
}

/// `(JᵀJ, Jᵀr)` with residual `r = a − f(t)`.
fn normal_equations(points: &[(f64, f64)], p: [f64; 2]) -> ([[f64; 2]; 2], [f64; 2]) {
    let [a0, hl] = p;
    let mut jtj = [[0.0; 2]; 2];
    let mut jtr = [0.0; 2];
    for &(t, a) in points {
        let decay = decay::eval(t, 1.0, hl);
        let d_a0 = decay;
        let d_hl = a0 * decay * std::f64::consts::LN_2 * t / (hl * hl);
        let r = a - a0 * decay;
        jtj[0][0] += d_a0 * d_a0;
        jtj[0][1] += d_a0 * d_hl;
        jtj[1][1] += d_hl * d_hl;
        jtr[0] += d_a0 * r;
        jtr[1] += d_hl * r;
    }
    jtj[1][0] = jtj[0][1];
    (jtj, jtr)
}

fn invert2(m: [[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    let scale = m[0][0].abs() * m[1][1].abs();
    if !det.is_finite() || det.abs() <= f64::EPSILON * scale || det == 0.0 {
        return None;
    }
    Some([
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ])
}

fn solve2(m: [[f64; 2]; 2], b: [f64; 2]) -> Option<[f64; 2]> {
    let inv = invert2(m)?;
    Some([
        inv[0][0] * b[0] + inv[0][1] * b[1],
        inv[1][0] * b[0] + inv[1][1] * b[1],
    ])
}

/// `1 − Σ(ln a − ln f)² / Σ(ln a − mean ln a)²`
fn log_r_squared(points: &[(f64, f64)], p: [f64; 2]) -> Result<f64, FitError> {
    let logs: Vec<f64> = points.iter().map(|&(_, a)| a.ln()).collect();
    let mean = logs.iter().sum::<f64>() / logs.len() as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&(t, _), &la) in points.iter().zip(&logs) {
        let fitted = decay::eval(t, p[0], p[1]);
        if fitted.is_nan() || fitted <= 0.0 {
            return Err(FitError::NonPositiveActivity(fitted));
        }
        ss_res += (la - fitted.ln()).powi(2);
        ss_tot += (la - mean).powi(2);
    }
    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// What the display/export collaborator needs for one redraw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitReport {
    pub isotope: Isotope,
    pub unit: Unit,
    /// Minutes.
    pub reference_half_life: f64,
    pub tolerance: f64,
    pub samples: Vec<Sample>,
    pub outcome: FitOutcome,
}

impl FitReport {
    pub fn fit(&self) -> Option<&FitResult> {
        match &self.outcome {
            FitOutcome::Fitted(r) => Some(r),
            _ => None,
        }
    }

    /// Tolerance verdict; `false` when there is no fit.
    pub fn passes(&self) -> bool {
        self.fit()
            .is_some_and(|r| r.within_tolerance(self.reference_half_life, self.tolerance))
    }
}

impl fmt::Display for FitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            FitOutcome::RawOnly => write!(
                f,
                "{} ({} samples, not enough to fit)",
                self.isotope,
                self.samples.len()
            ),
            FitOutcome::Failed { error } => {
                write!(f, "{}: fit failed: {error}", self.isotope)
            }
            FitOutcome::Fitted(r) => {
                writeln!(f, "t0 = {}", r.fit_origin_timestamp)?;
                writeln!(
                    f,
                    "A0 = {:.4} \u{b1} {:.4} {}",
                    r.initial_activity, r.initial_activity_uncertainty, self.unit
                )?;
                writeln!(
                    f,
                    "T\u{bd} = {:.3} \u{b1} {:.3} min (ref {:.3}, {})",
                    r.half_life,
                    r.half_life_uncertainty,
                    self.reference_half_life,
                    if self.passes() { "PASS" } else { "FAIL" }
                )?;
                writeln!(f, "R = {:.6}", r.r_squared)?;
                write!(f, "n = {}", r.sample_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(a0: f64, hl: f64, step_s: i64, n: usize) -> Vec<Sample> {
        (0..n as i64)
            .map(|i| Sample {
                timestamp: 1_000 + i * step_s,
                activity: decay::eval((i * step_s) as f64 / 60.0, a0, hl),
            })
            .collect()
    }

    #[test]
    fn tolerance_band_is_inclusive() {
        assert!(within_tolerance(20.0, 0.0, 20.0, 0.05));
        assert!(within_tolerance(20.0, 1.0, 20.0, 0.05));
        assert!(!within_tolerance(20.0, 1.01, 20.0, 0.05));
        assert!(!within_tolerance(21.5, 0.0, 20.0, 0.05));
    }

    #[test]
    fn too_few_samples_is_raw_only() {
        let s = series(100.0, 20.0, 60, 3);
        assert_eq!(FitEngine::default().evaluate(&s, None, 20.4), FitOutcome::RawOnly);
    }

    #[test]
    fn fit_from_restriction_can_drop_below_minimum() {
        let s = series(100.0, 20.0, 60, 6);
        let from = s[3].timestamp;
        assert_eq!(
            FitEngine::default().evaluate(&s, Some(from), 20.4),
            FitOutcome::RawOnly
        );
    }

    #[test]
    fn fit_from_earlier_than_data_uses_oldest() {
        let s = series(100.0, 20.0, 60, 8);
        match FitEngine::default().evaluate(&s, Some(0), 20.4) {
            FitOutcome::Fitted(r) => assert_eq!(r.fit_origin_timestamp, s[0].timestamp),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_positive_activity_is_reported() {
        let mut s = series(100.0, 20.0, 60, 6);
        s[2].activity = 0.0;
        assert!(matches!(
            FitEngine::default().evaluate(&s, None, 20.4),
            FitOutcome::Failed {
                error: FitError::NonPositiveActivity(_)
            }
        ));
    }

    #[test]
    fn identical_timestamps_are_singular() {
        let s: Vec<Sample> = (0..5)
            .map(|i| Sample {
                timestamp: 42,
                activity: 10.0 + f64::from(i),
            })
            .collect();
        match FitEngine::default().evaluate(&s, None, 20.4) {
            FitOutcome::Failed { error } => assert!(matches!(
                error,
                FitError::SingularCovariance | FitError::NonFinite
            )),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn activity_at_follows_origin() {
        let r = FitResult {
            initial_activity: 8.0,
            initial_activity_uncertainty: 0.0,
            half_life: 1.0,
            half_life_uncertainty: 0.0,
            r_squared: 1.0,
            fit_origin_timestamp: 600,
            sample_count: 4,
        };
        assert!((r.activity_at(600) - 8.0).abs() < 1e-12);
        assert!((r.activity_at(720) - 2.0).abs() < 1e-12);
    }
}
