//! Arbitrary-precision building blocks for the CDF evaluators.
//!
//! Everything here is computed with [`rug::Float`] (MPFR) at a working
//! precision derived from a decimal-digit count (`dps`). The exported
//! surface is intentionally small: the standard normal CDF `Φ`, the
//! regularized lower incomplete gamma `P(a, x)`, the regularized
//! incomplete beta `I_x(a, b)`, and the [`Precision`] escalation policy
//! that the truncated-CDF evaluator drives.
//!
//! ## Escalation contract
//!
//! Under the default `auto` policy an evaluation starts at a base
//! precision of 30 digits and doubles on demand up to `max_dps`
//! (default 5000). The caller decides *when* to escalate (vanishing
//! denominators, saturated ratios); this module decides *how*: the
//! ladder of digit counts, the thread-safe memo of the last sufficient
//! rung, and the warning sink (`tracing` plus the optional `out_log`
//! file) when the cap is hit.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use rug::Float;
use serde::{Deserialize, Serialize};

/// Base decimal precision of the `auto` policy.
pub const BASE_DPS: u32 = 30;

/// Default ceiling for the `auto` escalation.
pub const DEFAULT_MAX_DPS: u32 = 5000;

/// Working-precision selection for the arbitrary-precision CDFs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DpsPolicy {
    /// Start at [`BASE_DPS`] digits, double on demand up to the cap.
    Auto,
    /// Evaluate once at exactly this many digits.
    Fixed(u32),
}

impl Default for DpsPolicy {
    fn default() -> Self {
        Self::Auto
    }
}

/// Precision policy plus escalation state for one inference call.
///
/// The memo of the last sufficient digit count is shared across the
/// evaluations of a call (and across worker threads) so that repeated
/// evaluations skip the rungs already known to be insufficient.
#[derive(Debug)]
pub struct Precision {
    policy: DpsPolicy,
    max_dps: u32,
    out_log: Option<PathBuf>,
    settled: AtomicU32,
}

impl Default for Precision {
    fn default() -> Self {
        Self::new(DpsPolicy::Auto, DEFAULT_MAX_DPS, None)
    }
}

impl Precision {
    /// Build a policy with an optional warning-log path.
    pub fn new(policy: DpsPolicy, max_dps: u32, out_log: Option<PathBuf>) -> Self {
        Self { policy, max_dps, out_log, settled: AtomicU32::new(0) }
    }

    /// The escalation ladder: each digit count to try, in order.
    pub(crate) fn ladder(&self) -> Vec<u32> {
        match self.policy {
            DpsPolicy::Fixed(dps) => vec![dps.max(1)],
            DpsPolicy::Auto => {
                let mut rungs = Vec::new();
                let mut dps = BASE_DPS.max(self.settled.load(Ordering::Relaxed));
                while dps < self.max_dps {
                    rungs.push(dps);
                    dps = dps.saturating_mul(2);
                }
                rungs.push(self.max_dps);
                rungs
            }
        }
    }

    /// Remember a digit count that produced a usable value.
    pub(crate) fn record_sufficient(&self, dps: u32) {
        self.settled.fetch_max(dps, Ordering::Relaxed);
    }

    /// Report that the ladder was exhausted without a clean value.
    pub(crate) fn report_exhausted(&self, detail: &str) {
        tracing::warn!(max_dps = self.max_dps, detail, "precision ladder exhausted");
        if let Some(path) = &self.out_log {
            let line = format!("precision ladder exhausted at {} dps: {detail}\n", self.max_dps);
            let written = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| file.write_all(line.as_bytes()));
            if let Err(error) = written {
                tracing::warn!(%error, path = %path.display(), "could not append to out_log");
            }
        }
    }
}

/// Mantissa bits for a decimal-digit count, with a little headroom.
pub(crate) fn bits(dps: u32) -> u32 {
    (f64::from(dps) * std::f64::consts::LOG2_10).ceil() as u32 + 8
}

/// Standard normal CDF `Φ(x)` via the complementary error function.
pub(crate) fn std_normal_cdf(prec: u32, x: f64) -> Float {
    let sqrt2 = Float::with_val(prec, 2).sqrt();
    let arg = -Float::with_val(prec, x) / sqrt2;
    arg.erfc() / 2
}

/// Regularized lower incomplete gamma `P(a, x) = γ(a, x) / Γ(a)`.
///
/// MPFR supplies the non-normalized upper tail `Γ(a, x)`; the lower
/// regularized form follows from `P = 1 − Γ(a, x)/Γ(a)`, which the
/// caller's escalation keeps accurate when the subtraction cancels.
pub(crate) fn gamma_p(prec: u32, shape: f64, x: &Float) -> Float {
    if !(*x > 0.0) {
        return Float::with_val(prec, 0);
    }
    if x.is_infinite() {
        return Float::with_val(prec, 1);
    }
    let a = Float::with_val(prec, shape);
    let upper = a.clone().gamma_inc(x);
    let whole = a.gamma();
    Float::with_val(prec, 1) - upper / whole
}

/// Regularized incomplete beta `I_x(a, b)` by continued fraction.
///
/// The Lentz iteration converges fast on `x < (a + 1)/(a + b + 2)`; the
/// symmetry `I_x(a, b) = 1 − I_{1−x}(b, a)` covers the rest.
pub(crate) fn beta_inc(prec: u32, a: f64, b: f64, x: &Float) -> Float {
    if *x <= 0.0 {
        return Float::with_val(prec, 0);
    }
    if *x >= 1.0 {
        return Float::with_val(prec, 1);
    }

    let one_minus_x = Float::with_val(prec, 1) - x;
    let ln_front = Float::with_val(prec, a + b).ln_gamma()
        - Float::with_val(prec, a).ln_gamma()
        - Float::with_val(prec, b).ln_gamma()
        + x.clone().ln() * a
        + one_minus_x.clone().ln() * b;
    let front = ln_front.exp();

    if x.to_f64() < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(prec, a, b, x) / a
    } else {
        Float::with_val(prec, 1) - front * beta_cf(prec, b, a, &one_minus_x) / b
    }
}

// Modified Lentz continued fraction for the incomplete beta.
fn beta_cf(prec: u32, a: f64, b: f64, x: &Float) -> Float {
    const MAX_ITERS: u32 = 10_000;
    let one = || Float::with_val(prec, 1);
    let tiny = one() >> prec.saturating_mul(2).min(1 << 24);
    let eps = one() >> prec.saturating_sub(4);

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = one();
    let mut d = one() - x.clone() * qab / qap;
    if d.clone().abs() < tiny {
        d = tiny.clone();
    }
    d = d.recip();
    let mut h = d.clone();

    for m in 1..=MAX_ITERS {
        let m = f64::from(m);
        let m2 = 2.0 * m;

        // Even step.
        let coeff = m * (b - m) / ((qam + m2) * (a + m2));
        let term = x.clone() * coeff;
        d = one() + term.clone() * &d;
        if d.clone().abs() < tiny {
            d = tiny.clone();
        }
        c = one() + term / &c;
        if c.clone().abs() < tiny {
            c = tiny.clone();
        }
        d = d.recip();
        h *= d.clone() * &c;

        // Odd step.
        let coeff = -(a + m) * (qab + m) / ((a + m2) * (qap + m2));
        let term = x.clone() * coeff;
        d = one() + term.clone() * &d;
        if d.clone().abs() < tiny {
            d = tiny.clone();
        }
        c = one() + term / &c;
        if c.clone().abs() < tiny {
            c = tiny.clone();
        }
        d = d.recip();
        let delta = d.clone() * &c;
        h *= delta.clone();

        if (delta - one()).abs() < eps {
            break;
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const PREC: u32 = 256;

    #[test]
    fn normal_cdf_reference_points() {
        assert_abs_diff_eq!(std_normal_cdf(PREC, 0.0).to_f64(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(
            std_normal_cdf(PREC, -0.5).to_f64(),
            0.308537538725987,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            std_normal_cdf(PREC, 1.96).to_f64(),
            0.9750021048517795,
            epsilon = 1e-12
        );
        assert_eq!(std_normal_cdf(PREC, f64::NEG_INFINITY).to_f64(), 0.0);
        assert_eq!(std_normal_cdf(PREC, f64::INFINITY).to_f64(), 1.0);
    }

    #[test]
    fn gamma_p_reference_points() {
        let at = |x: f64| Float::with_val(PREC, x);
        // P(1, x) = 1 − e^{−x}
        assert_abs_diff_eq!(
            gamma_p(PREC, 1.0, &at(0.5)).to_f64(),
            1.0 - (-0.5f64).exp(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            gamma_p(PREC, 1.5, &at(1.5)).to_f64(),
            0.6083748237289109,
            epsilon = 1e-10
        );
        assert_eq!(gamma_p(PREC, 2.0, &at(0.0)).to_f64(), 0.0);
        assert_eq!(gamma_p(PREC, 2.0, &at(f64::INFINITY)).to_f64(), 1.0);
    }

    #[test]
    fn beta_inc_reference_points() {
        // I_x(1, 1) = x
        let x = Float::with_val(PREC, 0.375);
        assert_abs_diff_eq!(beta_inc(PREC, 1.0, 1.0, &x).to_f64(), 0.375, epsilon = 1e-12);
        // I_x(1, b) = 1 − (1 − x)^b
        let x = Float::with_val(PREC, 0.2);
        assert_abs_diff_eq!(
            beta_inc(PREC, 1.0, 3.0, &x).to_f64(),
            1.0 - 0.8f64.powi(3),
            epsilon = 1e-12
        );
        // Symmetry I_x(a, b) + I_{1−x}(b, a) = 1.
        let x = Float::with_val(PREC, 0.7);
        let y = Float::with_val(PREC, 0.3);
        let total = beta_inc(PREC, 2.5, 4.0, &x).to_f64() + beta_inc(PREC, 4.0, 2.5, &y).to_f64();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ladder_doubles_to_cap_and_memoizes() {
        let precision = Precision::new(DpsPolicy::Auto, 5000, None);
        assert_eq!(precision.ladder(), vec![30, 60, 120, 240, 480, 960, 1920, 3840, 5000]);
        precision.record_sufficient(120);
        assert_eq!(precision.ladder()[0], 120);
        let fixed = Precision::new(DpsPolicy::Fixed(77), 5000, None);
        assert_eq!(fixed.ladder(), vec![77]);
    }
}
