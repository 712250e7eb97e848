//! Exact and truncated CDFs in arbitrary precision.
//!
//! The evaluators compute every probability with [`rug::Float`] at the
//! working precision chosen by a [`Precision`] policy and cast the final
//! ratio to `f64`. The truncated CDF of a distribution over a
//! [`RealSubset`] `S` is
//!
//! ```text
//! F(x; S) = μ(S ∩ M(x)) / μ(S),   μ([l, u]) = F(u) − F(l)
//! ```
//!
//! with mask `M(x) = (−∞, x]`, or `[−|x|, |x|]` in *absolute* mode (the
//! law of `|T|` for `T` truncated to `S`; on a symmetric `S` this equals
//! folding `S` onto `[0, ∞)` and evaluating `F(x) − F(−x)` at `|x|`).
//! Chi-family evaluation folds the signed radius `x ↦ |x|` and clips `S`
//! to the positive axis.
//!
//! ## Degenerate truncation sets
//!
//! When `μ(S)` is still zero at the top of the precision ladder the
//! result is fixed deterministically: `0.5` when the evaluation point
//! lies in `S`, otherwise `0` below the set and `1` above it (`0.5` again
//! in the gap-or-empty case where neither side is defined). The event is
//! reported through the policy's warning sink.

use rug::Float;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Chi as StatrsChi, Continuous, Normal as StatrsNormal};

use crate::intervals::{Interval, RealSubset};
use crate::mp::{beta_inc, bits, gamma_p, std_normal_cdf, Precision};

/// Base distribution of a truncated-CDF evaluation.
#[derive(Clone, Copy, Debug)]
enum BaseDist {
    StdNorm,
    StudentT { df: f64 },
    Chi { df: f64 },
    ChiSquared { df: f64 },
    FisherF { d1: f64, d2: f64 },
}

impl BaseDist {
    /// Untruncated CDF at `x` in the working precision.
    fn cdf(&self, prec: u32, x: f64) -> Float {
        match *self {
            BaseDist::StdNorm => std_normal_cdf(prec, x),
            BaseDist::StudentT { df } => {
                if x == f64::NEG_INFINITY {
                    return Float::with_val(prec, 0);
                }
                if x == f64::INFINITY {
                    return Float::with_val(prec, 1);
                }
                let squared = Float::with_val(prec, x).square();
                let arg = Float::with_val(prec, df) / (squared + df);
                let half_tail = beta_inc(prec, df / 2.0, 0.5, &arg) / 2;
                if x >= 0.0 {
                    Float::with_val(prec, 1) - half_tail
                } else {
                    half_tail
                }
            }
            BaseDist::Chi { df } => {
                if x <= 0.0 {
                    return Float::with_val(prec, 0);
                }
                let arg = Float::with_val(prec, x).square() / 2;
                gamma_p(prec, df / 2.0, &arg)
            }
            BaseDist::ChiSquared { df } => {
                if x <= 0.0 {
                    return Float::with_val(prec, 0);
                }
                let arg = Float::with_val(prec, x) / 2;
                gamma_p(prec, df / 2.0, &arg)
            }
            BaseDist::FisherF { d1, d2 } => {
                if x <= 0.0 {
                    return Float::with_val(prec, 0);
                }
                if x == f64::INFINITY {
                    return Float::with_val(prec, 1);
                }
                let scaled = Float::with_val(prec, x) * d1;
                let arg = scaled.clone() / (scaled + d2);
                beta_inc(prec, d1 / 2.0, d2 / 2.0, &arg)
            }
        }
    }
}

/// `μ(set)` under the base distribution at the working precision.
fn mass(prec: u32, dist: &BaseDist, set: &RealSubset) -> Float {
    let mut total = Float::with_val(prec, 0);
    for iv in set.iter_intervals() {
        total += dist.cdf(prec, iv.upper) - dist.cdf(prec, iv.lower);
    }
    total
}

/// Deterministic result for a truncation set of vanishing mass.
fn degenerate_fallback(set: &RealSubset, x_eval: f64, absolute: bool) -> f64 {
    let inside = set.contains(x_eval) || (absolute && set.contains(-x_eval));
    if inside {
        return 0.5;
    }
    match (set.infimum(), set.supremum()) {
        (Some(lower), _) if x_eval < lower => 0.0,
        (_, Some(upper)) if x_eval > upper => 1.0,
        _ => 0.5,
    }
}

/// Truncated-CDF core with precision escalation.
fn truncated(
    dist: &BaseDist,
    x: f64,
    set: &RealSubset,
    absolute: bool,
    precision: &Precision,
) -> f64 {
    let (x_eval, mask) = if absolute {
        let folded = x.abs();
        (folded, Interval { lower: -folded, upper: folded })
    } else {
        (x, Interval { lower: f64::NEG_INFINITY, upper: x })
    };
    let mask = RealSubset::from_intervals(vec![mask]);
    let below = set.intersection(&mask);
    let above = set.difference(&mask);
    // A saturated ratio is only suspicious when x splits S into two parts
    // of positive length; at the fringes 0 and 1 are the exact answers.
    let interior = below.measure() > 0.0 && above.measure() > 0.0;

    let rungs = precision.ladder();
    let last = rungs.len() - 1;
    for (i, &dps) in rungs.iter().enumerate() {
        let prec = bits(dps);
        let denominator = mass(prec, dist, set);
        if !denominator.is_finite() || denominator.is_zero() || denominator < 0.0 {
            if i == last {
                precision
                    .report_exhausted(&format!("vanishing truncation mass at x = {x_eval}"));
                return degenerate_fallback(set, x_eval, absolute);
            }
            continue;
        }
        let numerator = mass(prec, dist, &below);
        let ratio = Float::with_val(prec, &numerator / &denominator).to_f64();
        if ratio.is_nan() {
            if i == last {
                precision.report_exhausted(&format!("indeterminate ratio at x = {x_eval}"));
                return degenerate_fallback(set, x_eval, absolute);
            }
            continue;
        }
        if interior && (ratio <= 0.0 || ratio >= 1.0) {
            if i == last {
                precision
                    .report_exhausted(&format!("saturated ratio {ratio} at x = {x_eval}"));
                return ratio.clamp(0.0, 1.0);
            }
            continue;
        }
        precision.record_sufficient(dps);
        return ratio.clamp(0.0, 1.0);
    }
    degenerate_fallback(set, x_eval, absolute)
}

/// Positive half-axis used to clip chi-family truncation sets.
fn positive_axis() -> RealSubset {
    RealSubset::from_intervals(vec![Interval { lower: 0.0, upper: f64::INFINITY }])
}

// ---------------------------------------------------------------------------
// Untruncated CDFs (arbitrary precision, cast to f64)
// ---------------------------------------------------------------------------

/// Standard normal CDF `Φ(x)` at `dps` decimal digits.
pub fn normal_cdf(x: f64, dps: u32) -> f64 {
    std_normal_cdf(bits(dps), x).to_f64()
}

/// Student-t CDF with `df` degrees of freedom.
pub fn t_cdf(x: f64, df: f64, dps: u32) -> f64 {
    BaseDist::StudentT { df }.cdf(bits(dps), x).to_f64()
}

/// Chi CDF with `df` degrees of freedom on `[0, ∞)`.
pub fn chi_cdf(x: f64, df: f64, dps: u32) -> f64 {
    BaseDist::Chi { df }.cdf(bits(dps), x).to_f64()
}

/// Chi-square CDF with `df` degrees of freedom on `[0, ∞)`.
pub fn chi_squared_cdf(x: f64, df: f64, dps: u32) -> f64 {
    BaseDist::ChiSquared { df }.cdf(bits(dps), x).to_f64()
}

/// F CDF with `(d1, d2)` degrees of freedom.
pub fn f_cdf(x: f64, d1: f64, d2: f64, dps: u32) -> f64 {
    BaseDist::FisherF { d1, d2 }.cdf(bits(dps), x).to_f64()
}

// ---------------------------------------------------------------------------
// Truncated CDFs over a RealSubset
// ---------------------------------------------------------------------------

/// Truncated standard normal CDF; `absolute` evaluates the law of `|T|`.
pub fn truncated_norm_cdf(x: f64, set: &RealSubset, absolute: bool, precision: &Precision) -> f64 {
    truncated(&BaseDist::StdNorm, x, set, absolute, precision)
}

/// Truncated Student-t CDF.
pub fn truncated_t_cdf(x: f64, set: &RealSubset, df: f64, precision: &Precision) -> f64 {
    truncated(&BaseDist::StudentT { df }, x, set, false, precision)
}

/// Truncated chi CDF: the signed radius folds to `|x|` and the set is
/// clipped to the positive axis.
pub fn truncated_chi_cdf(x: f64, set: &RealSubset, df: f64, precision: &Precision) -> f64 {
    let clipped = set.intersection(&positive_axis());
    truncated(&BaseDist::Chi { df }, x.abs(), &clipped, false, precision)
}

/// Truncated chi-square CDF on a set clipped to the positive axis.
pub fn truncated_chi_squared_cdf(x: f64, set: &RealSubset, df: f64, precision: &Precision) -> f64 {
    let clipped = set.intersection(&positive_axis());
    truncated(&BaseDist::ChiSquared { df }, x.abs(), &clipped, false, precision)
}

/// Truncated F CDF on a set clipped to the positive axis.
pub fn truncated_f_cdf(x: f64, set: &RealSubset, d1: f64, d2: f64, precision: &Precision) -> f64 {
    let clipped = set.intersection(&positive_axis());
    truncated(&BaseDist::FisherF { d1, d2 }, x.abs(), &clipped, false, precision)
}

// ---------------------------------------------------------------------------
// Null-distribution facade
// ---------------------------------------------------------------------------

/// The distribution a test statistic follows when no selection occurred.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum NullDistribution {
    /// Normal with the given mean and variance.
    Norm {
        /// Mean of the null distribution.
        mean: f64,
        /// Variance of the null distribution (positive).
        var: f64,
    },
    /// Chi with the given degrees of freedom.
    Chi {
        /// Degrees of freedom (positive).
        df: f64,
    },
}

impl NullDistribution {
    /// The set where the null density is nonzero.
    pub fn support(&self) -> RealSubset {
        match self {
            NullDistribution::Norm { .. } => RealSubset::whole_line(),
            NullDistribution::Chi { .. } => positive_axis(),
        }
    }

    /// Point of highest density.
    pub fn mode(&self) -> f64 {
        match *self {
            NullDistribution::Norm { mean, .. } => mean,
            NullDistribution::Chi { df } => {
                if df >= 1.0 {
                    (df - 1.0).sqrt()
                } else {
                    0.0
                }
            }
        }
    }

    /// Log-density at `z` (double precision; used by search metrics only).
    pub fn ln_pdf(&self, z: f64) -> f64 {
        match *self {
            NullDistribution::Norm { mean, var } => StatrsNormal::new(mean, var.sqrt())
                .map_or(f64::NEG_INFINITY, |d| d.ln_pdf(z)),
            NullDistribution::Chi { df } => {
                if z <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                StatrsChi::new(df).map_or(f64::NEG_INFINITY, |d| d.ln_pdf(z))
            }
        }
    }

    /// Truncated CDF of the null distribution over `set`, clipped to the
    /// support; `absolute` switches to the law of `|T|`.
    pub fn truncated_cdf(
        &self,
        x: f64,
        set: &RealSubset,
        absolute: bool,
        precision: &Precision,
    ) -> f64 {
        match *self {
            NullDistribution::Norm { mean, var } => {
                let sd = var.sqrt();
                let standardized = RealSubset::from_intervals(
                    set.iter_intervals()
                        .map(|iv| Interval {
                            lower: (iv.lower - mean) / sd,
                            upper: (iv.upper - mean) / sd,
                        })
                        .collect(),
                );
                truncated_norm_cdf((x - mean) / sd, &standardized, absolute, precision)
            }
            NullDistribution::Chi { df } => truncated_chi_cdf(x, set, df, precision),
        }
    }
}
