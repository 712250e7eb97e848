//! Crate root: public surface, shared option/result types, and the
//! contracts that hold across the whole engine.
//!
//! `selinf` computes **selective p-values** for test statistics that are
//! normal or chi under the null, conditional on a data-dependent
//! model-selection event. The observation is parametrized on a line
//! `x(z) = a + b·z`; a user-supplied selection algorithm reports, for any
//! probe `z`, the model selected at `x(z)` together with an interval of
//! `z` values yielding that same model. The driver assembles the
//! *truncation set* (the union of intervals on which the observed model
//! is selected) and evaluates the CDF of the statistic truncated to that
//! set in arbitrary precision.
//!
//! ## Invariants
//!
//! - **Exact algebra.** [`RealSubset`] is a normalized finite union of
//!   closed intervals compared by exact floating-point equality; no
//!   tolerance exists in the set operations. We **forbid unsafe**
//!   throughout the crate.
//!
//! - **Monotone exploration.** Within one
//!   [`inference`](InferenceContext::inference) call, `searched` and
//!   `truncated` only grow and `truncated ⊆ searched` always holds. An
//!   iteration that adds nothing fails fast with
//!   [`InferenceError::InfiniteLoop`] rather than spinning.
//!
//! - **Bracketed p-values.** Until exploration is complete the unsearched
//!   remainder of the line is attributed wholly to either side of the
//!   alternative-specific mask, which yields `inf_p ≤ p ≤ sup_p` at every
//!   iteration; termination criteria read those bounds.
//!
//! - **Precision discipline.** Truncated-CDF ratios are computed with
//!   MPFR at an escalating digit count; a saturated or vanishing ratio
//!   escalates up to `max_dps` and degrades to a **documented,
//!   deterministic fallback** (never UB, never NaN) with a warning in the
//!   log.
//!
//! ## Entry points
//!
//! [`SelectiveInferenceNorm`] (contrast vector) and
//! [`SelectiveInferenceChi`] (projection matrix) derive the line, the
//! null distribution, and the numerical window from raw data, then drive
//! the shared [`InferenceContext`]. The corresponding
//! [`NaiveInferenceNorm`]/[`NaiveInferenceChi`] evaluate the untruncated
//! CDF for comparison.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Exact algebra over finite unions of closed real intervals.
pub mod intervals;
/// Polynomial and quadric sublevel sets as interval unions.
pub mod polynomial;
/// Arbitrary-precision primitives and the dps escalation policy.
pub mod mp;
/// Exact and truncated CDFs; the null-distribution facade.
pub mod cdf;
/// Probe strategies and termination criteria for the search loop.
pub mod search;
/// The inference driver.
pub mod inference;
/// Normal (contrast-vector) front-ends.
pub mod norm;
/// Chi (projection-matrix) front-ends.
pub mod chi;

pub use crate::cdf::NullDistribution;
pub use crate::chi::{NaiveInferenceChi, SelectiveInferenceChi};
pub use crate::inference::{
    pvalue_from_cdf, InferenceContext, InferenceError, SelectionAlgorithm,
};
pub use crate::intervals::{Interval, IntervalError, RealSubset};
pub use crate::mp::{DpsPolicy, Precision, BASE_DPS, DEFAULT_MAX_DPS};
pub use crate::norm::{Covariance, NaiveInferenceNorm, SelectiveInferenceNorm};
pub use crate::polynomial::{
    linear_polynomials_below_zero, polynomial_below_zero, polytope_below_zero, PolynomialError,
    DEFAULT_TOL,
};
pub use crate::search::{SearchStrategy, TerminationCriterion};

/// Alternative hypothesis for the p-value computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alternative {
    /// Two-tailed test: `p = 2·min(F, 1 − F)`.
    TwoSided,
    /// Right-tailed test: `p = 1 − F`.
    Less,
    /// Left-tailed test: `p = F`.
    Greater,
    /// Two-tailed test on the distribution of absolute values.
    Abs,
}

/// How the line is explored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Adaptive search until the termination criterion holds (default).
    Parametric,
    /// Sweep the limits window left to right until fully covered.
    Exhaustive,
    /// Use only the interval returned at the observed statistic.
    OverConditioning,
}

/// Tuning knobs of one [`inference`](InferenceContext::inference) call.
///
/// The defaults reproduce the standard configuration: absolute
/// alternative, parametric mode with the π₃ strategy, precision-based
/// termination, automatic working precision.
#[derive(Debug)]
pub struct InferenceOptions {
    /// Alternative hypothesis.
    pub alternative: Alternative,
    /// Exploration mode.
    pub inference_mode: InferenceMode,
    /// Probe-point strategy (parametric mode only).
    pub search_strategy: SearchStrategy,
    /// Stopping rule (parametric mode only).
    pub termination: TerminationCriterion,
    /// Hard cap on probe evaluations before the search is declared stuck.
    pub max_iter: usize,
    /// Worker count for probe batches; `1` keeps everything serial.
    pub n_jobs: usize,
    /// Base probe offset of the strategies.
    pub step: f64,
    /// Significance level used by decision-based termination.
    pub significance_level: f64,
    /// Target width of the p-value bracket for precision termination.
    pub precision: f64,
    /// Working-precision policy of the CDF evaluations.
    pub dps: DpsPolicy,
    /// Digit ceiling of the automatic escalation.
    pub max_dps: u32,
    /// Optional file receiving precision-escalation warnings.
    pub out_log: Option<PathBuf>,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            alternative: Alternative::Abs,
            inference_mode: InferenceMode::Parametric,
            search_strategy: SearchStrategy::default(),
            termination: TerminationCriterion::default(),
            max_iter: 100_000,
            n_jobs: 1,
            step: 1e-6,
            significance_level: 0.05,
            precision: 1e-3,
            dps: DpsPolicy::Auto,
            max_dps: DEFAULT_MAX_DPS,
            out_log: None,
        }
    }
}

/// Outcome of a selective-inference call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Observed test statistic.
    pub stat: f64,
    /// Significance level the call was configured with.
    pub alpha: f64,
    /// Selective p-value over the assembled truncation set.
    pub p_value: f64,
    /// Lower bound of the p-value under partial exploration.
    pub inf_p: f64,
    /// Upper bound of the p-value under partial exploration.
    pub sup_p: f64,
    /// P-value ignoring selection (untruncated CDF over the support).
    pub naive_p: f64,
    /// Explored portion of the line.
    pub searched_intervals: Vec<[f64; 2]>,
    /// Portion of the line on which the observed model is selected.
    pub truncated_intervals: Vec<[f64; 2]>,
    /// Number of probe evaluations.
    pub search_count: usize,
    /// Number of probes whose model matched the observed selection.
    pub detect_count: usize,
}

impl InferenceResult {
    /// Whether the null hypothesis is rejected at the configured level.
    pub fn reject(&self) -> bool {
        self.p_value <= self.alpha
    }
}

impl fmt::Display for InferenceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "stat: {:.6}", self.stat)?;
        writeln!(f, "p_value: {:.6}", self.p_value)?;
        writeln!(f, "inf_p: {:.6}", self.inf_p)?;
        writeln!(f, "sup_p: {:.6}", self.sup_p)?;
        writeln!(f, "naive_p: {:.6}", self.naive_p)?;
        let literal = self
            .truncated_intervals
            .iter()
            .map(|pair| format!("[{:.6}, {:.6}]", pair[0], pair[1]))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "truncated_intervals: [{literal}]")?;
        writeln!(f, "search_count: {}", self.search_count)?;
        write!(f, "detect_count: {}", self.detect_count)
    }
}
