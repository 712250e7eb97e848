//! The parametric-search inference driver.
//!
//! [`InferenceContext::inference`] owns the probe loop: it asks the
//! configured strategy for the next probe points, evaluates the external
//! selection algorithm at each of them (serially or on a worker pool),
//! accumulates the returned intervals into the monotone `searched` and
//! `truncated` sets, and stops when the termination criterion is
//! satisfied. An iteration that makes no progress fails with
//! [`InferenceError::InfiniteLoop`].
//!
//! ## P-value bracketing under partial exploration
//!
//! At every iteration the true truncation set `T*` satisfies
//! `truncated ⊆ T* ⊆ truncated ∪ ¬searched`. With the alternative-specific
//! mask `M` (`(−∞, stat]`, or `[−|stat|, |stat|]` for the absolute test),
//! the CDF evaluated over `truncated ∪ (¬searched ∩ ¬M)` and over
//! `truncated ∪ (¬searched ∩ M)` therefore brackets the CDF over `T*`,
//! and the sorted pair of the induced p-values brackets the selective
//! p-value. Both sets are clipped to the support; the numerical `limits`
//! window is applied only when every finite endpoint lies strictly inside
//! it, so clipping can tame ill-conditioned tails without manufacturing
//! truncation structure at an artificial boundary.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::cdf::NullDistribution;
use crate::intervals::{IntervalError, RealSubset};
use crate::mp::Precision;
use crate::search::{exhaustive_probes, SearchContext, TerminationCriterion};
use crate::{Alternative, InferenceMode, InferenceOptions, InferenceResult};

/// Errors raised by the inference driver and the front-ends.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Vector or matrix dimensions disagree.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Offending dimension.
        got: usize,
    },
    /// The covariance descriptor is unusable.
    #[error("invalid covariance: {0}")]
    BadCovariance(&'static str),
    /// The variance of the projected statistic is not positive.
    #[error("contrast has non-positive variance ({0})")]
    DegenerateVariance(f64),
    /// The observed statistic is zero or non-finite.
    #[error("test statistic is degenerate ({0})")]
    DegenerateStatistic(f64),
    /// Degrees of freedom must be positive.
    #[error("degrees of freedom must be positive (got {0})")]
    BadDegrees(f64),
    /// `n_jobs` must be a positive integer.
    #[error("n_jobs must be a positive integer (got {0})")]
    BadJobCount(usize),
    /// `step` must be positive and finite.
    #[error("step must be positive and finite (got {0})")]
    BadStep(f64),
    /// The rayon pool could not be constructed.
    #[error("failed to build the worker pool: {0}")]
    WorkerPool(String),
    /// A full iteration added nothing to the searched set, or the
    /// iteration cap was exceeded. Conflicting selection-algorithm output
    /// (overlapping intervals mapped to different models) surfaces here.
    #[error("search made no progress (search_count = {search_count})")]
    InfiniteLoop {
        /// Probe evaluations performed before the loop was detected.
        search_count: usize,
    },
    /// Invalid interval input.
    #[error(transparent)]
    Interval(#[from] IntervalError),
}

/// A model-selection algorithm probed along the line `x(z) = a + b·z`.
///
/// The contract: `select(a, b, z)` returns the model chosen at `x(z)`
/// together with an interval set containing `z` on which the *same* model
/// is selected. Implementations must be `Sync`; with `n_jobs > 1` a batch
/// of probes is evaluated concurrently against a shared reference.
pub trait SelectionAlgorithm<M>: Sync {
    /// Run the selection at `x(z) = a + b·z`.
    fn select(&self, a: &DVector<f64>, b: &DVector<f64>, z: f64) -> (M, RealSubset);
}

impl<M, F> SelectionAlgorithm<M> for F
where
    F: Fn(&DVector<f64>, &DVector<f64>, f64) -> (M, RealSubset) + Sync,
{
    fn select(&self, a: &DVector<f64>, b: &DVector<f64>, z: f64) -> (M, RealSubset) {
        self(a, b, z)
    }
}

/// Convert a (possibly truncated) CDF value into a p-value.
pub fn pvalue_from_cdf(f: f64, alternative: Alternative) -> f64 {
    match alternative {
        Alternative::TwoSided => 2.0 * f.min(1.0 - f),
        Alternative::Less | Alternative::Abs => 1.0 - f,
        Alternative::Greater => f,
    }
}

/// Everything the driver needs about one observation, immutable for the
/// duration of an [`inference`](InferenceContext::inference) call.
#[derive(Clone, Debug)]
pub struct InferenceContext {
    /// Offset vector of the line `x(z) = a + b·z`.
    pub a: DVector<f64>,
    /// Direction vector of the line.
    pub b: DVector<f64>,
    /// Observed test statistic (`x(stat)` reproduces the data).
    pub stat: f64,
    /// Null distribution of the statistic.
    pub null: NullDistribution,
    /// Support of the null density.
    pub support: RealSubset,
    /// Numerical restriction window for ill-conditioned tails.
    pub limits: RealSubset,
}

impl InferenceContext {
    /// Run the parametric search and compute the selective p-value.
    ///
    /// `model_selector` decides whether a model returned by `algorithm`
    /// equals the one observed at the statistic; intervals of accepted
    /// models accumulate into the truncation set.
    pub fn inference<M, A, S>(
        &self,
        algorithm: &A,
        model_selector: S,
        options: InferenceOptions,
    ) -> Result<InferenceResult, InferenceError>
    where
        M: Send,
        A: SelectionAlgorithm<M> + ?Sized,
        S: Fn(&M) -> bool,
    {
        let InferenceOptions {
            alternative,
            inference_mode,
            mut search_strategy,
            mut termination,
            max_iter,
            n_jobs,
            step,
            significance_level,
            precision: threshold,
            dps,
            max_dps,
            out_log,
        } = options;

        if n_jobs == 0 {
            return Err(InferenceError::BadJobCount(n_jobs));
        }
        if !(step > 0.0) || !step.is_finite() {
            return Err(InferenceError::BadStep(step));
        }
        if !self.stat.is_finite() {
            return Err(InferenceError::DegenerateStatistic(self.stat));
        }
        if self.a.len() != self.b.len() {
            return Err(InferenceError::DimensionMismatch {
                expected: self.a.len(),
                got: self.b.len(),
            });
        }

        let precision = Precision::new(dps, max_dps, out_log);
        let pool = if n_jobs > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_jobs)
                    .build()
                    .map_err(|e| InferenceError::WorkerPool(e.to_string()))?,
            )
        } else {
            None
        };
        let ctx = SearchContext {
            stat: self.stat,
            null: &self.null,
            support: &self.support,
            limits: &self.limits,
            step,
            n_jobs,
        };

        let mut searched = RealSubset::empty();
        let mut truncated = RealSubset::empty();
        let mut previous = RealSubset::empty();
        let mut search_count = 0usize;
        let mut detect_count = 0usize;

        loop {
            let probes = match inference_mode {
                InferenceMode::Exhaustive => exhaustive_probes(&ctx, &searched),
                InferenceMode::OverConditioning => vec![self.stat],
                InferenceMode::Parametric => search_strategy.next_probes(&ctx, &searched),
            };

            let results: Vec<(M, RealSubset)> = match &pool {
                Some(pool) => pool.install(|| {
                    probes
                        .par_iter()
                        .map(|&z| algorithm.select(&self.a, &self.b, z))
                        .collect()
                }),
                None => probes
                    .iter()
                    .map(|&z| algorithm.select(&self.a, &self.b, z))
                    .collect(),
            };

            for (model, intervals) in results {
                search_count += 1;
                searched = searched.union(&intervals);
                if model_selector(&model) {
                    detect_count += 1;
                    truncated = truncated.union(&intervals);
                }
            }

            if search_count > max_iter || searched == previous {
                return Err(InferenceError::InfiniteLoop { search_count });
            }
            previous = searched.clone();
            tracing::debug!(search_count, detect_count, searched = %searched, "search progress");

            let stop = match inference_mode {
                InferenceMode::Exhaustive => self.limits.is_subset_of(&searched),
                InferenceMode::OverConditioning => true,
                InferenceMode::Parametric => match &mut termination {
                    TerminationCriterion::Precision => {
                        let (inf_p, sup_p) =
                            self.pvalue_bounds(alternative, &precision, &searched, &truncated);
                        (sup_p - inf_p).abs() < threshold
                    }
                    TerminationCriterion::Decision => {
                        let (inf_p, sup_p) =
                            self.pvalue_bounds(alternative, &precision, &searched, &truncated);
                        inf_p > significance_level || sup_p <= significance_level
                    }
                    TerminationCriterion::Custom(f) => f(&searched, &truncated),
                },
            };
            if stop {
                break;
            }
        }

        let absolute = matches!(alternative, Alternative::Abs);
        let f = self
            .null
            .truncated_cdf(self.stat, &self.clipped(truncated.clone()), absolute, &precision);
        let p_value = pvalue_from_cdf(f, alternative);
        let (inf_p, sup_p) = self.pvalue_bounds(alternative, &precision, &searched, &truncated);
        let naive_f = self
            .null
            .truncated_cdf(self.stat, &self.clipped(self.support.clone()), absolute, &precision);
        let naive_p = pvalue_from_cdf(naive_f, alternative);

        Ok(InferenceResult {
            stat: self.stat,
            alpha: significance_level,
            p_value,
            inf_p,
            sup_p,
            naive_p,
            searched_intervals: searched.to_pairs(),
            truncated_intervals: truncated.to_pairs(),
            search_count,
            detect_count,
        })
    }

    /// Alternative-specific mask separating "at least as extreme" from the
    /// rest of the line.
    fn mask(&self, alternative: Alternative) -> RealSubset {
        let pair = match alternative {
            Alternative::Abs => [-self.stat.abs(), self.stat.abs()],
            _ => [f64::NEG_INFINITY, self.stat],
        };
        RealSubset::new(&[pair]).unwrap_or_default()
    }

    /// Clip to the support, then to `limits`; the latter applies only
    /// when every finite endpoint lies strictly inside the limits window.
    fn clipped(&self, set: RealSubset) -> RealSubset {
        let set = set.intersection(&self.support);
        let mut lowest = f64::INFINITY;
        let mut highest = f64::NEG_INFINITY;
        for iv in set.iter_intervals() {
            for endpoint in [iv.lower, iv.upper] {
                if endpoint.is_finite() {
                    lowest = lowest.min(endpoint);
                    highest = highest.max(endpoint);
                }
            }
        }
        if lowest > highest {
            // No finite endpoints to protect.
            return set;
        }
        if self.limits.interior_contains(lowest) && self.limits.interior_contains(highest) {
            set.intersection(&self.limits)
        } else {
            set
        }
    }

    /// Bracket the selective p-value from the current exploration state.
    fn pvalue_bounds(
        &self,
        alternative: Alternative,
        precision: &Precision,
        searched: &RealSubset,
        truncated: &RealSubset,
    ) -> (f64, f64) {
        let mask = self.mask(alternative);
        let unsearched = searched.complement();
        let inf_set = truncated.union(&unsearched.difference(&mask));
        let sup_set = truncated.union(&unsearched.intersection(&mask));

        let absolute = matches!(alternative, Alternative::Abs);
        let inf_f = self
            .null
            .truncated_cdf(self.stat, &self.clipped(inf_set), absolute, precision);
        let sup_f = self
            .null
            .truncated_cdf(self.stat, &self.clipped(sup_set), absolute, precision);

        let from_inf = pvalue_from_cdf(inf_f, alternative);
        let from_sup = pvalue_from_cdf(sup_f, alternative);
        if from_inf <= from_sup {
            (from_inf, from_sup)
        } else {
            (from_sup, from_inf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchStrategy;
    use approx::assert_abs_diff_eq;

    const INF: f64 = f64::INFINITY;
    const NINF: f64 = f64::NEG_INFINITY;

    fn subset(pairs: &[[f64; 2]]) -> RealSubset {
        RealSubset::new(pairs).expect("valid pairs")
    }

    fn init_tracing() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    }

    fn std_norm_context(stat: f64) -> InferenceContext {
        InferenceContext {
            a: DVector::from_vec(vec![stat, 0.0]),
            b: DVector::from_vec(vec![1.0, 0.0]),
            stat,
            null: NullDistribution::Norm { mean: 0.0, var: 1.0 },
            support: RealSubset::whole_line(),
            limits: subset(&[[-30.0, 30.0]]),
        }
    }

    /// Selection on a line bisected at the origin: model "lo" left of
    /// zero, "hi" right of it.
    fn bisected(_a: &DVector<f64>, _b: &DVector<f64>, z: f64) -> (&'static str, RealSubset) {
        if z <= 0.0 {
            ("lo", subset(&[[NINF, 0.0]]))
        } else {
            ("hi", subset(&[[0.0, INF]]))
        }
    }

    #[test]
    fn trivial_algorithm_terminates_in_one_iteration() {
        let ctx = std_norm_context(1.3);
        let trivial =
            |_: &DVector<f64>, _: &DVector<f64>, _: f64| ((), RealSubset::whole_line());
        let result = ctx
            .inference(&trivial, |_| true, InferenceOptions::default())
            .unwrap();
        assert_eq!(result.search_count, 1);
        assert_eq!(result.detect_count, 1);
        assert_abs_diff_eq!(result.p_value, result.naive_p, epsilon = 1e-12);
        assert_abs_diff_eq!(result.inf_p, result.p_value, epsilon = 1e-12);
        assert_abs_diff_eq!(result.sup_p, result.p_value, epsilon = 1e-12);
    }

    #[test]
    fn bisected_line_under_less_alternative() {
        let ctx = std_norm_context(-0.5);
        let options = InferenceOptions {
            alternative: Alternative::Less,
            ..InferenceOptions::default()
        };
        let result = ctx.inference(&bisected, |m| *m == "lo", options).unwrap();
        // Truncation set (−∞, 0]: p = 1 − Φ(−0.5)/Φ(0).
        assert_abs_diff_eq!(result.p_value, 0.3829249225480, epsilon = 1e-8);
        assert!(result.inf_p <= result.p_value + 1e-12);
        assert!(result.p_value <= result.sup_p + 1e-12);
        assert_abs_diff_eq!(result.naive_p, 0.6914624612740, epsilon = 1e-8);
        assert_eq!(result.truncated_intervals, vec![[NINF, 0.0]]);
        assert_eq!(result.detect_count, 1);
    }

    #[test]
    fn over_conditioning_stops_after_the_first_probe() {
        let ctx = std_norm_context(-0.5);
        let options = InferenceOptions {
            alternative: Alternative::Less,
            inference_mode: InferenceMode::OverConditioning,
            ..InferenceOptions::default()
        };
        let result = ctx.inference(&bisected, |m| *m == "lo", options).unwrap();
        assert_eq!(result.search_count, 1);
        assert_abs_diff_eq!(result.p_value, 0.3829249225480, epsilon = 1e-8);
        // Bounds stay loose: only one interval of the line was certified.
        assert!(result.sup_p - result.inf_p > 1e-3);
    }

    #[test]
    fn exhaustive_mode_covers_the_limits_window() {
        init_tracing();
        let mut ctx = std_norm_context(0.5);
        ctx.limits = subset(&[[-8.0, 8.0]]);
        let unit_cells = |_: &DVector<f64>, _: &DVector<f64>, z: f64| {
            let cell = z.floor();
            let model = if (cell as i64) % 2 == 0 { "even" } else { "odd" };
            (model, subset(&[[cell, cell + 1.0]]))
        };
        let options = InferenceOptions {
            alternative: Alternative::Less,
            inference_mode: InferenceMode::Exhaustive,
            ..InferenceOptions::default()
        };
        let result = ctx.inference(&unit_cells, |m| *m == "even", options).unwrap();
        let searched = RealSubset::new(&result.searched_intervals).unwrap();
        let truncated = RealSubset::new(&result.truncated_intervals).unwrap();
        assert!(ctx.limits.is_subset_of(&searched));
        assert!(truncated.is_subset_of(&searched));
        assert_abs_diff_eq!(result.inf_p, result.sup_p, epsilon = 1e-10);
        assert!(result.inf_p <= result.p_value + 1e-10);
        assert!(result.p_value <= result.sup_p + 1e-10);
        assert!(result.detect_count > 0);
    }

    #[test]
    fn stalled_search_raises_infinite_loop() {
        let ctx = std_norm_context(0.5);
        let stuck =
            |_: &DVector<f64>, _: &DVector<f64>, _: f64| ("only", subset(&[[0.0, 1.0]]));
        let err = ctx
            .inference(&stuck, |_| true, InferenceOptions::default())
            .unwrap_err();
        assert!(matches!(err, InferenceError::InfiniteLoop { .. }));
    }

    #[test]
    fn iteration_cap_raises_infinite_loop() {
        let ctx = std_norm_context(0.5);
        let crawling = |_: &DVector<f64>, _: &DVector<f64>, z: f64| {
            ("m", subset(&[[z - 1e-9, z + 1e-9]]))
        };
        let options = InferenceOptions { max_iter: 3, ..InferenceOptions::default() };
        let err = ctx.inference(&crawling, |_| true, options).unwrap_err();
        assert!(matches!(err, InferenceError::InfiniteLoop { search_count: 4 }));
    }

    #[test]
    fn absolute_alternative_with_zero_statistic_accepts() {
        let ctx = std_norm_context(0.0);
        let symmetric =
            |_: &DVector<f64>, _: &DVector<f64>, _: f64| ("m", subset(&[[-1.0, 1.0]]));
        let result = ctx
            .inference(&symmetric, |_| true, InferenceOptions::default())
            .unwrap();
        assert_abs_diff_eq!(result.p_value, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.inf_p, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(result.sup_p, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn reruns_are_deterministic() {
        let run = || {
            let ctx = std_norm_context(-0.5);
            let options = InferenceOptions {
                alternative: Alternative::TwoSided,
                ..InferenceOptions::default()
            };
            ctx.inference(&bisected, |m| *m == "lo", options).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.p_value, second.p_value);
        assert_eq!(first.inf_p, second.inf_p);
        assert_eq!(first.sup_p, second.sup_p);
        assert_eq!(first.searched_intervals, second.searched_intervals);
        assert_eq!(first.search_count, second.search_count);
    }

    #[test]
    fn custom_strategy_and_termination_are_honored() {
        let ctx = std_norm_context(-0.5);
        let options = InferenceOptions {
            alternative: Alternative::Less,
            search_strategy: SearchStrategy::custom(|searched: &RealSubset| {
                if searched.is_empty() {
                    vec![-0.5]
                } else {
                    vec![searched.supremum().unwrap_or(0.0) + 0.25]
                }
            }),
            termination: TerminationCriterion::custom(|searched: &RealSubset, _: &RealSubset| {
                searched.supremum().map_or(false, |u| u > 2.0)
            }),
            ..InferenceOptions::default()
        };
        let result = ctx.inference(&bisected, |m| *m == "lo", options).unwrap();
        assert!(result.search_count >= 2);
        assert_abs_diff_eq!(result.p_value, 0.3829249225480, epsilon = 1e-8);
    }

    #[test]
    fn parallel_probing_matches_serial_results() {
        let serial_ctx = std_norm_context(-0.5);
        let options = |n_jobs: usize| InferenceOptions {
            alternative: Alternative::Less,
            search_strategy: SearchStrategy::Parallel,
            n_jobs,
            ..InferenceOptions::default()
        };
        let serial = serial_ctx
            .inference(&bisected, |m| *m == "lo", options(1))
            .unwrap();
        let parallel = serial_ctx
            .inference(&bisected, |m| *m == "lo", options(2))
            .unwrap();
        assert_abs_diff_eq!(serial.p_value, parallel.p_value, epsilon = 1e-10);
        assert_abs_diff_eq!(serial.inf_p, parallel.inf_p, epsilon = 1e-10);
    }

    #[test]
    fn bad_options_are_rejected() {
        let ctx = std_norm_context(0.5);
        let trivial =
            |_: &DVector<f64>, _: &DVector<f64>, _: f64| ((), RealSubset::whole_line());
        let err = ctx
            .inference(
                &trivial,
                |_| true,
                InferenceOptions { n_jobs: 0, ..InferenceOptions::default() },
            )
            .unwrap_err();
        assert!(matches!(err, InferenceError::BadJobCount(0)));
        let err = ctx
            .inference(
                &trivial,
                |_| true,
                InferenceOptions { step: -1.0, ..InferenceOptions::default() },
            )
            .unwrap_err();
        assert!(matches!(err, InferenceError::BadStep(_)));
    }
}
