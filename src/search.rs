//! Probe-point selection and stopping rules for the parametric search.
//!
//! A strategy maps the currently searched [`RealSubset`] to the next batch
//! of probe points on the line; a termination criterion decides when the
//! driver may stop. Both come in named flavors mirroring the parametric
//! selective-inference literature (π₁ prefers probes near the statistic,
//! π₂ prefers high null density, π₃ mixes the two) plus caller-supplied
//! closures for everything else. Strategies that randomize take an
//! explicit seeded RNG; nothing here touches a global generator.

use std::fmt;

use rand::rngs::StdRng;
use rand::Rng;

use crate::cdf::NullDistribution;
use crate::intervals::{Interval, RealSubset};

/// Shared read-only context handed to the named strategies.
pub(crate) struct SearchContext<'a> {
    /// Observed test statistic.
    pub stat: f64,
    /// Null distribution (mode and density drive the π metrics).
    pub null: &'a NullDistribution,
    /// Support of the null density.
    pub support: &'a RealSubset,
    /// Numerical restriction window.
    pub limits: &'a RealSubset,
    /// Base probe offset.
    pub step: f64,
    /// Worker count (sizes the parallel batches).
    pub n_jobs: usize,
}

/// How the next probe points are chosen in parametric mode.
pub enum SearchStrategy {
    /// π₁: target the statistic, prefer probes near it.
    NearStatistic,
    /// π₂: target the mode of the null, prefer high-density probes.
    HighDensity,
    /// π₃: target the statistic, break ties by density (default).
    NearStatisticHighDensity,
    /// Batches of probes in expanding shells, sized for `n_jobs` workers.
    Parallel,
    /// Probe the midpoint of a uniformly chosen unexplored gap.
    Random(StdRng),
    /// Caller-supplied strategy over the searched set.
    Custom(Box<dyn FnMut(&RealSubset) -> Vec<f64>>),
}

impl Default for SearchStrategy {
    fn default() -> Self {
        Self::NearStatisticHighDensity
    }
}

impl fmt::Debug for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NearStatistic => "NearStatistic",
            Self::HighDensity => "HighDensity",
            Self::NearStatisticHighDensity => "NearStatisticHighDensity",
            Self::Parallel => "Parallel",
            Self::Random(_) => "Random",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl SearchStrategy {
    /// Wrap a custom probe-selection closure.
    pub fn custom(f: impl FnMut(&RealSubset) -> Vec<f64> + 'static) -> Self {
        Self::Custom(Box::new(f))
    }

    /// Randomized gap probing with an explicit RNG.
    pub fn random(rng: StdRng) -> Self {
        Self::Random(rng)
    }

    pub(crate) fn next_probes(
        &mut self,
        ctx: &SearchContext<'_>,
        searched: &RealSubset,
    ) -> Vec<f64> {
        match self {
            Self::NearStatistic => {
                directed_probe(ctx, searched, ctx.stat, |z| (z - ctx.stat).abs())
            }
            Self::HighDensity => {
                directed_probe(ctx, searched, ctx.null.mode(), |z| -ctx.null.ln_pdf(z))
            }
            Self::NearStatisticHighDensity => {
                directed_probe(ctx, searched, ctx.stat, |z| -ctx.null.ln_pdf(z))
            }
            Self::Parallel => parallel_probes(ctx, searched),
            Self::Random(rng) => random_probe(rng, ctx, searched),
            Self::Custom(f) => f(searched),
        }
    }
}

/// When the driver may stop iterating (parametric mode).
pub enum TerminationCriterion {
    /// Stop once `sup_p − inf_p` drops below the configured precision.
    Precision,
    /// Stop once the test decision is settled at the significance level.
    Decision,
    /// Caller-supplied predicate over `(searched, truncated)`.
    Custom(Box<dyn FnMut(&RealSubset, &RealSubset) -> bool>),
}

impl Default for TerminationCriterion {
    fn default() -> Self {
        Self::Precision
    }
}

impl fmt::Debug for TerminationCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Precision => "Precision",
            Self::Decision => "Decision",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl TerminationCriterion {
    /// Wrap a custom stopping predicate.
    pub fn custom(f: impl FnMut(&RealSubset, &RealSubset) -> bool + 'static) -> Self {
        Self::Custom(Box::new(f))
    }
}

/// Exhaustive sweep: seed at the lower limit, then step past the first
/// covered interval's right endpoint until the limits window is exhausted.
pub(crate) fn exhaustive_probes(ctx: &SearchContext<'_>, searched: &RealSubset) -> Vec<f64> {
    if searched.is_empty() {
        return ctx.limits.infimum().map(|z| vec![z]).unwrap_or_default();
    }
    vec![searched.intervals()[0].upper + ctx.step]
}

/// Generic directed rule shared by the π strategies: probe the target when
/// it is unexplored, otherwise step off the searched interval containing
/// it, shrinking the offset tenfold (down to 1e-11) until an unexplored
/// point appears, and keep the candidate minimizing the metric.
fn directed_probe(
    ctx: &SearchContext<'_>,
    searched: &RealSubset,
    target: f64,
    metric: impl Fn(f64) -> f64,
) -> Vec<f64> {
    if searched.is_empty() {
        return vec![ctx.stat];
    }
    let unsearched = ctx.support.difference(searched);
    if unsearched.contains(target) {
        return vec![target];
    }
    let host = match searched.find_interval_containing(target) {
        Ok(host) => host,
        Err(_) => return Vec::new(),
    };

    let mut candidates = Vec::with_capacity(2);
    for (endpoint, sign) in [(host.lower, -1.0), (host.upper, 1.0)] {
        if !endpoint.is_finite() {
            continue;
        }
        let mut delta = ctx.step;
        while delta >= 1e-11 {
            let probe = endpoint + sign * delta;
            if unsearched.contains(probe) {
                candidates.push(probe);
                break;
            }
            delta /= 10.0;
        }
    }
    candidates
        .into_iter()
        .min_by(|a, b| metric(*a).total_cmp(&metric(*b)))
        .map(|z| vec![z])
        .unwrap_or_default()
}

/// Batch strategy for worker pools: `n_jobs × 4` probes in symmetric
/// shells of width 0.5 expanding outward from the statistic (or from the
/// denser endpoint of the searched interval that contains it).
fn parallel_probes(ctx: &SearchContext<'_>, searched: &RealSubset) -> Vec<f64> {
    const POINTS_PER_JOB: usize = 4;
    const EXPAND_WIDTH: f64 = 0.5;

    let want = ctx.n_jobs.max(1) * POINTS_PER_JOB;
    let unsearched = ctx.support.difference(searched);
    if unsearched.is_empty() {
        return Vec::new();
    }

    let mut probes = Vec::with_capacity(want);
    let loc = if unsearched.contains(ctx.stat) {
        probes.push(ctx.stat);
        ctx.stat
    } else {
        match searched.find_interval_containing(ctx.stat) {
            Ok(host) => {
                if ctx.null.ln_pdf(host.lower) >= ctx.null.ln_pdf(host.upper) {
                    host.lower
                } else {
                    host.upper
                }
            }
            Err(_) => ctx.stat,
        }
    };

    let mut tail = 0.0;
    while probes.len() < want {
        let (inner, outer) = (tail, tail + EXPAND_WIDTH);
        let shell = RealSubset::from_intervals(vec![
            Interval { lower: loc - outer, upper: loc - inner },
            Interval { lower: loc + inner, upper: loc + outer },
        ]);
        let ring = unsearched.intersection(&shell);
        for iv in ring.iter_intervals() {
            if iv.lower + ctx.step < iv.upper {
                let mut z = iv.lower + ctx.step;
                while z < iv.upper && probes.len() < want {
                    probes.push(z);
                    z += ctx.step;
                }
            } else if probes.len() < want {
                probes.push((iv.lower + iv.upper) / 2.0);
            }
        }
        if ring.is_empty() {
            // Jump the shell radius to the nearest unexplored point so a
            // distant gap cannot stall the expansion.
            let span =
                RealSubset::from_intervals(vec![Interval { lower: loc - outer, upper: loc + outer }]);
            let nearest = unsearched
                .difference(&span)
                .iter_intervals()
                .map(|iv| gap_distance(loc, iv))
                .fold(f64::INFINITY, f64::min);
            if !nearest.is_finite() {
                break;
            }
            tail = nearest.max(outer);
        } else {
            tail = outer;
        }
    }
    probes
}

fn gap_distance(loc: f64, iv: Interval) -> f64 {
    if iv.lower > loc {
        iv.lower - loc
    } else if iv.upper < loc {
        loc - iv.upper
    } else {
        0.0
    }
}

/// Probe the midpoint of a uniformly chosen unexplored gap inside the
/// limits window.
fn random_probe(rng: &mut StdRng, ctx: &SearchContext<'_>, searched: &RealSubset) -> Vec<f64> {
    if searched.is_empty() {
        return vec![ctx.stat];
    }
    let gaps = ctx.limits.difference(searched);
    if gaps.is_empty() {
        return Vec::new();
    }
    let pick = gaps.intervals()[rng.gen_range(0..gaps.intervals().len())];
    let midpoint = (pick.lower + pick.upper) / 2.0;
    let probe = if midpoint.is_finite() {
        midpoint
    } else if pick.lower.is_finite() {
        pick.lower + ctx.step
    } else {
        pick.upper - ctx.step
    };
    vec![probe]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn subset(pairs: &[[f64; 2]]) -> RealSubset {
        RealSubset::new(pairs).expect("valid pairs")
    }

    struct Fixture {
        null: NullDistribution,
        support: RealSubset,
        limits: RealSubset,
    }

    impl Fixture {
        fn std_norm(limit: f64) -> Self {
            Self {
                null: NullDistribution::Norm { mean: 0.0, var: 1.0 },
                support: RealSubset::whole_line(),
                limits: subset(&[[-limit, limit]]),
            }
        }

        fn ctx(&self, stat: f64, n_jobs: usize) -> SearchContext<'_> {
            SearchContext {
                stat,
                null: &self.null,
                support: &self.support,
                limits: &self.limits,
                step: 1e-6,
                n_jobs,
            }
        }
    }

    #[test]
    fn empty_search_starts_at_the_statistic() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(1.25, 1);
        for mut strategy in [
            SearchStrategy::NearStatistic,
            SearchStrategy::HighDensity,
            SearchStrategy::NearStatisticHighDensity,
        ] {
            assert_eq!(strategy.next_probes(&ctx, &RealSubset::empty()), vec![1.25]);
        }
    }

    #[test]
    fn near_statistic_steps_off_the_closer_endpoint() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(1.8, 1);
        let searched = subset(&[[-1.0, 2.0]]);
        let probes = SearchStrategy::NearStatistic.next_probes(&ctx, &searched);
        assert_eq!(probes.len(), 1);
        assert!((probes[0] - (2.0 + 1e-6)).abs() < 1e-12);
    }

    #[test]
    fn density_metric_prefers_the_mode_side() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(0.5, 1);
        // Statistic sits inside an asymmetric searched block: the step off
        // the right endpoint (4) has far lower density than the left (−1).
        let searched = subset(&[[-1.0, 4.0]]);
        let probes = SearchStrategy::NearStatisticHighDensity.next_probes(&ctx, &searched);
        assert_eq!(probes.len(), 1);
        assert!((probes[0] - (-1.0 - 1e-6)).abs() < 1e-12);
    }

    #[test]
    fn offset_decays_until_an_unexplored_point_appears() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(2.1, 1);
        // The gap (2, 2.0000005) is narrower than one full step, so the
        // upward candidate from the host interval must shrink its offset.
        let searched = subset(&[[-5.0, 2.0], [2.0000005, 5.0]]);
        let unsearched = ctx.support.difference(&searched);
        let probes = SearchStrategy::NearStatistic.next_probes(&ctx, &searched);
        assert_eq!(probes.len(), 1);
        assert!(unsearched.contains(probes[0]));
        assert!(probes[0] > 2.0 && probes[0] < 2.0000005);
    }

    #[test]
    fn target_probed_directly_when_unexplored() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(1.0, 1);
        let searched = subset(&[[2.0, 3.0]]);
        let probes = SearchStrategy::NearStatistic.next_probes(&ctx, &searched);
        assert_eq!(probes, vec![1.0]);
    }

    #[test]
    fn exhaustive_seeds_at_the_lower_limit_then_walks() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(0.0, 1);
        assert_eq!(exhaustive_probes(&ctx, &RealSubset::empty()), vec![-30.0]);
        let searched = subset(&[[-30.0, -12.0], [3.0, 4.0]]);
        let probes = exhaustive_probes(&ctx, &searched);
        assert!((probes[0] - (-12.0 + 1e-6)).abs() < 1e-12);
    }

    #[test]
    fn parallel_batches_scale_with_jobs() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(0.3, 3);
        let probes = SearchStrategy::Parallel.next_probes(&ctx, &RealSubset::empty());
        assert_eq!(probes.len(), 12);
        assert_eq!(probes[0], 0.3);
        let unsearched = ctx.support.clone();
        assert!(probes.iter().all(|&z| unsearched.contains(z)));
    }

    #[test]
    fn parallel_jumps_over_a_distant_gap() {
        let fx = Fixture::std_norm(200.0);
        let ctx = fx.ctx(0.0, 1);
        // The statistic sits in a sliver narrower than one step; once that
        // sliver is emitted the nearest remaining gap is 20 away and the
        // shell radius must jump to it instead of crawling.
        let searched = subset(&[[-100.0, -1e-7], [1e-7, 20.0], [21.0, 100.0]]);
        let probes = SearchStrategy::Parallel.next_probes(&ctx, &searched);
        let unsearched = ctx.support.difference(&searched);
        assert_eq!(probes.len(), 4);
        assert!(probes.iter().all(|&z| unsearched.contains(z)));
        assert!(probes.iter().any(|&z| z > 19.0));
    }

    #[test]
    fn random_probe_is_reproducible_and_lands_in_a_gap() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(0.0, 1);
        let searched = subset(&[[-30.0, -10.0], [-5.0, 5.0], [12.0, 30.0]]);
        let gaps = ctx.limits.difference(&searched);

        let mut first = SearchStrategy::random(StdRng::seed_from_u64(7));
        let mut second = SearchStrategy::random(StdRng::seed_from_u64(7));
        let a = first.next_probes(&ctx, &searched);
        let b = second.next_probes(&ctx, &searched);
        assert_eq!(a, b);
        assert!(gaps.contains(a[0]));
    }

    #[test]
    fn custom_strategy_sees_the_searched_set() {
        let fx = Fixture::std_norm(30.0);
        let ctx = fx.ctx(0.0, 1);
        let searched = subset(&[[-1.0, 1.0]]);
        let mut strategy =
            SearchStrategy::custom(|s: &RealSubset| vec![s.supremum().unwrap_or(0.0) + 0.5]);
        assert_eq!(strategy.next_probes(&ctx, &searched), vec![1.5]);
    }
}
