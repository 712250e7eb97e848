//! Front-ends for statistics that are chi under the null.
//!
//! Given data `x`, a covariance descriptor `Σ` and a rank-`k` projection
//! matrix `P`, the whitened projection `y = Σ^{−1/2}Px` has a chi
//! distribution with `k` degrees of freedom under the null. The selective
//! front-end parametrizes the data on the signed radius: `b = Px/‖y‖`,
//! `a = x − Px`, support `[0, ∞)`.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{Chi as StatrsChi, ContinuousCDF};

use crate::cdf::NullDistribution;
use crate::inference::{pvalue_from_cdf, InferenceContext, InferenceError, SelectionAlgorithm};
use crate::intervals::RealSubset;
use crate::norm::Covariance;
use crate::{Alternative, InferenceOptions, InferenceResult};

/// Selective inference for the norm of a whitened projection.
#[derive(Clone, Debug)]
pub struct SelectiveInferenceChi {
    context: InferenceContext,
}

impl SelectiveInferenceChi {
    /// Build the front-end from data, covariance, projection matrix, and
    /// the projection rank `df`.
    pub fn new(
        data: DVector<f64>,
        cov: impl Into<Covariance>,
        projection: DMatrix<f64>,
        df: f64,
    ) -> Result<Self, InferenceError> {
        if !df.is_finite() || df <= 0.0 {
            return Err(InferenceError::BadDegrees(df));
        }
        let n = data.len();
        if projection.nrows() != n || projection.ncols() != n {
            return Err(InferenceError::DimensionMismatch {
                expected: n,
                got: projection.nrows(),
            });
        }
        let cov = cov.into();
        let projected = &projection * &data;
        let whitened = cov.whiten(&projected)?;
        let stat = whitened.norm();
        if !stat.is_finite() || stat <= 0.0 {
            return Err(InferenceError::DegenerateStatistic(stat));
        }

        let b = &projected / stat;
        let a = &data - &projected;
        let upper = (df + 4.0 * (2.0 * df).sqrt()).max(stat + 10.0);
        let limits = RealSubset::interval(0.0, upper)?;
        let null = NullDistribution::Chi { df };
        Ok(Self {
            context: InferenceContext {
                a,
                b,
                stat,
                support: null.support(),
                limits,
                null,
            },
        })
    }

    /// Observed statistic `‖Σ^{−1/2}Px‖₂`.
    pub fn stat(&self) -> f64 {
        self.context.stat
    }

    /// The derived line, null, and window.
    pub fn context(&self) -> &InferenceContext {
        &self.context
    }

    /// Run the parametric search; see
    /// [`InferenceContext::inference`] for the loop contract.
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
        self.context.inference(algorithm, model_selector, options)
    }
}

/// Classical (unconditional) inference for the whitened projection norm.
#[derive(Clone, Debug)]
pub struct NaiveInferenceChi {
    stat: f64,
    null: StatrsChi,
}

impl NaiveInferenceChi {
    /// Build the front-end from data, covariance, projection matrix, and
    /// the projection rank `df`.
    pub fn new(
        data: DVector<f64>,
        cov: impl Into<Covariance>,
        projection: DMatrix<f64>,
        df: f64,
    ) -> Result<Self, InferenceError> {
        let n = data.len();
        if projection.nrows() != n || projection.ncols() != n {
            return Err(InferenceError::DimensionMismatch {
                expected: n,
                got: projection.nrows(),
            });
        }
        let cov = cov.into();
        let projected = &projection * &data;
        let whitened = cov.whiten(&projected)?;
        let stat = whitened.norm();
        let null = StatrsChi::new(df).map_err(|_| InferenceError::BadDegrees(df))?;
        Ok(Self { stat, null })
    }

    /// Observed statistic `‖Σ^{−1/2}Px‖₂`.
    pub fn stat(&self) -> f64 {
        self.stat
    }

    /// P-value of the untruncated test.
    pub fn inference(&self, alternative: Alternative) -> f64 {
        pvalue_from_cdf(self.null.cdf(self.stat), alternative)
    }
}
