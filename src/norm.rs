//! Front-ends for statistics that are normal under the null.
//!
//! Given data `x`, a covariance descriptor `Σ` and a contrast vector `η`,
//! the selective front-end derives the observed statistic `ηᵀx`, the line
//! `x(z) = a + b·z` with `b = Ση/ηᵀΣη` and `a = x − (ηᵀx)·b`, the null
//! `Normal(μ₀, ηᵀΣη)`, and a numerical window wide enough for any
//! plausible statistic. The naive front-end evaluates the untruncated
//! normal CDF at the same statistic.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal as StatrsNormal};

use crate::cdf::NullDistribution;
use crate::inference::{pvalue_from_cdf, InferenceContext, InferenceError, SelectionAlgorithm};
use crate::intervals::RealSubset;
use crate::{Alternative, InferenceOptions, InferenceResult};

/// Covariance descriptor of the observed data.
///
/// A scalar means `σ²·I`, a vector means `diag(σ²₁, …, σ²ₙ)`, and a
/// matrix is used as-is.
#[derive(Clone, Debug)]
pub enum Covariance {
    /// Homoscedastic: `Σ = σ²·I`.
    Scalar(f64),
    /// Independent coordinates: `Σ = diag(v)`.
    Diagonal(DVector<f64>),
    /// Full covariance matrix.
    Matrix(DMatrix<f64>),
}

impl From<f64> for Covariance {
    fn from(variance: f64) -> Self {
        Self::Scalar(variance)
    }
}

impl From<DVector<f64>> for Covariance {
    fn from(diagonal: DVector<f64>) -> Self {
        Self::Diagonal(diagonal)
    }
}

impl From<DMatrix<f64>> for Covariance {
    fn from(matrix: DMatrix<f64>) -> Self {
        Self::Matrix(matrix)
    }
}

impl Covariance {
    /// `Σ·v`.
    pub(crate) fn apply(&self, v: &DVector<f64>) -> Result<DVector<f64>, InferenceError> {
        match self {
            Covariance::Scalar(variance) => {
                if !variance.is_finite() || *variance <= 0.0 {
                    return Err(InferenceError::BadCovariance("scalar variance must be positive"));
                }
                Ok(v * *variance)
            }
            Covariance::Diagonal(diagonal) => {
                if diagonal.len() != v.len() {
                    return Err(InferenceError::DimensionMismatch {
                        expected: v.len(),
                        got: diagonal.len(),
                    });
                }
                if diagonal.iter().any(|&d| !d.is_finite() || d <= 0.0) {
                    return Err(InferenceError::BadCovariance(
                        "diagonal variances must be positive",
                    ));
                }
                Ok(diagonal.component_mul(v))
            }
            Covariance::Matrix(matrix) => {
                if matrix.nrows() != v.len() || matrix.ncols() != v.len() {
                    return Err(InferenceError::DimensionMismatch {
                        expected: v.len(),
                        got: matrix.nrows(),
                    });
                }
                Ok(matrix * v)
            }
        }
    }

    /// `Σ^{−1/2}·v`, via a symmetric eigendecomposition in the matrix
    /// case. Requires a positive-definite covariance.
    pub(crate) fn whiten(&self, v: &DVector<f64>) -> Result<DVector<f64>, InferenceError> {
        match self {
            Covariance::Scalar(variance) => {
                if !variance.is_finite() || *variance <= 0.0 {
                    return Err(InferenceError::BadCovariance("scalar variance must be positive"));
                }
                Ok(v * variance.powf(-0.5))
            }
            Covariance::Diagonal(diagonal) => {
                if diagonal.len() != v.len() {
                    return Err(InferenceError::DimensionMismatch {
                        expected: v.len(),
                        got: diagonal.len(),
                    });
                }
                if diagonal.iter().any(|&d| !d.is_finite() || d <= 0.0) {
                    return Err(InferenceError::BadCovariance(
                        "diagonal variances must be positive",
                    ));
                }
                let scale = DVector::from_iterator(
                    diagonal.len(),
                    diagonal.iter().map(|&d| d.powf(-0.5)),
                );
                Ok(scale.component_mul(v))
            }
            Covariance::Matrix(matrix) => {
                if matrix.nrows() != v.len() || matrix.ncols() != v.len() {
                    return Err(InferenceError::DimensionMismatch {
                        expected: v.len(),
                        got: matrix.nrows(),
                    });
                }
                let eigen = matrix.clone().symmetric_eigen();
                if eigen.eigenvalues.iter().any(|&l| !l.is_finite() || l <= 0.0) {
                    return Err(InferenceError::BadCovariance(
                        "covariance matrix must be positive definite",
                    ));
                }
                let scale = DVector::from_iterator(
                    eigen.eigenvalues.len(),
                    eigen.eigenvalues.iter().map(|&l| l.powf(-0.5)),
                );
                let rotated = eigen.eigenvectors.transpose() * v;
                Ok(&eigen.eigenvectors * rotated.component_mul(&scale))
            }
        }
    }
}

/// Selective inference for a contrast `ηᵀx` of normal data.
#[derive(Clone, Debug)]
pub struct SelectiveInferenceNorm {
    context: InferenceContext,
}

impl SelectiveInferenceNorm {
    /// Build the front-end with a zero null mean.
    pub fn new(
        data: DVector<f64>,
        cov: impl Into<Covariance>,
        eta: DVector<f64>,
    ) -> Result<Self, InferenceError> {
        Self::with_null_mean(data, cov, eta, 0.0)
    }

    /// Build the front-end testing `ηᵀμ = null_mean`.
    pub fn with_null_mean(
        data: DVector<f64>,
        cov: impl Into<Covariance>,
        eta: DVector<f64>,
        null_mean: f64,
    ) -> Result<Self, InferenceError> {
        if eta.len() != data.len() {
            return Err(InferenceError::DimensionMismatch {
                expected: data.len(),
                got: eta.len(),
            });
        }
        let cov = cov.into();
        let stat = eta.dot(&data);
        if !stat.is_finite() {
            return Err(InferenceError::DegenerateStatistic(stat));
        }
        let sigma_eta = cov.apply(&eta)?;
        let eta_sigma_eta = eta.dot(&sigma_eta);
        if !eta_sigma_eta.is_finite() || eta_sigma_eta <= 0.0 {
            return Err(InferenceError::DegenerateVariance(eta_sigma_eta));
        }

        let b = &sigma_eta / eta_sigma_eta;
        let a = &data - &b * stat;
        let sd = eta_sigma_eta.sqrt();
        let standardized = (stat - null_mean) / sd;
        let reach = 30f64.max(10.0 + standardized.abs());
        let limits = RealSubset::interval(null_mean - reach * sd, null_mean + reach * sd)?;

        let null = NullDistribution::Norm { mean: null_mean, var: eta_sigma_eta };
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

    /// Observed statistic `ηᵀx`.
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

/// Classical (unconditional) inference for a contrast of normal data.
#[derive(Clone, Debug)]
pub struct NaiveInferenceNorm {
    stat: f64,
    null: StatrsNormal,
}

impl NaiveInferenceNorm {
    /// Build the front-end with a zero null mean.
    pub fn new(
        data: DVector<f64>,
        cov: impl Into<Covariance>,
        eta: DVector<f64>,
    ) -> Result<Self, InferenceError> {
        Self::with_null_mean(data, cov, eta, 0.0)
    }

    /// Build the front-end testing `ηᵀμ = null_mean`.
    pub fn with_null_mean(
        data: DVector<f64>,
        cov: impl Into<Covariance>,
        eta: DVector<f64>,
        null_mean: f64,
    ) -> Result<Self, InferenceError> {
        if eta.len() != data.len() {
            return Err(InferenceError::DimensionMismatch {
                expected: data.len(),
                got: eta.len(),
            });
        }
        let cov = cov.into();
        let stat = eta.dot(&data);
        let sigma_eta = cov.apply(&eta)?;
        let eta_sigma_eta = eta.dot(&sigma_eta);
        let null = StatrsNormal::new(null_mean, eta_sigma_eta.sqrt())
            .map_err(|_| InferenceError::DegenerateVariance(eta_sigma_eta))?;
        Ok(Self { stat, null })
    }

    /// Observed statistic `ηᵀx`.
    pub fn stat(&self) -> f64 {
        self.stat
    }

    /// P-value of the untruncated test.
    pub fn inference(&self, alternative: Alternative) -> f64 {
        pvalue_from_cdf(self.null.cdf(self.stat), alternative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const INF: f64 = f64::INFINITY;
    const NINF: f64 = f64::NEG_INFINITY;

    fn subset(pairs: &[[f64; 2]]) -> RealSubset {
        RealSubset::new(pairs).expect("valid pairs")
    }

    #[test]
    fn derives_the_line_through_the_observation() {
        let data = DVector::from_vec(vec![2.0, 1.0, 0.0]);
        let eta = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let si = SelectiveInferenceNorm::new(data.clone(), 1.0, eta).unwrap();
        assert_abs_diff_eq!(si.stat(), 2.0, epsilon = 1e-12);
        let ctx = si.context();
        // data = a + b·stat must reproduce the observation.
        let rebuilt = &ctx.a + &ctx.b * ctx.stat;
        assert_abs_diff_eq!((rebuilt - data).norm(), 0.0, epsilon = 1e-12);
        assert_eq!(ctx.b.as_slice(), &[1.0, 0.0, 0.0]);
        assert_eq!(ctx.a.as_slice(), &[0.0, 1.0, 0.0]);
        // |standardized| = 2 < 20, so the window spans ±30 σ.
        assert_eq!(ctx.limits, subset(&[[-30.0, 30.0]]));
        assert_eq!(ctx.support, RealSubset::whole_line());
    }

    #[test]
    fn covariance_shapes_agree_on_equivalent_inputs() -> anyhow::Result<()> {
        let data = DVector::from_vec(vec![1.0, -1.0]);
        let eta = DVector::from_vec(vec![1.0, 1.0]);
        let scalar = SelectiveInferenceNorm::new(data.clone(), 4.0, eta.clone())?;
        let diagonal = SelectiveInferenceNorm::new(
            data.clone(),
            DVector::from_vec(vec![4.0, 4.0]),
            eta.clone(),
        )?;
        let full = SelectiveInferenceNorm::new(
            data,
            DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 4.0])),
            eta,
        )?;
        for si in [&diagonal, &full] {
            assert_abs_diff_eq!(
                (si.context().b.clone() - scalar.context().b.clone()).norm(),
                0.0,
                epsilon = 1e-12
            );
            assert_eq!(si.context().null, scalar.context().null);
        }
        Ok(())
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let data = DVector::from_vec(vec![1.0, 2.0]);
        let eta = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        assert!(matches!(
            SelectiveInferenceNorm::new(data.clone(), 1.0, eta),
            Err(InferenceError::DimensionMismatch { .. })
        ));
        let eta = DVector::from_vec(vec![1.0, 0.0]);
        assert!(matches!(
            SelectiveInferenceNorm::new(data.clone(), -1.0, eta.clone()),
            Err(InferenceError::BadCovariance(_))
        ));
        assert!(matches!(
            SelectiveInferenceNorm::new(data, 1.0, DVector::from_vec(vec![0.0, 0.0])),
            Err(InferenceError::DegenerateVariance(_))
        ));
    }

    #[test]
    fn naive_pvalue_matches_the_normal_cdf() {
        let data = DVector::from_vec(vec![2.0, 1.0, 0.0]);
        let eta = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let naive = NaiveInferenceNorm::new(data, 1.0, eta).unwrap();
        // Φ(2) = 0.9772498680518208
        assert_abs_diff_eq!(
            naive.inference(Alternative::Less),
            1.0 - 0.9772498680518208,
            epsilon = 1e-10
        );
        assert_abs_diff_eq!(
            naive.inference(Alternative::TwoSided),
            2.0 * (1.0 - 0.9772498680518208),
            epsilon = 1e-10
        );
    }

    #[test]
    fn selective_pvalue_on_a_sign_selection_event() {
        // x₁(z) = z along the line, so selection on the sign of the first
        // coordinate bisects the parametrization at the origin.
        let data = DVector::from_vec(vec![2.0, 1.0, 0.0]);
        let eta = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let si = SelectiveInferenceNorm::new(data, 1.0, eta).unwrap();
        let sign = |a: &DVector<f64>, b: &DVector<f64>, z: f64| {
            let first = a[0] + b[0] * z;
            if first >= 0.0 {
                ("nonneg", subset(&[[0.0, INF]]))
            } else {
                ("neg", subset(&[[NINF, 0.0]]))
            }
        };
        let options = InferenceOptions {
            alternative: Alternative::Less,
            ..InferenceOptions::default()
        };
        let result = si.inference(&sign, |m| *m == "nonneg", options).unwrap();
        // Truncated to [0, ∞): p = (1 − Φ(2)) / (1 − Φ(0)).
        assert_abs_diff_eq!(result.p_value, 0.04550026389635842, epsilon = 1e-8);
        assert!(result.inf_p <= result.p_value + 1e-12);
        assert!(result.p_value <= result.sup_p + 1e-12);
    }
}
