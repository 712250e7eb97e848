//! Sublevel sets of univariate polynomials as [`RealSubset`] values.
//!
//! [`polynomial_below_zero`] computes `{z : p(z) ≤ 0}` for a polynomial
//! given by ascending coefficients. Roots come from the eigenvalues of the
//! companion matrix; the sign of `p` is then probed once per segment of the
//! induced partition of ℝ. [`polytope_below_zero`] reduces a quadric
//! selection event `{x : xᵀAx + βᵀx + γ ≤ 0}` along the line
//! `x(z) = a + b·z` to the quadratic case.
//!
//! This is the only module with a numerical tolerance: `tol` zeroes
//! negligible coefficients, rejects roots with a non-negligible imaginary
//! part, and merges root clusters tighter than `tol`. The interval algebra
//! itself stays exact.

use nalgebra::{Complex, DMatrix, DVector};

use crate::intervals::{Interval, RealSubset};

/// Default tolerance for coefficient zeroing and root filtering.
pub const DEFAULT_TOL: f64 = 1e-10;

/// Errors raised by the polynomial reductions.
#[derive(Debug, thiserror::Error)]
pub enum PolynomialError {
    /// A coefficient is NaN or infinite.
    #[error("non-finite coefficient {value} at degree {degree}")]
    NonFiniteCoefficient {
        /// Degree of the offending coefficient.
        degree: usize,
        /// Offending value.
        value: f64,
    },
    /// Polytope pieces disagree with the dimension of `a` and `b`.
    #[error("polytope term of dimension {got} does not match vectors of dimension {expected}")]
    DimensionMismatch {
        /// Dimension of `a` and `b`.
        expected: usize,
        /// Dimension of the offending term.
        got: usize,
    },
}

/// Compute `{z : p(z) ≤ 0}` for `p(z) = Σ coefs[i]·zⁱ`.
///
/// Coefficients with `|c| < tol` are treated as zero, complex eigenvalues
/// with `|imag| ≥ tol` are discarded, and surviving real roots closer than
/// `tol` collapse into one. A constant polynomial yields ℝ or ∅ by the
/// sign of `c₀`, as does a polynomial without real roots by the sign of
/// `p(0)`.
pub fn polynomial_below_zero(coefs: &[f64], tol: f64) -> Result<RealSubset, PolynomialError> {
    for (degree, &value) in coefs.iter().enumerate() {
        if !value.is_finite() {
            return Err(PolynomialError::NonFiniteCoefficient { degree, value });
        }
    }
    let coefs: Vec<f64> = coefs
        .iter()
        .map(|&c| if c.abs() < tol { 0.0 } else { c })
        .collect();

    let degree = match coefs.iter().rposition(|&c| c != 0.0) {
        // All coefficients vanished: p ≡ 0 ≤ 0 everywhere.
        None => return Ok(RealSubset::whole_line()),
        Some(d) => d,
    };
    if degree == 0 {
        return Ok(if coefs[0] <= 0.0 {
            RealSubset::whole_line()
        } else {
            RealSubset::empty()
        });
    }

    let mut roots = real_roots(&coefs[..=degree], tol);
    roots.sort_by(f64::total_cmp);
    roots.dedup_by(|next, kept| (*next - *kept).abs() < tol);

    if roots.is_empty() {
        return Ok(if evaluate(&coefs, 0.0) <= 0.0 {
            RealSubset::whole_line()
        } else {
            RealSubset::empty()
        });
    }

    // Probe one interior point per segment of the root partition.
    let mut intervals = Vec::new();
    let first = roots[0];
    if evaluate(&coefs, first - 1.0) <= 0.0 {
        intervals.push(Interval { lower: f64::NEG_INFINITY, upper: first });
    }
    for pair in roots.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        if evaluate(&coefs, (lower + upper) / 2.0) <= 0.0 {
            intervals.push(Interval { lower, upper });
        }
    }
    let last = roots[roots.len() - 1];
    if evaluate(&coefs, last + 1.0) <= 0.0 {
        intervals.push(Interval { lower: last, upper: f64::INFINITY });
    }
    Ok(RealSubset::from_intervals(intervals))
}

/// Reduce a quadric selection event along the line `x(z) = a + b·z`.
///
/// With any subset of `(A, β, γ)` present, the event
/// `{x : xᵀAx + βᵀx + γ ≤ 0}` restricted to the line becomes
/// `{z : αz² + β'z + γ' ≤ 0}` with `α = bᵀAb`,
/// `β' = aᵀAb + bᵀAa + βᵀb` and `γ' = aᵀAa + βᵀa + γ`.
pub fn polytope_below_zero(
    a: &DVector<f64>,
    b: &DVector<f64>,
    quadratic: Option<&DMatrix<f64>>,
    linear: Option<&DVector<f64>>,
    constant: Option<f64>,
    tol: f64,
) -> Result<RealSubset, PolynomialError> {
    let dim = a.len();
    if b.len() != dim {
        return Err(PolynomialError::DimensionMismatch { expected: dim, got: b.len() });
    }

    let mut alpha = 0.0;
    let mut beta = 0.0;
    let mut gamma = 0.0;

    if let Some(m) = quadratic {
        if m.nrows() != dim || m.ncols() != dim {
            return Err(PolynomialError::DimensionMismatch { expected: dim, got: m.nrows() });
        }
        let m_b = m * b;
        let m_a = m * a;
        alpha += b.dot(&m_b);
        beta += a.dot(&m_b) + b.dot(&m_a);
        gamma += a.dot(&m_a);
    }
    if let Some(v) = linear {
        if v.len() != dim {
            return Err(PolynomialError::DimensionMismatch { expected: dim, got: v.len() });
        }
        beta += v.dot(b);
        gamma += v.dot(a);
    }
    if let Some(c) = constant {
        gamma += c;
    }

    polynomial_below_zero(&[gamma, beta, alpha], tol)
}

/// Compute `{z : aᵢ + bᵢ·z ≤ 0 for every i}` for a family of linear
/// polynomials given as `[intercept, slope]` pairs.
///
/// This is the common fast path for selection events that are
/// intersections of half-planes along the line; it avoids any root
/// extraction.
pub fn linear_polynomials_below_zero(coefs: &[[f64; 2]]) -> Result<RealSubset, PolynomialError> {
    let mut feasible = RealSubset::whole_line();
    for (index, &[intercept, slope]) in coefs.iter().enumerate() {
        if !intercept.is_finite() || !slope.is_finite() {
            return Err(PolynomialError::NonFiniteCoefficient {
                degree: index,
                value: if intercept.is_finite() { slope } else { intercept },
            });
        }
        let half_line = if slope == 0.0 {
            if intercept <= 0.0 {
                continue;
            }
            RealSubset::empty()
        } else if slope > 0.0 {
            RealSubset::from_intervals(vec![Interval {
                lower: f64::NEG_INFINITY,
                upper: -intercept / slope,
            }])
        } else {
            RealSubset::from_intervals(vec![Interval {
                lower: -intercept / slope,
                upper: f64::INFINITY,
            }])
        };
        feasible = feasible.intersection(&half_line);
        if feasible.is_empty() {
            break;
        }
    }
    Ok(feasible)
}

/// Horner evaluation of `Σ coefs[i]·zⁱ`.
fn evaluate(coefs: &[f64], z: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, &c| acc * z + c)
}

/// Real parts of the companion-matrix eigenvalues with `|imag| < tol`.
fn real_roots(coefs: &[f64], tol: f64) -> Vec<f64> {
    let degree = coefs.len() - 1;
    let leading = coefs[degree];
    let mut companion = DMatrix::<f64>::zeros(degree, degree);
    for row in 1..degree {
        companion[(row, row - 1)] = 1.0;
    }
    for row in 0..degree {
        companion[(row, degree - 1)] = -coefs[row] / leading;
    }
    companion
        .complex_eigenvalues()
        .iter()
        .filter(|root: &&Complex<f64>| root.im.abs() < tol)
        .map(|root| root.re)
        .collect()
}
