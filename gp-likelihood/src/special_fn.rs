//! Scalar helpers shared across the likelihood implementations.

use ndarray::prelude::*;

/// Largest argument for which `exp` still returns a finite `f64`.
pub const MAX_EXP_ARG: f64 = 709.782712893384;

/// `exp(x)` with the argument capped so the result stays finite.
/// NaN arguments propagate unchanged.
pub fn safe_exp(x: f64) -> f64 {
    x.clamp(f64::NEG_INFINITY, MAX_EXP_ARG).exp()
}

/// Trigamma function `psi_1(x)`, the second derivative of `ln Gamma(x)`.
///
/// Uses the recurrence `psi_1(x) = psi_1(x + 1) + 1/x^2` to shift the
/// argument above 10, then the asymptotic expansion
/// `1/z + 1/(2 z^2) + 1/(6 z^3) - 1/(30 z^5) + 1/(42 z^7) - 1/(30 z^9)`.
/// Non-positive arguments return NaN.
pub fn trigamma(x: f64) -> f64 {
    if x.is_nan() || x <= 0.0 {
        return f64::NAN;
    }

    let mut z = x;
    let mut acc = 0.0;
    while z < 10.0 {
        acc += 1.0 / (z * z);
        z += 1.0;
    }

    let inv = 1.0 / z;
    let inv2 = inv * inv;
    let series = inv
        * (1.0
            + inv
                * (0.5
                    + inv
                        * (1.0 / 6.0
                            + inv2 * (-1.0 / 30.0 + inv2 * (1.0 / 42.0 + inv2 * (-1.0 / 30.0))))));
    acc + series
}

/// Numerically stable `ln(sum_i exp(x_i))`.
pub fn log_sum_exp(xs: ArrayView1<f64>) -> f64 {
    let max_x = xs.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !max_x.is_finite() {
        return max_x;
    }
    let sum = xs.fold(0.0, |a, &b| a + (b - max_x).exp());
    max_x + sum.ln()
}
