//! Gauss-Hermite quadrature rules of arbitrary order.
//!
//! Nodes and weights follow the physicists' convention, integrating against
//! the weight function `exp(-x²)`:
//!
//! ```text
//! ∫ g(x) exp(-x²) dx ≈ Σ_t w_t g(x_t)
//! ```
//!
//! For a Gaussian expectation with f ~ N(m, v), substitute f = m + √(2v) x
//! and divide each weight by √π:
//!
//! ```text
//! E[g(f)] ≈ Σ_t (w_t / √π) g(m + √(2v) x_t)
//! ```
//!
//! Rules are generated with the Golub-Welsch algorithm: the eigenvalues of
//! the symmetric tridiagonal Jacobi matrix of the Hermite three-term
//! recurrence (zero diagonal, off-diagonal `√(k/2)`) locate the nodes.
//! Each negative-half node is then refined by Newton iteration on the
//! orthonormal recurrence and its weight computed from the polynomial
//! derivative as `1 / (T p²_{T-1}(x))`; the positive half is the mirror
//! image. Symmetry is exact at every order and the exponentially small
//! outer weights keep full relative accuracy. A T-point rule integrates
//! polynomials up to degree 2T - 1 exactly.

use log::debug;
use std::sync::OnceLock;

/// Default order for variational expectations.
pub const EXPECTATION_ORDER: usize = 16;

/// Default order for posterior-predictive moments.
pub const PREDICTIVE_ORDER: usize = 20;

/// A Gauss-Hermite rule of fixed order.
#[derive(Clone, Debug)]
pub struct GaussHermite {
    nodes: Vec<f64>,
    weights: Vec<f64>,
    expectation_weights: Vec<f64>,
}

impl GaussHermite {
    /// Compute the `order`-point rule.
    ///
    /// Panics if `order` is zero.
    pub fn new(order: usize) -> Self {
        assert!(order > 0, "Gauss-Hermite rule needs at least one node");
        debug!("computing {}-point Gauss-Hermite rule", order);

        // Jacobi matrix of the physicists' Hermite recurrence
        // H_{n+1}(x) = 2x H_n(x) - 2n H_{n-1}(x)
        let mut diag = vec![0.0f64; order];
        let mut off_diag: Vec<f64> = (1..order).map(|k| (k as f64 / 2.0).sqrt()).collect();

        jacobi_eigen(&mut diag, &mut off_diag);
        diag.sort_by(f64::total_cmp);

        // refine the negative half of the spectrum on the recurrence and
        // mirror it, so node and weight symmetry hold exactly
        let mut nodes = vec![0.0f64; order];
        let mut weights = vec![0.0f64; order];
        for i in 0..order / 2 {
            let x = refine_root(order, diag[i]);
            let w = node_weight(order, x);
            nodes[i] = x;
            weights[i] = w;
            nodes[order - 1 - i] = -x;
            weights[order - 1 - i] = w;
        }
        if order % 2 == 1 {
            let mid = order / 2;
            nodes[mid] = 0.0;
            weights[mid] = node_weight(order, 0.0);
        }

        // μ₀ = ∫ exp(-x²) dx = √π
        let mu0 = std::f64::consts::PI.sqrt();
        let expectation_weights: Vec<f64> = weights.iter().map(|w| w / mu0).collect();

        Self {
            nodes,
            weights,
            expectation_weights,
        }
    }

    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes in ascending order (roots of the order-T Hermite polynomial).
    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    /// Raw weights; they sum to `√π`.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Weights divided by `√π`; they sum to one, so contracting function
    /// values against them averages instead of integrating.
    pub fn expectation_weights(&self) -> &[f64] {
        &self.expectation_weights
    }
}

static EXPECTATION_RULE: OnceLock<GaussHermite> = OnceLock::new();
static PREDICTIVE_RULE: OnceLock<GaussHermite> = OnceLock::new();

/// Shared 16-point rule used for variational expectations.
pub fn expectation_rule() -> &'static GaussHermite {
    EXPECTATION_RULE.get_or_init(|| GaussHermite::new(EXPECTATION_ORDER))
}

/// Shared 20-point rule used for posterior-predictive moments.
pub fn predictive_rule() -> &'static GaussHermite {
    PREDICTIVE_RULE.get_or_init(|| GaussHermite::new(PREDICTIVE_ORDER))
}

////////////////////////////////////////
// symmetric tridiagonal eigensolver  //
////////////////////////////////////////

/// Implicit-shift QR on a symmetric tridiagonal matrix.
///
/// `diag` is overwritten with the eigenvalues (unsorted); `off_diag` is
/// destroyed. Eigenvectors are not tracked.
fn jacobi_eigen(diag: &mut [f64], off_diag: &mut [f64]) {
    let eps = 1e-15;
    let max_iter = 100;

    let mut n = diag.len();
    while n > 1 {
        let mut converged = false;
        for _ in 0..max_iter {
            // largest unreduced block ending at n - 1
            let mut m = n - 1;
            while m > 0 {
                if off_diag[m - 1].abs() <= eps * (diag[m - 1].abs() + diag[m].abs()) {
                    off_diag[m - 1] = 0.0;
                    break;
                }
                m -= 1;
            }

            if m == n - 1 {
                // trailing eigenvalue deflated
                n -= 1;
                converged = true;
                break;
            }

            let shift = wilkinson_shift(diag[n - 2], diag[n - 1], off_diag[n - 2]);

            // chase the bulge from row m down to row n - 1
            let mut x = diag[m] - shift;
            let mut y = off_diag[m];

            for k in m..(n - 1) {
                let (c, s) = if y.abs() > eps {
                    let r = x.hypot(y);
                    if r > 0.0 && r.is_finite() {
                        (x / r, -y / r)
                    } else {
                        (1.0, 0.0)
                    }
                } else {
                    (1.0, 0.0)
                };

                if k > m {
                    off_diag[k - 1] = x.hypot(y);
                }

                let d1 = diag[k];
                let d2 = diag[k + 1];
                let e_k = off_diag[k];

                diag[k] = c * c * d1 + s * s * d2 - 2.0 * c * s * e_k;
                diag[k + 1] = s * s * d1 + c * c * d2 + 2.0 * c * s * e_k;
                off_diag[k] = c * s * (d1 - d2) + (c * c - s * s) * e_k;

                if k < n - 2 {
                    x = off_diag[k];
                    y = -s * off_diag[k + 1];
                    off_diag[k + 1] *= c;
                }
            }
        }
        if !converged {
            // force deflation if the sweep stalled; keeps the loop finite
            off_diag[n - 2] = 0.0;
            n -= 1;
        }
    }
}

/// Eigenvalue of the trailing 2x2 block closer to `c`.
///
/// Uses sign(0) = +1 rather than `f64::signum` so the denominator cannot
/// vanish when the two diagonal entries coincide.
#[inline]
fn wilkinson_shift(a: f64, c: f64, b: f64) -> f64 {
    let d = (a - c) * 0.5;
    let t = d.hypot(b);
    let sgn = if d >= 0.0 { 1.0 } else { -1.0 };
    let denom = d + sgn * t;

    if denom.abs() > f64::EPSILON * t.max(1.0) {
        c - (b * b) / denom
    } else {
        c - t
    }
}

////////////////////////////////////////
// orthonormal Hermite recurrence     //
////////////////////////////////////////

/// Orthonormal Hermite values `(p_T(x), p_{T-1}(x))` against `exp(-x²)`.
///
/// Three-term recurrence `p_{k+1} = x √(2/(k+1)) p_k - √(k/(k+1)) p_{k-1}`
/// from `p_0 = π^{-1/4}`.
fn hermite_pair(order: usize, x: f64) -> (f64, f64) {
    let mut prev = 0.0f64;
    let mut cur = std::f64::consts::PI.powf(-0.25);
    for k in 0..order {
        let kk = k as f64;
        let next = x * (2.0 / (kk + 1.0)).sqrt() * cur - (kk / (kk + 1.0)).sqrt() * prev;
        prev = cur;
        cur = next;
    }
    (cur, prev)
}

/// Newton refinement of a root estimate of `p_T`, stepping with the
/// derivative identity `p'_T(x) = √(2T) p_{T-1}(x)`.
fn refine_root(order: usize, estimate: f64) -> f64 {
    let tol = 1e-15;
    let max_iter = 16;

    let mut x = estimate;
    for _ in 0..max_iter {
        let (p, p_lower) = hermite_pair(order, x);
        let step = p / ((2.0 * order as f64).sqrt() * p_lower);
        x -= step;
        if step.abs() <= tol * x.abs().max(1.0) {
            break;
        }
    }
    x
}

/// Weight of a refined node, `w = 1 / (T p²_{T-1}(x))`.
fn node_weight(order: usize, x: f64) -> f64 {
    let (_, p_lower) = hermite_pair(order, x);
    1.0 / (order as f64 * p_lower * p_lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn even_moment_exp_neg_x2(power: usize) -> f64 {
        // ∫ x^(2m) exp(-x²) dx = (2m-1)!! √π / 2^m
        let m = power / 2;
        let mut odd_double_factorial = 1.0f64;
        for k in 0..m {
            odd_double_factorial *= (2 * k + 1) as f64;
        }
        odd_double_factorial * std::f64::consts::PI.sqrt() / 2.0f64.powi(m as i32)
    }

    #[test]
    fn single_node_rule() {
        let gh = GaussHermite::new(1);
        assert_relative_eq!(gh.nodes()[0], 0.0, epsilon = 1e-14);
        assert_relative_eq!(gh.weights()[0], std::f64::consts::PI.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(gh.expectation_weights()[0], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn nodes_symmetric_around_zero() {
        // outer weights are exponentially small; compare them relatively
        for order in [2usize, 5, 16, 20, 32, 64] {
            let gh = GaussHermite::new(order);
            for i in 0..order / 2 {
                let j = order - 1 - i;
                assert_relative_eq!(gh.nodes()[i], -gh.nodes()[j], epsilon = 1e-12);
                assert_relative_eq!(gh.weights()[i], gh.weights()[j], max_relative = 1e-12);
            }
            if order % 2 == 1 {
                assert_relative_eq!(gh.nodes()[order / 2], 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn weights_sum_to_sqrt_pi() {
        for order in [1usize, 7, 16, 20, 32, 64] {
            let gh = GaussHermite::new(order);
            let sum: f64 = gh.weights().iter().sum();
            assert_relative_eq!(sum, std::f64::consts::PI.sqrt(), epsilon = 1e-10);
            let norm_sum: f64 = gh.expectation_weights().iter().sum();
            assert_relative_eq!(norm_sum, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn matches_published_16_point_values() {
        let gh = GaussHermite::new(16);
        // outermost node and weight, Abramowitz & Stegun table 25.10
        assert_relative_eq!(gh.nodes()[15], 4.688738939305818, epsilon = 1e-12);
        assert_relative_eq!(
            gh.weights()[15],
            2.654807474011182e-10,
            max_relative = 1e-10
        );
        // innermost pair
        assert_relative_eq!(gh.nodes()[8], 0.2734810461381524, epsilon = 1e-12);
        assert_relative_eq!(gh.weights()[8], 0.5079294790166137, max_relative = 1e-12);
    }

    #[test]
    fn matches_published_20_point_values() {
        let gh = GaussHermite::new(20);
        assert_relative_eq!(gh.nodes()[19], 5.387480890011233, epsilon = 1e-12);
        assert_relative_eq!(
            gh.weights()[19],
            2.229393645534151e-13,
            max_relative = 1e-10
        );
        assert_relative_eq!(gh.nodes()[10], 0.2453407083009012, epsilon = 1e-12);
        assert_relative_eq!(gh.weights()[10], 0.46224366960061006, max_relative = 1e-12);
    }

    #[test]
    fn high_order_outer_weights_stay_positive_and_tiny() {
        // order-64 weights span dozens of decades between the tails and
        // the center of the node range
        let gh = GaussHermite::new(64);
        assert!(gh.weights().iter().all(|&w| w > 0.0));
        assert!(
            gh.weights()[0] < 1e-25,
            "outer weight {} far above its true scale",
            gh.weights()[0]
        );
        assert!(gh.weights()[32] > 0.1, "central weight collapsed");
        assert!(gh.nodes()[0] < -8.0 && gh.nodes()[63] > 8.0);
    }

    #[test]
    fn moment_exactness_up_to_degree_2t_minus_1() {
        for order in [4usize, 16, 20, 32, 64] {
            let gh = GaussHermite::new(order);
            for degree in 0..(2 * order) {
                let quad: f64 = gh
                    .nodes()
                    .iter()
                    .zip(gh.weights())
                    .map(|(x, w)| w * x.powi(degree as i32))
                    .sum();
                if degree % 2 == 1 {
                    // odd moments vanish; the signed sum cancels down to
                    // rounding noise in terms as large as `magnitude`
                    let magnitude: f64 = gh
                        .nodes()
                        .iter()
                        .zip(gh.weights())
                        .map(|(x, w)| w * x.abs().powi(degree as i32))
                        .sum();
                    assert!(
                        quad.abs() <= 1e-12 * magnitude.max(1.0),
                        "order {} degree {}: odd moment {} not negligible",
                        order,
                        degree,
                        quad
                    );
                } else {
                    let expected = even_moment_exp_neg_x2(degree);
                    assert_relative_eq!(quad, expected, max_relative = 1e-10);
                }
            }
        }
    }

    #[test]
    fn cached_rules_have_default_orders() {
        assert_eq!(expectation_rule().order(), EXPECTATION_ORDER);
        assert_eq!(predictive_rule().order(), PREDICTIVE_ORDER);
        // same allocation on repeated access
        assert!(std::ptr::eq(expectation_rule(), expectation_rule()));
    }

    #[test]
    fn wilkinson_shift_finite_for_equal_diagonal() {
        let shift = wilkinson_shift(0.0, 0.0, 1.25);
        assert!(shift.is_finite());
        assert_relative_eq!(shift, -1.25, epsilon = 1e-14);
    }
}
