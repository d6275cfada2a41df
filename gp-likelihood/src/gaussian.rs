//! Heteroscedastic Gaussian observation likelihood.
//!
//! The first latent channel carries the conditional mean and the second the
//! log variance, `y ~ N(f_1, exp(f_2))`. The log variance is clamped to
//! `[-10, 10]` before decoding so that quadrature nodes far out in the tail
//! cannot produce degenerate variances.

use anyhow::Result;
use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use quadrature_util::gauss_hermite::{expectation_rule, predictive_rule, GaussHermite};

use crate::special_fn::safe_exp;
use crate::traits::{Likelihood, LikelihoodMetadata};

/// Clamp range for the latent log variance.
const LOG_VAR_LO: f64 = -10.0;
const LOG_VAR_HI: f64 = 10.0;

fn log_variance(f: f64) -> f64 {
    f.clamp(LOG_VAR_LO, LOG_VAR_HI)
}

/// Gaussian likelihood with a latent mean channel and a latent log
/// variance channel.
#[derive(Clone, Debug)]
pub struct HetGaussianLikelihood {
    expectation_rule: GaussHermite,
    predictive_rule: GaussHermite,
}

impl HetGaussianLikelihood {
    /// Likelihood with the default quadrature orders, 16 nodes per channel
    /// for variational expectations and 20 for predictive moments.
    pub fn new() -> Self {
        Self {
            expectation_rule: expectation_rule().clone(),
            predictive_rule: predictive_rule().clone(),
        }
    }

    /// Likelihood with custom quadrature orders.
    pub fn with_orders(expectation_order: usize, predictive_order: usize) -> Self {
        Self {
            expectation_rule: GaussHermite::new(expectation_order),
            predictive_rule: GaussHermite::new(predictive_order),
        }
    }

    /// Closed form for the variational expectation, available because the
    /// Gaussian integrals factorize:
    ///
    /// ```text
    ///     E_q[ln p(y | f)] = -( ln(2 pi) + m_2
    ///         + ((y - m_1)^2 + v_1) exp(-m_2 + v_2 / 2) ) / 2 .
    /// ```
    ///
    /// Only valid while the log variance clamp stays inactive over the
    /// bulk of `q`.
    pub fn var_exp_exact(
        &self,
        y: &Array1<f64>,
        means: &Array2<f64>,
        variances: &Array2<f64>,
    ) -> Array1<f64> {
        assert_eq!(y.len(), means.nrows(), "need one target per posterior row");
        assert_eq!(means.dim(), variances.dim(), "means and variances must share a shape");
        assert_eq!(means.ncols(), 2, "gaussian likelihood expects two latent channels");

        let mut out = Array1::zeros(y.len());
        Zip::from(&mut out)
            .and(means.rows())
            .and(variances.rows())
            .and(y)
            .for_each(|o, m, v, &yy| {
                let residual_sq = (yy - m[0]) * (yy - m[0]) + v[0];
                let precision = safe_exp(-m[1] + 0.5 * v[1]);
                *o = -0.5 * ((2.0 * PI).ln() + m[1] + residual_sq * precision);
            });
        out
    }
}

impl Default for HetGaussianLikelihood {
    fn default() -> Self {
        Self::new()
    }
}

impl Likelihood for HetGaussianLikelihood {
    fn metadata(&self) -> LikelihoodMetadata {
        LikelihoodMetadata {
            dim_y: 1,
            dim_f: 2,
            dim_p: 1,
            multivariate: false,
        }
    }

    fn expectation_rule(&self) -> &GaussHermite {
        &self.expectation_rule
    }

    fn predictive_rule(&self) -> &GaussHermite {
        &self.predictive_rule
    }

    fn pdf(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array1::zeros(y.len());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .and(y)
            .par_for_each(|o, &mu, &lv, &yy| {
                let var = log_variance(lv).exp();
                let r = yy - mu;
                *o = safe_exp(-0.5 * r * r / var) / (2.0 * PI * var).sqrt();
            });
        out
    }

    fn logpdf(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array1::zeros(y.len());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .and(y)
            .par_for_each(|o, &mu, &lv, &yy| {
                let lv = log_variance(lv);
                let r = yy - mu;
                *o = -0.5 * ((2.0 * PI).ln() + lv + r * r * (-lv).exp());
            });
        out
    }

    fn logpdf_sampling(&self, f: &Array3<f64>, y: &Array1<f64>) -> Array2<f64> {
        let (nn, dd, ss) = f.dim();
        assert_eq!(dd, 2, "gaussian likelihood expects two latent channels");
        assert_eq!(nn, y.len(), "need one target per latent row");

        let f_mean = f.index_axis(Axis(1), 0);
        let f_log_var = f.index_axis(Axis(1), 1);
        let targets = y.view().insert_axis(Axis(1));

        let mut out = Array2::zeros((nn, ss));
        Zip::from(&mut out)
            .and(f_mean)
            .and(f_log_var)
            .and_broadcast(targets)
            .par_for_each(|o, &mu, &lv, &yy| {
                let lv = log_variance(lv);
                let r = yy - mu;
                *o = -0.5 * ((2.0 * PI).ln() + lv + r * r * (-lv).exp());
            });
        out
    }

    fn samples(
        &self,
        f: &Array2<f64>,
        num_samples: usize,
        rng: &mut impl Rng,
    ) -> Result<Array2<f64>> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");

        let mut out = Array2::zeros((f.nrows(), num_samples));
        for (i, fi) in f.rows().into_iter().enumerate() {
            let mu = fi[0];
            let sd = (0.5 * log_variance(fi[1])).exp();
            for s in 0..num_samples {
                let z: f64 = rng.sample(StandardNormal);
                out[[i, s]] = mu + sd * z;
            }
        }
        Ok(out)
    }

    fn mean(&self, f: &Array2<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        f.column(0).to_owned()
    }

    fn mean_sq(&self, f: &Array2<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        f.column(0).mapv(|mu| mu * mu)
    }

    fn variance(&self, f: &Array2<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        f.column(1).mapv(|lv| log_variance(lv).exp())
    }

    fn dlogp_df(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array2<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array2::zeros(f.raw_dim());
        Zip::from(out.rows_mut())
            .and(f.rows())
            .and(y)
            .par_for_each(|mut grad, fi, &yy| {
                let var = log_variance(fi[1]).exp();
                let r = yy - fi[0];
                grad[0] = r / var;
                grad[1] = -0.5 + 0.5 * r * r / var;
            });
        out
    }

    fn d2logp_df2(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array2<f64> {
        assert_eq!(f.ncols(), 2, "gaussian likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array2::zeros(f.raw_dim());
        Zip::from(out.rows_mut())
            .and(f.rows())
            .and(y)
            .par_for_each(|mut grad, fi, &yy| {
                let var = log_variance(fi[1]).exp();
                let r = yy - fi[0];
                grad[0] = -1.0 / var;
                grad[1] = -0.5 * r * r / var;
            });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use statrs::distribution::{Continuous, Normal};

    fn latent_rows(mus: &[f64], variances: &[f64]) -> Array2<f64> {
        let mut f = Array2::zeros((mus.len(), 2));
        for i in 0..mus.len() {
            f[[i, 0]] = mus[i];
            f[[i, 1]] = variances[i].ln();
        }
        f
    }

    #[test]
    fn logpdf_matches_reference_density() {
        let mus = [0.0, 1.4, -2.0];
        let vars = [1.0, 0.25, 4.0];
        let y = ndarray::array![0.3, 1.0, -3.5];
        let f = latent_rows(&mus, &vars);

        let lik = HetGaussianLikelihood::new();
        let logp = lik.logpdf(&f, &y);
        let pdf = lik.pdf(&f, &y);

        for i in 0..y.len() {
            let reference = Normal::new(mus[i], vars[i].sqrt()).unwrap();
            assert_relative_eq!(logp[i], reference.ln_pdf(y[i]), max_relative = 1e-12);
            assert_relative_eq!(pdf[i], reference.pdf(y[i]), max_relative = 1e-12);
        }
    }

    #[test]
    fn moments_follow_the_latent_channels() {
        let mus = [0.7, -1.2, 3.0];
        let vars = [0.5, 2.0, 0.04];
        let f = latent_rows(&mus, &vars);

        let lik = HetGaussianLikelihood::new();
        let mean = lik.mean(&f);
        let mean_sq = lik.mean_sq(&f);
        let variance = lik.variance(&f);

        for i in 0..mus.len() {
            assert_relative_eq!(mean[i], mus[i], max_relative = 1e-12);
            assert_relative_eq!(mean_sq[i], mus[i] * mus[i], max_relative = 1e-12);
            assert_relative_eq!(variance[i], vars[i], max_relative = 1e-12);
        }
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let f = latent_rows(&[0.4, -0.9, 2.1], &[0.6, 1.8, 0.3]);
        let y = ndarray::array![1.0, -0.5, 2.0];

        let lik = HetGaussianLikelihood::new();
        let grad = lik.dlogp_df(&f, &y);
        let curv = lik.d2logp_df2(&f, &y);

        let h = 1e-6;
        for d in 0..2 {
            let mut f_plus = f.clone();
            let mut f_minus = f.clone();
            f_plus.column_mut(d).mapv_inplace(|v| v + h);
            f_minus.column_mut(d).mapv_inplace(|v| v - h);

            let fd_grad = (lik.logpdf(&f_plus, &y) - lik.logpdf(&f_minus, &y)) / (2.0 * h);
            let fd_curv = (lik.dlogp_df(&f_plus, &y) - lik.dlogp_df(&f_minus, &y)) / (2.0 * h);
            for i in 0..y.len() {
                assert_relative_eq!(grad[[i, d]], fd_grad[i], epsilon = 1e-8, max_relative = 1e-5);
                assert_relative_eq!(
                    curv[[i, d]],
                    fd_curv[[i, d]],
                    epsilon = 1e-8,
                    max_relative = 1e-5
                );
            }
        }
    }

    #[test]
    fn samples_reproduce_mean_and_spread() {
        let f = latent_rows(&[1.0], &[0.25]);
        let lik = HetGaussianLikelihood::new();
        let mut rng = StdRng::seed_from_u64(7);

        let draws = lik.samples(&f, 20_000, &mut rng).unwrap();
        assert_eq!(draws.dim(), (1, 20_000));

        let n = draws.len() as f64;
        let sample_mean = draws.sum() / n;
        let sample_var = draws.mapv(|x| (x - sample_mean) * (x - sample_mean)).sum() / n;

        assert!(
            (sample_mean - 1.0).abs() < 0.02,
            "sample mean {} too far from 1.0",
            sample_mean
        );
        assert!(
            (sample_var - 0.25).abs() < 0.02,
            "sample variance {} too far from 0.25",
            sample_var
        );
    }

    #[test]
    fn log_variance_clamp_keeps_results_finite() {
        let f = ndarray::array![[0.0, 1000.0], [0.0, -1000.0]];
        let y = ndarray::array![0.5, 0.5];

        let lik = HetGaussianLikelihood::new();
        let logp = lik.logpdf(&f, &y);
        let variance = lik.variance(&f);

        assert!(logp.iter().all(|v| v.is_finite()), "logpdf overflowed");
        assert_relative_eq!(variance[0], 10.0_f64.exp(), max_relative = 1e-12);
        assert_relative_eq!(variance[1], (-10.0_f64).exp(), max_relative = 1e-12);
    }

    #[test]
    fn metadata_reports_two_latent_channels() {
        let lik = HetGaussianLikelihood::new();
        let meta = lik.metadata();
        assert_eq!(meta.dim_y, 1);
        assert_eq!(meta.dim_f, 2);
        assert!(!meta.multivariate);
        assert_eq!(lik.expectation_rule().order(), 16);
        assert_eq!(lik.predictive_rule().order(), 20);
    }
}
