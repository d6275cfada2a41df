//! Observation likelihood interface for variational Gaussian process
//! inference.
//!
//! Implementors provide pointwise densities, moments, and log-density
//! derivatives at latent function values. Variational expectations and
//! predictive moments then come for free: the default methods push the
//! diagonal Gaussian posterior through tensor-product Gauss-Hermite
//! quadrature, and the Monte Carlo predictive score reuses the pointwise
//! log-density on posterior draws.

use anyhow::Result;
use log::debug;
use ndarray::prelude::*;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use quadrature_util::gauss_hermite::GaussHermite;
use quadrature_util::gaussian_quad::{block_size, contract, latent_grid, repeat_per_block};

use crate::special_fn::log_sum_exp;

/// Shape descriptors for an observation likelihood.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LikelihoodMetadata {
    /// observed dimensions per data point
    pub dim_y: usize,
    /// latent function channels per data point
    pub dim_f: usize,
    /// parameter groups per latent channel
    pub dim_p: usize,
    /// whether output dimensions are coupled
    pub multivariate: bool,
}

/// Observation model `p(y | f)` over latent function values `f`.
///
/// Pointwise operations take `f` with one row per evaluation point and one
/// column per latent channel, paired with a target vector of matching
/// length. Quadrature-based operations take per-point posterior means and
/// variances of the same shape `(n, dim_f)`.
pub trait Likelihood {
    fn metadata(&self) -> LikelihoodMetadata;

    /// Whether the likelihood couples output dimensions.
    fn is_multivariate(&self) -> bool {
        self.metadata().multivariate
    }

    /// Quadrature rule for variational expectations and their derivatives.
    fn expectation_rule(&self) -> &GaussHermite;

    /// Quadrature rule for predictive moments.
    fn predictive_rule(&self) -> &GaussHermite;

    /// Density `p(y_i | f_i)` per row.
    fn pdf(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array1<f64>;

    /// Log density `ln p(y_i | f_i)` per row.
    fn logpdf(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array1<f64>;

    /// Log density on a `(n, dim_f, s)` block of latent draws, one column
    /// of results per draw.
    fn logpdf_sampling(&self, f: &Array3<f64>, y: &Array1<f64>) -> Array2<f64>;

    /// Draws from the observation model at fixed latent values, one row of
    /// `num_samples` draws per evaluation point.
    fn samples(
        &self,
        f: &Array2<f64>,
        num_samples: usize,
        rng: &mut impl Rng,
    ) -> Result<Array2<f64>>;

    /// Conditional mean `E[y | f_i]` per row.
    fn mean(&self, f: &Array2<f64>) -> Array1<f64>;

    /// Squared conditional mean `E[y | f_i]^2` per row.
    fn mean_sq(&self, f: &Array2<f64>) -> Array1<f64>;

    /// Conditional variance `V[y | f_i]` per row.
    fn variance(&self, f: &Array2<f64>) -> Array1<f64>;

    /// Gradient of `ln p(y_i | f_i)` with respect to each latent channel.
    fn dlogp_df(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array2<f64>;

    /// Diagonal second derivatives of `ln p(y_i | f_i)` with respect to
    /// each latent channel.
    fn d2logp_df2(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array2<f64>;

    /// Variational expectation `E_q[ln p(y_i | f_i)]` per data point, with
    /// the diagonal Gaussian posterior `q` given by `means` and `variances`.
    fn var_exp(
        &self,
        y: &Array1<f64>,
        means: &Array2<f64>,
        variances: &Array2<f64>,
    ) -> Array1<f64> {
        assert_eq!(y.len(), means.nrows(), "need one target per posterior row");
        assert_eq!(means.dim(), variances.dim(), "means and variances must share a shape");

        let rule = self.expectation_rule();
        let num_latent = means.ncols();
        let block = block_size(rule, num_latent);

        let grid = latent_grid(rule, means, variances);
        let targets = repeat_per_block(y, block);
        let values = self.logpdf(&grid, &targets);
        contract(rule, values, num_latent)
    }

    /// Derivatives of the variational expectation with respect to the
    /// posterior means and variances, shape `(n, dim_f)` each.
    ///
    /// The variance derivative uses the Gaussian identity
    /// `d E_q[g] / d v = E_q[g''] / 2`.
    fn var_exp_derivatives(
        &self,
        y: &Array1<f64>,
        means: &Array2<f64>,
        variances: &Array2<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        assert_eq!(y.len(), means.nrows(), "need one target per posterior row");
        assert_eq!(means.dim(), variances.dim(), "means and variances must share a shape");

        let rule = self.expectation_rule();
        let num_latent = means.ncols();
        let block = block_size(rule, num_latent);

        let grid = latent_grid(rule, means, variances);
        let targets = repeat_per_block(y, block);
        let dlogp = self.dlogp_df(&grid, &targets);
        let d2logp = self.d2logp_df2(&grid, &targets);

        let mut dmean = Array2::zeros(means.dim());
        let mut dvar = Array2::zeros(means.dim());
        for d in 0..num_latent {
            dmean
                .column_mut(d)
                .assign(&contract(rule, dlogp.column(d).to_owned(), num_latent));
            dvar.column_mut(d)
                .assign(&(contract(rule, d2logp.column(d).to_owned(), num_latent) * 0.5));
        }
        (dmean, dvar)
    }

    /// Predictive mean and variance of `y` at each point, integrating the
    /// conditional moments over the latent posterior.
    fn predictive(
        &self,
        means: &Array2<f64>,
        variances: &Array2<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        assert_eq!(means.dim(), variances.dim(), "means and variances must share a shape");

        let rule = self.predictive_rule();
        let num_latent = means.ncols();

        let grid = latent_grid(rule, means, variances);
        let mean_pred = contract(rule, self.mean(&grid), num_latent);
        let var_integrated = contract(rule, self.variance(&grid), num_latent);
        let mean_sq_integrated = contract(rule, self.mean_sq(&grid), num_latent);

        let var_pred = var_integrated + mean_sq_integrated - mean_pred.mapv(|m| m * m);
        (mean_pred, var_pred)
    }

    /// Monte Carlo estimate of `ln E_q[p(y_i | f_i)]` per data point, the
    /// log predictive density under the latent posterior.
    fn log_predictive(
        &self,
        y: &Array1<f64>,
        means: &Array2<f64>,
        variances: &Array2<f64>,
        num_samples: usize,
        rng: &mut impl Rng,
    ) -> Array1<f64> {
        assert!(num_samples > 0, "need at least one posterior draw");
        assert_eq!(y.len(), means.nrows(), "need one target per posterior row");
        assert_eq!(means.dim(), variances.dim(), "means and variances must share a shape");

        debug!(
            "monte carlo log predictive over {} points with {} draws",
            y.len(),
            num_samples
        );

        let nn = means.nrows();
        let dd = means.ncols();
        let mut draws = Array3::<f64>::zeros((nn, dd, num_samples));
        for i in 0..nn {
            for d in 0..dd {
                let mu = means[[i, d]];
                let sd = variances[[i, d]].sqrt();
                for s in 0..num_samples {
                    let z: f64 = rng.sample(StandardNormal);
                    draws[[i, d, s]] = mu + sd * z;
                }
            }
        }

        let logp = self.logpdf_sampling(&draws, y);
        let ln_n = (num_samples as f64).ln();
        let scores: Vec<f64> = logp
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| log_sum_exp(row) - ln_n)
            .collect();
        Array1::from_vec(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_plain_data() {
        let meta = LikelihoodMetadata {
            dim_y: 1,
            dim_f: 2,
            dim_p: 1,
            multivariate: false,
        };
        let copy = meta;
        assert_eq!(meta, copy);
        assert!(!copy.multivariate);
    }
}
