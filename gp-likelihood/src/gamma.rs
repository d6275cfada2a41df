//! Gamma observation likelihood with log-linked latent shape and rate.
//!
//! Two latent channels decode through a clamped exponential into the
//! shape `a = exp(f_1)` and rate `b = exp(f_2)` of
//!
//! ```text
//!     p(y | a, b) = b^a y^(a - 1) exp(-b y) / Gamma(a) .
//! ```
//!
//! Both decoded parameters are clipped to `[1e-9, 1e9]` so that extreme
//! latent values keep every density and derivative finite.

use anyhow::Result;
use ndarray::prelude::*;
use ndarray::Zip;
use rand::Rng;
use rand_distr::{Distribution, Gamma as GammaSampler};
use special::Gamma as SpecialGamma;

use quadrature_util::gauss_hermite::{expectation_rule, predictive_rule, GaussHermite};

use crate::special_fn::{safe_exp, trigamma};
use crate::traits::{Likelihood, LikelihoodMetadata};

/// Lower clip for the decoded shape and rate.
const CLIP_LO: f64 = 1e-9;
/// Upper clip for the decoded shape and rate.
const CLIP_HI: f64 = 1e9;

/// Clamped exponential link from a latent channel to a positive parameter.
fn exp_link(f: f64) -> f64 {
    safe_exp(f).clamp(CLIP_LO, CLIP_HI)
}

/// Gamma log density in the shape and rate parameterization.
fn log_density(shape: f64, rate: f64, y: f64) -> f64 {
    -SpecialGamma::ln_gamma(shape).0 + shape * rate.ln() + (shape - 1.0) * y.ln() - rate * y
}

/// Gamma likelihood over positive targets. The first latent channel
/// carries the log shape, the second the log rate.
#[derive(Clone, Debug)]
pub struct GammaLikelihood {
    expectation_rule: GaussHermite,
    predictive_rule: GaussHermite,
}

impl GammaLikelihood {
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
}

impl Default for GammaLikelihood {
    fn default() -> Self {
        Self::new()
    }
}

impl Likelihood for GammaLikelihood {
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
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array1::zeros(y.len());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .and(y)
            .par_for_each(|o, &fa, &fb, &yy| {
                let (shape, rate) = (exp_link(fa), exp_link(fb));
                *o = rate.powf(shape)
                    * yy.powf(shape - 1.0)
                    * safe_exp(-rate * yy)
                    / SpecialGamma::gamma(shape);
            });
        out
    }

    fn logpdf(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array1::zeros(y.len());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .and(y)
            .par_for_each(|o, &fa, &fb, &yy| {
                *o = log_density(exp_link(fa), exp_link(fb), yy);
            });
        out
    }

    fn logpdf_sampling(&self, f: &Array3<f64>, y: &Array1<f64>) -> Array2<f64> {
        let (nn, dd, ss) = f.dim();
        assert_eq!(dd, 2, "gamma likelihood expects two latent channels");
        assert_eq!(nn, y.len(), "need one target per latent row");

        let f_shape = f.index_axis(Axis(1), 0);
        let f_rate = f.index_axis(Axis(1), 1);
        let targets = y.view().insert_axis(Axis(1));

        let mut out = Array2::zeros((nn, ss));
        Zip::from(&mut out)
            .and(f_shape)
            .and(f_rate)
            .and_broadcast(targets)
            .par_for_each(|o, &fa, &fb, &yy| {
                *o = log_density(exp_link(fa), exp_link(fb), yy);
            });
        out
    }

    fn samples(
        &self,
        f: &Array2<f64>,
        num_samples: usize,
        rng: &mut impl Rng,
    ) -> Result<Array2<f64>> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");

        let mut out = Array2::zeros((f.nrows(), num_samples));
        for (i, fi) in f.rows().into_iter().enumerate() {
            let (shape, rate) = (exp_link(fi[0]), exp_link(fi[1]));
            let dist = GammaSampler::new(shape, 1.0 / rate)?;
            for s in 0..num_samples {
                out[[i, s]] = dist.sample(rng);
            }
        }
        Ok(out)
    }

    fn mean(&self, f: &Array2<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");

        let mut out = Array1::zeros(f.nrows());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .par_for_each(|o, &fa, &fb| {
                *o = exp_link(fa) / exp_link(fb);
            });
        out
    }

    fn mean_sq(&self, f: &Array2<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");

        let mut out = Array1::zeros(f.nrows());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .par_for_each(|o, &fa, &fb| {
                let m = exp_link(fa) / exp_link(fb);
                *o = m * m;
            });
        out
    }

    fn variance(&self, f: &Array2<f64>) -> Array1<f64> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");

        let mut out = Array1::zeros(f.nrows());
        Zip::from(&mut out)
            .and(f.column(0))
            .and(f.column(1))
            .par_for_each(|o, &fa, &fb| {
                let (shape, rate) = (exp_link(fa), exp_link(fb));
                *o = shape / (rate * rate);
            });
        out
    }

    fn dlogp_df(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array2<f64> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array2::zeros(f.raw_dim());
        Zip::from(out.rows_mut())
            .and(f.rows())
            .and(y)
            .par_for_each(|mut grad, fi, &yy| {
                let (shape, rate) = (exp_link(fi[0]), exp_link(fi[1]));
                grad[0] = (-SpecialGamma::digamma(shape) + rate.ln() + yy.ln()) * shape;
                grad[1] = shape - rate * yy;
            });
        out
    }

    fn d2logp_df2(&self, f: &Array2<f64>, y: &Array1<f64>) -> Array2<f64> {
        assert_eq!(f.ncols(), 2, "gamma likelihood expects two latent channels");
        assert_eq!(f.nrows(), y.len(), "need one target per latent row");

        let mut out = Array2::zeros(f.raw_dim());
        Zip::from(out.rows_mut())
            .and(f.rows())
            .and(y)
            .par_for_each(|mut grad, fi, &yy| {
                let (shape, rate) = (exp_link(fi[0]), exp_link(fi[1]));
                grad[0] = (-SpecialGamma::digamma(shape)
                    - shape * trigamma(shape)
                    + rate.ln()
                    + yy.ln())
                    * shape;
                grad[1] = -rate * yy;
            });
        out
    }
}
