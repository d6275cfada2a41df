//! Expectations under diagonal Gaussians via tensor-product quadrature.
//!
//! Given per-row means `M` and variances `V`, both of shape (N, D), a
//! T-point Gauss-Hermite rule induces the flattened evaluation grid
//!
//! ```text
//! F[r, d] = M[i, d] + √(2 V[i, d]) x[t_d]
//! ```
//!
//! where row r enumerates (i, t_1, ..., t_D) in row-major order (the node
//! index of the last latent dimension cycles fastest). Evaluating an
//! integrand row-wise over the grid and contracting the result against the
//! normalized weights once per latent dimension yields
//! `E_{N(M[i,:], diag(V[i,:]))}[g]` for every observation i.

use ndarray::parallel::prelude::*;
use ndarray::prelude::*;

use crate::gauss_hermite::GaussHermite;

/// Rows of the grid belonging to one observation.
pub fn block_size(rule: &GaussHermite, num_latent: usize) -> usize {
    rule.order().pow(num_latent as u32)
}

/// Build the flattened (N·T^D, D) evaluation grid.
///
/// `variances` must be nonnegative; a zero variance collapses that
/// dimension's nodes onto the mean. Panics if the two shapes differ.
pub fn latent_grid(
    rule: &GaussHermite,
    means: &Array2<f64>,
    variances: &Array2<f64>,
) -> Array2<f64> {
    assert_eq!(
        means.dim(),
        variances.dim(),
        "means {:?} and variances {:?} differ in shape",
        means.dim(),
        variances.dim()
    );

    let (nn, dd) = means.dim();
    let tt = rule.order();
    let nodes = rule.nodes();
    let block = block_size(rule, dd);

    let mut grid = Array2::<f64>::zeros((nn * block, dd));
    grid.axis_chunks_iter_mut(Axis(0), block)
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut rows)| {
            let scale: Vec<f64> = (0..dd).map(|d| (2.0 * variances[[i, d]]).sqrt()).collect();
            for (r, mut row) in rows.axis_iter_mut(Axis(0)).enumerate() {
                let mut rest = r;
                for d in (0..dd).rev() {
                    let t = rest % tt;
                    rest /= tt;
                    row[d] = means[[i, d]] + scale[d] * nodes[t];
                }
            }
        });

    grid
}

/// Reduce per-grid-row values of length N·T^D to per-observation
/// expectations of length N.
///
/// One dot product against the normalized weights per latent dimension,
/// contracting the fastest-cycling node axis each time.
pub fn contract(rule: &GaussHermite, values: Array1<f64>, num_latent: usize) -> Array1<f64> {
    let tt = rule.order();
    let block = block_size(rule, num_latent);
    assert!(
        block > 0 && values.len() % block == 0,
        "cannot contract {} values into blocks of {}^{}",
        values.len(),
        tt,
        num_latent
    );

    let weights = ArrayView1::from(rule.expectation_weights());
    let mut flat = values;
    for _ in 0..num_latent {
        let rows = flat.len() / tt;
        flat = flat
            .into_shape_with_order((rows, tt))
            .unwrap()
            .dot(&weights);
    }
    flat
}

/// Repeat each entry of `values` once per grid row of its observation.
///
/// Companion to [`latent_grid`]: aligns per-observation data (such as the
/// observed targets) with the flattened grid.
pub fn repeat_per_block(values: &Array1<f64>, block: usize) -> Array1<f64> {
    Array1::from_shape_fn(values.len() * block, |r| values[r / block])
}
