//! Error summaries for held-out regression predictions, one score per
//! output task.
//!
//! Both follow the usual Gaussian process benchmarking conventions: the
//! standardized mean squared error normalizes by the test target variance,
//! and the standardized negative log probability subtracts the score of
//! the trivial Gaussian fitted to that task's training targets.

use anyhow::{bail, Result};
use ndarray::prelude::*;

/// Standardized mean squared error per task.
///
/// The mean squared error of the predictions divided by the population
/// variance of the test targets. Predicting the test mean scores 1, so
/// anything below 1 beats the constant predictor.
pub fn smse(predicted: &[Array1<f64>], observed: &[Array1<f64>]) -> Result<Array1<f64>> {
    if predicted.len() != observed.len() {
        bail!(
            "{} prediction tasks vs {} observation tasks",
            predicted.len(),
            observed.len()
        );
    }

    let mut out = Array1::zeros(predicted.len());
    for (k, (mu, y)) in predicted.iter().zip(observed.iter()).enumerate() {
        if mu.len() != y.len() {
            bail!("task {}: {} predictions vs {} observations", k, mu.len(), y.len());
        }
        if y.is_empty() {
            bail!("task {} has no observations", k);
        }

        let n = y.len() as f64;
        let y_mean = y.sum() / n;
        let y_var = y.mapv(|v| (v - y_mean) * (v - y_mean)).sum() / n;
        if y_var <= 0.0 {
            bail!("task {} has constant observations", k);
        }

        let mse = (mu - y).mapv(|e| e * e).sum() / n;
        out[k] = mse / y_var;
    }
    Ok(out)
}

/// Standardized negative log probability per task.
///
/// The average Gaussian negative log density of the test targets under
/// the predictive means and variances, minus the same average under the
/// trivial Gaussian with that task's training mean and variance. Negative
/// values mean the model beats the trivial baseline.
pub fn snlp(
    predicted_variance: &[Array1<f64>],
    train_targets: &[Array1<f64>],
    test_targets: &[Array1<f64>],
    predicted_mean: &[Array1<f64>],
) -> Result<Array1<f64>> {
    let tasks = predicted_variance.len();
    if train_targets.len() != tasks || test_targets.len() != tasks || predicted_mean.len() != tasks
    {
        bail!(
            "task counts disagree: {} variances, {} training sets, {} test sets, {} means",
            tasks,
            train_targets.len(),
            test_targets.len(),
            predicted_mean.len()
        );
    }

    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let mut out = Array1::zeros(tasks);
    for k in 0..tasks {
        let v_pred = &predicted_variance[k];
        let m_pred = &predicted_mean[k];
        let y_test = &test_targets[k];
        let y_train = &train_targets[k];

        if v_pred.len() != y_test.len() || m_pred.len() != y_test.len() {
            bail!("task {}: prediction and test lengths disagree", k);
        }
        if y_test.is_empty() || y_train.is_empty() {
            bail!("task {} has no observations", k);
        }
        if v_pred.iter().any(|&v| v <= 0.0) {
            bail!("task {} has non-positive predicted variances", k);
        }

        let n_train = y_train.len() as f64;
        let train_mean = y_train.sum() / n_train;
        let train_var = y_train.mapv(|v| (v - train_mean) * (v - train_mean)).sum() / n_train;
        if train_var <= 0.0 {
            bail!("task {} has constant training targets", k);
        }

        let mut total = 0.0;
        for i in 0..y_test.len() {
            let r = y_test[i] - m_pred[i];
            let nlp = 0.5 * (ln_2pi + v_pred[i].ln()) + r * r / (2.0 * v_pred[i]);
            let r0 = y_test[i] - train_mean;
            let nlp0 = 0.5 * (ln_2pi + train_var.ln()) + r0 * r0 / (2.0 * train_var);
            total += nlp - nlp0;
        }
        out[k] = total / y_test.len() as f64;
    }
    Ok(out)
}
