//! Sweep drivers that repeatedly tilt and commit EP sites until convergence.

mod coupled;
mod factorized;
mod options;

pub use coupled::{coupled_parallel_sweep, coupled_sequential_sweep, skip as coupled_skip};
pub use factorized::{factorized_sequential_sweep, skip as factorized_skip};
pub use options::{Options, SweepResult};

/// Binary-classification summary statistics over a held-out set, given the
/// predictive location `h_q` (the sign of the posterior mean of `s`) and
/// the per-example tilted log-partition `log_z` from evaluating each test
/// potential against its predictive cavity.
///
/// `accuracy` is the fraction of examples where `sign(h_q) == target`;
/// `avg_log_lik` is the mean tilted log-likelihood.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BinaryClassificationStats {
    pub accuracy: f64,
    pub avg_log_lik: f64,
}

/// Scores a predictive location vector against `{-1, +1}` targets and a
/// matching vector of tilted log-partitions.
///
/// # Panics
///
/// * Panics if `h_q`, `targets` and `log_z` do not have the same length.
pub fn binary_classification_eval(h_q: &[f64], targets: &[f64], log_z: &[f64]) -> BinaryClassificationStats {
    assert_eq!(h_q.len(), targets.len(), "H_Q and TARGETS must have the same length.");
    assert_eq!(h_q.len(), log_z.len(), "H_Q and LOG_Z must have the same length.");
    let n = h_q.len().max(1) as f64;
    let correct = h_q
        .iter()
        .zip(targets)
        .filter(|(&h, &t)| h.signum() == t.signum())
        .count() as f64;
    let stats = BinaryClassificationStats {
        accuracy: 100.0 * correct / n,
        avg_log_lik: log_z.iter().sum::<f64>() / n,
    };
    log::info!(
        "binary classification: accuracy = {:.2}%, avg log-likelihood = {:.4}",
        stats.accuracy,
        stats.avg_log_lik
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_classification_eval_counts_sign_agreement() {
        let h_q = [1.0, -1.0, 0.5, -0.5];
        let targets = [1.0, -1.0, -1.0, -1.0];
        let log_z = [-0.1, -0.2, -0.3, -0.4];
        let stats = binary_classification_eval(&h_q, &targets, &log_z);
        assert_eq!(stats.accuracy, 75.0);
        assert!((stats.avg_log_lik - (-0.25)).abs() < 1e-9);
    }
}
