//! Dense, Cholesky-factored posterior representation for coupled-mode EP.

use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::{Cholesky, Inverse, SolveTriangular, UPLO};

use crate::factor::CouplingFactor;
use crate::types::{Error, Result};

/// Maintains the EP natural parameters `(pi, beta)` on `s = Bx` together
/// with the Cholesky factor `L` of `A = B^T diag(pi) B` and the vector `c`
/// solving `L c = B^T beta`, so that the posterior mean is `x = L^-T c`.
#[derive(Clone, Debug)]
pub struct CoupledRepresentation {
    b: CouplingFactor,
    ep_pi: Array1<f64>,
    ep_beta: Array1<f64>,
    l: Array2<f64>,
    c: Array1<f64>,
    keep_margs: bool,
    marg_means: Option<Array1<f64>>,
    marg_vars: Option<Array1<f64>>,
    post_cov: Option<Array2<f64>>,
}

impl CoupledRepresentation {
    /// Builds a representation with all EP sites at zero natural parameters.
    ///
    /// Call [`Self::refresh`] once natural parameters have been set via
    /// [`Self::set_pi`]/[`Self::set_beta`] before using it for prediction.
    pub fn new(b: CouplingFactor, keep_margs: bool) -> Self {
        let (m, n) = b.shape();
        Self {
            b,
            ep_pi: Array1::zeros(m),
            ep_beta: Array1::zeros(m),
            l: Array2::zeros((n, n)),
            c: Array1::zeros(n),
            keep_margs,
            marg_means: None,
            marg_vars: None,
            post_cov: None,
        }
    }

    /// Overwrites the full `pi` vector. Call [`Self::refresh`] afterwards.
    pub fn set_pi(&mut self, pi: Array1<f64>) -> Result<()> {
        if pi.len() != self.ep_pi.len() {
            return Err(Error::InvalidArgument("PI has the wrong length.".into()));
        }
        self.ep_pi = pi;
        Ok(())
    }

    /// Overwrites the full `beta` vector. Call [`Self::refresh`] afterwards.
    pub fn set_beta(&mut self, beta: Array1<f64>) -> Result<()> {
        if beta.len() != self.ep_beta.len() {
            return Err(Error::InvalidArgument("BETA has the wrong length.".into()));
        }
        self.ep_beta = beta;
        Ok(())
    }

    pub fn pi(&self) -> ArrayView1<f64> {
        self.ep_pi.view()
    }

    pub fn beta(&self) -> ArrayView1<f64> {
        self.ep_beta.view()
    }

    pub fn coupling_factor(&self) -> &CouplingFactor {
        &self.b
    }

    /// Recomputes `L`, `c` (and, if requested, cached marginals) from the
    /// current `(pi, beta)` from scratch.
    pub fn refresh(&mut self) -> Result<()> {
        let a = self.b.mat_btdb(self.ep_pi.view())?;
        self.l = a
            .cholesky(UPLO::Lower)
            .map_err(|_| Error::NumericFailure("A = B^T diag(pi) B is not positive definite.".into()))?;
        let bt_beta = self.b.transpose().mvm(self.ep_beta.view())?;
        self.c = self.l.solve_triangular(UPLO::Lower, ndarray_linalg::Diag::NonUnit, &bt_beta)?;
        if self.keep_margs {
            self.recompute_marginal_cache()?;
        }
        Ok(())
    }

    fn recompute_marginal_cache(&mut self) -> Result<()> {
        let lt = self.l.t().to_owned();
        let mean_coef = lt.solve_triangular(UPLO::Upper, ndarray_linalg::Diag::NonUnit, &self.c)?;
        self.marg_means = Some(self.b.mvm(mean_coef.view())?);
        let a = self.l.dot(&self.l.t());
        let post_cov = a
            .inv()
            .map_err(|e| Error::Linalg(e.to_string()))?;
        self.marg_vars = Some(self.b.diag_bsbt(post_cov.view())?);
        self.post_cov = Some(post_cov);
        Ok(())
    }

    /// Applies a rank-1 change `delta_pi`, `delta_beta` to EP site `j`,
    /// updating `(L, c)` in place via a Cholesky rank-1 update
    /// (`delta_pi > 0`) or downdate (`delta_pi < 0`), and refreshing cached
    /// marginals (if kept) with the incremental formula rather than a full
    /// recompute.
    ///
    /// `v` is `L^-1 b_j` (`b_j` being column `j` of `B^T`); pass it in when
    /// the caller already has it (e.g. from a preceding [`Self::get_marg`]
    /// call) to skip recomputing it here. Note that `post_cov`, if cached,
    /// is *not* refreshed by this incremental path: call [`Self::refresh`]
    /// if an up-to-date `predict` variance is needed afterward.
    pub fn update_single(&mut self, j: usize, delta_pi: f64, delta_beta: f64, v: Option<ArrayView1<f64>>) -> Result<()> {
        if j >= self.ep_pi.len() {
            return Err(Error::InvalidArgument(format!("Site index {j} out of bounds.")));
        }
        let b_row = self.b.transpose().getcol(j)?;
        let v_owned;
        let v: ArrayView1<f64> = match v {
            Some(v) => v,
            None => {
                v_owned = self.l.solve_triangular(UPLO::Lower, ndarray_linalg::Diag::NonUnit, &b_row)?;
                v_owned.view()
            }
        };
        let (mu, rho) = if self.keep_margs { (v.dot(&self.c), v.dot(&v)) } else { (0.0, 0.0) };

        if delta_pi != 0.0 {
            let scale = delta_pi.abs().sqrt();
            let mut z: Array1<f64> = b_row.mapv(|x| x * scale);
            cholesky_rank1_update(&mut self.l, &mut z, delta_pi.signum())?;
        }
        self.ep_pi[j] += delta_pi;
        self.ep_beta[j] += delta_beta;
        let bt_beta = self.b.transpose().mvm(self.ep_beta.view())?;
        self.c = self.l.solve_triangular(UPLO::Lower, ndarray_linalg::Diag::NonUnit, &bt_beta)?;

        if self.keep_margs {
            match (&mut self.marg_means, &mut self.marg_vars) {
                (Some(_), Some(_)) => {
                    let lt = self.l.t().to_owned();
                    let v_owned = v.to_owned();
                    let w_coef = lt.solve_triangular(UPLO::Upper, ndarray_linalg::Diag::NonUnit, &v_owned)?;
                    let w = self.b.mvm(w_coef.view())?;
                    let denom = delta_pi * rho + 1.0;
                    let mean_scale = (delta_beta - delta_pi * mu) / denom;
                    let var_scale = delta_pi / denom;
                    if let Some(means) = &mut self.marg_means {
                        ndarray::Zip::from(means).and(&w).for_each(|m, &wi| *m += wi * mean_scale);
                    }
                    if let Some(vars) = &mut self.marg_vars {
                        ndarray::Zip::from(vars).and(&w).for_each(|v, &wi| *v -= wi * wi * var_scale);
                    }
                }
                _ => self.recompute_marginal_cache()?,
            }
        }
        Ok(())
    }

    /// Recomputes the marginal moments `(mean, variance)` of site `j` from
    /// `(L, c)`, without relying on the (possibly absent) marginal cache.
    pub fn get_marg(&self, j: usize) -> Result<(f64, f64)> {
        if j >= self.ep_pi.len() {
            return Err(Error::InvalidArgument(format!("Site index {j} out of bounds.")));
        }
        let b_row = self.b.transpose().getcol(j)?;
        let v = self.l.solve_triangular(UPLO::Lower, ndarray_linalg::Diag::NonUnit, &b_row)?;
        let mu = v.dot(&self.c);
        let rho = v.dot(&v);
        Ok((mu, rho))
    }

    /// Cached per-site marginal means, if [`Self::new`] was built with `keep_margs`.
    pub fn marg_means(&self) -> Option<ArrayView1<f64>> {
        self.marg_means.as_ref().map(|a| a.view())
    }

    /// Cached per-site marginal variances, if [`Self::new`] was built with `keep_margs`.
    pub fn marg_vars(&self) -> Option<ArrayView1<f64>> {
        self.marg_vars.as_ref().map(|a| a.view())
    }

    /// Predicts the posterior mean (and, if `want_var`, variance) of
    /// `s' = B' x` for a prediction factor `b_pred`.
    pub fn predict(&self, b_pred: &CouplingFactor, want_var: bool) -> Result<(Array1<f64>, Option<Array1<f64>>)> {
        let lt = self.l.t().to_owned();
        let mean_coef = lt.solve_triangular(UPLO::Upper, ndarray_linalg::Diag::NonUnit, &self.c)?;
        let means = b_pred.mvm(mean_coef.view())?;
        if !want_var {
            return Ok((means, None));
        }
        let post_cov = if let Some(cov) = &self.post_cov {
            cov.clone()
        } else {
            let a = self.l.dot(&self.l.t());
            a.inv().map_err(|e| Error::Linalg(e.to_string()))?
        };
        let vars = b_pred.diag_bsbt(post_cov.view())?;
        Ok((means, Some(vars)))
    }
}

/// Updates `l` in place so that `l l^T` becomes `l l^T + sign * z z^T`
/// (`sign = 1.0` for an update, `sign = -1.0` for a downdate), and
/// overwrites `z` with scratch values along the way.
///
/// Standard column-wise rank-1 Cholesky modification (LINPACK `ch`).
pub fn cholesky_rank1_update(l: &mut Array2<f64>, z: &mut Array1<f64>, sign: f64) -> Result<()> {
    let n = l.nrows();
    for k in 0..n {
        let lkk = l[[k, k]];
        let zk = z[k];
        let r2 = lkk * lkk + sign * zk * zk;
        if r2 <= 0.0 {
            return Err(Error::NumericFailure("Cholesky rank-1 downdate is not positive definite.".into()));
        }
        let r = r2.sqrt();
        let cos = r / lkk;
        let sin = zk / lkk;
        l[[k, k]] = r;
        for i in (k + 1)..n {
            let lik = l[[i, k]];
            let zi = z[i];
            l[[i, k]] = (lik + sign * sin * zi) / cos;
            z[i] = (lkk * zi - zk * lik) / r;
        }
    }
    Ok(())
}

/// The ADF heuristic for initializing coupled-mode Gaussian-noise sites:
/// one potential block, one EP site each, with `pi_j = 1 / sigma2_j` and
/// `beta_j = y_j / sigma2_j`.
///
/// # Panics
///
/// * Panics if `y` and `sigma2` differ in length.
pub fn init_adf_gaussian(y: &[f64], sigma2: &[f64]) -> (Array1<f64>, Array1<f64>) {
    assert_eq!(y.len(), sigma2.len(), "Y and SIGMA2 must have the same length.");
    let pi: Array1<f64> = sigma2.iter().map(|&s2| 1.0 / s2).collect();
    let beta: Array1<f64> = y.iter().zip(sigma2).map(|(&yi, &s2)| yi / s2).collect();
    (pi, beta)
}
