//! Predictive distribution: a Gaussian forecast from the posterior,
//! optionally tilted against held-out potentials.

use ndarray::Array1;

use crate::factor::CouplingFactor;
use crate::potentials::PotentialRegistry;
use crate::representation::{CoupledRepresentation, FactorizedRepresentation};
use crate::types::{Result, TILTED_VARIANCE_EPSILON};

/// How much of the predictive distribution to compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictionType {
    /// Only the Gaussian predictive mean `h_q`.
    MeanOnly,
    /// The Gaussian predictive mean and variance `(h_q, rho_q)`.
    MeanAndVariance,
    /// The tilted moments `(log_z, h_p, rho_p)` against held-out potentials,
    /// without the untilted Gaussian moments.
    Tilted,
    /// Everything: `(h_q, rho_q, log_z, h_p, rho_p)`.
    Full,
}

/// Predictive moments for a batch of held-out sites `s' = B' x`.
#[derive(Clone, Debug)]
pub struct Prediction {
    /// Gaussian predictive mean.
    pub h_q: Array1<f64>,
    /// Gaussian predictive variance, present for [`PredictionType::MeanAndVariance`] and [`PredictionType::Full`].
    pub rho_q: Option<Array1<f64>>,
    /// Tilted log-partition per site, present for [`PredictionType::Tilted`] and [`PredictionType::Full`].
    pub log_z: Option<Array1<f64>>,
    /// Tilted predictive mean per site.
    pub h_p: Option<Array1<f64>>,
    /// Tilted predictive variance per site.
    pub rho_p: Option<Array1<f64>>,
    /// Updated Gamma natural parameters `a'` for the bivariate-precision
    /// sites named by `BvPrecCavity::tau_ind`, present only when bvp cavity
    /// parameters were supplied, tilted moments were requested, and the
    /// registry actually supports [`PotentialRegistry::update_bvprec`] for
    /// that site.
    pub a_p: Option<Array1<f64>>,
    /// Updated Gamma natural parameters `c'`, see [`Self::a_p`].
    pub c_p: Option<Array1<f64>>,
}

/// Per-site Gamma cavity natural parameters `(a, c)` for the
/// bivariate-precision positions of a test potential manager's layout
/// (`PotentialLayout::tau_ind`), passed alongside the ordinary Gaussian
/// cavity to `predict_coupled`/`predict_factorized`.
pub struct BvPrecCavity<'a> {
    /// Indices into the test site list that are bivariate-precision
    /// positions (`PotentialLayout::tau_ind`).
    pub tau_ind: &'a [usize],
    /// Gamma cavity natural parameter `a`, one per `tau_ind` entry.
    pub a_cav: &'a [f64],
    /// Gamma cavity natural parameter `c`, one per `tau_ind` entry.
    pub c_cav: &'a [f64],
}

#[allow(clippy::too_many_arguments)]
fn tilt(
    h_q: &Array1<f64>,
    rho_q: &Array1<f64>,
    pot_ids: &[u32],
    par_vec: &[f64],
    par_offsets: &[usize],
    par_len: &[usize],
    registry: &dyn PotentialRegistry,
    bvp: Option<&BvPrecCavity>,
) -> Result<(Array1<f64>, Array1<f64>, Array1<f64>, Option<Array1<f64>>, Option<Array1<f64>>)> {
    let cav_pi: Vec<f64> = rho_q.iter().map(|&r| 1.0 / r).collect();
    let cav_beta: Vec<f64> = h_q.iter().zip(rho_q).map(|(&h, &r)| h / r).collect();
    let (log_z, alpha, nu) = registry.update_parallel(pot_ids, par_vec, par_offsets, par_len, &cav_pi, &cav_beta)?;

    let mut h_p = Array1::zeros(h_q.len());
    let mut rho_p = Array1::zeros(h_q.len());
    let mut log_z_out = Array1::zeros(h_q.len());
    let mut a_p = bvp.map(|b| Array1::from_elem(b.tau_ind.len(), f64::NAN));
    let mut c_p = bvp.map(|b| Array1::from_elem(b.tau_ind.len(), f64::NAN));

    for i in 0..h_q.len() {
        let bvp_slot = bvp.and_then(|b| b.tau_ind.iter().position(|&j| j == i).map(|k| (b, k)));
        if let Some((b, k)) = bvp_slot {
            let (start, len) = (par_offsets[i], par_len[i]);
            let pars = &par_vec[start..start + len];
            if let Some((lz, a, n, a_new, c_new)) =
                registry.update_bvprec(pot_ids[i], pars, cav_pi[i], cav_beta[i], b.a_cav[k], b.c_cav[k])?
            {
                let tscal = 1.0 - n * rho_q[i];
                if tscal < TILTED_VARIANCE_EPSILON {
                    h_p[i] = h_q[i];
                    rho_p[i] = rho_q[i];
                    log_z_out[i] = 0.0;
                } else {
                    h_p[i] = h_q[i] + a * rho_q[i];
                    rho_p[i] = rho_q[i] * tscal;
                    log_z_out[i] = lz;
                }
                a_p.as_mut().unwrap()[k] = a_new;
                c_p.as_mut().unwrap()[k] = c_new;
                continue;
            }
            // Registry has no bvp support for this site: fall through to
            // the ordinary Gaussian tilt below.
        }
        let tscal = 1.0 - nu[i] * rho_q[i];
        if tscal < TILTED_VARIANCE_EPSILON {
            // Degenerate tilt: fall back to the untilted cavity moments.
            h_p[i] = h_q[i];
            rho_p[i] = rho_q[i];
            log_z_out[i] = 0.0;
        } else {
            h_p[i] = h_q[i] + alpha[i] * rho_q[i];
            rho_p[i] = rho_q[i] * tscal;
            log_z_out[i] = log_z[i];
        }
    }
    Ok((log_z_out, h_p, rho_p, a_p, c_p))
}

/// Predicts from a coupled-mode posterior.
pub fn predict_coupled(
    rep: &CoupledRepresentation,
    b_pred: &CouplingFactor,
    ptype: PredictionType,
    test: Option<(&[u32], &[f64], &[usize], &[usize], &dyn PotentialRegistry)>,
    bvp: Option<&BvPrecCavity>,
) -> Result<Prediction> {
    let want_var = !matches!(ptype, PredictionType::MeanOnly);
    let (h_q, rho_q) = rep.predict(b_pred, want_var)?;
    assemble_prediction(h_q, rho_q, ptype, test, bvp)
}

/// Predicts from a factorized-mode posterior.
pub fn predict_factorized(
    rep: &FactorizedRepresentation,
    b_pred: &CouplingFactor,
    ptype: PredictionType,
    test: Option<(&[u32], &[f64], &[usize], &[usize], &dyn PotentialRegistry)>,
    bvp: Option<&BvPrecCavity>,
) -> Result<Prediction> {
    let want_var = !matches!(ptype, PredictionType::MeanOnly);
    let (h_q, rho_q) = rep.predict(b_pred, want_var)?;
    assemble_prediction(h_q, rho_q, ptype, test, bvp)
}

fn assemble_prediction(
    h_q: Array1<f64>,
    rho_q: Option<Array1<f64>>,
    ptype: PredictionType,
    test: Option<(&[u32], &[f64], &[usize], &[usize], &dyn PotentialRegistry)>,
    bvp: Option<&BvPrecCavity>,
) -> Result<Prediction> {
    let needs_tilt = matches!(ptype, PredictionType::Tilted | PredictionType::Full);
    let (log_z, h_p, rho_p, a_p, c_p) = if needs_tilt {
        let rho_q_ref = rho_q.as_ref().expect("MeanAndVariance is implied by Tilted/Full.");
        let (pot_ids, par_vec, par_offsets, par_len, registry) =
            test.expect("Tilted/Full prediction requires a potential registry.");
        let (lz, hp, rp, ap, cp) = tilt(&h_q, rho_q_ref, pot_ids, par_vec, par_offsets, par_len, registry, bvp)?;
        (Some(lz), Some(hp), Some(rp), ap, cp)
    } else {
        (None, None, None, None, None)
    };
    let rho_q = if matches!(ptype, PredictionType::MeanAndVariance | PredictionType::Full) {
        rho_q
    } else {
        None
    };
    Ok(Prediction { h_q, rho_q, log_z, h_p, rho_p, a_p, c_p })
}

#[cfg(test)]
mod tests {
    use ndarray::arr1;

    use super::*;
    use crate::potentials::PotentialManager;
    use crate::representation::CoupledRepresentation;

    #[test]
    fn mean_only_prediction_skips_variance_and_tilt() {
        let mut rep = CoupledRepresentation::new(CouplingFactor::identity(2), false);
        rep.set_pi(arr1(&[1.0, 1.0])).unwrap();
        rep.set_beta(arr1(&[2.0, -1.0])).unwrap();
        rep.refresh().unwrap();
        let pred = predict_coupled(&rep, &CouplingFactor::identity(2), PredictionType::MeanOnly, None, None).unwrap();
        assert!(pred.rho_q.is_none());
        assert!(pred.log_z.is_none());
        assert_eq!(pred.h_q.len(), 2);
    }

    #[test]
    fn mean_and_variance_prediction_has_no_tilt() {
        let mut rep = CoupledRepresentation::new(CouplingFactor::identity(2), false);
        rep.set_pi(arr1(&[1.0, 2.0])).unwrap();
        rep.set_beta(arr1(&[1.0, 1.0])).unwrap();
        rep.refresh().unwrap();
        let pred =
            predict_coupled(&rep, &CouplingFactor::identity(2), PredictionType::MeanAndVariance, None, None).unwrap();
        assert!(pred.rho_q.is_some());
        assert!(pred.log_z.is_none());
        let _ = PotentialManager::new();
    }

    struct BvPrecRegistry;

    impl PotentialRegistry for BvPrecRegistry {
        fn update_parallel(
            &self,
            _pot_ids: &[u32],
            _par_vec: &[f64],
            _par_offsets: &[usize],
            _par_len: &[usize],
            cav_pi: &[f64],
            cav_beta: &[f64],
        ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
            let n = cav_pi.iter().zip(cav_beta).map(|(&p, _)| 0.5 * p).collect();
            Ok((vec![0.0; cav_pi.len()], vec![0.0; cav_pi.len()], n))
        }

        fn update_single(&self, pot_id: u32, pars: &[f64], cav_pi: f64, cav_beta: f64) -> Result<Option<(f64, f64, f64)>> {
            let r = self.update_parallel(&[pot_id], pars, &[0], &[pars.len()], &[cav_pi], &[cav_beta])?;
            Ok(Some((r.0[0], r.1[0], r.2[0])))
        }

        fn update_bvprec(
            &self,
            _pot_id: u32,
            _pars: &[f64],
            cav_pi: f64,
            _cav_beta: f64,
            a_cav: f64,
            c_cav: f64,
        ) -> Result<Option<(f64, f64, f64, f64, f64)>> {
            Ok(Some((0.0, 0.0, 0.5 * cav_pi, a_cav + 0.5, c_cav + cav_pi)))
        }
    }

    #[test]
    fn bvprec_cavity_reaches_the_registry_and_populates_gamma_updates() {
        let mut rep = CoupledRepresentation::new(CouplingFactor::identity(2), false);
        rep.set_pi(arr1(&[1.0, 2.0])).unwrap();
        rep.set_beta(arr1(&[1.0, 1.0])).unwrap();
        rep.refresh().unwrap();

        let pot_ids = [0u32, 0];
        let par_vec: Vec<f64> = vec![];
        let par_offsets = [0usize, 0];
        let par_len = [0usize, 0];
        let registry = BvPrecRegistry;
        let bvp = BvPrecCavity { tau_ind: &[1], a_cav: &[2.0], c_cav: &[3.0] };

        let pred = predict_coupled(
            &rep,
            &CouplingFactor::identity(2),
            PredictionType::Full,
            Some((&pot_ids, &par_vec, &par_offsets, &par_len, &registry)),
            Some(&bvp),
        )
        .unwrap();

        let a_p = pred.a_p.unwrap();
        let c_p = pred.c_p.unwrap();
        assert_eq!(a_p.len(), 1);
        assert_relative_eq(a_p[0], 2.5);
        // c_p[0] = c_cav + cav_pi = 3.0 + 1/rho_q[1]; rho_q[1] = 1/pi[1] = 0.5.
        assert_relative_eq(c_p[0], 5.0);
    }

    fn assert_relative_eq(a: f64, b: f64) {
        approx::assert_relative_eq!(a, b, epsilon = 1e-9);
    }
}
