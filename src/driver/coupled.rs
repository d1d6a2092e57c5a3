//! Coupled-mode sweep drivers: vectorized parallel EP and randomized
//! sequential EP, both over a [`CoupledRepresentation`].

use rand::seq::SliceRandom;
use rand::Rng;

use crate::potentials::{PotentialLayout, PotentialRegistry};
use crate::representation::CoupledRepresentation;
use crate::types::{max_rel_diff, Result};

use super::options::{Options, SweepResult};

/// Skip-reason indices for [`coupled_sequential_sweep`]'s histogram.
pub mod skip {
    /// Update committed, or `|delta_pi|` below `skipeps` (no representation change).
    pub const COMMITTED_OR_BELOW_SKIPEPS: usize = 0;
    /// Cavity precision at or below `caveps`.
    pub const CAVITY_DEGENERATE: usize = 1;
    /// The potential collaborator reported a local failure.
    pub const LOCAL_UPDATE_FAILED: usize = 2;
    /// Cholesky rank-1 update/downdate was not positive definite.
    pub const CHOLESKY_FAILED: usize = 3;
}

fn stacked_margs(rep: &CoupledRepresentation) -> Option<Vec<f64>> {
    let means = rep.marg_means()?;
    let vars = rep.marg_vars()?;
    Some(means.iter().copied().chain(vars.iter().map(|v| v.sqrt())).collect())
}

/// Runs vectorized parallel EP to convergence: every sweep recomputes the
/// tilted moments of every update-set site from the *same* cavity, then
/// commits all of them at once before a single `refresh`.
pub fn coupled_parallel_sweep(
    rep: &mut CoupledRepresentation,
    layout: &PotentialLayout,
    registry: &dyn PotentialRegistry,
    opts: &Options,
) -> Result<SweepResult> {
    let mut result = SweepResult { skip_counts: vec![0], ..Default::default() };
    let mut history = Vec::new();
    let mut prev_margs = stacked_margs(rep);

    for it in 0..opts.max_iter.max(1) {
        let mm = layout.upd_ind.len();
        let mut idx_ok = Vec::with_capacity(mm);
        let mut cav_pi = Vec::with_capacity(mm);
        let mut cav_beta = Vec::with_capacity(mm);
        for &j in &layout.upd_ind {
            let (mu_q, rho_q) = rep.get_marg(j)?;
            let tscal = 1.0 - rep.pi()[j] * rho_q;
            if tscal < opts.caveps {
                continue;
            }
            idx_ok.push(j);
            cav_pi.push(tscal / rho_q);
            cav_beta.push(mu_q / rho_q - rep.beta()[j]);
        }
        result.skip_counts[0] = mm - idx_ok.len();

        if !idx_ok.is_empty() {
            let pot_ids: Vec<u32> = idx_ok.iter().map(|&j| layout.pot_ids[j]).collect();
            let par_offsets: Vec<usize> = idx_ok.iter().map(|&j| layout.par_offsets[j]).collect();
            let par_len: Vec<usize> = idx_ok.iter().map(|&j| layout.par_len[j]).collect();
            let (_log_z, alpha, nu) = registry.update_parallel(
                &pot_ids,
                &layout.par_vec,
                &par_offsets,
                &par_len,
                &cav_pi,
                &cav_beta,
            )?;

            let mut new_pi = rep.pi().to_owned();
            let mut new_beta = rep.beta().to_owned();
            for (k, &j) in idx_ok.iter().enumerate() {
                let tscal2 = 1.0 - nu[k] * (1.0 / cav_pi[k]);
                if tscal2 < 1e-7 {
                    continue;
                }
                let rho_cav = 1.0 / cav_pi[k];
                let mu_cav = cav_beta[k] * rho_cav;
                let candidate_pi = nu[k] / tscal2;
                let candidate_beta = (mu_cav * nu[k] + alpha[k]) / tscal2;
                new_pi[j] = opts.damp * rep.pi()[j] + (1.0 - opts.damp) * candidate_pi;
                new_beta[j] = opts.damp * rep.beta()[j] + (1.0 - opts.damp) * candidate_beta;
            }
            rep.set_pi(new_pi)?;
            rep.set_beta(new_beta)?;
        }
        rep.refresh()?;

        let margs = stacked_margs(rep);
        let delta = match (&prev_margs, &margs) {
            (Some(p), Some(m)) => max_rel_diff(p, m),
            _ => f64::INFINITY,
        };
        if opts.res_det {
            history.push(delta);
        }
        if opts.verbose > 0 {
            log::info!("coupled parallel sweep {it}: delta = {delta:.3e}");
        }
        result.n_iter = it + 1;
        result.final_delta = delta;
        prev_margs = margs;
        if delta < opts.delta_eps {
            result.converged = true;
            break;
        }
    }
    if opts.res_det {
        result.delta_history = Some(history);
    }
    Ok(result)
}

/// Runs randomized sequential EP to convergence: each sweep visits the
/// update set in a fresh random order, tilts and commits one site at a
/// time (Cholesky rank-1 update), with optional selective damping.
pub fn coupled_sequential_sweep(
    rep: &mut CoupledRepresentation,
    layout: &PotentialLayout,
    registry: &dyn PotentialRegistry,
    opts: &Options,
    rng: &mut impl Rng,
) -> Result<SweepResult> {
    let mut result = SweepResult { skip_counts: vec![0; 4], ..Default::default() };
    let mut history = Vec::new();
    let mut prev_margs = stacked_margs(rep);

    for it in 0..opts.max_iter.max(1) {
        let mut order = layout.upd_ind.clone();
        order.shuffle(rng);
        let mut counts = [0usize; 4];

        for j in order {
            let (mu_q, rho_q) = rep.get_marg(j)?;
            let pi_j = rep.pi()[j];
            let beta_j = rep.beta()[j];
            let tscal = 1.0 - pi_j * rho_q;
            if tscal < opts.caveps {
                counts[skip::CAVITY_DEGENERATE] += 1;
                continue;
            }
            let rho_cav = rho_q / tscal;
            let beta_cav = mu_q / rho_q - beta_j;
            let pi_cav = 1.0 / rho_cav;

            let pot_id = layout.pot_ids[j];
            let (start, len) = (layout.par_offsets[j], layout.par_len[j]);
            let pars = &layout.par_vec[start..start + len];
            let matched = registry.update_single(pot_id, pars, pi_cav, beta_cav)?;
            let Some((_log_z, alpha, nu)) = matched else {
                counts[skip::LOCAL_UPDATE_FAILED] += 1;
                continue;
            };

            let tscal2 = 1.0 - nu * rho_cav;
            if tscal2 < 1e-7 {
                counts[skip::CAVITY_DEGENERATE] += 1;
                continue;
            }
            let mu_cav = beta_cav * rho_cav;
            let new_pi = nu / tscal2;
            let new_beta = (mu_cav * nu + alpha) / tscal2;

            let dfl_pi = new_pi - pi_j;
            let dfl_beta = new_beta - beta_j;
            let mut delta_pi = (1.0 - opts.damp) * dfl_pi;
            let mut delta_beta = (1.0 - opts.damp) * dfl_beta;

            // Selective damping: guarantee the cavity this update implies
            // for *other* sites sharing s_j stays above caveps.
            if delta_pi * rho_q + 1.0 < opts.caveps {
                delta_pi = (opts.caveps - 1.0) / rho_q;
                if dfl_pi != 0.0 {
                    delta_beta = (delta_pi / dfl_pi) * dfl_beta;
                }
            }

            if delta_pi.abs() >= opts.skipeps {
                match rep.update_single(j, delta_pi, delta_beta, None) {
                    Ok(()) => {}
                    Err(_) => {
                        counts[skip::CHOLESKY_FAILED] += 1;
                        continue;
                    }
                }
            } else {
                // Per the reference driver, a below-threshold update is
                // folded back into the "no skip" bucket rather than its own
                // category.
                counts[skip::COMMITTED_OR_BELOW_SKIPEPS] += 1;
            }
        }
        result.skip_counts = counts.to_vec();

        if opts.refresh {
            rep.refresh()?;
        }
        let margs = stacked_margs(rep);
        let delta = match (&prev_margs, &margs) {
            (Some(p), Some(m)) => max_rel_diff(p, m),
            _ => f64::INFINITY,
        };
        if opts.res_det {
            history.push(delta);
        }
        if opts.verbose > 0 {
            log::info!("coupled sequential sweep {it}: delta = {delta:.3e}, skips = {counts:?}");
        }
        result.n_iter = it + 1;
        result.final_delta = delta;
        prev_margs = margs;
        if delta < opts.delta_eps {
            result.converged = true;
            break;
        }
    }
    if opts.res_det {
        result.delta_history = Some(history);
    }
    Ok(result)
}
