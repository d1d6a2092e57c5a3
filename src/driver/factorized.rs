//! Factorized-mode sequential EP sweep driver, over a
//! [`FactorizedRepresentation`] with optional selective damping.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::potentials::{PotentialLayout, PotentialRegistry};
use crate::representation::{FactorizedRepresentation, SelectiveDamping};
use crate::types::{max_rel_diff, Result};

use super::options::{Options, SweepResult};

/// Skip-reason indices for [`factorized_sequential_sweep`]'s histogram.
pub mod skip {
    /// At least one touched variable's cavity precision was at or below `piminthres`.
    pub const INVALID_CAVITY: usize = 0;
    /// The potential collaborator reported a local failure, or the tilted
    /// variance at the factor was non-positive.
    pub const LOCAL_FAILURE: usize = 1;
    /// A proposed per-edge target precision fell at or below `piminthres`.
    pub const INVALID_NEW_MARGINAL: usize = 2;
    /// Selective damping forced the effective update to zero.
    pub const SELECTIVE_DAMPING_ZEROED: usize = 3;
    /// Update committed, or `|delta_pi|` below `skipeps` (no representation change).
    pub const COMMITTED_OR_BELOW_SKIPEPS: usize = 4;
}

fn stacked_margs(rep: &FactorizedRepresentation) -> Vec<f64> {
    let n = rep.num_vars();
    let mut out = Vec::with_capacity(2 * n);
    for j in 0..n {
        match rep.get_marg(j) {
            Ok((mu, rho)) => {
                out.push(mu);
                out.push(rho.sqrt());
            }
            Err(_) => {
                out.push(0.0);
                out.push(0.0);
            }
        }
    }
    out
}

/// Runs randomized sequential EP over a bipartite factor graph: each sweep
/// visits every site (row of `B`) in random order, aggregates the
/// leave-one-out cavity moment across all variables that site touches,
/// tilts it once against the external potential, and back-projects the
/// resulting precision/mean onto each of that site's edges (optionally
/// selectively damped).
pub fn factorized_sequential_sweep(
    rep: &mut FactorizedRepresentation,
    sd: &mut SelectiveDamping,
    layout: &PotentialLayout,
    registry: &dyn PotentialRegistry,
    opts: &Options,
    rng: &mut impl Rng,
) -> Result<SweepResult> {
    let mut result = SweepResult { skip_counts: vec![0; 5], ..Default::default() };
    let mut history = Vec::new();
    let mut prev_margs = stacked_margs(rep);

    for it in 0..opts.max_iter.max(1) {
        sd.reset(rep);
        let mut order: Vec<usize> = (0..rep.num_sites()).collect();
        order.shuffle(rng);
        let mut counts = [0usize; 5];

        'sites: for site in order {
            let edges: Vec<(usize, usize, f64)> = rep.site_edges(site).collect();
            if edges.is_empty() {
                continue;
            }

            // Step 1-2: per-variable cavity, aggregated into one factor-level
            // cavity moment (mu_cav, rho_cav).
            let mut cav_pi_per_var = Vec::with_capacity(edges.len());
            let mut cav_beta_per_var = Vec::with_capacity(edges.len());
            let mut rho_cav = 0.0;
            let mut mu_cav_weighted = 0.0;
            for &(e, _var, b) in &edges {
                let (cav_pi, cav_beta) = rep.cavity(e);
                if cav_pi <= opts.piminthres {
                    counts[skip::INVALID_CAVITY] += 1;
                    continue 'sites;
                }
                cav_pi_per_var.push(cav_pi);
                cav_beta_per_var.push(cav_beta);
                rho_cav += b * b / cav_pi;
                mu_cav_weighted += b * (cav_beta / cav_pi);
            }
            let mu_cav = mu_cav_weighted;

            // Step 3: one moment match for the whole factor.
            let pot_id = layout.pot_ids[site];
            let (start, len) = (layout.par_offsets[site], layout.par_len[site]);
            let pars = &layout.par_vec[start..start + len];
            let pi_cav = 1.0 / rho_cav;
            let beta_cav = mu_cav * pi_cav;
            let matched = registry.update_single(pot_id, pars, pi_cav, beta_cav)?;
            let Some((_log_z, alpha, nu)) = matched else {
                counts[skip::LOCAL_FAILURE] += 1;
                continue 'sites;
            };
            let tscal = 1.0 - nu * rho_cav;
            if tscal <= 0.0 {
                counts[skip::LOCAL_FAILURE] += 1;
                continue 'sites;
            }

            // Step 4: back-project onto each edge. `target_pi`/`target_beta`
            // are the *bare* per-edge message contributions stored by
            // `set_edge` (variable-space units, `b`-scaling baked in); the
            // combined new variable marginal `cav_pi_per_var[k] + target_pi`
            // is only used for the validity check, never stored.
            let mut deltas = Vec::with_capacity(edges.len());
            for (k, &(e, var, b)) in edges.iter().enumerate() {
                let target_pi = b * b * nu / tscal;
                if cav_pi_per_var[k] + target_pi <= opts.piminthres {
                    counts[skip::INVALID_NEW_MARGINAL] += 1;
                    continue 'sites;
                }
                let target_beta = b * alpha / tscal;
                let old_pi = rep.edge_pi(e);
                let old_beta = rep.edge_beta(e);
                deltas.push((e, var, (1.0 - opts.damp) * (target_pi - old_pi), (1.0 - opts.damp) * (target_beta - old_beta), old_pi, old_beta));
            }

            // Step 5: selective damping, per touched variable, then commit
            // the most conservative factor across the whole site so every
            // edge's update stays mutually consistent.
            let mut factor = 1.0_f64;
            for &(_, var, delta_pi, _, _, _) in &deltas {
                let f = sd.damping_factor(var, rep.marg_pi_of(var), delta_pi);
                factor = factor.min(f);
            }
            if factor <= f64::EPSILON {
                counts[skip::SELECTIVE_DAMPING_ZEROED] += 1;
                continue 'sites;
            }

            let committed = deltas.iter().any(|&(_, _, dp, _, _, _)| (dp * factor).abs() >= opts.skipeps);
            if !committed {
                counts[skip::COMMITTED_OR_BELOW_SKIPEPS] += 1;
                continue 'sites;
            }
            for (e, _var, delta_pi, delta_beta, old_pi, old_beta) in deltas {
                rep.set_edge(e, old_pi + delta_pi * factor, old_beta + delta_beta * factor);
            }
        }
        result.skip_counts = counts.to_vec();

        if opts.refresh {
            rep.refresh();
        }
        let margs = stacked_margs(rep);
        let delta = max_rel_diff(&prev_margs, &margs);
        if opts.res_det {
            history.push(delta);
        }
        if opts.verbose > 0 {
            log::info!("factorized sequential sweep {it}: delta = {delta:.3e}, skips = {counts:?}");
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
