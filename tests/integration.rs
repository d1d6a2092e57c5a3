use approx::assert_relative_eq;
use ndarray::{arr1, arr2, Array1};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use ep_glm::driver::{coupled_parallel_sweep, coupled_sequential_sweep, factorized_sequential_sweep, Options};
use ep_glm::factor::Csr;
use ep_glm::potentials::{PotentialBlock, PotentialManager, PotentialRegistry};
use ep_glm::representation::{init_adf_gaussian, CoupledRepresentation, FactorizedRepresentation, SelectiveDamping};
use ep_glm::types::Result;
use ep_glm::CouplingFactor;

/// A registry whose only potential is Gaussian observation noise, so that
/// EP converges in one sweep to the exact ridge-regression posterior: it
/// lets the sweep drivers be checked against a closed-form answer.
struct GaussianNoiseRegistry;

impl PotentialRegistry for GaussianNoiseRegistry {
    fn update_parallel(
        &self,
        _pot_ids: &[u32],
        par_vec: &[f64],
        par_offsets: &[usize],
        _par_len: &[usize],
        cav_pi: &[f64],
        cav_beta: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
        let mut log_z = Vec::with_capacity(cav_pi.len());
        let mut alpha = Vec::with_capacity(cav_pi.len());
        let mut nu = Vec::with_capacity(cav_pi.len());
        for i in 0..cav_pi.len() {
            let y = par_vec[par_offsets[i]];
            let sigma2 = par_vec[par_offsets[i] + 1];
            let tau = 1.0 / sigma2;
            let nu_i = tau;
            let cav_mu = cav_beta[i] / cav_pi[i];
            let alpha_i = tau * (y - cav_mu);
            log_z.push(0.0);
            alpha.push(alpha_i);
            nu.push(nu_i);
        }
        Ok((log_z, alpha, nu))
    }

    fn update_single(&self, pot_id: u32, pars: &[f64], cav_pi: f64, cav_beta: f64) -> Result<Option<(f64, f64, f64)>> {
        let r = self.update_parallel(&[pot_id], pars, &[0], &[pars.len()], &[cav_pi], &[cav_beta])?;
        Ok(Some((r.0[0], r.1[0], r.2[0])))
    }
}

fn gaussian_model(y: &[f64], sigma2: f64) -> (CouplingFactor, PotentialManager) {
    let b = CouplingFactor::identity(y.len());
    let mut pman = PotentialManager::new();
    let pars = y.iter().flat_map(|&yi| [yi, sigma2]).collect();
    pman.push(PotentialBlock::new("obs", 0, y.len(), pars, 2, false, false));
    (b, pman)
}

#[test]
fn coupled_parallel_sweep_recovers_closed_form_gaussian_posterior() {
    let y = [2.0, -1.0, 0.5];
    let sigma2 = 0.25;
    let (b, mut pman) = gaussian_model(&y, sigma2);
    let layout = pman.layout().unwrap().clone();

    let mut rep = CoupledRepresentation::new(b, true);
    let (pi0, beta0) = init_adf_gaussian(&y, &[sigma2; 3]);
    rep.set_pi(pi0).unwrap();
    rep.set_beta(beta0).unwrap();
    rep.refresh().unwrap();

    let opts = Options::new().with_max_iter(5).with_delta_eps(1e-10);
    let result = coupled_parallel_sweep(&mut rep, &layout, &GaussianNoiseRegistry, &opts).unwrap();
    assert!(result.converged);

    let means = rep.marg_means().unwrap();
    assert_relative_eq!(means.as_slice().unwrap(), y.as_slice(), epsilon = 1e-6);
    let vars = rep.marg_vars().unwrap();
    for &v in vars.iter() {
        assert_relative_eq!(v, sigma2, epsilon = 1e-6);
    }
}

#[test]
fn coupled_sequential_sweep_also_recovers_closed_form_posterior() {
    let y = [1.0, 3.0];
    let sigma2 = 1.0;
    let (b, mut pman) = gaussian_model(&y, sigma2);
    let layout = pman.layout().unwrap().clone();

    let mut rep = CoupledRepresentation::new(b, true);
    let (pi0, beta0) = init_adf_gaussian(&y, &[sigma2; 2]);
    rep.set_pi(pi0).unwrap();
    rep.set_beta(beta0).unwrap();
    rep.refresh().unwrap();

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
    let opts = Options::new().with_max_iter(10).with_delta_eps(1e-9);
    let result = coupled_sequential_sweep(&mut rep, &layout, &GaussianNoiseRegistry, &opts, &mut rng).unwrap();
    assert!(result.converged);

    let means = rep.marg_means().unwrap();
    assert_relative_eq!(means.as_slice().unwrap(), y.as_slice(), epsilon = 1e-6);
}

#[test]
fn coupled_sequential_sweep_skips_degenerate_cavity() {
    // A single site whose EP precision already exceeds what a caveps=0.99
    // floor can tolerate: the cavity check must skip it rather than panic.
    let (b, mut pman) = gaussian_model(&[1.0], 0.01);
    let layout = pman.layout().unwrap().clone();
    let mut rep = CoupledRepresentation::new(b, true);
    rep.set_pi(Array1::from_vec(vec![1.0])).unwrap();
    rep.set_beta(Array1::from_vec(vec![1.0])).unwrap();
    rep.refresh().unwrap();

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let opts = Options::new().with_max_iter(1).with_caveps(0.999_999);
    let result = coupled_sequential_sweep(&mut rep, &layout, &GaussianNoiseRegistry, &opts, &mut rng).unwrap();
    assert_eq!(result.skip_counts[ep_glm::driver::coupled_skip::CAVITY_DEGENERATE], 1);
}

#[test]
fn empty_potential_manager_layout_is_an_error() {
    let mut pman = PotentialManager::new();
    assert!(pman.layout().is_err());
}

#[test]
fn model_shape_mismatch_is_rejected() {
    let b = CouplingFactor::identity(3);
    let mut pman = PotentialManager::new();
    pman.push(PotentialBlock::new("obs", 0, 2, vec![0.0, 1.0, 0.0, 1.0], 2, false, false));
    assert!(ep_glm::Model::new(b, pman).is_err());
}

#[test]
fn factorized_sequential_sweep_recovers_closed_form_gaussian_posterior() {
    // Three independent sites, each observing its own variable directly:
    // the bipartite graph is diagonal, so the closed-form posterior is the
    // same ridge-regression answer as the coupled case.
    let y = [2.0, -1.0, 0.5];
    let sigma2 = 0.25;
    let b = Csr::new(3, 3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0, 1.0, 1.0]);
    let mut pman = PotentialManager::new();
    let pars = y.iter().flat_map(|&yi| [yi, sigma2]).collect();
    pman.push(PotentialBlock::new("obs", 0, y.len(), pars, 2, false, false));
    let layout = pman.layout().unwrap().clone();

    let mut rep = FactorizedRepresentation::new(&b);
    for (site, &yi) in y.iter().enumerate() {
        rep.init_adf_gaussian(site, yi, sigma2, 1.0);
    }
    rep.refresh();
    let mut sd = SelectiveDamping::new(3, 1e-8);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
    let opts = Options::new().with_max_iter(10).with_delta_eps(1e-9);
    let result = factorized_sequential_sweep(&mut rep, &mut sd, &layout, &GaussianNoiseRegistry, &opts, &mut rng).unwrap();
    assert!(result.converged);

    for (j, &yi) in y.iter().enumerate() {
        let (mean, var) = rep.get_marg(j).unwrap();
        assert_relative_eq!(mean, yi, epsilon = 1e-6);
        assert_relative_eq!(var, sigma2, epsilon = 1e-6);
    }
}

#[test]
fn factorized_sequential_sweep_aggregates_cavity_across_a_shared_factor() {
    // One site touches both variables (a genuine multi-variable factor):
    // the per-factor cavity aggregation must call the potential once and
    // back-project consistent deltas to both edges.
    let b = Csr::new(1, 2, vec![0, 2], vec![0, 1], vec![1.0, 1.0]);
    let mut pman = PotentialManager::new();
    pman.push(PotentialBlock::new("sum", 0, 1, vec![1.0, 0.5], 2, false, false));
    let layout = pman.layout().unwrap().clone();

    let mut rep = FactorizedRepresentation::new(&b);
    rep.init_adf_gaussian(0, 1.0, 0.5, 1.0);
    rep.refresh();
    let mut sd = SelectiveDamping::new(2, 1e-8);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let opts = Options::new().with_max_iter(1);
    let result = factorized_sequential_sweep(&mut rep, &mut sd, &layout, &GaussianNoiseRegistry, &opts, &mut rng).unwrap();
    assert_eq!(result.n_iter, 1);
    // Both edges of the shared factor must have been committed together.
    assert!(rep.get_marg(0).is_ok());
    assert!(rep.get_marg(1).is_ok());
}

#[test]
fn coupled_sequential_sweep_recovers_closed_form_with_dense_coupling() {
    // B is dense and non-diagonal (not identity), and the EP sites start far
    // from their fixed point (not ADF-exact), so this actually exercises the
    // rank-1 Cholesky update on an off-diagonal `A` instead of a degenerate,
    // already-converged one.
    //
    // s = Bx with B = [[1, 1], [0, 1]], observations y0 = 3 on s0, y1 = 1 on
    // s1, both with noise variance 0.5. B is square and invertible, so the
    // (improper, prior-free) posterior mean is exactly x = B^-1 y = [2, 1],
    // with posterior precision A = B^T diag(1/sigma2) B = [[2, 2], [2, 4]]
    // and covariance A^-1 = [[1, -0.5], [-0.5, 0.5]]; marg_vars (variance of
    // s = Bx) then matches the observation noise exactly, [0.5, 0.5].
    let b = CouplingFactor::dense(arr2(&[[1.0, 1.0], [0.0, 1.0]]));
    let sigma2 = 0.5;
    let mut pman = PotentialManager::new();
    let pars = vec![3.0, sigma2, 1.0, sigma2];
    pman.push(PotentialBlock::new("obs", 0, 2, pars, 2, false, false));
    let layout = pman.layout().unwrap().clone();

    let mut rep = CoupledRepresentation::new(b, true);
    // Deliberately not the ADF-exact answer: an arbitrary, weakly informed
    // starting point that still leaves A positive definite.
    rep.set_pi(Array1::from_vec(vec![1.0, 1.0])).unwrap();
    rep.set_beta(Array1::from_vec(vec![0.0, 0.0])).unwrap();
    rep.refresh().unwrap();

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(99);
    let opts = Options::new().with_max_iter(50).with_delta_eps(1e-12);
    let result = coupled_sequential_sweep(&mut rep, &layout, &GaussianNoiseRegistry, &opts, &mut rng).unwrap();
    assert!(result.converged);

    let means = rep.marg_means().unwrap();
    assert_relative_eq!(means.as_slice().unwrap(), [2.0, 1.0].as_slice(), epsilon = 1e-5);
    let vars = rep.marg_vars().unwrap();
    assert_relative_eq!(vars.as_slice().unwrap(), [sigma2, sigma2].as_slice(), epsilon = 1e-5);
}

#[test]
fn factorized_sequential_sweep_handles_non_unit_coefficients() {
    // A single scalar variable observed through two factors with distinct,
    // non-unit coupling coefficients (b0 = 2, b1 = 3): s_j = b_j * x. The
    // closed-form posterior precision is sum(b_j^2 / sigma2_j) = 4 + 9 = 13
    // and mean is (1/13) * sum(b_j * y_j / sigma2_j) = (8 + 27) / 13,
    // matching ordinary weighted-least-squares combination of two noisy
    // scaled observations of the same quantity. Starting the edges from a
    // weak, non-exact guess (rather than the ADF closed form) exercises the
    // actual per-site EP update and back-projection, not a no-op sweep.
    let b = Csr::new(2, 1, vec![0, 1, 2], vec![0, 0], vec![2.0, 3.0]);
    let mut pman = PotentialManager::new();
    let pars = vec![4.0, 1.0, 9.0, 1.0];
    pman.push(PotentialBlock::new("obs", 0, 2, pars, 2, false, false));
    let layout = pman.layout().unwrap().clone();

    let mut rep = FactorizedRepresentation::new(&b);
    rep.set_edge(0, 0.1, 0.0);
    rep.set_edge(1, 0.1, 0.0);
    rep.refresh();
    let mut sd = SelectiveDamping::new(1, 1e-8);

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);
    let opts = Options::new().with_max_iter(50).with_delta_eps(1e-12);
    let result = factorized_sequential_sweep(&mut rep, &mut sd, &layout, &GaussianNoiseRegistry, &opts, &mut rng).unwrap();
    assert!(result.converged);

    let (mean, var) = rep.get_marg(0).unwrap();
    assert_relative_eq!(mean, 35.0 / 13.0, epsilon = 1e-5);
    assert_relative_eq!(var, 1.0 / 13.0, epsilon = 1e-5);
}

#[test]
fn row_subset_composes_correctly_inside_a_vstack() {
    let top = CouplingFactor::row_subset(4, vec![1, 3]);
    let bottom = CouplingFactor::row_subset(4, vec![0, 2]);
    let stacked = CouplingFactor::vstack(vec![top, bottom]);
    let v = arr1(&[10.0, 20.0, 30.0, 40.0]);
    let out = stacked.mvm(v.view()).unwrap();
    assert_relative_eq!(out.as_slice().unwrap(), [20.0, 40.0, 10.0, 30.0].as_slice());
}
