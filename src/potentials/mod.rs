//! Potential blocks and the manager that assembles them into a flat,
//! EP-ready parameter layout.

use crate::types::{Error, Result};

/// A contiguous block of `size` identical potentials sharing one parameter
/// layout, e.g. "the first 200 observations are Gaussian noise".
#[derive(Clone, Debug)]
pub struct PotentialBlock {
    /// Identifier understood by the external potential collaborator
    /// (`pot_id` in the EP driver's terminology).
    pub pot_id: u32,
    /// Number of sites in this block.
    pub size: usize,
    /// Flat, row-major parameter vector shared by every site in the block
    /// (e.g. `[y_1, sigma2_1, y_2, sigma2_2, ...]`).
    pub pars: Vec<f64>,
    /// Number of parameters consumed per site (`pars.len() == size * pars_per_site`
    /// unless `shared`, in which case `pars.len() == pars_per_site`).
    pub pars_per_site: usize,
    /// Whether all sites in the block share a single `pars` entry rather
    /// than owning one each.
    pub shared: bool,
    /// True if this block introduces a bivariate-precision (Gamma tau) site.
    pub bivariate_precision: bool,
    /// Human-readable block name, used by [`PotentialManager::filter`].
    pub name: String,
}

impl PotentialBlock {
    /// Builds a new potential block.
    ///
    /// # Panics
    ///
    /// * Panics if `size` is zero, or if `pars` does not have the expected
    ///   length for `shared`/`pars_per_site`.
    pub fn new(
        name: impl Into<String>,
        pot_id: u32,
        size: usize,
        pars: Vec<f64>,
        pars_per_site: usize,
        shared: bool,
        bivariate_precision: bool,
    ) -> Self {
        assert!(size > 0, "Block size must be positive.");
        let expected = if shared { pars_per_site } else { size * pars_per_site };
        assert_eq!(pars.len(), expected, "PARS has the wrong length for this block's layout.");
        Self { pot_id, size, pars, pars_per_site, shared, bivariate_precision, name: name.into() }
    }

    #[inline]
    fn pars_for(&self, local: usize) -> &[f64] {
        if self.shared {
            &self.pars
        } else {
            let start = local * self.pars_per_site;
            &self.pars[start..start + self.pars_per_site]
        }
    }
}

/// Flat layout produced by [`PotentialManager::rebuild`]: one entry per
/// site, in block order, ready for the external potential collaborator.
#[derive(Clone, Debug, Default)]
pub struct PotentialLayout {
    /// Per-site external potential identifier.
    pub pot_ids: Vec<u32>,
    /// Per-site flat parameter vector (owned copy, since shared blocks
    /// expand their single entry across all member sites).
    pub par_vec: Vec<f64>,
    /// Offset into `par_vec` where each site's parameters start.
    pub par_offsets: Vec<usize>,
    /// Number of parameters each site consumes.
    pub par_len: Vec<usize>,
    /// Indices of sites belonging to a block whose argument group should
    /// by default participate in EP sweeps (`upd_ind`).
    pub upd_ind: Vec<usize>,
    /// Indices of sites that introduce a bivariate-precision parameter.
    pub tau_ind: Vec<usize>,
    /// Total number of bivariate-precision sites across all blocks.
    pub num_bvprec: usize,
}

/// Assembles a sequence of [`PotentialBlock`]s into a flat [`PotentialLayout`],
/// caching the result until blocks are added or mutated (mirrors the
/// dirty-flag rebuild of an external potential-manager collaborator).
#[derive(Clone, Debug, Default)]
pub struct PotentialManager {
    blocks: Vec<PotentialBlock>,
    layout: Option<PotentialLayout>,
}

impl PotentialManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a block, marking the cached layout stale.
    ///
    /// # Panics
    ///
    /// * Panics if a bivariate-precision block is added before a block
    ///   without that flag (bivariate-precision blocks must be trailing,
    ///   mirroring the external collaborator's contract).
    pub fn push(&mut self, block: PotentialBlock) {
        if let Some(last) = self.blocks.last() {
            assert!(
                !last.bivariate_precision || block.bivariate_precision,
                "Bivariate-precision blocks must be trailing."
            );
        }
        self.blocks.push(block);
        self.layout = None;
    }

    /// Total number of sites across all blocks.
    pub fn size(&self) -> usize {
        self.blocks.iter().map(|b| b.size).sum()
    }

    /// Names of the registered blocks, in order.
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.name.as_str())
    }

    /// Indices of sites whose containing block's name is in `names`.
    pub fn filter(&self, names: &[&str]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut offset = 0;
        for block in &self.blocks {
            if names.contains(&block.name.as_str()) {
                out.extend(offset..offset + block.size);
            }
            offset += block.size;
        }
        out
    }

    /// Returns the cached flat layout, rebuilding it if stale.
    pub fn layout(&mut self) -> Result<&PotentialLayout> {
        if self.layout.is_none() {
            self.layout = Some(self.rebuild()?);
        }
        Ok(self.layout.as_ref().unwrap())
    }

    fn rebuild(&self) -> Result<PotentialLayout> {
        if self.blocks.is_empty() {
            return Err(Error::InvalidArgument("PotentialManager has no blocks.".into()));
        }
        let mut layout = PotentialLayout::default();
        let mut offset = 0;
        let mut site = 0;
        for block in &self.blocks {
            for local in 0..block.size {
                let pars = block.pars_for(local);
                layout.pot_ids.push(block.pot_id);
                layout.par_offsets.push(offset);
                layout.par_len.push(pars.len());
                layout.par_vec.extend_from_slice(pars);
                offset += pars.len();
                layout.upd_ind.push(site);
                if block.bivariate_precision {
                    layout.tau_ind.push(site);
                    layout.num_bvprec += 1;
                }
                site += 1;
            }
        }
        Ok(layout)
    }
}

/// A collaborator capable of matching tilted moments for arbitrary
/// potentials, standing in for the non-Gaussian potential catalogue that
/// this crate does not itself implement.
///
/// Implementations receive the `i`-th site's external `pot_id`, its flat
/// parameter slice, and the cavity natural parameters `(pi_cav, beta_cav)`,
/// and return the moment-matched `(log_z, alpha, nu)` triple used by every
/// EP sweep driver (`alpha = d/dh log Z`, `nu = -2 d/drho log Z`).
pub trait PotentialRegistry {
    /// Tilted-moment match for a batch of sites sharing a common argument
    /// group, mirroring the external `epupdate_parallel` collaborator.
    fn update_parallel(
        &self,
        pot_ids: &[u32],
        par_vec: &[f64],
        par_offsets: &[usize],
        par_len: &[usize],
        cav_pi: &[f64],
        cav_beta: &[f64],
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)>;

    /// Tilted-moment match for a single site, mirroring the external
    /// `epupdate_single_pman` collaborator. Returns `None` if the update
    /// locally failed (the sequential drivers record this as a skip).
    fn update_single(&self, pot_id: u32, pars: &[f64], cav_pi: f64, cav_beta: f64) -> Result<Option<(f64, f64, f64)>>;

    /// Tilted-moment match for a bivariate-precision site, mirroring the
    /// `epupdate_parallel`/`epupdate_single_pman` bvp variant: takes the
    /// ordinary Gaussian cavity `(cav_pi, cav_beta)` together with the
    /// τ-partner's Gamma cavity natural parameters `(a_cav, c_cav)`, and
    /// returns `(log_z, alpha, nu, a_new, c_new)`. Returns `None` by default
    /// (this registry does not support bivariate-precision potentials);
    /// `Predictor` falls back to the ordinary Gaussian tilt when this is
    /// `None` even for sites `tau_ind` marks as bvp.
    fn update_bvprec(
        &self,
        pot_id: u32,
        pars: &[f64],
        cav_pi: f64,
        cav_beta: f64,
        a_cav: f64,
        c_cav: f64,
    ) -> Result<Option<(f64, f64, f64, f64, f64)>> {
        let _ = (pot_id, pars, cav_pi, cav_beta, a_cav, c_cav);
        Ok(None)
    }
}
