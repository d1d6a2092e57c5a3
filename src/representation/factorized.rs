//! Sparse, per-edge posterior representation for factorized-mode EP.

use ndarray::Array1;

use crate::factor::{Csr, CouplingFactor};
use crate::types::{Error, Result};

/// One entry of the bipartite factor graph: site `site` touches variable
/// `var` through coefficient `b`.
#[derive(Clone, Copy, Debug)]
struct Edge {
    site: usize,
    var: usize,
    b: f64,
}

/// Per-edge EP natural parameters over a sparse coupling factor, with
/// per-variable marginals maintained as running sums over incident edges.
///
/// Mirrors a bipartite factor graph: `row_order` walks edges grouped by
/// site (the order `B`'s rows were built in), `col_order` walks the same
/// edges grouped by variable via back-pointers into `row_order`, so that
/// marginal updates after a single-edge change touch only that edge's
/// variable.
#[derive(Clone, Debug)]
pub struct FactorizedRepresentation {
    m: usize,
    n: usize,
    edges: Vec<Edge>,
    row_offsets: Vec<usize>,
    col_order: Vec<usize>,
    col_offsets: Vec<usize>,
    ep_pi: Vec<f64>,
    ep_beta: Vec<f64>,
    marg_pi: Vec<f64>,
    marg_beta: Vec<f64>,
}

impl FactorizedRepresentation {
    /// Builds a representation over the given sparse coupling factor, with
    /// all EP edges at zero natural parameters.
    pub fn new(b: &Csr) -> Self {
        let mut edges = Vec::with_capacity(b.nnz());
        let mut row_offsets = Vec::with_capacity(b.m + 1);
        row_offsets.push(0);
        for i in 0..b.m {
            let (cols, vals) = b.row(i);
            for (&j, &v) in cols.iter().zip(vals) {
                edges.push(Edge { site: i, var: j, b: v });
            }
            row_offsets.push(edges.len());
        }
        let mut by_col: Vec<usize> = (0..edges.len()).collect();
        by_col.sort_by_key(|&e| edges[e].var);
        let mut col_offsets = vec![0usize; b.n + 1];
        for &e in &by_col {
            col_offsets[edges[e].var + 1] += 1;
        }
        for j in 0..b.n {
            col_offsets[j + 1] += col_offsets[j];
        }
        let nnz = edges.len();
        Self {
            m: b.m,
            n: b.n,
            edges,
            row_offsets,
            col_order: by_col,
            col_offsets,
            ep_pi: vec![0.0; nnz],
            ep_beta: vec![0.0; nnz],
            marg_pi: vec![0.0; b.n],
            marg_beta: vec![0.0; b.n],
        }
    }

    #[inline]
    pub fn num_sites(&self) -> usize {
        self.m
    }

    #[inline]
    pub fn num_vars(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[inline]
    fn edges_for_var(&self, var: usize) -> &[usize] {
        &self.col_order[self.col_offsets[var]..self.col_offsets[var + 1]]
    }

    /// Recomputes every variable's marginal natural parameters from scratch
    /// as the sum of its incident edges' contributions.
    ///
    /// `ep_pi`/`ep_beta` are stored already projected into variable space
    /// (coefficient scaling baked in at the point a site writes them via
    /// [`Self::set_edge`]), so this is a bare sum over each variable's
    /// column, not a further `b^2`/`b` rescaling.
    pub fn refresh(&mut self) {
        self.marg_pi.iter_mut().for_each(|x| *x = 0.0);
        self.marg_beta.iter_mut().for_each(|x| *x = 0.0);
        for (e, edge) in self.edges.iter().enumerate() {
            self.marg_pi[edge.var] += self.ep_pi[e];
            self.marg_beta[edge.var] += self.ep_beta[e];
        }
    }

    /// The leave-one-out cavity natural parameters for edge `e`.
    pub fn cavity(&self, e: usize) -> (f64, f64) {
        let edge = self.edges[e];
        let cav_pi = self.marg_pi[edge.var] - self.ep_pi[e];
        let cav_beta = self.marg_beta[edge.var] - self.ep_beta[e];
        (cav_pi, cav_beta)
    }

    /// Overwrites edge `e`'s natural parameters (already in variable-space
    /// units, i.e. with the edge's coupling coefficient baked in), updating
    /// only the marginal of the variable it touches.
    pub fn set_edge(&mut self, e: usize, pi: f64, beta: f64) {
        let edge = self.edges[e];
        self.marg_pi[edge.var] += pi - self.ep_pi[e];
        self.marg_beta[edge.var] += beta - self.ep_beta[e];
        self.ep_pi[e] = pi;
        self.ep_beta[e] = beta;
    }

    pub fn edge_site(&self, e: usize) -> usize {
        self.edges[e].site
    }

    pub fn edge_var(&self, e: usize) -> usize {
        self.edges[e].var
    }

    pub fn edge_coeff(&self, e: usize) -> f64 {
        self.edges[e].b
    }

    pub fn edge_pi(&self, e: usize) -> f64 {
        self.ep_pi[e]
    }

    pub fn edge_beta(&self, e: usize) -> f64 {
        self.ep_beta[e]
    }

    pub fn marg_pi_of(&self, var: usize) -> f64 {
        self.marg_pi[var]
    }

    /// Edge indices belonging to site (row) `site`, in row order.
    ///
    /// `edges` is built one row at a time, so a site's edges are always the
    /// contiguous range `row_offsets[site]..row_offsets[site + 1]`.
    pub fn edges_in_site(&self, site: usize) -> std::ops::Range<usize> {
        self.row_offsets[site]..self.row_offsets[site + 1]
    }

    /// The posterior marginal `(mean, variance)` of variable `j`.
    pub fn get_marg(&self, j: usize) -> Result<(f64, f64)> {
        if j >= self.n {
            return Err(Error::InvalidArgument(format!("Variable index {j} out of bounds.")));
        }
        if self.marg_pi[j] <= 0.0 {
            return Err(Error::NumericFailure(format!("Variable {j} has non-positive marginal precision.")));
        }
        Ok((self.marg_beta[j] / self.marg_pi[j], 1.0 / self.marg_pi[j]))
    }

    /// Predicts the posterior mean (and, if `want_var`, variance) of
    /// `s' = B' x` for a prediction factor `b_pred`.
    pub fn predict(&self, b_pred: &CouplingFactor, want_var: bool) -> Result<(Array1<f64>, Option<Array1<f64>>)> {
        let mean_per_var: Array1<f64> = (0..self.n)
            .map(|j| if self.marg_pi[j] > 0.0 { self.marg_beta[j] / self.marg_pi[j] } else { 0.0 })
            .collect();
        let means = b_pred.mvm(mean_per_var.view())?;
        if !want_var {
            return Ok((means, None));
        }
        let inv_pi: Array1<f64> = self.marg_pi.iter().map(|&p| if p > 0.0 { 1.0 / p } else { f64::INFINITY }).collect();
        let s = ndarray::Array2::from_diag(&inv_pi);
        let vars = b_pred.diag_bsbt(s.view())?;
        Ok((means, Some(vars)))
    }

    /// The ADF heuristic for initializing a factorized-mode Gaussian-noise
    /// block: site `site` observes `y` with noise variance `sigma2`, and
    /// `vjsz` is the number of *other* edges already incident to `site`.
    ///
    /// `pi_edge = b^2 / (cav_var * vjsz + sigma2)`, `beta_edge = pi_edge * y`,
    /// already in the variable-space units [`Self::set_edge`] expects (the
    /// `b^2` is baked in here, not reapplied on aggregation).
    pub fn init_adf_gaussian(&mut self, site: usize, y: f64, sigma2: f64, cav_var: f64) {
        let edges = self.edges_in_site(site);
        let vjsz = (edges.end - edges.start).saturating_sub(1) as f64;
        let denom = cav_var * vjsz + sigma2;
        for e in edges {
            let b2 = self.edges[e].b * self.edges[e].b;
            let pi = b2 / denom;
            self.set_edge(e, pi, pi * y);
        }
    }

    /// Returns the edges of site `site` as `(edge_index, variable, coefficient)` triples.
    pub fn site_edges(&self, site: usize) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.edges_in_site(site).map(move |e| (e, self.edges[e].var, self.edges[e].b))
    }
}
