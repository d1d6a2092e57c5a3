use crate::types::{DEFAULT_CAVEPS, DEFAULT_PIMINTHRES, DEFAULT_SKIPEPS};

/// Common knobs shared by every sweep driver, built with the
/// `with_*`-setter pattern.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Maximum number of sweeps over the update set.
    pub max_iter: usize,
    /// Convergence threshold on the maximum relative change in marginal
    /// moments between consecutive sweeps.
    pub delta_eps: f64,
    /// Constant damping factor in `[0, 1)` applied to every EP update.
    pub damp: f64,
    /// Coupled-mode cavity-precision floor.
    pub caveps: f64,
    /// Minimum `|delta pi|` for a sequential update to be committed.
    pub skipeps: f64,
    /// Factorized-mode cavity-precision floor.
    pub piminthres: f64,
    /// Logging verbosity: `0` silent, `1` per-sweep, `2` per-site.
    pub verbose: u8,
    /// Whether non-parallel drivers refresh cached marginals every sweep.
    pub refresh: bool,
    /// Whether to retain the full per-sweep convergence history.
    pub res_det: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_iter: 50,
            delta_eps: 1e-4,
            damp: 0.0,
            caveps: DEFAULT_CAVEPS,
            skipeps: DEFAULT_SKIPEPS,
            piminthres: DEFAULT_PIMINTHRES,
            verbose: 0,
            refresh: true,
            res_det: false,
        }
    }
}

impl Options {
    /// Default options.
    pub const fn new() -> Self {
        Self {
            max_iter: 50,
            delta_eps: 1e-4,
            damp: 0.0,
            caveps: DEFAULT_CAVEPS,
            skipeps: DEFAULT_SKIPEPS,
            piminthres: DEFAULT_PIMINTHRES,
            verbose: 0,
            refresh: true,
            res_det: false,
        }
    }

    pub const fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub const fn with_delta_eps(mut self, delta_eps: f64) -> Self {
        self.delta_eps = delta_eps;
        self
    }

    pub const fn with_damp(mut self, damp: f64) -> Self {
        self.damp = damp;
        self
    }

    pub const fn with_caveps(mut self, caveps: f64) -> Self {
        self.caveps = caveps;
        self
    }

    pub const fn with_skipeps(mut self, skipeps: f64) -> Self {
        self.skipeps = skipeps;
        self
    }

    pub const fn with_piminthres(mut self, piminthres: f64) -> Self {
        self.piminthres = piminthres;
        self
    }

    pub const fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    pub const fn with_res_det(mut self, res_det: bool) -> Self {
        self.res_det = res_det;
        self
    }
}

/// Outcome of a single sweep-driver run.
#[derive(Clone, Debug, Default)]
pub struct SweepResult {
    /// Number of sweeps actually performed.
    pub n_iter: usize,
    /// Whether `delta_eps` was reached before `max_iter`.
    pub converged: bool,
    /// Maximum relative marginal change on the final sweep.
    pub final_delta: f64,
    /// Skip-reason histogram accumulated over the final sweep.
    pub skip_counts: Vec<usize>,
    /// Per-sweep convergence deltas, present only if `Options::res_det`.
    pub delta_history: Option<Vec<f64>>,
}
