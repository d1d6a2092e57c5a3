//! # ep-glm
//!
//! Expectation Propagation inference for generalized linear models
//! `p(x) ∝ prod_j t_j(s_j)` with `s = Bx`: a coupling factor `B`, a
//! catalogue of non-Gaussian potentials `t_j`, and two interchangeable
//! posterior representations (dense coupled, sparse factorized) sharing
//! the same sweep-driver interface.

pub mod driver;
pub mod factor;
pub mod model;
pub mod potentials;
pub mod predictor;
pub mod representation;
pub mod types;

pub use driver::{BinaryClassificationStats, Options, SweepResult};
pub use factor::CouplingFactor;
pub use model::Model;
pub use potentials::{PotentialBlock, PotentialLayout, PotentialManager, PotentialRegistry};
pub use predictor::{Prediction, PredictionType};
pub use representation::{CoupledRepresentation, FactorizedRepresentation, SelectiveDamping};
pub use types::{Error, Result};
