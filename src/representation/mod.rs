//! Posterior representations: coupled (dense, Cholesky) and factorized
//! (sparse, per-edge).

mod coupled;
mod factorized;
mod selective_damping;

pub use coupled::{cholesky_rank1_update, init_adf_gaussian, CoupledRepresentation};
pub use factorized::FactorizedRepresentation;
pub use selective_damping::SelectiveDamping;
