//! Pairs a [`CouplingFactor`] with the [`PotentialManager`] whose sites it
//! couples to canonical variables, validating their shapes agree.

use crate::factor::CouplingFactor;
use crate::potentials::PotentialManager;
use crate::types::{Error, Result};

/// A coupled-mode or factorized-mode generalized linear model: `B` maps
/// `n` canonical variables to `m` potential arguments `s = Bx`, and
/// `potentials` describes the `m` non-Gaussian (or Gaussian) sites living
/// on those arguments.
#[derive(Clone, Debug)]
pub struct Model {
    b: CouplingFactor,
    potentials: PotentialManager,
}

impl Model {
    /// Builds a model, checking that `b`'s row count matches the total
    /// number of registered potential sites.
    pub fn new(b: CouplingFactor, potentials: PotentialManager) -> Result<Self> {
        let (m, _n) = b.shape();
        if m != potentials.size() {
            return Err(Error::InvalidArgument(format!(
                "Coupling factor has {m} rows but the potential manager has {} sites.",
                potentials.size()
            )));
        }
        Ok(Self { b, potentials })
    }

    pub fn coupling_factor(&self) -> &CouplingFactor {
        &self.b
    }

    pub fn potentials(&self) -> &PotentialManager {
        &self.potentials
    }

    pub fn potentials_mut(&mut self) -> &mut PotentialManager {
        &mut self.potentials
    }

    /// Number of canonical variables `n`.
    pub fn num_variables(&self) -> usize {
        self.b.shape().1
    }

    /// Number of potential sites `m`.
    pub fn num_sites(&self) -> usize {
        self.b.shape().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potentials::PotentialBlock;

    #[test]
    fn new_rejects_shape_mismatch() {
        let b = CouplingFactor::identity(3);
        let mut pman = PotentialManager::new();
        pman.push(PotentialBlock::new("obs", 0, 2, vec![0.0, 1.0, 0.0, 1.0], 2, false, false));
        assert!(Model::new(b, pman).is_err());
    }

    #[test]
    fn new_accepts_matching_shapes() {
        let b = CouplingFactor::identity(2);
        let mut pman = PotentialManager::new();
        pman.push(PotentialBlock::new("obs", 0, 2, vec![0.0, 1.0, 0.0, 1.0], 2, false, false));
        let model = Model::new(b, pman).unwrap();
        assert_eq!(model.num_variables(), 2);
        assert_eq!(model.num_sites(), 2);
    }
}
