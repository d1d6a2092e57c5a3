mod consts;
pub use consts::*;

mod error;
pub use error::*;

/// Maximum relative difference, component-wise, between two equally-sized slices.
///
/// # Panics
///
/// * Panics if `a` and `b` do not have the same length.
#[inline]
pub fn max_rel_diff(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len(), "A and B must have the same length.");
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y).abs() / (x.abs().max(y.abs()).max(EPSILON)))
        .fold(0.0_f64, f64::max)
}
