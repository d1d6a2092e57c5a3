/// Default minimum cavity/marginal precision in factorized mode (`piminthres`).
pub const DEFAULT_PIMINTHRES: f64 = 1e-8;
/// Default cavity/selective-damping threshold in coupled mode (`caveps`).
pub const DEFAULT_CAVEPS: f64 = 1e-5;
/// Default minimum `|delta pi|` to commit a coupled-sequential update (`skipeps`).
pub const DEFAULT_SKIPEPS: f64 = 1e-8;
/// Numerical floor below which a tilted variance is treated as degenerate.
pub const TILTED_VARIANCE_EPSILON: f64 = 1e-9;
/// Epsilon used to guard relative-difference computations against division by zero.
pub const EPSILON: f64 = 1e-8;
