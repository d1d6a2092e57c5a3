//! The coupling factor `B` linking canonical variables `x` to site arguments `s = Bx`.

mod sparse;

use std::rc::Rc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub use sparse::{Csc, Csr};
use sparse::check_vec_len;

use crate::types::{Error, Result};

/// The concrete storage backing a [`CouplingFactor`], always held in its
/// natural (non-transposed) orientation.
#[derive(Clone, Debug)]
enum FactorKind {
    Dense(Rc<Array2<f64>>),
    SparseCsr(Rc<Csr>),
    SparseCsc(Rc<Csc>),
    Diagonal(Rc<Array1<f64>>),
    Identity(usize),
    RowSubset { n: usize, sind: Rc<Vec<usize>> },
    VStack(Rc<Vec<CouplingFactor>>),
}

/// A linear map `B : R^n -> R^m` relating canonical variables to potential
/// arguments, with the quadratic kernels EP needs (`B^T diag(v) B`,
/// `diag(B S B^T)`) in addition to matrix-vector products.
///
/// Every variant stores its data in natural orientation; [`CouplingFactor::transpose`]
/// flips a cheap flag rather than copying data, since `B` and `B^T` share the
/// same underlying buffers.
#[derive(Clone, Debug)]
pub struct CouplingFactor {
    kind: FactorKind,
    transposed: bool,
}

impl CouplingFactor {
    /// Wraps a dense matrix.
    pub fn dense(b: Array2<f64>) -> Self {
        Self { kind: FactorKind::Dense(Rc::new(b)), transposed: false }
    }

    /// Wraps a sparse matrix in compressed-row layout.
    pub fn sparse_csr(b: Csr) -> Self {
        Self { kind: FactorKind::SparseCsr(Rc::new(b)), transposed: false }
    }

    /// Wraps a sparse matrix in compressed-column layout.
    pub fn sparse_csc(b: Csc) -> Self {
        Self { kind: FactorKind::SparseCsc(Rc::new(b)), transposed: false }
    }

    /// Wraps a diagonal matrix given by its diagonal entries.
    pub fn diagonal(d: Array1<f64>) -> Self {
        Self { kind: FactorKind::Diagonal(Rc::new(d)), transposed: false }
    }

    /// The `n x n` identity map.
    pub fn identity(n: usize) -> Self {
        Self { kind: FactorKind::Identity(n), transposed: false }
    }

    /// A row-selection map `I[sind, :]` of an `n`-dimensional identity,
    /// i.e. `(B x)_k = x[sind[k]]`.
    ///
    /// # Panics
    ///
    /// * Panics if any index in `sind` is out of bounds for `n`.
    pub fn row_subset(n: usize, sind: Vec<usize>) -> Self {
        assert!(sind.iter().all(|&i| i < n), "Row indices must be in bounds.");
        Self { kind: FactorKind::RowSubset { n, sind: Rc::new(sind) }, transposed: false }
    }

    /// A vertical stack `[B_1; B_2; ...; B_k]` of factors sharing the same
    /// number of columns.
    ///
    /// # Panics
    ///
    /// * Panics if `children` is empty or the children disagree on column count.
    pub fn vstack(children: Vec<CouplingFactor>) -> Self {
        assert!(!children.is_empty(), "VStack must have at least one child.");
        let n = children[0].shape().1;
        assert!(
            children.iter().all(|c| c.shape().1 == n),
            "VStack children must share the same number of columns."
        );
        Self { kind: FactorKind::VStack(Rc::new(children)), transposed: false }
    }

    /// The natural `(m, n)` shape of the represented matrix.
    pub fn shape(&self) -> (usize, usize) {
        let (m, n) = self.natural_shape();
        if self.transposed { (n, m) } else { (m, n) }
    }

    fn natural_shape(&self) -> (usize, usize) {
        match &self.kind {
            FactorKind::Dense(b) => (b.nrows(), b.ncols()),
            FactorKind::SparseCsr(b) => (b.m, b.n),
            FactorKind::SparseCsc(b) => (b.m, b.n),
            FactorKind::Diagonal(d) => (d.len(), d.len()),
            FactorKind::Identity(n) => (*n, *n),
            FactorKind::RowSubset { n, sind } => (sind.len(), *n),
            FactorKind::VStack(children) => {
                let n = children[0].shape().1;
                (children.iter().map(|c| c.shape().0).sum(), n)
            }
        }
    }

    /// Returns a view of the transposed factor. O(1): the underlying data
    /// is shared, not copied.
    pub fn transpose(&self) -> Self {
        Self { kind: self.kind.clone(), transposed: !self.transposed }
    }

    /// Computes `self * v`.
    pub fn mvm(&self, v: ArrayView1<f64>) -> Result<Array1<f64>> {
        let (m, n) = self.shape();
        check_vec_len(v.len(), n, "V")?;
        let out = if self.transposed { self.mvm_bwd(v) } else { self.mvm_fwd(v) };
        debug_assert_eq!(out.len(), m);
        Ok(out)
    }

    /// Returns column `i` of the represented matrix (length = number of rows).
    pub fn getcol(&self, i: usize) -> Result<Array1<f64>> {
        let (m, n) = self.shape();
        if i >= n {
            return Err(Error::InvalidArgument(format!("Column index {i} out of bounds for {n} columns.")));
        }
        Ok(if self.transposed { self.getrow_natural(i) } else { self.getcol_natural(i) })
    }

    /// Computes `B^T diag(v) B`, an `n x n` symmetric matrix, where `B` is
    /// the matrix represented by `self` (ignoring any outer transpose).
    pub fn mat_btdb(&self, v: ArrayView1<f64>) -> Result<Array2<f64>> {
        let (m, n) = self.natural_shape();
        check_vec_len(v.len(), m, "V")?;
        if self.transposed {
            return Ok(self.mat_btdb_fallback(v, m, n));
        }
        Ok(match &self.kind {
            FactorKind::Identity(_) => Array2::from_diag(&v),
            FactorKind::Diagonal(d) => {
                let sq: Array1<f64> = d.iter().zip(v).map(|(&di, &vi)| di * di * vi).collect();
                Array2::from_diag(&sq)
            }
            FactorKind::Dense(b) => {
                let scaled = scale_rows(b, v);
                b.t().dot(&scaled)
            }
            FactorKind::SparseCsr(b) => mat_btdb_from_groups(&b.row_groups(), v, n),
            FactorKind::SparseCsc(b) => mat_btdb_from_groups(&b.row_groups(), v, n),
            FactorKind::RowSubset { n, sind } => {
                let mut tv = Array1::<f64>::zeros(*n);
                for (k, &i) in sind.iter().enumerate() {
                    tv[i] += v[k];
                }
                Array2::from_diag(&tv)
            }
            FactorKind::VStack(children) => {
                let mut out = Array2::<f64>::zeros((n, n));
                let mut off = 0;
                for child in children.iter() {
                    let mk = child.shape().0;
                    out += &child.mat_btdb(v.slice(ndarray::s![off..off + mk]))?;
                    off += mk;
                }
                out
            }
        })
    }

    /// Computes `diag(B S B^T)`, a length-`m` vector, where `B` is the
    /// matrix represented by `self` (ignoring any outer transpose) and `S`
    /// is an `n x n` symmetric matrix.
    pub fn diag_bsbt(&self, s: ArrayView2<f64>) -> Result<Array1<f64>> {
        let (m, n) = self.natural_shape();
        if s.nrows() != n || s.ncols() != n {
            return Err(Error::InvalidArgument(format!(
                "S has shape {:?}, expected ({n}, {n}).",
                s.shape()
            )));
        }
        if self.transposed {
            return Ok(self.diag_bsbt_fallback(s, m));
        }
        Ok(match &self.kind {
            FactorKind::Identity(_) => s.diag().to_owned(),
            FactorKind::Diagonal(d) => {
                d.iter().zip(s.diag()).map(|(&di, &si)| di * di * si).collect()
            }
            FactorKind::Dense(b) => {
                let t = b.dot(&s);
                (0..m).map(|i| b.row(i).dot(&t.row(i))).collect()
            }
            FactorKind::SparseCsr(b) => diag_bsbt_from_groups(&b.row_groups(), s),
            FactorKind::SparseCsc(b) => diag_bsbt_from_groups(&b.row_groups(), s),
            FactorKind::RowSubset { sind, .. } => sind.iter().map(|&i| s[[i, i]]).collect(),
            FactorKind::VStack(children) => {
                let mut out = Vec::with_capacity(m);
                for child in children.iter() {
                    out.extend(child.diag_bsbt(s)?.into_iter());
                }
                Array1::from_vec(out)
            }
        })
    }

    // -- natural-orientation kernels, never see `self.transposed` --

    fn mvm_fwd(&self, v: ArrayView1<f64>) -> Array1<f64> {
        match &self.kind {
            FactorKind::Dense(b) => b.dot(&v),
            FactorKind::SparseCsr(b) => {
                let mut out = Array1::zeros(b.m);
                for i in 0..b.m {
                    let (cols, vals) = b.row(i);
                    out[i] = cols.iter().zip(vals).map(|(&j, &x)| x * v[j]).sum();
                }
                out
            }
            FactorKind::SparseCsc(b) => {
                let mut out = Array1::zeros(b.m);
                for j in 0..b.n {
                    let (rows, vals) = b.col(j);
                    for (&i, &x) in rows.iter().zip(vals) {
                        out[i] += x * v[j];
                    }
                }
                out
            }
            FactorKind::Diagonal(d) => d.iter().zip(v).map(|(&di, &vi)| di * vi).collect(),
            FactorKind::Identity(_) => v.to_owned(),
            FactorKind::RowSubset { sind, .. } => sind.iter().map(|&i| v[i]).collect(),
            FactorKind::VStack(children) => {
                let mut out = Vec::with_capacity(self.natural_shape().0);
                for child in children.iter() {
                    out.extend(child.mvm_fwd(v).into_iter());
                }
                Array1::from_vec(out)
            }
        }
    }

    fn mvm_bwd(&self, u: ArrayView1<f64>) -> Array1<f64> {
        match &self.kind {
            FactorKind::Dense(b) => b.t().dot(&u),
            FactorKind::SparseCsr(b) => {
                let mut out = Array1::zeros(b.n);
                for i in 0..b.m {
                    let (cols, vals) = b.row(i);
                    for (&j, &x) in cols.iter().zip(vals) {
                        out[j] += x * u[i];
                    }
                }
                out
            }
            FactorKind::SparseCsc(b) => {
                let mut out = Array1::zeros(b.n);
                for j in 0..b.n {
                    let (rows, vals) = b.col(j);
                    out[j] = rows.iter().zip(vals).map(|(&i, &x)| x * u[i]).sum();
                }
                out
            }
            FactorKind::Diagonal(d) => d.iter().zip(u).map(|(&di, &ui)| di * ui).collect(),
            FactorKind::Identity(_) => u.to_owned(),
            FactorKind::RowSubset { n, sind } => {
                let mut out = Array1::<f64>::zeros(*n);
                for (k, &i) in sind.iter().enumerate() {
                    out[i] += u[k];
                }
                out
            }
            FactorKind::VStack(children) => {
                let mut out = Array1::<f64>::zeros(self.natural_shape().1);
                let mut off = 0;
                for child in children.iter() {
                    let mk = child.shape().0;
                    out += &child.mvm_bwd(u.slice(ndarray::s![off..off + mk]));
                    off += mk;
                }
                out
            }
        }
    }

    fn getcol_natural(&self, j: usize) -> Array1<f64> {
        match &self.kind {
            FactorKind::Dense(b) => b.column(j).to_owned(),
            FactorKind::SparseCsr(b) => {
                let mut out = Array1::zeros(b.m);
                for i in 0..b.m {
                    let (cols, vals) = b.row(i);
                    if let Some(pos) = cols.iter().position(|&c| c == j) {
                        out[i] = vals[pos];
                    }
                }
                out
            }
            FactorKind::SparseCsc(b) => {
                let mut out = Array1::zeros(b.m);
                let (rows, vals) = b.col(j);
                for (&i, &x) in rows.iter().zip(vals) {
                    out[i] = x;
                }
                out
            }
            FactorKind::Diagonal(d) => {
                let mut out = Array1::<f64>::zeros(d.len());
                out[j] = d[j];
                out
            }
            FactorKind::Identity(n) => {
                let mut out = Array1::<f64>::zeros(*n);
                out[j] = 1.0;
                out
            }
            FactorKind::RowSubset { sind, .. } => sind.iter().map(|&i| if i == j { 1.0 } else { 0.0 }).collect(),
            FactorKind::VStack(children) => {
                let mut out = Vec::with_capacity(self.natural_shape().0);
                for child in children.iter() {
                    out.extend(child.getcol_natural(j).into_iter());
                }
                Array1::from_vec(out)
            }
        }
    }

    fn getrow_natural(&self, i: usize) -> Array1<f64> {
        // Row i of B, i.e. column i of B^T: reuse the backward map against e_i.
        let (m, _) = self.natural_shape();
        let mut e = Array1::<f64>::zeros(m);
        e[i] = 1.0;
        self.mvm_bwd(e.view())
    }

    fn mat_btdb_fallback(&self, v: ArrayView1<f64>, m: usize, n: usize) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((n, n));
        for j in 0..n {
            let bj = self.getcol_natural(j);
            let pbj: Array1<f64> = bj.iter().zip(v).map(|(&x, &vi)| x * vi).collect();
            for k in 0..n {
                if k < j {
                    out[[j, k]] = out[[k, j]];
                    continue;
                }
                let bk = self.getcol_natural(k);
                out[[j, k]] = pbj.dot(&bk);
            }
        }
        let _ = m;
        out
    }

    fn diag_bsbt_fallback(&self, s: ArrayView2<f64>, m: usize) -> Array1<f64> {
        (0..m)
            .map(|i| {
                let bi = self.getrow_natural(i);
                bi.dot(&s.dot(&bi))
            })
            .collect()
    }
}

fn scale_rows(b: &Array2<f64>, v: ArrayView1<f64>) -> Array2<f64> {
    let mut out = b.clone();
    for (mut row, &vi) in out.rows_mut().into_iter().zip(v) {
        row *= vi;
    }
    out
}

fn mat_btdb_from_groups(groups: &[Vec<(usize, f64)>], v: ArrayView1<f64>, n: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n, n));
    for (i, row) in groups.iter().enumerate() {
        let pi = v[i];
        for &(j, vj) in row {
            for &(k, vk) in row {
                out[[j, k]] += pi * vj * vk;
            }
        }
    }
    out
}

fn diag_bsbt_from_groups(groups: &[Vec<(usize, f64)>], s: ArrayView2<f64>) -> Array1<f64> {
    groups
        .iter()
        .map(|row| {
            row.iter()
                .flat_map(|&(j, vj)| row.iter().map(move |&(k, vk)| vj * vk * s[[j, k]]))
                .sum()
        })
        .collect()
}
