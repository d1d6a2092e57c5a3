use crate::types::{Error, Result};

/// A sparse matrix in compressed-row (CSR) layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Csr {
    pub(crate) m: usize,
    pub(crate) n: usize,
    pub(crate) indptr: Vec<usize>,
    pub(crate) indices: Vec<usize>,
    pub(crate) data: Vec<f64>,
}

impl Csr {
    /// Builds a CSR matrix from row pointers, column indices and values.
    ///
    /// # Panics
    ///
    /// * Panics if `indptr` has length `m + 1` is violated, or if any
    ///   column index is out of bounds.
    pub fn new(m: usize, n: usize, indptr: Vec<usize>, indices: Vec<usize>, data: Vec<f64>) -> Self {
        assert_eq!(indptr.len(), m + 1, "INDPTR must have length m + 1.");
        assert_eq!(indices.len(), data.len(), "INDICES and DATA must match in length.");
        assert!(
            indices.iter().all(|&j| j < n),
            "Column indices must be in bounds."
        );
        Self { m, n, indptr, indices, data }
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        (&self.indices[start..end], &self.data[start..end])
    }

    /// Groups nonzeros by row: the native layout for CSR.
    pub fn row_groups(&self) -> Vec<Vec<(usize, f64)>> {
        (0..self.m)
            .map(|i| {
                let (cols, vals) = self.row(i);
                cols.iter().copied().zip(vals.iter().copied()).collect()
            })
            .collect()
    }
}

/// A sparse matrix in compressed-column (CSC) layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Csc {
    pub(super) m: usize,
    pub(super) n: usize,
    pub(super) indptr: Vec<usize>,
    pub(super) indices: Vec<usize>,
    pub(super) data: Vec<f64>,
}

impl Csc {
    /// Builds a CSC matrix from column pointers, row indices and values.
    ///
    /// # Panics
    ///
    /// * Panics if `indptr` does not have length `n + 1`, or if any row
    ///   index is out of bounds.
    pub fn new(m: usize, n: usize, indptr: Vec<usize>, indices: Vec<usize>, data: Vec<f64>) -> Self {
        assert_eq!(indptr.len(), n + 1, "INDPTR must have length n + 1.");
        assert_eq!(indices.len(), data.len(), "INDICES and DATA must match in length.");
        assert!(
            indices.iter().all(|&i| i < m),
            "Row indices must be in bounds."
        );
        Self { m, n, indptr, indices, data }
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn col(&self, j: usize) -> (&[usize], &[f64]) {
        let (start, end) = (self.indptr[j], self.indptr[j + 1]);
        (&self.indices[start..end], &self.data[start..end])
    }

    /// Groups nonzeros by row via a counting-sort pass over the column layout.
    ///
    /// CSC stores columns contiguously, so row-wise kernels (`mat_btdb`,
    /// `diag_bsbt`) pay an O(nnz) regrouping cost here; prefer [`Csr`] when
    /// those kernels dominate.
    pub fn row_groups(&self) -> Vec<Vec<(usize, f64)>> {
        let mut groups = vec![Vec::new(); self.m];
        for j in 0..self.n {
            let (rows, vals) = self.col(j);
            for (&i, &v) in rows.iter().zip(vals) {
                groups[i].push((j, v));
            }
        }
        groups
    }
}

pub(super) fn check_vec_len(len: usize, expected: usize, what: &str) -> Result<()> {
    if len != expected {
        return Err(Error::InvalidArgument(format!(
            "{what} has length {len}, expected {expected}."
        )));
    }
    Ok(())
}
