//! Vector sparsity patterns.
//!
//! The compiler only needs the vector view of the external sparsity
//! machinery: a logical length plus the ordered set of structurally nonzero
//! entries. Equality, nonzero count, and nonzero iteration are the whole
//! contract.

/// Sparsity of a column vector: logical length plus strictly increasing
/// nonzero row indices.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sparsity {
    size: usize,
    nz: Vec<usize>,
}

impl Sparsity {
    /// Dense vector of length `n`.
    pub fn dense(n: usize) -> Self {
        Sparsity {
            size: n,
            nz: (0..n).collect(),
        }
    }

    /// Sparse vector of length `n` with the given nonzero rows.
    ///
    /// `rows` must be strictly increasing and in `0..n`.
    pub fn new(n: usize, rows: Vec<usize>) -> Self {
        assert!(
            rows.windows(2).all(|w| w[0] < w[1]),
            "nonzero rows must be strictly increasing"
        );
        assert!(rows.last().map_or(true, |&r| r < n), "nonzero row out of range");
        Sparsity { size: n, nz: rows }
    }

    /// Empty pattern (length zero).
    pub fn empty() -> Self {
        Sparsity {
            size: 0,
            nz: Vec::new(),
        }
    }

    /// Logical vector length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of structural nonzeros.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.nz.len()
    }

    /// Row index of the `k`-th nonzero.
    #[inline]
    pub fn row(&self, k: usize) -> usize {
        self.nz[k]
    }

    /// Iterate over the nonzero row indices in order.
    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.nz.iter().copied()
    }

    /// True if every entry is structurally nonzero.
    pub fn is_dense(&self) -> bool {
        self.nz.len() == self.size
    }

    /// Position of `row` among the nonzeros, if present.
    pub fn find(&self, row: usize) -> Option<usize> {
        self.nz.binary_search(&row).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_pattern() {
        let sp = Sparsity::dense(3);
        assert_eq!(sp.size(), 3);
        assert_eq!(sp.nnz(), 3);
        assert!(sp.is_dense());
        assert_eq!(sp.find(2), Some(2));
    }

    #[test]
    fn sparse_pattern() {
        let sp = Sparsity::new(5, vec![1, 3]);
        assert_eq!(sp.nnz(), 2);
        assert!(!sp.is_dense());
        assert_eq!(sp.row(1), 3);
        assert_eq!(sp.find(3), Some(1));
        assert_eq!(sp.find(2), None);
    }

    #[test]
    #[should_panic(expected = "strictly increasing")]
    fn rejects_unordered_rows() {
        let _ = Sparsity::new(5, vec![3, 1]);
    }
}
