//! Sparse symbolic vectors.
//!
//! An [`Sx`] couples a [`Sparsity`] pattern with one [`SxElem`] per
//! structural nonzero. Function inputs, outputs, and AD seeds are all `Sx`
//! values; the helpers here cover the little vector algebra the compiler
//! needs (symbol creation, concatenation, sparsity projection).

use crate::arena::{SxArena, SxElem};
use crate::sparsity::Sparsity;

/// Sparse vector of scalar expressions.
#[derive(Clone, Debug)]
pub struct Sx {
    sparsity: Sparsity,
    nonzeros: Vec<SxElem>,
}

impl Sx {
    /// Build from a sparsity pattern and matching nonzeros.
    pub fn from_nonzeros(sparsity: Sparsity, nonzeros: Vec<SxElem>) -> Self {
        assert_eq!(
            sparsity.nnz(),
            nonzeros.len(),
            "nonzero count does not match sparsity"
        );
        Sx { sparsity, nonzeros }
    }

    /// Single-element vector.
    pub fn scalar(e: SxElem) -> Self {
        Sx {
            sparsity: Sparsity::dense(1),
            nonzeros: vec![e],
        }
    }

    /// Dense symbolic vector of length `n`.
    ///
    /// A length-one vector is named `name`; longer vectors use `name_0`,
    /// `name_1`, ….
    pub fn sym(arena: &mut SxArena, name: &str, n: usize) -> Self {
        Self::sym_sparse(arena, name, Sparsity::dense(n))
    }

    /// Symbolic vector over an arbitrary sparsity pattern.
    pub fn sym_sparse(arena: &mut SxArena, name: &str, sparsity: Sparsity) -> Self {
        let nnz = sparsity.nnz();
        let nonzeros = (0..nnz)
            .map(|k| {
                if nnz == 1 {
                    arena.sym(name)
                } else {
                    arena.sym(&format!("{}_{}", name, k))
                }
            })
            .collect();
        Sx { sparsity, nonzeros }
    }

    /// Structural zeros over a sparsity pattern.
    pub fn zeros(arena: &mut SxArena, sparsity: Sparsity) -> Self {
        let z = arena.zero();
        let nonzeros = vec![z; sparsity.nnz()];
        Sx { sparsity, nonzeros }
    }

    /// The sparsity pattern.
    #[inline]
    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    /// Nonzero expressions, in sparsity order.
    #[inline]
    pub fn nonzeros(&self) -> &[SxElem] {
        &self.nonzeros
    }

    /// Mutable nonzero expressions.
    #[inline]
    pub fn nonzeros_mut(&mut self) -> &mut [SxElem] {
        &mut self.nonzeros
    }

    /// Number of structural nonzeros.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.nonzeros.len()
    }

    /// Logical vector length.
    #[inline]
    pub fn size(&self) -> usize {
        self.sparsity.size()
    }

    /// Concatenate vectors into one dense-length stack.
    ///
    /// The result's length is the sum of the parts' lengths; each part's
    /// nonzeros keep their rows, offset by the preceding lengths.
    pub fn veccat(parts: &[Sx]) -> Sx {
        let total: usize = parts.iter().map(|p| p.size()).sum();
        let mut rows = Vec::new();
        let mut nonzeros = Vec::new();
        let mut offset = 0;
        for p in parts {
            for (k, row) in p.sparsity.rows().enumerate() {
                rows.push(offset + row);
                nonzeros.push(p.nonzeros[k]);
            }
            offset += p.size();
        }
        Sx {
            sparsity: Sparsity::new(total, rows),
            nonzeros,
        }
    }

    /// Re-map onto a target sparsity pattern.
    ///
    /// Entries present in both patterns keep their expression; entries only
    /// in the target become structural zeros; entries only in the source
    /// are dropped.
    pub fn project(&self, arena: &mut SxArena, target: &Sparsity) -> Sx {
        let zero = arena.zero();
        let nonzeros = target
            .rows()
            .map(|row| match self.sparsity.find(row) {
                Some(k) => self.nonzeros[k],
                None => zero,
            })
            .collect();
        Sx {
            sparsity: target.clone(),
            nonzeros,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sym_names() {
        let mut a = SxArena::new();
        let v = Sx::sym(&mut a, "x", 3);
        assert_eq!(v.nnz(), 3);
        assert_eq!(a.name_of(v.nonzeros()[0]), "x_0");
        let s = Sx::sym(&mut a, "y", 1);
        assert_eq!(a.name_of(s.nonzeros()[0]), "y");
    }

    #[test]
    fn veccat_offsets() {
        let mut a = SxArena::new();
        let v = Sx::sym(&mut a, "x", 2);
        let w = Sx::sym_sparse(&mut a, "y", Sparsity::new(3, vec![1]));
        let cat = Sx::veccat(&[v, w]);
        assert_eq!(cat.size(), 5);
        assert_eq!(cat.nnz(), 3);
        assert_eq!(cat.sparsity().row(2), 3);
    }

    #[test]
    fn project_fills_zeros() {
        let mut a = SxArena::new();
        let v = Sx::sym_sparse(&mut a, "x", Sparsity::new(3, vec![0, 2]));
        let p = v.project(&mut a, &Sparsity::dense(3));
        assert_eq!(p.nnz(), 3);
        assert!(a.is_constant(p.nonzeros()[1]));
        assert_eq!(p.nonzeros()[0], v.nonzeros()[0]);
        assert_eq!(p.nonzeros()[2], v.nonzeros()[1]);
    }
}
