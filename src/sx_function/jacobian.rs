//! Jacobian construction.

use tracing::debug;

use crate::arena::{SxArena, SxElem};
use crate::error::CompileError;
use crate::sparsity::Sparsity;
use crate::sx::Sx;

use super::{Options, SxFunction};

impl SxFunction {
    /// Compile the dense Jacobian of `veccat(outputs)` with respect to
    /// `veccat(inputs)` as a new function.
    ///
    /// The new function's inputs are the original inputs followed by one
    /// symbolic dummy per original output (so it is call-compatible with
    /// derivative-function conventions); its single output is the
    /// column-major flattened `m × n` Jacobian.
    pub fn jacobian(
        &self,
        arena: &mut SxArena,
        name: &str,
        options: &Options,
    ) -> Result<SxFunction, CompileError> {
        self.check_attached()
            .map_err(|e| CompileError::Derivative(e.to_string()))?;
        let n: usize = (0..self.n_in()).map(|i| self.nnz_in(i)).sum();
        let m: usize = (0..self.n_out()).map(|i| self.nnz_out(i)).sum();
        debug!(function = self.name(), rows = m, cols = n, "building jacobian");

        // One unit forward seed per input nonzero.
        let zero = arena.zero();
        let one = arena.one();
        let mut fseed: Vec<Vec<Sx>> = Vec::with_capacity(n);
        for j in 0..n {
            let mut dir = Vec::with_capacity(self.n_in());
            let mut offset = 0;
            for i in 0..self.n_in() {
                let nnz = self.nnz_in(i);
                let nz: Vec<SxElem> = (0..nnz)
                    .map(|k| if offset + k == j { one } else { zero })
                    .collect();
                dir.push(Sx::from_nonzeros(self.sparsity_in[i].clone(), nz));
                offset += nnz;
            }
            fseed.push(dir);
        }

        let fsens = self
            .ad_forward(arena, &fseed)
            .map_err(|e| CompileError::Derivative(e.to_string()))?;

        // Column-major dense m*n flattening: column j is direction j.
        let mut jac_nz = Vec::with_capacity(m * n);
        for dir in &fsens {
            for sx in dir {
                jac_nz.extend_from_slice(sx.nonzeros());
            }
        }
        let jac = Sx::from_nonzeros(Sparsity::dense(m * n), jac_nz);

        // Inputs of the Jacobian function: the original inputs plus one
        // symbolic dummy per original output.
        let mut ret_in: Vec<Sx> = self.in_.clone();
        let mut name_in: Vec<String> = (0..self.n_in())
            .map(|i| self.name_in(i).to_string())
            .collect();
        for i in 0..self.n_out() {
            let dummy_name = format!("out_{}", self.name_out(i));
            ret_in.push(Sx::sym_sparse(
                arena,
                &dummy_name,
                self.sparsity_out[i].clone(),
            ));
            name_in.push(dummy_name);
        }

        let name_out = vec!["jac".to_string()];
        SxFunction::with_names(arena, name, &ret_in, &[jac], &name_in, &name_out, options)
    }
}
