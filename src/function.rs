//! External function handles.
//!
//! A [`Function`] is an opaque, cloneable handle to something callable with
//! the packed-buffer convention: all input nonzeros concatenated into one
//! `arg` slice, all output nonzeros into one `res` slice, plus integer and
//! scalar scratch. Compiled functions embed these handles as sub-call nodes
//! and re-enter them from the dispatch loop.

use std::fmt;
use std::sync::Arc;

use crate::error::EvalError;
use crate::sparsity::Sparsity;

/// Implementation side of an external function.
///
/// `sp_forward`/`sp_reverse` have conservative dense defaults (every output
/// depends on every input); override them when the callee knows better.
/// `forward`/`reverse` return derivative functions for AD through sub-calls
/// and default to an error.
pub trait ExternalFunction: Send + Sync {
    /// Display name, also the re-binding key after deserialization.
    fn name(&self) -> &str;

    /// Number of function inputs.
    fn n_in(&self) -> usize;

    /// Number of function outputs.
    fn n_out(&self) -> usize;

    /// Sparsity of input `i`.
    fn sparsity_in(&self, i: usize) -> Sparsity;

    /// Sparsity of output `i`.
    fn sparsity_out(&self, i: usize) -> Sparsity;

    /// Extra pointer-table scratch required, in entries.
    fn sz_arg(&self) -> usize {
        0
    }

    /// Extra result-table scratch required, in entries.
    fn sz_res(&self) -> usize {
        0
    }

    /// Integer scratch required, in entries.
    fn sz_iw(&self) -> usize {
        0
    }

    /// Scalar scratch required, in entries.
    fn sz_w(&self) -> usize {
        0
    }

    /// Numeric evaluation over packed nonzeros.
    ///
    /// `arg` holds all input nonzeros concatenated; `res` must be filled
    /// with all output nonzeros concatenated. `iw` and `w` are scratch of
    /// at least `sz_iw()` / `sz_w()` entries.
    fn eval(
        &self,
        arg: &[f64],
        res: &mut [f64],
        iw: &mut [i64],
        w: &mut [f64],
    ) -> Result<(), EvalError>;

    /// Forward bit-pattern propagation over packed nonzeros.
    fn sp_forward(
        &self,
        arg: &[u64],
        res: &mut [u64],
        _iw: &mut [i64],
        _w: &mut [u64],
    ) -> Result<(), EvalError> {
        let all = arg.iter().fold(0, |acc, &b| acc | b);
        for r in res.iter_mut() {
            *r = all;
        }
        Ok(())
    }

    /// Reverse bit-pattern propagation: seeds in `res` are consumed and
    /// accumulated onto `arg`.
    fn sp_reverse(
        &self,
        arg: &mut [u64],
        res: &mut [u64],
        _iw: &mut [i64],
        _w: &mut [u64],
    ) -> Result<(), EvalError> {
        let seed = res.iter().fold(0, |acc, &b| acc | b);
        for a in arg.iter_mut() {
            *a |= seed;
        }
        for r in res.iter_mut() {
            *r = 0;
        }
        Ok(())
    }

    /// Derivative function for one forward direction.
    ///
    /// The returned function takes the nominal inputs followed by one
    /// tangent per input nonzero, and produces one tangent per output
    /// nonzero.
    fn forward(&self) -> Result<Function, EvalError> {
        Err(EvalError::DerivativeUnavailable {
            function: self.name().to_string(),
        })
    }

    /// Derivative function for one adjoint direction.
    ///
    /// The returned function takes the nominal inputs followed by one
    /// adjoint seed per output nonzero, and produces one adjoint per input
    /// nonzero.
    fn reverse(&self) -> Result<Function, EvalError> {
        Err(EvalError::DerivativeUnavailable {
            function: self.name().to_string(),
        })
    }
}

/// Shared handle to an [`ExternalFunction`].
#[derive(Clone)]
pub struct Function(Arc<dyn ExternalFunction>);

impl Function {
    /// Wrap an implementation in a shared handle.
    pub fn new(f: impl ExternalFunction + 'static) -> Self {
        Function(Arc::new(f))
    }

    /// Identity comparison: two handles to the same implementation object.
    pub fn same(a: &Function, b: &Function) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Display name.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Number of inputs.
    pub fn n_in(&self) -> usize {
        self.0.n_in()
    }

    /// Number of outputs.
    pub fn n_out(&self) -> usize {
        self.0.n_out()
    }

    /// Sparsity of input `i`.
    pub fn sparsity_in(&self, i: usize) -> Sparsity {
        self.0.sparsity_in(i)
    }

    /// Sparsity of output `i`.
    pub fn sparsity_out(&self, i: usize) -> Sparsity {
        self.0.sparsity_out(i)
    }

    /// Nonzero count of input `i`.
    pub fn nnz_in(&self, i: usize) -> usize {
        self.0.sparsity_in(i).nnz()
    }

    /// Nonzero count of output `i`.
    pub fn nnz_out(&self, i: usize) -> usize {
        self.0.sparsity_out(i).nnz()
    }

    /// Total nonzero count across all inputs.
    pub fn nnz_in_total(&self) -> usize {
        (0..self.n_in()).map(|i| self.nnz_in(i)).sum()
    }

    /// Total nonzero count across all outputs.
    pub fn nnz_out_total(&self) -> usize {
        (0..self.n_out()).map(|i| self.nnz_out(i)).sum()
    }

    /// Pointer-table scratch requirement.
    pub fn sz_arg(&self) -> usize {
        self.0.sz_arg()
    }

    /// Result-table scratch requirement.
    pub fn sz_res(&self) -> usize {
        self.0.sz_res()
    }

    /// Integer scratch requirement.
    pub fn sz_iw(&self) -> usize {
        self.0.sz_iw()
    }

    /// Scalar scratch requirement.
    pub fn sz_w(&self) -> usize {
        self.0.sz_w()
    }

    /// Numeric evaluation over packed nonzeros.
    pub fn eval(
        &self,
        arg: &[f64],
        res: &mut [f64],
        iw: &mut [i64],
        w: &mut [f64],
    ) -> Result<(), EvalError> {
        self.0.eval(arg, res, iw, w)
    }

    /// Forward bit-pattern propagation.
    pub fn sp_forward(
        &self,
        arg: &[u64],
        res: &mut [u64],
        iw: &mut [i64],
        w: &mut [u64],
    ) -> Result<(), EvalError> {
        self.0.sp_forward(arg, res, iw, w)
    }

    /// Reverse bit-pattern propagation.
    pub fn sp_reverse(
        &self,
        arg: &mut [u64],
        res: &mut [u64],
        iw: &mut [i64],
        w: &mut [u64],
    ) -> Result<(), EvalError> {
        self.0.sp_reverse(arg, res, iw, w)
    }

    /// Forward derivative function.
    pub fn forward(&self) -> Result<Function, EvalError> {
        self.0.forward()
    }

    /// Reverse derivative function.
    pub fn reverse(&self) -> Result<Function, EvalError> {
        self.0.reverse()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name())
            .field("n_in", &self.n_in())
            .field("n_out", &self.n_out())
            .finish()
    }
}
