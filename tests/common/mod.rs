//! Shared fixtures: external functions embedded as sub-call nodes.

#![allow(dead_code)]

use sxvm::{EvalError, ExternalFunction, Function, Sparsity};

/// `f(x) = x² + x`, with forward/reverse derivative functions.
pub struct SquarePlusX;

impl ExternalFunction for SquarePlusX {
    fn name(&self) -> &str {
        "sq_plus_x"
    }
    fn n_in(&self) -> usize {
        1
    }
    fn n_out(&self) -> usize {
        1
    }
    fn sparsity_in(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn sparsity_out(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn eval(
        &self,
        arg: &[f64],
        res: &mut [f64],
        _iw: &mut [i64],
        _w: &mut [f64],
    ) -> Result<(), EvalError> {
        res[0] = arg[0] * arg[0] + arg[0];
        Ok(())
    }
    fn forward(&self) -> Result<Function, EvalError> {
        Ok(Function::new(SquarePlusXFwd))
    }
    fn reverse(&self) -> Result<Function, EvalError> {
        Ok(Function::new(SquarePlusXRev))
    }
}

/// Forward derivative of [`SquarePlusX`]: `(x, vx) -> (2x + 1)·vx`.
pub struct SquarePlusXFwd;

impl ExternalFunction for SquarePlusXFwd {
    fn name(&self) -> &str {
        "fwd_sq_plus_x"
    }
    fn n_in(&self) -> usize {
        2
    }
    fn n_out(&self) -> usize {
        1
    }
    fn sparsity_in(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn sparsity_out(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn eval(
        &self,
        arg: &[f64],
        res: &mut [f64],
        _iw: &mut [i64],
        _w: &mut [f64],
    ) -> Result<(), EvalError> {
        res[0] = (2.0 * arg[0] + 1.0) * arg[1];
        Ok(())
    }
}

/// Reverse derivative of [`SquarePlusX`]: `(x, ybar) -> (2x + 1)·ybar`.
pub struct SquarePlusXRev;

impl ExternalFunction for SquarePlusXRev {
    fn name(&self) -> &str {
        "rev_sq_plus_x"
    }
    fn n_in(&self) -> usize {
        2
    }
    fn n_out(&self) -> usize {
        1
    }
    fn sparsity_in(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn sparsity_out(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn eval(
        &self,
        arg: &[f64],
        res: &mut [f64],
        _iw: &mut [i64],
        _w: &mut [f64],
    ) -> Result<(), EvalError> {
        res[0] = (2.0 * arg[0] + 1.0) * arg[1];
        Ok(())
    }
}

/// Two-output function `g(x) = (x², 3x)`, used to exercise unused call
/// outputs.
pub struct TwoOut;

impl ExternalFunction for TwoOut {
    fn name(&self) -> &str {
        "two_out"
    }
    fn n_in(&self) -> usize {
        1
    }
    fn n_out(&self) -> usize {
        2
    }
    fn sparsity_in(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn sparsity_out(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn eval(
        &self,
        arg: &[f64],
        res: &mut [f64],
        _iw: &mut [i64],
        _w: &mut [f64],
    ) -> Result<(), EvalError> {
        res[0] = arg[0] * arg[0];
        res[1] = 3.0 * arg[0];
        Ok(())
    }
}

/// A function that always fails, for failure propagation tests.
pub struct Failing;

impl ExternalFunction for Failing {
    fn name(&self) -> &str {
        "failing"
    }
    fn n_in(&self) -> usize {
        1
    }
    fn n_out(&self) -> usize {
        1
    }
    fn sparsity_in(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn sparsity_out(&self, _i: usize) -> Sparsity {
        Sparsity::dense(1)
    }
    fn eval(
        &self,
        _arg: &[f64],
        _res: &mut [f64],
        _iw: &mut [i64],
        _w: &mut [f64],
    ) -> Result<(), EvalError> {
        Err(EvalError::SubcallFailed {
            function: self.name().to_string(),
        })
    }
}
