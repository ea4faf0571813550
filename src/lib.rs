//! Compiler and virtual machine for scalar symbolic expression graphs.
//!
//! `sxvm` flattens a DAG of scalar expressions into a compact straight-line
//! program over a reusable work vector and executes it in several modes:
//!
//! - double-precision evaluation ([`SxFunction::eval`]),
//! - symbolic evaluation with common-subexpression reuse
//!   ([`SxFunction::eval_sx`]),
//! - forward- and reverse-mode algorithmic differentiation
//!   ([`SxFunction::ad_forward`], [`SxFunction::ad_reverse`]),
//! - bit-pattern sparsity propagation ([`SxFunction::sp_forward`],
//!   [`SxFunction::sp_reverse`]),
//! - source emission ([`SxFunction::export_code`],
//!   [`SxFunction::codegen_body`]).
//!
//! Expressions live in an [`SxArena`] and are built through its simplifying
//! constructors; opaque external [`Function`] handles can be embedded as
//! sub-call nodes and are re-entered from inside the compiled algorithm.
//!
//! ```
//! use sxvm::{Options, Sx, SxArena, SxFunction};
//!
//! let mut arena = SxArena::new();
//! let x = arena.sym("x");
//! let y = arena.sym("y");
//! let xy = arena.mul(x, y);
//! let sx = arena.sin(x);
//! let f = arena.add(xy, sx);
//!
//! let fun = SxFunction::new(
//!     &arena,
//!     "f",
//!     &[Sx::scalar(x), Sx::scalar(y)],
//!     &[Sx::scalar(f)],
//!     &Options::new(),
//! )
//! .unwrap();
//!
//! let out = fun.call_numeric(&[&[2.0], &[3.0]]).unwrap();
//! assert!((out[0][0] - (6.0 + 2.0_f64.sin())).abs() < 1e-12);
//! ```

pub mod arena;
pub mod error;
pub mod function;
pub mod interrupt;
pub mod opcode;
pub mod sparsity;
pub mod sx;
pub mod sx_function;

pub use arena::{SxArena, SxElem};
pub use error::{CodegenError, CompileError, EvalError, FinalizeError, Interrupted};
pub use function::{ExternalFunction, Function};
pub use interrupt::InterruptHandler;
pub use opcode::OpCode;
pub use sparsity::Sparsity;
pub use sx::Sx;
pub use sx_function::{AlgEl, OptValue, Options, SxFunction};
