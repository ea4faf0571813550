//! Numeric evaluation, including embedded sub-calls.

mod common;

use approx::assert_relative_eq;
use common::{Failing, SquarePlusX, TwoOut};
use sxvm::{EvalError, Function, OpCode, Options, Sx, SxArena, SxFunction};

#[test]
fn product_plus_sine() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let y = arena.sym("y");
    let xy = arena.mul(x, y);
    let sx = arena.sin(x);
    let f = arena.add(xy, sx);
    let fun = SxFunction::new(
        &arena,
        "f",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[Sx::scalar(f)],
        &Options::new(),
    )
    .unwrap();
    let out = fun.call_numeric(&[&[2.0], &[3.0]]).unwrap();
    assert_relative_eq!(out[0][0], 6.0 + 2.0_f64.sin(), max_relative = 1e-15);
}

#[test]
fn compiled_matches_direct_recursive_evaluation() {
    // A mixed expression evaluated over a small grid.
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let y = arena.sym("y");
    let sq = arena.sq(x);
    let e = arena.exp(y);
    let q = arena.div(sq, e);
    let t = arena.tanh(x);
    let s = arena.sub(q, t);
    let fun = SxFunction::new(
        &arena,
        "g",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[Sx::scalar(s)],
        &Options::new(),
    )
    .unwrap();

    for &(xv, yv) in &[(0.5_f64, 1.0_f64), (-2.0, 0.25), (3.0, -1.5)] {
        let direct = xv * xv / yv.exp() - xv.tanh();
        let out = fun.call_numeric(&[&[xv], &[yv]]).unwrap();
        assert_relative_eq!(out[0][0], direct, max_relative = 1e-15);
    }
}

#[test]
fn nonsmooth_semantics() {
    // H(x, y) = (x > 0) * y via if_else_zero.
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let y = arena.sym("y");
    let zero = arena.zero();
    let c = arena.lt(zero, x);
    let h = arena.if_else_zero(c, y);
    let fun = SxFunction::new(
        &arena,
        "h",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[Sx::scalar(h)],
        &Options::new(),
    )
    .unwrap();
    assert_eq!(fun.call_numeric(&[&[2.0], &[5.0]]).unwrap()[0][0], 5.0);
    assert_eq!(fun.call_numeric(&[&[-1.0], &[5.0]]).unwrap()[0][0], 0.0);
}

#[test]
fn min_max_abs_sign() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let y = arena.sym("y");
    let mn = arena.fmin(x, y);
    let mx = arena.fmax(x, y);
    let ab = arena.fabs(x);
    let out = Sx::from_nonzeros(sxvm::Sparsity::dense(3), vec![mn, mx, ab]);
    let fun = SxFunction::new(
        &arena,
        "m",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[out],
        &Options::new(),
    )
    .unwrap();
    let r = fun.call_numeric(&[&[-2.0], &[1.5]]).unwrap();
    assert_eq!(r[0], vec![-2.0, 1.5, 2.0]);
}

#[test]
fn skipped_output_buffer() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let s = arena.sq(x);
    let fun = SxFunction::new(
        &arena,
        "f",
        &[Sx::scalar(x)],
        &[Sx::scalar(x), Sx::scalar(s)],
        &Options::new(),
    )
    .unwrap();

    let mut out1 = [0.0f64; 1];
    let mut iw = vec![0i64; fun.sz_iw()];
    let mut w = vec![0.0; fun.sz_w()];
    let input = [3.0];
    let arg = [Some(&input[..])];
    let mut res = [None, Some(&mut out1[..])];
    fun.eval(&arg, &mut res, &mut iw, &mut w).unwrap();
    assert_eq!(out1[0], 9.0);
}

// ── Sub-calls ──

#[test]
fn call_node_gather_scatter() {
    // G(x) = f(x) + 1 with f(x) = x² + x.
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let f = Function::new(SquarePlusX);
    let ret = arena.call(f, vec![x]);
    let one = arena.one();
    let g = arena.add(ret[0], one);
    let fun = SxFunction::new(
        &arena,
        "g",
        &[Sx::scalar(x)],
        &[Sx::scalar(g)],
        &Options::new(),
    )
    .unwrap();

    let out = fun.call_numeric(&[&[4.0]]).unwrap();
    assert_eq!(out[0][0], 21.0);

    // Exactly one call instruction, with one dependency and one output.
    let calls: Vec<usize> = (0..fun.n_instructions())
        .filter(|&k| fun.instruction_id(k) == OpCode::Call)
        .collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(fun.instruction_input(calls[0]).len(), 1);
    assert_eq!(fun.instruction_output(calls[0]).len(), 1);

    // Output extraction never reaches the compiled stream.
    assert!(fun
        .algorithm()
        .iter()
        .all(|a| a.op != OpCode::FunOutput && a.op != OpCode::Parameter));
}

#[test]
fn unused_call_output_is_skipped() {
    // Only the second output of g(x) = (x², 3x) is used.
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let g = Function::new(TwoOut);
    let ret = arena.call(g, vec![x]);
    let fun = SxFunction::new(
        &arena,
        "h",
        &[Sx::scalar(x)],
        &[Sx::scalar(ret[1])],
        &Options::new(),
    )
    .unwrap();
    assert_eq!(fun.call_numeric(&[&[2.0]]).unwrap()[0][0], 6.0);

    // The unused output keeps its -1 marker.
    let call_k = (0..fun.n_instructions())
        .find(|&k| fun.instruction_id(k) == OpCode::Call)
        .unwrap();
    let outs = fun.instruction_output(call_k);
    assert_eq!(outs[0], -1);
    assert!(outs[1] >= 0);
}

#[test]
fn call_feeding_call() {
    // f(f(x)) + x
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let f = Function::new(SquarePlusX);
    let inner = arena.call(f.clone(), vec![x]);
    let outer = arena.call(f, vec![inner[0]]);
    let g = arena.add(outer[0], x);
    let fun = SxFunction::new(
        &arena,
        "nested",
        &[Sx::scalar(x)],
        &[Sx::scalar(g)],
        &Options::new(),
    )
    .unwrap();
    // f(2) = 6, f(6) = 42, + 2 = 44.
    assert_eq!(fun.call_numeric(&[&[2.0]]).unwrap()[0][0], 44.0);
}

#[test]
fn sub_call_failure_propagates() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let f = Function::new(Failing);
    let ret = arena.call(f, vec![x]);
    let fun = SxFunction::new(
        &arena,
        "g",
        &[Sx::scalar(x)],
        &[Sx::scalar(ret[0])],
        &Options::new(),
    )
    .unwrap();
    assert!(matches!(
        fun.call_numeric(&[&[1.0]]),
        Err(EvalError::SubcallFailed { .. })
    ));
}

#[test]
fn scratch_sizes_cover_sub_calls() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let f = Function::new(SquarePlusX);
    let ret = arena.call(f, vec![x]);
    let fun = SxFunction::new(
        &arena,
        "g",
        &[Sx::scalar(x)],
        &[Sx::scalar(ret[0])],
        &Options::new(),
    )
    .unwrap();
    // Primary slots plus packed input and output regions.
    assert!(fun.sz_w() >= fun.worksize() + 2);
}
