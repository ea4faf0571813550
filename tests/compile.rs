//! Compilation: instruction stream shape, register allocation, free
//! variables, options.

use sxvm::{CompileError, EvalError, OpCode, Options, Sparsity, Sx, SxArena, SxFunction};

/// `F(x, y) = x*y + sin(x)` plus its inputs, in a fresh arena.
fn xy_plus_sinx(arena: &mut SxArena) -> (Sx, Sx, Sx) {
    let x = arena.sym("x");
    let y = arena.sym("y");
    let xy = arena.mul(x, y);
    let sx = arena.sin(x);
    let f = arena.add(xy, sx);
    (Sx::scalar(x), Sx::scalar(y), Sx::scalar(f))
}

#[test]
fn worksize_with_live_variables() {
    let mut arena = SxArena::new();
    let (x, y, f) = xy_plus_sinx(&mut arena);
    let fun = SxFunction::new(&arena, "f", &[x, y], &[f], &Options::new()).unwrap();
    assert!(fun.worksize() <= 3, "worksize {} > 3", fun.worksize());
}

#[test]
fn live_variables_disabled_allocates_fresh_slots() {
    let mut arena = SxArena::new();
    let (x, y, f) = xy_plus_sinx(&mut arena);
    let opts = Options::new().set("live_variables", false);
    let live = SxFunction::new(&arena, "f", &[x.clone(), y.clone()], &[f.clone()], &Options::new())
        .unwrap();
    let fresh = SxFunction::new(&arena, "f", &[x, y], &[f], &opts).unwrap();
    assert!(fresh.worksize() > live.worksize());

    // Same numbers either way.
    let a = live.call_numeric(&[&[2.0], &[3.0]]).unwrap();
    let b = fresh.call_numeric(&[&[2.0], &[3.0]]).unwrap();
    assert_eq!(a[0][0].to_bits(), b[0][0].to_bits());
}

#[test]
fn unary_instructions_duplicate_argument_slot() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let s = arena.sin(x);
    let e = arena.exp(s);
    let t = arena.tanh(e);
    let fun = SxFunction::new(
        &arena,
        "chain",
        &[Sx::scalar(x)],
        &[Sx::scalar(t)],
        &Options::new(),
    )
    .unwrap();
    for k in 0..fun.n_instructions() {
        let a = fun.algorithm()[k];
        match a.op {
            OpCode::Sin | OpCode::Exp | OpCode::Tanh => assert_eq!(a.i1, a.i2),
            _ => {}
        }
    }
}

#[test]
fn slots_stay_within_worksize() {
    let mut arena = SxArena::new();
    let (x, y, f) = xy_plus_sinx(&mut arena);
    let fun = SxFunction::new(&arena, "f", &[x, y], &[f], &Options::new()).unwrap();
    let ws = fun.worksize() as u32;
    for a in fun.algorithm() {
        match a.op {
            OpCode::Input => assert!(a.i0 < ws),
            OpCode::Output => assert!(a.i1 < ws),
            OpCode::Call => {}
            _ => {
                assert!(a.i0 < ws);
                assert!(a.i1 < ws);
                assert!(a.i2 < ws);
            }
        }
    }
}

#[test]
fn free_variable_is_detected_and_blocks_evaluation() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let z = arena.sym("z");
    let f = arena.add(x, z);
    let fun = SxFunction::new(
        &arena,
        "f",
        &[Sx::scalar(x)],
        &[Sx::scalar(f)],
        &Options::new(),
    )
    .unwrap();
    assert_eq!(fun.free_vars().len(), 1);
    assert_eq!(fun.free_names(), &["z".to_string()]);

    match fun.call_numeric(&[&[1.0]]) {
        Err(EvalError::FreeVariables(names)) => assert_eq!(names, vec!["z".to_string()]),
        other => panic!("expected free-variable error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unused_input_is_not_free() {
    // K(x) = x, with y declared but unused.
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let y = arena.sym("y");
    let fun = SxFunction::new(
        &arena,
        "k",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[Sx::scalar(x)],
        &Options::new(),
    )
    .unwrap();
    assert!(fun.free_vars().is_empty());
}

#[test]
fn missing_input_buffer_reads_zero() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let fun = SxFunction::new(
        &arena,
        "k",
        &[Sx::scalar(x)],
        &[Sx::scalar(x)],
        &Options::new(),
    )
    .unwrap();

    let mut out = [0.0f64; 1];
    let mut iw = vec![0i64; fun.sz_iw()];
    let mut w = vec![0.0; fun.sz_w()];
    let mut res = [Some(&mut out[..])];
    fun.eval(&[None], &mut res, &mut iw, &mut w).unwrap();
    assert_eq!(out[0], 0.0);
}

#[test]
fn empty_outputs_are_skipped() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let empty = Sx::from_nonzeros(Sparsity::new(2, vec![]), vec![]);
    let fun = SxFunction::new(
        &arena,
        "f",
        &[Sx::scalar(x)],
        &[empty, Sx::scalar(x)],
        &Options::new(),
    )
    .unwrap();

    let outputs: Vec<_> = fun
        .algorithm()
        .iter()
        .filter(|a| a.op == OpCode::Output)
        .collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].i0, 1);
}

#[test]
fn repeated_output_nonzeros() {
    // Both output entries read the same node.
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let s = arena.sq(x);
    let out = Sx::from_nonzeros(Sparsity::dense(2), vec![s, s]);
    let fun = SxFunction::new(&arena, "f", &[Sx::scalar(x)], &[out], &Options::new()).unwrap();
    let r = fun.call_numeric(&[&[3.0]]).unwrap();
    assert_eq!(r[0], vec![9.0, 9.0]);
}

#[test]
fn is_smooth_classification() {
    let mut arena = SxArena::new();
    let (x, y, f) = xy_plus_sinx(&mut arena);
    let smooth = SxFunction::new(&arena, "f", &[x, y], &[f], &Options::new()).unwrap();
    assert!(smooth.is_smooth());

    // H(x, y) = (x > 0) * y
    let x = arena.sym("x");
    let y = arena.sym("y");
    let zero = arena.zero();
    let c = arena.lt(zero, x);
    let h = arena.mul(c, y);
    let nonsmooth = SxFunction::new(
        &arena,
        "h",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[Sx::scalar(h)],
        &Options::new(),
    )
    .unwrap();
    assert!(!nonsmooth.is_smooth());
}

#[test]
fn disp_lists_instructions() {
    let mut arena = SxArena::new();
    let (x, y, f) = xy_plus_sinx(&mut arena);
    let fun = SxFunction::new(&arena, "f", &[x, y], &[f], &Options::new()).unwrap();
    let text = fun.disp().unwrap();
    assert!(text.contains("input[0][0]"));
    assert!(text.contains("input[1][0]"));
    assert!(text.contains("sin(@"));
    assert!(text.contains("output[0][0] = @"));
}

#[test]
fn unknown_option_is_fatal() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let opts = Options::new().set("optimize_harder", true);
    match SxFunction::new(&arena, "f", &[Sx::scalar(x)], &[Sx::scalar(x)], &opts) {
        Err(CompileError::UnknownOption(key)) => assert_eq!(key, "optimize_harder"),
        other => panic!("expected unknown-option error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn default_in_length_is_checked() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let opts = Options::new().set("default_in", vec![1.0, 2.0]);
    match SxFunction::new(&arena, "f", &[Sx::scalar(x)], &[Sx::scalar(x)], &opts) {
        Err(CompileError::DefaultInLength { expected, got }) => {
            assert_eq!((expected, got), (1, 2));
        }
        other => panic!("expected length error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn jit_options_are_rejected() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let opts = Options::new().set("just_in_time_opencl", true);
    assert!(matches!(
        SxFunction::new(&arena, "f", &[Sx::scalar(x)], &[Sx::scalar(x)], &opts),
        Err(CompileError::JitUnsupported(_))
    ));
}

#[test]
fn non_symbolic_input_is_rejected() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let s = arena.sq(x);
    assert!(matches!(
        SxFunction::new(
            &arena,
            "f",
            &[Sx::scalar(s)],
            &[Sx::scalar(s)],
            &Options::new()
        ),
        Err(CompileError::NonSymbolicInput { input: 0 })
    ));
}

#[test]
fn default_in_is_stored() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let opts = Options::new().set("default_in", vec![4.5]);
    let fun = SxFunction::new(&arena, "f", &[Sx::scalar(x)], &[Sx::scalar(x)], &opts).unwrap();
    assert_eq!(fun.default_in(0), 4.5);
}

#[test]
fn identical_compiles_agree() {
    let mut arena = SxArena::new();
    let (x, y, f) = xy_plus_sinx(&mut arena);
    let f1 = SxFunction::new(&arena, "f", &[x.clone(), y.clone()], &[f.clone()], &Options::new())
        .unwrap();
    let f2 = SxFunction::new(&arena, "f", &[x, y], &[f], &Options::new()).unwrap();
    assert_eq!(f1.worksize(), f2.worksize());
    assert_eq!(f1.disp().unwrap(), f2.disp().unwrap());
}
