//! Jacobian construction as a compiled function.

use approx::assert_relative_eq;
use sxvm::{Options, Sx, SxArena, SxFunction};

#[test]
fn scalar_function_jacobian() {
    // F(x, y) = x*y + sin(x); J = [y + cos(x), x].
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

    let jac = fun.jacobian(&mut arena, "jac_f", &Options::new()).unwrap();
    // Inputs: x, y, plus one dummy per original output.
    assert_eq!(jac.n_in(), 3);
    assert_eq!(jac.n_out(), 1);
    assert_eq!(jac.nnz_out(0), 2);

    let out = jac.call_numeric(&[&[2.0], &[3.0], &[0.0]]).unwrap();
    assert_relative_eq!(out[0][0], 3.0 + 2.0_f64.cos(), max_relative = 1e-14);
    assert_relative_eq!(out[0][1], 2.0, max_relative = 1e-14);
}

#[test]
fn multi_output_jacobian_is_column_major() {
    // F(x, y) = (x², x·y); J = [[2x, 0], [y, x]].
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let y = arena.sym("y");
    let x2 = arena.sq(x);
    let xy = arena.mul(x, y);
    let fun = SxFunction::new(
        &arena,
        "f",
        &[Sx::scalar(x), Sx::scalar(y)],
        &[Sx::scalar(x2), Sx::scalar(xy)],
        &Options::new(),
    )
    .unwrap();

    let jac = fun.jacobian(&mut arena, "jac_f", &Options::new()).unwrap();
    assert_eq!(jac.nnz_out(0), 4);

    let out = jac
        .call_numeric(&[&[3.0], &[5.0], &[0.0], &[0.0]])
        .unwrap();
    // Column-major: (J00, J10, J01, J11).
    assert_eq!(out[0], vec![6.0, 5.0, 0.0, 3.0]);
}

#[test]
fn jacobian_against_divided_differences() {
    let mut arena = SxArena::new();
    let x = arena.sym("x");
    let s = arena.sin(x);
    let e = arena.exp(s);
    let f = arena.mul(e, x);
    let fun = SxFunction::new(
        &arena,
        "f",
        &[Sx::scalar(x)],
        &[Sx::scalar(f)],
        &Options::new(),
    )
    .unwrap();
    let jac = fun.jacobian(&mut arena, "jac_f", &Options::new()).unwrap();

    let g = |x: f64| x.sin().exp() * x;
    let h = 1e-6;
    for &xv in &[0.5, 1.3, -2.0] {
        let expected = (g(xv + h) - g(xv - h)) / (2.0 * h);
        let out = jac.call_numeric(&[&[xv], &[0.0]]).unwrap();
        assert_relative_eq!(out[0][0], expected, max_relative = 1e-7);
    }
}
