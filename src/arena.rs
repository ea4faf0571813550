//! Expression node arena.
//!
//! Scalar symbolic expressions live in a flat arena and are addressed by
//! [`SxElem`] handles (`u32` indices). A node may only reference
//! earlier-allocated nodes, so every expression is a DAG by construction
//! and sharing falls out of handle reuse. The compile-time scratch that the
//! compiler needs per node is kept in parallel vectors owned by the
//! compiler, not here.
//!
//! Constructors fold constants and apply the usual algebraic identities, so
//! the arena never sees `x + 0` or `1 * x` nodes.

use std::collections::HashMap;

use crate::function::Function;
use crate::opcode::{self, OpCode};

/// Handle to one scalar expression node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SxElem(pub(crate) u32);

impl SxElem {
    /// Arena index of the node.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One node record. `ext` is overloaded by kind: symbol-table index for
/// `Parameter`, call-table index for `Call`, flat output index for
/// `FunOutput`; unused otherwise.
#[derive(Clone, Debug)]
struct Node {
    op: OpCode,
    dep: [u32; 2],
    val: f64,
    ext: u32,
}

/// A `Call` node's side data: the external function and its scalar
/// dependencies (one per input nonzero, packed across inputs).
#[derive(Clone, Debug)]
struct CallSx {
    f: Function,
    dep: Vec<SxElem>,
}

/// Arena of scalar expression nodes.
pub struct SxArena {
    nodes: Vec<Node>,
    names: Vec<String>,
    calls: Vec<CallSx>,
    /// Constants deduplicated by bit pattern, so equal constants share a
    /// node and compile to a single work slot.
    const_cache: HashMap<u64, u32>,
}

impl SxArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        SxArena {
            nodes: Vec::new(),
            names: Vec::new(),
            calls: Vec::new(),
            const_cache: HashMap::new(),
        }
    }

    /// Create an arena with pre-allocated node capacity.
    pub fn with_capacity(est_nodes: usize) -> Self {
        SxArena {
            nodes: Vec::with_capacity(est_nodes),
            names: Vec::new(),
            calls: Vec::new(),
            const_cache: HashMap::new(),
        }
    }

    /// Number of nodes allocated so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no nodes have been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> SxElem {
        let idx = self.nodes.len();
        assert!(idx <= u32::MAX as usize, "arena node count overflow");
        self.nodes.push(node);
        SxElem(idx as u32)
    }

    // ── Leaves ──

    /// New symbolic leaf with a display name. Each call creates a distinct
    /// symbol, even under the same name.
    pub fn sym(&mut self, name: &str) -> SxElem {
        let sid = self.names.len() as u32;
        self.names.push(name.to_string());
        self.push(Node {
            op: OpCode::Parameter,
            dep: [0, 0],
            val: 0.0,
            ext: sid,
        })
    }

    /// Constant node. Equal bit patterns share one node.
    pub fn constant(&mut self, v: f64) -> SxElem {
        if let Some(&idx) = self.const_cache.get(&v.to_bits()) {
            return SxElem(idx);
        }
        let e = self.push(Node {
            op: OpCode::Const,
            dep: [0, 0],
            val: v,
            ext: 0,
        });
        self.const_cache.insert(v.to_bits(), e.0);
        e
    }

    /// The constant zero.
    #[inline]
    pub fn zero(&mut self) -> SxElem {
        self.constant(0.0)
    }

    /// The constant one.
    #[inline]
    pub fn one(&mut self) -> SxElem {
        self.constant(1.0)
    }

    // ── Operations ──

    /// Apply a unary opcode.
    ///
    /// Folds constants and collapses `-(-x)`.
    pub fn unary(&mut self, op: OpCode, x: SxElem) -> SxElem {
        debug_assert_eq!(opcode::ndeps(op), 1);
        if self.is_constant(x) {
            let v = opcode::eval_binary(op, self.nodes[x.index()].val, 0.0);
            return self.constant(v);
        }
        if op == OpCode::Neg && self.op(x) == OpCode::Neg {
            return self.dep(x, 0);
        }
        self.push(Node {
            op,
            dep: [x.0, x.0],
            val: 0.0,
            ext: 0,
        })
    }

    /// Apply a binary opcode.
    ///
    /// Folds constants; applies identities `x+0`, `0+x`, `x-0`, `0-x`,
    /// `x*1`, `1*x`, `x/1` and the structural patterns `x*0 -> 0`,
    /// `x-x -> 0`, `x/x -> 1`, plus small-exponent `pow` strength
    /// reduction.
    pub fn binary(&mut self, op: OpCode, x: SxElem, y: SxElem) -> SxElem {
        debug_assert_eq!(opcode::ndeps(op), 2);
        let xc = self.is_constant(x);
        let yc = self.is_constant(y);
        if xc && yc {
            let v = opcode::eval_binary(op, self.to_double(x), self.to_double(y));
            return self.constant(v);
        }
        match op {
            OpCode::Add => {
                if yc && self.to_double(y) == 0.0 {
                    return x;
                }
                if xc && self.to_double(x) == 0.0 {
                    return y;
                }
            }
            OpCode::Sub => {
                if yc && self.to_double(y) == 0.0 {
                    return x;
                }
                if xc && self.to_double(x) == 0.0 {
                    return self.unary(OpCode::Neg, y);
                }
                if x == y {
                    return self.zero();
                }
            }
            OpCode::Mul => {
                if yc && self.to_double(y) == 1.0 {
                    return x;
                }
                if xc && self.to_double(x) == 1.0 {
                    return y;
                }
                if (yc && self.to_double(y) == 0.0) || (xc && self.to_double(x) == 0.0) {
                    return self.zero();
                }
            }
            OpCode::Div => {
                if yc && self.to_double(y) == 1.0 {
                    return x;
                }
                if x == y {
                    return self.one();
                }
            }
            OpCode::Pow => {
                if yc {
                    let e = self.to_double(y);
                    if e == 0.0 {
                        return self.one();
                    }
                    if e == 1.0 {
                        return x;
                    }
                    if e == 2.0 {
                        return self.unary(OpCode::Sq, x);
                    }
                }
            }
            _ => {}
        }
        self.push(Node {
            op,
            dep: [x.0, y.0],
            val: 0.0,
            ext: 0,
        })
    }

    /// Apply an opcode of either arity; `y` is ignored for unary ops.
    pub fn apply(&mut self, op: OpCode, x: SxElem, y: SxElem) -> SxElem {
        if opcode::ndeps(op) == 1 {
            self.unary(op, x)
        } else {
            self.binary(op, x, y)
        }
    }

    /// Create a sub-call node and its output-extraction nodes.
    ///
    /// `deps` supplies one scalar per input nonzero, packed across inputs.
    /// Returns one handle per output nonzero, packed across outputs.
    pub fn call(&mut self, f: Function, deps: Vec<SxElem>) -> Vec<SxElem> {
        assert_eq!(
            deps.len(),
            f.nnz_in_total(),
            "call to '{}': dependency count does not match input nonzeros",
            f.name()
        );
        let n_out = f.nnz_out_total();
        let ci = self.calls.len() as u32;
        self.calls.push(CallSx { f, dep: deps });
        let call = self.push(Node {
            op: OpCode::Call,
            dep: [0, 0],
            val: 0.0,
            ext: ci,
        });
        (0..n_out).map(|i| self.fun_output(call, i)).collect()
    }

    /// Extraction node for flat output `oind` of a `Call` node.
    pub fn fun_output(&mut self, call: SxElem, oind: usize) -> SxElem {
        debug_assert_eq!(self.op(call), OpCode::Call);
        self.push(Node {
            op: OpCode::FunOutput,
            dep: [call.0, call.0],
            val: 0.0,
            ext: oind as u32,
        })
    }

    // ── Accessors ──

    /// Opcode of a node.
    #[inline]
    pub fn op(&self, e: SxElem) -> OpCode {
        self.nodes[e.index()].op
    }

    /// Number of dependencies of a node, including call and extraction
    /// nodes.
    pub fn ndeps_of(&self, e: SxElem) -> usize {
        match self.op(e) {
            OpCode::Call => self.calls[self.nodes[e.index()].ext as usize].dep.len(),
            op => opcode::ndeps(op),
        }
    }

    /// The `i`-th dependency of a node.
    pub fn dep(&self, e: SxElem, i: usize) -> SxElem {
        match self.op(e) {
            OpCode::Call => self.calls[self.nodes[e.index()].ext as usize].dep[i],
            _ => SxElem(self.nodes[e.index()].dep[i.min(1)]),
        }
    }

    /// True for `Const` nodes.
    #[inline]
    pub fn is_constant(&self, e: SxElem) -> bool {
        self.op(e) == OpCode::Const
    }

    /// True for `Parameter` nodes.
    #[inline]
    pub fn is_symbolic(&self, e: SxElem) -> bool {
        self.op(e) == OpCode::Parameter
    }

    /// Value of a `Const` node.
    pub fn to_double(&self, e: SxElem) -> f64 {
        debug_assert!(self.is_constant(e));
        self.nodes[e.index()].val
    }

    /// Display name of a `Parameter` node.
    pub fn name_of(&self, e: SxElem) -> &str {
        debug_assert!(self.is_symbolic(e));
        &self.names[self.nodes[e.index()].ext as usize]
    }

    /// External function of a `Call` node.
    pub fn call_fn(&self, e: SxElem) -> &Function {
        debug_assert_eq!(self.op(e), OpCode::Call);
        &self.calls[self.nodes[e.index()].ext as usize].f
    }

    /// Flat output index of a `FunOutput` node.
    pub fn fun_output_index(&self, e: SxElem) -> usize {
        debug_assert_eq!(self.op(e), OpCode::FunOutput);
        self.nodes[e.index()].ext as usize
    }

    // ── Structural comparison ──

    /// Depth-limited structural equality.
    ///
    /// Identical handles are equal at any depth. Beyond that, nodes are
    /// equal when their opcodes match and all dependencies are equal at
    /// `depth - 1`. Distinct symbols are never equal; calls additionally
    /// require the same function object.
    pub fn is_equal(&self, a: SxElem, b: SxElem, depth: usize) -> bool {
        if a == b {
            return true;
        }
        if depth == 0 {
            return false;
        }
        let op = self.op(a);
        if op != self.op(b) {
            return false;
        }
        match op {
            OpCode::Const => self.nodes[a.index()].val == self.nodes[b.index()].val,
            OpCode::Parameter => false,
            OpCode::Call => {
                let ca = &self.calls[self.nodes[a.index()].ext as usize];
                let cb = &self.calls[self.nodes[b.index()].ext as usize];
                Function::same(&ca.f, &cb.f)
                    && ca.dep.len() == cb.dep.len()
                    && ca
                        .dep
                        .iter()
                        .zip(cb.dep.iter())
                        .all(|(&x, &y)| self.is_equal(x, y, depth - 1))
            }
            OpCode::FunOutput => {
                self.nodes[a.index()].ext == self.nodes[b.index()].ext
                    && self.is_equal(self.dep(a, 0), self.dep(b, 0), depth - 1)
            }
            _ => (0..opcode::ndeps(op))
                .all(|i| self.is_equal(self.dep(a, i), self.dep(b, i), depth - 1)),
        }
    }

    /// Return `orig` when `e` equals it structurally up to `depth`,
    /// preserving sharing across re-evaluations; otherwise return `e`.
    pub fn assign_if_duplicate(&self, e: SxElem, orig: SxElem, depth: usize) -> SxElem {
        if self.is_equal(e, orig, depth) {
            orig
        } else {
            e
        }
    }

    // ── Derivatives ──

    /// Local partial derivatives of `op` at the original operands.
    ///
    /// `x`, `y` are the operand expressions and `f` the original result
    /// expression, so rules like `d exp = f` and `d sqrt = 1/(2 f)` reuse
    /// the already-built node. Unary ops return zero for the second
    /// partial.
    pub fn der(&mut self, op: OpCode, x: SxElem, y: SxElem, f: SxElem) -> (SxElem, SxElem) {
        use OpCode::*;
        let zero = self.zero();
        let one = self.one();
        match op {
            Add => (one, one),
            Sub => (one, self.constant(-1.0)),
            Mul => (y, x),
            Div => {
                let d0 = self.unary(Inv, y);
                let q = self.binary(Div, f, y);
                (d0, self.unary(Neg, q))
            }
            Pow => {
                let ym1 = self.binary(Sub, y, one);
                let p = self.binary(Pow, x, ym1);
                let d0 = self.binary(Mul, y, p);
                let lx = self.unary(Log, x);
                (d0, self.binary(Mul, f, lx))
            }
            Atan2 => {
                let xx = self.unary(Sq, x);
                let yy = self.unary(Sq, y);
                let denom = self.binary(Add, xx, yy);
                let d0 = self.binary(Div, y, denom);
                let q = self.binary(Div, x, denom);
                (d0, self.unary(Neg, q))
            }
            Fmin => {
                let d0 = self.binary(Le, x, y);
                (d0, self.binary(Lt, y, x))
            }
            Fmax => {
                let d0 = self.binary(Le, y, x);
                (d0, self.binary(Lt, x, y))
            }
            IfElseZero => (zero, self.binary(IfElseZero, x, one)),
            And | Or | Eq | Ne | Lt | Le | Not | Sign | Floor | Ceil => (zero, zero),
            Neg => (self.constant(-1.0), zero),
            Inv => {
                let ff = self.unary(Sq, f);
                (self.unary(Neg, ff), zero)
            }
            Sq => {
                let two = self.constant(2.0);
                (self.binary(Mul, two, x), zero)
            }
            Sqrt => {
                let two = self.constant(2.0);
                let tf = self.binary(Mul, two, f);
                (self.unary(Inv, tf), zero)
            }
            Fabs => (self.unary(Sign, x), zero),
            Exp => (f, zero),
            Log => (self.unary(Inv, x), zero),
            Sin => (self.unary(Cos, x), zero),
            Cos => {
                let s = self.unary(Sin, x);
                (self.unary(Neg, s), zero)
            }
            Tan => {
                let c = self.unary(Cos, x);
                let cc = self.unary(Sq, c);
                (self.unary(Inv, cc), zero)
            }
            Asin => {
                let xx = self.unary(Sq, x);
                let t = self.binary(Sub, one, xx);
                let r = self.unary(Sqrt, t);
                (self.unary(Inv, r), zero)
            }
            Acos => {
                let xx = self.unary(Sq, x);
                let t = self.binary(Sub, one, xx);
                let r = self.unary(Sqrt, t);
                let i = self.unary(Inv, r);
                (self.unary(Neg, i), zero)
            }
            Atan => {
                let xx = self.unary(Sq, x);
                let t = self.binary(Add, one, xx);
                (self.unary(Inv, t), zero)
            }
            Sinh => (self.unary(Cosh, x), zero),
            Cosh => (self.unary(Sinh, x), zero),
            Tanh => {
                let ff = self.unary(Sq, f);
                (self.binary(Sub, one, ff), zero)
            }
            Input | Output | Const | Parameter | Call | FunOutput => {
                unreachable!("no derivative rule for structural opcodes")
            }
        }
    }

    // ── Display ──

    /// Render an expression as a string, following the DAG recursively.
    pub fn display(&self, e: SxElem) -> String {
        match self.op(e) {
            OpCode::Const => {
                let v = self.to_double(e);
                if v == v.floor() && v.abs() < 1e15 {
                    format!("{}", v)
                } else {
                    format!("{:?}", v)
                }
            }
            OpCode::Parameter => self.name_of(e).to_string(),
            OpCode::Call => {
                let c = &self.calls[self.nodes[e.index()].ext as usize];
                let args: Vec<String> = c.dep.iter().map(|&d| self.display(d)).collect();
                format!("{}({})", c.f.name(), args.join(","))
            }
            OpCode::FunOutput => {
                let call = self.dep(e, 0);
                format!("{}[{}]", self.display(call), self.fun_output_index(e))
            }
            op if opcode::ndeps(op) == 1 => {
                let a = self.display(self.dep(e, 0));
                opcode::print(op, &a, "")
            }
            op => {
                let a = self.display(self.dep(e, 0));
                let b = self.display(self.dep(e, 1));
                opcode::print(op, &a, &b)
            }
        }
    }

    // ── Convenience constructors ──

    /// `x + y`
    pub fn add(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Add, x, y)
    }

    /// `x - y`
    pub fn sub(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Sub, x, y)
    }

    /// `x * y`
    pub fn mul(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Mul, x, y)
    }

    /// `x / y`
    pub fn div(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Div, x, y)
    }

    /// `x ^ y`
    pub fn pow(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Pow, x, y)
    }

    /// `-x`
    pub fn neg(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Neg, x)
    }

    /// `x²`
    pub fn sq(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Sq, x)
    }

    /// `√x`
    pub fn sqrt(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Sqrt, x)
    }

    /// `|x|`
    pub fn fabs(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Fabs, x)
    }

    /// `eˣ`
    pub fn exp(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Exp, x)
    }

    /// `ln x`
    pub fn log(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Log, x)
    }

    /// `sin x`
    pub fn sin(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Sin, x)
    }

    /// `cos x`
    pub fn cos(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Cos, x)
    }

    /// `tan x`
    pub fn tan(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Tan, x)
    }

    /// `tanh x`
    pub fn tanh(&mut self, x: SxElem) -> SxElem {
        self.unary(OpCode::Tanh, x)
    }

    /// `min(x, y)`
    pub fn fmin(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Fmin, x, y)
    }

    /// `max(x, y)`
    pub fn fmax(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Fmax, x, y)
    }

    /// `x < y` as 0/1
    pub fn lt(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Lt, x, y)
    }

    /// `x <= y` as 0/1
    pub fn le(&mut self, x: SxElem, y: SxElem) -> SxElem {
        self.binary(OpCode::Le, x, y)
    }

    /// `if_else_zero(c, x)`
    pub fn if_else_zero(&mut self, c: SxElem, x: SxElem) -> SxElem {
        self.binary(OpCode::IfElseZero, c, x)
    }
}

impl Default for SxArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_dedup() {
        let mut a = SxArena::new();
        let c1 = a.constant(3.5);
        let c2 = a.constant(3.5);
        assert_eq!(c1, c2);
    }

    #[test]
    fn identity_simplification() {
        let mut a = SxArena::new();
        let x = a.sym("x");
        let zero = a.zero();
        let one = a.one();
        assert_eq!(a.add(x, zero), x);
        assert_eq!(a.add(zero, x), x);
        assert_eq!(a.mul(x, one), x);
        assert_eq!(a.mul(one, x), x);
        assert_eq!(a.div(x, one), x);
        assert_eq!(a.sub(x, zero), x);
    }

    #[test]
    fn structural_patterns() {
        let mut a = SxArena::new();
        let x = a.sym("x");
        let s = a.sub(x, x);
        assert!(a.is_constant(s));
        assert_eq!(a.to_double(s), 0.0);
        let q = a.div(x, x);
        assert_eq!(a.to_double(q), 1.0);
        let zero = a.zero();
        let m = a.mul(x, zero);
        assert_eq!(a.to_double(m), 0.0);
    }

    #[test]
    fn constant_folding() {
        let mut a = SxArena::new();
        let c2 = a.constant(2.0);
        let c3 = a.constant(3.0);
        let s = a.add(c2, c3);
        assert_eq!(a.to_double(s), 5.0);
    }

    #[test]
    fn pow_strength_reduction() {
        let mut a = SxArena::new();
        let x = a.sym("x");
        let two = a.constant(2.0);
        let p = a.pow(x, two);
        assert_eq!(a.op(p), OpCode::Sq);
    }

    #[test]
    fn double_negation() {
        let mut a = SxArena::new();
        let x = a.sym("x");
        let n = a.neg(x);
        let nn = a.neg(n);
        assert_eq!(nn, x);
    }

    #[test]
    fn depth_limited_equality() {
        let mut a = SxArena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let e1 = a.add(x, y);
        let e2 = a.add(x, y);
        assert_ne!(e1, e2);
        assert!(a.is_equal(e1, e2, 1));
        assert!(a.is_equal(e1, e2, 2));
        assert!(!a.is_equal(e1, e2, 0));
        let e3 = a.add(y, x);
        assert!(!a.is_equal(e1, e3, 2));
    }

    #[test]
    fn distinct_symbols_unequal() {
        let mut a = SxArena::new();
        let x1 = a.sym("x");
        let x2 = a.sym("x");
        assert!(!a.is_equal(x1, x2, 5));
    }

    #[test]
    fn display_round() {
        let mut a = SxArena::new();
        let x = a.sym("x");
        let s = a.sin(x);
        let c = a.constant(2.0);
        let e = a.mul(c, s);
        assert_eq!(a.display(e), "(2*sin(x))");
    }
}
