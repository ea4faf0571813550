//! Compiled scalar-expression functions.
//!
//! [`SxFunction`] flattens a DAG of scalar expressions into a straight-line
//! instruction stream over a compact work vector, then executes that stream
//! in several modes: double-precision evaluation, symbolic evaluation with
//! common-subexpression reuse, forward- and reverse-mode AD, and bit-pattern
//! sparsity propagation. The stream can also be rendered as target-language
//! source.
//!
//! Compilation happens once, at construction:
//!
//! 1. depth-first topological sort of the output expressions,
//! 2. classification of nodes into a flat [`AlgEl`] stream,
//! 3. live-range register allocation over the work vector,
//! 4. binding of symbolic leaves to declared inputs; leftovers become free
//!    variables.
//!
//! The result is immutable; any number of threads may evaluate concurrently
//! with separate scratch buffers.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, trace};

use crate::arena::{SxArena, SxElem};
use crate::error::{CompileError, EvalError, Interrupted};
use crate::function::Function;
use crate::interrupt::InterruptHandler;
use crate::opcode::{self, OpCode};
use crate::sparsity::Sparsity;
use crate::sx::Sx;

mod codegen;
mod eval;
mod eval_sx;
mod forward;
mod jacobian;
mod reverse;
mod sparse;

#[cfg(feature = "serde")]
mod serde_support;

/// One compiled instruction.
///
/// Slot interpretation depends on the opcode:
///
/// | op        | i0             | i1               | i2            | d     |
/// |-----------|----------------|------------------|---------------|-------|
/// | `Input`   | dst slot       | input index      | nonzero index | —     |
/// | `Output`  | output index   | src slot         | nonzero index | —     |
/// | `Const`   | dst slot       | —                | —             | value |
/// | `Parameter` | dst slot     | —                | —             | —     |
/// | `Call`    | unused         | call-table index | —             | —     |
/// | unary     | dst slot       | arg slot         | = i1          | —     |
/// | binary    | dst slot       | lhs slot         | rhs slot      | —     |
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlgEl {
    /// Operation.
    pub op: OpCode,
    /// First slot index (see table).
    pub i0: u32,
    /// Second slot index.
    pub i1: u32,
    /// Third slot index.
    pub i2: u32,
    /// Constant value, used only by `Const`.
    pub d: f64,
}

/// Call-table entry: one external sub-function invocation with its
/// work-vector bindings and cached size metadata.
#[derive(Clone, Debug)]
pub(crate) struct CallNode {
    /// Bound function handle. `None` after deserialization until
    /// [`SxFunction::finalize`] re-binds it.
    pub f: Option<Function>,
    /// Recorded function name, the re-binding key.
    pub fname: String,
    /// Number of scalar dependencies (input nonzeros, packed).
    pub n_dep: usize,
    /// Work-vector slots feeding the packed input.
    pub dep: Vec<u32>,
    /// Number of scalar outputs (output nonzeros, packed).
    pub n_out: usize,
    /// Destination slots; `-1` marks an output unused downstream.
    pub out: Vec<i32>,
    /// Per-input nonzero counts of the callee.
    pub f_nnz_in: Vec<usize>,
    /// Per-output nonzero counts of the callee.
    pub f_nnz_out: Vec<usize>,
    /// Cached symbolic output expressions, used by the symbolic sweep to
    /// preserve identity.
    pub out_sx: Vec<Option<SxElem>>,
}

impl CallNode {
    fn new(f: Function) -> Self {
        let n_dep = f.nnz_in_total();
        let n_out = f.nnz_out_total();
        CallNode {
            fname: f.name().to_string(),
            n_dep,
            dep: vec![0; n_dep],
            n_out,
            out: vec![-1; n_out],
            out_sx: vec![None; n_out],
            f_nnz_in: (0..f.n_in()).map(|i| f.nnz_in(i)).collect(),
            f_nnz_out: (0..f.n_out()).map(|i| f.nnz_out(i)).collect(),
            f: Some(f),
        }
    }

    pub(crate) fn fun(&self) -> Result<&Function, EvalError> {
        self.f.as_ref().ok_or_else(|| EvalError::UnboundFunction {
            function: self.fname.clone(),
        })
    }
}

/// Side structure for sub-calls: the entries plus buffer-size maxima
/// sufficient for any single call.
#[derive(Clone, Debug, Default)]
pub(crate) struct CallInfo {
    pub sz_arg: usize,
    pub sz_res: usize,
    pub sz_iw: usize,
    pub sz_w: usize,
    pub sz_w_arg: usize,
    pub sz_w_res: usize,
    pub nodes: Vec<CallNode>,
}

/// Typed option value.
#[derive(Clone, Debug)]
pub enum OptValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer, used by the code emitter's `indent_level`.
    Int(i64),
    /// Vector of doubles.
    DoubleVector(Vec<f64>),
}

impl From<bool> for OptValue {
    fn from(v: bool) -> Self {
        OptValue::Bool(v)
    }
}

impl From<i64> for OptValue {
    fn from(v: i64) -> Self {
        OptValue::Int(v)
    }
}

impl From<Vec<f64>> for OptValue {
    fn from(v: Vec<f64>) -> Self {
        OptValue::DoubleVector(v)
    }
}

/// String-keyed option map. Unknown keys are fatal at the consuming call.
#[derive(Clone, Debug, Default)]
pub struct Options {
    entries: BTreeMap<String, OptValue>,
}

impl Options {
    /// Empty option set.
    pub fn new() -> Self {
        Options::default()
    }

    /// Set a key, chainable.
    pub fn set(mut self, key: &str, value: impl Into<OptValue>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptValue)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A compiled scalar-expression function.
pub struct SxFunction {
    name: String,
    pub(crate) in_: Vec<Sx>,
    pub(crate) out_: Vec<Sx>,
    name_in: Vec<String>,
    name_out: Vec<String>,
    pub(crate) sparsity_in: Vec<Sparsity>,
    pub(crate) sparsity_out: Vec<Sparsity>,
    pub(crate) default_in: Vec<f64>,
    pub(crate) algorithm: Vec<AlgEl>,
    pub(crate) worksize: usize,
    /// Original non-leaf subexpressions in instruction order, consumed by
    /// the symbolic and AD sweeps.
    pub(crate) operations: Vec<SxElem>,
    /// Constant nodes in encounter order.
    pub(crate) constants: Vec<SxElem>,
    /// Symbolic leaves not bound by any input.
    pub(crate) free_vars: Vec<SxElem>,
    /// Display names of the free variables, captured at compile time.
    pub(crate) free_names: Vec<String>,
    pub(crate) call: CallInfo,
    /// True after deserialization: the arena-relative handles above are
    /// gone and symbolic sweeps are unavailable.
    pub(crate) detached: bool,
}

impl SxFunction {
    /// Compile `outputs` as a function of `inputs`, with generated argument
    /// names (`i0`, `i1`, …, `o0`, …).
    pub fn new(
        arena: &SxArena,
        name: &str,
        inputs: &[Sx],
        outputs: &[Sx],
        options: &Options,
    ) -> Result<Self, CompileError> {
        let name_in: Vec<String> = (0..inputs.len()).map(|i| format!("i{}", i)).collect();
        let name_out: Vec<String> = (0..outputs.len()).map(|i| format!("o{}", i)).collect();
        Self::with_names(arena, name, inputs, outputs, &name_in, &name_out, options)
    }

    /// Compile with explicit argument names.
    pub fn with_names(
        arena: &SxArena,
        name: &str,
        inputs: &[Sx],
        outputs: &[Sx],
        name_in: &[String],
        name_out: &[String],
        options: &Options,
    ) -> Result<Self, CompileError> {
        if name_in.len() != inputs.len() {
            return Err(CompileError::NameCount {
                which: "input",
                expected: inputs.len(),
                got: name_in.len(),
            });
        }
        if name_out.len() != outputs.len() {
            return Err(CompileError::NameCount {
                which: "output",
                expected: outputs.len(),
                got: name_out.len(),
            });
        }

        // Inputs must be purely symbolic.
        for (ind, sx) in inputs.iter().enumerate() {
            if !sx.nonzeros().iter().all(|&e| arena.is_symbolic(e)) {
                return Err(CompileError::NonSymbolicInput { input: ind });
            }
        }

        // Read options.
        let mut live_variables = true;
        let mut default_in: Vec<f64> = Vec::new();
        for (key, value) in options.iter() {
            match (key, value) {
                ("default_in", OptValue::DoubleVector(v)) => default_in = v.clone(),
                ("default_in", _) => {
                    return Err(CompileError::OptionType {
                        key: key.to_string(),
                        expected: "double vector",
                    })
                }
                ("live_variables", OptValue::Bool(b)) => live_variables = *b,
                ("just_in_time_opencl", OptValue::Bool(b)) => {
                    if *b {
                        return Err(CompileError::JitUnsupported("just_in_time_opencl"));
                    }
                }
                ("just_in_time_sparsity", OptValue::Bool(b)) => {
                    if *b {
                        return Err(CompileError::JitUnsupported("just_in_time_sparsity"));
                    }
                }
                ("live_variables" | "just_in_time_opencl" | "just_in_time_sparsity", _) => {
                    return Err(CompileError::OptionType {
                        key: key.to_string(),
                        expected: "bool",
                    })
                }
                _ => return Err(CompileError::UnknownOption(key.to_string())),
            }
        }

        // Check/set default inputs.
        if default_in.is_empty() {
            default_in.resize(inputs.len(), 0.0);
        } else if default_in.len() != inputs.len() {
            return Err(CompileError::DefaultInLength {
                expected: inputs.len(),
                got: default_in.len(),
            });
        }

        debug!(function = name, "compiling");

        let mut f = SxFunction {
            name: name.to_string(),
            in_: inputs.to_vec(),
            out_: outputs.to_vec(),
            name_in: name_in.to_vec(),
            name_out: name_out.to_vec(),
            sparsity_in: inputs.iter().map(|s| s.sparsity().clone()).collect(),
            sparsity_out: outputs.iter().map(|s| s.sparsity().clone()).collect(),
            default_in,
            algorithm: Vec::new(),
            worksize: 0,
            operations: Vec::new(),
            constants: Vec::new(),
            free_vars: Vec::new(),
            free_names: Vec::new(),
            call: CallInfo::default(),
            detached: false,
        };
        f.init(arena, live_variables)?;
        Ok(f)
    }

    /// Compile pipeline: sort, emit, allocate, bind.
    fn init(&mut self, arena: &SxArena, live_variables: bool) -> Result<(), CompileError> {
        // ── Topological sort ──
        // Post-order node list, with a None separator per output nonzero
        // standing in for the upcoming Output instruction.
        let mut nodes: Vec<Option<u32>> = Vec::new();
        let mut visited = vec![false; arena.len()];
        for out in &self.out_ {
            for &root in out.nonzeros() {
                InterruptHandler::check()?;
                sort_depth_first(arena, root, &mut visited, &mut nodes);
                nodes.push(None);
            }
        }

        if nodes.len() > i32::MAX as usize || self.out_.len() > i32::MAX as usize {
            return Err(CompileError::IntegerOverflow);
        }
        trace!(nodes = nodes.len(), "sorted expression graph");

        // Node-to-position index.
        let mut temp = vec![0i32; arena.len()];
        for (i, n) in nodes.iter().enumerate() {
            if let Some(id) = n {
                temp[*id as usize] = i as i32;
            }
        }

        // Sort the nodes by type.
        self.constants.clear();
        self.operations.clear();
        for n in nodes.iter().flatten() {
            let e = SxElem(*n);
            match arena.op(e) {
                OpCode::Const => self.constants.push(e),
                OpCode::Parameter | OpCode::FunOutput => {}
                _ => self.operations.push(e),
            }
        }

        // ── Instruction emission ──
        let mut symb_loc: Vec<(usize, u32)> = Vec::new();
        let mut refcount = vec![0usize; nodes.len()];
        let mut alg_index: Vec<usize> = Vec::with_capacity(nodes.len());
        self.algorithm.clear();
        self.algorithm.reserve(nodes.len());

        // Current output and nonzero; start at the first nonempty output.
        let mut curr_oind = 0;
        while curr_oind < self.out_.len() && self.out_[curr_oind].nnz() == 0 {
            curr_oind += 1;
        }
        let mut curr_nz = 0usize;

        for n in &nodes {
            alg_index.push(self.algorithm.len());
            match n {
                None => {
                    // Output instruction.
                    let src = self.out_[curr_oind].nonzeros()[curr_nz];
                    let ae = AlgEl {
                        op: OpCode::Output,
                        i0: curr_oind as u32,
                        i1: temp[src.index()] as u32,
                        i2: curr_nz as u32,
                        d: 0.0,
                    };
                    refcount[ae.i1 as usize] += 1;
                    self.algorithm.push(ae);

                    // Go to the next nonzero.
                    curr_nz += 1;
                    if curr_nz >= self.out_[curr_oind].nnz() {
                        curr_nz = 0;
                        curr_oind += 1;
                        while curr_oind < self.out_.len() && self.out_[curr_oind].nnz() == 0 {
                            curr_oind += 1;
                        }
                    }
                }
                Some(id) => {
                    let e = SxElem(*id);
                    let pos = temp[*id as usize] as u32;
                    match arena.op(e) {
                        OpCode::Const => {
                            self.algorithm.push(AlgEl {
                                op: OpCode::Const,
                                i0: pos,
                                i1: 0,
                                i2: 0,
                                d: arena.to_double(e),
                            });
                        }
                        OpCode::Parameter => {
                            // Tentative; the input-binding post-pass may
                            // rewrite this to Input.
                            symb_loc.push((self.algorithm.len(), *id));
                            self.algorithm.push(AlgEl {
                                op: OpCode::Parameter,
                                i0: pos,
                                i1: 0,
                                i2: 0,
                                d: 0.0,
                            });
                        }
                        OpCode::Call => {
                            let f = arena.call_fn(e).clone();
                            self.call.sz_arg = self.call.sz_arg.max(f.sz_arg());
                            self.call.sz_res = self.call.sz_res.max(f.sz_res());
                            self.call.sz_iw = self.call.sz_iw.max(f.sz_iw());
                            self.call.sz_w = self.call.sz_w.max(f.sz_w());
                            self.call.sz_w_arg = self.call.sz_w_arg.max(f.nnz_in_total());
                            self.call.sz_w_res = self.call.sz_w_res.max(f.nnz_out_total());

                            let ci = self.call.nodes.len();
                            let mut node = CallNode::new(f);
                            for i in 0..node.n_dep {
                                let d = temp[arena.dep(e, i).index()] as u32;
                                node.dep[i] = d;
                                refcount[d as usize] += 1;
                            }
                            self.call.nodes.push(node);
                            self.algorithm.push(AlgEl {
                                op: OpCode::Call,
                                i0: pos,
                                i1: ci as u32,
                                i2: 0,
                                d: 0.0,
                            });
                        }
                        OpCode::FunOutput => {
                            // No instruction: mutate the already-emitted
                            // call entry's destination table.
                            let parent = arena.dep(e, 0);
                            let call_alg = alg_index[temp[parent.index()] as usize];
                            let ci = self.algorithm[call_alg].i1 as usize;
                            let oind = arena.fun_output_index(e);
                            debug_assert_eq!(
                                self.call.nodes[ci].out[oind], -1,
                                "duplicate call output extraction"
                            );
                            self.call.nodes[ci].out[oind] = pos as i32;
                            self.call.nodes[ci].out_sx[oind] = Some(e);
                        }
                        op => {
                            // Unary or binary operation.
                            let nd = opcode::ndeps(op);
                            let i1 = temp[arena.dep(e, 0).index()] as u32;
                            let i2 = temp[arena.dep(e, nd - 1).index()] as u32;
                            refcount[i1 as usize] += 1;
                            if nd == 2 {
                                refcount[i2 as usize] += 1;
                            }
                            self.algorithm.push(AlgEl {
                                op,
                                i0: pos,
                                i1,
                                i2,
                                d: 0.0,
                            });
                        }
                    }
                }
            }
        }

        // ── Live-variable register allocation ──
        let mut place = vec![usize::MAX; nodes.len()];
        let mut unused: Vec<usize> = Vec::new();
        let mut worksize = 0usize;

        for a in self.algorithm.iter_mut() {
            match a.op {
                OpCode::Output => {
                    release(a.i1 as usize, &mut refcount, &place, &mut unused);
                    a.i1 = place[a.i1 as usize] as u32;
                }
                OpCode::Const | OpCode::Parameter => {
                    a.i0 = assign(
                        a.i0 as usize,
                        live_variables,
                        &mut place,
                        &mut unused,
                        &mut worksize,
                    ) as u32;
                }
                OpCode::Call => {
                    let entry = &mut self.call.nodes[a.i1 as usize];
                    // Reverse order so the first argument ends up on top of
                    // the free stack.
                    for c in (0..entry.n_dep).rev() {
                        release(entry.dep[c] as usize, &mut refcount, &place, &mut unused);
                    }
                    for c in 0..entry.n_out {
                        if entry.out[c] < 0 {
                            continue;
                        }
                        entry.out[c] = assign(
                            entry.out[c] as usize,
                            live_variables,
                            &mut place,
                            &mut unused,
                            &mut worksize,
                        ) as i32;
                    }
                    for c in 0..entry.n_dep {
                        entry.dep[c] = place[entry.dep[c] as usize] as u32;
                    }
                }
                op => {
                    let nd = opcode::ndeps(op);
                    if nd == 2 {
                        release(a.i2 as usize, &mut refcount, &place, &mut unused);
                    }
                    release(a.i1 as usize, &mut refcount, &place, &mut unused);
                    a.i0 = assign(
                        a.i0 as usize,
                        live_variables,
                        &mut place,
                        &mut unused,
                        &mut worksize,
                    ) as u32;
                    a.i1 = place[a.i1 as usize] as u32;
                    if nd == 2 {
                        a.i2 = place[a.i2 as usize] as u32;
                    } else {
                        // Duplicate so the interpreter is branchless on arity.
                        a.i2 = a.i1;
                    }
                }
            }
        }
        self.worksize = worksize;

        if live_variables {
            debug!(
                worksize,
                nodes = nodes.len(),
                "live variables: reduced work array"
            );
        } else {
            debug!(worksize, "live variables disabled");
        }

        // ── Bind inputs ──
        // Mark each tentative Parameter's place in the algorithm, then
        // rewrite those reachable from declared inputs.
        let mut mark = vec![0i64; arena.len()];
        for &(loc, id) in &symb_loc {
            mark[id as usize] = loc as i64 + 1;
        }
        for (ind, sx) in self.in_.iter().enumerate() {
            for (nz, e) in sx.nonzeros().iter().enumerate() {
                let m = mark[e.index()];
                if m > 0 {
                    let el = &mut self.algorithm[(m - 1) as usize];
                    el.op = OpCode::Input;
                    el.i1 = ind as u32;
                    el.i2 = nz as u32;
                    mark[e.index()] = 0;
                }
            }
        }

        // Locate free variables.
        self.free_vars.clear();
        self.free_names.clear();
        for &(_, id) in &symb_loc {
            if mark[id as usize] != 0 {
                let e = SxElem(id);
                self.free_vars.push(e);
                self.free_names.push(arena.name_of(e).to_string());
                mark[id as usize] = 0;
            }
        }

        debug!(
            instructions = self.algorithm.len(),
            worksize = self.worksize,
            free_vars = self.free_vars.len(),
            "compiled"
        );
        Ok(())
    }

    // ── Accessors ──

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of inputs.
    pub fn n_in(&self) -> usize {
        self.sparsity_in.len()
    }

    /// Number of outputs.
    pub fn n_out(&self) -> usize {
        self.sparsity_out.len()
    }

    /// Sparsity of input `i`.
    pub fn sparsity_in(&self, i: usize) -> &Sparsity {
        &self.sparsity_in[i]
    }

    /// Sparsity of output `i`.
    pub fn sparsity_out(&self, i: usize) -> &Sparsity {
        &self.sparsity_out[i]
    }

    /// Nonzero count of input `i`.
    pub fn nnz_in(&self, i: usize) -> usize {
        self.sparsity_in[i].nnz()
    }

    /// Nonzero count of output `i`.
    pub fn nnz_out(&self, i: usize) -> usize {
        self.sparsity_out[i].nnz()
    }

    /// Name of input `i`.
    pub fn name_in(&self, i: usize) -> &str {
        &self.name_in[i]
    }

    /// Name of output `i`.
    pub fn name_out(&self, i: usize) -> &str {
        &self.name_out[i]
    }

    /// Default value for input `i`.
    pub fn default_in(&self, i: usize) -> f64 {
        self.default_in[i]
    }

    /// Required scratch slots in the primary work region.
    pub fn worksize(&self) -> usize {
        self.worksize
    }

    /// Required length of the `w` scratch buffer: the primary work region
    /// plus the sub-call scratch, packed-input, and packed-output regions.
    pub fn sz_w(&self) -> usize {
        self.worksize + self.call.sz_w + self.call.sz_w_arg + self.call.sz_w_res
    }

    /// Required length of the `iw` scratch buffer.
    pub fn sz_iw(&self) -> usize {
        self.call.sz_iw
    }

    /// Required argument-table capacity for a caller embedding this
    /// function in a larger runtime.
    pub fn sz_arg(&self) -> usize {
        self.n_in() + self.call.sz_arg
    }

    /// Required result-table capacity.
    pub fn sz_res(&self) -> usize {
        self.n_out() + self.call.sz_res
    }

    /// Symbolic leaves not bound by any declared input.
    pub fn free_vars(&self) -> &[SxElem] {
        &self.free_vars
    }

    /// Display names of the free variables.
    pub fn free_names(&self) -> &[String] {
        &self.free_names
    }

    /// True iff no instruction is a non-smooth operation.
    pub fn is_smooth(&self) -> bool {
        self.algorithm
            .iter()
            .filter(|a| {
                !matches!(
                    a.op,
                    OpCode::Input | OpCode::Output | OpCode::Const | OpCode::Parameter
                )
            })
            .all(|a| opcode::is_smooth_op(a.op))
    }

    /// The compiled instruction stream.
    pub fn algorithm(&self) -> &[AlgEl] {
        &self.algorithm
    }

    // ── Instruction introspection ──

    /// Number of compiled instructions.
    pub fn n_instructions(&self) -> usize {
        self.algorithm.len()
    }

    /// Opcode of instruction `k`.
    pub fn instruction_id(&self, k: usize) -> OpCode {
        self.algorithm[k].op
    }

    /// Constant of instruction `k` (meaningful for `Const`).
    pub fn instruction_constant(&self, k: usize) -> f64 {
        self.algorithm[k].d
    }

    /// Input positions of instruction `k`.
    pub fn instruction_input(&self, k: usize) -> Vec<i64> {
        let a = &self.algorithm[k];
        match a.op {
            OpCode::Input => vec![a.i1 as i64, a.i2 as i64],
            OpCode::Output => vec![a.i1 as i64],
            OpCode::Const | OpCode::Parameter => vec![],
            OpCode::Call => self.call.nodes[a.i1 as usize]
                .dep
                .iter()
                .map(|&s| s as i64)
                .collect(),
            op if opcode::ndeps(op) == 1 => vec![a.i1 as i64],
            _ => vec![a.i1 as i64, a.i2 as i64],
        }
    }

    /// Output positions of instruction `k`.
    pub fn instruction_output(&self, k: usize) -> Vec<i64> {
        let a = &self.algorithm[k];
        match a.op {
            OpCode::Output => vec![a.i0 as i64, a.i2 as i64],
            OpCode::Call => self.call.nodes[a.i1 as usize]
                .out
                .iter()
                .map(|&s| s as i64)
                .collect(),
            _ => vec![a.i0 as i64],
        }
    }

    // ── Display ──

    /// Render the algorithm, one line per instruction. Temporaries print as
    /// `@k`, outputs as `output[i][j] = @k`.
    pub fn disp(&self) -> Result<String, Interrupted> {
        let mut s = String::from("Algorithm:");
        let mut p_it = self.free_names.iter();
        for a in &self.algorithm {
            InterruptHandler::check()?;
            s.push('\n');
            match a.op {
                OpCode::Output => {
                    s.push_str(&format!("output[{}][{}] = @{}", a.i0, a.i2, a.i1));
                }
                OpCode::Call => {
                    let m = &self.call.nodes[a.i1 as usize];
                    let outs: Vec<String> = m.out.iter().map(|o| format!("@{}", o)).collect();
                    let deps: Vec<String> = m.dep.iter().map(|d| format!("@{}", d)).collect();
                    s.push_str(&format!(
                        "[{}] = {}({})",
                        outs.join(","),
                        m.fname,
                        deps.join(",")
                    ));
                }
                OpCode::Input => {
                    s.push_str(&format!("@{} = input[{}][{}]", a.i0, a.i1, a.i2));
                }
                OpCode::Const => {
                    s.push_str(&format!("@{} = {}", a.i0, a.d));
                }
                OpCode::Parameter => {
                    let name = p_it.next().map(|n| n.as_str()).unwrap_or("?");
                    s.push_str(&format!("@{} = {}", a.i0, name));
                }
                op => {
                    let a1 = format!("@{}", a.i1);
                    let a2 = format!("@{}", a.i2);
                    s.push_str(&format!("@{} = {}", a.i0, opcode::print(op, &a1, &a2)));
                }
            }
            s.push(';');
        }
        Ok(s)
    }

    // ── Shared sweep helpers ──

    pub(crate) fn check_attached(&self) -> Result<(), EvalError> {
        if self.detached {
            Err(EvalError::Detached)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_no_free_vars(&self) -> Result<(), EvalError> {
        // Checked via the captured names, which survive deserialization.
        if self.free_names.is_empty() {
            Ok(())
        } else {
            Err(EvalError::FreeVariables(self.free_names.clone()))
        }
    }

    /// Check seed direction shapes and project any seed whose sparsity does
    /// not match the declared pattern.
    pub(crate) fn project_seed_dirs(
        &self,
        arena: &mut SxArena,
        seed: &[Vec<Sx>],
        patterns: &[Sparsity],
    ) -> Result<Vec<Vec<Sx>>, EvalError> {
        let mut out = Vec::with_capacity(seed.len());
        for dir in seed {
            if dir.len() != patterns.len() {
                return Err(EvalError::SeedCount {
                    expected: patterns.len(),
                    got: dir.len(),
                });
            }
            let mut row = Vec::with_capacity(dir.len());
            for (s, sp) in dir.iter().zip(patterns.iter()) {
                if s.sparsity() == sp {
                    row.push(s.clone());
                } else {
                    row.push(s.project(arena, sp));
                }
            }
            out.push(row);
        }
        Ok(out)
    }

    /// Build the tape of local partial derivatives, one entry per
    /// operation. Call entries record the original call expression in the
    /// first component.
    pub(crate) fn partials_tape(&self, arena: &mut SxArena) -> Vec<[SxElem; 2]> {
        let zero = arena.zero();
        let mut tape = Vec::with_capacity(self.operations.len());
        let mut b_it = 0usize;
        for a in &self.algorithm {
            match a.op {
                OpCode::Input | OpCode::Output | OpCode::Const | OpCode::Parameter => {}
                OpCode::Call => {
                    let f = self.operations[b_it];
                    b_it += 1;
                    tape.push([f, zero]);
                }
                op => {
                    let f = self.operations[b_it];
                    b_it += 1;
                    let x = arena.dep(f, 0);
                    let y = arena.dep(f, opcode::ndeps(op) - 1);
                    let (d0, d1) = arena.der(op, x, y, f);
                    tape.push([d0, d1]);
                }
            }
        }
        tape
    }
}

impl fmt::Debug for SxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SxFunction")
            .field("name", &self.name)
            .field("n_in", &self.n_in())
            .field("n_out", &self.n_out())
            .field("n_instructions", &self.algorithm.len())
            .field("worksize", &self.worksize)
            .finish()
    }
}

/// Iterative depth-first post-order traversal from `start`.
///
/// Children are visited left to right; a node is emitted after all of its
/// dependencies. Already-visited nodes are shared by position.
fn sort_depth_first(
    arena: &SxArena,
    start: SxElem,
    visited: &mut [bool],
    nodes: &mut Vec<Option<u32>>,
) {
    if visited[start.index()] {
        return;
    }
    visited[start.index()] = true;
    let mut stack: Vec<(SxElem, usize)> = vec![(start, 0)];
    while let Some((e, cursor)) = stack.pop() {
        if cursor < arena.ndeps_of(e) {
            stack.push((e, cursor + 1));
            let child = arena.dep(e, cursor);
            if !visited[child.index()] {
                visited[child.index()] = true;
                stack.push((child, 0));
            }
        } else {
            nodes.push(Some(e.0));
        }
    }
}

/// Drop one reference to the child at node position `ch`; push its slot on
/// the free stack when the count reaches zero.
fn release(ch: usize, refcount: &mut [usize], place: &[usize], unused: &mut Vec<usize>) {
    refcount[ch] -= 1;
    if refcount[ch] == 0 {
        unused.push(place[ch]);
    }
}

/// Find a work-vector slot for the node at position `pos`: reuse the most
/// recently freed slot when allowed, else grow the work vector.
fn assign(
    pos: usize,
    live: bool,
    place: &mut [usize],
    unused: &mut Vec<usize>,
    worksize: &mut usize,
) -> usize {
    let slot = match if live { unused.pop() } else { None } {
        Some(s) => s,
        None => {
            let s = *worksize;
            *worksize += 1;
            s
        }
    };
    place[pos] = slot;
    slot
}
