//! Reverse-mode algorithmic differentiation.

use tracing::debug;

use crate::arena::{SxArena, SxElem};
use crate::error::EvalError;
use crate::opcode::{self, OpCode};
use crate::sx::Sx;

impl super::SxFunction {
    /// Propagate adjoint seeds backward through the algorithm.
    ///
    /// `aseed[dir][o]` seeds output `o` in direction `dir`; the result
    /// `asens[dir][i]` is the adjoint of input `i`. Seeds whose sparsity
    /// does not match the declared output pattern are projected first.
    ///
    /// The tape of local partials is built by a forward walk, then each
    /// direction sweeps the instruction stream in reverse, clearing each
    /// seed slot as it is consumed. Sub-calls go through the callee's
    /// reverse derivative function with the nominal arguments followed by
    /// the output adjoints.
    pub fn ad_reverse(
        &self,
        arena: &mut SxArena,
        aseed: &[Vec<Sx>],
    ) -> Result<Vec<Vec<Sx>>, EvalError> {
        self.check_attached()?;
        let nadj = aseed.len();
        if nadj == 0 {
            return Ok(Vec::new());
        }
        debug!(function = self.name(), directions = nadj, "reverse sweep");

        let aseed = self.project_seed_dirs(arena, aseed, &self.sparsity_out)?;

        let tape = self.partials_tape(arena);
        let zero = arena.zero();

        let mut asens = Vec::with_capacity(nadj);
        for dir in &aseed {
            let mut w = vec![zero; self.worksize];
            let mut in_nz: Vec<Vec<SxElem>> = self
                .sparsity_in
                .iter()
                .map(|sp| vec![zero; sp.nnz()])
                .collect();
            let mut it2 = tape.len();

            for a in self.algorithm.iter().rev() {
                match a.op {
                    OpCode::Input => {
                        // Now a sink: store the accumulated adjoint.
                        in_nz[a.i1 as usize][a.i2 as usize] = w[a.i0 as usize];
                        w[a.i0 as usize] = zero;
                    }
                    OpCode::Output => {
                        // Now a source: inject the seed.
                        let s = dir[a.i0 as usize].nonzeros()[a.i2 as usize];
                        w[a.i1 as usize] = arena.add(w[a.i1 as usize], s);
                    }
                    OpCode::Const | OpCode::Parameter => {
                        w[a.i0 as usize] = zero;
                    }
                    OpCode::Call => {
                        it2 -= 1;
                        let m = &self.call.nodes[a.i1 as usize];
                        let orig = tape[it2][0];
                        let fr = m.fun()?.reverse()?;
                        // Nominal inputs, then one adjoint per output
                        // (zero for outputs unused downstream). Consumed
                        // seeds are cleared.
                        let mut deps = Vec::with_capacity(m.n_dep + m.n_out);
                        for i in 0..m.n_dep {
                            deps.push(arena.dep(orig, i));
                        }
                        for i in 0..m.n_out {
                            if m.out[i] >= 0 {
                                deps.push(w[m.out[i] as usize]);
                                w[m.out[i] as usize] = zero;
                            } else {
                                deps.push(zero);
                            }
                        }
                        let ret = arena.call(fr, deps);
                        for i in 0..m.n_dep {
                            let d = m.dep[i] as usize;
                            w[d] = arena.add(w[d], ret[i]);
                        }
                    }
                    op => {
                        it2 -= 1;
                        let [d0, d1] = tape[it2];
                        let seed = w[a.i0 as usize];
                        w[a.i0 as usize] = zero;
                        let t0 = arena.mul(d0, seed);
                        w[a.i1 as usize] = arena.add(w[a.i1 as usize], t0);
                        if opcode::ndeps(op) == 2 {
                            let t1 = arena.mul(d1, seed);
                            w[a.i2 as usize] = arena.add(w[a.i2 as usize], t1);
                        }
                    }
                }
            }

            asens.push(
                in_nz
                    .into_iter()
                    .zip(self.sparsity_in.iter())
                    .map(|(nz, sp)| Sx::from_nonzeros(sp.clone(), nz))
                    .collect(),
            );
        }
        Ok(asens)
    }
}
