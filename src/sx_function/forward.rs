//! Forward-mode algorithmic differentiation.

use tracing::debug;

use crate::arena::{SxArena, SxElem};
use crate::error::EvalError;
use crate::opcode::{self, OpCode};
use crate::sx::Sx;

impl super::SxFunction {
    /// Propagate forward seeds through the algorithm.
    ///
    /// `fseed[dir][i]` seeds input `i` in direction `dir`; the result
    /// `fsens[dir][o]` is the tangent of output `o`. Seeds whose sparsity
    /// does not match the declared input pattern are projected first.
    ///
    /// One shared tape of local partial derivatives is built, then each
    /// direction is a single linear sweep. Sub-calls are differentiated by
    /// invoking the callee's forward derivative function symbolically with
    /// the nominal arguments followed by the dot arguments.
    pub fn ad_forward(
        &self,
        arena: &mut SxArena,
        fseed: &[Vec<Sx>],
    ) -> Result<Vec<Vec<Sx>>, EvalError> {
        self.check_attached()?;
        let nfwd = fseed.len();
        if nfwd == 0 {
            return Ok(Vec::new());
        }
        debug!(function = self.name(), directions = nfwd, "forward sweep");

        let fseed = self.project_seed_dirs(arena, fseed, &self.sparsity_in)?;

        let tape = self.partials_tape(arena);
        let zero = arena.zero();

        let mut fsens = Vec::with_capacity(nfwd);
        for dir in &fseed {
            let mut w = vec![zero; self.worksize];
            let mut out_nz: Vec<Vec<SxElem>> = self
                .sparsity_out
                .iter()
                .map(|sp| vec![zero; sp.nnz()])
                .collect();
            let mut it2 = 0usize;

            for a in &self.algorithm {
                match a.op {
                    OpCode::Input => {
                        w[a.i0 as usize] = dir[a.i1 as usize].nonzeros()[a.i2 as usize];
                    }
                    OpCode::Output => {
                        out_nz[a.i0 as usize][a.i2 as usize] = w[a.i1 as usize];
                    }
                    OpCode::Const | OpCode::Parameter => {
                        w[a.i0 as usize] = zero;
                    }
                    OpCode::Call => {
                        let m = &self.call.nodes[a.i1 as usize];
                        let orig = tape[it2][0];
                        it2 += 1;
                        let ff = m.fun()?.forward()?;
                        // Nominal inputs from the recorded call, then the
                        // dot inputs from the work vector.
                        let mut deps = Vec::with_capacity(2 * m.n_dep);
                        for i in 0..m.n_dep {
                            deps.push(arena.dep(orig, i));
                        }
                        for i in 0..m.n_dep {
                            deps.push(w[m.dep[i] as usize]);
                        }
                        let ret = arena.call(ff, deps);
                        for i in 0..m.n_out {
                            if m.out[i] >= 0 {
                                w[m.out[i] as usize] = ret[i];
                            }
                        }
                    }
                    op => {
                        let [d0, d1] = tape[it2];
                        it2 += 1;
                        let mut acc = arena.mul(d0, w[a.i1 as usize]);
                        if opcode::ndeps(op) == 2 {
                            let t = arena.mul(d1, w[a.i2 as usize]);
                            acc = arena.add(acc, t);
                        }
                        w[a.i0 as usize] = acc;
                    }
                }
            }

            fsens.push(
                out_nz
                    .into_iter()
                    .zip(self.sparsity_out.iter())
                    .map(|(nz, sp)| Sx::from_nonzeros(sp.clone(), nz))
                    .collect(),
            );
        }
        Ok(fsens)
    }
}
