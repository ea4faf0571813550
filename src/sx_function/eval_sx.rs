//! Symbolic dispatch with common-subexpression reuse.

use tracing::debug;

use crate::arena::{SxArena, SxElem};
use crate::error::EvalError;
use crate::opcode::{self, OpCode};
use crate::sx::Sx;

/// Structural-equality depth for duplicate detection. A higher depth could
/// give more sharing at more comparison cost.
const DUP_DEPTH: usize = 2;

impl super::SxFunction {
    /// Run the algorithm on symbolic arguments.
    ///
    /// Each arithmetic result is compared (up to depth 2) against the
    /// original subexpression used to define the algorithm; on a match the
    /// original handle is reused, preserving sharing across re-evaluations.
    /// A call whose arguments all match the original invocation reuses the
    /// original per-output expressions instead of creating a new call node.
    pub fn eval_sx(&self, arena: &mut SxArena, args: &[Sx]) -> Result<Vec<Sx>, EvalError> {
        self.check_attached()?;
        if args.len() != self.n_in() {
            return Err(EvalError::SeedCount {
                expected: self.n_in(),
                got: args.len(),
            });
        }
        debug!(function = self.name(), "evaluating symbolically");

        // Project arguments onto the declared input sparsities.
        let args: Vec<Sx> = args
            .iter()
            .zip(self.sparsity_in.iter())
            .map(|(a, sp)| {
                if a.sparsity() == sp {
                    a.clone()
                } else {
                    a.project(arena, sp)
                }
            })
            .collect();

        let zero = arena.zero();
        let mut w = vec![zero; self.worksize];
        let mut out_nz: Vec<Vec<SxElem>> = self
            .sparsity_out
            .iter()
            .map(|sp| vec![zero; sp.nnz()])
            .collect();

        // Parallel cursors into the constants, operations, and free
        // variables recorded at compile time.
        let mut c_it = 0usize;
        let mut b_it = 0usize;
        let mut p_it = 0usize;

        for a in &self.algorithm {
            match a.op {
                OpCode::Input => {
                    w[a.i0 as usize] = args[a.i1 as usize].nonzeros()[a.i2 as usize];
                }
                OpCode::Output => {
                    out_nz[a.i0 as usize][a.i2 as usize] = w[a.i1 as usize];
                }
                OpCode::Const => {
                    w[a.i0 as usize] = self.constants[c_it];
                    c_it += 1;
                }
                OpCode::Parameter => {
                    w[a.i0 as usize] = self.free_vars[p_it];
                    p_it += 1;
                }
                OpCode::Call => {
                    let m = &self.call.nodes[a.i1 as usize];
                    let orig = self.operations[b_it];
                    b_it += 1;

                    let identical = (0..m.n_dep).all(|i| {
                        arena.is_equal(w[m.dep[i] as usize], arena.dep(orig, i), DUP_DEPTH)
                    });
                    let ret: Vec<SxElem> = if identical {
                        (0..m.n_out)
                            .map(|i| match m.out_sx[i] {
                                Some(e) if !arena.is_constant(e) => e,
                                _ => arena.fun_output(orig, i),
                            })
                            .collect()
                    } else {
                        let f = m.fun()?.clone();
                        let deps: Vec<SxElem> =
                            m.dep.iter().map(|&d| w[d as usize]).collect();
                        arena.call(f, deps)
                    };
                    for i in 0..m.n_out {
                        if m.out[i] >= 0 {
                            w[m.out[i] as usize] = ret[i];
                        }
                    }
                }
                op => {
                    // Build into a temporary first, as the result may
                    // overwrite one of its own operands in the work vector.
                    let f = arena.apply(op, w[a.i1 as usize], w[a.i2 as usize]);
                    let f = arena.assign_if_duplicate(f, self.operations[b_it], DUP_DEPTH);
                    b_it += 1;
                    w[a.i0 as usize] = f;
                }
            }
        }

        Ok(out_nz
            .into_iter()
            .zip(self.sparsity_out.iter())
            .map(|(nz, sp)| Sx::from_nonzeros(sp.clone(), nz))
            .collect())
    }
}
