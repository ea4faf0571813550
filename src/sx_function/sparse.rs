//! Bit-pattern (structural dependency) propagation.
//!
//! Scalars are replaced with 64-bit dependency masks and every arithmetic
//! operation degenerates to a bitwise OR, so one sweep deduces which
//! outputs structurally depend on which flagged inputs.

use crate::error::EvalError;
use crate::opcode::OpCode;

impl super::SxFunction {
    /// Propagate dependency bits from inputs to outputs.
    pub fn sp_forward(
        &self,
        arg: &[Option<&[u64]>],
        res: &mut [Option<&mut [u64]>],
        iw: &mut [i64],
        w: &mut [u64],
    ) -> Result<(), EvalError> {
        assert_eq!(arg.len(), self.n_in(), "wrong number of input buffers");
        assert_eq!(res.len(), self.n_out(), "wrong number of output buffers");
        assert!(w.len() >= self.sz_w(), "work buffer too small");

        for a in &self.algorithm {
            match a.op {
                OpCode::Const | OpCode::Parameter => w[a.i0 as usize] = 0,
                OpCode::Input => {
                    w[a.i0 as usize] = match arg[a.i1 as usize] {
                        Some(v) => v[a.i2 as usize],
                        None => 0,
                    };
                }
                OpCode::Output => {
                    if let Some(r) = res[a.i0 as usize].as_deref_mut() {
                        r[a.i2 as usize] = w[a.i1 as usize];
                    }
                }
                OpCode::Call => {
                    let m = &self.call.nodes[a.i1 as usize];
                    let f = m.fun()?;
                    let (w_main, w_ext) = w.split_at_mut(self.worksize);
                    let (w_f, w_pack) = w_ext.split_at_mut(self.call.sz_w);
                    let (w_arg, w_res) = w_pack.split_at_mut(self.call.sz_w_arg);
                    for i in 0..m.n_dep {
                        w_arg[i] = w_main[m.dep[i] as usize];
                    }
                    f.sp_forward(&w_arg[..m.n_dep], &mut w_res[..m.n_out], iw, w_f)?;
                    for i in 0..m.n_out {
                        if m.out[i] >= 0 {
                            w_main[m.out[i] as usize] = w_res[i];
                        }
                    }
                }
                OpCode::FunOutput => return Err(EvalError::UnknownOp(a.op)),
                _ => {
                    // Unary or binary operation: union of the operands.
                    w[a.i0 as usize] = w[a.i1 as usize] | w[a.i2 as usize];
                }
            }
        }
        Ok(())
    }

    /// Propagate dependency bits from outputs back to inputs.
    ///
    /// Seeds in `res` are consumed (zeroed); dependencies accumulate onto
    /// `arg` with OR.
    pub fn sp_reverse(
        &self,
        arg: &mut [Option<&mut [u64]>],
        res: &mut [Option<&mut [u64]>],
        iw: &mut [i64],
        w: &mut [u64],
    ) -> Result<(), EvalError> {
        assert_eq!(arg.len(), self.n_in(), "wrong number of input buffers");
        assert_eq!(res.len(), self.n_out(), "wrong number of output buffers");
        assert!(w.len() >= self.sz_w(), "work buffer too small");

        let sz_w = self.sz_w();
        for x in w[..sz_w].iter_mut() {
            *x = 0;
        }

        for a in self.algorithm.iter().rev() {
            match a.op {
                OpCode::Const | OpCode::Parameter => w[a.i0 as usize] = 0,
                OpCode::Input => {
                    if let Some(v) = arg[a.i1 as usize].as_deref_mut() {
                        v[a.i2 as usize] |= w[a.i0 as usize];
                    }
                    w[a.i0 as usize] = 0;
                }
                OpCode::Output => {
                    if let Some(r) = res[a.i0 as usize].as_deref_mut() {
                        w[a.i1 as usize] |= r[a.i2 as usize];
                        r[a.i2 as usize] = 0;
                    }
                }
                OpCode::Call => {
                    let m = &self.call.nodes[a.i1 as usize];
                    let f = m.fun()?;
                    let (w_main, w_ext) = w.split_at_mut(self.worksize);
                    let (w_f, w_pack) = w_ext.split_at_mut(self.call.sz_w);
                    let (w_arg, w_res) = w_pack.split_at_mut(self.call.sz_w_arg);
                    for x in w_arg[..m.n_dep].iter_mut() {
                        *x = 0;
                    }
                    for i in 0..m.n_out {
                        w_res[i] = if m.out[i] >= 0 {
                            w_main[m.out[i] as usize]
                        } else {
                            0
                        };
                    }
                    f.sp_reverse(&mut w_arg[..m.n_dep], &mut w_res[..m.n_out], iw, w_f)?;
                    for i in 0..m.n_out {
                        if m.out[i] >= 0 {
                            w_main[m.out[i] as usize] = 0;
                        }
                    }
                    for i in 0..m.n_dep {
                        w_main[m.dep[i] as usize] |= w_arg[i];
                    }
                }
                OpCode::FunOutput => return Err(EvalError::UnknownOp(a.op)),
                _ => {
                    let seed = w[a.i0 as usize];
                    w[a.i0 as usize] = 0;
                    w[a.i1 as usize] |= seed;
                    w[a.i2 as usize] |= seed;
                }
            }
        }
        Ok(())
    }
}
