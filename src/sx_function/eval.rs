//! Double-precision dispatch.

use crate::error::EvalError;
use crate::opcode::{self, OpCode};

impl super::SxFunction {
    /// Evaluate the algorithm over caller-provided buffers.
    ///
    /// `arg[i]` supplies the nonzeros of input `i`; a missing input reads
    /// as zero. `res[i]` receives the nonzeros of output `i`; a missing
    /// output skips the store. `iw` and `w` are scratch of at least
    /// [`sz_iw`](Self::sz_iw) / [`sz_w`](Self::sz_w) entries. All mutable
    /// state lives in these buffers, so concurrent evaluations with
    /// separate scratch are safe.
    pub fn eval(
        &self,
        arg: &[Option<&[f64]>],
        res: &mut [Option<&mut [f64]>],
        iw: &mut [i64],
        w: &mut [f64],
    ) -> Result<(), EvalError> {
        self.check_no_free_vars()?;
        assert_eq!(arg.len(), self.n_in(), "wrong number of input buffers");
        assert_eq!(res.len(), self.n_out(), "wrong number of output buffers");
        assert!(w.len() >= self.sz_w(), "work buffer too small");
        assert!(iw.len() >= self.sz_iw(), "integer work buffer too small");

        for a in &self.algorithm {
            match a.op {
                OpCode::Const => w[a.i0 as usize] = a.d,
                OpCode::Input => {
                    w[a.i0 as usize] = match arg[a.i1 as usize] {
                        Some(v) => v[a.i2 as usize],
                        None => 0.0,
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
                    // Sub-call scratch, packed-input, and packed-output
                    // regions live past the primary work region.
                    let (w_main, w_ext) = w.split_at_mut(self.worksize);
                    let (w_f, w_pack) = w_ext.split_at_mut(self.call.sz_w);
                    let (w_arg, w_res) = w_pack.split_at_mut(self.call.sz_w_arg);
                    for i in 0..m.n_dep {
                        w_arg[i] = w_main[m.dep[i] as usize];
                    }
                    f.eval(&w_arg[..m.n_dep], &mut w_res[..m.n_out], iw, w_f)?;
                    for i in 0..m.n_out {
                        if m.out[i] >= 0 {
                            w_main[m.out[i] as usize] = w_res[i];
                        }
                    }
                }
                OpCode::Parameter | OpCode::FunOutput => {
                    return Err(EvalError::UnknownOp(a.op));
                }
                op => {
                    w[a.i0 as usize] =
                        opcode::eval_binary(op, w[a.i1 as usize], w[a.i2 as usize]);
                }
            }
        }
        Ok(())
    }

    /// Evaluate with internally allocated buffers, returning the output
    /// nonzeros per output.
    pub fn call_numeric(&self, args: &[&[f64]]) -> Result<Vec<Vec<f64>>, EvalError> {
        assert_eq!(args.len(), self.n_in(), "wrong number of arguments");
        for (i, a) in args.iter().enumerate() {
            assert_eq!(a.len(), self.nnz_in(i), "argument {} has wrong length", i);
        }

        let mut out: Vec<Vec<f64>> = (0..self.n_out())
            .map(|i| vec![0.0; self.nnz_out(i)])
            .collect();
        let mut iw = vec![0i64; self.sz_iw()];
        let mut w = vec![0.0; self.sz_w()];

        let arg: Vec<Option<&[f64]>> = args.iter().map(|a| Some(*a)).collect();
        {
            let mut res: Vec<Option<&mut [f64]>> =
                out.iter_mut().map(|o| Some(o.as_mut_slice())).collect();
            self.eval(&arg, &mut res, &mut iw, &mut w)?;
        }
        Ok(out)
    }
}
