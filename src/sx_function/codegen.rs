//! Source emission for the compiled algorithm.
//!
//! Two renderings of the same instruction stream: a matrix-language body
//! (MATLAB/Octave, element-wise operators, `w{k}` variables) and a C-like
//! body suitable for compilation against a runtime providing `arg`, `res`,
//! `iw`, and `w`. Both require the function to have no free variables.

use std::fmt::Write;

use crate::error::CodegenError;
use crate::opcode::{self, OpCode};

use super::{OptValue, Options, SxFunction};

impl SxFunction {
    /// Emit the algorithm body in a matrix language.
    ///
    /// Supported `lang`: `"matlab"`. Recognized option: `indent_level`
    /// (integer). Sub-calls cannot be expressed in this target.
    pub fn export_code(
        &self,
        lang: &str,
        out: &mut impl Write,
        options: &Options,
    ) -> Result<(), CodegenError> {
        if lang != "matlab" {
            return Err(CodegenError::UnsupportedLanguage(lang.to_string()));
        }
        if !self.free_names.is_empty() {
            return Err(CodegenError::FreeVariables(self.free_names.clone()));
        }

        let mut indent_level = 0i64;
        for (key, value) in options.iter() {
            match (key, value) {
                ("indent_level", OptValue::Int(v)) => indent_level = *v,
                _ => return Err(CodegenError::UnknownOption(key.to_string())),
            }
        }
        let indent = "  ".repeat(indent_level.max(0) as usize);

        // Non-cell aliases for inputs.
        for i in 0..self.n_in() {
            writeln!(
                out,
                "{}argin_{} = nonzeros_gen(varargin{{{}}});",
                indent,
                i,
                i + 1
            )?;
        }

        for k in 0..self.n_instructions() {
            let op = self.instruction_id(k);
            let o = self.instruction_output(k);
            let i = self.instruction_input(k);
            match op {
                OpCode::Input => {
                    writeln!(out, "{}w{} = argin_{}({});", indent, o[0], i[0], i[1] + 1)?;
                }
                OpCode::Output => {
                    writeln!(out, "{}argout_{}{{{}}} = w{};", indent, o[0], o[1] + 1, i[0])?;
                }
                OpCode::Const => {
                    writeln!(
                        out,
                        "{}w{} = {:.16e};",
                        indent,
                        o[0],
                        self.instruction_constant(k)
                    )?;
                }
                OpCode::Call => return Err(CodegenError::CallUnsupported),
                OpCode::Sq => {
                    writeln!(out, "{}w{} = w{}^2;", indent, o[0], i[0])?;
                }
                OpCode::Fabs => {
                    writeln!(out, "{}w{} = abs(w{});", indent, o[0], i[0])?;
                }
                OpCode::Pow => {
                    writeln!(out, "{}w{} = w{}.^w{};", indent, o[0], i[0], i[1])?;
                }
                OpCode::Not => {
                    writeln!(out, "{}w{} = ~w{};", indent, o[0], i[0])?;
                }
                OpCode::Or => {
                    writeln!(out, "{}w{} = w{} | w{};", indent, o[0], i[0], i[1])?;
                }
                OpCode::And => {
                    writeln!(out, "{}w{} = w{} & w{};", indent, o[0], i[0], i[1])?;
                }
                OpCode::Ne => {
                    writeln!(out, "{}w{} = w{} ~= w{};", indent, o[0], i[0], i[1])?;
                }
                OpCode::IfElseZero => {
                    writeln!(
                        out,
                        "{}w{} = if_else_zero_gen(w{}, w{});",
                        indent, o[0], i[0], i[1]
                    )?;
                }
                op => {
                    let a1 = format!("w{}", i[0]);
                    let a2 = if i.len() > 1 {
                        format!("w{}", i[1])
                    } else {
                        String::new()
                    };
                    writeln!(
                        out,
                        "{}w{} = {};",
                        indent,
                        o[0],
                        opcode::print(op, &a1, &a2)
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Emit the algorithm body as C statements over `arg`, `res`, `iw`,
    /// and `w`.
    ///
    /// Sub-calls gather into and scatter from the packed regions past the
    /// primary work vector; each used call output is stored by one guarded
    /// statement.
    pub fn codegen_body(&self, out: &mut impl Write) -> Result<(), CodegenError> {
        if !self.free_names.is_empty() {
            return Err(CodegenError::FreeVariables(self.free_names.clone()));
        }

        for a in &self.algorithm {
            match a.op {
                OpCode::Output => {
                    writeln!(
                        out,
                        "if (res[{}]!=0) res[{}][{}]=w[{}];",
                        a.i0, a.i0, a.i2, a.i1
                    )?;
                }
                OpCode::Call => {
                    let m = &self.call.nodes[a.i1 as usize];
                    // Pointer tables into the packed regions.
                    let mut offset = self.worksize + self.call.sz_w;
                    for (i, nnz) in m.f_nnz_in.iter().enumerate() {
                        writeln!(out, "arg[{}]=w+{};", self.n_in() + i, offset)?;
                        offset += nnz;
                    }
                    let mut offset = self.worksize + self.call.sz_w + self.call.sz_w_arg;
                    for (i, nnz) in m.f_nnz_out.iter().enumerate() {
                        writeln!(out, "res[{}]=w+{};", self.n_out() + i, offset)?;
                        offset += nnz;
                    }
                    // Gather, call, scatter.
                    for (i, dep) in m.dep.iter().enumerate() {
                        writeln!(
                            out,
                            "w[{}] = w[{}];",
                            i + self.worksize + self.call.sz_w,
                            dep
                        )?;
                    }
                    writeln!(
                        out,
                        "if ({}(arg+{}, res+{}, iw, w+{})) return 1;",
                        m.fname,
                        self.n_in(),
                        self.n_out(),
                        self.worksize
                    )?;
                    let res_base = self.worksize + self.call.sz_w + self.call.sz_w_arg;
                    for (i, o) in m.out.iter().enumerate() {
                        if *o >= 0 {
                            writeln!(out, "w[{}] = w[{}];", o, i + res_base)?;
                        }
                    }
                }
                OpCode::Const => {
                    writeln!(out, "w[{}]={:.16e};", a.i0, a.d)?;
                }
                OpCode::Input => {
                    writeln!(
                        out,
                        "w[{}]=arg[{}] ? arg[{}][{}] : 0;",
                        a.i0, a.i1, a.i1, a.i2
                    )?;
                }
                OpCode::Parameter | OpCode::FunOutput => unreachable!(),
                op => {
                    let a1 = format!("w[{}]", a.i1);
                    let a2 = format!("w[{}]", a.i2);
                    writeln!(out, "w[{}]={};", a.i0, opcode::print(op, &a1, &a2))?;
                }
            }
        }
        Ok(())
    }
}
