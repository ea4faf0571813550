//! Serialization of the compile result.
//!
//! The structural core — instruction stream, work size, call table, size
//! maxima, sparsities, defaults — is serialized key by key with stable
//! field tags. Arena-relative symbolic handles (`operations`, `constants`,
//! the cached call output expressions) cannot cross serialization; a
//! deserialized function is *detached*: numeric evaluation is bitwise
//! identical and sparsity propagation, introspection, and code emission all
//! work, but symbolic sweeps report an error.
//!
//! Call nodes persist their function name and slot bindings only. After
//! deserialization, [`SxFunction::finalize`] re-binds handles from a
//! registry of externally reconstructed functions.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FinalizeError;
use crate::function::Function;
use crate::sparsity::Sparsity;

use super::{AlgEl, CallInfo, CallNode, SxFunction};

#[derive(Serialize, Deserialize)]
struct CallNodeData {
    f: String,
    dep: Vec<u32>,
    out: Vec<i32>,
    f_nnz_in: Vec<usize>,
    f_nnz_out: Vec<usize>,
}

impl Serialize for SxFunction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let call_nodes: Vec<CallNodeData> = self
            .call
            .nodes
            .iter()
            .map(|n| CallNodeData {
                f: n.fname.clone(),
                dep: n.dep.clone(),
                out: n.out.clone(),
                f_nnz_in: n.f_nnz_in.clone(),
                f_nnz_out: n.f_nnz_out.clone(),
            })
            .collect();

        let mut s = serializer.serialize_struct("SxFunction", 16)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("n_instr", &self.algorithm.len())?;
        s.serialize_field("worksize", &self.worksize)?;
        s.serialize_field("free_vars", &self.free_names)?;
        s.serialize_field("default_in", &self.default_in)?;
        s.serialize_field("call_sz_arg", &self.call.sz_arg)?;
        s.serialize_field("call_sz_res", &self.call.sz_res)?;
        s.serialize_field("call_sz_iw", &self.call.sz_iw)?;
        s.serialize_field("call_sz_w", &self.call.sz_w)?;
        s.serialize_field("call_sz_w_arg", &self.call.sz_w_arg)?;
        s.serialize_field("call_sz_w_res", &self.call.sz_w_res)?;
        s.serialize_field("call_nodes", &call_nodes)?;
        s.serialize_field("algorithm", &self.algorithm)?;
        s.serialize_field("in", &self.sparsity_in)?;
        s.serialize_field("out", &self.sparsity_out)?;
        s.serialize_field("io_names", &(&self.name_in, &self.name_out))?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for SxFunction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct FunctionData {
            name: String,
            n_instr: usize,
            worksize: usize,
            free_vars: Vec<String>,
            default_in: Vec<f64>,
            call_sz_arg: usize,
            call_sz_res: usize,
            call_sz_iw: usize,
            call_sz_w: usize,
            call_sz_w_arg: usize,
            call_sz_w_res: usize,
            call_nodes: Vec<CallNodeData>,
            algorithm: Vec<AlgEl>,
            #[serde(rename = "in")]
            sparsity_in: Vec<Sparsity>,
            #[serde(rename = "out")]
            sparsity_out: Vec<Sparsity>,
            io_names: (Vec<String>, Vec<String>),
        }

        let data = FunctionData::deserialize(deserializer)?;
        if data.algorithm.len() != data.n_instr {
            return Err(serde::de::Error::custom("instruction count mismatch"));
        }

        let nodes: Vec<CallNode> = data
            .call_nodes
            .into_iter()
            .map(|n| CallNode {
                f: None,
                fname: n.f,
                n_dep: n.dep.len(),
                dep: n.dep,
                n_out: n.out.len(),
                out_sx: vec![None; n.out.len()],
                out: n.out,
                f_nnz_in: n.f_nnz_in,
                f_nnz_out: n.f_nnz_out,
            })
            .collect();

        Ok(SxFunction {
            name: data.name,
            in_: Vec::new(),
            out_: Vec::new(),
            name_in: data.io_names.0,
            name_out: data.io_names.1,
            sparsity_in: data.sparsity_in,
            sparsity_out: data.sparsity_out,
            default_in: data.default_in,
            algorithm: data.algorithm,
            worksize: data.worksize,
            operations: Vec::new(),
            constants: Vec::new(),
            free_vars: Vec::new(),
            free_names: data.free_vars,
            call: CallInfo {
                sz_arg: data.call_sz_arg,
                sz_res: data.call_sz_res,
                sz_iw: data.call_sz_iw,
                sz_w: data.call_sz_w,
                sz_w_arg: data.call_sz_w_arg,
                sz_w_res: data.call_sz_w_res,
                nodes,
            },
            detached: true,
        })
    }
}

impl SxFunction {
    /// Re-bind external function handles after deserialization.
    ///
    /// Each call node looks up the registry by recorded name; the found
    /// function must match the recorded nonzero counts.
    pub fn finalize(&mut self, registry: &[Function]) -> Result<(), FinalizeError> {
        for node in self.call.nodes.iter_mut() {
            let f = registry
                .iter()
                .find(|f| f.name() == node.fname)
                .ok_or_else(|| FinalizeError::UnknownFunction(node.fname.clone()))?;
            let nnz_in: Vec<usize> = (0..f.n_in()).map(|i| f.nnz_in(i)).collect();
            let nnz_out: Vec<usize> = (0..f.n_out()).map(|i| f.nnz_out(i)).collect();
            if nnz_in != node.f_nnz_in || nnz_out != node.f_nnz_out {
                return Err(FinalizeError::FunctionMismatch {
                    function: node.fname.clone(),
                });
            }
            node.f = Some(f.clone());
        }
        Ok(())
    }
}
