//! Structural edits on the graph.
//!
//! `connect_*`, `link` and `unlink` are the only writers of the predecessor/successor
//! caches; the splice and delete primitives below are composed from them.

use tracing::{debug, trace};

use crate::error::{GraphError, Result};
use crate::operator::OpId;
use crate::tensor::TensorId;

use super::Graph;

impl Graph {
    /// Registers `op` as a consumer of `tensor` and links the tensor's producer to it.
    pub(super) fn connect_input(&mut self, tensor: TensorId, op: OpId) -> Result<()> {
        let t = self.tensor_mut_or_err(tensor)?;
        t.add_target(op);
        if let Some(pred) = t.source() {
            self.link(pred, op)?;
        }
        Ok(())
    }

    /// Marks `op` as the producer of `tensor` and links it to the tensor's consumers.
    pub(super) fn connect_output(&mut self, tensor: TensorId, op: OpId) -> Result<()> {
        let t = self.tensor_mut_or_err(tensor)?;
        t.set_source(Some(op));
        for succ in t.targets().to_vec() {
            self.link(op, succ)?;
        }
        Ok(())
    }

    fn link(&mut self, pred: OpId, succ: OpId) -> Result<()> {
        self.op_mut_or_err(pred)?.add_successor(succ);
        self.op_mut_or_err(succ)?.add_predecessor(pred);
        Ok(())
    }

    /// Removes the cached edge between two operators. Either side may already be gone.
    fn unlink(&mut self, pred: OpId, succ: OpId) {
        if let Some(op) = self.ops.get_mut(&pred) {
            op.remove_successor(succ);
        }
        if let Some(op) = self.ops.get_mut(&succ) {
            op.remove_predecessor(pred);
        }
    }

    /// Whether `succ` still reads any tensor produced by `pred`.
    fn reads_from(&self, pred: OpId, succ: OpId) -> bool {
        self.ops.get(&succ).is_some_and(|op| {
            op.inputs()
                .iter()
                .any(|t| self.tensors.get(t).and_then(|t| t.source()) == Some(pred))
        })
    }

    /// Splices out the single-successor chain that starts at `from` and feeds `to`.
    ///
    /// `to` is rewired to read `from`'s input in place of the chain's last output. The
    /// chain's operators stay in the graph; callers remove them with
    /// [`Graph::eliminate_oper_node`] afterwards.
    pub fn shortcut_operator_link(&mut self, from: OpId, to: OpId) -> Result<()> {
        let source_input = match self.op_or_err(from)?.inputs() {
            [input] => *input,
            inputs => {
                return Err(GraphError::NotImplemented(format!(
                    "splice from operator {from} with {} inputs",
                    inputs.len()
                )))
            }
        };
        let to_inputs = self.op_or_err(to)?.inputs().to_vec();

        let mut prev = from;
        let replaced = loop {
            let op = self.op_or_err(prev)?;
            let feeding: Vec<TensorId> = op
                .outputs()
                .iter()
                .copied()
                .filter(|t| to_inputs.contains(t))
                .collect();
            if !feeding.is_empty() {
                break feeding;
            }
            match op.successors() {
                [next] => prev = *next,
                succs => {
                    return Err(GraphError::NotImplemented(format!(
                        "operator {prev} on the spliced chain has {} successors",
                        succs.len()
                    )))
                }
            }
        };

        self.sorted = false;
        for output in replaced {
            self.op_mut_or_err(to)?.replace_input(output, source_input);
            self.tensor_mut_or_err(output)?.remove_target(to);
        }
        if !self.reads_from(prev, to) {
            self.unlink(prev, to);
        }
        self.connect_input(source_input, to)?;
        debug!(from = %from, to = %to, last = %prev, "operator link shortcut");
        Ok(())
    }

    /// Detaches `op` from every tensor it touches and drops it from the operator set.
    ///
    /// Severed edges are not reconnected: consumers of `op`'s outputs lose their producer.
    pub fn eliminate_oper_node(&mut self, op: OpId) -> Result<()> {
        let node = self.op_or_err(op)?;
        let inputs = node.inputs().to_vec();
        let outputs = node.outputs().to_vec();

        self.sorted = false;
        for input in inputs {
            let tensor = self.tensor_mut_or_err(input)?;
            tensor.remove_target(op);
            if let Some(pred) = tensor.source() {
                self.unlink(pred, op);
            }
        }
        for output in outputs {
            let tensor = self.tensor_mut_or_err(output)?;
            if tensor.source() != Some(op) {
                return Err(GraphError::InvalidGraph(format!(
                    "output {output} of operator {op} names producer {:?}",
                    tensor.source()
                )));
            }
            tensor.set_source(None);
            for succ in tensor.targets().to_vec() {
                self.unlink(op, succ);
            }
        }
        self.ops.remove(&op);
        self.op_order.retain(|o| *o != op);
        debug!(op = %op, "operator eliminated");
        Ok(())
    }

    /// Removes every tensor with neither producer nor consumer and scrubs any operator
    /// input list that still names one. Returns the removed ids in graph order.
    pub fn skim_off_tensors(&mut self) -> Vec<TensorId> {
        let orphans: Vec<TensorId> = self
            .tensors()
            .filter(|t| t.source().is_none() && t.targets().is_empty())
            .map(|t| t.guid())
            .collect();
        for id in &orphans {
            trace!(tensor = %id, "deleting tensor");
            self.remove_tensor(*id);
            for op in self.ops.values_mut() {
                op.remove_input(*id);
            }
        }
        orphans
    }
}
