use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::error::{GraphError, Result};
use crate::operator::OpId;
use crate::tensor::{Fuid, TensorId};

use super::Graph;

impl Graph {
    /// Layered topological order of the operators, or `None` when a full scan promotes
    /// nothing (a cycle, or an input whose producer is not in the graph).
    pub(super) fn topo_order(&self) -> Option<Vec<OpId>> {
        let mut sorted = Vec::with_capacity(self.op_order.len());
        let mut flags: HashSet<OpId> = HashSet::with_capacity(self.op_order.len());
        while sorted.len() < self.op_order.len() {
            let mut modified = false;
            for id in &self.op_order {
                if flags.contains(id) {
                    continue;
                }
                let op = self.ops.get(id)?;
                let ready = op.inputs().iter().all(|input| {
                    match self.tensors.get(input).and_then(|t| t.source()) {
                        None => true,
                        Some(src) => flags.contains(&src),
                    }
                });
                if ready {
                    modified = true;
                    sorted.push(*id);
                    flags.insert(*id);
                }
            }
            if !modified {
                return None;
            }
        }
        Some(sorted)
    }

    /// Reorders the operator list topologically. A no-op when already sorted; returns
    /// `false` if the operators do not form a DAG.
    pub fn topo_sort(&mut self) -> bool {
        if self.sorted {
            return true;
        }
        match self.topo_order() {
            Some(order) => {
                self.op_order = order;
                self.sorted = true;
                true
            }
            None => false,
        }
    }

    /// Re-verifies every structural invariant of the graph.
    ///
    /// Membership of all cross references, exactness of the predecessor/successor caches
    /// against tensor-level edges, absence of orphan tensors, uniqueness of fuids, and
    /// acyclicity are all checked; the first violation is returned.
    pub fn check_valid(&self) -> Result<()> {
        for tensor in self.tensors() {
            let id = tensor.guid();
            trace!(tensor = %id, "validate tensor");
            if tensor.targets().is_empty() && tensor.source().is_none() {
                return Err(GraphError::OrphanTensor { tensor: id });
            }
            for &op in tensor.targets() {
                let Some(target) = self.ops.get(&op) else {
                    return Err(GraphError::DanglingTarget { tensor: id, op });
                };
                if !target.inputs().contains(&id) {
                    return Err(GraphError::StaleEdge {
                        op,
                        reason: format!("listed as target of {id} but does not read it"),
                    });
                }
            }
            if let Some(op) = tensor.source() {
                let Some(source) = self.ops.get(&op) else {
                    return Err(GraphError::DanglingSource { tensor: id, op });
                };
                if !source.outputs().contains(&id) {
                    return Err(GraphError::StaleEdge {
                        op,
                        reason: format!("listed as source of {id} but does not write it"),
                    });
                }
            }
        }

        for op in self.operators() {
            let id = op.id();
            let mut expected_preds: HashSet<OpId> = HashSet::new();
            let mut expected_succs: HashSet<OpId> = HashSet::new();
            for &input in op.inputs() {
                let Some(tensor) = self.tensors.get(&input) else {
                    return Err(GraphError::DanglingInput { op: id, tensor: input });
                };
                if !tensor.targets().contains(&id) {
                    return Err(GraphError::StaleEdge {
                        op: id,
                        reason: format!("reads {input} without being one of its targets"),
                    });
                }
                expected_preds.extend(tensor.source());
            }
            for &output in op.outputs() {
                let Some(tensor) = self.tensors.get(&output) else {
                    return Err(GraphError::DanglingOutput { op: id, tensor: output });
                };
                if tensor.source() != Some(id) {
                    return Err(GraphError::StaleEdge {
                        op: id,
                        reason: format!("writes {output} without being its source"),
                    });
                }
                expected_succs.extend(tensor.targets().iter().copied());
            }
            for &pred in op.predecessors() {
                if !self.ops.contains_key(&pred) {
                    return Err(GraphError::DanglingPredecessor { op: id, pred });
                }
            }
            for &succ in op.successors() {
                if !self.ops.contains_key(&succ) {
                    return Err(GraphError::DanglingSuccessor { op: id, succ });
                }
            }
            let preds: HashSet<OpId> = op.predecessors().iter().copied().collect();
            let succs: HashSet<OpId> = op.successors().iter().copied().collect();
            if preds != expected_preds {
                return Err(GraphError::StaleEdge {
                    op: id,
                    reason: format!("predecessors {preds:?}, tensor edges give {expected_preds:?}"),
                });
            }
            if succs != expected_succs {
                return Err(GraphError::StaleEdge {
                    op: id,
                    reason: format!("successors {succs:?}, tensor edges give {expected_succs:?}"),
                });
            }
        }

        let mut seen: HashMap<Fuid, TensorId> = HashMap::with_capacity(self.tensor_order.len());
        for tensor in self.tensors() {
            if let Some(first) = seen.insert(tensor.fuid(), tensor.guid()) {
                return Err(GraphError::DuplicateFuid {
                    fuid: tensor.fuid(),
                    first,
                    second: tensor.guid(),
                });
            }
        }

        if self.topo_order().is_none() {
            return Err(GraphError::Cycle);
        }
        Ok(())
    }
}
