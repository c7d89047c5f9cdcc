//! Arena-backed operator DAG.
//!
//! The graph owns every [`Tensor`] and [`Operator`] by value, keyed by physical id, and
//! keeps a separate insertion order for each so that passes walk nodes deterministically.
//! Cross references between nodes are plain ids; [`Graph`] is the only writer of the
//! edge caches stored on either side.

mod edit;
mod memory;
mod topology;

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace};

use crate::allocator::{Allocator, BumpAllocator};
use crate::error::{GraphError, Result};
use crate::operator::{OpId, OpKind, Operator};
use crate::optimizer::{DfsOptContext, OptimizeConfig, OptimizeContext, OptimizeReport};
use crate::tensor::{DType, Fuid, Shape, Tensor, TensorId};

pub struct Graph {
    tensors: HashMap<TensorId, Tensor>,
    tensor_order: Vec<TensorId>,
    ops: HashMap<OpId, Operator>,
    op_order: Vec<OpId>,
    sorted: bool,
    allocator: Box<dyn Allocator>,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_allocator(Box::new(BumpAllocator::new()))
    }

    pub fn with_allocator(allocator: Box<dyn Allocator>) -> Self {
        Self {
            tensors: HashMap::new(),
            tensor_order: Vec::new(),
            ops: HashMap::new(),
            op_order: Vec::new(),
            sorted: false,
            allocator,
        }
    }

    /// Creates a fresh tensor owned by this graph.
    pub fn add_tensor(&mut self, shape: impl Into<Shape>, dtype: DType) -> TensorId {
        let tensor = Tensor::new(shape, dtype);
        let id = tensor.guid();
        self.tensors.insert(id, tensor);
        self.tensor_order.push(id);
        id
    }

    /// Takes ownership of a tensor created outside the graph.
    pub fn add_existing_tensor(&mut self, tensor: Tensor) -> Result<TensorId> {
        let id = tensor.guid();
        if self.tensors.contains_key(&id) {
            return Err(GraphError::InvalidGraph(format!(
                "tensor {id} is already a member of the graph"
            )));
        }
        if tensor.source().is_some() || !tensor.targets().is_empty() {
            return Err(GraphError::InvalidGraph(format!(
                "tensor {id} carries edges from another graph"
            )));
        }
        self.tensors.insert(id, tensor);
        self.tensor_order.push(id);
        Ok(id)
    }

    /// Builds an operator over existing tensors, creating its output from shape inference.
    pub fn add_op(&mut self, kind: OpKind, inputs: Vec<TensorId>) -> Result<OpId> {
        let mut op = Operator::new(kind, inputs, Vec::new());
        let shapes = self.infer_detached(&mut op)?;
        let dtype = self.tensor_or_err(op.inputs()[0])?.dtype();
        let outputs: Vec<TensorId> = shapes
            .into_iter()
            .map(|shape| self.add_tensor(shape, dtype))
            .collect();
        op.set_outputs(outputs);
        self.add_operator_and_connect(op)
    }

    /// Builds an operator writing into caller-supplied output tensors, which must already
    /// carry the inferred shapes.
    pub fn add_op_with_outputs(
        &mut self,
        kind: OpKind,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
    ) -> Result<OpId> {
        let mut op = Operator::new(kind, inputs, outputs);
        let shapes = self.infer_detached(&mut op)?;
        if shapes.len() != op.outputs().len() {
            return Err(GraphError::ShapeMismatch {
                op: op.id(),
                reason: format!(
                    "{} outputs supplied, {} inferred",
                    op.outputs().len(),
                    shapes.len()
                ),
            });
        }
        for (output, shape) in op.outputs().iter().zip(&shapes) {
            let declared = self.tensor_or_err(*output)?.dims();
            if declared != shape.as_slice() {
                return Err(GraphError::ShapeMismatch {
                    op: op.id(),
                    reason: format!("output {output} declared {declared:?}, inferred {shape:?}"),
                });
            }
        }
        self.add_operator_and_connect(op)
    }

    fn infer_detached(&self, op: &mut Operator) -> Result<Vec<Shape>> {
        op.check_arity()?;
        let shapes = op
            .inputs()
            .iter()
            .map(|t| self.tensor_or_err(*t).map(|t| t.dims().to_vec()))
            .collect::<Result<Vec<_>>>()?;
        op.normalize_attrs(shapes[0].len())?;
        op.infer_shape(&shapes)
    }

    /// Inserts `op` and wires it to its input producers and output consumers.
    pub fn add_operator_and_connect(&mut self, op: Operator) -> Result<OpId> {
        let id = op.id();
        if self.ops.contains_key(&id) {
            return Err(GraphError::InvalidGraph(format!(
                "operator {id} is already a member of the graph"
            )));
        }
        for tensor in op.inputs() {
            self.tensor_or_err(*tensor)?;
        }
        for tensor in op.outputs() {
            if let Some(existing) = self.tensor_or_err(*tensor)?.source() {
                return Err(GraphError::InvalidGraph(format!(
                    "tensor {tensor} is already produced by operator {existing}"
                )));
            }
        }

        self.sorted = false;
        let inputs = op.inputs().to_vec();
        let outputs = op.outputs().to_vec();
        self.ops.insert(id, op);
        self.op_order.push(id);
        for input in inputs {
            self.connect_input(input, id)?;
        }
        for output in outputs {
            self.connect_output(output, id)?;
        }
        trace!(op = %id, "operator connected");
        Ok(id)
    }

    pub fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    pub fn tensor_mut(&mut self, id: TensorId) -> Option<&mut Tensor> {
        self.tensors.get_mut(&id)
    }

    pub fn op(&self, id: OpId) -> Option<&Operator> {
        self.ops.get(&id)
    }

    pub fn op_mut(&mut self, id: OpId) -> Option<&mut Operator> {
        self.ops.get_mut(&id)
    }

    pub(crate) fn tensor_or_err(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors
            .get(&id)
            .ok_or(GraphError::UnknownTensor { tensor: id })
    }

    pub(crate) fn tensor_mut_or_err(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(&id)
            .ok_or(GraphError::UnknownTensor { tensor: id })
    }

    pub(crate) fn op_or_err(&self, id: OpId) -> Result<&Operator> {
        self.ops.get(&id).ok_or(GraphError::UnknownOperator { op: id })
    }

    pub(crate) fn op_mut_or_err(&mut self, id: OpId) -> Result<&mut Operator> {
        self.ops
            .get_mut(&id)
            .ok_or(GraphError::UnknownOperator { op: id })
    }

    /// Tensors in insertion order.
    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> + '_ {
        self.tensor_order.iter().filter_map(|id| self.tensors.get(id))
    }

    /// Operators in the current order (topological once [`Graph::topo_sort`] succeeded).
    pub fn operators(&self) -> impl Iterator<Item = &Operator> + '_ {
        self.op_order.iter().filter_map(|id| self.ops.get(id))
    }

    pub fn tensor_ids(&self) -> &[TensorId] {
        &self.tensor_order
    }

    pub fn op_ids(&self) -> &[OpId] {
        &self.op_order
    }

    pub fn num_tensors(&self) -> usize {
        self.tensor_order.len()
    }

    pub fn num_ops(&self) -> usize {
        self.op_order.len()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Graph inputs: tensors nothing produces.
    pub fn inputs(&self) -> Vec<TensorId> {
        self.tensors()
            .filter(|t| t.source().is_none())
            .map(Tensor::guid)
            .collect()
    }

    /// Graph outputs: tensors nothing consumes.
    pub fn outputs(&self) -> Vec<TensorId> {
        self.tensors()
            .filter(|t| t.targets().is_empty())
            .map(Tensor::guid)
            .collect()
    }

    pub fn get_tensor_by_fuid(&self, fuid: Fuid) -> Option<&Tensor> {
        self.tensors().find(|t| t.fuid() == fuid)
    }

    pub fn search_ops<F>(&self, inspector: F) -> Vec<OpId>
    where
        F: Fn(&Operator) -> bool,
    {
        self.operators()
            .filter(|op| inspector(op))
            .map(Operator::id)
            .collect()
    }

    /// Drops an operator from the operator set without touching any edge.
    pub fn remove_operator(&mut self, id: OpId) -> Option<Operator> {
        let op = self.ops.remove(&id)?;
        self.op_order.retain(|o| *o != id);
        self.sorted = false;
        Some(op)
    }

    /// Drops a tensor from the tensor set without touching any edge.
    pub fn remove_tensor(&mut self, id: TensorId) -> Option<Tensor> {
        let tensor = self.tensors.remove(&id)?;
        self.tensor_order.retain(|t| *t != id);
        Some(tensor)
    }

    pub fn allocator(&self) -> &dyn Allocator {
        self.allocator.as_ref()
    }

    /// Re-runs shape inference in topological order and writes back any output shape
    /// that changed. Tensors are looked up by fuid so aliased nodes stay in step.
    pub fn shape_infer(&mut self) -> Result<()> {
        if !self.topo_sort() {
            return Err(GraphError::Cycle);
        }
        for id in self.op_order.clone() {
            let op = self.op_or_err(id)?;
            let outputs = op.outputs().to_vec();
            let input_shapes = op
                .inputs()
                .iter()
                .map(|t| self.tensor_or_err(*t).map(|t| t.dims().to_vec()))
                .collect::<Result<Vec<_>>>()?;
            let shapes = self.op_mut_or_err(id)?.infer_shape(&input_shapes)?;
            if shapes.len() != outputs.len() {
                return Err(GraphError::ShapeMismatch {
                    op: id,
                    reason: format!("{} outputs, {} inferred", outputs.len(), shapes.len()),
                });
            }
            for (output, shape) in outputs.into_iter().zip(shapes) {
                let tensor = self.tensor_or_err(output)?;
                if tensor.dims() == shape.as_slice() {
                    continue;
                }
                let fuid = tensor.fuid();
                let target = self
                    .get_tensor_by_fuid(fuid)
                    .map(Tensor::guid)
                    .ok_or(GraphError::UnknownTensor { tensor: output })?;
                debug!(tensor = %target, ?shape, "shape updated");
                self.tensor_mut_or_err(target)?.set_shape(shape);
            }
        }
        Ok(())
    }

    /// Runs the DFS rule optimizer with configuration taken from the environment.
    pub fn optimize(&mut self) -> Result<OptimizeReport> {
        self.optimize_with(OptimizeConfig::default())
    }

    pub fn optimize_with(&mut self, config: OptimizeConfig) -> Result<OptimizeReport> {
        if self.topo_order().is_none() {
            return Err(GraphError::Cycle);
        }
        let mut cx = DfsOptContext::new(self, config);
        cx.init_optimizers();

        let mut rounds = 0usize;
        while !cx.finished() {
            cx.optimize()?;
            cx.push_forward()?;
            rounds += 1;
            debug!(round = rounds, "after a round\n{cx}");
        }

        let mut report = cx.into_report();
        report.rounds = rounds;
        Ok(report)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Tensors:")?;
        for tensor in self.tensors() {
            writeln!(f, "{tensor}")?;
        }
        writeln!(f, "Graph operators:")?;
        for op in self.operators() {
            let preds: Vec<u64> = op.predecessors().iter().map(|o| o.0).collect();
            let succs: Vec<u64> = op.successors().iter().map(|o| o.0).collect();
            writeln!(f, "OP {}, pred {preds:?}, succ {succs:?}, {op}", op.id())?;
        }
        Ok(())
    }
}
