use thiserror::Error;

use crate::operator::OpId;
use crate::tensor::{Fuid, TensorId};

/// Errors raised while building, rewriting, or lowering a graph.
///
/// Every variant describes a defect upstream of the optimizer; callers are expected to
/// stop at the first one instead of trying to continue on a broken graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("tensor {tensor} is not a member of the graph")]
    UnknownTensor { tensor: TensorId },
    #[error("operator {op} is not a member of the graph")]
    UnknownOperator { op: OpId },
    #[error("tensor {tensor} has neither a source nor any target")]
    OrphanTensor { tensor: TensorId },
    #[error("tensor {tensor} names source {op} which is not in the graph")]
    DanglingSource { tensor: TensorId, op: OpId },
    #[error("tensor {tensor} names target {op} which is not in the graph")]
    DanglingTarget { tensor: TensorId, op: OpId },
    #[error("operator {op} reads tensor {tensor} which is not in the graph")]
    DanglingInput { op: OpId, tensor: TensorId },
    #[error("operator {op} writes tensor {tensor} which is not in the graph")]
    DanglingOutput { op: OpId, tensor: TensorId },
    #[error("operator {op} lists predecessor {pred} which is not in the graph")]
    DanglingPredecessor { op: OpId, pred: OpId },
    #[error("operator {op} lists successor {succ} which is not in the graph")]
    DanglingSuccessor { op: OpId, succ: OpId },
    #[error("operator {op} has stale edges: {reason}")]
    StaleEdge { op: OpId, reason: String },
    #[error("tensors {first} and {second} share fuid {fuid}")]
    DuplicateFuid {
        fuid: Fuid,
        first: TensorId,
        second: TensorId,
    },
    #[error("operator graph contains a cycle")]
    Cycle,
    #[error("Not Implemented: {0}")]
    NotImplemented(String),
    #[error("Invalid Graph: {0}")]
    InvalidGraph(String),
    #[error("shape mismatch at operator {op}: {reason}")]
    ShapeMismatch { op: OpId, reason: String },
    #[error("invalid attribute on operator {op}: {reason}")]
    InvalidAttribute { op: OpId, reason: String },
    #[error("allocator: {0}")]
    Allocator(String),
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;
