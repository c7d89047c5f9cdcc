//! Operator-DAG optimizer for tensor computation graphs.
//!
//! A [`Graph`] owns tensors and operators; [`Graph::optimize`] walks it depth first and
//! lets [`RewriteRule`]s splice redundant operators out of the path being explored, after
//! which [`Graph::shape_infer`] and [`Graph::data_malloc`] prepare it for execution.

pub mod allocator;
mod env;
pub mod error;
pub mod graph;
pub mod operator;
pub mod optimizer;
pub mod tensor;

pub use allocator::{Allocator, Blob, BumpAllocator, DataBlock};
pub use error::{GraphError, Result};
pub use graph::Graph;
pub use operator::{
    ConcatAttrs, ElementWiseOp, MatMulAttrs, OpId, OpKind, OpType, Operator, TransposeAttrs,
    UnaryOp,
};
pub use optimizer::{
    DfsOptContext, OptimizeConfig, OptimizeContext, OptimizeReport, PathNode, RewriteRule,
    RuleResult,
};
pub use tensor::{DType, Fuid, Shape, Tensor, TensorId};
