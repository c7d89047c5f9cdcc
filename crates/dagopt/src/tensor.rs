//! Data nodes of the operator DAG.
//!
//! A [`Tensor`] carries two identities: the physical `guid` names one node instance and
//! keys it inside a [`Graph`](crate::graph::Graph), while the logical `fuid` names the
//! value it holds and survives rewrites that swap the physical node.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use smallvec::SmallVec;

use crate::allocator::Blob;
use crate::operator::OpId;

static NEXT_TENSOR_GUID: AtomicU64 = AtomicU64::new(0);
static NEXT_TENSOR_FUID: AtomicU64 = AtomicU64::new(0);

/// Physical identity of a tensor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
pub struct TensorId(pub u64);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical identity of the value a tensor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
pub struct Fuid(pub u64);

impl fmt::Display for Fuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered list of dimension extents.
pub type Shape = Vec<usize>;

/// Element types understood by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DType {
    Bool,
    I8,
    U8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tensor {
    guid: TensorId,
    fuid: Fuid,
    shape: Shape,
    dtype: DType,
    source: Option<OpId>,
    targets: SmallVec<[OpId; 4]>,
    data: Option<Blob>,
}

impl Tensor {
    /// Creates a detached tensor with fresh physical and logical identities.
    pub fn new(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self {
            guid: TensorId(NEXT_TENSOR_GUID.fetch_add(1, Ordering::Relaxed)),
            fuid: Fuid(NEXT_TENSOR_FUID.fetch_add(1, Ordering::Relaxed)),
            shape: shape.into(),
            dtype,
            source: None,
            targets: SmallVec::new(),
            data: None,
        }
    }

    /// Returns a new physical node that holds the same logical value.
    ///
    /// Edges and storage are not carried over.
    pub fn clone_node(&self) -> Self {
        Self {
            guid: TensorId(NEXT_TENSOR_GUID.fetch_add(1, Ordering::Relaxed)),
            fuid: self.fuid,
            shape: self.shape.clone(),
            dtype: self.dtype,
            source: None,
            targets: SmallVec::new(),
            data: None,
        }
    }

    pub fn guid(&self) -> TensorId {
        self.guid
    }

    pub fn fuid(&self) -> Fuid {
        self.fuid
    }

    pub fn dims(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn bytes(&self) -> usize {
        self.size() * self.dtype.size_in_bytes()
    }

    pub fn source(&self) -> Option<OpId> {
        self.source
    }

    pub fn targets(&self) -> &[OpId] {
        &self.targets
    }

    pub fn data(&self) -> Option<&Blob> {
        self.data.as_ref()
    }

    pub fn set_data_blob(&mut self, blob: Blob) {
        self.data = Some(blob);
    }

    pub(crate) fn set_source(&mut self, op: Option<OpId>) {
        self.source = op;
    }

    pub(crate) fn add_target(&mut self, op: OpId) {
        if !self.targets.contains(&op) {
            self.targets.push(op);
        }
    }

    pub(crate) fn remove_target(&mut self, op: OpId) {
        self.targets.retain(|t| *t != op);
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor {}, Fuid {}, shape {:?}, dtype {:?}, source ",
            self.guid, self.fuid, self.shape, self.dtype
        )?;
        match self.source {
            Some(op) => write!(f, "{op}")?,
            None => f.write_str("None")?,
        }
        let targets: Vec<u64> = self.targets.iter().map(|op| op.0).collect();
        write!(f, ", targets {targets:?}")
    }
}
