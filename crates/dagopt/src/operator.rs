//! Compute nodes of the operator DAG.
//!
//! Operator kinds form a closed tagged variant ([`OpKind`]) so rewrite rules can match on
//! the kind and reach the payload without downcasting. Predecessor and successor lists are
//! a cache over tensor-level edges; only [`Graph`](crate::graph::Graph) edits them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use smallvec::SmallVec;

use crate::error::{GraphError, Result};
use crate::tensor::{Shape, TensorId};

static NEXT_OP_GUID: AtomicU64 = AtomicU64::new(0);

/// Physical identity of an operator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
pub struct OpId(pub u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Field-less discriminant of [`OpKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpType {
    Transpose,
    MatMul,
    Concat,
    ElementWise,
    Unary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeAttrs {
    /// Output axis `i` reads input axis `permute[i]`.
    pub permute: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatMulAttrs {
    pub trans_a: bool,
    pub trans_b: bool,
    /// Extents cached by the last shape inference.
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatAttrs {
    /// Concatenation axis; negative values count from the back until the operator is
    /// attached to a graph, after which it is always normalised.
    pub dim: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementWiseOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
    Abs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Transpose(TransposeAttrs),
    MatMul(MatMulAttrs),
    Concat(ConcatAttrs),
    ElementWise(ElementWiseOp),
    Unary(UnaryOp),
}

impl OpKind {
    pub fn transpose(permute: impl Into<Vec<usize>>) -> Self {
        OpKind::Transpose(TransposeAttrs {
            permute: permute.into(),
        })
    }

    pub fn matmul(trans_a: bool, trans_b: bool) -> Self {
        OpKind::MatMul(MatMulAttrs {
            trans_a,
            trans_b,
            ..MatMulAttrs::default()
        })
    }

    pub fn concat(dim: i64) -> Self {
        OpKind::Concat(ConcatAttrs { dim })
    }

    pub fn op_type(&self) -> OpType {
        match self {
            OpKind::Transpose(_) => OpType::Transpose,
            OpKind::MatMul(_) => OpType::MatMul,
            OpKind::Concat(_) => OpType::Concat,
            OpKind::ElementWise(_) => OpType::ElementWise,
            OpKind::Unary(_) => OpType::Unary,
        }
    }

    /// Exact input count, or `None` for variadic kinds.
    fn num_inputs(&self) -> Option<usize> {
        match self {
            OpKind::Transpose(_) | OpKind::Unary(_) => Some(1),
            OpKind::MatMul(_) | OpKind::ElementWise(_) => Some(2),
            OpKind::Concat(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operator {
    id: OpId,
    kind: OpKind,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    predecessors: SmallVec<[OpId; 4]>,
    successors: SmallVec<[OpId; 4]>,
}

impl Operator {
    /// Creates an unattached operator. Edges are filled in when the graph connects it.
    pub fn new(kind: OpKind, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self {
            id: OpId(NEXT_OP_GUID.fetch_add(1, Ordering::Relaxed)),
            kind,
            inputs,
            outputs,
            predecessors: SmallVec::new(),
            successors: SmallVec::new(),
        }
    }

    /// Copies kind and attributes onto a fresh node wired to the given tensors.
    pub fn clone_with(&self, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> Self {
        Self::new(self.kind.clone(), inputs, outputs)
    }

    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    pub fn op_type(&self) -> OpType {
        self.kind.op_type()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// First output; every kind in this crate produces exactly one.
    pub fn output(&self) -> Option<TensorId> {
        self.outputs.first().copied()
    }

    pub fn predecessors(&self) -> &[OpId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[OpId] {
        &self.successors
    }

    pub fn permute(&self) -> Option<&[usize]> {
        match &self.kind {
            OpKind::Transpose(attrs) => Some(&attrs.permute),
            _ => None,
        }
    }

    pub fn matmul(&self) -> Option<&MatMulAttrs> {
        match &self.kind {
            OpKind::MatMul(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub fn matmul_mut(&mut self) -> Option<&mut MatMulAttrs> {
        match &mut self.kind {
            OpKind::MatMul(attrs) => Some(attrs),
            _ => None,
        }
    }

    pub(crate) fn check_arity(&self) -> Result<()> {
        let expected = self.kind.num_inputs();
        let arity_ok = match expected {
            Some(count) => self.inputs.len() == count,
            None => !self.inputs.is_empty(),
        };
        if !arity_ok {
            return Err(GraphError::InvalidAttribute {
                op: self.id,
                reason: format!(
                    "{:?} expects {} inputs, got {}",
                    self.op_type(),
                    expected.map_or_else(|| "at least 1".to_string(), |c| c.to_string()),
                    self.inputs.len()
                ),
            });
        }
        Ok(())
    }

    /// Resolves attributes that depend on the rank of the first input.
    pub(crate) fn normalize_attrs(&mut self, first_rank: usize) -> Result<()> {
        let id = self.id;
        if let OpKind::Concat(attrs) = &mut self.kind {
            let Some(dim) = real_axis(attrs.dim, first_rank) else {
                return Err(GraphError::InvalidAttribute {
                    op: id,
                    reason: format!("axis {} out of range for rank {}", attrs.dim, first_rank),
                });
            };
            attrs.dim = dim as i64;
        }
        Ok(())
    }

    /// Infers one output shape per output from the given input shapes.
    ///
    /// MatMul refreshes its cached `m`, `n`, `k` extents as a side effect.
    pub fn infer_shape(&mut self, inputs: &[Shape]) -> Result<Vec<Shape>> {
        let id = self.id;
        let mismatch = |reason: String| GraphError::ShapeMismatch { op: id, reason };
        match &mut self.kind {
            OpKind::Transpose(attrs) => {
                let [input] = inputs else {
                    return Err(mismatch(format!("expected 1 input, got {}", inputs.len())));
                };
                if !is_permutation(&attrs.permute) || attrs.permute.len() != input.len() {
                    return Err(mismatch(format!(
                        "permute {:?} does not match rank {}",
                        attrs.permute,
                        input.len()
                    )));
                }
                Ok(vec![attrs.permute.iter().map(|&axis| input[axis]).collect()])
            }
            OpKind::MatMul(attrs) => {
                let [a, b] = inputs else {
                    return Err(mismatch(format!("expected 2 inputs, got {}", inputs.len())));
                };
                if a.len() < 2 || b.len() < 2 {
                    return Err(mismatch(format!(
                        "matmul operands need rank >= 2, got {} and {}",
                        a.len(),
                        b.len()
                    )));
                }
                let (ra, rb) = (a.len(), b.len());
                let (m, ka) = if attrs.trans_a {
                    (a[ra - 1], a[ra - 2])
                } else {
                    (a[ra - 2], a[ra - 1])
                };
                let (kb, n) = if attrs.trans_b {
                    (b[rb - 1], b[rb - 2])
                } else {
                    (b[rb - 2], b[rb - 1])
                };
                if ka != kb {
                    return Err(mismatch(format!(
                        "contraction extents differ: {ka} vs {kb}"
                    )));
                }
                let mut out = broadcast_shapes(&a[..ra - 2], &b[..rb - 2]).map_err(mismatch)?;
                attrs.m = m;
                attrs.n = n;
                attrs.k = ka;
                out.push(m);
                out.push(n);
                Ok(vec![out])
            }
            OpKind::Concat(attrs) => {
                let Some(first) = inputs.first() else {
                    return Err(mismatch("concat without inputs".to_string()));
                };
                let rank = first.len();
                let dim = usize::try_from(attrs.dim)
                    .ok()
                    .filter(|d| *d < rank)
                    .ok_or_else(|| mismatch(format!("axis {} out of range", attrs.dim)))?;
                let mut out = first.clone();
                out[dim] = 0;
                for shape in inputs {
                    if shape.len() != rank {
                        return Err(mismatch(format!(
                            "concat rank mismatch: {} vs {}",
                            shape.len(),
                            rank
                        )));
                    }
                    let off_axis_equal = shape
                        .iter()
                        .zip(first)
                        .enumerate()
                        .all(|(axis, (x, y))| axis == dim || x == y);
                    if !off_axis_equal {
                        return Err(mismatch(format!(
                            "concat extents {shape:?} disagree with {first:?} off axis {dim}"
                        )));
                    }
                    out[dim] += shape[dim];
                }
                Ok(vec![out])
            }
            OpKind::ElementWise(_) => {
                let [a, b] = inputs else {
                    return Err(mismatch(format!("expected 2 inputs, got {}", inputs.len())));
                };
                Ok(vec![broadcast_shapes(a, b).map_err(mismatch)?])
            }
            OpKind::Unary(_) => {
                let [input] = inputs else {
                    return Err(mismatch(format!("expected 1 input, got {}", inputs.len())));
                };
                Ok(vec![input.clone()])
            }
        }
    }

    pub(crate) fn add_predecessor(&mut self, op: OpId) {
        if !self.predecessors.contains(&op) {
            self.predecessors.push(op);
        }
    }

    pub(crate) fn remove_predecessor(&mut self, op: OpId) {
        self.predecessors.retain(|p| *p != op);
    }

    pub(crate) fn add_successor(&mut self, op: OpId) {
        if !self.successors.contains(&op) {
            self.successors.push(op);
        }
    }

    pub(crate) fn remove_successor(&mut self, op: OpId) {
        self.successors.retain(|s| *s != op);
    }

    pub(crate) fn set_outputs(&mut self, outputs: Vec<TensorId>) {
        self.outputs = outputs;
    }

    pub(crate) fn replace_input(&mut self, old: TensorId, new: TensorId) {
        for input in &mut self.inputs {
            if *input == old {
                *input = new;
            }
        }
    }

    pub(crate) fn remove_input(&mut self, tensor: TensorId) {
        self.inputs.retain(|t| *t != tensor);
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |ts: &[TensorId]| ts.iter().map(|t| t.0).collect::<Vec<_>>();
        match &self.kind {
            OpKind::Transpose(attrs) => write!(
                f,
                "Transpose[{}](permute={:?},input={:?},output={:?})",
                self.id,
                attrs.permute,
                ids(&self.inputs),
                ids(&self.outputs)
            ),
            OpKind::MatMul(attrs) => {
                let a = self.inputs.first().map_or(0, |t| t.0);
                let b = self.inputs.get(1).map_or(0, |t| t.0);
                let c = self.outputs.first().map_or(0, |t| t.0);
                write!(
                    f,
                    "Matmul[{}]([{},{}],A={a},B={b},C={c},mnk=[{},{},{}])",
                    self.id,
                    if attrs.trans_a { "A^T" } else { "A" },
                    if attrs.trans_b { "B^T" } else { "B" },
                    attrs.m,
                    attrs.n,
                    attrs.k
                )
            }
            OpKind::Concat(attrs) => write!(
                f,
                "Concat[{}](dim={},input={:?},output={:?})",
                self.id,
                attrs.dim,
                ids(&self.inputs),
                ids(&self.outputs)
            ),
            OpKind::ElementWise(op) => write!(
                f,
                "{op:?}[{}](input={:?},output={:?})",
                self.id,
                ids(&self.inputs),
                ids(&self.outputs)
            ),
            OpKind::Unary(op) => write!(
                f,
                "{op:?}[{}](input={:?},output={:?})",
                self.id,
                ids(&self.inputs),
                ids(&self.outputs)
            ),
        }
    }
}

pub(crate) fn is_permutation(perm: &[usize]) -> bool {
    let mut seen = vec![false; perm.len()];
    for &axis in perm {
        match seen.get_mut(axis) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

fn real_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = i64::try_from(rank).ok()?;
    let resolved = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&resolved).then_some(resolved as usize)
}

/// Numpy-style broadcast of two shapes, aligned from the trailing axis.
fn broadcast_shapes(a: &[usize], b: &[usize]) -> std::result::Result<Shape, String> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let x = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let y = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (x, y) {
            _ if x == y => x,
            (1, _) => y,
            (_, 1) => x,
            _ => return Err(format!("cannot broadcast {a:?} with {b:?}")),
        };
    }
    Ok(out)
}
