use anyhow::{Context, Result};
use clap::ValueEnum;
use dagopt::{DType, Graph, OpId, OpKind, TensorId, UnaryOp};

/// Built-in graphs the harness can optimize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// X -> Transpose[1,0] -> Transpose[1,0] -> Relu
    TransposeChain,
    /// MatMul(A, Transpose(B)) with the transpose swapping the last two axes
    TransposeMatmul,
    /// Identity chain feeding a matmul operand plus a branch that must survive
    Mixed,
}

impl Scenario {
    pub fn build(self) -> Result<Graph> {
        let mut graph = Graph::new();
        match self {
            Scenario::TransposeChain => {
                let x = graph.add_tensor(vec![2, 3], DType::F32);
                let t = transpose_chain(&mut graph, x, &[[1, 0], [1, 0]])?;
                graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![t])?;
            }
            Scenario::TransposeMatmul => {
                let a = graph.add_tensor(vec![4, 2, 3], DType::F32);
                let b = graph.add_tensor(vec![4, 5, 3], DType::F32);
                let t = graph_add(&mut graph, OpKind::transpose([0, 2, 1]), b)?;
                let bt = output_of(&graph, t)?;
                graph.add_op(OpKind::matmul(false, false), vec![a, bt])?;
            }
            Scenario::Mixed => {
                let a = graph.add_tensor(vec![3, 2], DType::F32);
                let w = graph.add_tensor(vec![4, 3], DType::F32);
                let at = transpose_chain(&mut graph, a, &[[1, 0], [1, 0], [1, 0]])?;
                let h = graph.add_op(OpKind::matmul(false, true), vec![at, w])?;
                let h = output_of(&graph, h)?;
                let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![h])?;
                graph.add_op(OpKind::Unary(UnaryOp::Sigmoid), vec![h])?;
                let r = output_of(&graph, relu)?;
                let t = graph_add(&mut graph, OpKind::transpose([1, 0]), r)?;
                let rt = output_of(&graph, t)?;
                graph.add_op(OpKind::Unary(UnaryOp::Tanh), vec![rt])?;
            }
        }
        graph.check_valid().context("scenario graph is malformed")?;
        Ok(graph)
    }
}

fn graph_add(graph: &mut Graph, kind: OpKind, input: TensorId) -> Result<OpId> {
    Ok(graph.add_op(kind, vec![input])?)
}

fn output_of(graph: &Graph, op: OpId) -> Result<TensorId> {
    graph
        .op(op)
        .and_then(|op| op.output())
        .with_context(|| format!("operator {op} has no output"))
}

fn transpose_chain(graph: &mut Graph, input: TensorId, perms: &[[usize; 2]]) -> Result<TensorId> {
    let mut cur = input;
    for perm in perms {
        let op = graph_add(graph, OpKind::transpose(perm.to_vec()), cur)?;
        cur = output_of(graph, op)?;
    }
    Ok(cur)
}
