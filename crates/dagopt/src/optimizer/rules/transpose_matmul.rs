use tracing::debug;

use crate::error::{GraphError, Result};
use crate::operator::OpType;
use crate::optimizer::{DfsOptContext, RewriteRule, RuleResult};

use super::swaps_last_two;

/// Folds a transpose of the last two axes into the consuming matmul's `trans_a`/`trans_b`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FuseTransposeMatMul;

impl RewriteRule for FuseTransposeMatMul {
    fn name(&self) -> &'static str {
        "fuse-transpose-matmul"
    }

    fn run(&self, cx: &mut DfsOptContext<'_>) -> Result<RuleResult> {
        let Some(tail_idx) = cx.cur_path().and_then(|path| path.len().checked_sub(1)) else {
            return Ok(RuleResult::unchanged());
        };
        if tail_idx == 0 {
            return Ok(RuleResult::unchanged());
        }
        let Some(matmul) = cx.path_op(tail_idx).filter(|op| op.op_type() == OpType::MatMul) else {
            return Ok(RuleResult::unchanged());
        };
        let matmul_id = matmul.id();
        let (lhs, rhs) = match matmul.inputs() {
            [lhs, rhs] => (*lhs, *rhs),
            _ => return Ok(RuleResult::unchanged()),
        };

        let Some(transpose) = cx.path_op(tail_idx - 1) else {
            return Ok(RuleResult::unchanged());
        };
        if transpose.op_type() != OpType::Transpose
            || transpose.predecessors().len() > 1
            || transpose.successors().len() != 1
        {
            return Ok(RuleResult::unchanged());
        }
        if !transpose.permute().is_some_and(swaps_last_two) {
            return Ok(RuleResult::unchanged());
        }

        let Some(output) = transpose.output() else {
            return Ok(RuleResult::unchanged());
        };
        let feeds_a = output == lhs;
        let feeds_b = output == rhs;
        if !feeds_a && !feeds_b {
            return Err(GraphError::InvalidGraph(format!(
                "transpose {} is not an operand of matmul {matmul_id}",
                transpose.id()
            )));
        }

        let attrs = cx
            .graph_mut()
            .op_mut(matmul_id)
            .and_then(|op| op.matmul_mut())
            .ok_or(GraphError::UnknownOperator { op: matmul_id })?;
        if feeds_a {
            attrs.trans_a = !attrs.trans_a;
        }
        if feeds_b {
            attrs.trans_b = !attrs.trans_b;
        }
        debug!(matmul = %matmul_id, feeds_a, feeds_b, "fold transpose into matmul");
        cx.merge_operator_link(tail_idx - 1, tail_idx)
    }
}
