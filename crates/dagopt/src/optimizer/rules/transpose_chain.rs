use tracing::debug;

use crate::error::Result;
use crate::operator::{OpType, Operator};
use crate::optimizer::{DfsOptContext, RewriteRule, RuleResult};

use super::{compose_perms, is_identity_perm};

/// Splices out a run of transposes whose composed permutation is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct EliminateTransposeChain;

fn is_chain_link(op: &Operator) -> bool {
    op.op_type() == OpType::Transpose
        && op.predecessors().len() <= 1
        && op.successors().len() == 1
}

impl RewriteRule for EliminateTransposeChain {
    fn name(&self) -> &'static str {
        "eliminate-transpose-chain"
    }

    fn run(&self, cx: &mut DfsOptContext<'_>) -> Result<RuleResult> {
        let Some(tail_idx) = cx.cur_path().and_then(|path| path.len().checked_sub(1)) else {
            return Ok(RuleResult::unchanged());
        };
        match cx.path_op(tail_idx) {
            Some(tail) if is_chain_link(tail) && tail.predecessors().len() == 1 => {}
            _ => return Ok(RuleResult::unchanged()),
        }

        let mut first = tail_idx;
        while first > 0 && cx.path_op(first - 1).is_some_and(is_chain_link) {
            first -= 1;
        }
        if tail_idx - first + 1 < 2 {
            return Ok(RuleResult::unchanged());
        }

        let mut net: Option<Vec<usize>> = None;
        for idx in first..=tail_idx {
            let Some(perm) = cx.path_op(idx).and_then(Operator::permute) else {
                return Ok(RuleResult::unchanged());
            };
            net = match net {
                None => Some(perm.to_vec()),
                Some(acc) => match compose_perms(&acc, perm) {
                    Some(composed) => Some(composed),
                    None => {
                        debug!(run = tail_idx - first + 1, "transpose ranks differ, chain kept");
                        return Ok(RuleResult::unchanged());
                    }
                },
            };
        }

        match net {
            Some(perm) if is_identity_perm(&perm) => cx.shortcut_operator_link(first, tail_idx),
            net => {
                debug!(net = ?net, "transpose chain is not an identity");
                Ok(RuleResult::unchanged())
            }
        }
    }
}
