//! DFS rule-based graph optimizer.
//!
//! - an abstract [`OptimizeContext`] drives rules to a fixed point on one path at a time,
//! - [`DfsOptContext`] keeps the frontier of paths and the splice/merge primitives,
//! - [`RewriteRule`]s inspect the tail of the current path and make at most one edit.

mod context;
pub mod rules;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{GraphError, Result};

pub use context::{DfsOptContext, OptimizeConfig, PathNode};

/// Result returned by a [`RewriteRule`] or a splice primitive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleResult {
    /// Whether the graph was edited. A changed result forces another pass.
    pub changed: bool,
    pub removed_ops: usize,
    pub removed_tensors: usize,
}

impl RuleResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn merge(self, other: RuleResult) -> RuleResult {
        RuleResult {
            changed: self.changed || other.changed,
            removed_ops: self.removed_ops + other.removed_ops,
            removed_tensors: self.removed_tensors + other.removed_tensors,
        }
    }
}

/// Summary of one [`Graph::optimize`](crate::graph::Graph::optimize) run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    /// Number of optimize/push-forward rounds.
    pub rounds: usize,
    pub rewrites: usize,
    pub removed_ops: usize,
    pub removed_tensors: usize,
    pub paths: usize,
    pub rewrites_by_rule: BTreeMap<String, usize>,
}

/// Pattern matcher/rewriter registered into a [`DfsOptContext`].
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspects the current path and performs at most one graph edit.
    fn run(&self, cx: &mut DfsOptContext<'_>) -> Result<RuleResult>;
}

/// State machine over a frontier of paths: running until every path is terminated.
pub trait OptimizeContext {
    fn init_optimizers(&mut self);

    fn finished(&self) -> bool;

    /// Advances the current path by one operator.
    fn push_forward(&mut self) -> Result<()>;

    /// Runs the registered rules once, in order, against the current path. Stops at the
    /// first rule that edits the graph.
    fn run_rules_once(&mut self) -> Result<RuleResult>;

    fn config(&self) -> &OptimizeConfig;

    /// Runs the rules until a whole pass makes no edit.
    fn optimize(&mut self) -> Result<RuleResult> {
        if self.finished() {
            return Err(GraphError::InvalidGraph(
                "optimize called on a finished context".to_string(),
            ));
        }
        let max_iters = self.config().fixed_point_max_iters;
        let mut total = RuleResult::unchanged();
        let mut iter = 0usize;
        loop {
            if iter >= max_iters {
                return Err(GraphError::NotImplemented(format!(
                    "rules did not reach a fixed point within {max_iters} passes"
                )));
            }
            iter += 1;
            let pass = self.run_rules_once()?;
            total = total.merge(pass);
            if !pass.changed {
                return Ok(total);
            }
        }
    }
}
