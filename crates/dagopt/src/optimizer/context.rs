use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::operator::{OpId, Operator};
use crate::tensor::TensorId;

use super::rules::{EliminateTransposeChain, FuseTransposeMatMul};
use super::{OptimizeContext, OptimizeReport, RewriteRule, RuleResult};

#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    /// Run [`Graph::check_valid`] after every rewrite.
    pub validate_after_rewrite: bool,
    /// Upper bound on rule passes inside one `optimize` round.
    pub fixed_point_max_iters: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            validate_after_rewrite: crate::env::validate_after_rewrite(),
            fixed_point_max_iters: crate::env::fixed_point_max_iters(),
        }
    }
}

/// One step of a traversal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathNode {
    Op(OpId),
    /// Terminal marker: the path has no further successors. Never part of the graph.
    Sentinel,
}

impl PathNode {
    pub fn op(self) -> Option<OpId> {
        match self {
            PathNode::Op(id) => Some(id),
            PathNode::Sentinel => None,
        }
    }
}

pub type OpPath = Vec<PathNode>;

/// Depth-first optimization context seeded with one path per root operator.
pub struct DfsOptContext<'g> {
    graph: &'g mut Graph,
    paths: Vec<OpPath>,
    rules: Vec<Arc<dyn RewriteRule>>,
    config: OptimizeConfig,
    report: OptimizeReport,
}

impl<'g> DfsOptContext<'g> {
    pub fn new(graph: &'g mut Graph, config: OptimizeConfig) -> Self {
        let paths: Vec<OpPath> = graph
            .search_ops(|op| op.predecessors().is_empty())
            .into_iter()
            .map(|root| vec![PathNode::Op(root)])
            .collect();
        Self {
            graph,
            paths,
            rules: Vec::new(),
            config,
            report: OptimizeReport::default(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }

    pub fn paths(&self) -> &[OpPath] {
        &self.paths
    }

    /// Appends a rule after the ones already registered.
    pub fn register(&mut self, rule: Arc<dyn RewriteRule>) {
        self.rules.push(rule);
    }

    pub fn into_report(mut self) -> OptimizeReport {
        self.report.paths = self.paths.len();
        self.report
    }

    fn cur_path_index(&self) -> Option<usize> {
        self.paths
            .iter()
            .position(|path| !matches!(path.last(), Some(PathNode::Sentinel) | None))
    }

    /// First path, in frontier order, that has not reached the sentinel.
    pub fn cur_path(&self) -> Option<&[PathNode]> {
        self.cur_path_index().map(|idx| self.paths[idx].as_slice())
    }

    fn cur_path_mut(&mut self) -> Result<&mut OpPath> {
        let idx = self
            .cur_path_index()
            .ok_or_else(|| GraphError::InvalidGraph("no unfinished path".to_string()))?;
        Ok(&mut self.paths[idx])
    }

    /// Operator recorded at `index` of the current path, if it is still in the graph.
    pub fn path_op(&self, index: usize) -> Option<&Operator> {
        let id = self.cur_path()?.get(index)?.op()?;
        self.graph.op(id)
    }

    fn path_op_id(&self, index: usize) -> Result<OpId> {
        self.cur_path()
            .and_then(|path| path.get(index))
            .and_then(|node| node.op())
            .ok_or_else(|| GraphError::InvalidGraph(format!("no operator at path index {index}")))
    }

    /// Splices out the run `path[first..=last]`, reconnecting its input to the single
    /// consumer of `path[last]`, and continues the path from that consumer.
    pub fn shortcut_operator_link(&mut self, first: usize, last: usize) -> Result<RuleResult> {
        let from = self.path_op_id(first)?;
        let last_op = self.path_op_id(last)?;
        let to = match self.graph.op_or_err(last_op)?.successors() {
            [to] => *to,
            succs => {
                return Err(GraphError::NotImplemented(format!(
                    "shortcut past operator {last_op} with {} successors",
                    succs.len()
                )))
            }
        };

        self.graph.shortcut_operator_link(from, to)?;
        debug!(from = %from, to = %to, "cut");

        let path = self.cur_path_mut()?;
        let doomed: Vec<OpId> = path.drain(first..).filter_map(PathNode::op).collect();
        path.push(PathNode::Op(to));
        self.finish_edit(doomed)
    }

    /// Removes `path[first..last]` and keeps `path[last]`, the operator being fused into.
    pub fn merge_operator_link(&mut self, first: usize, last: usize) -> Result<RuleResult> {
        let from = self.path_op_id(first)?;
        let to = self.path_op_id(last)?;

        self.graph.shortcut_operator_link(from, to)?;
        debug!(from = %from, into = %to, "merge");

        let path = self.cur_path_mut()?;
        let doomed: Vec<OpId> = path.drain(first..last).filter_map(PathNode::op).collect();
        self.finish_edit(doomed)
    }

    fn finish_edit(&mut self, doomed: Vec<OpId>) -> Result<RuleResult> {
        for op in &doomed {
            self.eliminate_oper_node(*op)?;
            debug!(op = %op, "deleting");
        }
        let skimmed = self.skim_off_tensors();
        if self.config.validate_after_rewrite {
            self.graph.check_valid()?;
        }
        Ok(RuleResult {
            changed: true,
            removed_ops: doomed.len(),
            removed_tensors: skimmed.len(),
        })
    }

    pub fn eliminate_oper_node(&mut self, op: OpId) -> Result<()> {
        self.graph.eliminate_oper_node(op)
    }

    pub fn skim_off_tensors(&mut self) -> Vec<TensorId> {
        self.graph.skim_off_tensors()
    }

    pub fn remove_operator(&mut self, op: OpId) -> Option<Operator> {
        self.graph.remove_operator(op)
    }

    pub fn remove_tensor(&mut self, tensor: TensorId) -> Option<crate::tensor::Tensor> {
        self.graph.remove_tensor(tensor)
    }

    pub fn search_ops<F>(&self, inspector: F) -> Vec<OpId>
    where
        F: Fn(&Operator) -> bool,
    {
        self.graph.search_ops(inspector)
    }
}

impl OptimizeContext for DfsOptContext<'_> {
    /// Elimination runs before fusion so fusion sees the simplified chain.
    fn init_optimizers(&mut self) {
        self.register(Arc::new(EliminateTransposeChain));
        self.register(Arc::new(FuseTransposeMatMul));
    }

    fn finished(&self) -> bool {
        self.cur_path_index().is_none()
    }

    fn push_forward(&mut self) -> Result<()> {
        let idx = self
            .cur_path_index()
            .ok_or_else(|| GraphError::InvalidGraph("push_forward on a finished context".to_string()))?;
        let tail = self.paths[idx].last().and_then(|node| node.op());
        let successors = match tail.and_then(|id| self.graph.op(id)) {
            Some(op) => op.successors().to_vec(),
            None => {
                trace!(path = idx, "tail no longer in graph, terminating path");
                Vec::new()
            }
        };

        let Some((first, rest)) = successors.split_first() else {
            self.paths[idx].push(PathNode::Sentinel);
            return Ok(());
        };
        for succ in rest {
            let mut branch = self.paths[idx].clone();
            branch.push(PathNode::Op(*succ));
            self.paths.push(branch);
        }
        self.paths[idx].push(PathNode::Op(*first));
        Ok(())
    }

    fn run_rules_once(&mut self) -> Result<RuleResult> {
        let rules = self.rules.clone();
        for rule in &rules {
            let result = rule.run(self)?;
            if result.changed {
                trace!(rule = rule.name(), "rule rewrote the graph");
                self.report.rewrites += 1;
                self.report.removed_ops += result.removed_ops;
                self.report.removed_tensors += result.removed_tensors;
                *self
                    .report
                    .rewrites_by_rule
                    .entry(rule.name().to_string())
                    .or_default() += 1;
                return Ok(result);
            }
        }
        Ok(RuleResult::unchanged())
    }

    fn config(&self) -> &OptimizeConfig {
        &self.config
    }
}

impl fmt::Display for DfsOptContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DFSOptContext:")?;
        for (idx, path) in self.paths.iter().enumerate() {
            let steps: Vec<String> = path
                .iter()
                .map(|node| match node {
                    PathNode::Op(id) => id.to_string(),
                    PathNode::Sentinel => "<end>".to_string(),
                })
                .collect();
            writeln!(f, "[{idx}] [{}]", steps.join(", "))?;
        }
        let names: Vec<&str> = self.rules.iter().map(|rule| rule.name()).collect();
        write!(f, "Optimizer: {names:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::{OpKind, UnaryOp};
    use crate::tensor::DType;

    fn config() -> OptimizeConfig {
        OptimizeConfig {
            validate_after_rewrite: true,
            fixed_point_max_iters: 8,
        }
    }

    #[test]
    fn frontier_forks_at_branches_and_ends_with_sentinels() {
        let mut graph = Graph::new();
        let x = graph.add_tensor(vec![2, 2], DType::F32);
        let root = graph.add_op(OpKind::Unary(UnaryOp::Abs), vec![x]).unwrap();
        let h = graph.op(root).unwrap().output().unwrap();
        let left = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![h]).unwrap();
        let right = graph.add_op(OpKind::Unary(UnaryOp::Tanh), vec![h]).unwrap();

        let mut cx = DfsOptContext::new(&mut graph, config());
        cx.init_optimizers();
        assert_eq!(cx.paths(), &[vec![PathNode::Op(root)]]);

        cx.push_forward().unwrap();
        assert_eq!(
            cx.paths(),
            &[
                vec![PathNode::Op(root), PathNode::Op(left)],
                vec![PathNode::Op(root), PathNode::Op(right)],
            ]
        );
        cx.push_forward().unwrap();
        assert_eq!(cx.cur_path(), Some(&[PathNode::Op(root), PathNode::Op(right)][..]));
        cx.push_forward().unwrap();
        assert!(cx.finished());
        assert!(cx.optimize().is_err());

        let text = cx.to_string();
        assert!(text.starts_with("DFSOptContext:\n"));
        assert!(text.contains("<end>"));
        assert!(text.contains("eliminate-transpose-chain"));
        assert_eq!(cx.into_report().paths, 2);
    }

    #[test]
    fn path_whose_tail_was_deleted_is_terminated() {
        let mut graph = Graph::new();
        let x = graph.add_tensor(vec![3], DType::F32);
        let first = graph.add_op(OpKind::Unary(UnaryOp::Abs), vec![x]).unwrap();
        let y = graph.op(first).unwrap().output().unwrap();
        graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![y]).unwrap();

        let mut cx = DfsOptContext::new(&mut graph, config());
        cx.eliminate_oper_node(first).unwrap();
        assert!(cx.path_op(0).is_none());

        cx.push_forward().unwrap();
        assert_eq!(cx.paths()[0], vec![PathNode::Op(first), PathNode::Sentinel]);
        assert!(cx.finished());
    }

    #[test]
    fn raw_delegates_reach_the_graph() {
        let mut graph = Graph::new();
        let x = graph.add_tensor(vec![3], DType::F32);
        let op = graph.add_op(OpKind::Unary(UnaryOp::Abs), vec![x]).unwrap();
        let y = graph.op(op).unwrap().output().unwrap();

        let mut cx = DfsOptContext::new(&mut graph, config());
        assert_eq!(cx.search_ops(|o| o.op_type() == crate::OpType::Unary), vec![op]);
        assert!(cx.remove_operator(op).is_some());
        assert!(cx.remove_tensor(y).is_some());
        assert!(cx.skim_off_tensors().is_empty());
        assert_eq!(cx.graph().num_ops(), 0);
        assert_eq!(cx.graph().tensor_ids(), &[x]);
    }

    #[test]
    fn fixed_point_bound_is_enforced() {
        #[derive(Debug)]
        struct AlwaysChanged;

        impl RewriteRule for AlwaysChanged {
            fn name(&self) -> &'static str {
                "always-changed"
            }

            fn run(&self, _cx: &mut DfsOptContext<'_>) -> Result<RuleResult> {
                Ok(RuleResult {
                    changed: true,
                    ..RuleResult::default()
                })
            }
        }

        let mut graph = Graph::new();
        let x = graph.add_tensor(vec![3], DType::F32);
        graph.add_op(OpKind::Unary(UnaryOp::Abs), vec![x]).unwrap();

        let mut cx = DfsOptContext::new(&mut graph, config());
        cx.register(Arc::new(AlwaysChanged));
        assert!(matches!(cx.optimize(), Err(GraphError::NotImplemented(_))));
    }
}
