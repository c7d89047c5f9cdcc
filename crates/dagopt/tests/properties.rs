use dagopt::{DType, Graph, OpKind, OpType, OptimizeConfig, TensorId, UnaryOp};
use proptest::prelude::*;

fn config() -> OptimizeConfig {
    OptimizeConfig {
        validate_after_rewrite: true,
        fixed_point_max_iters: 256,
    }
}

fn perm_chain() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..=4).prop_flat_map(|rank| {
        prop::collection::vec(Just((0..rank).collect::<Vec<usize>>()).prop_shuffle(), 1..7)
    })
}

fn build_chain(graph: &mut Graph, perms: &[Vec<usize>]) -> (TensorId, TensorId) {
    let rank = perms[0].len();
    let x = graph.add_tensor((2..2 + rank).collect::<Vec<usize>>(), DType::F32);
    let mut cur = x;
    for perm in perms {
        let op = graph.add_op(OpKind::transpose(perm.clone()), vec![cur]).unwrap();
        cur = graph.op(op).unwrap().output().unwrap();
    }
    let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![cur]).unwrap();
    (x, graph.op(relu).unwrap().output().unwrap())
}

/// Net permutation of the transposes between the graph input and the final relu.
fn net_permutation(graph: &Graph, x: TensorId, rank: usize) -> Vec<usize> {
    let mut net: Vec<usize> = (0..rank).collect();
    let mut cur = x;
    loop {
        let targets = graph.tensor(cur).unwrap().targets();
        assert_eq!(targets.len(), 1);
        let op = graph.op(targets[0]).unwrap();
        if op.op_type() != OpType::Transpose {
            return net;
        }
        net = op.permute().unwrap().iter().map(|&axis| net[axis]).collect();
        cur = op.output().unwrap();
    }
}

proptest! {
    #[test]
    fn optimize_preserves_validity_and_semantics(perms in perm_chain()) {
        let rank = perms[0].len();
        let mut graph = Graph::new();
        let (x, y) = build_chain(&mut graph, &perms);
        let net_before = net_permutation(&graph, x, rank);
        let dims_before = graph.tensor(y).unwrap().dims().to_vec();
        let ops_before = graph.num_ops();

        let report = graph.optimize_with(config()).unwrap();

        prop_assert!(graph.check_valid().is_ok());
        prop_assert_eq!(net_permutation(&graph, x, rank), net_before);
        prop_assert_eq!(graph.num_ops() + report.removed_ops, ops_before);
        prop_assert!(report.rounds <= ops_before);

        graph.shape_infer().unwrap();
        prop_assert_eq!(graph.tensor(y).unwrap().dims(), dims_before.as_slice());

        let again = graph.optimize_with(config()).unwrap();
        prop_assert_eq!(again.rewrites, 0);
    }

    #[test]
    fn allocation_covers_every_tensor_without_overlap(perms in perm_chain()) {
        let mut graph = Graph::new();
        build_chain(&mut graph, &perms);
        graph.optimize_with(config()).unwrap();
        graph.data_malloc().unwrap();

        let total: usize = graph.tensors().map(|t| t.bytes()).sum();
        let mut ranges: Vec<(usize, usize)> = graph
            .tensors()
            .map(|t| {
                let offset = t.data().unwrap().offset();
                (offset, offset + t.bytes())
            })
            .collect();
        ranges.sort_unstable();
        prop_assert_eq!(graph.tensors().next().unwrap().data().unwrap().block().len(), total);
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0);
        }
    }
}
