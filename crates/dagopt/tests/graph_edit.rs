use dagopt::{DType, ElementWiseOp, Graph, GraphError, OpKind, UnaryOp};

#[test]
fn building_keeps_edge_caches_in_sync() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 3], DType::F32);
    let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x]).unwrap();
    let y = graph.op(relu).unwrap().output().unwrap();
    let add = graph
        .add_op(OpKind::ElementWise(ElementWiseOp::Add), vec![y, y])
        .unwrap();

    assert_eq!(graph.op(relu).unwrap().successors(), &[add]);
    assert_eq!(graph.op(add).unwrap().predecessors(), &[relu]);
    assert_eq!(graph.tensor(y).unwrap().targets(), &[add]);
    assert_eq!(graph.tensor(y).unwrap().source(), Some(relu));
    assert_eq!(graph.inputs(), vec![x]);
    assert_eq!(graph.outputs().len(), 1);
    graph.check_valid().unwrap();
}

#[test]
fn shortcut_rewires_consumer_to_chain_input() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![4, 4], DType::F32);
    let t1 = graph.add_op(OpKind::transpose([1, 0]), vec![x]).unwrap();
    let a = graph.op(t1).unwrap().output().unwrap();
    let t2 = graph.add_op(OpKind::transpose([1, 0]), vec![a]).unwrap();
    let b = graph.op(t2).unwrap().output().unwrap();
    let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![b]).unwrap();

    graph.shortcut_operator_link(t1, relu).unwrap();

    assert_eq!(graph.op(relu).unwrap().inputs(), &[x]);
    assert!(graph.op(relu).unwrap().predecessors().is_empty());
    assert!(graph.op(t2).unwrap().successors().is_empty());
    assert!(graph.tensor(b).unwrap().targets().is_empty());
    assert!(graph.tensor(x).unwrap().targets().contains(&relu));

    graph.eliminate_oper_node(t1).unwrap();
    graph.eliminate_oper_node(t2).unwrap();
    let skimmed = graph.skim_off_tensors();
    assert_eq!(skimmed, vec![a, b]);
    assert_eq!(graph.num_ops(), 1);
    graph.check_valid().unwrap();
}

#[test]
fn shortcut_keeps_edge_when_consumer_still_reads_predecessor() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![3, 3], DType::F32);
    let neg = graph.add_op(OpKind::Unary(UnaryOp::Abs), vec![x]).unwrap();
    let h = graph.op(neg).unwrap().output().unwrap();
    let t = graph.add_op(OpKind::transpose([1, 0]), vec![h]).unwrap();
    let ht = graph.op(t).unwrap().output().unwrap();
    let add = graph
        .add_op(OpKind::ElementWise(ElementWiseOp::Add), vec![ht, h])
        .unwrap();

    graph.shortcut_operator_link(t, add).unwrap();
    graph.eliminate_oper_node(t).unwrap();
    graph.skim_off_tensors();

    assert_eq!(graph.op(add).unwrap().inputs(), &[h, h]);
    assert_eq!(graph.op(add).unwrap().predecessors(), &[neg]);
    assert_eq!(graph.op(neg).unwrap().successors(), &[add]);
    graph.check_valid().unwrap();
}

#[test]
fn shortcut_through_a_fork_is_not_implemented() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 3], DType::F32);
    let t0 = graph.add_op(OpKind::transpose([1, 0]), vec![x]).unwrap();
    let a = graph.op(t0).unwrap().output().unwrap();
    let t1 = graph.add_op(OpKind::transpose([1, 0]), vec![a]).unwrap();
    graph.add_op(OpKind::Unary(UnaryOp::Abs), vec![a]).unwrap();
    let b = graph.op(t1).unwrap().output().unwrap();
    let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![b]).unwrap();

    let err = graph.shortcut_operator_link(t0, relu).unwrap_err();
    assert!(matches!(err, GraphError::NotImplemented(_)));
    assert!(err.to_string().starts_with("Not Implemented"));
    graph.check_valid().unwrap();
}

#[test]
fn shortcut_from_multi_input_operator_is_not_implemented() {
    let mut graph = Graph::new();
    let a = graph.add_tensor(vec![2, 3], DType::F32);
    let b = graph.add_tensor(vec![3, 4], DType::F32);
    let mm = graph.add_op(OpKind::matmul(false, false), vec![a, b]).unwrap();
    let c = graph.op(mm).unwrap().output().unwrap();
    let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![c]).unwrap();

    assert!(matches!(
        graph.shortcut_operator_link(mm, relu),
        Err(GraphError::NotImplemented(_))
    ));
}

#[test]
fn eliminating_an_operator_detaches_it_everywhere() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 3], DType::F32);
    let r1 = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x]).unwrap();
    let y = graph.op(r1).unwrap().output().unwrap();
    let r2 = graph.add_op(OpKind::Unary(UnaryOp::Sigmoid), vec![y]).unwrap();

    graph.eliminate_oper_node(r1).unwrap();

    assert!(graph.op(r1).is_none());
    assert!(graph.tensor(x).unwrap().targets().is_empty());
    assert_eq!(graph.tensor(y).unwrap().source(), None);
    assert!(graph.op(r2).unwrap().predecessors().is_empty());
    assert_eq!(graph.skim_off_tensors(), vec![x]);
    graph.check_valid().unwrap();
}

#[test]
fn eliminating_unknown_operator_errors() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![1], DType::F32);
    let r = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x]).unwrap();
    graph.eliminate_oper_node(r).unwrap();
    assert_eq!(
        graph.eliminate_oper_node(r),
        Err(GraphError::UnknownOperator { op: r })
    );
}

#[test]
fn orphan_tensor_is_invalid() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2], DType::F32);
    assert_eq!(graph.check_valid(), Err(GraphError::OrphanTensor { tensor: x }));
}

#[test]
fn duplicate_fuid_is_detected() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 2], DType::F32);
    graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x]).unwrap();
    let alias = graph.tensor(x).unwrap().clone_node();
    let fuid = alias.fuid();
    let x2 = graph.add_existing_tensor(alias).unwrap();
    graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x2]).unwrap();

    assert_eq!(
        graph.check_valid(),
        Err(GraphError::DuplicateFuid {
            fuid,
            first: x,
            second: x2
        })
    );
    assert_eq!(graph.get_tensor_by_fuid(fuid).unwrap().guid(), x);
}

#[test]
fn raw_removal_leaves_dangling_references() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 3], DType::F32);
    let relu = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x]).unwrap();

    assert!(graph.remove_operator(relu).is_some());
    assert_eq!(
        graph.check_valid(),
        Err(GraphError::DanglingTarget { tensor: x, op: relu })
    );
}

#[test]
fn cycle_is_detected_by_validation_and_sort() {
    let mut graph = Graph::new();
    let a = graph.add_tensor(vec![2, 2], DType::F32);
    let b = graph.add_tensor(vec![2, 2], DType::F32);
    graph
        .add_op_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![a], vec![b])
        .unwrap();
    graph
        .add_op_with_outputs(OpKind::Unary(UnaryOp::Abs), vec![b], vec![a])
        .unwrap();

    assert_eq!(graph.check_valid(), Err(GraphError::Cycle));
    assert!(!graph.topo_sort());
    assert!(!graph.is_sorted());
}

#[test]
fn topo_sort_orders_producers_first() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 2], DType::F32);
    let y = graph.add_tensor(vec![2, 2], DType::F32);
    let z = graph.add_tensor(vec![2, 2], DType::F32);
    let late = graph
        .add_op_with_outputs(OpKind::Unary(UnaryOp::Abs), vec![y], vec![z])
        .unwrap();
    let early = graph
        .add_op_with_outputs(OpKind::Unary(UnaryOp::Relu), vec![x], vec![y])
        .unwrap();
    assert_eq!(graph.op_ids(), &[late, early]);

    assert!(graph.topo_sort());
    assert!(graph.is_sorted());
    assert_eq!(graph.op_ids(), &[early, late]);
    assert!(graph.topo_sort());
}

#[test]
fn output_with_existing_producer_is_rejected() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2], DType::F32);
    let r = graph.add_op(OpKind::Unary(UnaryOp::Relu), vec![x]).unwrap();
    let y = graph.op(r).unwrap().output().unwrap();
    assert!(matches!(
        graph.add_op_with_outputs(OpKind::Unary(UnaryOp::Abs), vec![x], vec![y]),
        Err(GraphError::InvalidGraph(_))
    ));
}

#[test]
fn display_lists_tensors_and_operators() {
    let mut graph = Graph::new();
    let x = graph.add_tensor(vec![2, 3], DType::F32);
    graph.add_op(OpKind::transpose([1, 0]), vec![x]).unwrap();
    let text = graph.to_string();
    assert!(text.starts_with("Graph Tensors:\n"));
    assert!(text.contains("Graph operators:\n"));
    assert!(text.contains("shape [3, 2]"));
}
