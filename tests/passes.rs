use proptest::prelude::*;
use toy_he_graph::graph::{ElementType, Graph, NodeId, OpKind};
use toy_he_graph::pass::{GraphPass, InsertRescale, MergeRescales, PassManager};

#[derive(Debug, Clone)]
enum Step {
    Add(usize, usize),
    Multiply(usize, usize),
    Relu(usize),
    Rescale(usize),
    BoundedRelu(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::Add(a, b)),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::Multiply(a, b)),
        any::<usize>().prop_map(Step::Relu),
        any::<usize>().prop_map(Step::Rescale),
        any::<usize>().prop_map(Step::BoundedRelu),
    ]
}

/// Builds a DAG over `[4]`-shaped values; indices pick earlier nodes.
fn build(steps: &[Step], results: usize) -> Graph {
    let mut g = Graph::new();
    let mut nodes: Vec<NodeId> = vec![
        g.parameter(ElementType::F32, vec![4]),
        g.parameter(ElementType::F32, vec![4]),
    ];
    let alpha = g.constant(ElementType::F32, vec![4], vec![6.0; 4]).unwrap();
    for step in steps {
        let pick = |i: usize| nodes[i % nodes.len()];
        let id = match *step {
            Step::Add(a, b) => g.add(pick(a), pick(b)).unwrap(),
            Step::Multiply(a, b) => g.multiply(pick(a), pick(b)).unwrap(),
            Step::Relu(a) => g.relu(pick(a)).unwrap(),
            Step::Rescale(a) => g.rescale(pick(a)).unwrap(),
            Step::BoundedRelu(a) => {
                let r = g.relu(pick(a)).unwrap();
                g.minimum(r, alpha).unwrap()
            }
        };
        nodes.push(id);
    }
    for &id in nodes.iter().rev().take(results) {
        g.add_result(id).unwrap();
    }
    g
}

fn check_rescale_invariants(g: &Graph) {
    for id in g.ordered_ops() {
        match g.kind(id) {
            Some(OpKind::Multiply | OpKind::Dot | OpKind::Convolution) => {
                let consumers = g.consumers(id);
                assert_eq!(consumers.len(), 1, "{id} has consumers {consumers:?}");
                assert_eq!(g.kind(consumers[0]), Some(OpKind::Rescale));
                assert!(!g.is_result(id));
            }
            Some(OpKind::Rescale) => {
                let input = g.node(id).unwrap().inputs[0];
                assert_ne!(g.kind(input), Some(OpKind::Rescale), "{id} rescales a rescale");
            }
            _ => {}
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pipeline_reaches_a_stable_fixpoint(
        steps in proptest::collection::vec(step(), 1..24),
        results in 1usize..4,
    ) {
        let mut g = build(&steps, results);
        let manager = PassManager::he_pipeline();
        manager.run(&mut g).unwrap();
        check_rescale_invariants(&g);
        prop_assert_eq!(g.count_ops(OpKind::Minimum), 0);

        let before = g.ordered_ops().len();
        prop_assert_eq!(manager.run(&mut g).unwrap(), 0);
        prop_assert_eq!(g.ordered_ops().len(), before);
    }
}

#[test]
fn insertion_alone_is_idempotent() {
    let mut g = Graph::new();
    let a = g.parameter(ElementType::F32, vec![2, 2]);
    let b = g.parameter(ElementType::F32, vec![2, 2]);
    let m = g.multiply(a, b).unwrap();
    let d = g.dot(m, b).unwrap();
    let r = g.relu(d).unwrap();
    g.add_result(r).unwrap();
    g.add_result(d).unwrap();

    assert!(InsertRescale.run_on_graph(&mut g).unwrap());
    assert!(!InsertRescale.run_on_graph(&mut g).unwrap());
    check_rescale_invariants(&g);
    assert_eq!(g.count_ops(OpKind::Rescale), 2);
}

#[test]
fn merge_leaves_input_untouched() {
    let mut g = Graph::new();
    let a = g.parameter(ElementType::F32, vec![3]);
    let b = g.parameter(ElementType::F32, vec![3]);
    let x = g.add(a, b).unwrap();
    let before = g.node(x).unwrap().clone();
    let r = g.rescale(x).unwrap();
    let rr = g.rescale(r).unwrap();
    g.add_result(rr).unwrap();

    let merge = MergeRescales::new();
    assert!(merge.run_on_graph(&mut g).unwrap());
    g.prune();
    assert!(!merge.run_on_graph(&mut g).unwrap());
    assert_eq!(g.node(x).unwrap(), &before);
    let root = g.results()[0];
    assert_eq!(g.kind(root), Some(OpKind::Rescale));
    assert_eq!(g.node(root).unwrap().inputs, vec![x]);
}
