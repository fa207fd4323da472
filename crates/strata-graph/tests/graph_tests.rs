use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use proptest::prelude::*;
use strata_artifact::ArtifactId;
use strata_graph::{DependencyGraph, GraphError};

proptest! {
    #[test]
    fn prop_graph_remains_acyclic(
        node_count in 1..20usize,
        edges in proptest::collection::vec((0..20usize, 0..20usize), 0..60)
    ) {
        let nodes: Vec<ArtifactId> = (0..node_count).map(|_| ArtifactId::new()).collect();
        let mut graph = DependencyGraph::new();

        for (from_idx, to_idx) in edges {
            if from_idx < nodes.len() && to_idx < nodes.len() {
                let _ = graph.add_edge(nodes[from_idx], nodes[to_idx]);
            }
        }

        let mut mirror: DiGraphMap<ArtifactId, ()> = DiGraphMap::new();
        for edge in graph.edges() {
            mirror.add_edge(edge.parent, edge.child, ());
        }
        prop_assert!(!is_cyclic_directed(&mirror));

        for node in &nodes {
            let ancestors = graph.ancestors(*node);
            prop_assert!(ancestors.is_ok());
            prop_assert!(!ancestors.unwrap().contains(node));
        }
    }
}

#[test]
fn cascade_reaches_global_from_individual() {
    let individual = ArtifactId::new();
    let group = ArtifactId::new();
    let global = ArtifactId::new();
    let unrelated = ArtifactId::new();

    let mut graph = DependencyGraph::new();
    graph.add_edge(group, individual).unwrap();
    graph.add_edge(global, group).unwrap();
    graph.add_node(unrelated);

    let ancestors = graph.ancestors(individual).unwrap();
    assert!(ancestors.contains(&group));
    assert!(ancestors.contains(&global));
    assert!(!ancestors.contains(&unrelated));
}

#[test]
fn sibling_children_do_not_invalidate_each_other() {
    let children: Vec<ArtifactId> = (0..3).map(|_| ArtifactId::new()).collect();
    let group = ArtifactId::new();

    let mut graph = DependencyGraph::new();
    graph.replace_children(group, children.iter().copied()).unwrap();

    let closure = graph.closure([children[1]]).unwrap();
    assert_eq!(closure.len(), 2);
    assert!(closure.contains(&group));
    assert!(!closure.contains(&children[0]));
    assert!(!closure.contains(&children[2]));
}

#[test]
fn long_chain_walk_does_not_recurse() {
    let nodes: Vec<ArtifactId> = (0..5_000).map(|_| ArtifactId::new()).collect();
    let mut graph = DependencyGraph::new();
    for pair in nodes.windows(2) {
        graph.add_edge(pair[1], pair[0]).unwrap();
    }

    let ancestors = graph.ancestors(nodes[0]).unwrap();
    assert_eq!(ancestors.len(), nodes.len() - 1);
}

#[test]
fn cycle_is_reported_as_error() {
    let a = ArtifactId::new();
    let b = ArtifactId::new();
    let mut graph = DependencyGraph::new();
    graph.add_edge(a, b).unwrap();
    assert_eq!(
        graph.add_edge(b, a),
        Err(GraphError::CycleDetected { parent: b, child: a })
    );
}
