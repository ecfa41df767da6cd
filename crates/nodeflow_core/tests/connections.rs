// SPDX-License-Identifier: MIT OR Apache-2.0
mod common;

use common::*;
use nodeflow_core::{
    ConnectByTypeOptions, ConnectionError, Graph, GraphConfig, Node, NodeBehavior, NodeId, Passive,
    PortType,
};
use std::rc::Rc;

fn typed(input: &str, output: &str) -> Node {
    let mut node = Node::new("test/typed", Box::new(Passive));
    node.add_input("in", input);
    node.add_output("out", output);
    node
}

/// Refuses every incoming link
struct Picky;

impl NodeBehavior for Picky {
    fn on_connect_input(&mut self, _node: &Node, _slot: usize, _origin_type: &PortType) -> bool {
        false
    }
}

fn link_state(graph: &Graph, node: NodeId) -> (Option<nodeflow_core::LinkId>, usize) {
    let node = graph.node(node).unwrap();
    (node.input(0).unwrap().link, node.output(0).unwrap().links.len())
}

#[test]
fn test_type_law() {
    let cases = [
        ("number", "number", true),
        ("number", "string", false),
        ("*", "string", true),
        ("number", "*", true),
        ("event", "action", true),
        ("event", "number", false),
        ("number,boolean", "boolean", true),
        ("vec2,vec3", "vec4,vec3", true),
        ("vec2,vec3", "vec4", false),
        ("Number", "number", false),
    ];
    for (output, input, expected) in cases {
        let mut graph = Graph::new();
        let origin = graph.add_node(typed("*", output));
        let target = graph.add_node(typed(input, "*"));
        let result = graph.connect(origin, 0, target, 0);
        assert_eq!(result.is_ok(), expected, "{output} -> {input}");
        if !expected {
            assert!(matches!(result, Err(ConnectionError::IncompatiblePorts { .. })));
            assert_eq!(link_state(&graph, origin).1, 0);
            assert_eq!(link_state(&graph, target).0, None);
            assert_eq!(graph.link_count(), 0);
        }
    }
}

#[test]
fn test_single_input_invariant() {
    let mut graph = Graph::new();
    let a = graph.add_node(typed("*", "number"));
    let b = graph.add_node(typed("*", "number"));
    let c = graph.add_node(typed("*", "number"));
    let target = graph.add_node(typed("number", "*"));

    let first = graph.connect(a, 0, target, 0).unwrap();
    let second = graph.connect(b, 0, target, 0).unwrap();
    let third = graph.connect(c, 0, target, 0).unwrap();

    assert_eq!(link_state(&graph, target).0, Some(third));
    assert!(graph.link(first).is_none());
    assert!(graph.link(second).is_none());
    assert_eq!(graph.link_count(), 1);
    assert_eq!(link_state(&graph, a).1, 0);
    assert_eq!(link_state(&graph, b).1, 0);
}

#[test]
fn test_incompatible_reconnect_keeps_prior_link() {
    let registry = registry();
    let mut graph = Graph::new();
    let a = graph.add_node(registry.create_node("test/order_source").unwrap());
    let b = graph.add_node(registry.create_node("math/double").unwrap());
    let text = graph.add_node(typed("*", "string"));
    let link = graph.connect(a, 0, b, 0).unwrap();

    let err = graph.connect(text, 0, b, 0).unwrap_err();
    assert!(matches!(err, ConnectionError::IncompatiblePorts { .. }));
    assert_eq!(link_state(&graph, b).0, Some(link));
    assert_eq!(graph.link(link).unwrap().origin_id, a);
}

#[test]
fn test_structural_errors_leave_graph_untouched() {
    let mut graph = Graph::new();
    let a = graph.add_node(typed("*", "*"));
    let b = graph.add_node(typed("*", "*"));
    let version = graph.version();

    assert!(matches!(graph.connect(a, 0, a, 0), Err(ConnectionError::SelfLoop)));
    assert!(matches!(
        graph.connect(a, "missing", b, 0),
        Err(ConnectionError::PortNotFound { .. })
    ));
    assert!(matches!(
        graph.connect(a, 0, NodeId::Index(77), 0),
        Err(ConnectionError::NodeNotFound(_))
    ));
    assert_eq!(graph.version(), version);
    assert_eq!(graph.link_count(), 0);
}

#[test]
fn test_single_consumer_events() {
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new().with_config(GraphConfig {
        allow_multi_output_for_events: false,
        ..GraphConfig::default()
    });
    let source = graph.add_node(emitter());
    let a = graph.add_node(Recorder::node(&log));
    let b = graph.add_node(Recorder::node(&log));

    let old = graph.connect(source, 0, a, 0).unwrap();
    let new = graph.connect(source, 0, b, 0).unwrap();

    assert!(graph.link(old).is_none());
    assert_eq!(graph.node(source).unwrap().output(0).unwrap().links, vec![new]);
    assert_eq!(link_state(&graph, a).0, None);
}

#[test]
fn test_remove_node_clears_both_sides() {
    let mut graph = Graph::new();
    let a = graph.add_node(typed("*", "*"));
    let b = graph.add_node(typed("*", "*"));
    let c = graph.add_node(typed("*", "*"));
    graph.connect(a, 0, b, 0).unwrap();
    graph.connect(b, 0, c, 0).unwrap();

    graph.remove_node(b).unwrap();

    assert_eq!(graph.link_count(), 0);
    assert_eq!(link_state(&graph, a).1, 0);
    assert_eq!(link_state(&graph, c).0, None);
}

#[test]
fn test_disconnect_output_to_one_target() {
    let mut graph = Graph::new();
    let a = graph.add_node(typed("*", "*"));
    let b = graph.add_node(typed("*", "*"));
    let c = graph.add_node(typed("*", "*"));
    graph.connect(a, 0, b, 0).unwrap();
    let kept = graph.connect(a, 0, c, 0).unwrap();

    assert!(graph.disconnect_output(a, 0, Some(b)).unwrap());
    assert_eq!(graph.node(a).unwrap().output(0).unwrap().links, vec![kept]);

    assert!(graph.disconnect_output(a, 0, None).unwrap());
    assert_eq!(graph.link_count(), 0);
    assert!(!graph.disconnect_input(c, 0).unwrap());
}

#[test]
fn test_removing_a_port_renumbers_links() {
    let mut graph = Graph::new();
    let a = graph.add_node(typed("*", "*"));
    let target = graph.add_node(typed("*", "*"));
    graph.add_input(target, "second", "*").unwrap();
    let link = graph.connect(a, 0, target, "second").unwrap();
    assert_eq!(graph.link(link).unwrap().target_slot, 1);

    assert!(graph.remove_input(target, 0));
    assert_eq!(graph.link(link).unwrap().target_slot, 0);
    assert_eq!(graph.node(target).unwrap().input(0).unwrap().link, Some(link));
}

#[test]
fn test_link_type_prefers_concrete_side() {
    let mut graph = Graph::new();
    let a = graph.add_node(typed("*", "number"));
    let b = graph.add_node(typed("*", "*"));
    let link = graph.connect(a, 0, b, 0).unwrap();
    assert_eq!(graph.link(link).unwrap().link_type, PortType::named("number"));
}

#[test]
fn test_vetoed_auto_connect_creates_no_port() {
    let mut graph = Graph::new();
    let origin = graph.add_node(typed("*", "texture"));
    let target = graph.add_node(Node::new("test/picky", Box::new(Picky)));
    let version = graph.version();
    let options = ConnectByTypeOptions {
        create_port: true,
        ..ConnectByTypeOptions::default()
    };

    let err = graph.connect_by_type(origin, 0, target, options).unwrap_err();
    assert!(matches!(err, ConnectionError::Rejected(id) if id == target));
    assert!(graph.node(target).unwrap().inputs().is_empty());
    assert_eq!(graph.version(), version);
    assert_eq!(graph.link_count(), 0);
}

#[test]
fn test_auto_connect_announces_created_port() {
    let mut graph = Graph::new();
    let origin = graph.add_node(typed("*", "texture"));
    let target = graph.add_node(typed("number", "*"));
    let options = ConnectByTypeOptions {
        create_port: true,
        ..ConnectByTypeOptions::default()
    };

    let version = graph.version();
    let link = graph.connect_by_type(origin, 0, target, options).unwrap();
    assert_eq!(graph.link(link).unwrap().target_slot, 1);
    // one bump for the link, one for the new port
    assert_eq!(graph.version(), version + 2);
}
