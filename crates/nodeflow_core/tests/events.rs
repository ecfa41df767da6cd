// SPDX-License-Identifier: MIT OR Apache-2.0
mod common;

use common::*;
use nodeflow_core::{Graph, GraphConfig, NodeMode};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_fan_out_in_link_order_with_shared_call() {
    init_tracing();
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    let first = graph.add_node(Recorder::node(&log));
    let second = graph.add_node(Recorder::node(&log));
    let third = graph.add_node(Recorder::node(&log));
    // connection order decides link ids
    graph.connect(source, 0, third, 0).unwrap();
    graph.connect(source, 0, first, 0).unwrap();
    graph.connect(source, 0, second, 0).unwrap();

    graph.trigger(source, None, json!("go")).unwrap();

    let seen = log.borrow();
    let targets: Vec<_> = seen.iter().map(|d| d.node).collect();
    assert_eq!(targets, vec![third, first, second]);
    assert!(seen.iter().all(|d| d.action == "in" && d.param == json!("go")));
    let call = seen[0].call;
    assert!(call.is_some());
    assert!(seen.iter().all(|d| d.call == call));
}

#[test]
fn test_separate_triggers_get_separate_calls() {
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    let target = graph.add_node(Recorder::node(&log));
    graph.connect(source, 0, target, 0).unwrap();

    graph.trigger(source, None, json!(1)).unwrap();
    graph.trigger(source, None, json!(2)).unwrap();

    let seen = log.borrow();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].call, seen[1].call);
}

#[test]
fn test_single_link_trigger() {
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    let a = graph.add_node(Recorder::node(&log));
    let b = graph.add_node(Recorder::node(&log));
    graph.connect(source, 0, a, 0).unwrap();
    let only = graph.connect(source, 0, b, 0).unwrap();

    graph.trigger_slot(source, 0, json!(null), Some(only)).unwrap();

    let targets: Vec<_> = log.borrow().iter().map(|d| d.node).collect();
    assert_eq!(targets, vec![b]);
    assert!(graph.link(only).unwrap().last_fired.is_some());
}

#[test]
fn test_links_are_stamped_when_fired() {
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    // a target with no handler still stamps the link
    let sink = graph.add_node(emitter());
    graph.add_input(sink, "in", "event").unwrap();
    let link = graph.connect(source, 0, sink, 0).unwrap();
    assert!(graph.link(link).unwrap().last_fired.is_none());

    graph.trigger(source, None, json!(null)).unwrap();
    let first = graph.link(link).unwrap().last_fired.unwrap();
    graph.trigger(source, None, json!(null)).unwrap();
    assert!(graph.link(link).unwrap().last_fired.unwrap() >= first);
}

#[test]
fn test_on_trigger_runs_compute() {
    let runs: RunLog = Rc::default();
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    let probe = graph.add_node(on_trigger_probe(&runs));
    graph.connect(source, 0, probe, "go").unwrap();

    graph.run_step(1).unwrap();
    assert!(runs.borrow().is_empty());

    graph.trigger(source, None, json!(null)).unwrap();
    assert_eq!(*runs.borrow(), vec![probe]);
}

#[test]
fn test_never_mode_is_muted() {
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    let muted = graph.add_node(Recorder::node(&log).with_mode(NodeMode::Never));
    graph.connect(source, 0, muted, 0).unwrap();

    graph.trigger(source, None, json!(null)).unwrap();
    assert!(log.borrow().is_empty());
}

#[test]
fn test_nested_trigger_inherits_call() {
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let source = graph.add_node(emitter());
    let relay = graph.add_node(Recorder::relay(&log));
    let end = graph.add_node(Recorder::node(&log));
    graph.connect(source, 0, relay, 0).unwrap();
    graph.connect(relay, 0, end, 0).unwrap();

    graph.trigger(source, None, json!("x")).unwrap();

    let seen = log.borrow();
    assert_eq!(seen.iter().map(|d| d.node).collect::<Vec<_>>(), vec![relay, end]);
    assert_eq!(seen[0].call, seen[1].call);
}

#[test]
fn test_bounded_trigger_cycle_runs_to_completion() {
    init_tracing();
    let hits = Rc::new(RefCell::new(0));
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let counter = graph.add_node(Counter::node(&hits, 3));
    let relay = graph.add_node(Recorder::relay(&log));
    graph.connect(counter, 0, relay, 0).unwrap();
    graph.connect(relay, 0, counter, 0).unwrap();

    graph.do_action(counter, "in", json!(null)).unwrap();

    assert_eq!(*hits.borrow(), 3);
    let seen = log.borrow();
    assert_eq!(seen.len(), 2);
    // the loop stays one logical call
    assert!(seen.iter().all(|d| d.call == seen[0].call));
    assert!(!graph.node(counter).unwrap().is_executing());
    assert_eq!(graph.node(counter).unwrap().pending_action_count(), 0);
}

#[test]
fn test_deferred_actions_wait_for_node_pass() {
    init_tracing();
    let runs: RunLog = Rc::default();
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new().with_config(GraphConfig {
        defer_actions: true,
        ..GraphConfig::default()
    });
    let ticker = graph.add_node(Ticker::node(&runs));
    let target = graph.add_node(Recorder::with_timeline(&log, &runs));
    let later = graph.add_node(Probe::node(&runs));
    graph.connect(ticker, 0, target, 0).unwrap();

    graph.run_step(1).unwrap();

    // the handler runs only after every compute callback of the tick
    assert_eq!(*runs.borrow(), vec![ticker, later, target]);
    assert_eq!(log.borrow().len(), 1);
    assert_eq!(graph.node(target).unwrap().pending_action_count(), 0);
}

#[test]
fn test_synchronous_actions_run_inside_the_trigger() {
    let runs: RunLog = Rc::default();
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let ticker = graph.add_node(Ticker::node(&runs));
    let target = graph.add_node(Recorder::with_timeline(&log, &runs));
    let later = graph.add_node(Probe::node(&runs));
    graph.connect(ticker, 0, target, 0).unwrap();

    graph.run_step(1).unwrap();

    assert_eq!(*runs.borrow(), vec![target, ticker, later]);
}

#[test]
fn test_deferred_action_runs_after_every_compute() {
    let runs: RunLog = Rc::default();
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new().with_config(GraphConfig {
        defer_actions: true,
        ..GraphConfig::default()
    });
    let ticker = graph.add_node(Ticker::node(&runs));
    let target = graph.add_node(Recorder::node(&log));
    graph.connect(ticker, 0, target, 0).unwrap();

    // outside a tick the delivery is only queued
    graph.trigger(ticker, None, json!("manual")).unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(graph.node(target).unwrap().pending_action_count(), 1);

    graph.run_step(1).unwrap();
    let params: Vec<_> = log.borrow().iter().map(|d| d.param.clone()).collect();
    assert_eq!(params, vec![json!("manual"), json!("tick")]);
}

#[test]
fn test_do_action_reaches_handler() {
    let log: DeliveryLog = Rc::default();
    let mut graph = Graph::new();
    let target = graph.add_node(Recorder::node(&log));

    graph.do_action(target, "reset", json!({"hard": true})).unwrap();

    let seen = log.borrow();
    assert_eq!(seen[0].action, "reset");
    assert_eq!(seen[0].param, json!({"hard": true}));
}
