// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node types shared by the integration tests.
#![allow(dead_code)]

use nodeflow_core::{
    ActionCall, Capabilities, Node, NodeBehavior, NodeContext, NodeError, NodeId, NodeMode,
    NodeRegistry, Passive,
};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Route engine logs through the test harness, `RUST_LOG` filtered
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared run log: which node ran, in call order
pub type RunLog = Rc<RefCell<Vec<NodeId>>>;

/// One action delivery seen by a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub node: NodeId,
    pub action: String,
    pub param: Value,
    pub call: Option<ActionCall>,
}

pub type DeliveryLog = Rc<RefCell<Vec<Delivery>>>;

/// Outputs its own position in the execution order
#[derive(Default)]
pub struct OrderSource;

impl NodeBehavior for OrderSource {
    fn init(&mut self, node: &mut Node) {
        node.add_output("out", "number");
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::EXECUTE
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let order = ctx.order();
        ctx.set_output_data(0, json!(order as f64));
        Ok(())
    }
}

/// Outputs the `value` property
#[derive(Default)]
pub struct Constant;

impl NodeBehavior for Constant {
    fn init(&mut self, node: &mut Node) {
        node.add_output("out", "number");
        node.add_property("value", json!(1.0));
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::EXECUTE
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let value = ctx.property("value").cloned().unwrap_or(Value::Null);
        ctx.set_output_data(0, value);
        Ok(())
    }
}

/// Doubles its numeric input
#[derive(Default)]
pub struct Doubler;

impl NodeBehavior for Doubler {
    fn init(&mut self, node: &mut Node) {
        node.add_input("in", "number");
        node.add_output("out", "number");
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::EXECUTE
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let input = ctx
            .request_input_data(0)?
            .and_then(Value::as_f64)
            .ok_or_else(|| NodeError::MissingInput("in".into()))?;
        ctx.set_output_data(0, json!(input * 2.0));
        Ok(())
    }
}

/// Pass-through compute node that logs every run
pub struct Probe {
    log: RunLog,
}

impl Probe {
    pub fn node(log: &RunLog) -> Node {
        let mut node = Node::new(
            "test/probe",
            Box::new(Probe {
                log: Rc::clone(log),
            }),
        );
        node.add_input("in", "*");
        node.add_output("out", "*");
        node
    }
}

impl NodeBehavior for Probe {
    fn capabilities(&self) -> Capabilities {
        Capabilities::EXECUTE
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.log.borrow_mut().push(ctx.node_id());
        Ok(())
    }
}

/// Records every action it receives and optionally relays it
pub struct Recorder {
    log: DeliveryLog,
    relay: bool,
    timeline: Option<RunLog>,
}

impl Recorder {
    pub fn node(log: &DeliveryLog) -> Node {
        Self::build(log, false, None)
    }

    /// Re-fires every received action on its own event output
    pub fn relay(log: &DeliveryLog) -> Node {
        Self::build(log, true, None)
    }

    /// Also appends its id to `runs` on every delivery
    pub fn with_timeline(log: &DeliveryLog, runs: &RunLog) -> Node {
        Self::build(log, false, Some(Rc::clone(runs)))
    }

    fn build(log: &DeliveryLog, relay: bool, timeline: Option<RunLog>) -> Node {
        let mut node = Node::new(
            "test/recorder",
            Box::new(Recorder {
                log: Rc::clone(log),
                relay,
                timeline,
            }),
        );
        node.add_input("in", "event");
        node.add_output("out", "event");
        node
    }
}

impl NodeBehavior for Recorder {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ACTION
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        action: &str,
        param: &Value,
    ) -> Result<(), NodeError> {
        self.log.borrow_mut().push(Delivery {
            node: ctx.node_id(),
            action: action.to_string(),
            param: param.clone(),
            call: ctx.action_call(),
        });
        if let Some(timeline) = &self.timeline {
            timeline.borrow_mut().push(ctx.node_id());
        }
        if self.relay {
            ctx.trigger(None, param.clone())?;
        }
        Ok(())
    }
}

/// Counts its actions and re-fires them until `limit` is reached
pub struct Counter {
    hits: Rc<RefCell<u32>>,
    limit: u32,
}

impl Counter {
    pub fn node(hits: &Rc<RefCell<u32>>, limit: u32) -> Node {
        let mut node = Node::new(
            "test/counter",
            Box::new(Counter {
                hits: Rc::clone(hits),
                limit,
            }),
        );
        node.add_input("in", "event");
        node.add_output("out", "event");
        node
    }
}

impl NodeBehavior for Counter {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ACTION
    }

    fn on_action(
        &mut self,
        ctx: &mut NodeContext<'_>,
        _action: &str,
        param: &Value,
    ) -> Result<(), NodeError> {
        let hits = {
            let mut hits = self.hits.borrow_mut();
            *hits += 1;
            *hits
        };
        if hits < self.limit {
            ctx.trigger(None, param.clone())?;
        }
        Ok(())
    }
}

/// Compute node that fires its event output on every run
pub struct Ticker {
    log: RunLog,
}

impl Ticker {
    pub fn node(log: &RunLog) -> Node {
        let mut node = Node::new(
            "test/ticker",
            Box::new(Ticker {
                log: Rc::clone(log),
            }),
        );
        node.add_output("tick", "event");
        node
    }
}

impl NodeBehavior for Ticker {
    fn capabilities(&self) -> Capabilities {
        Capabilities::EXECUTE
    }

    fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        ctx.trigger(None, json!("tick"))?;
        self.log.borrow_mut().push(ctx.node_id());
        Ok(())
    }
}

/// Compute node that runs only when triggered
pub fn on_trigger_probe(log: &RunLog) -> Node {
    let mut node = Probe::node(log).with_mode(NodeMode::OnTrigger);
    node.add_input("go", "event");
    node
}

/// Node with a single event output and no callbacks
pub fn emitter() -> Node {
    let mut node = Node::new("test/emitter", Box::new(Passive));
    node.add_output("out", "event");
    node
}

/// Compute node that always fails
#[derive(Default)]
pub struct Failing;

impl NodeBehavior for Failing {
    fn capabilities(&self) -> Capabilities {
        Capabilities::EXECUTE
    }

    fn on_execute(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Err(NodeError::Custom("boom".into()))
    }
}

/// Registry with the default-constructible fixtures
pub fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register_type::<OrderSource>("test/order_source", "Order");
    registry.register_type::<Constant>("math/constant", "Constant");
    registry.register_type::<Doubler>("math/double", "Double");
    registry.register_type::<Failing>("test/failing", "Failing");
    registry
}
