// SPDX-License-Identifier: MIT OR Apache-2.0
//! Evaluation context handed to node callbacks.

use crate::events::ActionCall;
use crate::graph::Graph;
use crate::link::{Link, LinkId};
use crate::node::{Node, NodeId, NodeMode};
use crate::scheduler::ExecutionError;
use serde_json::Value;

/// Access to the graph from inside a compute or action callback.
///
/// The context can read inputs, write outputs, change properties and fire
/// triggers, but cannot change topology.
pub struct NodeContext<'g> {
    graph: &'g mut Graph,
    node_id: NodeId,
    action_call: Option<ActionCall>,
}

impl<'g> NodeContext<'g> {
    pub(crate) fn new(graph: &'g mut Graph, node_id: NodeId, action_call: Option<ActionCall>) -> Self {
        Self {
            graph,
            node_id,
            action_call,
        }
    }

    /// The graph being evaluated
    pub fn graph(&self) -> &Graph {
        &*self.graph
    }

    /// ID of the node being run
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The node being run
    pub fn node(&self) -> &Node {
        &self.graph.nodes[&self.node_id]
    }

    fn node_mut(&mut self) -> &mut Node {
        &mut self.graph.nodes[&self.node_id]
    }

    /// Position of this node in the execution order
    pub fn order(&self) -> usize {
        self.node().order
    }

    /// Virtual clock, advanced by a fixed step per tick
    pub fn fixed_time(&self) -> f64 {
        self.graph.fixed_time
    }

    /// Correlation id of the trigger that caused this call, if any
    pub fn action_call(&self) -> Option<ActionCall> {
        self.action_call
    }

    /// Link attached to an input
    pub fn input_link(&self, slot: usize) -> Option<&Link> {
        let id = self.node().inputs.get(slot)?.link?;
        self.graph.links.get(&id)
    }

    /// Whether an input has a link
    pub fn is_input_connected(&self, slot: usize) -> bool {
        self.input_link(slot).is_some()
    }

    /// Current data on an input, as last written by the upstream node
    pub fn input_data(&self, slot: usize) -> Option<&Value> {
        self.input_link(slot)?.data.as_ref()
    }

    /// Current data on the first input named `name`
    pub fn input_data_by_name(&self, name: &str) -> Option<&Value> {
        let slot = self.node().find_input_slot(name)?;
        self.input_data(slot)
    }

    /// Input data, computing the upstream node first if it runs on request.
    pub fn request_input_data(&mut self, slot: usize) -> Result<Option<&Value>, ExecutionError> {
        let origin = self.input_link(slot).map(|link| link.origin_id);
        if let Some(origin) = origin {
            let on_request = self
                .graph
                .nodes
                .get(&origin)
                .is_some_and(|n| n.mode == NodeMode::OnRequest);
            if on_request {
                self.graph.run_execute(origin, self.action_call)?;
            }
        }
        Ok(self.input_data(slot))
    }

    /// Value last written to one of this node's outputs
    pub fn output_data(&self, slot: usize) -> Option<&Value> {
        self.node().outputs.get(slot)?.value.as_ref()
    }

    /// Write an output value.
    ///
    /// The value is cached on the port and copied onto every outgoing link.
    /// Writing to a slot that does not exist is ignored.
    pub fn set_output_data(&mut self, slot: usize, value: Value) {
        let node_id = self.node_id;
        let Some(port) = self.node_mut().outputs.get_mut(slot) else {
            tracing::trace!("Node {} has no output {}", node_id, slot);
            return;
        };
        port.value = Some(value.clone());
        let links: Vec<LinkId> = port.links.clone();
        for id in links {
            if let Some(link) = self.graph.links.get_mut(&id) {
                link.data = Some(value.clone());
            }
        }
    }

    /// Write an output value by port name
    pub fn set_output_data_by_name(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.node().find_output_slot(name) {
            self.set_output_data(slot, value);
        }
    }

    /// Get a property value
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.node().properties.get(name)
    }

    /// Change a property of this node
    pub fn set_property(&mut self, name: &str, value: Value) -> bool {
        self.graph.set_property(self.node_id, name, value)
    }

    /// Fire all event outputs, or only those named `event`.
    pub fn trigger(&mut self, event: Option<&str>, param: Value) -> Result<(), ExecutionError> {
        let call = self.action_call;
        self.graph.trigger_with_call(self.node_id, event, &param, call)
    }

    /// Fire one output slot, optionally along a single link.
    pub fn trigger_slot(
        &mut self,
        slot: usize,
        param: Value,
        link: Option<LinkId>,
    ) -> Result<(), ExecutionError> {
        let call = self.action_call;
        self.graph
            .trigger_slot_with_call(self.node_id, slot, &param, link, call)
    }
}
