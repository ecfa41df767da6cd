// SPDX-License-Identifier: MIT OR Apache-2.0
//! Discrete event propagation.
//!
//! Triggers travel from a node's output slot along its links to the
//! connected inputs, independently of the per-tick execution order:
//!
//! - an `ON_TRIGGER` target with a compute callback runs it immediately,
//! - a target with an action handler receives `(input name, param)`,
//!   either immediately or through its pending queue when
//!   [`GraphConfig::defer_actions`](crate::GraphConfig::defer_actions) is set,
//! - anything else ignores the trigger.
//!
//! Every traversed link is stamped with the time it fired. Fan-out visits
//! links in id order and shares one [`ActionCall`] across all deliveries.

use crate::graph::Graph;
use crate::link::LinkId;
use crate::node::{NodeId, NodeMode};
use crate::scheduler::ExecutionError;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// Correlation id shared by every delivery caused by one trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionCall(pub u64);

impl fmt::Display for ActionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// An action waiting in a node's deferred queue
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    /// Name of the input the action arrived on
    pub action: String,
    /// Payload
    pub param: Value,
    /// Correlation id of the originating trigger
    pub call: ActionCall,
}

/// A delivery that reached a node while its callback was running
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Reentry {
    Execute(ActionCall),
    Action(PendingAction),
}

impl Graph {
    /// Fire all event outputs of a node, or only those named `event`.
    pub fn trigger(
        &mut self,
        node_id: NodeId,
        event: Option<&str>,
        param: Value,
    ) -> Result<(), ExecutionError> {
        self.trigger_with_call(node_id, event, &param, None)
    }

    /// Fire one output slot, either along every link or only along `link`.
    pub fn trigger_slot(
        &mut self,
        node_id: NodeId,
        slot: usize,
        param: Value,
        link: Option<LinkId>,
    ) -> Result<(), ExecutionError> {
        self.trigger_slot_with_call(node_id, slot, &param, link, None)
    }

    /// Invoke a node's action handler directly.
    pub fn do_action(
        &mut self,
        node_id: NodeId,
        action: &str,
        param: Value,
    ) -> Result<(), ExecutionError> {
        if !self.nodes.contains_key(&node_id) {
            return Err(ExecutionError::NodeNotFound(node_id));
        }
        let call = self.next_action_call();
        self.run_action(node_id, action, &param, call)
    }

    /// Run every queued action, node by node in execution order.
    ///
    /// All queues are taken before the first action runs, so anything
    /// queued while draining waits for the next drain wherever its target
    /// sits in the order. On error every action not yet run is put back.
    pub fn execute_pending_actions(&mut self) -> Result<(), ExecutionError> {
        if self.nodes.values().all(|n| n.pending_actions.is_empty()) {
            return Ok(());
        }
        let order = self.execution_order().nodes_in_order.clone();
        let batch: Vec<(NodeId, VecDeque<PendingAction>)> = order
            .into_iter()
            .filter_map(|node_id| {
                let node = self.nodes.get_mut(&node_id)?;
                if node.pending_actions.is_empty() {
                    return None;
                }
                Some((node_id, std::mem::take(&mut node.pending_actions)))
            })
            .collect();

        let mut batch = batch.into_iter();
        while let Some((node_id, mut queue)) = batch.next() {
            while let Some(pending) = queue.pop_front() {
                if let Err(err) = self.run_action(node_id, &pending.action, &pending.param, pending.call) {
                    self.requeue(node_id, queue);
                    for (rest_id, rest) in batch.by_ref() {
                        self.requeue(rest_id, rest);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn requeue(&mut self, node_id: NodeId, mut remaining: VecDeque<PendingAction>) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            remaining.append(&mut node.pending_actions);
            node.pending_actions = remaining;
        }
    }

    pub(crate) fn trigger_with_call(
        &mut self,
        node_id: NodeId,
        event: Option<&str>,
        param: &Value,
        call: Option<ActionCall>,
    ) -> Result<(), ExecutionError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ExecutionError::NodeNotFound(node_id))?;
        let slots: Vec<usize> = node
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, port)| port.port_type.is_event())
            .filter(|(_, port)| event.map_or(true, |name| port.name == name))
            .map(|(slot, _)| slot)
            .collect();

        let call = call.unwrap_or_else(|| self.next_action_call());
        for slot in slots {
            self.trigger_slot_with_call(node_id, slot, param, None, Some(call))?;
        }
        Ok(())
    }

    pub(crate) fn trigger_slot_with_call(
        &mut self,
        node_id: NodeId,
        slot: usize,
        param: &Value,
        link: Option<LinkId>,
        call: Option<ActionCall>,
    ) -> Result<(), ExecutionError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ExecutionError::NodeNotFound(node_id))?;
        let port = node
            .outputs
            .get(slot)
            .ok_or(ExecutionError::SlotNotFound { node: node_id, slot })?;
        let mut targets: Vec<LinkId> = port
            .links
            .iter()
            .copied()
            .filter(|id| link.map_or(true, |only| only == *id))
            .collect();
        targets.sort_unstable();

        let call = call.unwrap_or_else(|| self.next_action_call());
        let now = Instant::now();
        for link_id in targets {
            let Some(link) = self.links.get_mut(&link_id) else {
                continue;
            };
            link.last_fired = Some(now);
            let (target, target_slot) = (link.target_id, link.target_slot);
            self.deliver(target, target_slot, param, call)?;
        }
        Ok(())
    }

    fn deliver(
        &mut self,
        target: NodeId,
        slot: usize,
        param: &Value,
        call: ActionCall,
    ) -> Result<(), ExecutionError> {
        let defer = self.config.defer_actions;
        let Some(node) = self.nodes.get_mut(&target) else {
            return Ok(());
        };
        if node.mode == NodeMode::Never {
            tracing::trace!("Node {} is muted, dropping {}", target, call);
            return Ok(());
        }
        if node.mode == NodeMode::OnTrigger && node.capabilities.execute {
            if node.executing {
                tracing::debug!("Node {} is executing, queueing compute for {}", target, call);
                node.reentrant.push_back(Reentry::Execute(call));
                return Ok(());
            }
            return self.run_execute(target, Some(call));
        }
        if !node.capabilities.action {
            return Ok(());
        }

        let pending = PendingAction {
            action: node
                .inputs
                .get(slot)
                .map(|port| port.name.clone())
                .unwrap_or_default(),
            param: param.clone(),
            call,
        };
        if defer {
            node.pending_actions.push_back(pending);
            return Ok(());
        }
        if node.executing {
            tracing::debug!("Node {} is executing, queueing {} for {}", target, pending.action, call);
            node.reentrant.push_back(Reentry::Action(pending));
            return Ok(());
        }
        self.run_action(target, &pending.action, &pending.param, call)
    }

    pub(crate) fn next_action_call(&mut self) -> ActionCall {
        self.last_action_call += 1;
        ActionCall(self.last_action_call)
    }
}
