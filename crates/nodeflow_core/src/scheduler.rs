// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution ordering and the per-tick loop.
//!
//! # Algorithm
//!
//! The order is derived with Kahn's algorithm over the link topology:
//!
//! 1. Every node's in-degree is the number of its connected inputs; nodes
//!    with none seed a FIFO ready queue.
//! 2. Popping a node appends it to the order and consumes its outgoing
//!    links, releasing targets whose in-degree reaches zero.
//! 3. Nodes left over belong to (or sit downstream of) a cycle. They are
//!    appended in creation order; a cycle reads one-tick-stale data at its
//!    boundary instead of failing.
//! 4. A stable sort by node priority lets types run first or last without
//!    disturbing dependency order among equal priorities.
//!
//! The result is cached on the graph and dropped on any topology change.

use crate::behavior::{NodeBehavior, NodeError};
use crate::evaluation::NodeContext;
use crate::events::{ActionCall, Reentry};
use crate::graph::{Graph, GraphEvent, GraphStatus, StepInfo};
use crate::link::LinkId;
use crate::node::{NodeId, NodeMode};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Cached execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    /// Every node, in execution order
    pub nodes_in_order: Vec<NodeId>,
    /// Nodes with a compute callback, in execution order
    pub nodes_executable: Vec<NodeId>,
}

impl ExecutionOrder {
    /// Position of a node in the order
    pub fn position(&self, node_id: NodeId) -> Option<usize> {
        self.nodes_in_order.iter().position(|id| *id == node_id)
    }
}

/// Error during execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Output slot not found
    #[error("Node {node} has no output slot {slot}")]
    SlotNotFound {
        /// Node addressed
        node: NodeId,
        /// Missing slot
        slot: usize,
    },

    /// A node callback returned an error
    #[error("Node {node} ({node_type}) failed: {source}")]
    NodeFailed {
        /// Failing node
        node: NodeId,
        /// Its type
        node_type: String,
        /// What went wrong
        #[source]
        source: NodeError,
    },
}

impl Graph {
    /// Derive the execution order from the current topology.
    ///
    /// Does not touch the cache; see [`execution_order`](Self::execution_order).
    pub fn compute_execution_order(&self) -> ExecutionOrder {
        let mut remaining: HashMap<NodeId, usize> = HashMap::new();
        let mut ready: VecDeque<NodeId> = VecDeque::new();

        for (id, node) in &self.nodes {
            let degree = node
                .inputs
                .iter()
                .filter(|port| port.link.is_some_and(|link| self.links.contains_key(&link)))
                .count();
            if degree == 0 {
                ready.push_back(*id);
            } else {
                remaining.insert(*id, degree);
            }
        }

        let mut order: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        let mut placed: HashSet<NodeId> = HashSet::with_capacity(self.nodes.len());
        let mut visited_links: HashSet<LinkId> = HashSet::new();

        while let Some(id) = ready.pop_front() {
            order.push(id);
            placed.insert(id);

            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            for port in &node.outputs {
                for link_id in &port.links {
                    if !visited_links.insert(*link_id) {
                        continue;
                    }
                    let Some(link) = self.links.get(link_id) else {
                        continue;
                    };
                    if let Some(degree) = remaining.get_mut(&link.target_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            remaining.remove(&link.target_id);
                            ready.push_back(link.target_id);
                        }
                    }
                }
            }
        }

        // cycle members and everything downstream of them
        for id in self.nodes.keys() {
            if !placed.contains(id) {
                order.push(*id);
            }
        }

        order.sort_by_key(|id| self.nodes.get(id).map_or(0, |n| n.priority));

        let nodes_executable = order
            .iter()
            .copied()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.capabilities.execute))
            .collect();
        ExecutionOrder {
            nodes_in_order: order,
            nodes_executable,
        }
    }

    /// Cached execution order, recomputed if the topology changed.
    pub fn execution_order(&mut self) -> &ExecutionOrder {
        self.ensure_execution_order();
        self.execution_order.get_or_insert_with(ExecutionOrder::default)
    }

    /// Recompute the execution order now and assign every node its position.
    pub fn update_execution_order(&mut self) {
        let order = self.compute_execution_order();
        for (index, id) in order.nodes_in_order.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.order = index;
            }
        }
        self.execution_order = Some(order);
    }

    pub(crate) fn ensure_execution_order(&mut self) {
        if self.execution_order.is_none() {
            self.update_execution_order();
        }
    }

    /// Mark the graph running and notify every node
    pub fn start(&mut self) {
        if self.status == GraphStatus::Running {
            return;
        }
        self.status = GraphStatus::Running;
        self.start_time = Instant::now();
        for node in self.nodes.values_mut() {
            node.with_behavior(|behavior, node| behavior.on_start(node));
        }
        self.notify(GraphEvent::Started);
    }

    /// Mark the graph stopped and notify every node
    pub fn stop(&mut self) {
        if self.status == GraphStatus::Stopped {
            return;
        }
        self.status = GraphStatus::Stopped;
        for node in self.nodes.values_mut() {
            node.with_behavior(|behavior, node| behavior.on_stop(node));
        }
        self.notify(GraphEvent::Stopped);
    }

    /// Run `num` ticks.
    ///
    /// Each tick runs the compute callback of every `ALWAYS` node in
    /// execution order, drains deferred actions, advances the virtual clock
    /// and calls the post-tick hook.
    ///
    /// With [`catch_errors`](crate::GraphConfig::catch_errors) set (the
    /// default) a failing callback halts the loop and stops the graph before
    /// the error is returned. Otherwise the error is returned as-is and the
    /// graph state is left alone.
    pub fn run_step(&mut self, num: usize) -> Result<(), ExecutionError> {
        let start = Instant::now();
        self.ensure_execution_order();
        let executable = self
            .execution_order
            .as_ref()
            .map(|order| order.nodes_executable.clone())
            .unwrap_or_default();

        let result = self.run_ticks(num, &executable);
        self.elapsed_time = start.elapsed();
        self.iteration += 1;

        match result {
            Ok(()) => {
                self.errors_in_execution = false;
                Ok(())
            }
            Err(err) if self.config.catch_errors => {
                tracing::error!("Graph execution halted: {}", err);
                self.errors_in_execution = true;
                self.stop();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn run_ticks(&mut self, num: usize, executable: &[NodeId]) -> Result<(), ExecutionError> {
        for _ in 0..num {
            for id in executable {
                let always = self
                    .nodes
                    .get(id)
                    .is_some_and(|node| node.mode == NodeMode::Always);
                if always {
                    self.run_execute(*id, None)?;
                }
            }
            self.execute_pending_actions()?;

            self.fixed_time += self.config.fixed_time_lapse;
            let info = StepInfo {
                iteration: self.iteration,
                fixed_time: self.fixed_time,
            };
            if let Some(hook) = self.after_step.as_mut() {
                hook(&info);
            }
        }
        Ok(())
    }

    /// Run one node's compute callback regardless of its mode.
    pub fn execute_node(&mut self, node_id: NodeId) -> Result<(), ExecutionError> {
        if !self.nodes.contains_key(&node_id) {
            return Err(ExecutionError::NodeNotFound(node_id));
        }
        self.ensure_execution_order();
        self.run_execute(node_id, None)
    }

    /// Virtual clock, in seconds
    pub fn fixed_time(&self) -> f64 {
        self.fixed_time
    }

    /// Number of completed `run_step` calls
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Wall time spent in the last `run_step`
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed_time
    }

    /// Wall time since the graph was created or last started
    pub fn global_time(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the last `run_step` halted on an error
    pub fn errors_in_execution(&self) -> bool {
        self.errors_in_execution
    }

    pub(crate) fn run_execute(
        &mut self,
        node_id: NodeId,
        call: Option<ActionCall>,
    ) -> Result<(), ExecutionError> {
        match self.invoke(node_id, call, |behavior, ctx| behavior.on_execute(ctx)) {
            Some(Err(source)) => Err(self.node_failed(node_id, source)),
            Some(Ok(())) => self.run_reentrant(node_id),
            None => Ok(()),
        }
    }

    pub(crate) fn run_action(
        &mut self,
        node_id: NodeId,
        action: &str,
        param: &Value,
        call: ActionCall,
    ) -> Result<(), ExecutionError> {
        let result = self.invoke(node_id, Some(call), |behavior, ctx| {
            behavior.on_action(ctx, action, param)
        });
        match result {
            Some(Err(source)) => Err(self.node_failed(node_id, source)),
            Some(Ok(())) => self.run_reentrant(node_id),
            None => Ok(()),
        }
    }

    /// Replay deliveries that reached a node while its callback was on the
    /// stack. A failure drops whatever is still waiting.
    fn run_reentrant(&mut self, node_id: NodeId) -> Result<(), ExecutionError> {
        loop {
            let Some(next) = self
                .nodes
                .get_mut(&node_id)
                .and_then(|node| node.reentrant.pop_front())
            else {
                return Ok(());
            };
            let result = match next {
                Reentry::Execute(call) => self.run_execute(node_id, Some(call)),
                Reentry::Action(pending) => {
                    self.run_action(node_id, &pending.action, &pending.param, pending.call)
                }
            };
            if let Err(err) = result {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.reentrant.clear();
                }
                return Err(err);
            }
        }
    }

    /// Call into a node's behaviour with the executing flag raised.
    ///
    /// Returns `None` when the node is gone or already on the stack. Event
    /// deliveries never get here for an executing node, they are queued in
    /// `Node::reentrant` instead.
    fn invoke<R>(
        &mut self,
        node_id: NodeId,
        call: Option<ActionCall>,
        f: impl FnOnce(&mut dyn NodeBehavior, &mut NodeContext<'_>) -> R,
    ) -> Option<R> {
        let node = self.nodes.get_mut(&node_id)?;
        let Some(mut behavior) = node.behavior.take() else {
            tracing::warn!("Node {} is already executing, skipping re-entrant call", node_id);
            return None;
        };
        node.executing = true;

        let result = {
            let mut ctx = NodeContext::new(self, node_id, call);
            f(behavior.as_mut(), &mut ctx)
        };

        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.behavior = Some(behavior);
            node.executing = false;
        }
        Some(result)
    }

    fn node_failed(&self, node_id: NodeId, source: NodeError) -> ExecutionError {
        ExecutionError::NodeFailed {
            node: node_id,
            node_type: self
                .nodes
                .get(&node_id)
                .map(|n| n.node_type.clone())
                .unwrap_or_default(),
            source,
        }
    }
}
