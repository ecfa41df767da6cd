// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection management: creating and tearing down links.
//!
//! All mutating calls either succeed completely or leave the graph
//! untouched. Both sides of every link reference are kept in sync.

use crate::behavior::ConnectionChange;
use crate::graph::{Graph, GraphEvent};
use crate::link::{Link, LinkId};
use crate::node::NodeId;
use crate::port::{PortDirection, PortRef, PortType};

/// Error when creating a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Port not found
    #[error("Port {port} not found on node {node}")]
    PortNotFound {
        /// Node searched
        node: NodeId,
        /// Unresolved port reference
        port: PortRef,
    },

    /// Incompatible port types
    #[error("Incompatible port types: {origin} -> {target}")]
    IncompatiblePorts {
        /// Output type
        origin: PortType,
        /// Input type
        target: PortType,
    },

    /// Self-loop not allowed
    #[error("Self-loop not allowed")]
    SelfLoop,

    /// The target node type refused the connection
    #[error("Connection rejected by node {0}")]
    Rejected(NodeId),

    /// Auto-matching found no suitable port
    #[error("No port of type {port_type} available on node {node}")]
    NoMatchingPort {
        /// Node searched
        node: NodeId,
        /// Type looked for
        port_type: PortType,
    },
}

/// Search rules for [`Graph::connect_by_type`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectByTypeOptions {
    /// Fall back to a free wildcard port
    pub wildcard_fallback: bool,
    /// Accept an occupied port (its link is replaced) when nothing is free
    pub allow_occupied: bool,
    /// Create a new port when nothing matches
    pub create_port: bool,
}

impl Default for ConnectByTypeOptions {
    fn default() -> Self {
        Self {
            wildcard_fallback: true,
            allow_occupied: false,
            create_port: false,
        }
    }
}

impl Graph {
    /// Connect an output of `origin` to an input of `target`.
    ///
    /// Ports are addressed by index or by name. An existing link on the
    /// target input is replaced. When multi-consumer events are disabled,
    /// an event output drops its previous link first.
    pub fn connect(
        &mut self,
        origin: NodeId,
        output: impl Into<PortRef>,
        target: NodeId,
        input: impl Into<PortRef>,
    ) -> Result<LinkId, ConnectionError> {
        let output = output.into();
        let input = input.into();

        let origin_node = self
            .nodes
            .get(&origin)
            .ok_or(ConnectionError::NodeNotFound(origin))?;
        let target_node = self
            .nodes
            .get(&target)
            .ok_or(ConnectionError::NodeNotFound(target))?;

        let origin_slot =
            origin_node
                .resolve_output(&output)
                .ok_or_else(|| ConnectionError::PortNotFound {
                    node: origin,
                    port: output.clone(),
                })?;
        let target_slot =
            target_node
                .resolve_input(&input)
                .ok_or_else(|| ConnectionError::PortNotFound {
                    node: target,
                    port: input.clone(),
                })?;

        if origin == target {
            return Err(ConnectionError::SelfLoop);
        }

        let origin_type = origin_node.outputs[origin_slot].port_type.clone();
        let target_type = target_node.inputs[target_slot].port_type.clone();
        if !origin_type.can_connect_to(&target_type) {
            tracing::debug!(
                "Refusing link {}[{}] -> {}[{}]: {} vs {}",
                origin,
                origin_slot,
                target,
                target_slot,
                origin_type,
                target_type
            );
            return Err(ConnectionError::IncompatiblePorts {
                origin: origin_type,
                target: target_type,
            });
        }

        let accepted = self
            .nodes
            .get_mut(&target)
            .and_then(|node| {
                node.with_behavior(|behavior, node| {
                    behavior.on_connect_input(node, target_slot, &origin_type)
                })
            })
            .unwrap_or(true);
        if !accepted {
            return Err(ConnectionError::Rejected(target));
        }

        self.detach_input(target, target_slot);
        if origin_type.is_event() && !self.config.allow_multi_output_for_events {
            self.detach_output(origin, origin_slot, None);
        }

        let id = self.allocate_link_id();
        let link_type = if target_type.is_any() {
            origin_type
        } else {
            target_type
        };
        let link = Link::new(id, link_type, origin, origin_slot, target, target_slot);
        self.links.insert(id, link.clone());
        if let Some(node) = self.nodes.get_mut(&origin) {
            node.outputs[origin_slot].links.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&target) {
            node.inputs[target_slot].link = Some(id);
        }

        self.invalidate_order();
        self.version += 1;
        self.fire_connection_change(origin, PortDirection::Output, origin_slot, true, &link);
        self.fire_connection_change(target, PortDirection::Input, target_slot, true, &link);
        self.notify(GraphEvent::LinkAdded(id));
        tracing::trace!("Linked {}[{}] -> {}[{}] as {}", origin, origin_slot, target, target_slot, id);
        Ok(id)
    }

    /// Connect an output to the best matching input of `target`.
    ///
    /// Looks for a free input of exactly the output's type, then a free
    /// wildcard input, then (if allowed) an occupied one, and finally
    /// creates a new input when `create_port` is set.
    pub fn connect_by_type(
        &mut self,
        origin: NodeId,
        output: impl Into<PortRef>,
        target: NodeId,
        options: ConnectByTypeOptions,
    ) -> Result<LinkId, ConnectionError> {
        let output = output.into();
        let origin_node = self
            .nodes
            .get(&origin)
            .ok_or(ConnectionError::NodeNotFound(origin))?;
        let origin_slot =
            origin_node
                .resolve_output(&output)
                .ok_or_else(|| ConnectionError::PortNotFound {
                    node: origin,
                    port: output.clone(),
                })?;
        let port_type = origin_node.outputs[origin_slot].port_type.clone();

        let target_node = self
            .nodes
            .get(&target)
            .ok_or(ConnectionError::NodeNotFound(target))?;
        let found = target_node.find_input_slot_by_type(
            &port_type,
            options.wildcard_fallback,
            options.allow_occupied,
        );
        match found {
            Some(slot) => self.connect(origin, origin_slot, target, slot),
            None if options.create_port => {
                // the port only becomes visible once the link is accepted
                let slot = self
                    .nodes
                    .get_mut(&target)
                    .ok_or(ConnectionError::NodeNotFound(target))?
                    .add_input(port_type.to_string(), port_type);
                let result = self.connect(origin, origin_slot, target, slot);
                self.settle_created_port(target, PortDirection::Input, slot, result.is_ok());
                result
            }
            None => Err(ConnectionError::NoMatchingPort {
                node: target,
                port_type,
            }),
        }
    }

    /// Connect the best matching output of `origin` to an input of `target`.
    ///
    /// Mirror image of [`connect_by_type`](Self::connect_by_type).
    pub fn connect_by_type_output(
        &mut self,
        origin: NodeId,
        target: NodeId,
        input: impl Into<PortRef>,
        options: ConnectByTypeOptions,
    ) -> Result<LinkId, ConnectionError> {
        let input = input.into();
        let target_node = self
            .nodes
            .get(&target)
            .ok_or(ConnectionError::NodeNotFound(target))?;
        let target_slot =
            target_node
                .resolve_input(&input)
                .ok_or_else(|| ConnectionError::PortNotFound {
                    node: target,
                    port: input.clone(),
                })?;
        let port_type = target_node.inputs[target_slot].port_type.clone();

        let origin_node = self
            .nodes
            .get(&origin)
            .ok_or(ConnectionError::NodeNotFound(origin))?;
        let found = origin_node.find_output_slot_by_type(
            &port_type,
            options.wildcard_fallback,
            // outputs fan out, so occupied ones are always usable
            true,
        );
        match found {
            Some(slot) => self.connect(origin, slot, target, target_slot),
            None if options.create_port => {
                let slot = self
                    .nodes
                    .get_mut(&origin)
                    .ok_or(ConnectionError::NodeNotFound(origin))?
                    .add_output(port_type.to_string(), port_type);
                let result = self.connect(origin, slot, target, target_slot);
                self.settle_created_port(origin, PortDirection::Output, slot, result.is_ok());
                result
            }
            None => Err(ConnectionError::NoMatchingPort {
                node: origin,
                port_type,
            }),
        }
    }

    /// Announce a port added by auto-matching, or drop it again when the
    /// link it was made for was refused.
    fn settle_created_port(
        &mut self,
        node_id: NodeId,
        direction: PortDirection,
        slot: usize,
        linked: bool,
    ) {
        if linked {
            self.version += 1;
            self.notify(GraphEvent::PortsChanged(node_id));
            return;
        }
        if let Some(node) = self.nodes.get_mut(&node_id) {
            match direction {
                PortDirection::Input => node.inputs.truncate(slot),
                PortDirection::Output => node.outputs.truncate(slot),
            }
        }
    }

    /// Remove the link attached to an input.
    ///
    /// Returns whether a link was removed.
    pub fn disconnect_input(
        &mut self,
        node_id: NodeId,
        input: impl Into<PortRef>,
    ) -> Result<bool, ConnectionError> {
        let input = input.into();
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ConnectionError::NodeNotFound(node_id))?;
        let slot = node
            .resolve_input(&input)
            .ok_or(ConnectionError::PortNotFound {
                node: node_id,
                port: input,
            })?;
        Ok(self.detach_input(node_id, slot).is_some())
    }

    /// Remove links leaving an output, either all of them or only those
    /// reaching `target`.
    ///
    /// Returns whether anything was removed.
    pub fn disconnect_output(
        &mut self,
        node_id: NodeId,
        output: impl Into<PortRef>,
        target: Option<NodeId>,
    ) -> Result<bool, ConnectionError> {
        let output = output.into();
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(ConnectionError::NodeNotFound(node_id))?;
        let slot = node
            .resolve_output(&output)
            .ok_or(ConnectionError::PortNotFound {
                node: node_id,
                port: output,
            })?;
        Ok(!self.detach_output(node_id, slot, target).is_empty())
    }

    /// Remove a link by id, clearing both of its endpoints
    pub fn remove_link(&mut self, link_id: LinkId) -> Option<Link> {
        let link = self.links.shift_remove(&link_id)?;

        if let Some(node) = self.nodes.get_mut(&link.target_id) {
            if let Some(port) = node.inputs.get_mut(link.target_slot) {
                if port.link == Some(link_id) {
                    port.link = None;
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(&link.origin_id) {
            if let Some(port) = node.outputs.get_mut(link.origin_slot) {
                port.links.retain(|id| *id != link_id);
            }
        }

        self.invalidate_order();
        self.version += 1;
        self.fire_connection_change(
            link.origin_id,
            PortDirection::Output,
            link.origin_slot,
            false,
            &link,
        );
        self.fire_connection_change(
            link.target_id,
            PortDirection::Input,
            link.target_slot,
            false,
            &link,
        );
        self.notify(GraphEvent::LinkRemoved(link_id));
        Some(link)
    }

    pub(crate) fn detach_input(&mut self, node_id: NodeId, slot: usize) -> Option<Link> {
        let link_id = self.nodes.get(&node_id)?.inputs.get(slot)?.link?;
        self.remove_link(link_id)
    }

    pub(crate) fn detach_output(
        &mut self,
        node_id: NodeId,
        slot: usize,
        target: Option<NodeId>,
    ) -> Vec<Link> {
        let Some(port) = self.nodes.get(&node_id).and_then(|n| n.outputs.get(slot)) else {
            return Vec::new();
        };
        let doomed: Vec<LinkId> = port
            .links
            .iter()
            .copied()
            .filter(|id| match (target, self.links.get(id)) {
                (Some(target), Some(link)) => link.target_id == target,
                _ => true,
            })
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.remove_link(id))
            .collect()
    }

    pub(crate) fn allocate_link_id(&mut self) -> LinkId {
        loop {
            self.last_link_id += 1;
            let id = LinkId(self.last_link_id);
            if !self.links.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn fire_connection_change(
        &mut self,
        node_id: NodeId,
        direction: PortDirection,
        slot: usize,
        connected: bool,
        link: &Link,
    ) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let change = ConnectionChange {
            direction,
            slot,
            connected,
            link: link.clone(),
        };
        node.with_behavior(|behavior, node| behavior.on_connections_change(node, &change));
    }
}
