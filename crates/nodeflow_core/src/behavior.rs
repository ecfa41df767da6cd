// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node behaviour interface.
//!
//! Concrete node types implement [`NodeBehavior`] and override only the
//! callbacks they care about. Every method has a no-op default, so the
//! engine can dispatch through the trait without knowing which
//! capabilities a type provides.

use crate::evaluation::NodeContext;
use crate::link::Link;
use crate::node::Node;
use crate::port::{PortDirection, PortType};
use crate::scheduler::ExecutionError;
use crate::serialize::SerializedNode;
use serde_json::Value;

/// Runtime capabilities a node type declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Has a continuous compute callback (`on_execute`)
    pub execute: bool,
    /// Has an action handler (`on_action`)
    pub action: bool,
}

impl Capabilities {
    /// Pure data holder
    pub const NONE: Self = Self { execute: false, action: false };
    /// Compute callback only
    pub const EXECUTE: Self = Self { execute: true, action: false };
    /// Action handler only
    pub const ACTION: Self = Self { execute: false, action: true };
    /// Both callbacks
    pub const ALL: Self = Self { execute: true, action: true };
}

/// A link was attached to or detached from one of a node's ports.
#[derive(Debug, Clone)]
pub struct ConnectionChange {
    /// Which side of the node changed
    pub direction: PortDirection,
    /// Slot on this node
    pub slot: usize,
    /// `true` when connected, `false` when disconnected
    pub connected: bool,
    /// The link involved (already unregistered when disconnected)
    pub link: Link,
}

/// Error raised from inside a node callback
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// A required input carried no data
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// A property holds an unusable value
    #[error("Invalid property {name}: {reason}")]
    InvalidProperty {
        /// Property name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// A node reached through a trigger failed
    #[error(transparent)]
    Downstream(#[from] Box<ExecutionError>),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl From<ExecutionError> for NodeError {
    fn from(err: ExecutionError) -> Self {
        Self::Downstream(Box::new(err))
    }
}

/// Behaviour of a node type.
///
/// Implementations are created by a [`NodeRegistry`](crate::node::NodeRegistry)
/// factory and owned by their [`Node`].
pub trait NodeBehavior {
    /// Declare ports and default properties on a freshly created node.
    fn init(&mut self, _node: &mut Node) {}

    /// Which callbacks this type provides.
    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    /// Scheduling priority; lower values run earlier, ties keep
    /// dependency order.
    fn priority(&self) -> i32 {
        0
    }

    /// Continuous compute callback.
    fn on_execute(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    /// Handle a discrete action arriving on the input named `action`.
    fn on_action(
        &mut self,
        _ctx: &mut NodeContext<'_>,
        _action: &str,
        _param: &Value,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    /// A property is about to change. Returning `false` keeps the old value.
    fn on_property_changed(
        &mut self,
        _node: &Node,
        _name: &str,
        _value: &Value,
        _previous: Option<&Value>,
    ) -> bool {
        true
    }

    /// Veto a connection into input `slot` from an output of `origin_type`.
    fn on_connect_input(&mut self, _node: &Node, _slot: usize, _origin_type: &PortType) -> bool {
        true
    }

    /// A link was attached or detached.
    fn on_connections_change(&mut self, _node: &mut Node, _change: &ConnectionChange) {}

    /// Add type specific fields to the persisted record.
    fn on_serialize(&self, _node: &Node, _data: &mut SerializedNode) {}

    /// Restore type specific fields from the persisted record.
    fn on_configure(&mut self, _node: &mut Node, _data: &SerializedNode) {}

    /// The node was added to a graph.
    fn on_added(&mut self, _node: &mut Node) {}

    /// The node was removed from a graph.
    fn on_removed(&mut self, _node: &mut Node) {}

    /// The graph started running.
    fn on_start(&mut self, _node: &mut Node) {}

    /// The graph stopped running.
    fn on_stop(&mut self, _node: &mut Node) {}
}

/// Behaviour with no callbacks, used for plain data holders.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passive;

impl NodeBehavior for Passive {}
