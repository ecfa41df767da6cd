// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link (edge) definitions for the graph.

use crate::node::NodeId;
use crate::port::PortType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Instant;

/// Unique identifier for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Get the raw ID value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed edge from an output slot to an input slot.
///
/// Endpoints never change after creation; rewiring destroys the link and
/// creates a new one.
#[derive(Debug, Clone)]
pub struct Link {
    /// Unique link ID
    pub id: LinkId,
    /// Link type, copied from the endpoints at creation
    pub link_type: PortType,
    /// Source node ID
    pub origin_id: NodeId,
    /// Source output slot
    pub origin_slot: usize,
    /// Target node ID
    pub target_id: NodeId,
    /// Target input slot
    pub target_slot: usize,
    /// Last value delivered along this link
    pub data: Option<Value>,
    /// When an event last travelled along this link
    pub last_fired: Option<Instant>,
}

impl Link {
    /// Create a new link
    pub fn new(
        id: LinkId,
        link_type: PortType,
        origin_id: NodeId,
        origin_slot: usize,
        target_id: NodeId,
        target_slot: usize,
    ) -> Self {
        Self {
            id,
            link_type,
            origin_id,
            origin_slot,
            target_id,
            target_slot,
            data: None,
            last_fired: None,
        }
    }

    /// Check if this link involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.origin_id == node_id || self.target_id == node_id
    }

    /// Compact positional form used when persisting
    pub fn serialize(&self) -> SerializedLink {
        SerializedLink(
            self.id,
            self.origin_id,
            self.origin_slot,
            self.target_id,
            self.target_slot,
            self.link_type.clone(),
        )
    }
}

/// Persisted link: `[id, origin_id, origin_slot, target_id, target_slot, type]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedLink(
    pub LinkId,
    pub NodeId,
    pub usize,
    pub NodeId,
    pub usize,
    pub PortType,
);

impl SerializedLink {
    /// Expand back into a keyed link record
    pub fn to_link(&self) -> Link {
        let SerializedLink(id, origin_id, origin_slot, target_id, target_slot, link_type) = self;
        Link::new(
            *id,
            link_type.clone(),
            *origin_id,
            *origin_slot,
            *target_id,
            *target_slot,
        )
    }
}
