// SPDX-License-Identifier: MIT OR Apache-2.0
//! Annotation groups: titled rectangles drawn behind nodes.
//!
//! Groups carry no execution semantics. They are persisted with the graph
//! so editors can restore them.

use crate::graph::Graph;
use crate::node::{Node, NodeId};
use serde::{Deserialize, Serialize};

fn default_font_size() -> f32 {
    24.0
}

/// A titled rectangle in graph space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Title shown in the header
    pub title: String,
    /// `[x, y, width, height]`
    #[serde(default)]
    pub bounding: [f32; 4],
    /// Fill color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Title font size
    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

impl Group {
    /// Create an empty group at the origin
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            bounding: [0.0, 0.0, 140.0, 80.0],
            color: None,
            font_size: default_font_size(),
        }
    }

    /// Set position and size
    pub fn with_bounding(mut self, x: f32, y: f32, width: f32, height: f32) -> Self {
        self.bounding = [x, y, width, height];
        self
    }

    /// Set the fill color
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Whether a point lies inside the rectangle, edges included
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        let [gx, gy, w, h] = self.bounding;
        x >= gx && x <= gx + w && y >= gy && y <= gy + h
    }

    /// Whether a node's whole body lies inside the rectangle
    pub fn contains_node(&self, node: &Node) -> bool {
        let [x, y] = node.pos;
        let [w, h] = node.size;
        self.contains_point(x, y) && self.contains_point(x + w, y + h)
    }
}

impl Graph {
    /// Nodes fully enclosed by the group at `index`, in creation order
    pub fn nodes_in_group(&self, index: usize) -> Vec<NodeId> {
        let Some(group) = self.groups.get(index) else {
            return Vec::new();
        };
        self.nodes
            .values()
            .filter(|node| group.contains_node(node))
            .map(Node::id)
            .collect()
    }
}
