// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted graph records and the serialize/configure round trip.
//!
//! Loading runs in two passes. The first instantiates every node through
//! the registry and forces its recorded id; the second hands each node its
//! record, so port and link references resolve no matter which order the
//! nodes were written in. Unknown node types are skipped and reported, and
//! links that lost an endpoint are dropped from both sides.

use crate::graph::{Graph, GraphConfig, GraphEvent};
use crate::group::Group;
use crate::link::{Link, LinkId, SerializedLink};
use crate::node::{NodeFlags, NodeId, NodeMode, NodeRegistry};
use crate::port::{PortDirection, PortType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Current graph format version
pub const FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

fn default_size() -> [f32; 2] {
    [140.0, 26.0]
}

/// Error reading or writing a persisted graph
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// Malformed JSON or a record of the wrong shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File could not be read or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Written by a newer version of the engine
    #[error("Graph format version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the record
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
}

/// Persisted input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedInput {
    /// Port name
    pub name: String,
    /// Wire type
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    /// Attached link
    #[serde(default)]
    pub link: Option<LinkId>,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Persisted output port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedOutput {
    /// Port name
    pub name: String,
    /// Wire type
    #[serde(rename = "type", default)]
    pub port_type: PortType,
    /// Outgoing links
    #[serde(default)]
    pub links: Vec<LinkId>,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Persisted node.
///
/// Keys a node type adds through
/// [`on_serialize`](crate::NodeBehavior::on_serialize) live in `extra` and
/// are written next to the standard fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    /// Node id
    pub id: NodeId,
    /// Registered type name
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Position
    #[serde(default)]
    pub pos: [f32; 2],
    /// Size
    #[serde(default = "default_size")]
    pub size: [f32; 2],
    /// Presentation flags
    #[serde(default)]
    pub flags: NodeFlags,
    /// Position in the execution order at save time
    #[serde(default)]
    pub order: usize,
    /// Execution mode
    #[serde(default)]
    pub mode: NodeMode,
    /// Input ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<SerializedInput>,
    /// Output ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<SerializedOutput>,
    /// Property values
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Value>,
    /// Positional UI widget values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widgets_values: Option<Vec<Value>>,
    /// Title color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Body color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgcolor: Option<String>,
    /// Type specific payload
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Persisted graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedGraph {
    /// Node id counter
    pub last_node_id: u64,
    /// Link id counter
    pub last_link_id: u64,
    /// Nodes in creation order
    pub nodes: Vec<SerializedNode>,
    /// Links as positional tuples, sorted by id
    #[serde(default)]
    pub links: Vec<SerializedLink>,
    /// Annotation groups
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Engine settings
    #[serde(default)]
    pub config: GraphConfig,
    /// Graph-level data kept verbatim
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, Value>,
    /// Format version
    #[serde(default = "default_format_version")]
    pub version: u32,
}

impl SerializedGraph {
    /// Render as compact JSON
    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Render as indented JSON
    pub fn to_json_pretty(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON, rejecting records from a newer format version
    pub fn from_json(text: &str) -> Result<Self, SerializationError> {
        let data: Self = serde_json::from_str(text)?;
        if data.version > FORMAT_VERSION {
            return Err(SerializationError::UnsupportedVersion {
                found: data.version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(data)
    }

    /// Write pretty JSON to a file
    pub fn save(&self, path: &Path) -> Result<(), SerializationError> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Read a graph file
    pub fn load(path: &Path) -> Result<Self, SerializationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// Node that could not be instantiated during a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedNode {
    /// Id in the record
    pub id: NodeId,
    /// Unregistered type name
    pub node_type: String,
}

/// Outcome of [`Graph::configure`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    /// Nodes whose type is not registered
    pub skipped: Vec<SkippedNode>,
    /// Links dropped because an endpoint was missing
    pub repaired_links: Vec<LinkId>,
    /// Nodes that received a new id because theirs was taken
    pub remapped_nodes: Vec<(NodeId, NodeId)>,
}

impl ConfigureReport {
    /// Whether any node failed to load
    pub fn has_errors(&self) -> bool {
        !self.skipped.is_empty()
    }
}

impl Graph {
    /// Persistable snapshot of the whole graph.
    pub fn serialize(&self) -> SerializedGraph {
        let fresh;
        let order = match &self.execution_order {
            Some(order) => order,
            None => {
                fresh = self.compute_execution_order();
                &fresh
            }
        };
        let positions: HashMap<NodeId, usize> = order
            .nodes_in_order
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();

        let nodes = self
            .nodes
            .values()
            .map(|node| {
                let mut data = node.serialize();
                if let Some(index) = positions.get(&node.id) {
                    data.order = *index;
                }
                data
            })
            .collect();

        let mut links: Vec<SerializedLink> = self.links.values().map(Link::serialize).collect();
        links.sort_by_key(|link| link.0);

        SerializedGraph {
            last_node_id: self.last_node_id,
            last_link_id: self.last_link_id,
            nodes,
            links,
            groups: self.groups.clone(),
            config: self.config.clone(),
            extra: self.extra.clone(),
            version: FORMAT_VERSION,
        }
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, SerializationError> {
        self.serialize().to_json()
    }

    /// Replace the graph's content with a persisted record.
    ///
    /// Never fails as a whole: unknown node types are skipped and listed in
    /// the report, links that lost an endpoint are dropped.
    pub fn configure(&mut self, data: &SerializedGraph, registry: &NodeRegistry) -> ConfigureReport {
        self.reset();
        self.config = data.config.clone();
        self.groups = data.groups.clone();
        self.extra = data.extra.clone();
        self.load(data, registry)
    }

    /// Merge a persisted record into the existing content.
    ///
    /// Colliding node and link ids are reassigned and every reference to
    /// them in the record is rewritten. Existing settings are kept.
    pub fn configure_additive(
        &mut self,
        data: &SerializedGraph,
        registry: &NodeRegistry,
    ) -> ConfigureReport {
        self.groups.extend(data.groups.iter().cloned());
        for (key, value) in &data.extra {
            self.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self.load(data, registry)
    }

    /// Parse JSON and [`configure`](Self::configure) from it
    pub fn load_json(
        &mut self,
        text: &str,
        registry: &NodeRegistry,
    ) -> Result<ConfigureReport, SerializationError> {
        let data = SerializedGraph::from_json(text)?;
        Ok(self.configure(&data, registry))
    }

    fn load(&mut self, data: &SerializedGraph, registry: &NodeRegistry) -> ConfigureReport {
        let mut report = ConfigureReport::default();
        self.last_node_id = self.last_node_id.max(data.last_node_id);
        self.last_link_id = self.last_link_id.max(data.last_link_id);

        // first pass: instantiate
        let mut node_ids: HashMap<NodeId, NodeId> = HashMap::new();
        let mut created = Vec::with_capacity(data.nodes.len());
        for record in &data.nodes {
            let Some(mut node) = registry.create_node(&record.node_type) else {
                tracing::warn!(
                    "Unknown node type '{}' for node {}, skipping",
                    record.node_type,
                    record.id
                );
                report.skipped.push(SkippedNode {
                    id: record.id,
                    node_type: record.node_type.clone(),
                });
                continue;
            };
            node.id = record.id;
            let id = self.insert_node(node);
            if id != record.id {
                report.remapped_nodes.push((record.id, id));
            }
            node_ids.insert(record.id, id);
            created.push((id, record));
        }

        let mut link_ids: HashMap<LinkId, LinkId> = HashMap::new();
        let mut loaded: Vec<Link> = Vec::with_capacity(data.links.len());
        let mut dropped: BTreeSet<LinkId> = BTreeSet::new();
        for record in &data.links {
            let mut link = record.to_link();
            let endpoints = (node_ids.get(&link.origin_id), node_ids.get(&link.target_id));
            let (Some(origin), Some(target)) = endpoints else {
                dropped.insert(link.id);
                continue;
            };
            link.origin_id = *origin;
            link.target_id = *target;

            let original = link.id;
            if self.links.contains_key(&link.id) {
                link.id = self.allocate_link_id();
            } else {
                self.last_link_id = self.last_link_id.max(link.id.value());
            }
            link_ids.insert(original, link.id);
            self.links.insert(link.id, link.clone());
            loaded.push(link);
        }

        // second pass: restore state with references rewritten
        for (id, record) in created {
            let mut record = record.clone();
            record.id = id;
            for input in &mut record.inputs {
                input.link = input
                    .link
                    .and_then(|link| remap_link(link, &link_ids, &mut dropped));
            }
            for output in &mut record.outputs {
                output.links = output
                    .links
                    .iter()
                    .filter_map(|link| remap_link(*link, &link_ids, &mut dropped))
                    .collect();
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                node.configure(&record);
            }
        }

        if !dropped.is_empty() {
            tracing::warn!("Dropped {} dangling link(s) while loading", dropped.len());
        }
        report.repaired_links = dropped.into_iter().collect();

        for link in &loaded {
            self.fire_connection_change(
                link.origin_id,
                PortDirection::Output,
                link.origin_slot,
                true,
                link,
            );
            self.fire_connection_change(
                link.target_id,
                PortDirection::Input,
                link.target_slot,
                true,
                link,
            );
        }

        self.update_execution_order();
        self.version += 1;
        self.notify(GraphEvent::Configured);
        tracing::debug!(
            "Configured graph: {} nodes, {} links, {} skipped",
            self.nodes.len(),
            self.links.len(),
            report.skipped.len()
        );
        report
    }
}

fn remap_link(
    link: LinkId,
    link_ids: &HashMap<LinkId, LinkId>,
    dropped: &mut BTreeSet<LinkId>,
) -> Option<LinkId> {
    let mapped = link_ids.get(&link).copied();
    if mapped.is_none() {
        dropped.insert(link);
    }
    mapped
}
