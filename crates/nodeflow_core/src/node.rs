// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.

use crate::behavior::{Capabilities, NodeBehavior};
use crate::events::{PendingAction, Reentry};
use crate::port::{InputPort, OutputPort, PortRef, PortType};
use crate::serialize::{SerializedInput, SerializedNode, SerializedOutput};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a node
///
/// Graphs hand out either sequential integers or random UUIDs, depending on
/// their [`IdStrategy`](crate::graph::IdStrategy). Sequential ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeId {
    /// Sequential id
    Index(u64),
    /// Opaque globally unique id
    Uuid(Uuid),
}

impl NodeId {
    /// Placeholder carried by nodes that were never added to a graph
    pub const UNASSIGNED: Self = Self::Index(0);

    /// Create a new random node ID
    pub fn new_uuid() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// Whether a graph has assigned this id
    pub fn is_assigned(&self) -> bool {
        *self != Self::UNASSIGNED
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::UNASSIGNED
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self::Index(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(id) => write!(f, "{id}"),
            Self::Uuid(id) => write!(f, "{id}"),
        }
    }
}

/// When a node runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMode {
    /// Every tick, in execution order
    #[default]
    Always,
    /// Only in reaction to events
    OnEvent,
    /// Compute callback runs when a trigger arrives
    OnTrigger,
    /// Muted
    Never,
    /// Computed when a downstream node pulls its output
    OnRequest,
}

/// Presentation flags carried along for the editor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFlags {
    /// Collapsed in the UI
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub collapsed: bool,
    /// Pinned in place
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
}

/// A node instance in the graph
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) node_type: String,
    /// Display name (can be customized)
    pub title: String,
    /// Position in the graph UI
    pub pos: [f32; 2],
    /// Size in the graph UI
    pub size: [f32; 2],
    /// Presentation flags
    pub flags: NodeFlags,
    /// Execution mode
    pub mode: NodeMode,
    /// Custom title color
    pub color: Option<String>,
    /// Custom body color
    pub bgcolor: Option<String>,
    /// Positional values of UI widgets bound to this node
    pub widgets_values: Option<Vec<Value>>,
    pub(crate) order: usize,
    pub(crate) inputs: Vec<InputPort>,
    pub(crate) outputs: Vec<OutputPort>,
    pub(crate) properties: IndexMap<String, Value>,
    pub(crate) capabilities: Capabilities,
    pub(crate) priority: i32,
    pub(crate) behavior: Option<Box<dyn NodeBehavior>>,
    pub(crate) executing: bool,
    pub(crate) pending_actions: VecDeque<PendingAction>,
    pub(crate) reentrant: VecDeque<Reentry>,
}

impl Node {
    /// Create a node of `node_type` driven by `behavior`.
    ///
    /// The behaviour's `init` hook runs before this returns, so declared
    /// ports and default properties are already present.
    pub fn new(node_type: impl Into<String>, behavior: Box<dyn NodeBehavior>) -> Self {
        let node_type = node_type.into();
        let title = node_type
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let mut node = Self {
            id: NodeId::UNASSIGNED,
            node_type,
            title,
            pos: [0.0, 0.0],
            size: [140.0, 26.0],
            flags: NodeFlags::default(),
            mode: NodeMode::Always,
            color: None,
            bgcolor: None,
            widgets_values: None,
            order: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: IndexMap::new(),
            capabilities: behavior.capabilities(),
            priority: behavior.priority(),
            behavior: Some(behavior),
            executing: false,
            pending_actions: VecDeque::new(),
            reentrant: VecDeque::new(),
        };
        node.with_behavior(|behavior, node| behavior.init(node));
        node
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the position
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.pos = [x, y];
        self
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Node ID (`NodeId::UNASSIGNED` until added to a graph)
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Registered type name
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Position in the current execution order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Declared capabilities
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Scheduling priority
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether a compute or action callback of this node is running
    pub fn is_executing(&self) -> bool {
        self.executing
    }

    /// Number of actions waiting for the next drain
    pub fn pending_action_count(&self) -> usize {
        self.pending_actions.len()
    }

    /// Input ports
    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    /// Output ports
    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    /// Get an input port by index
    pub fn input(&self, index: usize) -> Option<&InputPort> {
        self.inputs.get(index)
    }

    /// Get an output port by index
    pub fn output(&self, index: usize) -> Option<&OutputPort> {
        self.outputs.get(index)
    }

    /// Append an input port, returning its slot
    pub fn add_input(&mut self, name: impl Into<String>, port_type: impl Into<PortType>) -> usize {
        self.inputs.push(InputPort::new(name, port_type));
        self.inputs.len() - 1
    }

    /// Append an output port, returning its slot
    pub fn add_output(&mut self, name: impl Into<String>, port_type: impl Into<PortType>) -> usize {
        self.outputs.push(OutputPort::new(name, port_type));
        self.outputs.len() - 1
    }

    /// Slot of the first input named `name`
    pub fn find_input_slot(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|p| p.name == name)
    }

    /// Slot of the first output named `name`
    pub fn find_output_slot(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|p| p.name == name)
    }

    /// Resolve an input reference to a slot index
    pub fn resolve_input(&self, port: &PortRef) -> Option<usize> {
        match port {
            PortRef::Index(index) => (*index < self.inputs.len()).then_some(*index),
            PortRef::Name(name) => self.find_input_slot(name),
        }
    }

    /// Resolve an output reference to a slot index
    pub fn resolve_output(&self, port: &PortRef) -> Option<usize> {
        match port {
            PortRef::Index(index) => (*index < self.outputs.len()).then_some(*index),
            PortRef::Name(name) => self.find_output_slot(name),
        }
    }

    /// Find an input slot accepting `port_type`.
    ///
    /// Free ports of exactly that type win, then free wildcard ports when
    /// `wildcard_fallback` is set, then (with `allow_occupied`) occupied
    /// ports in the same order.
    pub fn find_input_slot_by_type(
        &self,
        port_type: &PortType,
        wildcard_fallback: bool,
        allow_occupied: bool,
    ) -> Option<usize> {
        let ports: Vec<(&PortType, bool)> = self
            .inputs
            .iter()
            .map(|p| (&p.port_type, p.is_connected()))
            .collect();
        find_slot_by_type(&ports, port_type, wildcard_fallback, allow_occupied)
    }

    /// Find an output slot producing `port_type`, same rules as
    /// [`find_input_slot_by_type`](Self::find_input_slot_by_type).
    pub fn find_output_slot_by_type(
        &self,
        port_type: &PortType,
        wildcard_fallback: bool,
        allow_occupied: bool,
    ) -> Option<usize> {
        let ports: Vec<(&PortType, bool)> = self
            .outputs
            .iter()
            .map(|p| (&p.port_type, p.is_connected()))
            .collect();
        find_slot_by_type(&ports, port_type, wildcard_fallback, allow_occupied)
    }

    /// All properties
    pub fn properties(&self) -> &IndexMap<String, Value> {
        &self.properties
    }

    /// Get a property value
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Declare a property with its default value.
    ///
    /// Intended for `init`; use [`Graph::set_property`](crate::Graph::set_property)
    /// to change values on a live node.
    pub fn add_property(&mut self, name: impl Into<String>, default: Value) {
        self.properties.insert(name.into(), default);
    }

    /// Persistable snapshot of this node.
    ///
    /// Cached output data is not included, only topology and types.
    pub fn serialize(&self) -> SerializedNode {
        let mut data = SerializedNode {
            id: self.id,
            node_type: self.node_type.clone(),
            title: self.title.clone(),
            pos: self.pos,
            size: self.size,
            flags: self.flags.clone(),
            order: self.order,
            mode: self.mode,
            inputs: self
                .inputs
                .iter()
                .map(|p| SerializedInput {
                    name: p.name.clone(),
                    port_type: p.port_type.clone(),
                    link: p.link,
                    label: p.label.clone(),
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|p| SerializedOutput {
                    name: p.name.clone(),
                    port_type: p.port_type.clone(),
                    links: p.links.clone(),
                    label: p.label.clone(),
                })
                .collect(),
            properties: self.properties.clone(),
            widgets_values: self.widgets_values.clone(),
            color: self.color.clone(),
            bgcolor: self.bgcolor.clone(),
            extra: IndexMap::new(),
        };
        if let Some(behavior) = self.behavior.as_deref() {
            behavior.on_serialize(self, &mut data);
        }
        data
    }

    /// Restore state from a persisted record.
    ///
    /// Properties are merged key by key into the existing map; ports are
    /// rebuilt from the record, including their link references. The id is
    /// left alone, the graph owns it.
    pub fn configure(&mut self, data: &SerializedNode) {
        self.title = data.title.clone();
        self.pos = data.pos;
        self.size = data.size;
        self.flags = data.flags.clone();
        self.mode = data.mode;
        self.order = data.order;
        self.color = data.color.clone();
        self.bgcolor = data.bgcolor.clone();
        self.widgets_values = data.widgets_values.clone();

        self.inputs = data
            .inputs
            .iter()
            .map(|p| InputPort {
                name: p.name.clone(),
                port_type: p.port_type.clone(),
                link: p.link,
                label: p.label.clone(),
            })
            .collect();
        self.outputs = data
            .outputs
            .iter()
            .map(|p| OutputPort {
                name: p.name.clone(),
                port_type: p.port_type.clone(),
                links: p.links.clone(),
                value: None,
                label: p.label.clone(),
            })
            .collect();

        for (name, value) in &data.properties {
            self.properties.insert(name.clone(), value.clone());
        }

        self.with_behavior(|behavior, node| behavior.on_configure(node, data));
    }

    /// Run `f` with the behaviour temporarily detached from the node.
    ///
    /// Returns `None` when the behaviour is already detached, i.e. one of
    /// this node's callbacks is on the stack.
    pub(crate) fn with_behavior<R>(
        &mut self,
        f: impl FnOnce(&mut dyn NodeBehavior, &mut Node) -> R,
    ) -> Option<R> {
        let mut behavior = self.behavior.take()?;
        let result = f(behavior.as_mut(), self);
        self.behavior = Some(behavior);
        Some(result)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("title", &self.title)
            .field("mode", &self.mode)
            .field("order", &self.order)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("properties", &self.properties)
            .field("executing", &self.executing)
            .finish_non_exhaustive()
    }
}

fn find_slot_by_type(
    ports: &[(&PortType, bool)],
    wanted: &PortType,
    wildcard_fallback: bool,
    allow_occupied: bool,
) -> Option<usize> {
    let exact = |t: &PortType| t == wanted;
    let wildcard = |t: &PortType| wildcard_fallback && t.is_any();

    let free = |pred: &dyn Fn(&PortType) -> bool| {
        ports
            .iter()
            .position(|(t, connected)| !*connected && pred(*t))
    };
    let any = |pred: &dyn Fn(&PortType) -> bool| ports.iter().position(|(t, _)| pred(*t));

    free(&exact).or_else(|| free(&wildcard)).or_else(|| {
        if allow_occupied {
            any(&exact).or_else(|| any(&wildcard))
        } else {
            None
        }
    })
}

/// Factory producing a fresh behaviour instance
pub type NodeFactory = Box<dyn Fn() -> Box<dyn NodeBehavior>>;

/// Node type metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeInfo {
    /// Hierarchical type name, e.g. `"math/operation"`
    pub type_name: String,
    /// Default display title
    pub title: String,
    /// Description
    pub description: String,
}

impl NodeTypeInfo {
    /// Create type metadata
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            title: title.into(),
            description: String::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Category path: the type name without its last segment
    pub fn category(&self) -> &str {
        self.type_name
            .rsplit_once('/')
            .map(|(category, _)| category)
            .unwrap_or("")
    }
}

struct RegisteredType {
    info: NodeTypeInfo,
    factory: NodeFactory,
}

/// Registry of available node types
#[derive(Default)]
pub struct NodeRegistry {
    /// Registered node types by type name
    types: IndexMap<String, RegisteredType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type.
    ///
    /// Registering an existing name replaces it; the previous metadata is
    /// returned.
    pub fn register(
        &mut self,
        info: NodeTypeInfo,
        factory: impl Fn() -> Box<dyn NodeBehavior> + 'static,
    ) -> Option<NodeTypeInfo> {
        let type_name = info.type_name.clone();
        let previous = self.types.insert(
            type_name.clone(),
            RegisteredType {
                info,
                factory: Box::new(factory),
            },
        );
        if previous.is_some() {
            tracing::warn!("Replacing node type {}", type_name);
        } else {
            tracing::debug!("Registered node type {}", type_name);
        }
        previous.map(|p| p.info)
    }

    /// Register a default-constructible behaviour type
    pub fn register_type<T>(
        &mut self,
        type_name: impl Into<String>,
        title: impl Into<String>,
    ) -> Option<NodeTypeInfo>
    where
        T: NodeBehavior + Default + 'static,
    {
        self.register(NodeTypeInfo::new(type_name, title), || {
            Box::new(T::default())
        })
    }

    /// Remove a node type
    pub fn unregister(&mut self, type_name: &str) -> Option<NodeTypeInfo> {
        self.types.shift_remove(type_name).map(|t| t.info)
    }

    /// Get a node type by name
    pub fn get(&self, type_name: &str) -> Option<&NodeTypeInfo> {
        self.types.get(type_name).map(|t| &t.info)
    }

    /// Whether `type_name` is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeTypeInfo> {
        self.types.values().map(|t| &t.info)
    }

    /// Distinct categories, in registration order
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = Vec::new();
        for info in self.types() {
            let category = info.category();
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        categories
    }

    /// Get types by category
    pub fn types_in_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a NodeTypeInfo> + 'a {
        self.types().filter(move |t| t.category() == category)
    }

    /// Create a node from a type name
    pub fn create_node(&self, type_name: &str) -> Option<Node> {
        let registered = self.types.get(type_name)?;
        let node = Node::new(type_name, (registered.factory)());
        Some(node.with_title(registered.info.title.clone()))
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}
