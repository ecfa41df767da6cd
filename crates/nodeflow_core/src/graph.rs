// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and links.

use crate::group::Group;
use crate::link::{Link, LinkId};
use crate::node::{Node, NodeId, NodeRegistry};
use crate::port::PortType;
use crate::scheduler::ExecutionOrder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

/// How a graph allocates node ids. Chosen once, at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// Monotonic integers starting at 1
    #[default]
    Sequential,
    /// Random v4 UUIDs
    Uuid,
}

/// Engine settings persisted with the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Event outputs may feed several consumers
    pub allow_multi_output_for_events: bool,
    /// Queue action deliveries on the target node and drain them once per tick
    pub defer_actions: bool,
    /// Halt and stop the graph on a compute error; `false` propagates it as-is
    pub catch_errors: bool,
    /// Virtual clock increment per tick, in seconds
    pub fixed_time_lapse: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            allow_multi_output_for_events: true,
            defer_actions: false,
            catch_errors: true,
            fixed_time_lapse: 0.01,
        }
    }
}

impl GraphConfig {
    /// Parse a RON config file
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    /// Render as pretty RON
    pub fn to_ron(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }
}

/// Run state of the tick loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GraphStatus {
    /// Not running
    #[default]
    Stopped,
    /// Driven by an external clock
    Running,
}

/// Change notification sent to graph listeners
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// A node was added
    NodeAdded(NodeId),
    /// A node was removed
    NodeRemoved(NodeId),
    /// A link was created
    LinkAdded(LinkId),
    /// A link was destroyed
    LinkRemoved(LinkId),
    /// A node gained or lost a port
    PortsChanged(NodeId),
    /// A property value changed
    PropertyChanged {
        /// Node owning the property
        node: NodeId,
        /// Property name
        name: String,
    },
    /// The graph was loaded from a persisted record
    Configured,
    /// An annotation group was added or removed
    GroupsChanged,
    /// All content was removed
    Cleared,
    /// The graph started running
    Started,
    /// The graph stopped running
    Stopped,
}

/// Handle returned by [`Graph::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Passed to the post-tick hook after every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Completed `run_step` calls before this one
    pub iteration: u64,
    /// Virtual clock after this tick
    pub fixed_time: f64,
}

type Listener = Box<dyn FnMut(&GraphEvent)>;
type StepHook = Box<dyn FnMut(&StepInfo)>;

/// A node graph
pub struct Graph {
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) links: IndexMap<LinkId, Link>,
    pub(crate) groups: Vec<Group>,
    pub(crate) last_node_id: u64,
    pub(crate) last_link_id: u64,
    pub(crate) id_strategy: IdStrategy,
    pub(crate) config: GraphConfig,
    pub(crate) version: u64,
    pub(crate) status: GraphStatus,
    pub(crate) execution_order: Option<ExecutionOrder>,
    pub(crate) fixed_time: f64,
    pub(crate) iteration: u64,
    pub(crate) start_time: Instant,
    pub(crate) elapsed_time: Duration,
    pub(crate) errors_in_execution: bool,
    pub(crate) last_action_call: u64,
    pub(crate) extra: IndexMap<String, Value>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    pub(crate) after_step: Option<StepHook>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            links: IndexMap::new(),
            groups: Vec::new(),
            last_node_id: 0,
            last_link_id: 0,
            id_strategy: IdStrategy::default(),
            config: GraphConfig::default(),
            version: 0,
            status: GraphStatus::Stopped,
            execution_order: None,
            fixed_time: 0.0,
            iteration: 0,
            start_time: Instant::now(),
            elapsed_time: Duration::ZERO,
            errors_in_execution: false,
            last_action_call: 0,
            extra: IndexMap::new(),
            listeners: Vec::new(),
            next_listener: 0,
            after_step: None,
        }
    }

    /// Create an empty graph using the given id strategy
    pub fn with_id_strategy(id_strategy: IdStrategy) -> Self {
        Self {
            id_strategy,
            ..Self::new()
        }
    }

    /// Replace the engine settings
    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Id strategy chosen at construction
    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
    }

    /// Engine settings
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Mutable engine settings
    pub fn config_mut(&mut self) -> &mut GraphConfig {
        &mut self.config
    }

    /// Mutation counter; changes on every topology or property edit
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current run state
    pub fn status(&self) -> GraphStatus {
        self.status
    }

    /// Extra graph-level data, persisted verbatim
    pub fn extra(&self) -> &IndexMap<String, Value> {
        &self.extra
    }

    /// Mutable graph-level data
    pub fn extra_mut(&mut self) -> &mut IndexMap<String, Value> {
        &mut self.extra
    }

    /// Add a node to the graph.
    ///
    /// A node whose id is unassigned or already taken gets a fresh one.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.insert_node(node);
        self.version += 1;
        self.notify(GraphEvent::NodeAdded(id));
        id
    }

    /// Registers a node without bumping the version or notifying.
    pub(crate) fn insert_node(&mut self, mut node: Node) -> NodeId {
        let id = self.allocate_node_id(node.id);
        node.id = id;
        node.with_behavior(|behavior, node| behavior.on_added(node));
        self.nodes.insert(id, node);
        self.invalidate_order();
        tracing::trace!("Added node {} ({})", id, self.nodes[&id].node_type);
        id
    }

    fn allocate_node_id(&mut self, requested: NodeId) -> NodeId {
        if requested.is_assigned() && !self.nodes.contains_key(&requested) {
            if let NodeId::Index(n) = requested {
                self.last_node_id = self.last_node_id.max(n);
            }
            return requested;
        }
        match self.id_strategy {
            IdStrategy::Sequential => loop {
                self.last_node_id += 1;
                let id = NodeId::Index(self.last_node_id);
                if !self.nodes.contains_key(&id) {
                    break id;
                }
            },
            IdStrategy::Uuid => NodeId::new_uuid(),
        }
    }

    /// Remove a node and its links
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let (inputs, outputs) = {
            let node = self.nodes.get(&node_id)?;
            (node.inputs.len(), node.outputs.len())
        };
        for slot in 0..inputs {
            self.detach_input(node_id, slot);
        }
        for slot in 0..outputs {
            self.detach_output(node_id, slot, None);
        }

        let mut node = self.nodes.shift_remove(&node_id)?;
        node.with_behavior(|behavior, node| behavior.on_removed(node));
        self.invalidate_order();
        self.version += 1;
        self.notify(GraphEvent::NodeRemoved(node_id));
        Some(node)
    }

    /// Remove every node, link and group and reset the id counters
    pub fn clear(&mut self) {
        self.reset();
        self.version += 1;
        self.notify(GraphEvent::Cleared);
    }

    pub(crate) fn reset(&mut self) {
        self.stop();
        for node in self.nodes.values_mut() {
            node.with_behavior(|behavior, node| behavior.on_removed(node));
        }
        self.nodes.clear();
        self.links.clear();
        self.groups.clear();
        self.extra.clear();
        self.last_node_id = 0;
        self.last_link_id = 0;
        self.fixed_time = 0.0;
        self.iteration = 0;
        self.errors_in_execution = false;
        self.last_action_call = 0;
        self.invalidate_order();
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get all nodes, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all node IDs, in creation order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get a link by ID
    pub fn link(&self, link_id: LinkId) -> Option<&Link> {
        self.links.get(&link_id)
    }

    /// Get all links
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Get the number of links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Get links involving a node
    pub fn links_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Link> {
        self.links.values().filter(move |l| l.involves_node(node_id))
    }

    /// Nodes of a given type
    pub fn find_nodes_by_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.node_type == node_type)
    }

    /// Nodes with a given title
    pub fn find_nodes_by_title<'a>(&'a self, title: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.values().filter(move |n| n.title == title)
    }

    /// First node with a given title
    pub fn find_node_by_title<'a>(&'a self, title: &'a str) -> Option<&'a Node> {
        self.find_nodes_by_title(title).next()
    }

    /// Set a property on a node.
    ///
    /// The node type may veto the change; returns whether the value was
    /// stored.
    pub fn set_property(&mut self, node_id: NodeId, name: &str, value: Value) -> bool {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        let previous = node.properties.get(name).cloned();
        let accepted = node
            .with_behavior(|behavior, node| {
                behavior.on_property_changed(node, name, &value, previous.as_ref())
            })
            .unwrap_or(true);
        if !accepted {
            tracing::debug!("Node {} rejected property {}", node_id, name);
            return false;
        }
        node.properties.insert(name.to_string(), value);
        self.version += 1;
        self.notify(GraphEvent::PropertyChanged {
            node: node_id,
            name: name.to_string(),
        });
        true
    }

    /// Append an input port to a node in the graph
    pub fn add_input(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        port_type: impl Into<PortType>,
    ) -> Option<usize> {
        let slot = self.nodes.get_mut(&node_id)?.add_input(name, port_type);
        self.version += 1;
        self.notify(GraphEvent::PortsChanged(node_id));
        Some(slot)
    }

    /// Append an output port to a node in the graph
    pub fn add_output(
        &mut self,
        node_id: NodeId,
        name: impl Into<String>,
        port_type: impl Into<PortType>,
    ) -> Option<usize> {
        let slot = self.nodes.get_mut(&node_id)?.add_output(name, port_type);
        self.version += 1;
        self.notify(GraphEvent::PortsChanged(node_id));
        Some(slot)
    }

    /// Remove an input port, disconnecting it first.
    ///
    /// Links into later slots are renumbered.
    pub fn remove_input(&mut self, node_id: NodeId, slot: usize) -> bool {
        if self.node(node_id).and_then(|n| n.input(slot)).is_none() {
            return false;
        }
        self.detach_input(node_id, slot);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        node.inputs.remove(slot);
        for port in &node.inputs[slot..] {
            if let Some(link) = port.link.and_then(|id| self.links.get_mut(&id)) {
                link.target_slot -= 1;
            }
        }
        self.version += 1;
        self.notify(GraphEvent::PortsChanged(node_id));
        true
    }

    /// Remove an output port, disconnecting it first.
    ///
    /// Links out of later slots are renumbered.
    pub fn remove_output(&mut self, node_id: NodeId, slot: usize) -> bool {
        if self.node(node_id).and_then(|n| n.output(slot)).is_none() {
            return false;
        }
        self.detach_output(node_id, slot, None);
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return false;
        };
        node.outputs.remove(slot);
        for port in &node.outputs[slot..] {
            for id in &port.links {
                if let Some(link) = self.links.get_mut(id) {
                    link.origin_slot -= 1;
                }
            }
        }
        self.version += 1;
        self.notify(GraphEvent::PortsChanged(node_id));
        true
    }

    /// Detached copy of a node, without links and without an id.
    pub fn clone_node(&self, node_id: NodeId, registry: &NodeRegistry) -> Option<Node> {
        let node = self.nodes.get(&node_id)?;
        let mut data = node.serialize();
        for input in &mut data.inputs {
            input.link = None;
        }
        for output in &mut data.outputs {
            output.links.clear();
        }
        let mut copy = registry.create_node(&node.node_type)?;
        copy.configure(&data);
        Some(copy)
    }

    /// Annotation groups
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Add an annotation group
    pub fn add_group(&mut self, group: Group) {
        self.groups.push(group);
        self.version += 1;
        self.notify(GraphEvent::GroupsChanged);
    }

    /// Remove an annotation group by index
    pub fn remove_group(&mut self, index: usize) -> Option<Group> {
        if index >= self.groups.len() {
            return None;
        }
        let group = self.groups.remove(index);
        self.version += 1;
        self.notify(GraphEvent::GroupsChanged);
        Some(group)
    }

    /// Register a change listener
    pub fn subscribe(&mut self, listener: impl FnMut(&GraphEvent) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a change listener
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    /// Install the hook called after every tick of [`run_step`](Self::run_step)
    pub fn set_after_step_hook(&mut self, hook: impl FnMut(&StepInfo) + 'static) {
        self.after_step = Some(Box::new(hook));
    }

    /// Remove the post-tick hook
    pub fn clear_after_step_hook(&mut self) {
        self.after_step = None;
    }

    pub(crate) fn notify(&mut self, event: GraphEvent) {
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }

    pub(crate) fn invalidate_order(&mut self) {
        self.execution_order = None;
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .field("version", &self.version)
            .field("status", &self.status)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::Passive;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn plain(node_type: &str) -> Node {
        Node::new(node_type, Box::new(Passive))
    }

    #[test]
    fn test_sequential_ids() {
        let mut graph = Graph::new();
        let a = graph.add_node(plain("test/a"));
        let b = graph.add_node(plain("test/b"));
        assert_eq!(a, NodeId::Index(1));
        assert_eq!(b, NodeId::Index(2));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_uuid_ids() {
        let mut graph = Graph::with_id_strategy(IdStrategy::Uuid);
        let a = graph.add_node(plain("test/a"));
        assert!(matches!(a, NodeId::Uuid(_)));
        assert_eq!(graph.node(a).unwrap().id(), a);
    }

    #[test]
    fn test_forced_id_is_kept_and_counter_advances() {
        let mut graph = Graph::new();
        let mut node = plain("test/a");
        node.id = NodeId::Index(10);
        assert_eq!(graph.add_node(node), NodeId::Index(10));

        let mut clash = plain("test/b");
        clash.id = NodeId::Index(10);
        assert_eq!(graph.add_node(clash), NodeId::Index(11));
    }

    #[test]
    fn test_version_bumps() {
        let mut graph = Graph::new();
        let v0 = graph.version();
        let a = graph.add_node(plain("test/a"));
        assert!(graph.version() > v0);

        let v1 = graph.version();
        assert!(graph.set_property(a, "value", json!(3)));
        assert!(graph.version() > v1);
        assert_eq!(graph.node(a).unwrap().property("value"), Some(&json!(3)));
        assert!(!graph.set_property(NodeId::Index(99), "value", json!(1)));
    }

    #[test]
    fn test_find_nodes() {
        let mut graph = Graph::new();
        graph.add_node(plain("math/add").with_title("first"));
        graph.add_node(plain("math/add").with_title("second"));
        graph.add_node(plain("math/sub").with_title("first"));

        assert_eq!(graph.find_nodes_by_type("math/add").count(), 2);
        assert_eq!(graph.find_nodes_by_title("first").count(), 2);
        assert_eq!(
            graph.find_node_by_title("first").map(Node::node_type),
            Some("math/add")
        );
    }

    #[test]
    fn test_listeners_receive_events() {
        let mut graph = Graph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let listener = graph.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        let a = graph.add_node(plain("test/a"));
        graph.remove_node(a);
        assert!(graph.unsubscribe(listener));
        graph.add_node(plain("test/b"));

        assert_eq!(
            *seen.borrow(),
            vec![GraphEvent::NodeAdded(a), GraphEvent::NodeRemoved(a)]
        );
    }

    #[test]
    fn test_group_edits_notify() {
        let mut graph = Graph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        graph.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        let v0 = graph.version();
        graph.add_group(Group::new("notes"));
        assert!(graph.remove_group(0).is_some());
        assert!(graph.remove_group(0).is_none());

        assert_eq!(graph.version(), v0 + 2);
        assert_eq!(
            *seen.borrow(),
            vec![GraphEvent::GroupsChanged, GraphEvent::GroupsChanged]
        );
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut graph = Graph::new();
        graph.add_node(plain("test/a"));
        graph.add_group(Group::new("notes"));
        graph.clear();
        assert_eq!(graph.node_count(), 0);
        assert!(graph.groups().is_empty());
        assert_eq!(graph.add_node(plain("test/b")), NodeId::Index(1));
    }

    #[test]
    fn test_config_ron_roundtrip() {
        let config = GraphConfig {
            defer_actions: true,
            ..GraphConfig::default()
        };
        let text = config.to_ron().unwrap();
        assert_eq!(GraphConfig::from_ron(&text).unwrap(), config);
        let partial = GraphConfig::from_ron("(catch_errors: false)").unwrap();
        assert!(!partial.catch_errors);
        assert!(partial.allow_multi_output_for_events);
    }
}
