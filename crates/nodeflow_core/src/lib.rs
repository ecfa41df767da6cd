// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow and event execution core for node-based visual programming.
//!
//! A [`Graph`] holds nodes connected by typed links and runs them in two
//! coupled ways:
//! - per tick, every `ALWAYS` node computes once, in dependency order
//! - on demand, discrete events travel along event links to action handlers
//!
//! ## Architecture
//!
//! The crate is built around:
//! - Typed input/output ports with a small connection type law
//! - A behaviour trait that node types implement, looked up by name in a
//!   [`NodeRegistry`]
//! - Topological scheduling that tolerates cycles
//! - A JSON round trip that survives unknown node types
//!
//! ```
//! use nodeflow_core::{Graph, Node, NodeBehavior, NodeContext, NodeError, Capabilities};
//! use serde_json::json;
//!
//! struct Constant;
//!
//! impl NodeBehavior for Constant {
//!     fn init(&mut self, node: &mut Node) {
//!         node.add_output("value", "number");
//!     }
//!
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::EXECUTE
//!     }
//!
//!     fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
//!         ctx.set_output_data(0, json!(42));
//!         Ok(())
//!     }
//! }
//!
//! let mut graph = Graph::new();
//! let id = graph.add_node(Node::new("basic/const", Box::new(Constant)));
//! graph.run_step(1).unwrap();
//! assert_eq!(graph.node(id).unwrap().output(0).unwrap().value, Some(json!(42)));
//! ```

pub mod behavior;
pub mod connection;
pub mod evaluation;
pub mod events;
pub mod graph;
pub mod group;
pub mod link;
pub mod node;
pub mod port;
pub mod scheduler;
pub mod serialize;

pub use behavior::{Capabilities, ConnectionChange, NodeBehavior, NodeError, Passive};
pub use connection::{ConnectByTypeOptions, ConnectionError};
pub use evaluation::NodeContext;
pub use events::ActionCall;
pub use graph::{Graph, GraphConfig, GraphEvent, GraphStatus, IdStrategy, ListenerId, StepInfo};
pub use group::Group;
pub use link::{Link, LinkId, SerializedLink};
pub use node::{Node, NodeId, NodeMode, NodeRegistry, NodeTypeInfo};
pub use port::{InputPort, OutputPort, PortDirection, PortRef, PortType};
pub use scheduler::{ExecutionError, ExecutionOrder};
pub use serialize::{ConfigureReport, SerializationError, SerializedGraph, SerializedNode};

/// Dynamic value carried by properties and links
pub use serde_json::Value;
