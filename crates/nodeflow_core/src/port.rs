// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs.

use crate::link::LinkId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Declared type of a port.
///
/// On the wire a port type is a plain string. `"*"` (or the empty string)
/// is the generic wildcard, `"event"`/`"action"` mark discrete trigger
/// ports, and anything else is a named type which may list several
/// acceptable names separated by commas (`"number,boolean"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortType {
    /// Accepts anything
    #[default]
    Any,
    /// Discrete event/action trigger
    Event,
    /// Named data type (possibly a comma separated list)
    Named(String),
}

impl PortType {
    /// Wire form of the generic wildcard
    pub const ANY: &'static str = "*";
    /// Wire form of the event/action wildcard
    pub const EVENT: &'static str = "event";

    /// Create a named port type
    pub fn named(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    /// Whether this is the event/action wildcard
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event)
    }

    /// Whether this is the generic wildcard
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Individual type names of a comma separated list.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        let text = match self {
            Self::Named(name) => name.as_str(),
            _ => "",
        };
        text.split(',').map(str::trim).filter(|m| !m.is_empty())
    }

    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &PortType) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Event, Self::Event) => true,
            (Self::Event, _) | (_, Self::Event) => false,
            (Self::Named(a), Self::Named(b)) => {
                a == b || self.members().any(|m| other.members().any(|n| m == n))
            }
        }
    }
}

impl From<String> for PortType {
    fn from(text: String) -> Self {
        match text.trim() {
            "" | Self::ANY | "0" => Self::Any,
            "event" | "action" | "-1" => Self::Event,
            _ => Self::Named(text),
        }
    }
}

impl From<&str> for PortType {
    fn from(text: &str) -> Self {
        Self::from(text.to_string())
    }
}

impl From<PortType> for String {
    fn from(port_type: PortType) -> Self {
        match port_type {
            PortType::Any => PortType::ANY.to_string(),
            PortType::Event => PortType::EVENT.to_string(),
            PortType::Named(name) => name,
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(Self::ANY),
            Self::Event => f.write_str(Self::EVENT),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Address of a port on a node, either positional or by name.
///
/// Name lookup resolves to the first port carrying that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRef {
    /// Slot index
    Index(usize),
    /// Port name
    Name(String),
}

impl From<usize> for PortRef {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl From<&str> for PortRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for PortRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

/// An input port. Holds at most one link.
#[derive(Debug, Clone, PartialEq)]
pub struct InputPort {
    /// Port name
    pub name: String,
    /// Declared type
    pub port_type: PortType,
    /// Connected link, if any
    pub link: Option<LinkId>,
    /// Display label override
    pub label: Option<String>,
}

impl InputPort {
    /// Create a new, unconnected input port
    pub fn new(name: impl Into<String>, port_type: impl Into<PortType>) -> Self {
        Self {
            name: name.into(),
            port_type: port_type.into(),
            link: None,
            label: None,
        }
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether a link is attached
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}

/// An output port. Fans out to any number of links.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPort {
    /// Port name
    pub name: String,
    /// Declared type
    pub port_type: PortType,
    /// Outgoing links, in connection order
    pub links: Vec<LinkId>,
    /// Last value written by the node (never persisted)
    pub value: Option<Value>,
    /// Display label override
    pub label: Option<String>,
}

impl OutputPort {
    /// Create a new, unconnected output port
    pub fn new(name: impl Into<String>, port_type: impl Into<PortType>) -> Self {
        Self {
            name: name.into(),
            port_type: port_type.into(),
            links: Vec::new(),
            value: None,
            label: None,
        }
    }

    /// Set the display label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether any link leaves this port
    pub fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }
}
