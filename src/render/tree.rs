//! Component tree model.
//!
//! A [`Node`] is what a server component returns. `Server` nodes are
//! resolved and awaited during serialization, so a decoded tree never
//! contains them. `Client` nodes stay placeholders all the way to the
//! browser; the HTML renderer swaps them for stand-ins.

use serde_json::{Map, Value};

use crate::routing::path::Params;

/// Props passed to element, client and server nodes.
pub type PropMap = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Empty,
    Text(String),
    Element(Element),
    Client(ClientRef),
    Server(ServerRef),
    /// Named hole filled with another slot's subtree.
    Slot(String),
    Fragment(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub props: PropMap,
    pub children: Vec<Node>,
}

/// Placeholder for a UI unit that loads and runs in the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRef {
    pub module_id: String,
    pub export: String,
    pub props: PropMap,
    pub children: Vec<Node>,
}

/// Reference to a server component, resolved by module id.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRef {
    pub module_id: String,
    pub props: PropMap,
}

impl Node {
    pub fn text(s: impl Into<String>) -> Self {
        Node::Text(s.into())
    }

    pub fn slot(name: impl Into<String>) -> Self {
        Node::Slot(name.into())
    }

    pub fn client(module_id: impl Into<String>, export: impl Into<String>) -> ClientRef {
        ClientRef {
            module_id: module_id.into(),
            export: export.into(),
            props: PropMap::new(),
            children: Vec::new(),
        }
    }

    pub fn server(module_id: impl Into<String>) -> Self {
        Node::Server(ServerRef {
            module_id: module_id.into(),
            props: PropMap::new(),
        })
    }
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            props: PropMap::new(),
            children: Vec::new(),
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }
}

impl ClientRef {
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.children.push(node.into());
        self
    }

    /// `module#export`, the key used in prefetch manifests and markers.
    pub fn key(&self) -> String {
        format!("{}#{}", self.module_id, self.export)
    }
}

impl From<Element> for Node {
    fn from(e: Element) -> Self {
        Node::Element(e)
    }
}

impl From<ClientRef> for Node {
    fn from(c: ClientRef) -> Self {
        Node::Client(c)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Text(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Text(s)
    }
}

/// Input handed to a component's `render`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderProps {
    pub pathname: String,
    pub params: Params,
    pub query: Option<String>,
    /// Props given by a parent `Server` node; empty for route components.
    pub props: PropMap,
}
