//! JSON-backed components loaded from the pages directory.
//!
//! ```json
//! {
//!   "render": "static",
//!   "staticPaths": ["foo", "bar"],
//!   "tree": {"tag": "h1", "children": ["Item ", {"param": "id"}]}
//! }
//! ```
//!
//! Node forms: string (text), array (fragment), `null` (empty),
//! `{"tag", "props", "children"}`, `{"client", "export", "props", "children"}`,
//! `{"server", "props"}`, `{"slot"}`, `{"param"}`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::render::error::RenderError;
use crate::render::module::{Component, Directive, ModuleRegistry, PageConfig};
use crate::render::tree::{ClientRef, Element, Node, PropMap, RenderProps, ServerRef};
use crate::routing::scan::PageFile;

#[derive(Debug, Error)]
pub enum ModuleLoadError {
    #[error("{path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: {reason}")]
    Tree { path: String, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageDocument {
    #[serde(flatten)]
    config: PageConfig,
    #[serde(default)]
    client_only: bool,
    #[serde(default)]
    tree: Value,
}

/// A component whose output is a JSON tree with parameter substitution.
#[derive(Debug, Clone)]
pub struct FileComponent {
    config: PageConfig,
    tree: Value,
}

impl FileComponent {
    pub fn from_source(source: &str) -> Result<Self, serde_json::Error> {
        let doc: PageDocument = serde_json::from_str(source)?;
        Ok(Self {
            config: doc.config,
            tree: doc.tree,
        })
    }
}

#[async_trait]
impl Component for FileComponent {
    fn config(&self) -> PageConfig {
        self.config.clone()
    }

    async fn render(&self, props: &RenderProps) -> Result<Node, RenderError> {
        node_from_json(&self.tree, props)
    }
}

/// Convert the JSON node syntax into a [`Node`].
pub fn node_from_json(value: &Value, props: &RenderProps) -> Result<Node, RenderError> {
    match value {
        Value::Null => Ok(Node::Empty),
        Value::String(s) => Ok(Node::Text(s.clone())),
        Value::Bool(_) | Value::Number(_) => Ok(Node::Text(value.to_string())),
        Value::Array(items) => items
            .iter()
            .map(|v| node_from_json(v, props))
            .collect::<Result<Vec<_>, _>>()
            .map(Node::Fragment),
        Value::Object(obj) => {
            let str_field = |key: &str| obj.get(key).and_then(Value::as_str);
            let prop_map = || -> PropMap {
                obj.get("props")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default()
            };
            let children = || -> Result<Vec<Node>, RenderError> {
                match obj.get("children") {
                    None => Ok(Vec::new()),
                    Some(Value::Array(items)) => {
                        items.iter().map(|v| node_from_json(v, props)).collect()
                    }
                    Some(single) => Ok(vec![node_from_json(single, props)?]),
                }
            };

            if let Some(name) = str_field("slot") {
                Ok(Node::Slot(name.to_string()))
            } else if let Some(name) = str_field("param") {
                Ok(props
                    .params
                    .get(name)
                    .map(|v| Node::Text(v.to_path()))
                    .unwrap_or(Node::Empty))
            } else if let Some(module_id) = str_field("client") {
                Ok(Node::Client(ClientRef {
                    module_id: module_id.to_string(),
                    export: str_field("export").unwrap_or("default").to_string(),
                    props: prop_map(),
                    children: children()?,
                }))
            } else if let Some(module_id) = str_field("server") {
                Ok(Node::Server(ServerRef {
                    module_id: module_id.to_string(),
                    props: prop_map(),
                }))
            } else if let Some(tag) = str_field("tag") {
                Ok(Node::Element(Element {
                    tag: tag.to_string(),
                    props: prop_map(),
                    children: children()?,
                }))
            } else {
                Err(RenderError::Component(format!(
                    "unrecognised tree node: {value}"
                )))
            }
        }
    }
}

impl ModuleRegistry {
    /// Register every scanned page file.
    ///
    /// JSON files become [`FileComponent`]s unless they declare
    /// `"use client"`, in which case their tree is the server stand-in.
    /// Other files only contribute their directive.
    pub fn load_pages(&mut self, files: &[PageFile]) -> Result<usize, ModuleLoadError> {
        let mut loaded = 0;
        for file in files {
            let path = file.path.display().to_string();
            if !file.is_json() {
                self.set_directive(file.module_id.clone(), file.directive);
                continue;
            }
            match file.directive {
                Directive::UseClient => {
                    let doc: PageDocument = serde_json::from_str(&file.source)
                        .map_err(|source| ModuleLoadError::Parse { path: path.clone(), source })?;
                    if doc.client_only {
                        self.mark_client_only(file.module_id.clone());
                    } else {
                        let stand_in = node_from_json(&doc.tree, &RenderProps::default())
                            .map_err(|e| ModuleLoadError::Tree {
                                path,
                                reason: e.to_string(),
                            })?;
                        self.register_client(file.module_id.clone(), Some(stand_in));
                    }
                }
                directive => {
                    let component = FileComponent::from_source(&file.source)
                        .map_err(|source| ModuleLoadError::Parse { path, source })?;
                    self.register_component(file.module_id.clone(), component);
                    self.set_directive(file.module_id.clone(), directive);
                }
            }
            loaded += 1;
        }
        tracing::debug!(modules = loaded, "Page modules loaded");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::module::{ModuleRef, ModuleResolver};
    use crate::routing::path::ParamValue;
    use crate::routing::table::RenderMode;
    use serde_json::json;

    #[test]
    fn test_node_forms() {
        let mut props = RenderProps::default();
        props
            .params
            .insert("id".into(), ParamValue::One("foo".into()));

        let tree = json!({
            "tag": "div",
            "props": {"class": "box"},
            "children": [
                "Item ",
                {"param": "id"},
                {"slot": "children"},
                {"client": "Counter", "props": {"start": 1}},
                {"server": "Footer"},
                null
            ]
        });
        let node = node_from_json(&tree, &props).unwrap();
        let Node::Element(el) = node else {
            panic!("expected element");
        };
        assert_eq!(el.tag, "div");
        assert_eq!(el.props.get("class"), Some(&json!("box")));
        assert_eq!(el.children[1], Node::text("foo"));
        assert_eq!(el.children[2], Node::slot("children"));
        let Node::Client(client) = &el.children[3] else {
            panic!("expected client ref");
        };
        assert_eq!(client.export, "default");
        assert_eq!(el.children[4], Node::server("Footer"));
        assert_eq!(el.children[5], Node::Empty);
    }

    #[test]
    fn test_unknown_object_is_error() {
        let err = node_from_json(&json!({"what": 1}), &RenderProps::default()).unwrap_err();
        assert!(matches!(err, RenderError::Component(_)));
    }

    #[tokio::test]
    async fn test_file_component_config_and_render() {
        let component = FileComponent::from_source(
            r#"{"render":"dynamic","staticPaths":["a"],"tree":{"tag":"p","children":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(component.config().render, RenderMode::Dynamic);
        assert_eq!(component.config().static_paths.len(), 1);

        let node = component.render(&RenderProps::default()).await.unwrap();
        assert_eq!(node, Node::Element(Element::new("p").child("hi")));
    }

    #[test]
    fn test_load_pages_registers_kinds() {
        let files = vec![
            PageFile {
                module_id: "index".into(),
                path: "index.json".into(),
                directive: Directive::None,
                source: r#"{"tree":"home"}"#.into(),
            },
            PageFile {
                module_id: "Chart".into(),
                path: "Chart.json".into(),
                directive: Directive::UseClient,
                source: r#"{"directive":"use client","clientOnly":true}"#.into(),
            },
        ];
        let mut registry = ModuleRegistry::new();
        assert_eq!(registry.load_pages(&files).unwrap(), 2);
        assert!(matches!(registry.resolve("index"), Some(ModuleRef::Component(_))));
        assert!(registry.resolve("Chart").is_none());
        assert_eq!(
            registry.client_stand_in(&Node::client("Chart", "default")),
            Err(RenderError::NoServerOutput)
        );
    }
}
