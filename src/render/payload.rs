//! Wire payload encoding and decoding.
//!
//! One UTF-8 line per row: `<index>:<json>\n`, indices dense from 0.
//!
//! ```text
//! ["$M", module, export]            client module reference
//! ["$E", type, props, [children]]   element; type is a tag or "$<n>" (module row)
//! ["$S", name]                      slot hole
//! ["$F", [children]]                fragment
//! "text"                            text; a leading '$' is doubled
//! null                              empty
//! {"_entry": name, slot: "$<n>"}    root row, always last
//! ```
//!
//! References only point backwards, so the decoder resolves every row as
//! soon as it arrives.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::error::ProtocolError;
use crate::render::error::RenderError;
use crate::render::tree::{ClientRef, Element, Node};
use crate::routing::route_name::SENTINEL;

/// Root-row key naming the outermost slot.
pub const ENTRY_KEY: &str = "_entry";

const TAG_MODULE: &str = "$M";
const TAG_ELEMENT: &str = "$E";
const TAG_SLOT: &str = "$S";
const TAG_FRAGMENT: &str = "$F";

/// Reject slot names that collide with reserved root-row keys.
pub fn check_slot_name(name: &str) -> Result<(), RenderError> {
    if name.starts_with(SENTINEL) {
        return Err(RenderError::ReservedSlot(name.to_string()));
    }
    Ok(())
}

fn reference(index: usize) -> String {
    format!("${index}")
}

fn parse_reference(s: &str) -> Option<usize> {
    s.strip_prefix('$').and_then(|n| n.parse().ok())
}

/// Serializer state for one render.
#[derive(Debug, Default)]
pub struct PayloadWriter {
    next_index: usize,
    modules: HashMap<String, usize>,
}

/// Rows and module ids produced while encoding one subtree.
#[derive(Debug, Default)]
pub struct Encoded {
    pub rows: Vec<Bytes>,
    pub new_modules: Vec<String>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_row(&mut self, value: &Value) -> (usize, Bytes) {
        let index = self.next_index;
        self.next_index += 1;
        (index, Bytes::from(format!("{index}:{value}\n")))
    }

    /// Encode a fully expanded subtree as one row, emitting module rows it
    /// depends on first. `child_slot` replaces `Slot("children")`.
    pub fn write_slot(&mut self, node: &Node, child_slot: Option<&str>) -> Result<(usize, Encoded), RenderError> {
        let mut out = Encoded::default();
        let value = self.encode(node, child_slot, &mut out)?;
        let (index, row) = self.push_row(&value);
        out.rows.push(row);
        Ok((index, out))
    }

    /// Final row mapping slot names to their rows.
    pub fn write_root(&mut self, entry: &str, slots: &[(String, usize)]) -> Bytes {
        let mut root = Map::new();
        root.insert(ENTRY_KEY.to_string(), Value::String(entry.to_string()));
        for (name, index) in slots {
            root.insert(name.clone(), Value::String(reference(*index)));
        }
        self.push_row(&Value::Object(root)).1
    }

    fn encode(&mut self, node: &Node, child_slot: Option<&str>, out: &mut Encoded) -> Result<Value, RenderError> {
        Ok(match node {
            Node::Empty => Value::Null,
            Node::Text(s) if s.starts_with('$') => Value::String(format!("${s}")),
            Node::Text(s) => Value::String(s.clone()),
            Node::Element(el) => {
                let children = self.encode_children(&el.children, child_slot, out)?;
                json!([TAG_ELEMENT, el.tag, el.props, children])
            }
            Node::Client(client) => {
                let key = client.key();
                let module_index = match self.modules.get(&key) {
                    Some(index) => *index,
                    None => {
                        let (index, row) =
                            self.push_row(&json!([TAG_MODULE, client.module_id, client.export]));
                        self.modules.insert(key, index);
                        out.rows.push(row);
                        out.new_modules.push(client.module_id.clone());
                        index
                    }
                };
                let children = self.encode_children(&client.children, child_slot, out)?;
                json!([TAG_ELEMENT, reference(module_index), client.props, children])
            }
            Node::Slot(name) => {
                let name = match (name.as_str(), child_slot) {
                    ("children", Some(child)) => child,
                    (name, _) => name,
                };
                json!([TAG_SLOT, name])
            }
            Node::Fragment(children) => {
                json!([TAG_FRAGMENT, self.encode_children(children, child_slot, out)?])
            }
            Node::Server(server) => {
                return Err(RenderError::Component(format!(
                    "server component `{}` was not resolved before encoding",
                    server.module_id
                )))
            }
        })
    }

    fn encode_children(&mut self, children: &[Node], child_slot: Option<&str>, out: &mut Encoded) -> Result<Value, RenderError> {
        children
            .iter()
            .map(|c| self.encode(c, child_slot, out))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

/// A decoded payload: the slot map plus the entry slot name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTree {
    pub entry: String,
    pub slots: HashMap<String, Node>,
    /// Client module ids in first-seen order.
    pub modules: Vec<String>,
}

#[derive(Debug, Clone)]
enum Row {
    Module { module_id: String, export: String },
    Node(Node),
}

/// Incremental payload decoder.
#[derive(Debug, Default)]
pub struct PayloadReader {
    rows: Vec<Row>,
    pending: Vec<u8>,
    root: Option<DecodedTree>,
    modules: Vec<String>,
}

impl PayloadReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; complete lines are decoded immediately.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = std::str::from_utf8(&line[..line.len() - 1]).map_err(|e| self.error(e.to_string()))?;
            if !line.is_empty() {
                self.decode_line(line)?;
            }
        }
        Ok(())
    }

    /// Non-root rows decoded so far.
    pub fn decoded_rows(&self) -> usize {
        self.rows.len()
    }

    /// Element rows decoded at or after `start`, in row order.
    pub fn nodes_from(&self, start: usize) -> impl Iterator<Item = &Node> {
        self.rows.iter().skip(start).filter_map(|row| match row {
            Row::Node(node) => Some(node),
            Row::Module { .. } => None,
        })
    }

    /// Client module ids seen so far, in first-seen order.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    /// Number of rows decoded so far.
    pub fn row_count(&self) -> usize {
        self.rows.len() + usize::from(self.root.is_some())
    }

    pub fn finish(mut self) -> Result<DecodedTree, ProtocolError> {
        if !self.pending.is_empty() {
            return Err(self.error("truncated row at end of payload"));
        }
        let mut root = self.root.take().ok_or_else(|| self.error("payload has no root row"))?;
        root.modules = self.modules;
        Ok(root)
    }

    fn error(&self, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::Payload {
            row: self.row_count(),
            reason: reason.into(),
        }
    }

    fn decode_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        if self.root.is_some() {
            return Err(self.error("row after root row"));
        }
        let (index, body) = line
            .split_once(':')
            .ok_or_else(|| self.error("missing `:` separator"))?;
        let index: usize = index.parse().map_err(|_| self.error("row index is not an integer"))?;
        if index != self.rows.len() {
            return Err(self.error(format!("expected row {}, got {index}", self.rows.len())));
        }
        let value: Value = serde_json::from_str(body).map_err(|e| self.error(e.to_string()))?;

        match value {
            Value::Object(map) => {
                let root = self.decode_root(map)?;
                self.root = Some(root);
            }
            Value::Array(items) if items.first().and_then(Value::as_str) == Some(TAG_MODULE) => {
                let (Some(module_id), Some(export)) = (
                    items.get(1).and_then(Value::as_str),
                    items.get(2).and_then(Value::as_str),
                ) else {
                    return Err(self.error("malformed module row"));
                };
                if !self.modules.iter().any(|m| m == module_id) {
                    self.modules.push(module_id.to_string());
                }
                self.rows.push(Row::Module {
                    module_id: module_id.to_string(),
                    export: export.to_string(),
                });
            }
            other => {
                let node = self.decode_node(&other)?;
                self.rows.push(Row::Node(node));
            }
        }
        Ok(())
    }

    fn decode_root(&self, map: Map<String, Value>) -> Result<DecodedTree, ProtocolError> {
        let mut tree = DecodedTree::default();
        for (key, value) in map {
            let Value::String(s) = value else {
                return Err(self.error(format!("root entry `{key}` is not a string")));
            };
            if key == ENTRY_KEY {
                tree.entry = s;
                continue;
            }
            let index = parse_reference(&s).ok_or_else(|| self.error(format!("slot `{key}` is not a reference")))?;
            match self.rows.get(index) {
                Some(Row::Node(node)) => {
                    tree.slots.insert(key, node.clone());
                }
                Some(Row::Module { .. }) => {
                    return Err(self.error(format!("slot `{key}` references a module row")))
                }
                None => return Err(self.error(format!("slot `{key}` references unknown row {index}"))),
            }
        }
        if tree.entry.is_empty() || !tree.slots.contains_key(&tree.entry) {
            return Err(self.error("root row has no valid entry slot"));
        }
        Ok(tree)
    }

    fn decode_node(&self, value: &Value) -> Result<Node, ProtocolError> {
        match value {
            Value::Null => Ok(Node::Empty),
            Value::String(s) => match s.strip_prefix('$') {
                Some(rest) if rest.starts_with('$') => Ok(Node::Text(rest.to_string())),
                Some(_) => Err(self.error(format!("unexpected reference `{s}` in text position"))),
                None => Ok(Node::Text(s.clone())),
            },
            Value::Array(items) => {
                let tag = items.first().and_then(Value::as_str).unwrap_or_default();
                match tag {
                    TAG_ELEMENT => self.decode_element(items),
                    TAG_SLOT => items
                        .get(1)
                        .and_then(Value::as_str)
                        .map(|name| Node::Slot(name.to_string()))
                        .ok_or_else(|| self.error("malformed slot")),
                    TAG_FRAGMENT => Ok(Node::Fragment(self.decode_children(items.get(1))?)),
                    _ => Err(self.error(format!("unknown node tag `{tag}`"))),
                }
            }
            _ => Err(self.error(format!("unexpected value {value}"))),
        }
    }

    fn decode_element(&self, items: &[Value]) -> Result<Node, ProtocolError> {
        let ty = items
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| self.error("element without type"))?;
        let props = match items.get(2) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Err(self.error("element props must be an object")),
        };
        let children = self.decode_children(items.get(3))?;

        if let Some(index) = parse_reference(ty) {
            return match self.rows.get(index) {
                Some(Row::Module { module_id, export }) => Ok(Node::Client(ClientRef {
                    module_id: module_id.clone(),
                    export: export.clone(),
                    props,
                    children,
                })),
                _ => Err(self.error(format!("element type `{ty}` does not reference a module row"))),
            };
        }
        Ok(Node::Element(Element {
            tag: ty.to_string(),
            props,
            children,
        }))
    }

    fn decode_children(&self, value: Option<&Value>) -> Result<Vec<Node>, ProtocolError> {
        match value {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(|v| self.decode_node(v)).collect(),
            Some(_) => Err(self.error("children must be an array")),
        }
    }
}

/// Decode a complete payload held in memory.
pub fn decode_payload(bytes: &[u8]) -> Result<DecodedTree, ProtocolError> {
    let mut reader = PayloadReader::new();
    reader.push(bytes)?;
    reader.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Node {
        Element::new("main")
            .child(Element::new("h1").child("$5 deal"))
            .child(Node::client("Counter", "default").prop("start", 3).child("fallback"))
            .child(Node::client("Counter", "default"))
            .into()
    }

    #[test]
    fn test_rows_are_dense_and_modules_precede_use() {
        let mut writer = PayloadWriter::new();
        let (index, encoded) = writer.write_slot(&page(), None).unwrap();
        assert_eq!(index, 1);
        assert_eq!(encoded.new_modules, vec!["Counter".to_string()]);
        assert_eq!(encoded.rows.len(), 2);
        assert_eq!(&encoded.rows[0][..], b"0:[\"$M\",\"Counter\",\"default\"]\n");
        assert!(std::str::from_utf8(&encoded.rows[1]).unwrap().starts_with("1:[\"$E\",\"main\""));

        let root = writer.write_root("page:/", &[("page:/".to_string(), index)]);
        assert_eq!(&root[..], b"2:{\"_entry\":\"page:/\",\"page:/\":\"$1\"}\n");
    }

    #[test]
    fn test_decode_restores_tree() {
        let mut writer = PayloadWriter::new();
        let layout: Node = Element::new("body").child(Node::slot("children")).into();
        let (page_index, page_rows) = writer.write_slot(&page(), None).unwrap();
        let (layout_index, layout_rows) = writer.write_slot(&layout, Some("page:/")).unwrap();
        let root = writer.write_root(
            "layout:/",
            &[("page:/".into(), page_index), ("layout:/".into(), layout_index)],
        );

        let mut bytes = Vec::new();
        for row in page_rows.rows.iter().chain(&layout_rows.rows) {
            bytes.extend_from_slice(row);
        }
        bytes.extend_from_slice(&root);

        // Feed in awkward chunk sizes to exercise partial lines.
        let mut reader = PayloadReader::new();
        for chunk in bytes.chunks(7) {
            reader.push(chunk).unwrap();
        }
        let tree = reader.finish().unwrap();
        assert_eq!(tree.entry, "layout:/");
        assert_eq!(tree.modules, vec!["Counter".to_string()]);
        assert_eq!(tree.slots["page:/"], page());
        assert_eq!(
            tree.slots["layout:/"],
            Node::Element(Element::new("body").child(Node::slot("page:/")))
        );
    }

    #[test]
    fn test_reserved_slot_name() {
        assert!(check_slot_name("page:/").is_ok());
        assert_eq!(
            check_slot_name("_entry"),
            Err(RenderError::ReservedSlot("_entry".into()))
        );
    }

    #[test]
    fn test_protocol_errors() {
        let cases: &[&[u8]] = &[
            b"0:\"a\"\n",                                // no root
            b"1:\"a\"\n",                                // index gap
            b"x:\"a\"\n",                                // bad index
            b"0:not json\n",                             // bad json
            b"0:\"$3\"\n",                               // bare reference as text
            b"0:[\"$E\",\"$0\",{},[]]\n",                // self/forward module reference
            b"0:{\"_entry\":\"a\",\"a\":\"$4\"}\n",      // unknown slot row
            b"0:null\n1:{\"_entry\":\"a\",\"a\":\"$0\"}\n2:null\n", // row after root
            b"0:null\n1:{\"_entry\":\"a\",\"a\":\"$0\"}",  // fine so far, but see below
        ];
        for (i, case) in cases.iter().enumerate().take(cases.len() - 1) {
            assert!(decode_payload(case).is_err(), "case {i} should fail");
        }
        // Missing trailing newline leaves a truncated row.
        assert!(decode_payload(cases[cases.len() - 1]).is_err());
        assert!(decode_payload(b"0:null\n1:{\"_entry\":\"a\",\"a\":\"$0\"}\n").is_ok());
    }
}
