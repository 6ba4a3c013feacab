//! HTML rendering of a decoded payload, and the shell interleave.
//!
//! # Data Flow
//!
//! ```text
//! payload chunk ──► PayloadReader (rows decoded as they arrive)
//!       │                 │
//!       │                 └──► hoisted head markup + modulepreload links
//!       └──► inline <script> forwarded immediately
//!
//! output: preamble │ head │ mid │ scripts (+ late head) … │ body │ postamble
//!         NotStarted → PreambleSent ──first chunk──► MidSent ──close──► Closed
//! ```
//!
//! The preamble goes out at once; head and mid wait for the first payload
//! chunk so that head markup declared by the earliest rows lands in the
//! document head. Head markup from later rows goes out in the body just
//! before the script carrying it. The body needs the root row, which is
//! always last, so it is written on close, followed by the postamble.
//!
//! A payload error after the preamble ends the stream with an error item;
//! the response is already committed, so the connection is aborted. When the
//! consumer goes away the payload stream is dropped, which stops its
//! producer.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::render::error::RenderError;
use crate::render::module::ModuleResolver;
use crate::render::payload::{DecodedTree, PayloadReader};
use crate::render::shell::ShellParts;
use crate::render::stream::{receiver_stream, ByteStream, EventSender};
use crate::render::tree::{ClientRef, Element, Node};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements moved into the document head wherever they appear.
const HOISTED: &[&str] = &["title", "meta", "link"];

/// Props never rendered as attributes.
const SKIPPED_PROPS: &[&str] = &["children", "key"];

/// Nesting limit for slot and element recursion.
const MAX_NESTING: usize = 256;

fn escape_char(c: char) -> Option<&'static str> {
    match c {
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '&' => Some("&amp;"),
        '"' => Some("&quot;"),
        '\'' => Some("&#39;"),
        _ => None,
    }
}

/// Escape text and attribute values.
pub fn escape(s: &str) -> Cow<'_, str> {
    if !s.chars().any(|c| escape_char(c).is_some()) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match escape_char(c) {
            Some(entity) => out.push_str(entity),
            None => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Rendered markup, split into hoisted head elements and body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HtmlOutput {
    pub head: Vec<String>,
    pub body: String,
}

struct TreeRenderer<'a> {
    tree: &'a DecodedTree,
    resolver: &'a dyn ModuleResolver,
    out: HtmlOutput,
    slot_stack: Vec<&'a str>,
}

/// Render a decoded tree to HTML, starting at its entry slot.
pub fn render_tree(tree: &DecodedTree, resolver: &dyn ModuleResolver) -> Result<HtmlOutput, RenderError> {
    let mut renderer = TreeRenderer {
        tree,
        resolver,
        out: HtmlOutput::default(),
        slot_stack: Vec::new(),
    };
    renderer.slot(&tree.entry, 0)?;
    Ok(renderer.out)
}

/// Head elements inside loose rows. Slot holes are skipped and stand-in
/// failures ignored; the full render reports those.
fn hoisted_in<'a>(nodes: impl Iterator<Item = &'a Node>, resolver: &dyn ModuleResolver) -> Vec<String> {
    let empty = DecodedTree::default();
    let mut renderer = TreeRenderer {
        tree: &empty,
        resolver,
        out: HtmlOutput::default(),
        slot_stack: Vec::new(),
    };
    for node in nodes {
        let mut scratch = String::new();
        let _ = renderer.node(node, 0, &mut scratch);
    }
    renderer.out.head
}

impl<'a> TreeRenderer<'a> {
    fn slot(&mut self, name: &str, depth: usize) -> Result<(), RenderError> {
        let tree = self.tree;
        let Some((key, node)) = tree.slots.get_key_value(name) else {
            tracing::debug!(slot = name, "Slot has no content");
            return Ok(());
        };
        if self.slot_stack.contains(&key.as_str()) {
            return Err(RenderError::Component(format!("slot `{name}` contains itself")));
        }
        self.slot_stack.push(key.as_str());
        let mut body = std::mem::take(&mut self.out.body);
        self.node(node, depth + 1, &mut body)?;
        self.out.body = body;
        self.slot_stack.pop();
        Ok(())
    }

    fn node(&mut self, node: &Node, depth: usize, buf: &mut String) -> Result<(), RenderError> {
        if depth > MAX_NESTING {
            return Err(RenderError::TooDeep(MAX_NESTING));
        }
        match node {
            Node::Empty => {}
            Node::Text(text) => buf.push_str(&escape(text)),
            Node::Fragment(children) => self.children(children, depth, buf)?,
            Node::Element(el) if HOISTED.contains(&el.tag.as_str()) => {
                let mut head = String::new();
                self.element(el, depth, &mut head)?;
                self.out.head.push(head);
            }
            Node::Element(el) => self.element(el, depth, buf)?,
            Node::Client(client) => self.client(client, depth, buf)?,
            Node::Slot(name) => {
                // Slot content lands in `self.out.body`; route it through `buf`.
                let outer = std::mem::replace(&mut self.out.body, std::mem::take(buf));
                let result = self.slot(name, depth);
                *buf = std::mem::replace(&mut self.out.body, outer);
                result?;
            }
            Node::Server(server) => {
                return Err(RenderError::Component(format!(
                    "unexpected server reference `{}` in decoded payload",
                    server.module_id
                )))
            }
        }
        Ok(())
    }

    fn children(&mut self, children: &[Node], depth: usize, buf: &mut String) -> Result<(), RenderError> {
        for child in children {
            self.node(child, depth + 1, buf)?;
        }
        Ok(())
    }

    fn element(&mut self, el: &Element, depth: usize, buf: &mut String) -> Result<(), RenderError> {
        buf.push('<');
        buf.push_str(&el.tag);
        for (key, value) in &el.props {
            if SKIPPED_PROPS.contains(&key.as_str()) {
                continue;
            }
            let name = if key == "className" { "class" } else { key.as_str() };
            match value {
                Value::Bool(true) => {
                    let _ = write!(buf, " {name}");
                }
                Value::String(s) => {
                    let _ = write!(buf, " {name}=\"{}\"", escape(s));
                }
                Value::Number(n) => {
                    let _ = write!(buf, " {name}=\"{n}\"");
                }
                _ => {}
            }
        }
        buf.push('>');
        if VOID_ELEMENTS.contains(&el.tag.as_str()) {
            return Ok(());
        }
        self.children(&el.children, depth, buf)?;
        let _ = write!(buf, "</{}>", el.tag);
        Ok(())
    }

    fn client(&mut self, client: &ClientRef, depth: usize, buf: &mut String) -> Result<(), RenderError> {
        let key = client.key();
        match self.resolver.client_stand_in(client) {
            Ok(stand_in) => {
                let _ = write!(buf, "<!--$client:{}-->", escape(&key));
                match stand_in {
                    Some(node) => self.node(&node, depth + 1, buf)?,
                    None => self.children(&client.children, depth, buf)?,
                }
                buf.push_str("<!--/$client-->");
            }
            Err(RenderError::NoServerOutput) => {
                let _ = write!(buf, "<template data-client-only=\"{}\"></template>", escape(&key));
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// `<link rel="modulepreload">` tags for the given module ids.
pub fn preload_links<'a>(module_base: &str, modules: impl IntoIterator<Item = &'a String>) -> String {
    let mut out = String::new();
    let mut seen = HashSet::new();
    for id in modules {
        if seen.insert(id.as_str()) {
            let _ = write!(
                out,
                "<link rel=\"modulepreload\" href=\"{}{}.js\">",
                escape(module_base),
                escape(id)
            );
        }
    }
    out
}

/// Inline script handing one payload chunk to the client runtime.
pub fn payload_script(chunk: &[u8]) -> String {
    let text = String::from_utf8_lossy(chunk);
    let json = serde_json::to_string(text.as_ref())
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c");
    format!("<script>(self.__FLIGHT__||=[]).push({json})</script>")
}

/// Options for one HTML render.
#[derive(Debug, Clone)]
pub struct HtmlOptions {
    pub module_base: String,
    /// Extra markup appended to the head, e.g. a build-time prefetch fragment.
    pub extra_head: Option<String>,
    pub channel_capacity: usize,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            module_base: "/assets/".to_string(),
            extra_head: None,
            channel_capacity: 16,
        }
    }
}

/// Where the interleave is in the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    PreambleSent,
    MidSent,
    Closed,
}

/// Head markup already written, so each element and preload link goes out
/// once however many rows mention it.
#[derive(Default)]
struct HeadMarkup {
    sent: HashSet<String>,
    modules: HashSet<String>,
}

impl HeadMarkup {
    fn take_new(&mut self, hoisted: Vec<String>, modules: &[String], module_base: &str) -> String {
        let mut out = String::new();
        for markup in hoisted {
            if !self.sent.contains(&markup) {
                out.push_str(&markup);
                self.sent.insert(markup);
            }
        }
        let fresh: Vec<&String> = modules
            .iter()
            .filter(|id| self.modules.insert((*id).clone()))
            .collect();
        out.push_str(&preload_links(module_base, fresh));
        out
    }
}

struct Interleave {
    phase: Phase,
    tx: EventSender<Bytes>,
    shell: Arc<ShellParts>,
    options: HtmlOptions,
}

impl Interleave {
    /// Send one chunk. `false` means the consumer went away.
    async fn send(&mut self, bytes: impl Into<Bytes>) -> bool {
        if self.tx.send(Ok(bytes.into())).await.is_err() {
            self.phase = Phase::Closed;
            return false;
        }
        true
    }

    async fn fail(&mut self, err: RenderError) {
        tracing::warn!(phase = ?self.phase, error = %err, "HTML render aborted");
        let _ = self.tx.send(Err(err)).await;
        self.phase = Phase::Closed;
    }

    /// Write head markup, then the mid part on the first call; afterwards
    /// only the markup, which then lands in the body.
    async fn head(&mut self, mut markup: String) -> bool {
        if self.phase != Phase::PreambleSent {
            return markup.is_empty() || self.send(markup).await;
        }
        if let Some(extra) = &self.options.extra_head {
            markup.push_str(extra);
        }
        if !markup.is_empty() && !self.send(markup).await {
            return false;
        }
        if !self.send(self.shell.mid.clone()).await {
            return false;
        }
        self.phase = Phase::MidSent;
        true
    }

    async fn run(mut self, mut payload: ByteStream, resolver: Arc<dyn ModuleResolver>) {
        if !self.send(self.shell.preamble.clone()).await {
            return;
        }
        self.phase = Phase::PreambleSent;

        let mut reader = PayloadReader::new();
        let mut head = HeadMarkup::default();
        loop {
            let next = tokio::select! {
                item = payload.next() => Some(item),
                _ = self.tx.closed() => None,
            };
            let chunk = match next {
                None => {
                    self.phase = Phase::Closed;
                    tracing::debug!("HTML consumer went away; payload dropped");
                    return;
                }
                Some(None) => break,
                Some(Some(Ok(chunk))) => chunk,
                Some(Some(Err(e))) => return self.fail(e).await,
            };

            let decoded = reader.decoded_rows();
            if let Err(e) = reader.push(&chunk) {
                return self.fail(e.into()).await;
            }
            let hoisted = hoisted_in(reader.nodes_from(decoded), resolver.as_ref());
            let markup = head.take_new(hoisted, reader.modules(), &self.options.module_base);
            if !self.head(markup).await || !self.send(payload_script(&chunk)).await {
                return;
            }
        }

        let tree = match reader.finish() {
            Ok(tree) => tree,
            Err(e) => return self.fail(e.into()).await,
        };
        let html = match render_tree(&tree, resolver.as_ref()) {
            Ok(html) => html,
            Err(e) => return self.fail(e).await,
        };
        let late = head.take_new(html.head, &tree.modules, &self.options.module_base);
        if !self.head(late).await || !self.send(html.body).await {
            return;
        }
        if self.send(self.shell.postamble.clone()).await {
            self.phase = Phase::Closed;
        }
    }
}

/// Interleave a payload stream into the shell as a streaming HTML body.
pub fn interleave(
    payload: ByteStream,
    shell: Arc<ShellParts>,
    resolver: Arc<dyn ModuleResolver>,
    options: HtmlOptions,
) -> ByteStream {
    let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
    let task = Interleave {
        phase: Phase::NotStarted,
        tx,
        shell,
        options,
    };
    tokio::spawn(task.run(payload, resolver));
    receiver_stream(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::module::ModuleRegistry;
    use crate::render::stream::once_bytes;
    use futures_util::stream;
    use std::time::Duration;

    fn tree(entry: &str, slots: Vec<(&str, Node)>) -> DecodedTree {
        DecodedTree {
            entry: entry.to_string(),
            slots: slots.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            modules: Vec::new(),
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), Cow::Borrowed("plain"));
        assert_eq!(escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn test_render_slots_and_hoisting() {
        let layout: Node = Element::new("div")
            .prop("className", "app")
            .prop("hidden", true)
            .prop("data-skip", false)
            .child(Element::new("title").child("Home"))
            .child(Node::slot("page:/"))
            .child(Element::new("br"))
            .into();
        let page: Node = Element::new("p").child("a < b").into();
        let decoded = tree("layout:/", vec![("layout:/", layout), ("page:/", page)]);

        let html = render_tree(&decoded, &ModuleRegistry::new()).unwrap();
        assert_eq!(html.head, vec!["<title>Home</title>".to_string()]);
        assert_eq!(html.body, "<div class=\"app\" hidden><p>a &lt; b</p><br></div>");
    }

    #[test]
    fn test_client_stand_ins() {
        let mut registry = ModuleRegistry::new();
        registry.register_client("Counter", Some(Node::text("0")));
        registry.mark_client_only("Chart");

        let page = Node::Fragment(vec![
            Node::client("Counter", "default").into(),
            Node::client("Chart", "default").into(),
            Node::client("Plain", "Button").child("Click").into(),
        ]);
        let html = render_tree(&tree("page:/", vec![("page:/", page)]), &registry).unwrap();
        assert_eq!(
            html.body,
            "<!--$client:Counter#default-->0<!--/$client-->\
             <template data-client-only=\"Chart#default\"></template>\
             <!--$client:Plain#Button-->Click<!--/$client-->"
        );
    }

    #[test]
    fn test_self_referencing_slot_is_error() {
        let decoded = tree("a", vec![("a", Node::slot("a"))]);
        assert!(render_tree(&decoded, &ModuleRegistry::new()).is_err());
    }

    #[test]
    fn test_payload_script_escapes_markup() {
        let script = payload_script(b"0:\"</script>\"\n");
        assert!(script.starts_with("<script>(self.__FLIGHT__||=[]).push("));
        assert!(!script["<script>".len()..script.len() - "</script>".len()].contains('<'));
    }

    #[tokio::test]
    async fn test_interleave_order() {
        let payload = once_bytes("0:[\"$E\",\"h1\",{},[\"Hi\"]]\n1:{\"_entry\":\"page:/\",\"page:/\":\"$0\"}\n");
        let shell = Arc::new(ShellParts::default());
        let out: Vec<_> = interleave(payload, shell.clone(), Arc::new(ModuleRegistry::new()), HtmlOptions::default())
            .collect()
            .await;
        let html: String = out
            .into_iter()
            .map(|c| String::from_utf8(c.unwrap().to_vec()).unwrap())
            .collect();

        let body_at = html.find("<h1>Hi</h1>").unwrap();
        let script_at = html.find("__FLIGHT__").unwrap();
        assert!(html.starts_with(std::str::from_utf8(&shell.preamble).unwrap()));
        assert!(html.ends_with("</body></html>"));
        assert!(html.find("</head>").unwrap() < script_at);
        assert!(script_at < body_at);
    }

    fn text(chunk: &Result<Bytes, RenderError>) -> String {
        String::from_utf8(chunk.as_ref().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_mid_sent_on_first_chunk() {
        // Root row never arrives.
        let payload: ByteStream = once_bytes("0:[\"$E\",\"title\",{},[\"Draft\"]]\n")
            .chain(stream::pending())
            .boxed();
        let shell = Arc::new(ShellParts::default());
        let mut out = interleave(payload, shell.clone(), Arc::new(ModuleRegistry::new()), HtmlOptions::default());

        let mut html = String::new();
        while !html.contains("__FLIGHT__") {
            let chunk = tokio::time::timeout(Duration::from_secs(2), out.next())
                .await
                .expect("interleave stalled before the mid part")
                .unwrap();
            html.push_str(&text(&chunk));
        }
        let mid = std::str::from_utf8(&shell.mid).unwrap();
        assert!(html.contains(mid));
        assert!(html.find("<title>Draft</title>").unwrap() < html.find(mid).unwrap());
        assert!(!html.contains("</html>"));
    }

    #[tokio::test]
    async fn test_late_head_markup_goes_before_its_script() {
        let payload: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"0:[\"$E\",\"p\",{},[\"x\"]]\n")),
            Ok(Bytes::from_static(
                b"1:[\"$E\",\"div\",{},[[\"$E\",\"title\",{},[\"Late\"]],[\"$S\",\"page:/\"]]]\n",
            )),
            Ok(Bytes::from_static(
                b"2:{\"_entry\":\"layout:/\",\"layout:/\":\"$1\",\"page:/\":\"$0\"}\n",
            )),
        ])
        .boxed();
        let shell = Arc::new(ShellParts::default());
        let html: String = interleave(payload, shell.clone(), Arc::new(ModuleRegistry::new()), HtmlOptions::default())
            .collect::<Vec<_>>()
            .await
            .iter()
            .map(text)
            .collect();

        assert_eq!(html.matches("<title>Late</title>").count(), 1);
        let mid_at = html.find(std::str::from_utf8(&shell.mid).unwrap()).unwrap();
        assert!(mid_at < html.find("<title>Late</title>").unwrap());
        assert!(html.contains("<div><p>x</p></div>"));
        assert!(html.ends_with("</body></html>"));
    }

    #[tokio::test]
    async fn test_dropping_html_stream_drops_payload() {
        let (payload_tx, payload_rx) = mpsc::channel(1);
        let payload = receiver_stream(payload_rx);
        let mut out = interleave(
            payload,
            Arc::new(ShellParts::default()),
            Arc::new(ModuleRegistry::new()),
            HtmlOptions::default(),
        );
        payload_tx.send(Ok(Bytes::from_static(b"0:null\n"))).await.unwrap();
        let mut html = String::new();
        while !html.contains("__FLIGHT__") {
            html.push_str(&text(&out.next().await.unwrap()));
        }

        drop(out);
        tokio::time::timeout(Duration::from_secs(2), payload_tx.closed())
            .await
            .expect("payload stream kept alive after the client went away");
    }

    #[tokio::test]
    async fn test_interleave_error_after_preamble() {
        let payload: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"0:null\n")),
            Err(RenderError::Component("boom".into())),
        ])
        .boxed();
        let out: Vec<_> = interleave(
            payload,
            Arc::new(ShellParts::default()),
            Arc::new(ModuleRegistry::new()),
            HtmlOptions::default(),
        )
        .collect()
        .await;
        assert!(out[0].is_ok());
        assert_eq!(out.last(), Some(&Err(RenderError::Component("boom".into()))));
        assert!(!out.iter().filter_map(|c| c.as_ref().ok()).any(|c| c.ends_with(b"</html>")));
    }
}
