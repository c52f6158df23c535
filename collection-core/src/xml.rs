//! Owned, mutable XML tree.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`], so passes that rename,
//! wrap, move or copy elements never fight the borrow checker. Detached nodes stay in the
//! arena until the document is dropped. Names are kept exactly as written (prefix included);
//! queries match on local names so namespaced and plain documents behave the same.
//!
//! Parsing goes through the `quick-xml` event reader; traversal and serialization are
//! iterative, so deeply nested input cannot exhaust the stack.

use std::fmt::Write as _;

use quick_xml::escape::{escape, partial_escape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("document has no root element")]
    NoRootElement,
    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    CData(String),
    Comment(String),
    Instruction(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<Node>,
    declaration: bool,
}

const DOCUMENT: NodeId = NodeId(0);

/// Local part of a possibly prefixed name.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

impl XmlDocument {
    /// An empty document holding a single root element.
    pub fn new(root_name: &str) -> Self {
        let mut doc = XmlDocument {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            declaration: false,
        };
        let root = doc.create_element(root_name);
        doc.append(DOCUMENT, root);
        doc
    }

    pub fn parse(input: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(input);
        let mut doc = XmlDocument {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            declaration: false,
        };
        let mut stack = vec![DOCUMENT];

        loop {
            let position = reader.buffer_position();
            let syntax = |e: quick_xml::Error| XmlError::Syntax {
                position,
                message: e.to_string(),
            };
            let current = *stack.last().unwrap_or(&DOCUMENT);
            match reader.read_event().map_err(syntax)? {
                Event::Start(e) => {
                    let id = doc.element_from_event(&e).map_err(syntax)?;
                    doc.append(current, id);
                    stack.push(id);
                }
                Event::Empty(e) => {
                    let id = doc.element_from_event(&e).map_err(syntax)?;
                    doc.append(current, id);
                }
                Event::End(_) => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(syntax)?;
                    // Whitespace outside the root element carries no content.
                    if current != DOCUMENT || !text.trim().is_empty() {
                        let id = doc.push(NodeKind::Text(text.into_owned()));
                        doc.append(current, id);
                    }
                }
                Event::CData(c) => {
                    let id = doc.push(NodeKind::CData(
                        String::from_utf8_lossy(&c.into_inner()).into_owned(),
                    ));
                    doc.append(current, id);
                }
                Event::Comment(c) => {
                    let id = doc.push(NodeKind::Comment(String::from_utf8_lossy(&c).into_owned()));
                    doc.append(current, id);
                }
                Event::PI(p) => {
                    let id =
                        doc.push(NodeKind::Instruction(String::from_utf8_lossy(&p).into_owned()));
                    doc.append(current, id);
                }
                Event::Decl(_) => doc.declaration = true,
                Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if stack.len() > 1 {
            let open = stack[stack.len() - 1];
            return Err(XmlError::Unclosed(doc.name(open).to_string()));
        }
        if doc.root().is_none() {
            return Err(XmlError::NoRootElement);
        }
        Ok(doc)
    }

    fn element_from_event(&mut self, e: &BytesStart<'_>) -> Result<NodeId, quick_xml::Error> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attrs.push((key, value));
        }
        Ok(self.push(NodeKind::Element { name, attrs }))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// The root element.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes[DOCUMENT.0]
            .children
            .iter()
            .copied()
            .find(|&c| self.is_element(c))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Element { .. })
    }

    /// Qualified element name, or the empty string for non-elements.
    pub fn name(&self, id: NodeId) -> &str {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } => name,
            _ => "",
        }
    }

    pub fn local_name(&self, id: NodeId) -> &str {
        local_name(self.name(id))
    }

    /// True when `id` is an element whose local name is `local`.
    pub fn is(&self, id: NodeId, local: &str) -> bool {
        self.is_element(id) && self.local_name(id) == local
    }

    pub fn rename(&mut self, id: NodeId, new_name: &str) {
        if let NodeKind::Element { name, .. } = &mut self.nodes[id.0].kind {
            *name = new_name.to_string();
        }
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First attribute whose local name is `local`, as `(qualified name, value)`.
    pub fn attr_local(&self, id: NodeId, local: &str) -> Option<(&str, &str)> {
        self.attrs(id)
            .iter()
            .find(|(k, _)| local_name(k) == local)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            match attrs.iter_mut().find(|(k, _)| k == key) {
                Some((_, v)) => *v = value.to_string(),
                None => attrs.push((key.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, key: &str) -> Option<String> {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id.0].kind {
            let pos = attrs.iter().position(|(k, _)| k == key)?;
            return Some(attrs.remove(pos).1);
        }
        None
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent.filter(|&p| p != DOCUMENT)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| self.is_element(c))
    }

    pub fn children_named<'a>(
        &'a self,
        id: NodeId,
        local: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.children(id)
            .iter()
            .copied()
            .filter(move |&c| self.is(c, local))
    }

    pub fn first_child_named(&self, id: NodeId, local: &str) -> Option<NodeId> {
        self.children_named(id, local).next()
    }

    /// Descendant elements of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            if !self.is_element(n) {
                continue;
            }
            out.push(n);
            stack.extend(self.children(n).iter().rev().copied());
        }
        out
    }

    pub fn descendants_named(&self, id: NodeId, local: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.local_name(n) == local)
            .collect()
    }

    /// First element in the whole document with local name `local`.
    pub fn find(&self, local: &str) -> Option<NodeId> {
        let root = self.root()?;
        if self.is(root, local) {
            return Some(root);
        }
        self.descendants(root)
            .into_iter()
            .find(|&n| self.local_name(n) == local)
    }

    /// Ancestor elements of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// Concatenated text content of `id` and its descendants.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            match &self.nodes[n.0].kind {
                NodeKind::Text(t) | NodeKind::CData(t) => out.push_str(t),
                NodeKind::Element { .. } | NodeKind::Document => {
                    stack.extend(self.children(n).iter().rev().copied())
                }
                _ => {}
            }
        }
        out
    }

    /// Text of the first child element named `local`, trimmed.
    pub fn child_text(&self, id: NodeId, local: &str) -> Option<String> {
        self.first_child_named(id, local)
            .map(|c| self.text(c).trim().to_string())
    }

    /// A detached element. Its name is used verbatim.
    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(NodeKind::Element {
            name: name.to_string(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    /// Qualifies `local` with the root element's prefix, if it has one.
    pub fn qualified(&self, local: &str) -> String {
        match self.root().and_then(|r| self.name(r).split_once(':')) {
            Some((prefix, _)) => format!("{prefix}:{local}"),
            None => local.to_string(),
        }
    }

    /// Creates `<local attrs...>text</local>` in the document's namespace, detached.
    pub fn element(&mut self, local: &str, attrs: &[(&str, &str)], text: Option<&str>) -> NodeId {
        let name = self.qualified(local);
        let id = self.create_element(&name);
        for (k, v) in attrs {
            self.set_attr(id, k, v);
        }
        if let Some(text) = text {
            let t = self.create_text(text);
            self.append(id, t);
        }
        id
    }

    /// Removes `id` from its parent; the node keeps its own subtree.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&c| c != id);
        }
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        let t = self.create_text(text);
        self.append(parent, t);
    }

    /// Puts a new `wrapper_name` element in place of `id` and moves `id` inside it.
    pub fn wrap(&mut self, id: NodeId, wrapper_name: &str) -> NodeId {
        let wrapper = self.create_element(wrapper_name);
        if let Some(parent) = self.nodes[id.0].parent {
            if let Some(pos) = self.nodes[parent.0].children.iter().position(|&c| c == id) {
                self.nodes[parent.0].children[pos] = wrapper;
                self.nodes[wrapper.0].parent = Some(parent);
                self.nodes[id.0].parent = None;
            }
        }
        self.append(wrapper, id);
        wrapper
    }

    /// Deep-copies the subtree at `src` of `other` into this document, detached.
    pub fn import(&mut self, other: &XmlDocument, src: NodeId) -> NodeId {
        let top = self.push(other.nodes[src.0].kind.clone());
        let mut stack: Vec<(NodeId, NodeId)> = other.nodes[src.0]
            .children
            .iter()
            .rev()
            .map(|&c| (c, top))
            .collect();
        while let Some((from, parent)) = stack.pop() {
            let copy = self.push(other.nodes[from.0].kind.clone());
            self.nodes[copy.0].parent = Some(parent);
            self.nodes[parent.0].children.push(copy);
            stack.extend(other.nodes[from.0].children.iter().rev().map(|&c| (c, copy)));
        }
        top
    }

    /// The subtree at `id` as a standalone document.
    pub fn extract(&self, id: NodeId) -> XmlDocument {
        let mut doc = XmlDocument {
            nodes: vec![Node {
                kind: NodeKind::Document,
                parent: None,
                children: Vec::new(),
            }],
            declaration: false,
        };
        let copy = doc.import(self, id);
        doc.append(DOCUMENT, copy);
        doc
    }

    /// Deep-copies `id` within this document, detached.
    pub fn deep_copy(&mut self, id: NodeId) -> NodeId {
        let fragment = self.extract(id);
        match fragment.root() {
            Some(root) => self.import(&fragment, root),
            None => self.import(&fragment, DOCUMENT),
        }
    }

    /// First element carrying `id="value"`.
    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        let root = self.root()?;
        std::iter::once(root)
            .chain(self.descendants(root))
            .find(|&n| self.attr(n, "id") == Some(value))
    }

    /// Serializes the whole document.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        if self.declaration {
            out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        }
        for &child in self.children(DOCUMENT) {
            self.write_node(child, &mut out);
            if !self.is_element(child) {
                out.push('\n');
            }
        }
        out
    }

    /// Serializes the subtree at `id`.
    pub fn node_to_string(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        enum Step {
            Open(NodeId),
            Close(NodeId),
        }
        let mut stack = vec![Step::Open(id)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Close(n) => {
                    let _ = write!(out, "</{}>", self.name(n));
                }
                Step::Open(n) => match &self.nodes[n.0].kind {
                    NodeKind::Element { name, attrs } => {
                        out.push('<');
                        out.push_str(name);
                        for (k, v) in attrs {
                            let _ = write!(out, " {}=\"{}\"", k, escape(v.as_str()));
                        }
                        let children = self.children(n);
                        if children.is_empty() {
                            out.push_str("/>");
                        } else {
                            out.push('>');
                            stack.push(Step::Close(n));
                            stack.extend(children.iter().rev().map(|&c| Step::Open(c)));
                        }
                    }
                    NodeKind::Text(t) => out.push_str(&partial_escape(t.as_str())),
                    NodeKind::CData(t) => {
                        let _ = write!(out, "<![CDATA[{t}]]>");
                    }
                    NodeKind::Comment(t) => {
                        let _ = write!(out, "<!--{t}-->");
                    }
                    NodeKind::Instruction(t) => {
                        let _ = write!(out, "<?{t}?>");
                    }
                    NodeKind::Document => {
                        stack.extend(self.children(n).iter().rev().map(|&c| Step::Open(c)));
                    }
                },
            }
        }
    }
}
