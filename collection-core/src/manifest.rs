//! The manifest tree and the collection configuration around it.
//!
//! A [`ManifestEntry`] is either a leaf (it names a document file) or an internal node
//! (it groups children). Resolver passes mutate the tree in place; afterwards it is only
//! read, serialized and walked by the registry.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::bibdata::Bibdata;
use crate::error::CollectionError;
use crate::xml::{NodeId, XmlDocument};

/// Nesting deeper than this is rejected as malformed (this also stops self-including YAML).
pub const MAX_MANIFEST_DEPTH: usize = 64;

pub const DOCUMENTS_INLINE: &str = "documents-inline";
pub const DOCUMENTS_EXTERNAL: &str = "documents-external";
pub const RECOMPILE_XML: &str = "recompile-xml";
pub const FLAVOR: &str = "flavor";
pub const COVERPAGE: &str = "coverpage";
pub const COVERPAGE_STYLE: &str = "coverpage-style";

pub const COLLECTION_ROOT: &str = "metanorma-collection";
pub const COLLECTION_NAMESPACE: &str = "http://metanorma.org";

fn placeholder_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$")
            .expect("valid regex")
    })
}

/// A fresh "not yet assigned" identifier.
pub fn placeholder_identifier() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn is_placeholder(identifier: &str) -> bool {
    placeholder_shape().is_match(identifier)
}

pub(crate) fn check_depth(depth: usize) -> Result<(), CollectionError> {
    if depth > MAX_MANIFEST_DEPTH {
        return Err(CollectionError::MalformedManifest(format!(
            "manifest nesting exceeds {MAX_MANIFEST_DEPTH} levels"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub identifier: String,
    pub id: Option<String>,
    pub file: Option<String>,
    pub url: Option<String>,
    pub entry_type: Option<String>,
    pub title: Option<String>,
    pub attachment: bool,
    pub sectionsplit: bool,
    pub index: bool,
    pub bibdata: Option<Bibdata>,
    pub entries: Vec<ManifestEntry>,
}

impl Default for ManifestEntry {
    fn default() -> Self {
        Self {
            identifier: placeholder_identifier(),
            id: None,
            file: None,
            url: None,
            entry_type: None,
            title: None,
            attachment: false,
            sectionsplit: false,
            index: true,
            bibdata: None,
            entries: Vec::new(),
        }
    }
}

impl ManifestEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A leaf entry for `file`.
    pub fn leaf(file: &str) -> Self {
        Self {
            file: Some(file.to_string()),
            ..Self::default()
        }
    }

    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.identifier = identifier.to_string();
        self
    }

    pub fn with_entries(mut self, entries: Vec<ManifestEntry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.file.is_some() && self.entries.is_empty()
    }

    pub fn has_placeholder_identifier(&self) -> bool {
        is_placeholder(&self.identifier)
    }

    /// Leaves in document order.
    pub fn leaves(&self) -> Vec<&ManifestEntry> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(e) = stack.pop() {
            if e.file.is_some() {
                out.push(e);
            } else {
                stack.extend(e.entries.iter().rev());
            }
        }
        out
    }

    pub(crate) fn from_element(
        doc: &XmlDocument,
        node: NodeId,
        depth: usize,
    ) -> Result<Self, CollectionError> {
        check_depth(depth)?;
        let flag = |key: &str, default: bool| match doc.attr(node, key) {
            Some(v) => v == "true",
            None => default,
        };
        let mut entry = ManifestEntry {
            id: doc.attr(node, "id").map(str::to_string),
            file: doc.attr(node, "fileref").map(str::to_string),
            url: doc.attr(node, "url").map(str::to_string),
            attachment: flag("attachment", false),
            sectionsplit: flag("sectionsplit", false),
            index: flag("index", true),
            ..ManifestEntry::default()
        };
        for child in doc.child_elements(node) {
            match doc.local_name(child) {
                "identifier" => entry.identifier = doc.text(child).trim().to_string(),
                "type" => entry.entry_type = Some(doc.text(child).trim().to_string()),
                "title" => entry.title = Some(doc.text(child).trim().to_string()),
                "bibdata" => entry.bibdata = Some(Bibdata::from_element(doc, child)),
                "entry" => entry
                    .entries
                    .push(ManifestEntry::from_element(doc, child, depth + 1)?),
                other => debug!(element = other, "Ignoring unknown manifest entry element"),
            }
        }
        Ok(entry)
    }

    pub(crate) fn write_element(&self, doc: &mut XmlDocument, parent: NodeId) {
        let node = doc.element("entry", &[], None);
        doc.append(parent, node);

        let mut stack: Vec<(&ManifestEntry, NodeId)> = vec![(self, node)];
        while let Some((entry, node)) = stack.pop() {
            if let Some(id) = &entry.id {
                doc.set_attr(node, "id", id);
            }
            if entry.attachment {
                doc.set_attr(node, "attachment", "true");
            }
            if entry.sectionsplit {
                doc.set_attr(node, "sectionsplit", "true");
            }
            if !entry.index {
                doc.set_attr(node, "index", "false");
            }
            if let Some(url) = &entry.url {
                doc.set_attr(node, "url", url);
            }
            if let Some(file) = &entry.file {
                doc.set_attr(node, "fileref", file);
            }
            if !entry.has_placeholder_identifier() {
                let el = doc.element("identifier", &[], Some(&entry.identifier));
                doc.append(node, el);
            }
            if let Some(t) = &entry.entry_type {
                let el = doc.element("type", &[], Some(t));
                doc.append(node, el);
            }
            if let Some(t) = &entry.title {
                let el = doc.element("title", &[], Some(t));
                doc.append(node, el);
            }
            if let Some(b) = &entry.bibdata {
                b.write_into(doc, node, "bibdata");
            }
            let mut pending = Vec::with_capacity(entry.entries.len());
            for child in &entry.entries {
                let child_node = doc.element("entry", &[], None);
                doc.append(node, child_node);
                pending.push((child, child_node));
            }
            stack.extend(pending.into_iter().rev());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub key: String,
    pub value: Option<String>,
}

/// Ordered collection directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives(Vec<Directive>);

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: Option<&str>) {
        self.0.push(Directive {
            key: key.to_string(),
            value: value.map(str::to_string),
        });
    }

    pub fn with(mut self, key: &str) -> Self {
        self.push(key, None);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|d| d.key == key)
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|d| d.key == key)
            .and_then(|d| d.value.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whole documents are embedded in the collection output.
    pub fn documents_inline(&self) -> bool {
        self.contains(DOCUMENTS_INLINE) && !self.contains(DOCUMENTS_EXTERNAL)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionConfig {
    pub bibdata: Option<Bibdata>,
    pub directives: Directives,
    pub manifest: ManifestEntry,
    pub prefatory_content: Option<String>,
    pub final_content: Option<String>,
    pub formats: Vec<String>,
    pub output_folder: Option<PathBuf>,
    pub coverpage: Option<String>,
    pub compile: BTreeMap<String, String>,
}

impl CollectionConfig {
    pub fn new(manifest: ManifestEntry) -> Self {
        Self {
            manifest,
            ..Self::default()
        }
    }

    /// Decodes an XML collection manifest.
    pub fn from_xml_document(doc: &XmlDocument) -> Result<Self, CollectionError> {
        let root = doc
            .root()
            .ok_or_else(|| CollectionError::MalformedManifest("empty document".to_string()))?;
        if doc.local_name(root) != COLLECTION_ROOT {
            return Err(CollectionError::MalformedManifest(format!(
                "expected <{COLLECTION_ROOT}> root element, found <{}>",
                doc.name(root)
            )));
        }

        let mut config = CollectionConfig::default();
        let mut manifest = None;
        for child in doc.child_elements(root) {
            match doc.local_name(child) {
                "bibdata" => config.bibdata = Some(Bibdata::from_element(doc, child)),
                "directives" => match doc.child_text(child, "key") {
                    Some(key) => {
                        let value = doc.child_text(child, "value");
                        config.directives.push(&key, value.as_deref());
                    }
                    None => config.directives.push(doc.text(child).trim(), None),
                },
                "entry" if manifest.is_none() => {
                    manifest = Some(ManifestEntry::from_element(doc, child, 0)?)
                }
                "prefatory-content" => config.prefatory_content = Some(fragment_of(doc, child)),
                "final-content" => config.final_content = Some(fragment_of(doc, child)),
                other => debug!(element = other, "Ignoring collection element"),
            }
        }
        config.manifest = manifest.ok_or_else(|| {
            CollectionError::MalformedManifest("collection has no <entry> manifest".to_string())
        })?;
        Ok(config)
    }

    /// Serializes everything except document containers, which belong to the assembler.
    pub(crate) fn write_head(&self, doc: &mut XmlDocument, root: NodeId) {
        if let Some(b) = &self.bibdata {
            b.write_into(doc, root, "bibdata");
        }
        for d in self.directives.iter() {
            let el = doc.element("directives", &[], None);
            let key = doc.element("key", &[], Some(&d.key));
            doc.append(el, key);
            if let Some(v) = &d.value {
                let value = doc.element("value", &[], Some(v));
                doc.append(el, value);
            }
            doc.append(root, el);
        }
        self.manifest.write_element(doc, root);
        if let Some(p) = &self.prefatory_content {
            write_fragment(doc, root, "prefatory-content", p);
        }
    }

    pub(crate) fn write_tail(&self, doc: &mut XmlDocument, root: NodeId) {
        if let Some(f) = &self.final_content {
            write_fragment(doc, root, "final-content", f);
        }
    }

    /// The collection as XML, without document containers.
    pub fn to_xml(&self) -> String {
        let mut doc = XmlDocument::new(COLLECTION_ROOT);
        if let Some(root) = doc.root() {
            doc.set_attr(root, "xmlns", COLLECTION_NAMESPACE);
            self.write_head(&mut doc, root);
            self.write_tail(&mut doc, root);
        }
        doc.to_xml_string()
    }
}

/// The content of `el` as an XML fragment, markup included.
fn fragment_of(doc: &XmlDocument, el: NodeId) -> String {
    doc.children(el).iter().map(|&c| doc.node_to_string(c)).collect()
}

/// Appends `<name>` holding `content`. Content that is not well-formed XML (YAML manifests
/// carry plain markup source) is written as text.
fn write_fragment(doc: &mut XmlDocument, parent: NodeId, name: &str, content: &str) {
    let el = doc.element(name, &[], None);
    match XmlDocument::parse(&format!("<{name}>{content}</{name}>")) {
        Ok(fragment) => {
            if let Some(top) = fragment.root() {
                for &c in fragment.children(top) {
                    let copy = doc.import(&fragment, c);
                    doc.append(el, copy);
                }
            }
        }
        Err(_) => doc.append_text(el, content),
    }
    doc.append(parent, el);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_identifiers_have_guid_shape() {
        let id = placeholder_identifier();
        assert!(is_placeholder(&id), "{id}");
        assert!(!is_placeholder("ISO 17301-1:2016"));
        assert!(!is_placeholder(&id.to_uppercase()));
    }

    #[test]
    fn leaves_are_listed_in_entry_order() {
        let tree = ManifestEntry::new().with_entries(vec![
            ManifestEntry::leaf("a.xml"),
            ManifestEntry::new().with_entries(vec![
                ManifestEntry::leaf("b.xml"),
                ManifestEntry::leaf("c.xml"),
            ]),
            ManifestEntry::leaf("d.xml"),
        ]);
        let files: Vec<_> = tree.leaves().iter().filter_map(|e| e.file.clone()).collect();
        assert_eq!(files, vec!["a.xml", "b.xml", "c.xml", "d.xml"]);
    }

    #[test]
    fn directives_keep_values() {
        let mut d = Directives::new().with(DOCUMENTS_INLINE);
        d.push(COVERPAGE, Some("cover.html"));
        assert!(d.documents_inline());
        assert_eq!(d.value(COVERPAGE), Some("cover.html"));
        assert_eq!(d.len(), 2);
        d.push(DOCUMENTS_EXTERNAL, None);
        assert!(!d.documents_inline());
    }

    #[test]
    fn excessive_nesting_is_malformed() {
        let mut xml = String::from("<metanorma-collection>");
        for _ in 0..=MAX_MANIFEST_DEPTH + 1 {
            xml.push_str("<entry>");
        }
        for _ in 0..=MAX_MANIFEST_DEPTH + 1 {
            xml.push_str("</entry>");
        }
        xml.push_str("</metanorma-collection>");
        let doc = XmlDocument::parse(&xml).expect("well-formed");
        let err = CollectionConfig::from_xml_document(&doc).unwrap_err();
        assert!(matches!(err, CollectionError::MalformedManifest(_)));
    }
}
