//! Resolved documents, keyed by normalized identifier.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::bibdata::{identifier_key, Bibdata};
use crate::contract::Hooks;
use crate::error::{BuildWarning, CollectionError};
use crate::manifest::ManifestEntry;
use crate::xml::{NodeId, XmlDocument};

/// One leaf of the resolved manifest.
#[derive(Debug, Clone)]
pub struct Document {
    pub identifier: String,
    pub bibitem: Bibdata,
    /// The manifest file reference, relative to the collection directory.
    pub fileref: String,
    /// Where the file was found on disk.
    pub path: PathBuf,
    pub attachment: bool,
    pub index: bool,
    pub raw: bool,
    /// Root element name of the document; empty for attachments.
    pub root_name: String,
    source: Option<XmlDocument>,
}

impl Document {
    /// Reads the document behind a resolved leaf.
    pub fn load(
        entry: &ManifestEntry,
        dir: &Path,
        hooks: &Hooks,
        inline: bool,
    ) -> Result<Self, CollectionError> {
        let fileref = entry.file.clone().unwrap_or_default();
        let path = hooks.fileref.resolve(dir, &fileref);
        let raw = inline && !entry.attachment;

        if entry.attachment {
            return Ok(Self {
                identifier: entry.identifier.clone(),
                bibitem: Bibdata::from_identifier(&entry.identifier),
                fileref,
                path,
                attachment: true,
                index: entry.index,
                raw,
                root_name: String::new(),
                source: None,
            });
        }

        let content = fs::read_to_string(&path).map_err(|e| CollectionError::io(&path, e))?;
        let doc = XmlDocument::parse(&content).map_err(|e| CollectionError::xml(&path, e))?;
        let root_name = doc
            .root()
            .map(|r| doc.name(r).to_string())
            .unwrap_or_default();
        let bibitem = Bibdata::from_document(&doc)
            .unwrap_or_else(|| Bibdata::from_identifier(&entry.identifier));
        Ok(Self {
            identifier: entry.identifier.clone(),
            bibitem,
            fileref,
            path,
            attachment: false,
            index: entry.index,
            raw,
            root_name,
            source: raw.then_some(doc),
        })
    }

    /// Fills a `doc-container` element of `target` with this document.
    pub fn write_container(
        &self,
        target: &mut XmlDocument,
        container: NodeId,
    ) -> Result<(), CollectionError> {
        if self.attachment {
            self.bibitem.write_into(target, container, "bibdata");
            let bytes = fs::read(&self.path).map_err(|e| CollectionError::io(&self.path, e))?;
            let uri = format!("data:{};base64,{}", mime_type(&self.path), STANDARD.encode(bytes));
            let el = target.element("attachment", &[], Some(&uri));
            target.append(container, el);
            return Ok(());
        }
        match self.source.as_ref().and_then(|s| s.root().map(|r| (s, r))) {
            Some((source, root)) => {
                let copy = target.import(source, root);
                target.append(container, copy);
            }
            None => {
                let wrapper = target.create_element(&self.root_name);
                self.bibitem.write_into(target, wrapper, "bibdata");
                target.append(container, wrapper);
            }
        }
        Ok(())
    }
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Ordered map from identifier key to [`Document`]. Read-only once built.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    docs: IndexMap<String, Document>,
    warnings: Vec<BuildWarning>,
}

impl DocumentRegistry {
    /// Walks `tree` depth-first and loads every leaf. For a repeated identifier the first
    /// document is kept.
    pub fn build(
        tree: &ManifestEntry,
        dir: &Path,
        hooks: &Hooks,
        inline: bool,
    ) -> Result<Self, CollectionError> {
        let mut registry = DocumentRegistry::default();
        let mut stack = vec![tree];
        while let Some(entry) = stack.pop() {
            stack.extend(entry.entries.iter().rev());
            if entry.file.is_none() {
                continue;
            }
            let key = identifier_key(&entry.identifier);
            if registry.docs.contains_key(&key) {
                warn!(identifier = %key, "Duplicate document identifier; keeping the first");
                registry
                    .warnings
                    .push(BuildWarning::DuplicateIdentifier { identifier: key });
                continue;
            }
            let doc = Document::load(entry, dir, hooks, inline)?;
            debug!(identifier = %key, file = %doc.fileref, "Registered document");
            registry.docs.insert(key, doc);
        }
        info!(documents = registry.docs.len(), "Document registry built");
        Ok(registry)
    }

    pub fn get(&self, identifier: &str) -> Option<&Document> {
        self.docs.get(&identifier_key(identifier))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.docs.contains_key(&identifier_key(identifier))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Documents in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Document)> {
        self.docs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn identifiers(&self) -> Vec<&str> {
        self.docs.keys().map(String::as_str).collect()
    }

    /// Identifiers that appeared more than once, each reported once.
    pub fn duplicates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for w in &self.warnings {
            if let BuildWarning::DuplicateIdentifier { identifier } = w {
                if !out.contains(identifier) {
                    out.push(identifier.clone());
                }
            }
        }
        out
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }
}
