//! Bibliographic items.
//!
//! A [`Bibdata`] keeps the item as an owned XML subtree so that items read from documents
//! survive serialization untouched; accessors pull out the few fields collection assembly
//! needs. Items declared in YAML manifests are converted into the same XML shape.

use std::borrow::Cow;
use std::sync::OnceLock;

use quick_xml::escape::unescape;
use regex::Regex;
use serde::Deserialize;

use crate::xml::{NodeId, XmlDocument};

/// Registry key for an identifier: entities decoded, whitespace runs collapsed to one space.
pub fn identifier_key(identifier: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let ws = WS.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    let decoded: Cow<'_, str> = unescape(identifier).unwrap_or(Cow::Borrowed(identifier));
    ws.replace_all(&decoded, " ").into_owned()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocIdentifier {
    pub kind: Option<String>,
    pub primary: bool,
    pub text: String,
}

/// `docidentifier` children of a bibliographic element.
pub(crate) fn docidentifiers_of(doc: &XmlDocument, item: NodeId) -> Vec<DocIdentifier> {
    doc.children_named(item, "docidentifier")
        .map(|d| DocIdentifier {
            kind: doc.attr(d, "type").map(str::to_string),
            primary: doc.attr(d, "primary") == Some("true"),
            text: doc.text(d).trim().to_string(),
        })
        .collect()
}

/// Text of the `docidentifier[@type="repository"]` child, if any.
pub(crate) fn repository_identifier_of(doc: &XmlDocument, item: NodeId) -> Option<String> {
    doc.children_named(item, "docidentifier")
        .find(|&d| doc.attr(d, "type") == Some("repository"))
        .map(|d| doc.text(d).trim().to_string())
}

/// The citation URI for `lang`, falling back to a language-neutral one, then to any.
pub(crate) fn citation_uri_of(doc: &XmlDocument, item: NodeId, lang: &str) -> Option<String> {
    let uris: Vec<NodeId> = doc
        .children_named(item, "uri")
        .filter(|&u| doc.attr(u, "type") == Some("citation"))
        .collect();
    let pick = uris
        .iter()
        .find(|&&u| doc.attr(u, "language") == Some(lang))
        .or_else(|| uris.iter().find(|&&u| doc.attr(u, "language").is_none()))
        .or_else(|| uris.first())?;
    let text = doc.text(*pick).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone)]
pub struct Bibdata {
    doc: XmlDocument,
}

impl Bibdata {
    /// Copies the element at `id` out of `doc`.
    pub fn from_element(doc: &XmlDocument, id: NodeId) -> Self {
        Self {
            doc: doc.extract(id),
        }
    }

    /// The first `bibdata` block of a whole document.
    pub fn from_document(doc: &XmlDocument) -> Option<Self> {
        doc.find("bibdata").map(|id| Self::from_element(doc, id))
    }

    /// A minimal item carrying only an identifier.
    pub fn from_identifier(identifier: &str) -> Self {
        let mut doc = XmlDocument::new("bibdata");
        if let Some(root) = doc.root() {
            let id = doc.element("docidentifier", &[], Some(identifier));
            doc.append(root, id);
        }
        Self { doc }
    }

    pub fn document(&self) -> &XmlDocument {
        &self.doc
    }

    fn root(&self) -> Option<NodeId> {
        self.doc.root()
    }

    pub fn docidentifiers(&self) -> Vec<DocIdentifier> {
        self.root()
            .map(|r| docidentifiers_of(&self.doc, r))
            .unwrap_or_default()
    }

    /// The identifier flagged primary, else the first one.
    pub fn primary_docidentifier(&self) -> Option<DocIdentifier> {
        let ids = self.docidentifiers();
        ids.iter()
            .find(|d| d.primary)
            .or_else(|| ids.first())
            .cloned()
    }

    fn child_texts(&self, local: &str) -> Vec<String> {
        match self.root() {
            Some(r) => self
                .doc
                .children_named(r, local)
                .map(|c| self.doc.text(c).trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn languages(&self) -> Vec<String> {
        self.child_texts("language")
    }

    pub fn scripts(&self) -> Vec<String> {
        self.child_texts("script")
    }

    /// Title in `lang`, else the first title.
    pub fn title(&self, lang: &str) -> Option<String> {
        let root = self.root()?;
        let titles: Vec<NodeId> = self.doc.children_named(root, "title").collect();
        let pick = titles
            .iter()
            .find(|&&t| self.doc.attr(t, "language") == Some(lang))
            .or_else(|| titles.first())?;
        Some(self.doc.text(*pick).trim().to_string())
    }

    pub fn citation_uri(&self, lang: &str) -> Option<String> {
        citation_uri_of(&self.doc, self.root()?, lang)
    }

    /// Copies this item under `parent` of `target`, renaming the root element to `as_name`.
    pub fn write_into(&self, target: &mut XmlDocument, parent: NodeId, as_name: &str) {
        let Some(root) = self.root() else { return };
        let copy = target.import(&self.doc, root);
        let name = target.qualified(as_name);
        target.rename(copy, &name);
        target.append(parent, copy);
    }

    pub fn to_xml_string(&self) -> String {
        self.root()
            .map(|r| self.doc.node_to_string(r))
            .unwrap_or_default()
    }
}

impl PartialEq for Bibdata {
    fn eq(&self, other: &Self) -> bool {
        self.to_xml_string() == other.to_xml_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(t) => vec![t],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TitleYaml {
    Plain(String),
    Localized {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        format: Option<String>,
        content: String,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocidYaml {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    id: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkYaml {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(alias = "url")]
    content: String,
    #[serde(default)]
    language: Option<String>,
}

/// YAML-side bibliographic item, converted to [`Bibdata`] after decoding.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct BibdataYaml {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: OneOrMany<TitleYaml>,
    docid: OneOrMany<DocidYaml>,
    edition: Option<serde_yaml::Value>,
    language: OneOrMany<String>,
    script: OneOrMany<String>,
    link: OneOrMany<LinkYaml>,
}

pub(crate) fn scalar_text(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

impl From<BibdataYaml> for Bibdata {
    fn from(y: BibdataYaml) -> Self {
        let mut doc = XmlDocument::new("bibdata");
        let Some(root) = doc.root() else {
            return Self { doc };
        };
        if let Some(kind) = &y.kind {
            doc.set_attr(root, "type", kind);
        }
        for title in y.title.into_vec() {
            let el = match title {
                TitleYaml::Plain(content) => doc.element("title", &[], Some(&content)),
                TitleYaml::Localized {
                    language,
                    format,
                    content,
                } => {
                    let mut attrs = Vec::new();
                    if let Some(l) = &language {
                        attrs.push(("language", l.as_str()));
                    }
                    if let Some(f) = &format {
                        attrs.push(("format", f.as_str()));
                    }
                    doc.element("title", &attrs, Some(&content))
                }
            };
            doc.append(root, el);
        }
        for link in y.link.into_vec() {
            let mut attrs = Vec::new();
            if let Some(k) = &link.kind {
                attrs.push(("type", k.as_str()));
            }
            if let Some(l) = &link.language {
                attrs.push(("language", l.as_str()));
            }
            let el = doc.element("uri", &attrs, Some(&link.content));
            doc.append(root, el);
        }
        for id in y.docid.into_vec() {
            let mut attrs = Vec::new();
            if let Some(k) = &id.kind {
                attrs.push(("type", k.as_str()));
            }
            if id.primary {
                attrs.push(("primary", "true"));
            }
            let el = doc.element("docidentifier", &attrs, Some(&id.id));
            doc.append(root, el);
        }
        if let Some(edition) = &y.edition {
            let el = doc.element("edition", &[], Some(&scalar_text(edition)));
            doc.append(root, el);
        }
        for lang in y.language.into_vec() {
            let el = doc.element("language", &[], Some(&lang));
            doc.append(root, el);
        }
        for script in y.script.into_vec() {
            let el = doc.element("script", &[], Some(&script));
            doc.append(root, el);
        }
        Self { doc }
    }
}
