//! Cross-document reference rewriting.
//!
//! When a collection member is published on its own (or split into sections), references
//! that pointed at its siblings must keep working. [`CrossReferenceResolver`] classifies the
//! bibliographic items a document cites, rewrites `eref`/`xref` elements accordingly, and
//! keeps the targets of rewritten references in a hidden bibliography.
//!
//! Rewriting is fail-soft: a reference whose target cannot be found is left as it was and
//! reported as a [`BuildWarning::UnresolvedCrossReference`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::bibdata::{citation_uri_of, repository_identifier_of, Bibdata};
use crate::error::BuildWarning;
use crate::registry::DocumentRegistry;
use crate::xml::{NodeId, XmlDocument};

/// Repository prefix that names the collection being assembled.
pub const DEFAULT_NAMESPACE: &str = "current-metanorma-collection";

const TOKEN_LEN: usize = 8;

/// Eight uppercase ASCII letters marking which rendering pass owns an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeToken(String);

impl ScopeToken {
    /// Accepts exactly eight uppercase ASCII letters.
    pub fn parse(s: &str) -> Option<Self> {
        (s.len() == TOKEN_LEN && s.bytes().all(|b| b.is_ascii_uppercase()))
            .then(|| ScopeToken(s.to_string()))
    }

    /// The `n`th token in base-26 order: 0 is `AAAAAAAA`, 1 is `AAAAAAAB`.
    pub fn from_index(n: u64) -> Self {
        let mut n = n % 26u64.pow(TOKEN_LEN as u32);
        let mut bytes = [b'A'; TOKEN_LEN];
        for b in bytes.iter_mut().rev() {
            *b = b'A' + (n % 26) as u8;
            n /= 26;
        }
        ScopeToken(bytes.iter().map(|&b| b as char).collect())
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        ScopeToken(
            (0..TOKEN_LEN)
                .map(|_| (b'A' + rng.gen_range(0..26u8)) as char)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenSource {
    #[default]
    Random,
    /// Deterministic tokens starting from the given index.
    Sequential(u64),
}

/// How a cited bibliographic item relates to the collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceClass {
    /// Outside every repository, reachable through a citation URI.
    External { uri: String },
    /// A document in another repository.
    Indirect { repository: String, id: String },
    /// A document of this collection.
    Internal,
    /// An ordinary citation; never rewritten.
    Citation,
}

/// A reference that was retargeted and may need a bibliography entry to back it.
#[derive(Debug, Clone)]
struct Rewritten {
    id: String,
    repository: String,
    internal: bool,
}

pub struct CrossReferenceResolver<'a> {
    registry: Option<&'a DocumentRegistry>,
    namespace: String,
    tokens: TokenSource,
    issued: HashSet<ScopeToken>,
    warnings: Vec<BuildWarning>,
}

impl Default for CrossReferenceResolver<'_> {
    fn default() -> Self {
        Self {
            registry: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            tokens: TokenSource::default(),
            issued: HashSet::new(),
            warnings: Vec::new(),
        }
    }
}

impl<'a> CrossReferenceResolver<'a> {
    /// A resolver that knows no collection members; only the repository namespace marks
    /// items as internal.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: &'a DocumentRegistry) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_token_source(mut self, tokens: TokenSource) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<BuildWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// A token not issued before by this resolver.
    pub fn issue_token(&mut self) -> ScopeToken {
        loop {
            let token = match &mut self.tokens {
                TokenSource::Random => ScopeToken::random(&mut rand::thread_rng()),
                TokenSource::Sequential(next) => {
                    let t = ScopeToken::from_index(*next);
                    *next += 1;
                    t
                }
            };
            if self.issued.insert(token.clone()) {
                return token;
            }
        }
    }

    /// Marks `doc` with a fresh scope token and maps its SVG hyperlinks.
    pub fn preprocess(&mut self, doc: &mut XmlDocument) -> ScopeToken {
        let token = self.issue_token();
        self.preprocess_with(doc, token.clone());
        token
    }

    /// As [`Self::preprocess`], with a caller-chosen token.
    pub fn preprocess_with(&mut self, doc: &mut XmlDocument, token: ScopeToken) {
        let Some(root) = doc.root() else { return };
        doc.set_attr(root, "type", token.as_str());
        let suffix = doc.attr(root, "document_suffix").map(str::to_string);
        svg_preprocess(doc, suffix.as_deref());
        debug!(token = %token, "Preprocessed document");
        self.issued.insert(token);
    }

    /// Classifies the bibliographic element `item` of `doc`.
    ///
    /// A citation URI for `lang` wins over any repository identifier the item also carries.
    pub fn classify(&self, doc: &XmlDocument, item: NodeId, lang: &str) -> ReferenceClass {
        if let Some(uri) = citation_uri_of(doc, item, lang) {
            return ReferenceClass::External { uri };
        }
        if doc.attr(item, "type") == Some("internal") {
            return ReferenceClass::Internal;
        }
        if let Some(repo) = repository_identifier_of(doc, item) {
            return match repo.split_once('/') {
                Some((prefix, rest)) if !prefix.is_empty() && !rest.is_empty() => {
                    let known = self.registry.is_some_and(|r| r.contains(rest));
                    if prefix == self.namespace || known {
                        ReferenceClass::Internal
                    } else {
                        ReferenceClass::Indirect {
                            repository: prefix.to_string(),
                            id: rest.to_string(),
                        }
                    }
                }
                Some(_) => {
                    debug!(repository = %repo, "Malformed repository identifier; treating as internal");
                    ReferenceClass::Internal
                }
                None => ReferenceClass::Internal,
            };
        }
        ReferenceClass::Citation
    }

    /// Rewrites the references of `section`, a part of `doc` (or a copy of all of it).
    ///
    /// `token` is the scope token of the pass publishing `section`; without one, references
    /// into this collection keep their plain anchors. `identifier` names the document in
    /// warnings.
    pub fn resolve(
        &mut self,
        section: &mut XmlDocument,
        doc: &XmlDocument,
        token: Option<&ScopeToken>,
        identifier: &str,
        language_default: &str,
    ) {
        let Some(section_root) = section.root() else { return };
        let suffix = doc
            .root()
            .and_then(|r| doc.attr(r, "document_suffix"))
            .map(str::to_string);
        svg_preprocess(section, suffix.as_deref());

        let lang = Bibdata::from_document(doc)
            .and_then(|b| b.languages().into_iter().next())
            .unwrap_or_else(|| language_default.to_string());

        let mut classes: HashMap<String, ReferenceClass> = HashMap::new();
        self.classify_items(section, &lang, &mut classes);
        self.classify_items(doc, &lang, &mut classes);

        let mut anchors: HashSet<String> = HashSet::new();
        collect_anchors(section, &mut anchors);
        collect_anchors(doc, &mut anchors);

        let mut rewritten = Vec::new();

        for el in section.descendants(section_root) {
            let Some(target) = section.attr(el, "bibitemid").map(str::to_string) else {
                continue;
            };
            match classes.get(&target) {
                Some(class) => {
                    rewrite(section, el, &target, class, token, &mut rewritten);
                }
                None => self.unresolved(identifier, &target),
            }
        }

        for el in section.descendants_named(section_root, "xref") {
            let Some(raw) = section.attr(el, "target").map(str::to_string) else {
                continue;
            };
            let target = match suffix.as_deref() {
                Some(s) => raw
                    .strip_suffix(&format!("_{s}"))
                    .unwrap_or(&raw)
                    .to_string(),
                None => raw.clone(),
            };
            if let Some(class) = classes.get(&target) {
                if *class == ReferenceClass::Citation {
                    continue;
                }
                into_eref(section, el, &target);
                rewrite(section, el, &target, class, token, &mut rewritten);
            } else if anchors.contains(&target) || anchors.contains(&raw) {
                let Some(token) = token else { continue };
                into_eref(section, el, &target);
                let id = format!("{token}_{target}");
                section.set_attr(el, "bibitemid", &id);
                section.set_attr(el, "type", token.as_str());
                add_anchor_locality(section, el, &target);
                rewritten.push(Rewritten {
                    id,
                    repository: format!("{token}/{target}"),
                    internal: true,
                });
            } else {
                self.unresolved(identifier, &raw);
            }
        }

        insert_hidden_bibliography(section, doc, &rewritten);
        info!(
            document = %identifier,
            rewritten = rewritten.len(),
            "Cross-references resolved"
        );
    }

    fn classify_items(
        &self,
        doc: &XmlDocument,
        lang: &str,
        classes: &mut HashMap<String, ReferenceClass>,
    ) {
        let Some(root) = doc.root() else { return };
        for item in doc.descendants_named(root, "bibitem") {
            if let Some(id) = doc.attr(item, "id") {
                if !classes.contains_key(id) {
                    classes.insert(id.to_string(), self.classify(doc, item, lang));
                }
            }
        }
    }

    fn unresolved(&mut self, document: &str, reference: &str) {
        warn!(document = %document, reference = %reference, "Unresolved cross-reference");
        self.warnings.push(BuildWarning::UnresolvedCrossReference {
            document: document.to_string(),
            reference: reference.to_string(),
        });
    }
}

fn collect_anchors(doc: &XmlDocument, anchors: &mut HashSet<String>) {
    let Some(root) = doc.root() else { return };
    for n in std::iter::once(root).chain(doc.descendants(root)) {
        if let Some(id) = doc.attr(n, "id") {
            anchors.insert(id.to_string());
        }
    }
}

/// Turns an `xref` into an `eref` pointing at `target`.
fn into_eref(doc: &mut XmlDocument, el: NodeId, target: &str) {
    let name = doc.qualified("eref");
    doc.rename(el, &name);
    doc.remove_attr(el, "target");
    doc.set_attr(el, "bibitemid", target);
}

fn rewrite(
    doc: &mut XmlDocument,
    el: NodeId,
    target: &str,
    class: &ReferenceClass,
    token: Option<&ScopeToken>,
    rewritten: &mut Vec<Rewritten>,
) {
    match class {
        ReferenceClass::External { uri } => {
            let name = doc.qualified("link");
            doc.rename(el, &name);
            doc.remove_attr(el, "bibitemid");
            doc.remove_attr(el, "type");
            doc.set_attr(el, "target", uri);
        }
        ReferenceClass::Indirect { repository, id } => {
            let anchor = target
                .strip_prefix(&format!("{repository}_"))
                .unwrap_or(target);
            doc.set_attr(el, "type", repository);
            add_anchor_locality(doc, el, anchor);
            rewritten.push(Rewritten {
                id: target.to_string(),
                repository: format!("{repository}/{id}"),
                internal: false,
            });
        }
        ReferenceClass::Internal => {
            if let Some(token) = token {
                let id = format!("{token}_{target}");
                doc.set_attr(el, "bibitemid", &id);
                doc.set_attr(el, "type", token.as_str());
                rewritten.push(Rewritten {
                    id,
                    repository: format!("{token}/{target}"),
                    internal: true,
                });
            }
            add_anchor_locality(doc, el, target);
        }
        ReferenceClass::Citation => {}
    }
}

/// Appends an anchor locality naming `anchor`, unless `el` already has a locality.
fn add_anchor_locality(doc: &mut XmlDocument, el: NodeId, anchor: &str) {
    let has_locality = doc
        .child_elements(el)
        .any(|c| matches!(doc.local_name(c), "locality" | "localityStack"));
    if has_locality {
        return;
    }
    let stack = doc.element("localityStack", &[], None);
    let locality = doc.element("locality", &[("type", "anchor")], None);
    let from = doc.element("referenceFrom", &[], Some(anchor));
    doc.append(locality, from);
    doc.append(stack, locality);
    doc.append(el, stack);
}

fn hidden_references(section: &mut XmlDocument) -> Option<NodeId> {
    let root = section.root()?;
    let bibliography = match section.descendants_named(root, "bibliography").first() {
        Some(&b) => b,
        None => {
            let b = section.element("bibliography", &[], None);
            section.append(root, b);
            b
        }
    };
    let existing = section
        .children_named(bibliography, "references")
        .find(|&r| section.attr(r, "hidden") == Some("true"));
    Some(match existing {
        Some(r) => r,
        None => {
            let r = section.element(
                "references",
                &[("hidden", "true"), ("normative", "false")],
                None,
            );
            section.append(bibliography, r);
            r
        }
    })
}

/// Adds bibliography entries backing the references of `section` that point outside it.
fn insert_hidden_bibliography(section: &mut XmlDocument, doc: &XmlDocument, rewritten: &[Rewritten]) {
    let Some(section_root) = section.root() else { return };
    let descendants = section.descendants(section_root);
    let mut present: HashSet<String> = descendants
        .iter()
        .filter(|&&n| section.is(n, "bibitem"))
        .filter_map(|&n| section.attr(n, "id").map(str::to_string))
        .collect();
    let referenced: HashSet<String> = descendants
        .iter()
        .filter_map(|&n| section.attr(n, "bibitemid").map(str::to_string))
        .collect();

    let copies: Vec<NodeId> = match doc.root() {
        Some(root) => doc
            .descendants_named(root, "bibitem")
            .into_iter()
            .filter(|&b| repository_identifier_of(doc, b).is_some())
            .filter(|&b| {
                doc.attr(b, "id")
                    .is_some_and(|id| referenced.contains(id) && !present.contains(id))
            })
            .collect(),
        None => Vec::new(),
    };
    let synthesized: Vec<&Rewritten> = rewritten
        .iter()
        .filter(|r| {
            !present.contains(&r.id)
                && !copies.iter().any(|&b| doc.attr(b, "id") == Some(r.id.as_str()))
        })
        .collect();
    if copies.is_empty() && synthesized.is_empty() {
        return;
    }

    let Some(refs) = hidden_references(section) else { return };
    for b in copies {
        let Some(id) = doc.attr(b, "id") else { continue };
        if present.insert(id.to_string()) {
            let copy = section.import(doc, b);
            section.append(refs, copy);
        }
    }
    for r in synthesized {
        if !present.insert(r.id.clone()) {
            continue;
        }
        let mut attrs = vec![("id", r.id.as_str())];
        if r.internal {
            attrs.push(("type", "internal"));
        }
        let item = section.element("bibitem", &attrs, None);
        let docid = section.element("docidentifier", &[("type", "repository")], Some(&r.repository));
        section.append(item, docid);
        section.append(refs, item);
    }
}

/// Wraps each `svg` of `doc` in an `svgmap` and records its internal hyperlinks as
/// `target` mappings, with `suffix` appended to the mapped anchors.
///
/// Running it twice adds nothing: rewritten hyperlinks no longer start with `#`.
pub fn svg_preprocess(doc: &mut XmlDocument, suffix: Option<&str>) {
    let Some(root) = doc.root() else { return };
    let svgs = doc.descendants_named(root, "svg");
    for svg in svgs {
        let map = {
            let ancestors: Vec<NodeId> = doc.ancestors(svg).collect();
            if let Some(&m) = ancestors.iter().find(|&&a| doc.is(a, "svgmap")) {
                m
            } else {
                let name = doc.qualified("svgmap");
                match ancestors.iter().find(|&&a| doc.is(a, "figure")) {
                    Some(&figure) => doc.wrap(figure, &name),
                    None => doc.wrap(svg, &name),
                }
            }
        };

        for a in doc.descendants_named(svg, "a") {
            let Some((key, href)) = doc
                .attr_local(a, "href")
                .map(|(k, v)| (k.to_string(), v.to_string()))
            else {
                continue;
            };
            let Some(anchor) = href.strip_prefix('#') else {
                continue;
            };
            doc.set_attr(a, &key, anchor);
            let mapped = match suffix {
                Some(s) => format!("{anchor}_{s}"),
                None => anchor.to_string(),
            };
            let target = doc.element("target", &[("href", anchor)], None);
            let xref = doc.element("xref", &[("target", mapped.as_str())], None);
            doc.append(target, xref);
            doc.append(map, target);
        }
    }
}
