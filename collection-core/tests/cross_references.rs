use std::fs;

use collection_core::contract::Hooks;
use collection_core::error::BuildWarning;
use collection_core::xml::{NodeId, XmlDocument};
use collection_core::xref::{CrossReferenceResolver, ReferenceClass, ScopeToken, TokenSource};
use collection_core::CollectionAssembler;
use tempfile::tempdir;

fn only(doc: &XmlDocument, local: &str) -> NodeId {
    let root = doc.root().expect("root");
    let found = doc.descendants_named(root, local);
    assert_eq!(found.len(), 1, "expected one <{local}> in {}", doc.to_xml_string());
    found[0]
}

fn hidden_bibitems(doc: &XmlDocument) -> Vec<NodeId> {
    let root = doc.root().expect("root");
    doc.descendants_named(root, "references")
        .into_iter()
        .filter(|&r| doc.attr(r, "hidden") == Some("true"))
        .flat_map(|r| doc.children_named(r, "bibitem").collect::<Vec<_>>())
        .collect()
}

fn anchor_of(doc: &XmlDocument, el: NodeId) -> Option<String> {
    let stack = doc.first_child_named(el, "localityStack")?;
    let locality = doc.first_child_named(stack, "locality")?;
    assert_eq!(doc.attr(locality, "type"), Some("anchor"));
    doc.child_text(locality, "referenceFrom")
}

#[test]
fn external_item_turns_reference_into_link() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><p><eref bibitemid="ext1"/></p></clause></sections>
<bibliography><references><bibitem id="ext1"><uri type="citation" language="fr">https://example.org/fr</uri><uri type="citation" language="en">https://example.org/en</uri></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let mut section = doc.clone();
    let mut resolver = CrossReferenceResolver::new();
    resolver.resolve(&mut section, &doc, None, "ISO 1", "en");

    let link = only(&section, "link");
    assert_eq!(section.attr(link, "target"), Some("https://example.org/en"));
    assert_eq!(section.attr(link, "bibitemid"), None);
    assert!(hidden_bibitems(&section).is_empty());
    assert!(resolver.warnings().is_empty());
}

/// This test ensures a collection member that also carries a citation URI is linked to,
/// with no bibliography id left behind.
#[test]
fn collection_member_with_citation_uri_becomes_link() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><eref bibitemid="b2"/></clause></sections>
<bibliography><references><bibitem id="b2"><docidentifier type="repository">current-metanorma-collection/ISO 2</docidentifier><uri type="citation" language="en">ISO2.html</uri></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let mut section = doc.clone();
    let mut resolver = CrossReferenceResolver::new().with_token_source(TokenSource::Sequential(0));
    let token = resolver.issue_token();
    resolver.resolve(&mut section, &doc, Some(&token), "ISO 1", "en");

    let link = only(&section, "link");
    assert_eq!(section.attr(link, "target"), Some("ISO2.html"));
    assert_eq!(section.attr(link, "bibitemid"), None);
    assert!(section.first_child_named(link, "localityStack").is_none());
    assert!(hidden_bibitems(&section).is_empty());
}

/// This test ensures an eref to a collection-internal item, published under a scope token,
/// is prefixed with the token and backed by a synthesized internal item.
#[test]
fn scoped_eref_to_internal_item_is_token_prefixed() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><eref bibitemid="b2"/></clause></sections>
<bibliography><references><bibitem id="b2"><docidentifier type="repository">current-metanorma-collection/ISO 2</docidentifier></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let clause = doc.element_by_id("c1").expect("clause");
    let mut section = doc.extract(clause);
    let mut resolver = CrossReferenceResolver::new().with_token_source(TokenSource::Sequential(0));
    let token = resolver.issue_token();
    resolver.resolve(&mut section, &doc, Some(&token), "ISO 1", "en");

    let eref = only(&section, "eref");
    assert_eq!(section.attr(eref, "bibitemid"), Some("AAAAAAAA_b2"));
    assert_eq!(section.attr(eref, "type"), Some("AAAAAAAA"));
    assert_eq!(anchor_of(&section, eref).as_deref(), Some("b2"));

    let items = hidden_bibitems(&section);
    assert_eq!(items.len(), 1);
    assert_eq!(section.attr(items[0], "id"), Some("AAAAAAAA_b2"));
    assert_eq!(section.attr(items[0], "type"), Some("internal"));
    assert_eq!(
        section.child_text(items[0], "docidentifier").as_deref(),
        Some("AAAAAAAA/b2")
    );
}

/// This test ensures an unscoped section referencing an internal item it does not hold
/// gets a copy of that item in its hidden bibliography.
#[test]
fn internal_item_outside_section_is_copied() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><eref bibitemid="b2"/></clause></sections>
<bibliography><references><bibitem id="b2"><docidentifier type="repository">current-metanorma-collection/ISO 2</docidentifier><title>Two</title></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let clause = doc.element_by_id("c1").expect("clause");
    let mut section = doc.extract(clause);
    let mut resolver = CrossReferenceResolver::new();
    resolver.resolve(&mut section, &doc, None, "ISO 1", "en");

    let eref = only(&section, "eref");
    assert_eq!(section.attr(eref, "bibitemid"), Some("b2"));
    assert_eq!(section.attr(eref, "type"), None);
    assert_eq!(anchor_of(&section, eref).as_deref(), Some("b2"));

    let items = hidden_bibitems(&section);
    assert_eq!(items.len(), 1);
    assert_eq!(section.attr(items[0], "id"), Some("b2"));
    assert_eq!(section.attr(items[0], "type"), None);
    assert_eq!(section.child_text(items[0], "title").as_deref(), Some("Two"));
}

/// This test ensures an existing hidden references block is reused.
#[test]
fn existing_hidden_references_block_is_reused() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><eref bibitemid="repoA_doc1"/></clause></sections>
<bibliography><references hidden="true"><bibitem id="kept"><docidentifier>X</docidentifier></bibitem></references>
<references><bibitem id="repoA_doc1"><docidentifier type="repository">repoA/doc1</docidentifier></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let mut section = doc.clone();
    let mut resolver = CrossReferenceResolver::new();
    resolver.resolve(&mut section, &doc, None, "ISO 1", "en");

    let root = section.root().expect("root");
    let hidden: Vec<NodeId> = section
        .descendants_named(root, "references")
        .into_iter()
        .filter(|&r| section.attr(r, "hidden") == Some("true"))
        .collect();
    assert_eq!(hidden.len(), 1);
    // The item is already in the section, so nothing is added.
    let ids: Vec<&str> = section
        .children_named(hidden[0], "bibitem")
        .filter_map(|b| section.attr(b, "id"))
        .collect();
    assert_eq!(ids, vec!["kept"]);

    // An extracted clause plus a pre-existing hidden block gains the copy in that block.
    let clause = doc.element_by_id("c1").expect("clause");
    let mut part = XmlDocument::parse(
        r#"<iso-standard><bibliography><references hidden="true"/></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let part_root = part.root().expect("root");
    let imported = part.import(&doc, clause);
    part.append(part_root, imported);
    resolver.resolve(&mut part, &doc, None, "ISO 1", "en");

    let part_root = part.root().expect("root");
    let hidden: Vec<NodeId> = part
        .descendants_named(part_root, "references")
        .into_iter()
        .filter(|&r| part.attr(r, "hidden") == Some("true"))
        .collect();
    assert_eq!(hidden.len(), 1);
    let ids: Vec<&str> = part
        .children_named(hidden[0], "bibitem")
        .filter_map(|b| part.attr(b, "id"))
        .collect();
    assert_eq!(ids, vec!["repoA_doc1"]);
}

/// This test ensures a reference into another repository keeps its target, gains the
/// repository as its type, and is backed by a copy of the item in the hidden bibliography.
#[test]
fn indirect_item_is_typed_and_copied_into_hidden_bibliography() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><p><eref bibitemid="repoA_doc1"/></p></clause></sections>
<bibliography><references><bibitem id="repoA_doc1"><docidentifier type="repository">repoA/doc1</docidentifier></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let clause = doc.element_by_id("c1").expect("clause");
    let mut section = doc.extract(clause);

    let mut resolver = CrossReferenceResolver::new();
    resolver.resolve(&mut section, &doc, None, "ISO 1", "en");

    let eref = only(&section, "eref");
    assert_eq!(section.attr(eref, "bibitemid"), Some("repoA_doc1"));
    assert_eq!(section.attr(eref, "type"), Some("repoA"));
    assert_eq!(anchor_of(&section, eref).as_deref(), Some("doc1"));

    let items = hidden_bibitems(&section);
    assert_eq!(items.len(), 1);
    assert_eq!(section.attr(items[0], "id"), Some("repoA_doc1"));
    let references = section.parent(items[0]).expect("references");
    assert_eq!(section.attr(references, "normative"), Some("false"));
    assert_eq!(
        section.child_text(items[0], "docidentifier").as_deref(),
        Some("repoA/doc1")
    );
}

/// This test ensures a cross-reference published under a scope token becomes a
/// token-prefixed eref backed by a synthesized internal bibliography item.
#[test]
fn scoped_xref_becomes_token_prefixed_eref() {
    let doc = XmlDocument::parse(
        r#"<iso-standard document_suffix="abc"><bibdata><language>en</language></bibdata><sections><clause id="clause1_abc"><p id="p1_abc"/></clause><clause id="c2"><p><xref target="clause1_abc"/></p></clause></sections></iso-standard>"#,
    )
    .expect("parses");
    let mut section = doc.clone();
    let mut resolver = CrossReferenceResolver::new().with_token_source(TokenSource::Sequential(0));
    let token = resolver.preprocess(&mut section);
    assert_eq!(token.as_str(), "AAAAAAAA");
    let root = section.root().expect("root");
    assert_eq!(section.attr(root, "type"), Some("AAAAAAAA"));

    resolver.resolve(&mut section, &doc, Some(&token), "ISO 1", "en");

    let eref = only(&section, "eref");
    assert_eq!(section.attr(eref, "bibitemid"), Some("AAAAAAAA_clause1"));
    assert_eq!(section.attr(eref, "type"), Some("AAAAAAAA"));
    assert_eq!(section.attr(eref, "target"), None);
    assert_eq!(anchor_of(&section, eref).as_deref(), Some("clause1"));

    let items = hidden_bibitems(&section);
    assert_eq!(items.len(), 1);
    assert_eq!(section.attr(items[0], "id"), Some("AAAAAAAA_clause1"));
    assert_eq!(section.attr(items[0], "type"), Some("internal"));
    assert_eq!(
        section.child_text(items[0], "docidentifier").as_deref(),
        Some("AAAAAAAA/clause1")
    );
}

#[test]
fn unscoped_xref_to_known_anchor_is_left_alone() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"/><clause id="c2"><xref target="c1"/></clause></sections></iso-standard>"#,
    )
    .expect("parses");
    let mut section = doc.clone();
    let mut resolver = CrossReferenceResolver::new();
    resolver.resolve(&mut section, &doc, None, "ISO 1", "en");

    let xref = only(&section, "xref");
    assert_eq!(section.attr(xref, "target"), Some("c1"));
    assert!(resolver.warnings().is_empty());
}

/// This test ensures unknown targets are left untouched and reported, not fatal.
#[test]
fn unresolved_references_are_reported_and_untouched() {
    let doc = XmlDocument::parse(
        r#"<iso-standard><sections><clause id="c1"><eref bibitemid="missing"/><xref target="nowhere"/></clause></sections></iso-standard>"#,
    )
    .expect("parses");
    let mut section = doc.clone();
    let mut resolver = CrossReferenceResolver::new();
    let token = ScopeToken::parse("QWERTYUI").expect("valid token");
    resolver.resolve(&mut section, &doc, Some(&token), "ISO 1", "en");

    let eref = only(&section, "eref");
    assert_eq!(section.attr(eref, "bibitemid"), Some("missing"));
    assert!(section.first_child_named(eref, "localityStack").is_none());
    let xref = only(&section, "xref");
    assert_eq!(section.attr(xref, "target"), Some("nowhere"));

    assert_eq!(
        resolver.warnings(),
        &[
            BuildWarning::UnresolvedCrossReference {
                document: "ISO 1".to_string(),
                reference: "missing".to_string(),
            },
            BuildWarning::UnresolvedCrossReference {
                document: "ISO 1".to_string(),
                reference: "nowhere".to_string(),
            },
        ]
    );
}

/// This test ensures repository items naming a collection member are treated as internal.
#[test]
fn registry_members_are_internal() {
    let dir = tempdir().expect("tempdir");
    fs::write(
        dir.path().join("collection.yml"),
        "manifest:\n  docref:\n    - fileref: a.xml\n      identifier: ISO 2\n",
    )
    .expect("write manifest");
    fs::write(
        dir.path().join("a.xml"),
        "<iso-standard><bibdata/></iso-standard>",
    )
    .expect("write document");
    let assembler = CollectionAssembler::open(dir.path().join("collection.yml"), Hooks::default())
        .expect("collection assembles");

    let doc = XmlDocument::parse(
        r#"<iso-standard><bibliography><references><bibitem id="b2"><docidentifier type="repository">elsewhere/ISO 2</docidentifier></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("parses");
    let item = doc.element_by_id("b2").expect("bibitem");

    let bound = assembler.cross_reference_resolver();
    assert_eq!(bound.classify(&doc, item, "en"), ReferenceClass::Internal);
    let unbound = CrossReferenceResolver::new();
    assert_eq!(
        unbound.classify(&doc, item, "en"),
        ReferenceClass::Indirect {
            repository: "elsewhere".to_string(),
            id: "ISO 2".to_string()
        }
    );
}

#[test]
fn preprocess_maps_svg_links_with_document_suffix() {
    let mut doc = XmlDocument::parse(
        r##"<iso-standard document_suffix="xyz"><sections><figure id="f1"><svg><a href="#A1"><rect/></a></svg></figure></sections></iso-standard>"##,
    )
    .expect("parses");
    let mut resolver = CrossReferenceResolver::new();
    let token = resolver.preprocess(&mut doc);
    assert!(ScopeToken::parse(token.as_str()).is_some());

    let svgmap = only(&doc, "svgmap");
    let figure = doc.first_child_named(svgmap, "figure").expect("figure wrapped");
    assert_eq!(doc.attr(figure, "id"), Some("f1"));
    let target = doc.first_child_named(svgmap, "target").expect("target");
    assert_eq!(doc.attr(target, "href"), Some("A1"));
    let xref = doc.first_child_named(target, "xref").expect("xref");
    assert_eq!(doc.attr(xref, "target"), Some("A1_xyz"));
}
