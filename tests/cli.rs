use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{self, write};
use std::path::Path;
use tempfile::{tempdir, TempDir};

/// Creates a collection with two documents, one of them cross-referencing an external standard.
fn create_collection() -> TempDir {
    let dir = tempdir().expect("Creating temp dir failed");
    write(
        dir.path().join("collection.yml"),
        "directives:\n  - documents-inline\nbibdata:\n  title: Test Collection\n  language: en\nmanifest:\n  level: collection\n  docref:\n    - fileref: a.xml\n      identifier: ISO 1\n    - fileref: b.xml\n      identifier: ISO 2\n",
    )
    .expect("Writing manifest failed");
    write(
        dir.path().join("a.xml"),
        r#"<iso-standard><bibdata><title>A</title></bibdata><sections><clause id="c1"><eref bibitemid="ref2"/><eref bibitemid="ref3"/></clause></sections><bibliography><references><bibitem id="ref2"><docidentifier type="repository">elsewhere/ISO 2</docidentifier></bibitem><bibitem id="ref3"><docidentifier type="repository">repoA/doc9</docidentifier></bibitem></references></bibliography></iso-standard>"#,
    )
    .expect("Writing document failed");
    write(
        dir.path().join("b.xml"),
        "<iso-standard><bibdata><title>B</title></bibdata></iso-standard>",
    )
    .expect("Writing document failed");
    dir
}

#[test]
fn assemble_prints_collection_xml() {
    let dir = create_collection();
    let mut cmd = Command::cargo_bin("collection-assembler").expect("Binary exists");
    cmd.arg("assemble")
        .arg("--manifest")
        .arg(dir.path().join("collection.yml"));
    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("<metanorma-collection")
                .and(predicate::str::contains(r#"<doc-container id="doc000000001">"#)),
        );
}

#[test]
fn assemble_renders_into_output_directory() {
    let dir = create_collection();
    let out = tempdir().expect("Creating output dir failed");
    let mut cmd = Command::cargo_bin("collection-assembler").expect("Binary exists");
    cmd.arg("assemble")
        .arg("--manifest")
        .arg(dir.path().join("collection.yml"))
        .arg("--output")
        .arg(out.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("2 documents written"));
    assert!(out.path().join("collection.xml").is_file());
    assert!(out.path().join("a.xml").is_file());
    assert!(out.path().join("b.xml").is_file());
}

#[test]
fn strict_assembly_fails_on_duplicate_identifiers() {
    let dir = create_collection();
    let manifest = fs::read_to_string(dir.path().join("collection.yml")).expect("read manifest");
    write(
        dir.path().join("collection.yml"),
        manifest.replace("identifier: ISO 2", "identifier: ISO 1"),
    )
    .expect("rewrite manifest");

    let mut cmd = Command::cargo_bin("collection-assembler").expect("Binary exists");
    cmd.arg("assemble")
        .arg("--manifest")
        .arg(dir.path().join("collection.yml"))
        .arg("--strict");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("duplicate document identifiers"));
}

#[test]
fn assemble_fails_for_missing_document() {
    let dir = create_collection();
    fs::remove_file(dir.path().join("b.xml")).expect("remove document");
    let mut cmd = Command::cargo_bin("collection-assembler").expect("Binary exists");
    cmd.arg("assemble")
        .arg("--manifest")
        .arg(dir.path().join("collection.yml"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("file not found"));
}

/// This test ensures the xref command treats collection members as internal and other
/// repositories as indirect.
#[test]
fn xref_rewrites_document_against_collection() {
    let dir = create_collection();
    let out = dir.path().join("a.resolved.xml");
    let mut cmd = Command::cargo_bin("collection-assembler").expect("Binary exists");
    cmd.arg("xref")
        .arg("--manifest")
        .arg(dir.path().join("collection.yml"))
        .arg("--document")
        .arg(dir.path().join("a.xml"))
        .arg("--output")
        .arg(&out);
    cmd.assert().success();

    let resolved = fs::read_to_string(Path::new(&out)).expect("read output");
    assert!(
        resolved.contains(r#"<referenceFrom>ref2</referenceFrom>"#),
        "{resolved}"
    );
    assert!(resolved.contains(r#"<eref bibitemid="ref3" type="repoA">"#), "{resolved}");
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let msg = format!("{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[test]
fn emits_trace_initialised_and_assembly_events() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = create_collection();
    let out = tempdir().expect("Creating output dir failed");
    let cli = collection_assembler::Cli {
        command: collection_assembler::Commands::Assemble {
            manifest: dir.path().join("collection.yml"),
            output: Some(out.path().to_path_buf()),
            strict: false,
            compiler: None,
        },
    };
    collection_assembler::run(cli).expect("run succeeds");

    let events = events.lock().unwrap();
    assert!(
        events.iter().any(|e| e.contains("trace_initialised")),
        "No trace_initialised event found. Events: {:?}",
        *events
    );
    assert!(
        events.iter().any(|e| e.contains("Collection assembled")),
        "No assembly event found. Events: {:?}",
        *events
    );
}
