///
/// This module implements the CLI interface for collection-assembler: command parsing,
/// argument validation and the user-visible invocations.
///
/// All core logic (manifest resolution, the document registry, cross-reference rewriting)
/// lives in the [`collection-core`] crate. This module is strictly CLI glue.
///
/// ## Features
/// - Entry struct [`Cli`] defines the user-facing options and subcommands.
/// - `assemble` resolves a manifest and prints or renders the collection.
/// - `xref` rewrites the cross-references of a single document against a collection.
///
/// ## How To Use
/// - For command-line users: use the installed `collection-assembler` binary with `--help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`collection-core`]: ../../collection-core/
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collection_core::bibdata::Bibdata;
use collection_core::contract::{CommandCompiler, Hooks};
use collection_core::xml::XmlDocument;
use collection_core::CollectionAssembler;

/// CLI for collection-assembler: assemble document collections from a manifest.
#[derive(Parser)]
#[clap(
    name = "collection-assembler",
    version,
    about = "Assemble multi-document standards collections and resolve their cross-references"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a collection manifest and write the assembled collection
    Assemble {
        /// Path to the YAML or XML collection manifest
        #[clap(long)]
        manifest: PathBuf,
        /// Directory to render into; defaults to the manifest's output_folder.
        /// Without either, the collection XML is printed to stdout.
        #[clap(long)]
        output: Option<PathBuf>,
        /// Fail when two documents resolve to the same identifier
        #[clap(long)]
        strict: bool,
        /// Program used to compile markup sources to XML
        #[clap(long)]
        compiler: Option<String>,
    },
    /// Rewrite the cross-references of one document against a collection
    Xref {
        /// Path to the YAML or XML collection manifest
        #[clap(long)]
        manifest: PathBuf,
        /// The document XML to rewrite
        #[clap(long)]
        document: PathBuf,
        /// Where to write the rewritten document; stdout when omitted
        #[clap(long)]
        output: Option<PathBuf>,
        /// Scope the document's anchors with a fresh token
        #[clap(long)]
        scoped: bool,
    },
}

/// CLI logic entrypoint for integration tests and main()
pub fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Assemble {
            manifest,
            output,
            strict,
            compiler,
        } => {
            tracing::info!(command = "assemble", manifest = ?manifest, "Starting assembly");
            let hooks = match compiler {
                Some(program) => Hooks::default().with_compiler(CommandCompiler::with_program(program)),
                None => Hooks::default(),
            };
            let assembler = CollectionAssembler::open(&manifest, hooks)
                .with_context(|| format!("Failed to assemble {}", manifest.display()))?;
            for warning in assembler.warnings() {
                eprintln!("warning: {warning}");
            }
            if strict {
                assembler.validate_identifiers()?;
            }

            let output = output.or_else(|| {
                assembler
                    .output_folder()
                    .map(|folder| assembler.dir().join(folder))
            });
            match output {
                Some(dir) => {
                    let report = assembler.render(&dir)?;
                    tracing::info!(command = "assemble", ?report, "Assembly complete");
                    println!(
                        "Assembled collection: {} documents written to {}",
                        report.documents.len(),
                        dir.display()
                    );
                }
                None => print!("{}", assembler.to_xml()?),
            }
            Ok(())
        }
        Commands::Xref {
            manifest,
            document,
            output,
            scoped,
        } => {
            tracing::info!(command = "xref", document = ?document, "Resolving cross-references");
            let assembler = CollectionAssembler::open(&manifest, Hooks::default())
                .with_context(|| format!("Failed to assemble {}", manifest.display()))?;
            let content = fs::read_to_string(&document)
                .with_context(|| format!("Failed to read {}", document.display()))?;
            let doc = XmlDocument::parse(&content)
                .with_context(|| format!("Failed to parse {}", document.display()))?;

            let identifier = Bibdata::from_document(&doc)
                .and_then(|b| b.primary_docidentifier())
                .map(|d| d.text)
                .unwrap_or_else(|| document.display().to_string());
            let lang = assembler
                .bibdata()
                .and_then(|b| b.languages().into_iter().next())
                .unwrap_or_else(|| "en".to_string());

            let mut section = doc.clone();
            let mut resolver = assembler.cross_reference_resolver();
            let token = scoped.then(|| resolver.preprocess(&mut section));
            resolver.resolve(&mut section, &doc, token.as_ref(), &identifier, &lang);
            for warning in resolver.warnings() {
                eprintln!("warning: {warning}");
            }

            let xml = section.to_xml_string();
            match output {
                Some(path) => fs::write(&path, xml)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => print!("{xml}"),
            }
            Ok(())
        }
    }
}
