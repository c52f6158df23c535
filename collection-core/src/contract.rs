//! # contract: collaborator interfaces for collection assembly
//!
//! Manifest resolution talks to the outside world only through the traits in this module:
//! resolving file references, post-processing identifiers, compiling markup sources to XML,
//! transforming the raw YAML model before it is decoded, and formatting document
//! identifiers for a document flavor.
//!
//! ## Injection
//! - Every collaborator is held by a [`Hooks`] bundle handed to the
//!   [`crate::collection::CollectionAssembler`] (and from there to the resolver and
//!   registry). Nothing is process-global.
//! - [`Hooks::default`] wires the default behaviour described on each trait.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so tests can script collaborator behaviour,
//!   e.g. assert that a compiler is never invoked when an up-to-date XML output exists.
//!
//! ## Blocking
//! - All calls are synchronous. A failing compiler aborts resolution; callers wanting
//!   timeouts wrap their implementation.

use std::path::{Path, PathBuf};
use std::process::Command;

use mockall::automock;
use tracing::{error, info};

use crate::flavor::FlavorRegistry;

/// Failure reported by a [`DocumentCompiler`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CompileError(pub String);

/// Failure reported by an [`IdentifierFormatter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct FlavorError(pub String);

/// Input to identifier formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    /// `type` attribute of the chosen `docidentifier`.
    pub id_type: Option<String>,
    /// Raw identifier text.
    pub identifier: String,
    /// Collection language and script, from the collection bibdata.
    pub lang: String,
    pub script: String,
}

/// Maps a manifest file reference to a path on disk.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait FilerefResolver: Send + Sync {
    /// Resolve `fileref` as written in a manifest located in `dir`.
    fn resolve(&self, dir: &Path, fileref: &str) -> PathBuf;
}

/// Post-processes every resolved identifier.
///
/// Placeholder identifiers are never passed in. Resolving an already resolved manifest calls
/// the hook again with its own output, so implementations must be idempotent.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait IdentifierResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> String;
}

/// Compiles a markup source to XML.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait DocumentCompiler: Send + Sync {
    /// Compile `source`, producing `output`.
    fn compile(&self, source: &Path, output: &Path) -> Result<(), CompileError>;
}

/// Rewrites the raw YAML model of a manifest before it is decoded into typed structs.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ManifestTransform: Send + Sync {
    fn transform(&self, model: serde_yaml::Value) -> serde_yaml::Value;
}

/// Flavor-specific normalization of a document identifier.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait IdentifierFormatter: Send + Sync {
    fn format(&self, request: &FormatRequest) -> Result<String, FlavorError>;
}

/// Absolute references pass through; relative ones are joined onto the manifest directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFilerefResolver;

impl FilerefResolver for DefaultFilerefResolver {
    fn resolve(&self, dir: &Path, fileref: &str) -> PathBuf {
        let path = Path::new(fileref);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            dir.join(path)
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityIdentifierResolver;

impl IdentifierResolver for IdentityIdentifierResolver {
    fn resolve(&self, identifier: &str) -> String {
        identifier.to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl ManifestTransform for IdentityTransform {
    fn transform(&self, model: serde_yaml::Value) -> serde_yaml::Value {
        model
    }
}

/// Runs an external command as `<program> <args...> <source>` and expects it to leave
/// the XML output next to the source.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The default compile arguments, run through `program`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }
}

impl Default for CommandCompiler {
    fn default() -> Self {
        Self::new(
            "metanorma",
            vec!["compile".to_string(), "-x".to_string(), "xml".to_string()],
        )
    }
}

impl DocumentCompiler for CommandCompiler {
    fn compile(&self, source: &Path, output: &Path) -> Result<(), CompileError> {
        info!(program = %self.program, source = %source.display(), "Compiling document");
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                error!(source = %source.display(), "Compiler exited with non-zero code: {}", s);
                return Err(CompileError(format!("{} exited with {}", self.program, s)));
            }
            Err(e) => {
                error!(error = ?e, program = %self.program, "Failed to launch compiler");
                return Err(CompileError(format!("failed to launch {}: {e}", self.program)));
            }
        }
        if !output.exists() {
            error!(output = %output.display(), "Compiler did not produce the expected output");
            return Err(CompileError(format!("{} was not produced", output.display())));
        }
        info!(output = %output.display(), "Compiled document");
        Ok(())
    }
}

/// The collaborators used by one assembler.
pub struct Hooks {
    pub fileref: Box<dyn FilerefResolver>,
    pub identifier: Box<dyn IdentifierResolver>,
    pub compiler: Box<dyn DocumentCompiler>,
    pub transform: Box<dyn ManifestTransform>,
    pub flavors: FlavorRegistry,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            fileref: Box::new(DefaultFilerefResolver),
            identifier: Box::new(IdentityIdentifierResolver),
            compiler: Box::new(CommandCompiler::default()),
            transform: Box::new(IdentityTransform),
            flavors: FlavorRegistry::builtin(),
        }
    }
}

impl Hooks {
    pub fn with_fileref_resolver(mut self, resolver: impl FilerefResolver + 'static) -> Self {
        self.fileref = Box::new(resolver);
        self
    }

    pub fn with_identifier_resolver(mut self, resolver: impl IdentifierResolver + 'static) -> Self {
        self.identifier = Box::new(resolver);
        self
    }

    pub fn with_compiler(mut self, compiler: impl DocumentCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn with_transform(mut self, transform: impl ManifestTransform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn with_flavors(mut self, flavors: FlavorRegistry) -> Self {
        self.flavors = flavors;
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("flavors", &self.flavors)
            .finish_non_exhaustive()
    }
}
