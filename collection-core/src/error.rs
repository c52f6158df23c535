//! Error taxonomy for collection assembly.
//!
//! Fatal problems are [`CollectionError`] values and abort manifest resolution as a whole:
//! no partial collection is ever produced. Recoverable problems are [`BuildWarning`] values;
//! they are logged when they happen and accumulated so callers can surface them in a build log.

use std::path::PathBuf;

use crate::xml::XmlError;

/// Fatal errors raised while loading, resolving or serializing a collection.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// A file referenced by the manifest does not exist on disk.
    #[error("file not found: {} (manifest entry {entry:?})", .path.display())]
    FileNotFound { path: PathBuf, entry: String },

    /// A markup source that must be compiled to XML does not exist.
    #[error("source to compile not found: {} (manifest entry {entry:?})", .path.display())]
    AdocSourceNotFound { path: PathBuf, entry: String },

    /// The document compiler collaborator failed.
    #[error("failed to compile {}: {message}", .path.display())]
    Compile { path: PathBuf, message: String },

    /// The decoded manifest does not have the expected shape.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("failed to parse XML {}: {source}", .path.display())]
    Xml {
        path: PathBuf,
        #[source]
        source: XmlError,
    },

    #[error("failed to parse manifest YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Raised only by strict validation; the registry itself shadows duplicates.
    #[error("duplicate document identifiers: {}", .0.join(", "))]
    DuplicateIdentifier(Vec<String>),
}

impl CollectionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CollectionError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn xml(path: impl Into<PathBuf>, source: XmlError) -> Self {
        CollectionError::Xml {
            path: path.into(),
            source,
        }
    }
}

/// Recoverable problems, kept for the build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// The identifier formatter for a document flavor failed; the file stem was used instead.
    FlavorLoadFailure { flavor: String, message: String },
    /// Two leaves resolved to the same identifier; the first one is kept.
    DuplicateIdentifier { identifier: String },
    /// A reference whose target could not be found; it was left unrewritten.
    UnresolvedCrossReference { document: String, reference: String },
}

impl std::fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildWarning::FlavorLoadFailure { flavor, message } => {
                write!(f, "identifier formatter for flavor {flavor:?} failed: {message}")
            }
            BuildWarning::DuplicateIdentifier { identifier } => {
                write!(f, "duplicate document identifier {identifier:?}; keeping the first")
            }
            BuildWarning::UnresolvedCrossReference {
                document,
                reference,
            } => write!(f, "unresolved cross-reference {reference:?} in {document:?}"),
        }
    }
}
