//! # collection: the assembled collection
//!
//! [`CollectionAssembler`] owns a resolved manifest and the registry of its documents. It is
//! built once, from a manifest file ([`CollectionAssembler::open`]) or an in-memory
//! [`CollectionConfig`] ([`CollectionAssembler::new`]), and is read-only afterwards:
//! serializing, rendering and cross-reference resolution all borrow it immutably.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::bibdata::Bibdata;
use crate::contract::Hooks;
use crate::disambig::FilenameDisambiguator;
use crate::error::{BuildWarning, CollectionError};
use crate::load_manifest::load_manifest;
use crate::manifest::{
    CollectionConfig, Directives, ManifestEntry, COLLECTION_NAMESPACE, COLLECTION_ROOT,
};
use crate::registry::DocumentRegistry;
use crate::resolver::ManifestResolver;
use crate::xml::XmlDocument;
use crate::xref::CrossReferenceResolver;

/// Name of the collection document written by [`CollectionAssembler::render`].
pub const COLLECTION_FILE: &str = "collection.xml";

#[derive(Debug)]
pub struct CollectionAssembler {
    config: CollectionConfig,
    dir: PathBuf,
    hooks: Hooks,
    registry: DocumentRegistry,
    warnings: Vec<BuildWarning>,
}

/// What [`CollectionAssembler::render`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub collection: PathBuf,
    /// `(identifier, output path)` per document, in registry order.
    pub documents: Vec<(String, PathBuf)>,
}

impl CollectionAssembler {
    /// Loads the manifest at `path` and assembles it. Relative file references are
    /// resolved against the manifest's directory.
    pub fn open<P: AsRef<Path>>(path: P, hooks: Hooks) -> Result<Self, CollectionError> {
        let path = path.as_ref();
        let config = load_manifest(path, hooks.transform.as_ref())?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self::new(config, dir, hooks)
    }

    /// Resolves `config.manifest` relative to `dir` and builds the document registry.
    pub fn new(
        mut config: CollectionConfig,
        dir: impl Into<PathBuf>,
        hooks: Hooks,
    ) -> Result<Self, CollectionError> {
        let dir = dir.into();
        info!(dir = %dir.display(), "Assembling collection");

        let mut resolver = ManifestResolver::new(&hooks, &config.directives);
        let root = std::mem::take(&mut config.manifest);
        config.manifest = resolver.resolve(root, config.bibdata.as_ref(), &dir)?;
        let mut warnings = resolver.into_warnings();

        let inline = config.directives.documents_inline();
        let registry = DocumentRegistry::build(&config.manifest, &dir, &hooks, inline)?;
        warnings.extend(registry.warnings().iter().cloned());
        attach_bibitems(&mut config.manifest, &registry);

        info!(
            documents = registry.len(),
            warnings = warnings.len(),
            "Collection assembled"
        );
        Ok(Self {
            config,
            dir,
            hooks,
            registry,
            warnings,
        })
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn bibdata(&self) -> Option<&Bibdata> {
        self.config.bibdata.as_ref()
    }

    pub fn directives(&self) -> &Directives {
        &self.config.directives
    }

    pub fn manifest(&self) -> &ManifestEntry {
        &self.config.manifest
    }

    pub fn documents(&self) -> &DocumentRegistry {
        &self.registry
    }

    /// Content placed before the documents: an XML fragment for XML manifests, markup
    /// source for YAML ones.
    pub fn prefatory_content(&self) -> Option<&str> {
        self.config.prefatory_content.as_deref()
    }

    pub fn final_content(&self) -> Option<&str> {
        self.config.final_content.as_deref()
    }

    pub fn formats(&self) -> &[String] {
        &self.config.formats
    }

    pub fn output_folder(&self) -> Option<&Path> {
        self.config.output_folder.as_deref()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Warnings from resolution and registry construction.
    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    /// Fails when two leaves resolved to the same identifier.
    pub fn validate_identifiers(&self) -> Result<(), CollectionError> {
        let duplicates = self.registry.duplicates();
        if duplicates.is_empty() {
            Ok(())
        } else {
            error!(duplicates = ?duplicates, "Duplicate document identifiers");
            Err(CollectionError::DuplicateIdentifier(duplicates))
        }
    }

    /// The collection document. Document containers are only written when documents are
    /// inlined.
    pub fn to_xml(&self) -> Result<String, CollectionError> {
        let mut doc = XmlDocument::new(COLLECTION_ROOT);
        let Some(root) = doc.root() else {
            return Ok(doc.to_xml_string());
        };
        doc.set_attr(root, "xmlns", COLLECTION_NAMESPACE);
        self.config.write_head(&mut doc, root);
        if self.config.directives.documents_inline() {
            for (i, (_, document)) in self.registry.iter().enumerate() {
                let id = format!("doc{i:09}");
                let container = doc.element("doc-container", &[("id", id.as_str())], None);
                document.write_container(&mut doc, container)?;
                doc.append(root, container);
            }
        }
        self.config.write_tail(&mut doc, root);
        Ok(doc.to_xml_string())
    }

    /// Writes `collection.xml` into `output_dir` and copies every document next to it.
    ///
    /// Documents are stored under their base names; clashes get numbered names.
    pub fn render<P: AsRef<Path>>(&self, output_dir: P) -> Result<RenderReport, CollectionError> {
        let output_dir = output_dir.as_ref();
        info!(output = %output_dir.display(), "Rendering collection");
        fs::create_dir_all(output_dir).map_err(|e| CollectionError::io(output_dir, e))?;

        let mut names = FilenameDisambiguator::new();
        names.assign(COLLECTION_FILE, true, false);

        let mut documents = Vec::with_capacity(self.registry.len());
        for (identifier, document) in self.registry.iter() {
            let base = Path::new(&document.fileref)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| document.fileref.clone());
            let name = names.assign(&base, true, false);
            let target = output_dir.join(&name);
            fs::copy(&document.path, &target).map_err(|e| CollectionError::io(&document.path, e))?;
            documents.push((identifier.to_string(), target));
        }

        let collection = output_dir.join(COLLECTION_FILE);
        let xml = self.to_xml()?;
        fs::write(&collection, xml).map_err(|e| CollectionError::io(&collection, e))?;
        info!(
            collection = %collection.display(),
            documents = documents.len(),
            "Collection rendered"
        );
        Ok(RenderReport {
            collection,
            documents,
        })
    }

    /// A reference resolver that recognises this collection's documents as internal.
    pub fn cross_reference_resolver(&self) -> CrossReferenceResolver<'_> {
        CrossReferenceResolver::with_registry(&self.registry)
    }
}

fn attach_bibitems(root: &mut ManifestEntry, registry: &DocumentRegistry) {
    let mut stack = vec![root];
    while let Some(entry) = stack.pop() {
        if entry.file.is_some() {
            if let Some(doc) = registry.get(&entry.identifier) {
                entry.bibdata = Some(doc.bibitem.clone());
            }
        }
        stack.extend(entry.entries.iter_mut());
    }
}
