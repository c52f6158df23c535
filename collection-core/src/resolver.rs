//! Manifest normalization.
//!
//! [`ManifestResolver::resolve`] runs a fixed sequence of passes over the manifest tree:
//! YAML sub-manifest expansion, markup compilation, file-existence checks, section-split
//! propagation and identifier resolution. The first fatal error aborts the whole run;
//! recoverable problems are kept as [`BuildWarning`]s.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::bibdata::Bibdata;
use crate::contract::{FormatRequest, Hooks};
use crate::disambig::FilenameDisambiguator;
use crate::error::{BuildWarning, CollectionError};
use crate::flavor::flavor_of_root;
use crate::load_manifest::load_yaml_manifest;
use crate::manifest::{check_depth, Directives, ManifestEntry, FLAVOR, RECOMPILE_XML};
use crate::paths::{has_extension, normalize, relative_path, to_fileref};
use crate::xml::XmlDocument;

const YAML_EXTENSIONS: &[&str] = &["yaml", "yml"];
const MARKUP_EXTENSIONS: &[&str] = &["adoc", "asciidoc"];

pub struct ManifestResolver<'h> {
    hooks: &'h Hooks,
    directives: Directives,
    disambig: FilenameDisambiguator,
    lang: String,
    script: String,
    warnings: Vec<BuildWarning>,
}

impl<'h> ManifestResolver<'h> {
    pub fn new(hooks: &'h Hooks, directives: &Directives) -> Self {
        Self {
            hooks,
            directives: directives.clone(),
            disambig: FilenameDisambiguator::new(),
            lang: "en".to_string(),
            script: "Latn".to_string(),
            warnings: Vec::new(),
        }
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<BuildWarning> {
        self.warnings
    }

    /// Normalizes `root`, whose relative file references are relative to `dir`.
    ///
    /// On success every leaf file exists, is XML or an attachment, is stored relative to
    /// `dir`, and every XML leaf carries a real identifier.
    pub fn resolve(
        &mut self,
        mut root: ManifestEntry,
        bibdata: Option<&Bibdata>,
        dir: &Path,
    ) -> Result<ManifestEntry, CollectionError> {
        info!(dir = %dir.display(), "Resolving collection manifest");

        if let Some(bib) = bibdata {
            if let Some(lang) = bib.languages().into_iter().next() {
                self.lang = lang;
            }
            if let Some(script) = bib.scripts().into_iter().next() {
                self.script = script;
            }
        }
        debug!(lang = %self.lang, script = %self.script, "Collection language");

        self.expand_yaml(&mut root, dir, 0)?;
        self.compile_markup(&mut root, dir)?;
        self.check_files(&mut root, dir)?;
        propagate_sectionsplit(&mut root);
        for leaf in root.leaves() {
            if !leaf.has_placeholder_identifier() {
                self.disambig.assign(&leaf.identifier, false, true);
            }
        }
        self.resolve_identifiers(&mut root, dir)?;

        info!(
            leaves = root.leaves().len(),
            warnings = self.warnings.len(),
            "Manifest resolved"
        );
        Ok(root)
    }

    fn expand_yaml(
        &mut self,
        entry: &mut ManifestEntry,
        dir: &Path,
        depth: usize,
    ) -> Result<(), CollectionError> {
        check_depth(depth)?;
        for child in &mut entry.entries {
            self.expand_yaml(child, dir, depth + 1)?;
        }

        let Some(file) = entry
            .file
            .clone()
            .filter(|f| has_extension(f, YAML_EXTENSIONS))
        else {
            return Ok(());
        };
        let path = self.hooks.fileref.resolve(dir, &file);
        if !path.is_file() {
            error!(path = %path.display(), entry = %entry.identifier, "Sub-manifest not found");
            return Err(CollectionError::FileNotFound {
                path,
                entry: entry.identifier.clone(),
            });
        }
        info!(path = %path.display(), "Expanding sub-manifest");
        let nested = load_yaml_manifest(&path, self.hooks.transform.as_ref())?;
        let nested_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let nested_root = nested.manifest;
        if entry.title.is_none() {
            entry.title = nested_root.title.clone();
        }
        if entry.entry_type.is_none() {
            entry.entry_type = nested_root.entry_type.clone();
        }
        let mut spliced = if nested_root.entries.is_empty() && nested_root.file.is_some() {
            vec![nested_root]
        } else {
            nested_root.entries
        };
        entry.file = None;

        for child in &mut spliced {
            self.expand_yaml(child, &nested_dir, depth + 1)?;
        }
        if normalize(&nested_dir) != normalize(dir) {
            let offset = relative_path(dir, &nested_dir);
            debug!(offset = %offset.display(), "Rebasing sub-manifest file references");
            for child in &mut spliced {
                rebase(child, &offset);
            }
        }
        entry.entries.extend(spliced);
        Ok(())
    }

    fn compile_markup(&self, entry: &mut ManifestEntry, dir: &Path) -> Result<(), CollectionError> {
        if let Some(file) = entry
            .file
            .clone()
            .filter(|f| has_extension(f, MARKUP_EXTENSIONS))
        {
            let source = self.hooks.fileref.resolve(dir, &file);
            if !source.is_file() {
                error!(path = %source.display(), entry = %entry.identifier, "Markup source not found");
                return Err(CollectionError::AdocSourceNotFound {
                    path: source,
                    entry: entry.identifier.clone(),
                });
            }
            let output = source.with_extension("xml");
            if output.is_file() && !self.directives.contains(RECOMPILE_XML) {
                debug!(output = %output.display(), "XML output already present; not compiling");
            } else if let Err(e) = self.hooks.compiler.compile(&source, &output) {
                error!(error = %e, source = %source.display(), "Compilation failed");
                return Err(CollectionError::Compile {
                    path: source,
                    message: e.0,
                });
            }
            entry.file = Some(to_fileref(&Path::new(&file).with_extension("xml")));
        }
        for child in &mut entry.entries {
            self.compile_markup(child, dir)?;
        }
        Ok(())
    }

    fn check_files(&self, entry: &mut ManifestEntry, dir: &Path) -> Result<(), CollectionError> {
        if let Some(file) = &entry.file {
            let path = self.hooks.fileref.resolve(dir, file);
            if !path.is_file() {
                error!(path = %path.display(), entry = %entry.identifier, "Manifest file not found");
                return Err(CollectionError::FileNotFound {
                    path,
                    entry: entry.identifier.clone(),
                });
            }
            let stored = to_fileref(&relative_path(dir, &path));
            if &stored != file {
                debug!(from = %file, to = %stored, "Rewrote file reference");
            }
            entry.file = Some(stored);
        }
        for child in &mut entry.entries {
            self.check_files(child, dir)?;
        }
        Ok(())
    }

    fn resolve_identifiers(
        &mut self,
        entry: &mut ManifestEntry,
        dir: &Path,
    ) -> Result<(), CollectionError> {
        if entry.has_placeholder_identifier() {
            if let Some(file) = entry.file.clone().filter(|f| has_extension(f, &["xml"])) {
                let path = self.hooks.fileref.resolve(dir, &file);
                entry.identifier = self.identifier_from_document(&path, &file)?;
                debug!(file = %file, identifier = %entry.identifier, "Derived identifier");
            }
        }
        if !entry.has_placeholder_identifier() {
            entry.identifier = self.hooks.identifier.resolve(&entry.identifier);
        }
        for child in &mut entry.entries {
            self.resolve_identifiers(child, dir)?;
        }
        Ok(())
    }

    fn identifier_from_document(
        &mut self,
        path: &Path,
        file: &str,
    ) -> Result<String, CollectionError> {
        let content = fs::read_to_string(path).map_err(|e| CollectionError::io(path, e))?;
        let doc = XmlDocument::parse(&content).map_err(|e| CollectionError::xml(path, e))?;
        let root_name = doc.root().map(|r| doc.name(r)).unwrap_or_default();
        let flavor = self
            .directives
            .value(FLAVOR)
            .map(str::to_string)
            .unwrap_or_else(|| flavor_of_root(root_name));

        let docid = Bibdata::from_document(&doc)
            .and_then(|b| b.primary_docidentifier())
            .filter(|d| !d.text.is_empty());
        if let Some(docid) = docid {
            let request = FormatRequest {
                id_type: docid.kind,
                identifier: docid.text,
                lang: self.lang.clone(),
                script: self.script.clone(),
            };
            match self.hooks.flavors.get(&flavor).format(&request) {
                Ok(identifier) => {
                    self.disambig.assign(&identifier, false, true);
                    return Ok(identifier);
                }
                Err(e) => {
                    warn!(flavor = %flavor, error = %e, file = %file, "Identifier formatter failed; using file name");
                    self.warnings.push(BuildWarning::FlavorLoadFailure {
                        flavor,
                        message: e.0,
                    });
                }
            }
        } else {
            debug!(file = %file, "Document has no docidentifier; using file name");
        }

        let stem = Path::new(file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        Ok(self.disambig.assign(&stem, true, false))
    }
}

fn propagate_sectionsplit(entry: &mut ManifestEntry) {
    if entry.sectionsplit && entry.file.is_none() {
        entry.sectionsplit = false;
        for child in entry.entries.iter_mut().filter(|c| !c.attachment) {
            child.sectionsplit = true;
        }
    }
    for child in &mut entry.entries {
        propagate_sectionsplit(child);
    }
}

/// Prefixes every relative file reference in the subtree with `offset`.
fn rebase(entry: &mut ManifestEntry, offset: &Path) {
    if let Some(file) = &entry.file {
        if !Path::new(file).is_absolute() {
            let rebased: PathBuf = normalize(&offset.join(file));
            entry.file = Some(to_fileref(&rebased));
        }
    }
    for child in &mut entry.entries {
        rebase(child, offset);
    }
}
