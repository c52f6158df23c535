/// `load_manifest` module: reads a collection manifest (YAML or XML) into a [`CollectionConfig`].
///
/// This is the only place where manifest files are parsed. YAML is first read into a loose
/// `serde_yaml::Value`, handed to the [`ManifestTransform`] hook, and only then decoded into
/// the YAML-side structs below, which are converted into the domain model.
///
/// # Extension Guidance
/// - To accept a new YAML key:
///   1. Add it to the intermediate type (`CollectionYaml` or `EntryYaml`)
///   2. Map it onto the domain model in the matching `into_*` conversion
///
/// # Errors
/// Unreadable files are `Io`, undecodable YAML is `Yaml`, bad XML is `Xml`, and a document
/// without a manifest (or nested too deeply) is `MalformedManifest`.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info};

use crate::bibdata::{scalar_text, Bibdata, BibdataYaml, OneOrMany};
use crate::contract::ManifestTransform;
use crate::error::CollectionError;
use crate::manifest::{check_depth, placeholder_identifier, CollectionConfig, ManifestEntry};
use crate::paths::has_extension;
use crate::xml::XmlDocument;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DirectiveYaml {
    Flag(String),
    Keyed(BTreeMap<String, serde_yaml::Value>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct CollectionYaml {
    directives: Vec<DirectiveYaml>,
    bibdata: Option<BibdataYaml>,
    manifest: Option<OneOrMany<EntryYaml>>,
    format: OneOrMany<String>,
    #[serde(rename = "output_folder")]
    output_folder: Option<PathBuf>,
    coverpage: Option<String>,
    compile: BTreeMap<String, serde_yaml::Value>,
    prefatory_content: Option<String>,
    final_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntryYaml {
    identifier: Option<serde_yaml::Value>,
    id: Option<String>,
    #[serde(alias = "file")]
    fileref: Option<String>,
    url: Option<String>,
    #[serde(rename = "type", alias = "level")]
    kind: Option<String>,
    title: Option<String>,
    attachment: bool,
    sectionsplit: bool,
    index: Option<bool>,
    bibdata: Option<BibdataYaml>,
    docref: Vec<EntryYaml>,
    manifest: OneOrMany<Box<EntryYaml>>,
    entry: Vec<EntryYaml>,
}

impl EntryYaml {
    fn into_entry(self, depth: usize) -> Result<ManifestEntry, CollectionError> {
        check_depth(depth)?;
        let mut entries = Vec::new();
        for child in self
            .docref
            .into_iter()
            .chain(self.manifest.into_vec().into_iter().map(|b| *b))
            .chain(self.entry)
        {
            entries.push(child.into_entry(depth + 1)?);
        }
        let identifier = self
            .identifier
            .as_ref()
            .map(scalar_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(placeholder_identifier);
        Ok(ManifestEntry {
            identifier,
            id: self.id,
            file: self.fileref,
            url: self.url,
            entry_type: self.kind,
            title: self.title,
            attachment: self.attachment,
            sectionsplit: self.sectionsplit,
            index: self.index.unwrap_or(true),
            bibdata: self.bibdata.map(Bibdata::from),
            entries,
        })
    }
}

impl CollectionYaml {
    fn into_config(self) -> Result<CollectionConfig, CollectionError> {
        let manifest = match self.manifest.map(OneOrMany::into_vec) {
            None => {
                return Err(CollectionError::MalformedManifest(
                    "collection has no manifest".to_string(),
                ))
            }
            Some(mut roots) if roots.len() == 1 => roots.remove(0).into_entry(0)?,
            Some(roots) => {
                let mut entries = Vec::with_capacity(roots.len());
                for r in roots {
                    entries.push(r.into_entry(1)?);
                }
                ManifestEntry::new().with_entries(entries)
            }
        };

        let mut config = CollectionConfig::new(manifest);
        for d in self.directives {
            match d {
                DirectiveYaml::Flag(key) => config.directives.push(&key, None),
                DirectiveYaml::Keyed(map) => {
                    for (key, value) in map {
                        let value = match value {
                            serde_yaml::Value::Null => None,
                            other => Some(scalar_text(&other)),
                        };
                        config.directives.push(&key, value.as_deref());
                    }
                }
            }
        }
        config.bibdata = self.bibdata.map(Bibdata::from);
        config.formats = self.format.into_vec();
        config.output_folder = self.output_folder;
        config.coverpage = self.coverpage;
        config.compile = self
            .compile
            .iter()
            .map(|(k, v)| (k.clone(), scalar_text(v)))
            .collect();
        config.prefatory_content = self.prefatory_content;
        config.final_content = self.final_content;
        Ok(config)
    }
}

/// Decodes YAML manifest text, applying `transform` to the raw model first.
pub fn parse_yaml_manifest(
    content: &str,
    transform: &dyn ManifestTransform,
) -> Result<CollectionConfig, CollectionError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
    let model = transform.transform(raw);
    let yaml: CollectionYaml = serde_yaml::from_value(model)?;
    yaml.into_config()
}

/// Decodes XML manifest text. `path` is only used for error reporting.
pub fn parse_xml_manifest(content: &str, path: &Path) -> Result<CollectionConfig, CollectionError> {
    let doc = XmlDocument::parse(content).map_err(|e| CollectionError::xml(path, e))?;
    CollectionConfig::from_xml_document(&doc)
}

fn read(path: &Path) -> Result<String, CollectionError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            info!(manifest_path = ?path, "Manifest file read successfully");
            Ok(content)
        }
        Err(e) => {
            error!(error = ?e, manifest_path = ?path, "Failed to read manifest file");
            Err(CollectionError::io(path, e))
        }
    }
}

pub fn load_yaml_manifest(
    path: &Path,
    transform: &dyn ManifestTransform,
) -> Result<CollectionConfig, CollectionError> {
    let content = read(path)?;
    match parse_yaml_manifest(&content, transform) {
        Ok(config) => {
            info!(manifest_path = ?path, "Parsed manifest YAML successfully");
            Ok(config)
        }
        Err(e) => {
            error!(error = %e, manifest_path = ?path, "Failed to decode manifest YAML");
            Err(e)
        }
    }
}

pub fn load_xml_manifest(path: &Path) -> Result<CollectionConfig, CollectionError> {
    let content = read(path)?;
    match parse_xml_manifest(&content, path) {
        Ok(config) => {
            info!(manifest_path = ?path, "Parsed manifest XML successfully");
            Ok(config)
        }
        Err(e) => {
            error!(error = %e, manifest_path = ?path, "Failed to decode manifest XML");
            Err(e)
        }
    }
}

/// Loads a manifest, choosing the codec from the file extension.
pub fn load_manifest<P: AsRef<Path>>(
    path: P,
    transform: &dyn ManifestTransform,
) -> Result<CollectionConfig, CollectionError> {
    let path = path.as_ref();
    info!(manifest_path = ?path, "Loading collection manifest");
    let name = path.to_string_lossy();
    if has_extension(&name, &["xml"]) {
        load_xml_manifest(path)
    } else if has_extension(&name, &["yaml", "yml"]) {
        load_yaml_manifest(path, transform)
    } else {
        error!(manifest_path = ?path, "Unsupported manifest extension");
        Err(CollectionError::MalformedManifest(format!(
            "{} is neither an .xml nor a .yml/.yaml manifest",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{IdentityTransform, MockManifestTransform};
    use crate::manifest::{COVERPAGE, DOCUMENTS_INLINE, FLAVOR};

    const YAML: &str = r#"
directives:
  - documents-inline
  - flavor: iso
  - coverpage: collection_cover.html
bibdata:
  title:
    - language: en
      content: ISO Collection 1
  type: collection
  docid:
    type: iso
    id: ISO 12345
manifest:
  level: collection
  title: ISO Collection
  docref:
    - fileref: rice-en.final.xml
      identifier: ISO 17301-1:2016
    - file: pics/action_schemaexpg1.svg
      attachment: true
      index: false
  manifest:
    - level: subcollection
      title: Annex
      sectionsplit: true
      docref:
        - fileref: dummy.xml
format:
  - xml
  - html
output_folder: bilingual-brochure
prefatory-content: |
  == Clause
  Welcome to our collection
compile:
  no-install-fonts: true
"#;

    #[test]
    fn yaml_manifest_decodes_into_config() {
        let config = parse_yaml_manifest(YAML, &IdentityTransform).expect("decodes");
        assert!(config.directives.contains(DOCUMENTS_INLINE));
        assert_eq!(config.directives.value(FLAVOR), Some("iso"));
        assert_eq!(config.directives.value(COVERPAGE), Some("collection_cover.html"));
        assert_eq!(config.formats, vec!["xml", "html"]);
        assert_eq!(config.output_folder, Some(PathBuf::from("bilingual-brochure")));
        assert_eq!(config.compile.get("no-install-fonts").map(String::as_str), Some("true"));
        assert!(config
            .prefatory_content
            .as_deref()
            .is_some_and(|p| p.contains("Welcome")));

        let root = &config.manifest;
        assert_eq!(root.entry_type.as_deref(), Some("collection"));
        assert_eq!(root.entries.len(), 3);
        assert_eq!(root.entries[0].identifier, "ISO 17301-1:2016");
        assert_eq!(root.entries[1].file.as_deref(), Some("pics/action_schemaexpg1.svg"));
        assert!(root.entries[1].attachment);
        assert!(!root.entries[1].index);
        assert!(root.entries[1].has_placeholder_identifier());
        assert!(root.entries[2].sectionsplit);
        assert_eq!(root.entries[2].entries[0].file.as_deref(), Some("dummy.xml"));
    }

    #[test]
    fn transform_hook_sees_raw_model_before_decoding() {
        let mut transform = MockManifestTransform::new();
        transform.expect_transform().times(1).returning(|mut model| {
            if let serde_yaml::Value::Mapping(m) = &mut model {
                m.insert("coverpage".into(), "injected.html".into());
            }
            model
        });
        let config = parse_yaml_manifest(YAML, &transform).expect("decodes");
        assert_eq!(config.coverpage.as_deref(), Some("injected.html"));
    }

    #[test]
    fn yaml_without_manifest_is_malformed() {
        let err = parse_yaml_manifest("directives: [documents-inline]\n", &IdentityTransform)
            .unwrap_err();
        assert!(matches!(err, CollectionError::MalformedManifest(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_manifest("collection.json", &IdentityTransform).unwrap_err();
        assert!(matches!(err, CollectionError::MalformedManifest(_)));
    }

    #[test]
    fn xml_manifest_decodes_into_config() {
        let xml = r#"<metanorma-collection xmlns="http://metanorma.org">
  <directives><key>documents-inline</key></directives>
  <entry id="top" sectionsplit="true">
    <identifier>collection-1</identifier>
    <type>collection</type>
    <entry fileref="a.xml"><identifier>A</identifier></entry>
    <entry fileref="b.pdf" attachment="true" index="false"/>
  </entry>
</metanorma-collection>"#;
        let config = parse_xml_manifest(xml, Path::new("collection.xml")).expect("decodes");
        assert!(config.directives.documents_inline());
        let root = &config.manifest;
        assert_eq!(root.id.as_deref(), Some("top"));
        assert!(root.sectionsplit);
        assert_eq!(root.identifier, "collection-1");
        assert_eq!(root.entries[0].identifier, "A");
        assert!(root.entries[1].attachment);
        assert!(!root.entries[1].index);
    }
}
