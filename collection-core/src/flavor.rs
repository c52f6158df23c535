//! Compiled-in identifier formatters, keyed by document flavor.
//!
//! The flavor of a document is detected from its root element (`iso-standard` is `iso`)
//! unless the `flavor` directive forces one. Flavors without a registered formatter get
//! the identity formatter.

use std::collections::BTreeMap;

use crate::contract::{FlavorError, FormatRequest, IdentifierFormatter};

/// Leaves identifiers exactly as written.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFormatter;

impl IdentifierFormatter for IdentityFormatter {
    fn format(&self, request: &FormatRequest) -> Result<String, FlavorError> {
        Ok(request.identifier.clone())
    }
}

/// Prefixes an identifier with its `docidentifier` type, unless the type is one that is
/// never shown or the identifier already starts with it.
#[derive(Debug, Clone)]
pub struct PrefixFormatter {
    omitted: Vec<String>,
}

const ALWAYS_OMITTED: &[&str] = &[
    "metanorma",
    "metanorma-ordinal",
    "metanorma-collection",
    "repository",
    "internal",
    "DOI",
    "ISBN",
    "ISSN",
    "URN",
];

impl Default for PrefixFormatter {
    fn default() -> Self {
        Self {
            omitted: ALWAYS_OMITTED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PrefixFormatter {
    /// Also omit the given identifier types.
    pub fn omitting(extra: &[&str]) -> Self {
        let mut f = Self::default();
        f.omitted.extend(extra.iter().map(|s| s.to_string()));
        f
    }

    fn omits(&self, id_type: &str) -> bool {
        id_type.is_empty() || self.omitted.iter().any(|o| o.eq_ignore_ascii_case(id_type))
    }
}

impl IdentifierFormatter for PrefixFormatter {
    fn format(&self, request: &FormatRequest) -> Result<String, FlavorError> {
        let text = request.identifier.trim();
        let Some(prefix) = request.id_type.as_deref() else {
            return Ok(text.to_string());
        };
        if self.omits(prefix) {
            return Ok(text.to_string());
        }
        let already = text
            .get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
            && text[prefix.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric());
        if already {
            Ok(text.to_string())
        } else {
            Ok(format!("{prefix} {text}"))
        }
    }
}

#[derive(Default)]
pub struct FlavorRegistry {
    formatters: BTreeMap<String, Box<dyn IdentifierFormatter>>,
    identity: IdentityFormatter,
}

impl FlavorRegistry {
    /// A registry without formatters; every flavor is formatted as identity.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The formatters shipped with this crate.
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        r.register("standoc", PrefixFormatter::default());
        r.register("iso", PrefixFormatter::default());
        r.register("iec", PrefixFormatter::default());
        r.register("ietf", PrefixFormatter::omitting(&["IETF", "RFC"]));
        r
    }

    pub fn register(&mut self, flavor: &str, formatter: impl IdentifierFormatter + 'static) {
        self.formatters
            .insert(flavor.to_ascii_lowercase(), Box::new(formatter));
    }

    pub fn contains(&self, flavor: &str) -> bool {
        self.formatters.contains_key(&flavor.to_ascii_lowercase())
    }

    /// The formatter for `flavor`, or identity when none is registered.
    pub fn get(&self, flavor: &str) -> &dyn IdentifierFormatter {
        match self.formatters.get(&flavor.to_ascii_lowercase()) {
            Some(f) => f.as_ref(),
            None => &self.identity,
        }
    }
}

impl std::fmt::Debug for FlavorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.formatters.keys()).finish()
    }
}

/// Flavor tag for a document root element name.
pub fn flavor_of_root(root_name: &str) -> String {
    let local = crate::xml::local_name(root_name);
    match local {
        "metanorma" | "standard-document" | "" => "standoc".to_string(),
        other => other
            .strip_suffix("-standard")
            .unwrap_or(other)
            .to_ascii_lowercase(),
    }
}
