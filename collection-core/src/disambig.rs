//! Output file naming that never hands out the same name twice.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

fn climb_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\./)?(\.\./)*").expect("valid regex"))
}

fn numbered() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<stem>.+\.)(?P<num>[1-9][0-9]*)\.(?P<suffix>[^.]*)$").expect("valid regex")
    })
}

fn suffixed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<stem>.+\.)(?P<suffix>[^.]*)$").expect("valid regex"))
}

/// Assigns names, remembering every name it has handed out.
///
/// The seen-set belongs to one resolution or rendering session; it only ever grows.
#[derive(Debug, Default, Clone)]
pub struct FilenameDisambiguator {
    seen: HashSet<String>,
}

impl FilenameDisambiguator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strips leading `./` and `../` segments.
    pub fn strip_root(name: &str) -> &str {
        let matched = climb_prefix().find(name).map_or(0, |m| m.end());
        &name[matched..]
    }

    /// Registers `name` and returns it, or a variant of it if that was already taken.
    ///
    /// With `preserve_dirs` the whole stripped path is the comparison key; otherwise only the
    /// base name is, and the directory is re-joined onto the result.
    pub fn assign(&mut self, name: &str, disambiguate: bool, preserve_dirs: bool) -> String {
        let stripped = Self::strip_root(name);
        let (dir, key) = if preserve_dirs {
            (None, stripped)
        } else {
            match stripped.rsplit_once('/') {
                Some((dir, base)) => (Some(dir), base),
                None => (None, stripped),
            }
        };

        let assigned = if disambiguate && self.seen.contains(key) {
            let fresh = self.next_free(key);
            debug!(original = key, assigned = %fresh, "Disambiguated file name");
            fresh
        } else {
            key.to_string()
        };
        self.seen.insert(assigned.clone());

        match dir {
            Some(dir) if !dir.is_empty() => format!("{dir}/{assigned}"),
            _ => assigned,
        }
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    fn next_free(&self, key: &str) -> String {
        let (stem, suffix, mut i) = if let Some(c) = numbered().captures(key) {
            let n: u64 = c["num"].parse().unwrap_or(0);
            (c["stem"].to_string(), Some(c["suffix"].to_string()), n + 1)
        } else if let Some(c) = suffixed().captures(key) {
            (c["stem"].to_string(), Some(c["suffix"].to_string()), 1)
        } else {
            (format!("{key}."), None, 1)
        };
        loop {
            let candidate = match &suffix {
                Some(suffix) => format!("{stem}{i}.{suffix}"),
                None => format!("{stem}{i}"),
            };
            if !self.seen.contains(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_assignment_gets_numbered() {
        let mut d = FilenameDisambiguator::new();
        assert_eq!(d.assign("a.html", true, false), "a.html");
        assert_eq!(d.assign("a.html", true, false), "a.1.html");
        assert_eq!(d.assign("a.html", true, false), "a.2.html");
    }

    #[test]
    fn numbering_never_reuses_an_existing_suffix() {
        let mut d = FilenameDisambiguator::new();
        assert_eq!(d.assign("a.2.html", true, false), "a.2.html");
        assert_eq!(d.assign("a.html", true, false), "a.html");
        assert_eq!(d.assign("a.html", true, false), "a.1.html");
        assert_eq!(d.assign("a.html", true, false), "a.3.html");
        assert_eq!(d.assign("a.2.html", true, false), "a.4.html");
    }

    #[test]
    fn numbered_names_continue_from_their_number() {
        let mut d = FilenameDisambiguator::new();
        d.assign("doc.7.xml", true, false);
        assert_eq!(d.assign("doc.7.xml", true, false), "doc.8.xml");
    }

    #[test]
    fn names_without_suffix_get_one_appended() {
        let mut d = FilenameDisambiguator::new();
        d.assign("README", true, false);
        assert_eq!(d.assign("README", true, false), "README.1");
    }

    #[test]
    fn directories_are_split_off_unless_preserved() {
        let mut d = FilenameDisambiguator::new();
        assert_eq!(d.assign("../../x/a.xml", true, false), "x/a.xml");
        assert_eq!(d.assign("./y/a.xml", true, false), "y/a.1.xml");

        let mut p = FilenameDisambiguator::new();
        assert_eq!(p.assign("x/a.xml", true, true), "x/a.xml");
        assert_eq!(p.assign("y/a.xml", true, true), "y/a.xml");
        assert_eq!(p.assign("y/a.xml", true, true), "y/a.1.xml");
    }

    #[test]
    fn without_disambiguation_names_pass_through() {
        let mut d = FilenameDisambiguator::new();
        d.assign("a.html", false, false);
        assert_eq!(d.assign("a.html", false, false), "a.html");
        assert!(d.is_taken("a.html"));
    }
}
