//! Lexical path helpers. Nothing here touches the filesystem except `absolute`, which
//! consults the current directory for relative inputs.

use std::path::{Component, Path, PathBuf};

/// Resolves `.` and `..` components without consulting the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = out.components().next_back();
                match last {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => out.push(".."),
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_default();
        normalize(&cwd.join(path))
    }
}

/// Path of `target` relative to the directory `base`.
///
/// When one side is absolute and the other is not, both are made absolute first.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let (base, target) = if base.is_absolute() == target.is_absolute() {
        (normalize(base), normalize(target))
    } else {
        (absolute(base), absolute(target))
    };
    let base: Vec<Component<'_>> = base.components().collect();
    let target: Vec<Component<'_>> = target.components().collect();
    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for comp in &target[common..] {
        out.push(comp.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Renders a path with `/` separators, which is how manifests store file references.
pub fn to_fileref(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replacen("//", "/", 1)
}

pub fn has_extension(fileref: &str, extensions: &[&str]) -> bool {
    Path::new(fileref)
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| {
            extensions.iter().any(|x| x.eq_ignore_ascii_case(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(normalize(Path::new("/x/../y")), PathBuf::from("/y"));
    }

    #[test]
    fn relative_path_between_directories() {
        assert_eq!(relative_path(Path::new("/c"), Path::new("/c/sub")), PathBuf::from("sub"));
        assert_eq!(
            relative_path(Path::new("/c/a"), Path::new("/c/b/x.xml")),
            PathBuf::from("../b/x.xml")
        );
        assert_eq!(relative_path(Path::new("/c"), Path::new("/c")), PathBuf::from("."));
    }

    #[test]
    fn fileref_uses_forward_slashes() {
        assert_eq!(to_fileref(Path::new("sub/x.xml")), "sub/x.xml");
        assert_eq!(to_fileref(Path::new("/abs/x.xml")), "/abs/x.xml");
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_extension("a/b.YAML", &["yaml", "yml"]));
        assert!(!has_extension("a/b.xml", &["yaml", "yml"]));
    }
}
