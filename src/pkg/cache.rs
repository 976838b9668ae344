// Purpose: Derive GOPATH-relative source and module-cache download locations.
// Inputs/Outputs: Maps (root, package name, version) to the directories the tool reads and writes.
// Invariants: Layout is `<root>/src/<pkg>` and `<root>/pkg/mod/cache/download/<pkg>/@v[/vN]`.
// Gotchas: Package names are used verbatim (no case escaping); validate them before joining.

use anyhow::Context;
use directories::BaseDirs;
use std::path::{Path, PathBuf};

use crate::pkg::version::PseudoVersion;

/// Resolves the workspace root from a GOPATH value, falling back to `$HOME/go`.
/// A path list resolves to its first non-empty entry.
pub fn gopath_root(gopath: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(list) = gopath
        && let Some(first) = std::env::split_paths(list).find(|p| !p.as_os_str().is_empty())
    {
        return Ok(first);
    }
    let dirs = BaseDirs::new().context("GOPATH is not set and no home directory was found")?;
    Ok(dirs.home_dir().join("go"))
}

pub fn source_dir(root: &Path, package_name: &str) -> PathBuf {
    root.join("src").join(package_name)
}

pub fn download_dir(root: &Path, package_name: &str, version: &PseudoVersion) -> PathBuf {
    let mut dir = root
        .join("pkg")
        .join("mod")
        .join("cache")
        .join("download")
        .join(package_name)
        .join("@v");
    if let Some(suffix) = version.path_suffix() {
        dir.push(suffix);
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::{download_dir, gopath_root, source_dir};
    use crate::pkg::version::PseudoVersion;
    use std::path::{Path, PathBuf};

    fn v(s: &str) -> PseudoVersion {
        PseudoVersion::parse(s).expect("version")
    }

    #[test]
    fn download_dir_appends_major_segment_after_at_v() {
        let root = Path::new("/gopath");
        let at_v = root.join("pkg/mod/cache/download/example.com/foo/@v");
        assert_eq!(download_dir(root, "example.com/foo", &v("v1.0.0")), at_v);
        assert_eq!(
            download_dir(root, "example.com/foo", &v("v0.0.0-20200101000000-abcdefabcdef")),
            at_v
        );
        assert_eq!(download_dir(root, "example.com/foo", &v("v2.3.1")), at_v.join("v2"));
        assert_eq!(download_dir(root, "example.com/foo", &v("3.0.0")), at_v.join("v3"));
    }

    #[test]
    fn download_dir_keeps_segment_when_package_has_major_suffix() {
        let root = Path::new("/gopath");
        let dir = download_dir(root, "example.com/foo/v2", &v("v2.0.0"));
        assert_eq!(dir, root.join("pkg/mod/cache/download/example.com/foo/v2/@v/v2"));
    }

    #[test]
    fn source_dir_is_under_src() {
        assert_eq!(
            source_dir(Path::new("/gopath"), "example.com/foo"),
            PathBuf::from("/gopath/src/example.com/foo")
        );
    }

    #[cfg(unix)]
    #[test]
    fn explicit_root_list_uses_first_entry() {
        let root = gopath_root(Some(Path::new("/first:/second"))).expect("root");
        assert_eq!(root, PathBuf::from("/first"));
        let skip_empty = gopath_root(Some(Path::new(":/second"))).expect("root");
        assert_eq!(skip_empty, PathBuf::from("/second"));
    }

    #[test]
    fn empty_root_falls_back_to_home_go() {
        let empty = gopath_root(Some(Path::new(""))).expect("root");
        assert!(empty.ends_with("go"), "{}", empty.display());
        assert_eq!(gopath_root(None).expect("root"), empty);
    }
}
