// Purpose: Build module zip archives from a module source directory.
// Inputs/Outputs: Takes a module identity and a directory; returns the archive bytes in memory.
// Invariants: Same tree and identity always yield byte-identical output (sorted walk, fixed mtime).
// Gotchas: File selection must match the go command exactly or the h1 checksum diverges.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::pkg::modfile::ModuleVersion;
use crate::pkg::version::parse_semver;

/// Maximum total uncompressed size of the files in a module zip.
pub const MAX_ZIP_FILE: u64 = 500 << 20;
pub const MAX_GO_MOD: u64 = 16 << 20;
pub const MAX_LICENSE: u64 = 16 << 20;

const BAD_WINDOWS_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

// Unicode letter categories only (Lu, Ll, Lt, Lm, Lo).
static LETTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\p{L}$").expect("letter pattern"));

#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    #[error("malformed module path {path:?}: {reason}")]
    ModulePath { path: String, reason: String },

    #[error("version {0:?} is not a valid semantic version")]
    Version(String),

    #[error("malformed file path {path:?}: {reason}")]
    FilePath { path: String, reason: String },

    #[error("found file named {0}, want all lower-case go.mod")]
    GoModCase(String),

    #[error("case-insensitive file name collision: {0:?} and {1:?}")]
    Collision(String, String),

    #[error("entry {0:?} is both a file and a directory")]
    FileAndDir(String),

    #[error("multiple entries for file {0:?}")]
    Duplicate(String),

    #[error("module source tree too large (max size is {} bytes)", MAX_ZIP_FILE)]
    TooLarge,

    #[error("go.mod file too large (max size is {} bytes)", MAX_GO_MOD)]
    GoModTooLarge,

    #[error("LICENSE file too large (max size is {} bytes)", MAX_LICENSE)]
    LicenseTooLarge,

    #[error("file {0:?} is larger than declared size")]
    SizeChanged(String),

    #[error("{}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ZipError + '_ {
    move |source| ZipError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A regular file selected for the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFile {
    /// Slash-separated path relative to the module root.
    pub path: String,
    pub abs: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmitReason {
    Vcs,
    Submodule,
    Vendored,
    NotRegular,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omitted {
    pub path: String,
    pub reason: OmitReason,
}

#[derive(Debug, Default)]
pub struct Listing {
    pub files: Vec<DirFile>,
    pub omitted: Vec<Omitted>,
}

/// Walks `dir` in lexical order, selecting the files the go command would
/// put into a module zip. Symlinks are never followed.
pub fn list_files_in_dir(dir: &Path) -> Result<Listing, ZipError> {
    let mut out = Listing::default();
    walk(dir, "", &mut out)?;
    Ok(out)
}

fn walk(dir: &Path, rel: &str, out: &mut Listing) -> Result<(), ZipError> {
    let mut entries = fs::read_dir(dir)
        .map_err(io_err(dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(dir))?;
    entries.sort_by_key(|e| e.file_name());

    for ent in entries {
        let p = ent.path();
        let name = ent.file_name();
        let Some(name) = name.to_str() else {
            return Err(ZipError::FilePath {
                path: p.to_string_lossy().into_owned(),
                reason: "invalid UTF-8".to_string(),
            });
        };
        let slash = if rel.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", rel, name)
        };
        let meta = fs::symlink_metadata(&p).map_err(io_err(&p))?;

        let omit = |reason| Omitted {
            path: slash.clone(),
            reason,
        };
        if is_vendored_package(&slash) {
            out.omitted.push(omit(OmitReason::Vendored));
            continue;
        }
        if meta.is_dir() {
            if matches!(name, ".bzr" | ".git" | ".hg" | ".svn") {
                out.omitted.push(omit(OmitReason::Vcs));
                continue;
            }
            if let Ok(m) = fs::symlink_metadata(p.join("go.mod"))
                && !m.is_dir()
            {
                out.omitted.push(omit(OmitReason::Submodule));
                continue;
            }
            walk(&p, &slash, out)?;
            continue;
        }
        if !meta.is_file() {
            out.omitted.push(omit(OmitReason::NotRegular));
            continue;
        }
        out.files.push(DirFile {
            path: slash,
            abs: p,
        });
    }
    Ok(())
}

/// Reports whether `name` lies in a vendored package directory.
pub fn is_vendored_package(name: &str) -> bool {
    let rest = if let Some(rest) = name.strip_prefix("vendor/") {
        rest.as_bytes()
    } else if name.contains("/vendor/") {
        // Offset matches the go command; changing it changes module checksums.
        &name.as_bytes()["/vendor/".len()..]
    } else {
        return false;
    };
    rest.contains(&b'/')
}

/// Builds the module zip for `m` from the files under `dir`.
pub fn create_from_dir(m: &ModuleVersion, dir: &Path) -> Result<Vec<u8>, ZipError> {
    let listing = list_files_in_dir(dir)?;
    for o in &listing.omitted {
        debug!(path = %o.path, reason = ?o.reason, "omitted from module zip");
    }
    create(m, &listing.files)
}

/// Writes `files` into a module zip rooted at `<path>@<version>/`.
pub fn create(m: &ModuleVersion, files: &[DirFile]) -> Result<Vec<u8>, ZipError> {
    check_module_path(&m.path)?;
    if m.version.is_empty() || parse_semver(&m.version).is_err() {
        return Err(ZipError::Version(m.version.clone()));
    }

    // Directories (with trailing slash) holding a nested go.mod.
    let mut have_go_mod: HashSet<&str> = HashSet::new();
    for f in files {
        let (dir, base) = split_dir(&f.path);
        if base.eq_ignore_ascii_case("go.mod")
            && fs::symlink_metadata(&f.abs)
                .map_err(io_err(&f.abs))?
                .is_file()
        {
            have_go_mod.insert(dir);
        }
    }
    let in_submodule = |p: &str| {
        let mut p = p;
        loop {
            let (dir, _) = split_dir(p);
            if dir.is_empty() {
                return false;
            }
            if have_go_mod.contains(dir) {
                return true;
            }
            p = &dir[..dir.len() - 1];
        }
    };

    let mut zw = ZipWriter::new(Cursor::new(Vec::<u8>::new()));
    let opts = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let prefix = format!("{}@{}/", m.path, m.version);
    let mut collisions = CollisionChecker::default();
    let mut remaining = MAX_ZIP_FILE;

    for f in files {
        let p = f.path.as_str();
        if !is_clean(p) {
            return Err(ZipError::FilePath {
                path: p.to_string(),
                reason: "file path is not clean".to_string(),
            });
        }
        if p.starts_with('/') {
            return Err(ZipError::FilePath {
                path: p.to_string(),
                reason: "file path is not relative".to_string(),
            });
        }
        if is_vendored_package(p) || in_submodule(p) || p == ".hg_archival.txt" {
            continue;
        }
        check_file_path(p).map_err(|reason| ZipError::FilePath {
            path: p.to_string(),
            reason,
        })?;
        if p.to_lowercase() == "go.mod" && p != "go.mod" {
            return Err(ZipError::GoModCase(p.to_string()));
        }

        let meta = fs::symlink_metadata(&f.abs).map_err(io_err(&f.abs))?;
        collisions.check(p, meta.is_dir())?;
        if !meta.is_file() {
            continue;
        }
        let size = meta.len();
        if size > remaining {
            return Err(ZipError::TooLarge);
        }
        remaining -= size;
        if p == "go.mod" && size > MAX_GO_MOD {
            return Err(ZipError::GoModTooLarge);
        }
        if p == "LICENSE" && size > MAX_LICENSE {
            return Err(ZipError::LicenseTooLarge);
        }

        zw.start_file(format!("{}{}", prefix, p), opts)?;
        let src = File::open(&f.abs).map_err(io_err(&f.abs))?;
        let copied = std::io::copy(&mut src.take(size + 1), &mut zw).map_err(io_err(&f.abs))?;
        if copied > size {
            return Err(ZipError::SizeChanged(p.to_string()));
        }
    }

    Ok(zw.finish()?.into_inner())
}

/// Splits `a/b/c` into (`a/b/`, `c`); the directory keeps its trailing slash.
fn split_dir(p: &str) -> (&str, &str) {
    match p.rfind('/') {
        Some(i) => (&p[..=i], &p[i + 1..]),
        None => ("", p),
    }
}

fn is_clean(p: &str) -> bool {
    if p == "." || p == "/" {
        return true;
    }
    let (abs, body) = match p.strip_prefix('/') {
        Some(b) => (true, b),
        None => (false, p),
    };
    let mut leading_parents = true;
    for e in body.split('/') {
        match e {
            "" | "." => return false,
            ".." if abs || !leading_parents => return false,
            ".." => {}
            _ => leading_parents = false,
        }
    }
    true
}

#[derive(Default)]
struct CollisionChecker {
    seen: HashMap<String, (String, bool)>,
}

impl CollisionChecker {
    fn check(&mut self, p: &str, is_dir: bool) -> Result<(), ZipError> {
        let mut p = p;
        let mut is_dir = is_dir;
        loop {
            let fold = p.to_lowercase();
            match self.seen.get(&fold) {
                Some((other, other_dir)) => {
                    if other != p {
                        return Err(ZipError::Collision(other.clone(), p.to_string()));
                    }
                    if *other_dir != is_dir {
                        return Err(ZipError::FileAndDir(p.to_string()));
                    }
                    if !is_dir {
                        return Err(ZipError::Duplicate(p.to_string()));
                    }
                }
                None => {
                    self.seen.insert(fold, (p.to_string(), is_dir));
                }
            }
            match p.rfind('/') {
                Some(i) => {
                    p = &p[..i];
                    is_dir = true;
                }
                None => return Ok(()),
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PathKind {
    Module,
    Import,
    File,
}

fn mod_path_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn file_name_ok(c: char) -> bool {
    if c.is_ascii() {
        c.is_ascii_alphanumeric() || "!#$%&()+,-.=@[]^_{}~ ".contains(c)
    } else {
        let mut buf = [0u8; 4];
        LETTER_RE.is_match(c.encode_utf8(&mut buf))
    }
}

fn check_path(path: &str, kind: PathKind) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty string".to_string());
    }
    if path.starts_with('-') && kind != PathKind::File {
        return Err("leading dash".to_string());
    }
    if path.contains("//") {
        return Err("double slash".to_string());
    }
    if path.ends_with('/') {
        return Err("trailing slash".to_string());
    }
    path.split('/').try_for_each(|elem| check_elem(elem, kind))
}

fn check_elem(elem: &str, kind: PathKind) -> Result<(), String> {
    if elem.is_empty() {
        return Err("empty path element".to_string());
    }
    if elem.chars().all(|c| c == '.') {
        return Err(format!("invalid path element {:?}", elem));
    }
    if elem.starts_with('.') && kind == PathKind::Module {
        return Err("leading dot in path element".to_string());
    }
    if elem.ends_with('.') {
        return Err("trailing dot in path element".to_string());
    }
    for c in elem.chars() {
        let ok = match kind {
            PathKind::Module => mod_path_ok(c),
            PathKind::Import => mod_path_ok(c) || c == '+',
            PathKind::File => file_name_ok(c),
        };
        if !ok {
            return Err(format!("invalid char {:?}", c));
        }
    }
    let short = elem.split_once('.').map_or(elem, |(s, _)| s);
    if BAD_WINDOWS_NAMES.iter().any(|bad| bad.eq_ignore_ascii_case(short)) {
        return Err(format!(
            "{:?} disallowed as path element component on Windows",
            short
        ));
    }
    if kind == PathKind::File {
        return Ok(());
    }
    if let Some(t) = short.rfind('~')
        && t + 1 < short.len()
        && short[t + 1..].bytes().all(|b| b.is_ascii_digit())
    {
        return Err("trailing tilde and digits in path element".to_string());
    }
    Ok(())
}

/// Validates a file path inside a module zip.
pub fn check_file_path(path: &str) -> Result<(), String> {
    check_path(path, PathKind::File)
}

/// Validates an import path such as a package name on the command line.
pub fn check_import_path(path: &str) -> Result<(), String> {
    check_path(path, PathKind::Import)
}

/// Validates a module path. Unlike the go command, a dot in the first
/// element is not required, so local-only module names are accepted.
pub fn check_module_path(path: &str) -> Result<(), ZipError> {
    let fail = |reason: String| ZipError::ModulePath {
        path: path.to_string(),
        reason,
    };
    check_path(path, PathKind::Module).map_err(fail)?;
    let first = path.split('/').next().unwrap_or(path);
    if let Some(c) = first
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.')))
    {
        return Err(fail(format!("invalid char {:?} in first path element", c)));
    }
    Ok(())
}
