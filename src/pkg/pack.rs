// Purpose: Load a module descriptor and write its module zip into the download cache.
// Inputs/Outputs: Reads <source>/go.mod plus the source tree; writes <output>/<version>.zip.
// Invariants: The returned descriptor's module version always equals the requested version.
// Gotchas: The zip is staged in a temp file beside the target and renamed into place.

use anyhow::{Context, bail};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::pkg::modfile::ModFile;
use crate::pkg::{modzip, ziphash};

pub const DESCRIPTOR_FILE: &str = "go.mod";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArchive {
    pub path: PathBuf,
    pub size: usize,
    /// `h1:` hash as recorded in go.sum.
    pub hash: String,
}

/// Reads and parses `<source_dir>/go.mod`, then stamps `version` onto its module.
pub fn load_descriptor(source_dir: &Path, version: &str) -> anyhow::Result<ModFile> {
    let go_mod_path = source_dir.join(DESCRIPTOR_FILE);
    let mut data = Vec::new();
    {
        let mut file = File::open(&go_mod_path)
            .with_context(|| format!("error opening {}", go_mod_path.display()))?;
        file.read_to_end(&mut data)
            .with_context(|| format!("error reading {}", go_mod_path.display()))?;
    }

    let mut mf = ModFile::parse(&go_mod_path.display().to_string(), &data)
        .context("error parsing module file")?;
    let Some(module) = mf.module.as_mut() else {
        bail!("parsed module should not be nil");
    };
    module.id.version = version.to_string();
    Ok(mf)
}

/// Builds the module zip for `descriptor` from `source_dir` and stores it as
/// `<output_dir>/<version>.zip`.
pub fn write_archive(
    source_dir: &Path,
    descriptor: &ModFile,
    output_dir: &Path,
) -> anyhow::Result<PackedArchive> {
    let id = descriptor
        .module_id()
        .context("parsed module should not be nil")?;
    let zip_path = output_dir.join(format!("{}.zip", id.version));

    let bytes = modzip::create_from_dir(id, source_dir).context("create zip from dir")?;
    let hash = ziphash::hash_zip(&bytes)?;
    write_file_atomic(&zip_path, &bytes).context("writing zip file")?;

    Ok(PackedArchive {
        path: zip_path,
        size: bytes.len(),
        hash,
    })
}

fn write_file_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().context("output path has no parent directory")?;
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path)
        .with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_descriptor, write_archive};
    use crate::pkg::modzip::create_from_dir;
    use crate::pkg::ziphash::hash_zip;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, rel: &str, body: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().expect("parent")).expect("mkdir");
        fs::write(p, body).expect("write file");
    }

    #[test]
    fn load_descriptor_overwrites_version() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "go.mod", "module example.com/foo\n\ngo 1.21\n");

        let mf = load_descriptor(tmp.path(), "v0.0.0-20240102030405-0123456789ab")
            .expect("load descriptor");
        let id = mf.module_id().expect("module");
        assert_eq!(id.path, "example.com/foo");
        assert_eq!(id.version, "v0.0.0-20240102030405-0123456789ab");
    }

    #[test]
    fn missing_descriptor_names_the_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = load_descriptor(tmp.path(), "v1.0.0").expect_err("missing go.mod");
        let msg = format!("{:#}", err);
        let expected = tmp.path().join("go.mod");
        assert!(msg.starts_with("error opening "), "{msg}");
        assert!(msg.contains(&expected.display().to_string()), "{msg}");
    }

    #[test]
    fn descriptor_without_module_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "go.mod", "go 1.21\n");
        let err = load_descriptor(tmp.path(), "v1.0.0").expect_err("no module");
        assert_eq!(err.to_string(), "parsed module should not be nil");
    }

    #[test]
    fn malformed_descriptor_is_wrapped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write(tmp.path(), "go.mod", "module example.com/foo\nbogus line\n");
        let err = load_descriptor(tmp.path(), "v1.0.0").expect_err("parse error");
        let msg = format!("{:#}", err);
        assert!(msg.starts_with("error parsing module file: "), "{msg}");
        assert!(msg.contains(":2: unknown directive: bogus"), "{msg}");
    }

    #[test]
    fn write_archive_matches_direct_build_and_is_idempotent() {
        let src = tempfile::tempdir().expect("src");
        let out = tempfile::tempdir().expect("out");
        write(src.path(), "go.mod", "module example.com/foo\n");
        write(src.path(), "foo.go", "package foo\n");
        let out_dir = out.path().join("example.com/foo/@v");
        fs::create_dir_all(&out_dir).expect("mkdir out");

        let mf = load_descriptor(src.path(), "v1.4.0").expect("descriptor");
        let packed = write_archive(src.path(), &mf, &out_dir).expect("write archive");
        assert_eq!(packed.path, out_dir.join("v1.4.0.zip"));

        let written = fs::read(&packed.path).expect("read zip");
        let direct = create_from_dir(mf.module_id().expect("module"), src.path()).expect("direct");
        assert_eq!(written, direct);
        assert_eq!(packed.size, written.len());
        assert_eq!(packed.hash, hash_zip(&written).expect("hash"));

        write_archive(src.path(), &mf, &out_dir).expect("second write");
        assert_eq!(fs::read(&packed.path).expect("reread zip"), written);

        let entries: Vec<_> = fs::read_dir(&out_dir).expect("list out").collect();
        assert_eq!(entries.len(), 1, "only the zip should remain in the output dir");
    }

    #[cfg(unix)]
    #[test]
    fn written_archive_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let src = tempfile::tempdir().expect("src");
        let out = tempfile::tempdir().expect("out");
        write(src.path(), "go.mod", "module example.com/foo\n");

        let mf = load_descriptor(src.path(), "v1.0.0").expect("descriptor");
        let packed = write_archive(src.path(), &mf, out.path()).expect("write archive");
        let mode = fs::metadata(&packed.path).expect("stat").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn rejected_tree_leaves_no_output() {
        let src = tempfile::tempdir().expect("src");
        let out = tempfile::tempdir().expect("out");
        write(src.path(), "go.mod", "module example.com/foo\n");
        write(src.path(), "bad:name.go", "package foo\n");

        let mf = load_descriptor(src.path(), "v1.0.0").expect("descriptor");
        let err = write_archive(src.path(), &mf, out.path()).expect_err("bad file name");
        assert!(format!("{:#}", err).starts_with("create zip from dir: "), "{err:#}");
        assert_eq!(fs::read_dir(out.path()).expect("list out").count(), 0);
    }

    #[test]
    fn missing_output_dir_is_a_write_failure() {
        let src = tempfile::tempdir().expect("src");
        let out = tempfile::tempdir().expect("out");
        write(src.path(), "go.mod", "module example.com/foo\n");
        let missing = out.path().join("does/not/exist");

        let mf = load_descriptor(src.path(), "v1.0.0").expect("descriptor");
        let err = write_archive(src.path(), &mf, &missing).expect_err("missing dir");
        assert!(format!("{:#}", err).starts_with("writing zip file: "), "{err:#}");
        assert!(!missing.exists());
        assert_eq!(fs::read_dir(out.path()).expect("list out").count(), 0);
    }

    #[test]
    fn output_dir_that_is_a_file_is_a_write_failure() {
        let src = tempfile::tempdir().expect("src");
        let out = tempfile::tempdir().expect("out");
        write(src.path(), "go.mod", "module example.com/foo\n");
        let not_dir = out.path().join("@v");
        fs::write(&not_dir, "occupied").expect("placeholder file");

        let mf = load_descriptor(src.path(), "v1.0.0").expect("descriptor");
        let err = write_archive(src.path(), &mf, &not_dir).expect_err("file as dir");
        assert!(format!("{:#}", err).starts_with("writing zip file: "), "{err:#}");
        assert_eq!(fs::read(&not_dir).expect("placeholder"), b"occupied");
    }
}
