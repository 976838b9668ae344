// Purpose: Compute the `h1:` content hash the go command records for module zips.
// Inputs/Outputs: Reads archive bytes in memory and returns `h1:<base64 sha256>`.
// Invariants: Hash depends only on entry names and contents, never on entry order or zip framing.
// Gotchas: Entry names containing a newline cannot be hashed (the summary format is line based).

use anyhow::{Context, bail};
use base64::Engine;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Hashes every file entry of a module zip the way `go.sum` expects.
pub fn hash_zip(bytes: &[u8]) -> anyhow::Result<String> {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).context("invalid zip archive")?;
    let mut names: Vec<String> = zip
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut summary = Sha256::new();
    for name in names {
        if name.contains('\n') {
            bail!("dirhash: filenames with newlines are not supported");
        }
        let mut f = zip
            .by_name(&name)
            .with_context(|| format!("open zip entry {}", name))?;
        let mut h = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = f
                .read(&mut buf)
                .with_context(|| format!("read zip entry {}", name))?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
        }
        summary.update(format!("{}  {}\n", hex::encode(h.finalize()), name).as_bytes());
    }
    Ok(format!(
        "h1:{}",
        base64::engine::general_purpose::STANDARD.encode(summary.finalize())
    ))
}

#[cfg(test)]
mod tests {
    use super::hash_zip;
    use base64::Engine;
    use sha2::{Digest, Sha256};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::<u8>::new()));
        let opts = SimpleFileOptions::default();
        for (name, body) in entries {
            zip.start_file(*name, opts).expect("start entry");
            zip.write_all(body.as_bytes()).expect("write entry");
        }
        zip.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn hash_matches_go_dirhash_for_known_input() {
        let bytes = zip_of(&[("m@v1.0.0/a.txt", "hello\n")]);
        let got = hash_zip(&bytes).expect("hash");
        let line = format!(
            "{}  m@v1.0.0/a.txt\n",
            hex::encode(Sha256::digest(b"hello\n"))
        );
        let want = format!(
            "h1:{}",
            base64::engine::general_purpose::STANDARD.encode(Sha256::digest(line.as_bytes()))
        );
        assert_eq!(got, want);
        assert!(got.starts_with("h1:"));
    }

    #[test]
    fn hash_ignores_entry_order() {
        let a = zip_of(&[("m@v1/a", "1"), ("m@v1/b", "2")]);
        let b = zip_of(&[("m@v1/b", "2"), ("m@v1/a", "1")]);
        assert_ne!(a, b);
        assert_eq!(hash_zip(&a).expect("hash a"), hash_zip(&b).expect("hash b"));
    }

    #[test]
    fn hash_detects_content_change() {
        let a = zip_of(&[("m@v1/a", "1")]);
        let b = zip_of(&[("m@v1/a", "2")]);
        assert_ne!(hash_zip(&a).expect("hash a"), hash_zip(&b).expect("hash b"));
    }

    #[test]
    fn garbage_is_not_a_zip() {
        assert!(hash_zip(b"definitely not a zip").is_err());
    }
}
