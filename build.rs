use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=GOMOD_ZIP_GIT_COMMIT");

    let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let commit = match env::var("GOMOD_ZIP_GIT_COMMIT") {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => {
            println!("cargo:rerun-if-changed=.git/HEAD");
            println!("cargo:rerun-if-changed=.git/index");
            head_commit()
        }
    };

    let version = match commit {
        Some(c) => format!("{pkg_version} ({c})"),
        None => pkg_version,
    };
    println!("cargo:rustc-env=GOMOD_ZIP_VERSION={version}");
}

/// Short HEAD hash, suffixed with `-dirty` when tracked files have changes.
fn head_commit() -> Option<String> {
    let hash = git(&["rev-parse", "--short=12", "HEAD"])?;
    if hash.is_empty() {
        return None;
    }
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => Some(format!("{hash}-dirty")),
        _ => Some(hash),
    }
}

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}
