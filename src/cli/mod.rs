// Purpose: Command-line entry for packaging a local module into the module download cache.
// Inputs/Outputs: Parses flags, runs load -> zip -> write, and maps any failure to exit code 1.
// Invariants: Flag validation finishes before any filesystem access.
// Gotchas: Success prints nothing on stdout; diagnostics go to stderr through tracing.

use anyhow::{Context, bail};
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::pkg::cache::{download_dir, gopath_root, source_dir};
use crate::pkg::modzip::check_import_path;
use crate::pkg::pack::{self, PackedArchive};
use crate::pkg::version::{PseudoVersion, major_mismatch};

/// Creates a zip file at
/// $GOPATH/pkg/mod/cache/download/<package-name>/@v[/vN]/<pseudo-version>.zip
/// with the same hash as if it were created by `go mod download`.
///
/// Use it to package modules that have not been published anywhere and only
/// exist locally. The module must already be checked out at
/// $GOPATH/src/<package-name>, at the commit the pseudo-version points to,
/// and the download directory must already exist.
/// package-name should be the import path of the module.
#[derive(Debug, Clone, Parser)]
#[command(name = "gomod-zip", version = env!("GOMOD_ZIP_VERSION"))]
pub struct Cli {
    /// Import path of the module to zip
    #[arg(long, default_value = "")]
    pub package_name: String,

    /// Version to zip the module at (leading `v` optional)
    #[arg(long, default_value = "")]
    pub pseudo_version: String,

    /// Workspace root; defaults to $HOME/go
    #[arg(long, env = "GOPATH", value_name = "DIR")]
    pub gopath: Option<PathBuf>,
}

pub fn run_cli<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return err.exit_code();
        }
    };
    init_logging();
    match run(&cli) {
        Ok(_) => 0,
        Err(err) => {
            error!("{:#}", err);
            1
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Validates the flags, then packages the module and reports where the zip went.
pub fn run(cli: &Cli) -> anyhow::Result<PackedArchive> {
    if cli.package_name.is_empty() {
        bail!("package-name cannot be empty");
    }
    if cli.pseudo_version.is_empty() {
        bail!("pseudo-version cannot be empty");
    }
    let version =
        PseudoVersion::parse(&cli.pseudo_version).context("error parsing pseudo-version")?;
    if let Err(reason) = check_import_path(&cli.package_name) {
        bail!("invalid package-name {:?}: {}", cli.package_name, reason);
    }
    if !version.is_pseudo() {
        debug!(version = version.as_str(), "version is not a pseudo-version");
    }

    let root = gopath_root(cli.gopath.as_deref())?;
    let package_path = source_dir(&root, &cli.package_name);
    let cache_dir = download_dir(&root, &cli.package_name, &version);
    debug!(
        source = %package_path.display(),
        cache = %cache_dir.display(),
        "resolved module locations"
    );

    let module_file = pack::load_descriptor(&package_path, version.as_str())
        .context("error getting module file")?;
    if let Some(module) = &module_file.module {
        if let Some(note) = &module.deprecated {
            info!(module = %module.id.path, "module is deprecated: {}", note);
        }
        if let Some(msg) = major_mismatch(&module.id.path, &version) {
            warn!("{}", msg);
        }
    }

    let packed = pack::write_archive(&package_path, &module_file, &cache_dir)
        .context("error creating zip archive")?;
    info!(
        path = %packed.path.display(),
        size = packed.size,
        hash = %packed.hash,
        "wrote module zip"
    );
    Ok(packed)
}
