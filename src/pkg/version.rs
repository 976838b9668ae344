// Purpose: Parse caller-supplied module versions and derive major-version path conventions.
// Inputs/Outputs: Accepts raw version strings (optionally `v`-prefixed) and yields semver data.
// Invariants: The raw string is kept verbatim; only parsing strips the single leading `v`.
// Gotchas: Pseudo-version shape and major-suffix checks are advisory and never reject input.

use regex::Regex;
use semver::Version;
use std::sync::LazyLock;

static PSEUDO_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^v[0-9]+\.(0\.0-|[0-9]+\.[0-9]+-([^+]*\.)?0\.)[0-9]{14}-[A-Za-z0-9]+(\+[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?$",
    )
    .expect("pseudo-version pattern")
});

/// Strict semver parse after dropping one optional leading `v`.
pub fn parse_semver(raw: &str) -> Result<Version, semver::Error> {
    Version::parse(raw.strip_prefix('v').unwrap_or(raw))
}

/// Canonical form of a `go.mod` version: `v1` and `v1.2` are padded to
/// `v1.0.0` and `v1.2.0`, and build metadata is dropped except `+incompatible`.
/// Returns `None` when the text is not a valid `v`-prefixed semantic version.
pub fn canonical_version(raw: &str) -> Option<String> {
    let rest = raw.strip_prefix('v')?;
    let (rest, build) = match rest.split_once('+') {
        Some((r, b)) => (r, Some(b)),
        None => (rest, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((c, p)) => (c, Some(p)),
        None => (rest, None),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.len() > 3 || (parts.len() < 3 && (pre.is_some() || build.is_some())) {
        return None;
    }
    parts.resize(3, "0");

    let mut canon = format!("v{}", parts.join("."));
    if let Some(pre) = pre {
        canon.push('-');
        canon.push_str(pre);
    }
    let full = match build {
        Some(b) => format!("{}+{}", &canon[1..], b),
        None => canon[1..].to_string(),
    };
    Version::parse(&full).ok()?;
    if build == Some("incompatible") {
        canon.push_str("+incompatible");
    }
    Some(canon)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoVersion {
    raw: String,
    semver: Version,
}

impl PseudoVersion {
    pub fn parse(raw: &str) -> Result<Self, semver::Error> {
        let semver = parse_semver(raw)?;
        Ok(Self {
            raw: raw.to_string(),
            semver,
        })
    }

    /// The version exactly as the caller wrote it.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn semver(&self) -> &Version {
        &self.semver
    }

    pub fn major(&self) -> u64 {
        self.semver.major
    }

    /// `v<major>` for majors that need their own module path element.
    pub fn path_suffix(&self) -> Option<String> {
        (self.major() >= 2).then(|| format!("v{}", self.major()))
    }

    pub fn is_incompatible(&self) -> bool {
        self.semver.build.as_str() == "incompatible"
    }

    /// Reports whether the version has the `vX.Y.Z-yyyymmddhhmmss-rev` shape
    /// the go command synthesizes for untagged commits.
    pub fn is_pseudo(&self) -> bool {
        if self.raw.starts_with('v') {
            PSEUDO_VERSION_RE.is_match(&self.raw)
        } else {
            PSEUDO_VERSION_RE.is_match(&format!("v{}", self.raw))
        }
    }
}

/// Splits a trailing `/vN` (N >= 2, no leading zero) element off a module path.
pub fn split_path_major(path: &str) -> (&str, Option<u64>) {
    if let Some((prefix, last)) = path.rsplit_once('/')
        && !prefix.is_empty()
        && let Some(digits) = last.strip_prefix('v')
        && !digits.is_empty()
        && !digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
        && let Ok(major) = digits.parse::<u64>()
        && major >= 2
    {
        return (prefix, Some(major));
    }
    (path, None)
}

/// Describes a disagreement between a module path's `/vN` suffix and the
/// version's major number, or `None` when they are consistent.
pub fn major_mismatch(module_path: &str, version: &PseudoVersion) -> Option<String> {
    let major = version.major();
    match split_path_major(module_path).1 {
        Some(suffix) if suffix == major => None,
        None if major < 2 || version.is_incompatible() => None,
        Some(suffix) => Some(format!(
            "module path {} ends in /v{} but version {} has major version {}",
            module_path,
            suffix,
            version.as_str(),
            major
        )),
        None => Some(format!(
            "version {} has major version {} but module path {} has no /v{} suffix",
            version.as_str(),
            major,
            module_path,
            major
        )),
    }
}
