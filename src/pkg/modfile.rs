// Purpose: Parse go.mod module descriptors into a typed ModFile.
// Inputs/Outputs: Takes raw descriptor bytes plus a display name; yields ModFile or all line errors.
// Invariants: Every reported error carries the 1-based line it was found on.
// Gotchas: Block forms are limited to the verbs the go command accepts; `=>` must be its own token.

use std::fmt;

use crate::pkg::version::{canonical_version, parse_semver, split_path_major};

const BLOCK_VERBS: &[&str] = &[
    "module", "godebug", "require", "exclude", "replace", "retract", "tool", "ignore",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{file}:{line}: {msg}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub msg: String,
}

/// All errors found in one descriptor, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorList(pub Vec<ParseError>);

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleVersion {
    pub path: String,
    pub version: String,
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.path)
        } else {
            write!(f, "{}@{}", self.path, self.version)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub id: ModuleVersion,
    pub deprecated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Require {
    pub id: ModuleVersion,
    pub indirect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replace {
    pub old: ModuleVersion,
    /// Empty `version` means `path` is a local directory.
    pub new: ModuleVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retract {
    pub low: String,
    pub high: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Godebug {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModFile {
    pub module: Option<Module>,
    pub go: Option<String>,
    pub toolchain: Option<String>,
    pub godebug: Vec<Godebug>,
    pub require: Vec<Require>,
    pub exclude: Vec<ModuleVersion>,
    pub replace: Vec<Replace>,
    pub retract: Vec<Retract>,
    pub tool: Vec<String>,
    pub ignore: Vec<String>,
}

impl ModFile {
    /// Parses `data` as a go.mod file; `file` is only used in error messages.
    pub fn parse(file: &str, data: &[u8]) -> Result<Self, ErrorList> {
        let text = match std::str::from_utf8(data) {
            Ok(t) => t,
            Err(e) => {
                let line = data[..e.valid_up_to()]
                    .iter()
                    .filter(|b| **b == b'\n')
                    .count()
                    + 1;
                return Err(ErrorList(vec![ParseError {
                    file: file.to_string(),
                    line,
                    msg: "invalid UTF-8 encoding".to_string(),
                }]));
            }
        };

        let mut p = Parser {
            file,
            errs: vec![],
            mf: ModFile::default(),
        };
        let mut block: Option<(String, usize)> = None;
        let mut leading: Vec<String> = vec![];

        for (idx, raw) in text.lines().enumerate() {
            let no = idx + 1;
            let line = match lex_line(raw) {
                Ok(l) => l,
                Err(msg) => {
                    p.err(no, msg);
                    leading.clear();
                    continue;
                }
            };
            if line.tokens.is_empty() {
                match line.comment {
                    Some(c) => leading.push(c),
                    None => leading.clear(),
                }
                continue;
            }
            let before = std::mem::take(&mut leading);
            let suffix = line.comment.as_deref();

            if let Some((verb, _)) = &block {
                if line.tokens == [Token::Punct(')')] {
                    block = None;
                    continue;
                }
                let verb = verb.clone();
                p.directive(no, &verb, &line.tokens, &before, suffix);
                continue;
            }

            let (verb, args) = match line.tokens.split_first() {
                Some((Token::Word(v), rest)) => (v.clone(), rest),
                Some((tok, _)) => {
                    p.err(no, format!("unexpected {}", tok));
                    continue;
                }
                None => continue,
            };
            if args == [Token::Punct('(')] {
                if BLOCK_VERBS.contains(&verb.as_str()) {
                    block = Some((verb, no));
                } else {
                    p.err(no, format!("unknown block type: {}", verb));
                }
                continue;
            }
            p.directive(no, &verb, args, &before, suffix);
        }
        if let Some((verb, start)) = block {
            p.err(start, format!("unterminated {} block", verb));
        }

        if p.errs.is_empty() {
            Ok(p.mf)
        } else {
            Err(ErrorList(p.errs))
        }
    }

    pub fn module_id(&self) -> Option<&ModuleVersion> {
        self.module.as_ref().map(|m| &m.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Punct(char),
}

impl Token {
    fn text(&self) -> Option<&str> {
        match self {
            Token::Word(s) | Token::Quoted(s) => Some(s),
            Token::Punct(_) => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(s) => f.write_str(s),
            Token::Quoted(s) => write!(f, "{:?}", s),
            Token::Punct(c) => write!(f, "{}", c),
        }
    }
}

struct Line {
    tokens: Vec<Token>,
    comment: Option<String>,
}

fn lex_line(src: &str) -> Result<Line, String> {
    let mut tokens = vec![];
    let mut comment = None;
    let mut pos = 0usize;
    while let Some(c) = src[pos..].chars().next() {
        let rest = &src[pos..];
        match c {
            ' ' | '\t' | '\r' => pos += 1,
            '/' if rest.starts_with("//") => {
                comment = Some(rest[2..].trim().to_string());
                break;
            }
            '/' if rest.starts_with("/*") => return Err("/* comments are not allowed".to_string()),
            '(' | ')' | '[' | ']' | ',' => {
                tokens.push(Token::Punct(c));
                pos += 1;
            }
            '"' => {
                let (s, used) = lex_quoted(rest)?;
                tokens.push(Token::Quoted(s));
                pos += used;
            }
            '`' => {
                let close = rest[1..]
                    .find('`')
                    .ok_or_else(|| "unterminated raw string".to_string())?;
                tokens.push(Token::Quoted(rest[1..1 + close].to_string()));
                pos += close + 2;
            }
            c if c == '{' || c == '}' || c.is_control() || c.is_whitespace() => {
                return Err(format!("unexpected input character {:?}", c));
            }
            _ => {
                let mut end = src.len();
                for (j, d) in rest.char_indices() {
                    if d.is_whitespace()
                        || matches!(d, '(' | ')' | '[' | ']' | ',' | '{' | '}')
                        || rest[j..].starts_with("//")
                    {
                        end = pos + j;
                        break;
                    }
                }
                tokens.push(Token::Word(src[pos..end].to_string()));
                pos = end;
            }
        }
    }
    Ok(Line { tokens, comment })
}

/// Decodes a Go interpreted string literal at the start of `src`.
/// Returns the value and the number of bytes consumed, quotes included.
fn lex_quoted(src: &str) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut chars = src.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let (_, e) = chars
                    .next()
                    .ok_or_else(|| "unterminated quoted string".to_string())?;
                let decoded = match e {
                    'a' => '\x07',
                    'b' => '\x08',
                    'f' => '\x0c',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'v' => '\x0b',
                    '\\' | '"' | '\'' => e,
                    'x' | 'u' | 'U' | '0'..='7' => {
                        let (radix, width, mut digits) = match e {
                            'x' => (16, 2, String::new()),
                            'u' => (16, 4, String::new()),
                            'U' => (16, 8, String::new()),
                            _ => (8, 2, e.to_string()),
                        };
                        for _ in 0..width {
                            let (_, d) = chars
                                .next()
                                .ok_or_else(|| "unterminated quoted string".to_string())?;
                            digits.push(d);
                        }
                        u32::from_str_radix(&digits, radix)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| format!("invalid escape \\{}", digits))?
                    }
                    other => return Err(format!("invalid escape \\{}", other)),
                };
                out.push(decoded);
            }
            '\n' => break,
            _ => out.push(c),
        }
    }
    Err("unterminated quoted string".to_string())
}

fn is_indirect(comment: Option<&str>) -> bool {
    let Some(c) = comment else {
        return false;
    };
    let fields: Vec<&str> = c.split_whitespace().collect();
    matches!(fields.as_slice(), ["indirect"]) || fields.first() == Some(&"indirect;")
}

fn deprecation(before: &[String], suffix: Option<&str>) -> Option<String> {
    before
        .iter()
        .map(String::as_str)
        .chain(suffix)
        .find_map(|c| c.strip_prefix("Deprecated:"))
        .map(|msg| msg.trim().to_string())
}

/// Reports whether a replacement target is a filesystem path rather than a module path.
pub fn is_directory_path(p: &str) -> bool {
    let bytes = p.as_bytes();
    p == "."
        || p == ".."
        || p.starts_with("./")
        || p.starts_with("../")
        || p.starts_with(".\\")
        || p.starts_with("..\\")
        || p.starts_with('/')
        || p.starts_with('\\')
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/'))
}

/// Canonicalizes a requirement version and checks that its major agrees
/// with the path's `/vN` suffix.
fn check_module_version(path: &str, version: &str) -> Result<String, String> {
    let canon = canonical_version(version)
        .ok_or_else(|| format!("version {:?} invalid: must be of the form v1.2.3", version))?;
    let v = parse_semver(&canon).map_err(|e| e.to_string())?;
    let incompatible = v.build.as_str() == "incompatible";
    if path.starts_with("gopkg.in/") {
        return Ok(canon);
    }
    match split_path_major(path).1 {
        Some(_) if incompatible => Err(format!(
            "{}@{}: invalid version: +incompatible suffix not allowed: module path includes a major version suffix",
            path, version
        )),
        Some(m) if m != v.major => Err(format!(
            "{}@{}: invalid version: should be v{}, not v{}",
            path, version, m, v.major
        )),
        None if v.major >= 2 && !incompatible => Err(format!(
            "{}@{}: invalid version: should be v0 or v1, not v{}",
            path, version, v.major
        )),
        _ => Ok(canon),
    }
}

struct Parser<'a> {
    file: &'a str,
    errs: Vec<ParseError>,
    mf: ModFile,
}

impl Parser<'_> {
    fn err(&mut self, line: usize, msg: impl Into<String>) {
        self.errs.push(ParseError {
            file: self.file.to_string(),
            line,
            msg: msg.into(),
        });
    }

    fn words<'t>(&mut self, no: usize, verb: &str, args: &'t [Token]) -> Option<Vec<&'t str>> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            match a.text() {
                Some(t) => out.push(t),
                None => {
                    self.err(no, format!("{}: unexpected {}", verb, a));
                    return None;
                }
            }
        }
        Some(out)
    }

    fn directive(
        &mut self,
        no: usize,
        verb: &str,
        args: &[Token],
        before: &[String],
        suffix: Option<&str>,
    ) {
        match verb {
            "retract" => return self.retract(no, args, before, suffix),
            "module" | "go" | "toolchain" | "godebug" | "require" | "exclude" | "replace"
            | "tool" | "ignore" => {}
            _ => return self.err(no, format!("unknown directive: {}", verb)),
        }
        let Some(words) = self.words(no, verb, args) else {
            return;
        };
        match verb {
            "module" => {
                if self.mf.module.is_some() {
                    return self.err(no, "repeated module statement");
                }
                let [path] = words.as_slice() else {
                    return self.err(no, "usage: module module/path");
                };
                self.mf.module = Some(Module {
                    id: ModuleVersion {
                        path: path.to_string(),
                        version: String::new(),
                    },
                    deprecated: deprecation(before, suffix),
                });
            }
            "go" => {
                if self.mf.go.is_some() {
                    return self.err(no, "repeated go statement");
                }
                let [v] = words.as_slice() else {
                    return self.err(no, "go directive expects exactly one argument");
                };
                if !is_go_version(v) {
                    return self.err(
                        no,
                        format!("invalid go version '{}': must match format 1.23.0", v),
                    );
                }
                self.mf.go = Some(v.to_string());
            }
            "toolchain" => {
                if self.mf.toolchain.is_some() {
                    return self.err(no, "repeated toolchain statement");
                }
                let [name] = words.as_slice() else {
                    return self.err(no, "toolchain directive expects exactly one argument");
                };
                if *name != "default" && !(*name == "go1" || name.starts_with("go1.")) {
                    return self.err(
                        no,
                        format!("invalid toolchain version '{}': must match format go1.23.0 or default", name),
                    );
                }
                self.mf.toolchain = Some(name.to_string());
            }
            "godebug" => {
                let parsed = match words.as_slice() {
                    [kv] if !kv.contains(['"', '`', '\'', ',']) => kv.split_once('='),
                    _ => None,
                };
                match parsed {
                    Some((key, value)) if !key.is_empty() => self.mf.godebug.push(Godebug {
                        key: key.to_string(),
                        value: value.to_string(),
                    }),
                    _ => self.err(no, "usage: godebug key=value"),
                }
            }
            "require" | "exclude" => {
                let [path, version] = words.as_slice() else {
                    return self.err(no, format!("usage: {} module/path v1.2.3", verb));
                };
                let version = match check_module_version(path, version) {
                    Ok(v) => v,
                    Err(msg) => return self.err(no, format!("{}: {}", verb, msg)),
                };
                let id = ModuleVersion {
                    path: path.to_string(),
                    version,
                };
                if verb == "require" {
                    self.mf.require.push(Require {
                        id,
                        indirect: is_indirect(suffix),
                    });
                } else {
                    self.mf.exclude.push(id);
                }
            }
            "replace" => self.replace(no, &words),
            "tool" | "ignore" => {
                let [path] = words.as_slice() else {
                    return self.err(no, format!("{} directive expects exactly one argument", verb));
                };
                let list = if verb == "tool" {
                    &mut self.mf.tool
                } else {
                    &mut self.mf.ignore
                };
                list.push(path.to_string());
            }
            _ => unreachable!("verb filtered above"),
        }
    }

    fn replace(&mut self, no: usize, words: &[&str]) {
        let usage = "usage: replace module/path [v1.2.3] => other/module v1.4\n\t or replace module/path [v1.2.3] => ../local/directory";
        let Some(arrow) = words.iter().position(|w| *w == "=>") else {
            return self.err(no, usage);
        };
        let (lhs, rhs) = (&words[..arrow], &words[arrow + 1..]);
        let old = match lhs {
            [path] => ModuleVersion {
                path: path.to_string(),
                version: String::new(),
            },
            [path, version] => {
                match check_module_version(path, version) {
                    Ok(version) => ModuleVersion {
                        path: path.to_string(),
                        version,
                    },
                    Err(msg) => return self.err(no, format!("replace: {}", msg)),
                }
            }
            _ => return self.err(no, usage),
        };
        let new = match rhs {
            [path] => {
                if !is_directory_path(path) {
                    return self.err(
                        no,
                        "replacement module without version must be directory path (rooted or starting with ./ or ../)",
                    );
                }
                ModuleVersion {
                    path: path.to_string(),
                    version: String::new(),
                }
            }
            [path, version] => {
                if is_directory_path(path) {
                    return self.err(
                        no,
                        format!("replacement module directory path {:?} cannot have version", path),
                    );
                }
                match check_module_version(path, version) {
                    Ok(version) => ModuleVersion {
                        path: path.to_string(),
                        version,
                    },
                    Err(msg) => return self.err(no, format!("replace: {}", msg)),
                }
            }
            _ => return self.err(no, usage),
        };
        self.mf.replace.push(Replace { old, new });
    }

    fn retract(&mut self, no: usize, args: &[Token], before: &[String], suffix: Option<&str>) {
        let (low, high) = match args {
            [Token::Word(v)] | [Token::Quoted(v)] => (v.clone(), v.clone()),
            [Token::Punct('['), low, Token::Punct(','), high, Token::Punct(']')] => {
                match (low.text(), high.text()) {
                    (Some(l), Some(h)) => (l.to_string(), h.to_string()),
                    _ => return self.err(no, "usage: retract version | retract [low, high]"),
                }
            }
            _ => return self.err(no, "usage: retract version | retract [low, high]"),
        };
        let canon = |v: &str| {
            canonical_version(v).ok_or_else(|| {
                format!("retract: version {:?} invalid: must be of the form v1.2.3", v)
            })
        };
        let (low, high) = match (canon(&low), canon(&high)) {
            (Ok(l), Ok(h)) => (l, h),
            (Err(msg), _) | (_, Err(msg)) => return self.err(no, msg),
        };
        if let (Ok(l), Ok(h)) = (parse_semver(&low), parse_semver(&high))
            && l > h
        {
            return self.err(
                no,
                "version interval lower bound must be less than or equal to upper bound",
            );
        }
        let rationale = match suffix {
            Some(s) => s.to_string(),
            None => before.join("\n"),
        };
        self.mf.retract.push(Retract {
            low,
            high,
            rationale,
        });
    }
}

fn is_go_version(v: &str) -> bool {
    fn number(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
    }
    let core_end = v
        .find(|c: char| c.is_ascii_lowercase())
        .unwrap_or(v.len());
    let (core, pre) = v.split_at(core_end);
    if !pre.is_empty() {
        let digits_at = pre
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(pre.len());
        let (letters, digits) = pre.split_at(digits_at);
        if letters.is_empty()
            || !letters.bytes().all(|b| b.is_ascii_lowercase())
            || digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return false;
        }
    }
    let parts: Vec<&str> = core.split('.').collect();
    (parts.len() == 2 || parts.len() == 3)
        && parts.iter().all(|p| number(p))
        && parts[0] != "0"
}
