//! npm-style version range matching on top of the `semver` crate.
//!
//! `semver::VersionReq` follows Cargo's rules, which differ from npm's in a few
//! places: a bare version like `1.2.3` is a caret requirement in Cargo but an
//! exact match in npm, and npm additionally accepts hyphen ranges, x-ranges,
//! space-separated comparators, and `||` alternatives. Ranges are normalized
//! to Cargo syntax before parsing.

use semver::{Version, VersionReq};

/// A parsed npm range: satisfied if any alternative matches.
#[derive(Debug, Clone)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse an npm range such as `^1.0.0`, `1.x`, `>= 2.1.2 < 3`, or `^1 || ^2`.
    ///
    /// An empty range matches every version, as in npm.
    ///
    /// # Errors
    /// Returns an error if no alternative of the range can be parsed.
    pub fn parse(range: &str) -> Result<Self, semver::Error> {
        let mut alternatives = Vec::new();
        let mut last_err = None;

        for alt in range.split("||").map(str::trim) {
            match parse_alternative(alt) {
                Ok(req) => alternatives.push(req),
                Err(e) => last_err = Some(e),
            }
        }

        match (alternatives.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(Self { alternatives }),
        }
    }

    /// Returns true if `version` satisfies any alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Returns true if `version` satisfies the npm `range`.
///
/// Unparseable versions or ranges never satisfy; callers treat that the same
/// as an incompatible version.
#[must_use]
pub fn version_satisfies(version: &str, range: &str) -> bool {
    let Ok(version) = parse_version(version) else {
        return false;
    };
    VersionRange::parse(range).is_ok_and(|r| r.matches(&version))
}

/// Parse a version string, tolerating a leading `v` or `=`.
///
/// # Errors
/// Returns an error if the string is not a valid semver version.
pub fn parse_version(version: &str) -> Result<Version, semver::Error> {
    let version = version.trim();
    let version = version
        .strip_prefix('=')
        .unwrap_or(version)
        .trim_start_matches('v');
    Version::parse(version)
}

fn parse_alternative(range: &str) -> Result<VersionReq, semver::Error> {
    let range = range.trim();

    if range.is_empty() {
        return Ok(VersionReq::STAR);
    }

    // "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
    if let Some((start, end)) = parse_hyphen_range(range) {
        return VersionReq::parse(&format!(">={start}, <={end}"));
    }

    let comparators: Vec<String> = split_comparators(range)
        .into_iter()
        .map(|c| normalize_comparator(&c))
        .collect();

    VersionReq::parse(&comparators.join(", "))
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = range.split(" - ").collect();
    if parts.len() == 2 {
        let start = parts[0].trim();
        let end = parts[1].trim();
        if !start.is_empty() && !end.is_empty() {
            return Some((start.to_string(), end.to_string()));
        }
    }
    None
}

/// Split space-separated comparators, keeping a detached operator with its version.
///
/// `">= 2.1.2 < 3.0.0"` becomes `[">=2.1.2", "<3.0.0"]`.
fn split_comparators(range: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }
        if token_has_version(token) || token == "*" || token.eq_ignore_ascii_case("x") {
            out.push(format!("{pending_op}{token}"));
            pending_op.clear();
        } else {
            pending_op.push_str(token);
        }
    }

    if !pending_op.is_empty() {
        out.push(pending_op);
    }
    out
}

/// Check if a token contains a version number (has digits).
fn token_has_version(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

fn is_wildcard(part: &str) -> bool {
    part == "*" || part.eq_ignore_ascii_case("x")
}

/// Rewrite one npm comparator into Cargo requirement syntax.
fn normalize_comparator(comparator: &str) -> String {
    let op_len = comparator
        .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
        .unwrap_or(comparator.len());
    let (op, rest) = comparator.split_at(op_len);
    let rest = rest.trim_start_matches('v');

    if rest.is_empty() || rest == "*" || rest.eq_ignore_ascii_case("x") {
        return "*".to_string();
    }

    let parts: Vec<&str> = rest.split('.').collect();

    // x-ranges and partial versions
    match (op, parts.as_slice()) {
        ("" | "=", [major]) | ("" | "=", [major, "x" | "X" | "*"]) if !is_wildcard(major) => {
            if let Ok(m) = major.parse::<u64>() {
                if let Some(next) = m.checked_add(1) {
                    return format!(">={m}.0.0, <{next}.0.0");
                }
            }
        }
        ("" | "=", [major, minor])
        | ("" | "=", [major, minor, "x" | "X" | "*"])
            if !is_wildcard(minor) =>
        {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                if let Some(next) = n.checked_add(1) {
                    return format!(">={m}.{n}.0, <{m}.{next}.0");
                }
            }
        }
        (_, [_, ..]) if parts.iter().any(|p| is_wildcard(p)) => {
            let kept: Vec<&str> = parts
                .iter()
                .copied()
                .take_while(|p| !is_wildcard(p))
                .collect();
            if kept.is_empty() {
                return "*".to_string();
            }
            return format!("{op}{}", kept.join("."));
        }
        _ => {}
    }

    // A bare full version is an exact match in npm
    if op.is_empty() {
        return format!("={rest}");
    }

    format!("{op}{rest}")
}
