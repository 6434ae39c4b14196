//! Tag formats and canonical module versions.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use semver::Version;

use crate::error::{Error, Result};
use crate::types::ModuleVersion;

const NUMERIC_PLACEHOLDERS: &[&str] = &["major", "minor", "patch"];
const TEXT_PLACEHOLDERS: &[&str] = &["version", "build"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled tag format such as `v{major}.{minor}.{patch}` or `release/{version}`.
#[derive(Debug, Clone)]
pub struct TagFormat {
    raw: String,
    segments: Vec<Segment>,
    pattern: Regex,
}

impl TagFormat {
    pub fn compile(format: &str) -> Result<Self> {
        let segments = parse_segments(format)?;

        let mut pattern = String::from("^");
        let mut seen = Vec::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Placeholder(name) => {
                    if seen.contains(name) {
                        return Err(Error::MalformedTemplate(format!(
                            "placeholder {{{name}}} appears more than once in '{format}'"
                        )));
                    }
                    seen.push(name.clone());
                    if NUMERIC_PLACEHOLDERS.contains(&name.as_str()) {
                        pattern.push_str(&format!(r"(?P<{name}>\d+)"));
                    } else {
                        pattern.push_str(&format!(r"(?P<{name}>[^}}]+)"));
                    }
                }
            }
        }
        pattern.push('$');

        let pattern = Regex::new(&pattern)
            .map_err(|e| Error::MalformedTemplate(format!("invalid tag format '{format}': {e}")))?;

        Ok(Self {
            raw: format.to_string(),
            segments,
            pattern,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Captured placeholder values, or `None` when the tag does not match.
    #[must_use]
    pub fn captures(&self, tag: &str) -> Option<HashMap<String, String>> {
        let caps = self.pattern.captures(tag)?;
        Some(
            self.pattern
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect(),
        )
    }

    /// Derives the canonical version for a tag, or `None` when it does not match.
    #[must_use]
    pub fn derive_version(&self, tag: &str) -> Option<Version> {
        let captures = self.captures(tag)?;

        let candidate = if let Some(version) = captures.get("version") {
            version.clone()
        } else {
            let part = |name: &str| captures.get(name).map_or("0", String::as_str).to_string();
            let mut version = format!("{}.{}.{}", part("major"), part("minor"), part("patch"));
            if let Some(build) = captures.get("build").filter(|b| !b.is_empty()) {
                version.push('-');
                version.push_str(build);
            }
            version
        };

        parse_canonical(&candidate).ok()
    }

    /// Renders the git tag that corresponds to `version`.
    pub fn render_tag(&self, version: &Version) -> Result<String> {
        let names: Vec<&str> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect();

        if !version.pre.is_empty() && !names.contains(&"version") && !names.contains(&"build") {
            return Err(Error::Validation(format!(
                "tag format '{}' cannot express pre-release version {version}",
                self.raw
            )));
        }

        let mut tag = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => tag.push_str(text),
                Segment::Placeholder(name) => match name.as_str() {
                    "version" => tag.push_str(&version.to_string()),
                    "major" => tag.push_str(&version.major.to_string()),
                    "minor" => tag.push_str(&version.minor.to_string()),
                    "patch" => tag.push_str(&version.patch.to_string()),
                    _ => tag.push_str(version.pre.as_str()),
                },
            }
        }
        Ok(tag)
    }
}

fn parse_segments(format: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(Error::MalformedTemplate(format!(
                                "unclosed placeholder in tag format '{format}'"
                            )));
                        }
                        Some(c) => name.push(c),
                    }
                }
                if !NUMERIC_PLACEHOLDERS.contains(&name.as_str())
                    && !TEXT_PLACEHOLDERS.contains(&name.as_str())
                {
                    return Err(Error::MalformedTemplate(format!(
                        "unknown placeholder {{{name}}} in tag format '{format}'"
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name));
            }
            '}' => {
                return Err(Error::MalformedTemplate(format!(
                    "unbalanced '}}' in tag format '{format}'"
                )));
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

/// Parses `MAJOR.MINOR.PATCH[-PRE]`. Leading `v` and build metadata are rejected.
pub fn parse_canonical(version: &str) -> Result<Version> {
    if version.starts_with(['v', 'V']) {
        return Err(Error::Validation(format!(
            "version '{version}' must not start with 'v'"
        )));
    }
    let parsed = Version::parse(version)
        .map_err(|e| Error::Validation(format!("invalid version '{version}': {e}")))?;
    if !parsed.build.is_empty() {
        return Err(Error::Validation(format!(
            "version '{version}' must not carry build metadata"
        )));
    }
    Ok(parsed)
}

#[must_use]
pub fn is_beta(version: &Version) -> bool {
    !version.pre.is_empty()
}

/// Highest published, non-beta version by semver ordering.
#[must_use]
pub fn latest_published(versions: &[ModuleVersion]) -> Option<&ModuleVersion> {
    versions
        .iter()
        .filter(|v| v.published && !v.beta)
        .filter_map(|v| v.semver().map(|sv| (sv, v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v)
}

/// Newest first by semver; unparseable rows sort last.
pub fn sort_newest_first(versions: &mut [ModuleVersion]) {
    versions.sort_by(|a, b| match (a.semver(), b.semver()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.version.cmp(&a.version),
    });
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn row(version: &str, published: bool) -> ModuleVersion {
        let beta = Version::parse(version).map(|v| is_beta(&v)).unwrap_or(false);
        ModuleVersion {
            id: version.to_string(),
            provider_id: "p".to_string(),
            version: version.to_string(),
            published,
            beta,
            git_tag: format!("v{version}"),
            commit_sha: "0".repeat(40),
            published_at: None,
            indexed_at: Utc::now(),
            details_id: "d".to_string(),
            tar_sha256: String::new(),
            zip_sha256: String::new(),
        }
    }

    #[test]
    fn test_version_placeholder() {
        let format = TagFormat::compile("v{version}").unwrap();
        assert_eq!(format.derive_version("v1.2.3").unwrap().to_string(), "1.2.3");
        assert!(format.derive_version("1.2.3").is_none());
        assert!(format.derive_version("vfoo").is_none());
    }

    #[test]
    fn test_components_with_build() {
        let format = TagFormat::compile("release/{major}.{minor}.{patch}-{build}").unwrap();
        let version = format.derive_version("release/2.0.0-rc1").unwrap();
        assert_eq!(version.to_string(), "2.0.0-rc1");
        assert!(is_beta(&version));
    }

    #[test]
    fn test_missing_components_default_to_zero() {
        let format = TagFormat::compile("v{major}").unwrap();
        assert_eq!(format.derive_version("v7").unwrap().to_string(), "7.0.0");
        assert!(format.derive_version("v7.1").is_none());
    }

    #[test]
    fn test_literal_metacharacters_escaped() {
        let format = TagFormat::compile("mod+{major}.{minor}.{patch}").unwrap();
        assert!(format.derive_version("mod+1.0.0").is_some());
        assert!(format.derive_version("moddd1.0.0").is_none());
        assert!(format.derive_version("mod+1x0.0").is_none());
    }

    #[test]
    fn test_unknown_placeholder_is_malformed() {
        assert!(matches!(
            TagFormat::compile("v{foo}"),
            Err(Error::MalformedTemplate(_))
        ));
        assert!(matches!(
            TagFormat::compile("v{major"),
            Err(Error::MalformedTemplate(_))
        ));
        assert!(matches!(
            TagFormat::compile("v{major}}"),
            Err(Error::MalformedTemplate(_))
        ));
        assert!(matches!(
            TagFormat::compile("{major}.{major}"),
            Err(Error::MalformedTemplate(_))
        ));
    }

    #[test]
    fn test_render_tag_round_trip() {
        for fmt in ["v{major}.{minor}.{patch}", "release/{version}", "{major}.{minor}.{patch}"] {
            let format = TagFormat::compile(fmt).unwrap();
            for v in ["0.0.1", "1.2.3", "10.20.30"] {
                let version = parse_canonical(v).unwrap();
                let tag = format.render_tag(&version).unwrap();
                assert_eq!(format.derive_version(&tag), Some(version), "{fmt} {tag}");
            }
        }
    }

    #[test]
    fn test_render_tag_rejects_unexpressible_prerelease() {
        let format = TagFormat::compile("v{major}.{minor}.{patch}").unwrap();
        let version = parse_canonical("1.0.0-beta").unwrap();
        assert!(format.render_tag(&version).is_err());

        let format = TagFormat::compile("v{version}").unwrap();
        assert_eq!(format.render_tag(&version).unwrap(), "v1.0.0-beta");
    }

    #[test]
    fn test_parse_canonical() {
        assert!(parse_canonical("1.2.3").is_ok());
        assert!(parse_canonical("1.2.3-rc.1").is_ok());
        assert!(parse_canonical("v1.2.3").is_err());
        assert!(parse_canonical("1.2").is_err());
        assert!(parse_canonical("1..3").is_err());
        assert!(parse_canonical("1.2.3+build").is_err());
    }

    #[test]
    fn test_latest_published_skips_beta_and_unpublished() {
        let versions = vec![
            row("1.0.0", true),
            row("1.10.0", true),
            row("1.9.0", true),
            row("2.0.0-rc1", true),
            row("3.0.0", false),
        ];
        assert_eq!(latest_published(&versions).unwrap().version, "1.10.0");

        let versions = vec![row("2.0.0-rc1", true), row("1.0.0", false)];
        assert!(latest_published(&versions).is_none());
    }

    #[test]
    fn test_sort_newest_first() {
        let mut versions = vec![row("1.2.0", true), row("1.10.0", true), row("1.2.0-rc1", true)];
        sort_newest_first(&mut versions);
        let order: Vec<_> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(order, vec!["1.10.0", "1.2.0", "1.2.0-rc1"]);
    }
}
