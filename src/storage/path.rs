use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

pub const MODULES_DIR: &str = "modules";
pub const UPLOAD_DIR: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 2] = [ArchiveKind::TarGz, ArchiveKind::Zip];

    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::TarGz => "source.tar.gz",
            Self::Zip => "source.zip",
        }
    }

    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::TarGz => "application/gzip",
            Self::Zip => "application/zip",
        }
    }

    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_name() == name)
    }
}

/// Logical key of a module version directory: `modules/<ns>/<mod>/<prov>/<ver>`.
pub fn version_dir(namespace: &str, module: &str, provider: &str, version: &str) -> Result<String> {
    for segment in [namespace, module, provider, version] {
        validate_segment(segment)?;
    }
    Ok(format!("{MODULES_DIR}/{namespace}/{module}/{provider}/{version}"))
}

pub fn archive_path(
    namespace: &str,
    module: &str,
    provider: &str,
    version: &str,
    kind: ArchiveKind,
) -> Result<String> {
    Ok(format!(
        "{}/{}",
        version_dir(namespace, module, provider, version)?,
        kind.file_name()
    ))
}

pub fn upload_path(filename: &str) -> Result<String> {
    validate_segment(filename)?;
    Ok(format!("{UPLOAD_DIR}/{filename}"))
}

/// Splits a logical key into validated segments.
pub fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(Error::Validation("storage path cannot be empty".to_string()));
    }
    for segment in &segments {
        validate_segment(segment)?;
    }
    Ok(segments)
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(Error::Validation(
            "path segment cannot be empty".to_string(),
        ));
    }

    if segment.len() > 255 {
        return Err(Error::Validation(
            "path segment cannot exceed 255 characters".to_string(),
        ));
    }

    if segment == "." || segment == ".." {
        return Err(Error::Validation(format!(
            "path segment '{segment}' is not allowed"
        )));
    }

    const INVALID_CHARS: &[char] = &['\0', '\n', '\r', '/', '\\'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::Validation(
            "path segment contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

/// Lexically normalizes a path: drops `.`, folds `..` into its parent.
#[must_use]
pub fn clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// Resolves symlinks through the deepest existing ancestor of `path`.
fn resolve(path: &Path) -> PathBuf {
    let cleaned = clean(path);
    let mut existing = cleaned.as_path();
    let mut missing = Vec::new();

    loop {
        if existing.exists() {
            return match existing.canonicalize() {
                Ok(mut resolved) => {
                    resolved.extend(missing.iter().rev());
                    resolved
                }
                Err(_) => cleaned.clone(),
            };
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return cleaned.clone(),
        }
    }
}

/// Joins `parts` under `base`. If the result escapes `base` (through `..`,
/// an absolute part, or a symlink), `base` itself is returned; callers treat
/// that as a traversal attempt.
#[must_use]
pub fn safe_join(base: &Path, parts: &[&str]) -> PathBuf {
    let mut joined = base.to_path_buf();
    for part in parts {
        joined.push(part);
    }

    let resolved = resolve(&joined);
    let resolved_base = resolve(base);

    match resolved.strip_prefix(&resolved_base) {
        Ok(relative) => base.join(relative),
        Err(_) => base.to_path_buf(),
    }
}
