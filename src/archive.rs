//! Deterministic `source.tar.gz` / `source.zip` packaging of a module tree.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Error, Result};
use crate::storage::ArchiveKind;

const GZIP_LEVEL: u32 = 6;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn package_error(what: &str, e: impl std::fmt::Display) -> Error {
    Error::Storage(format!("failed to package {what}: {e}"))
}

/// Glob rules for paths left out of archives. `.git` is always excluded.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIgnore {
    patterns: Vec<Pattern>,
}

impl ArchiveIgnore {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.trim_end_matches('/'))
                    .map_err(|e| Error::Config(format!("invalid archive ignore pattern '{p}': {e}")))
            })
            .collect::<Result<_>>()?;
        Ok(Self { patterns })
    }

    /// `rel` is `/`-separated and relative to the archive root.
    #[must_use]
    pub fn is_ignored(&self, rel: &str) -> bool {
        if rel == ".git" || rel.starts_with(".git/") {
            return true;
        }
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.patterns
            .iter()
            .any(|p| p.matches_with(rel, MATCH_OPTIONS) || p.matches_with(name, MATCH_OPTIONS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    rel: String,
    path: PathBuf,
    is_dir: bool,
    executable: bool,
}

#[derive(Debug, Clone)]
pub struct PackagedArchives {
    pub tar_gz: PathBuf,
    pub zip: PathBuf,
    pub tar_sha256: String,
    pub zip_sha256: String,
}

impl PackagedArchives {
    #[must_use]
    pub fn path(&self, kind: ArchiveKind) -> &Path {
        match kind {
            ArchiveKind::TarGz => &self.tar_gz,
            ArchiveKind::Zip => &self.zip,
        }
    }
}

/// Sorted entries under `root`, skipping ignored paths and symlinks.
fn collect_entries(root: &Path, ignore: &ArchiveIgnore) -> Result<Vec<Entry>> {
    let relative = |path: &Path| -> String {
        path.strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    };

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !ignore.is_ignored(&relative(e.path())));

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| package_error("module tree", e))?;
        let file_type = entry.file_type();
        if file_type.is_symlink() || !(file_type.is_dir() || file_type.is_file()) {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|e| package_error("module tree", e))?;
        entries.push(Entry {
            rel: relative(entry.path()),
            path: entry.path().to_path_buf(),
            is_dir: file_type.is_dir(),
            executable: is_executable(&metadata),
        });
    }
    entries.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(entries)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

fn mode_of(entry: &Entry) -> u32 {
    if entry.is_dir || entry.executable {
        0o755
    } else {
        0o644
    }
}

fn write_tar_gz(entries: &[Entry], out: &Path) -> Result<()> {
    let file = File::create(out).map_err(|e| package_error("source.tar.gz", e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::new(GZIP_LEVEL));
    let mut builder = Builder::new(encoder);

    for entry in entries {
        let mut header = Header::new_ustar();
        header.set_mode(mode_of(entry));
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if entry.is_dir {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &entry.rel, io::empty())
                .map_err(|e| package_error("source.tar.gz", e))?;
        } else {
            let file = File::open(&entry.path).map_err(|e| package_error(&entry.rel, e))?;
            let size = file
                .metadata()
                .map_err(|e| package_error(&entry.rel, e))?
                .len();
            header.set_entry_type(EntryType::Regular);
            header.set_size(size);
            builder
                .append_data(&mut header, &entry.rel, file)
                .map_err(|e| package_error("source.tar.gz", e))?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| package_error("source.tar.gz", e))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| package_error("source.tar.gz", e))?;
    writer.flush().map_err(|e| package_error("source.tar.gz", e))?;
    Ok(())
}

fn write_zip(entries: &[Entry], out: &Path) -> Result<()> {
    let file = File::create(out).map_err(|e| package_error("source.zip", e))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let base = SimpleFileOptions::default().last_modified_time(zip::DateTime::default());

    for entry in entries {
        let options = base.unix_permissions(mode_of(entry));
        if entry.is_dir {
            writer
                .add_directory(
                    format!("{}/", entry.rel),
                    options.compression_method(CompressionMethod::Stored),
                )
                .map_err(|e| package_error("source.zip", e))?;
        } else {
            writer
                .start_file(
                    entry.rel.clone(),
                    options.compression_method(CompressionMethod::Deflated),
                )
                .map_err(|e| package_error("source.zip", e))?;
            let mut file = File::open(&entry.path).map_err(|e| package_error(&entry.rel, e))?;
            io::copy(&mut file, &mut writer).map_err(|e| package_error(&entry.rel, e))?;
        }
    }

    let mut inner = writer
        .finish()
        .map_err(|e| package_error("source.zip", e))?;
    inner.flush().map_err(|e| package_error("source.zip", e))?;
    Ok(())
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| package_error("digest", e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| package_error("digest", e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Writes both archives of `root` into `out_dir`, which must lie outside `root`.
pub fn package(root: &Path, out_dir: &Path, ignore: &ArchiveIgnore) -> Result<PackagedArchives> {
    if out_dir.starts_with(root) {
        return Err(Error::Internal(
            "archive output directory is inside the module tree".to_string(),
        ));
    }
    std::fs::create_dir_all(out_dir).map_err(|e| package_error("output directory", e))?;

    let entries = collect_entries(root, ignore)?;

    let tar_gz = out_dir.join(ArchiveKind::TarGz.file_name());
    let zip = out_dir.join(ArchiveKind::Zip.file_name());
    write_tar_gz(&entries, &tar_gz)?;
    write_zip(&entries, &zip)?;

    Ok(PackagedArchives {
        tar_sha256: sha256_file(&tar_gz)?,
        zip_sha256: sha256_file(&zip)?,
        tar_gz,
        zip,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    use super::*;

    fn module_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::create_dir_all(root.join("modules/vpc")).unwrap();
        std::fs::create_dir_all(root.join("test/fixtures")).unwrap();
        std::fs::write(root.join("main.tf"), "resource \"null_resource\" \"x\" {}\n").unwrap();
        std::fs::write(root.join("README.md"), "# module\n").unwrap();
        std::fs::write(root.join("modules/vpc/main.tf"), "variable \"cidr\" {}\n").unwrap();
        std::fs::write(root.join("test/fixtures/data.json"), "{}").unwrap();
        dir
    }

    fn tar_names(path: &Path) -> Vec<(String, u32)> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.path()
                        .unwrap()
                        .to_string_lossy()
                        .trim_end_matches('/')
                        .to_string(),
                    e.header().mode().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_archives_are_sorted_and_exclude_git() {
        let tree = module_tree();
        let out = TempDir::new().unwrap();
        let ignore = ArchiveIgnore::new(&["test".to_string()]).unwrap();

        let packaged = package(tree.path(), out.path(), &ignore).unwrap();

        let names: Vec<String> = tar_names(&packaged.tar_gz).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["README.md", "main.tf", "modules", "modules/vpc", "modules/vpc/main.tf"]
        );

        let mut zip = zip::ZipArchive::new(File::open(&packaged.zip).unwrap()).unwrap();
        let zip_names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().trim_end_matches('/').to_string())
            .collect();
        assert_eq!(zip_names, names);

        let mut content = String::new();
        zip.by_name("modules/vpc/main.tf")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "variable \"cidr\" {}\n");
    }

    #[test]
    fn test_archives_are_deterministic() {
        let tree = module_tree();
        let out_a = TempDir::new().unwrap();
        let out_b = TempDir::new().unwrap();
        let ignore = ArchiveIgnore::default();

        let a = package(tree.path(), out_a.path(), &ignore).unwrap();
        let b = package(tree.path(), out_b.path(), &ignore).unwrap();

        assert_eq!(a.tar_sha256, b.tar_sha256);
        assert_eq!(a.zip_sha256, b.zip_sha256);
        assert_eq!(a.tar_sha256, sha256_file(&a.tar_gz).unwrap());
        assert_eq!(a.tar_sha256.len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn test_modes_are_normalized() {
        use std::os::unix::fs::PermissionsExt;

        let tree = module_tree();
        let script = tree.path().join("setup.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o700)).unwrap();
        std::fs::set_permissions(
            tree.path().join("main.tf"),
            std::fs::Permissions::from_mode(0o600),
        )
        .unwrap();

        let out = TempDir::new().unwrap();
        let packaged = package(tree.path(), out.path(), &ArchiveIgnore::default()).unwrap();
        let modes: std::collections::HashMap<String, u32> =
            tar_names(&packaged.tar_gz).into_iter().collect();

        assert_eq!(modes["setup.sh"], 0o755);
        assert_eq!(modes["main.tf"], 0o644);
        assert_eq!(modes["modules"], 0o755);
    }

    #[test]
    fn test_ignore_patterns() {
        let ignore =
            ArchiveIgnore::new(&["*.tfstate".to_string(), "docs/**".to_string()]).unwrap();
        assert!(ignore.is_ignored(".git"));
        assert!(ignore.is_ignored(".git/config"));
        assert!(ignore.is_ignored("terraform.tfstate"));
        assert!(ignore.is_ignored("nested/terraform.tfstate"));
        assert!(ignore.is_ignored("docs/index.md"));
        assert!(!ignore.is_ignored("main.tf"));
        assert!(!ignore.is_ignored(".github/workflows/ci.yml"));
        assert!(ArchiveIgnore::new(&["[".to_string()]).is_err());
    }

    #[test]
    fn test_output_inside_root_rejected() {
        let tree = module_tree();
        let err = package(tree.path(), &tree.path().join("out"), &ArchiveIgnore::default());
        assert!(err.is_err());
    }
}
