//! Structural analysis of a checked-out module tree.
//!
//! Nothing here evaluates HCL. Blocks are found lexically, which is enough
//! to list variables, outputs and resources and to pick up the declared
//! `required_version` constraint.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::types::{ChildKind, ModuleDetails, TemplateVariable, VariableTemplate};

const README_NAMES: &[&str] = &["README.md", "README.rst", "README.txt", "README"];
const VARIABLE_TEMPLATE_NAMES: &[&str] =
    &["variables.json", "variable_template.json", "variables.tf"];
const SUBMODULES_DIR: &str = "modules";
const EXAMPLES_DIR: &str = "examples";

static BLOCK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(variable|output|resource)((?:[ \t]+"[^"\n]*")+)[ \t]*\{"#)
        .expect("block header pattern is valid")
});

static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]*)""#).expect("label pattern is valid"));

static REQUIRED_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*required_version[ \t]*=[ \t]*"([^"\n]*)""#)
        .expect("required_version pattern is valid")
});

static DEFAULT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*default[ \t]*=").expect("default pattern is valid"));

static DESCRIPTION_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*description[ \t]*=[ \t]*"((?:[^"\\\n]|\\.)*)""#)
        .expect("description pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedFile {
    pub path: String,
    pub content: Vec<u8>,
    pub is_binary: bool,
}

#[derive(Debug, Clone)]
pub struct AnalyzedChild {
    pub kind: ChildKind,
    /// Path relative to the module root, `/`-separated.
    pub path: String,
    pub details: ModuleDetails,
    pub files: Vec<AnalyzedFile>,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub details: ModuleDetails,
    pub children: Vec<AnalyzedChild>,
}

impl Analysis {
    pub fn submodules(&self) -> impl Iterator<Item = &AnalyzedChild> {
        self.children
            .iter()
            .filter(|c| c.kind == ChildKind::Submodule)
    }

    pub fn examples(&self) -> impl Iterator<Item = &AnalyzedChild> {
        self.children.iter().filter(|c| c.kind == ChildKind::Example)
    }
}

fn malformed(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::MalformedModule(format!("{}: {e}", path.display()))
}

/// Analyzes the module rooted at `root` (the checkout joined with the
/// provider's git path).
pub fn analyze(root: &Path) -> Result<Analysis> {
    if !root.is_dir() {
        return Err(Error::MalformedModule(format!(
            "module directory {} does not exist",
            root.display()
        )));
    }

    let details = analyze_directory(root, true)?;

    let mut children = Vec::new();
    for (kind, dir) in [
        (ChildKind::Submodule, SUBMODULES_DIR),
        (ChildKind::Example, EXAMPLES_DIR),
    ] {
        for path in child_directories(root, dir)? {
            let full = root.join(&path);
            children.push(AnalyzedChild {
                kind,
                details: analyze_directory(&full, false)?,
                files: read_child_files(&full, &path)?,
                path,
            });
        }
    }

    Ok(Analysis { details, children })
}

fn analyze_directory(dir: &Path, with_template: bool) -> Result<ModuleDetails> {
    let mut inputs = BTreeSet::new();
    let mut outputs = BTreeSet::new();
    let mut resources = BTreeSet::new();
    let mut terraform_version = None;

    for tf in tf_files(dir)? {
        let content = std::fs::read(&tf).map_err(|e| malformed(&tf, e))?;
        let content = String::from_utf8_lossy(&content);
        let scan = scan_terraform(&content);
        inputs.extend(scan.variables.into_iter().map(|v| v.name));
        outputs.extend(scan.outputs);
        resources.extend(scan.resources);
        if terraform_version.is_none() {
            terraform_version = scan.required_version;
        }
    }

    let readme = find_case_insensitive(dir, README_NAMES)?
        .map(|path| {
            std::fs::read(&path)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|e| malformed(&path, e))
        })
        .transpose()?;

    let variable_template = if with_template {
        read_variable_template(dir)?
    } else {
        None
    };

    Ok(ModuleDetails {
        id: Uuid::new_v4().to_string(),
        readme,
        variable_template,
        inputs: inputs.into_iter().collect(),
        outputs: outputs.into_iter().collect(),
        resources: resources.into_iter().collect(),
        terraform_version,
    })
}

fn read_variable_template(dir: &Path) -> Result<Option<VariableTemplate>> {
    for name in VARIABLE_TEMPLATE_NAMES {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        let content = std::fs::read(&path).map_err(|e| malformed(&path, e))?;
        let template = if name.ends_with(".json") {
            serde_json::from_slice(&content)
                .map_err(|e| malformed(&path, format!("invalid variable template: {e}")))?
        } else {
            scan_terraform(&String::from_utf8_lossy(&content)).variables
        };
        return Ok(Some(template));
    }
    Ok(None)
}

fn tf_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| malformed(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| malformed(dir, e))?;
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if is_file && path.extension().is_some_and(|ext| ext == "tf") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn find_case_insensitive(dir: &Path, candidates: &[&str]) -> Result<Option<std::path::PathBuf>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| malformed(dir, e))? {
        let entry = entry.map_err(|e| malformed(dir, e))?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    Ok(candidates.iter().find_map(|candidate| {
        names
            .iter()
            .find(|name| name.eq_ignore_ascii_case(candidate))
            .map(|name| dir.join(name))
    }))
}

/// Directories below `root/parent` that directly contain a `.tf` file.
fn child_directories(root: &Path, parent: &str) -> Result<Vec<String>> {
    let base = root.join(parent);
    if !base.is_dir() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(&base)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| malformed(&base, e))?;
        if !entry.file_type().is_dir() || entry.file_name() == ".git" {
            continue;
        }
        if tf_files(entry.path())?.is_empty() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        found.push(rel);
    }
    Ok(found)
}

fn read_child_files(dir: &Path, rel: &str) -> Result<Vec<AnalyzedFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| malformed(dir, e))? {
        let entry = entry.map_err(|e| malformed(dir, e))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let content = std::fs::read(&path).map_err(|e| malformed(&path, e))?;
        files.push(AnalyzedFile {
            path: format!("{rel}/{}", entry.file_name().to_string_lossy()),
            is_binary: std::str::from_utf8(&content).is_err(),
            content,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[derive(Debug, Default, PartialEq)]
struct TerraformScan {
    variables: Vec<TemplateVariable>,
    outputs: Vec<String>,
    resources: Vec<String>,
    required_version: Option<String>,
}

/// Returns the text between the `{` ending at `open` and its matching `}`.
fn block_body(content: &str, open: usize) -> &str {
    let bytes = content.as_bytes();
    let mut depth = 1usize;
    let mut in_string = false;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return &content[open..i];
                }
            }
            _ => {}
        }
        i += 1;
    }
    &content[open..]
}

fn scan_terraform(content: &str) -> TerraformScan {
    let mut scan = TerraformScan::default();

    for caps in BLOCK_HEADER.captures_iter(content) {
        let labels: Vec<&str> = LABEL
            .captures_iter(&caps[2])
            .filter_map(|l| l.get(1).map(|m| m.as_str()))
            .collect();
        let body_start = caps.get(0).map_or(0, |m| m.end());

        match (&caps[1], labels.as_slice()) {
            ("variable", [name]) => {
                let body = block_body(content, body_start);
                let mut variable = TemplateVariable::text(*name);
                variable.required = !DEFAULT_ATTR.is_match(body);
                variable.additional_help = DESCRIPTION_ATTR
                    .captures(body)
                    .map(|d| d[1].replace("\\\"", "\""));
                scan.variables.push(variable);
            }
            ("output", [name]) => scan.outputs.push((*name).to_string()),
            ("resource", [kind, name]) => scan.resources.push(format!("{kind}.{name}")),
            _ => {}
        }
    }

    scan.required_version = REQUIRED_VERSION
        .captures(content)
        .map(|c| c[1].trim().to_string())
        .filter(|v| !v.is_empty());

    scan
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::VariableInput;

    const MAIN_TF: &str = r#"
terraform {
  required_version = ">= 1.3.0, < 2.0.0"
}

resource "aws_vpc" "this" {
  cidr_block = var.cidr
  tags = { Name = "x{y}" }
}

output "vpc_id" {
  value = aws_vpc.this.id
}
"#;

    const VARIABLES_TF: &str = r#"
variable "cidr" {
  description = "CIDR block for the \"main\" VPC"
  type        = string
}

variable "name" {
  type    = string
  default = "main"
}
"#;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_terraform() {
        let scan = scan_terraform(&format!("{MAIN_TF}{VARIABLES_TF}"));
        assert_eq!(scan.outputs, vec!["vpc_id"]);
        assert_eq!(scan.resources, vec!["aws_vpc.this"]);
        assert_eq!(scan.required_version.as_deref(), Some(">= 1.3.0, < 2.0.0"));

        assert_eq!(scan.variables.len(), 2);
        assert_eq!(scan.variables[0].name, "cidr");
        assert!(scan.variables[0].required);
        assert_eq!(
            scan.variables[0].additional_help.as_deref(),
            Some("CIDR block for the \"main\" VPC")
        );
        assert_eq!(scan.variables[1].name, "name");
        assert!(!scan.variables[1].required);
    }

    #[test]
    fn test_analyze_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "main.tf", MAIN_TF.as_bytes());
        write(root, "variables.tf", VARIABLES_TF.as_bytes());
        write(root, "readme.MD", b"# VPC module\n");
        write(root, "modules/subnet/main.tf", b"variable \"az\" {}\n");
        write(root, "modules/subnet/README.md", b"# Subnet\n");
        write(root, "modules/docs/notes.txt", b"no terraform here");
        write(root, "examples/basic/main.tf", b"module \"vpc\" { source = \"../..\" }\n");
        write(root, "examples/basic/diagram.png", &[0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe]);

        let analysis = analyze(root).unwrap();

        assert_eq!(analysis.details.readme.as_deref(), Some("# VPC module\n"));
        assert_eq!(analysis.details.inputs, vec!["cidr", "name"]);
        assert_eq!(analysis.details.outputs, vec!["vpc_id"]);
        assert_eq!(analysis.details.terraform_version.as_deref(), Some(">= 1.3.0, < 2.0.0"));
        let template = analysis.details.variable_template.as_ref().unwrap();
        assert_eq!(template.len(), 2);
        assert!(matches!(template[0].input, VariableInput::Text { .. }));

        let submodules: Vec<_> = analysis.submodules().map(|c| c.path.as_str()).collect();
        assert_eq!(submodules, vec!["modules/subnet"]);
        let subnet = analysis.submodules().next().unwrap();
        assert_eq!(subnet.details.readme.as_deref(), Some("# Subnet\n"));
        assert_eq!(subnet.details.inputs, vec!["az"]);

        let example = analysis.examples().next().unwrap();
        assert_eq!(example.path, "examples/basic");
        assert!(example.details.readme.is_none());
        let files: Vec<_> = example
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.is_binary))
            .collect();
        assert_eq!(
            files,
            vec![("examples/basic/diagram.png", true), ("examples/basic/main.tf", false)]
        );
    }

    #[test]
    fn test_readme_precedence() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "README", b"plain");
        write(dir.path(), "README.rst", b"rst");
        let analysis = analyze(dir.path()).unwrap();
        assert_eq!(analysis.details.readme.as_deref(), Some("rst"));
    }

    #[test]
    fn test_json_template_wins_over_tf() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "variables.tf", VARIABLES_TF.as_bytes());
        write(
            dir.path(),
            "variable_template.json",
            br#"[{"name": "size", "type": "select", "choices": ["s", "m"]}]"#,
        );
        let analysis = analyze(dir.path()).unwrap();
        let template = analysis.details.variable_template.unwrap();
        assert_eq!(template.len(), 1);
        assert_eq!(template[0].name, "size");
    }

    #[test]
    fn test_invalid_json_template_is_malformed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "variables.json", b"{ not json");
        assert!(matches!(analyze(dir.path()), Err(Error::MalformedModule(_))));
    }

    #[test]
    fn test_missing_root_is_malformed() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            analyze(&dir.path().join("does/not/exist")),
            Err(Error::MalformedModule(_))
        ));
    }
}
