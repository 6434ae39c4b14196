//! Git URL templates.
//!
//! Templates carry `{name}` placeholders that are substituted in a single,
//! non-recursive pass. Values are inserted verbatim, so a value containing
//! braces is never re-expanded.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{GitProvider, ModuleProvider};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder pattern is valid"));

const GIT_PROVIDER_NAMES: &[&str] = &[
    "namespace",
    "module",
    "provider",
    "path",
    "tag",
    "tag_uri_encoded",
];

const CREDENTIAL_NAMES: &[&str] = &[
    "namespace",
    "module",
    "provider",
    "path",
    "tag",
    "tag_uri_encoded",
    "git_tag",
    "version",
];

/// Which set of placeholders a template may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    GitProvider,
    Credential,
}

impl TemplateKind {
    fn names(self) -> &'static [&'static str] {
        match self {
            Self::GitProvider => GIT_PROVIDER_NAMES,
            Self::Credential => CREDENTIAL_NAMES,
        }
    }

    fn recognizes(self, name: &str) -> bool {
        self.names().contains(&name)
    }
}

/// Placeholders a template must materially contain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub namespace: bool,
    pub module: bool,
    pub tag: bool,
    pub path: bool,
}

impl Requirements {
    pub const NONE: Self = Self {
        namespace: false,
        module: false,
        tag: false,
        path: false,
    };
}

#[derive(Debug, Clone, Default)]
pub struct TemplateValues<'a> {
    pub namespace: &'a str,
    pub module: &'a str,
    pub provider: &'a str,
    pub path: &'a str,
    pub tag: &'a str,
    pub version: &'a str,
}

impl TemplateValues<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "namespace" => self.namespace.to_string(),
            "module" => self.module.to_string(),
            "provider" => self.provider.to_string(),
            "path" => self.path.to_string(),
            "tag" | "git_tag" => self.tag.to_string(),
            "tag_uri_encoded" => urlencoding::encode(self.tag).into_owned(),
            "version" => self.version.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitCredentials {
    pub username: String,
    pub password: String,
}

fn unknown_placeholders(template: &str, kind: TemplateKind) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .filter(|name| !kind.recognizes(name))
        .collect()
}

fn check_braces(template: &str, kind: TemplateKind) -> Result<()> {
    let unknown = unknown_placeholders(template, kind);
    if !unknown.is_empty() {
        return Err(Error::MalformedTemplate(format!(
            "unknown placeholder(s) {} in '{template}'",
            unknown
                .iter()
                .map(|n| format!("{{{n}}}"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let stripped = PLACEHOLDER.replace_all(template, "");
    if stripped.contains('{') || stripped.contains('}') {
        return Err(Error::MalformedTemplate(format!(
            "unbalanced braces in '{template}'"
        )));
    }
    Ok(())
}

fn substitute(template: &str, kind: TemplateKind, values: &TemplateValues<'_>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            if kind.recognizes(name) {
                values.lookup(name).unwrap_or_default()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Checks that every placeholder is recognized and every required value
/// survives rendering.
pub fn validate(template: &str, kind: TemplateKind, requires: Requirements) -> Result<()> {
    check_braces(template, kind)?;

    let checks = [
        (requires.namespace, "namespace"),
        (requires.module, "module"),
        (requires.tag, "tag"),
        (requires.path, "path"),
    ];

    for (required, name) in checks {
        if !required {
            continue;
        }
        let sentinel = format!("terracesentinel{name}");
        let mut values = TemplateValues::default();
        match name {
            "namespace" => values.namespace = &sentinel,
            "module" => values.module = &sentinel,
            "tag" => values.tag = &sentinel,
            _ => values.path = &sentinel,
        }
        if !substitute(template, kind, &values).contains(&sentinel) {
            return Err(Error::MissingPlaceholder(name.to_string()));
        }
    }

    Ok(())
}

pub fn render(template: &str, kind: TemplateKind, values: &TemplateValues<'_>) -> Result<String> {
    check_braces(template, kind)?;
    Ok(substitute(template, kind, values))
}

/// Embeds credentials into an http(s) URL, replacing any existing userinfo.
/// Other schemes are returned untouched.
#[must_use]
pub fn inject_credentials(url: &str, credentials: &GitCredentials) -> String {
    let Some((scheme, rest)) = ["https://", "http://"]
        .iter()
        .find_map(|s| url.strip_prefix(s).map(|rest| (*s, rest)))
    else {
        return url.to_string();
    };

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);

    format!(
        "{scheme}{}:{}@{host}{tail}",
        urlencoding::encode(&credentials.username),
        urlencoding::encode(&credentials.password)
    )
}

/// Template a provider clones from: its own override, then its git
/// provider's, then the registry default.
fn effective<'a>(
    own: Option<&'a str>,
    from_git_provider: Option<&'a str>,
    fallback: Option<&'a str>,
) -> Option<&'a str> {
    own.or(from_git_provider).or(fallback)
}

/// Renders the clone URL for `provider` at `tag`. Credentials are not injected.
pub fn clone_url_for(
    provider: &ModuleProvider,
    git_provider: Option<&GitProvider>,
    fallback: Option<&str>,
    tag: &str,
    version: &str,
) -> Result<String> {
    let template = effective(
        provider.git.clone_url_template.as_deref(),
        git_provider.map(|g| g.clone_url_template.as_str()),
        fallback,
    )
    .ok_or_else(|| {
        Error::Validation(format!(
            "module provider {} has no clone URL configured",
            provider.triple()
        ))
    })?;

    render(
        template,
        TemplateKind::GitProvider,
        &TemplateValues {
            namespace: &provider.namespace,
            module: &provider.module,
            provider: &provider.provider,
            path: provider.git.git_path.as_deref().unwrap_or(""),
            tag,
            version,
        },
    )
}

/// Renders the source browse URL for `path` at `tag`, when one is configured.
pub fn browse_url_for(
    provider: &ModuleProvider,
    git_provider: Option<&GitProvider>,
    fallback: Option<&str>,
    tag: &str,
    path: &str,
) -> Result<Option<String>> {
    let Some(template) = effective(
        provider.git.browse_url_template.as_deref(),
        git_provider.and_then(|g| g.browse_url_template.as_deref()),
        fallback,
    ) else {
        return Ok(None);
    };

    render(
        template,
        TemplateKind::GitProvider,
        &TemplateValues {
            namespace: &provider.namespace,
            module: &provider.module,
            provider: &provider.provider,
            path,
            tag,
            version: "",
        },
    )
    .map(Some)
}
