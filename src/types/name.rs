use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 128;

/// Names that would collide with registry routes.
pub const RESERVED_NAMESPACES: &[&str] = &[
    "modules", "providers", "v1", "v2", "api", "admin", "login", "logout",
];

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*[A-Za-z0-9]$").expect("name pattern is valid")
});

fn validate_name(name: &str, entity: &str) -> Result<()> {
    if name.len() < MIN_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "{entity} name must be at least {MIN_NAME_LEN} characters"
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "{entity} name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(Error::InvalidName(format!(
            "{entity} name can only contain alphanumeric characters, hyphens, and underscores, \
             and must start and end with an alphanumeric character"
        )));
    }
    Ok(())
}

/// Validates a namespace name. `app_name` is reserved alongside the route names.
pub fn validate_namespace_name(name: &str, app_name: &str) -> Result<()> {
    validate_name(name, "Namespace")?;

    let lowered = name.to_ascii_lowercase();
    if RESERVED_NAMESPACES.contains(&lowered.as_str()) || lowered == app_name.to_ascii_lowercase()
    {
        return Err(Error::InvalidName(format!(
            "Namespace name '{name}' is reserved"
        )));
    }
    Ok(())
}

pub fn validate_module_name(name: &str) -> Result<()> {
    validate_name(name, "Module")
}

pub fn validate_provider_name(name: &str) -> Result<()> {
    validate_name(name, "Provider")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_namespace_names() {
        assert!(validate_namespace_name("hashicorp", "terrace").is_ok());
        assert!(validate_namespace_name("aws-modules", "terrace").is_ok());
        assert!(validate_namespace_name("my_org2", "terrace").is_ok());
        assert!(validate_namespace_name("ab", "terrace").is_ok());
        assert!(validate_namespace_name(&"a".repeat(128), "terrace").is_ok());
    }

    #[test]
    fn test_length_boundaries() {
        assert!(matches!(
            validate_namespace_name("a", "terrace"),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(
            validate_namespace_name(&"a".repeat(129), "terrace"),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_edge_characters_rejected() {
        assert!(validate_namespace_name("-abc", "terrace").is_err());
        assert!(validate_namespace_name("abc_", "terrace").is_err());
        assert!(validate_namespace_name("ab.c", "terrace").is_err());
        assert!(validate_namespace_name("ab/c", "terrace").is_err());
    }

    #[test]
    fn test_reserved_names() {
        assert!(validate_namespace_name("modules", "terrace").is_err());
        assert!(validate_namespace_name("Admin", "terrace").is_err());
        assert!(validate_namespace_name("terrace", "terrace").is_err());
        assert!(validate_namespace_name("TERRACE", "terrace").is_err());
        // reserved words only apply to namespaces
        assert!(validate_module_name("modules").is_ok());
    }
}
