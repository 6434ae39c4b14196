pub const SCHEMA: &str = r#"
-- Namespaces group module providers; names are unique ignoring case
CREATE TABLE IF NOT EXISTS namespaces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    display_name TEXT,
    namespace_type TEXT NOT NULL DEFAULT 'NONE',
    created_at TEXT DEFAULT (datetime('now'))
);

-- Hosting services with their URL templates, loaded from configuration
CREATE TABLE IF NOT EXISTS git_providers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    base_url_template TEXT,
    clone_url_template TEXT NOT NULL,
    browse_url_template TEXT
);

CREATE TABLE IF NOT EXISTS module_providers (
    id TEXT PRIMARY KEY,
    namespace_id TEXT NOT NULL REFERENCES namespaces(id) ON DELETE RESTRICT,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,

    -- Git overrides; NULL falls back to the git provider, then registry defaults
    git_provider_id TEXT REFERENCES git_providers(id) ON DELETE SET NULL,
    base_url_template TEXT,
    clone_url_template TEXT,
    browse_url_template TEXT,
    tag_format TEXT,
    git_path TEXT,
    archive_git_path INTEGER NOT NULL DEFAULT 0,

    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(namespace_id, module, provider)
);

-- Bulky per-version and per-child payload
CREATE TABLE IF NOT EXISTS module_details (
    id TEXT PRIMARY KEY,
    readme TEXT,
    variable_template TEXT,            -- JSON array
    inputs TEXT NOT NULL DEFAULT '[]',
    outputs TEXT NOT NULL DEFAULT '[]',
    resources TEXT NOT NULL DEFAULT '[]',
    terraform_version TEXT
);

-- A row only exists once both archives are stored
CREATE TABLE IF NOT EXISTS module_versions (
    id TEXT PRIMARY KEY,
    provider_id TEXT NOT NULL REFERENCES module_providers(id) ON DELETE CASCADE,
    version TEXT NOT NULL,
    published INTEGER NOT NULL DEFAULT 0,
    beta INTEGER NOT NULL DEFAULT 0,
    git_tag TEXT NOT NULL,
    commit_sha TEXT NOT NULL,
    published_at TEXT,
    indexed_at TEXT NOT NULL,
    details_id TEXT NOT NULL REFERENCES module_details(id),
    tar_sha256 TEXT NOT NULL,
    zip_sha256 TEXT NOT NULL,

    UNIQUE(provider_id, version),
    UNIQUE(provider_id, git_tag)
);

-- Submodules and examples of a version
CREATE TABLE IF NOT EXISTS child_modules (
    id TEXT PRIMARY KEY,
    version_id TEXT NOT NULL REFERENCES module_versions(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('submodule', 'example')),
    path TEXT NOT NULL,
    details_id TEXT NOT NULL REFERENCES module_details(id),

    UNIQUE(version_id, kind, path)
);

CREATE TABLE IF NOT EXISTS example_files (
    child_id TEXT NOT NULL REFERENCES child_modules(id) ON DELETE CASCADE,
    path TEXT NOT NULL,
    content BLOB NOT NULL,
    is_binary INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (child_id, path)
);

-- Old identities of moved providers; always point at a live provider
CREATE TABLE IF NOT EXISTS module_provider_redirects (
    id TEXT PRIMARY KEY,
    namespace TEXT NOT NULL COLLATE NOCASE,
    module TEXT NOT NULL,
    provider TEXT NOT NULL,
    provider_id TEXT NOT NULL REFERENCES module_providers(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(namespace, module, provider)
);

CREATE INDEX IF NOT EXISTS idx_module_providers_namespace ON module_providers(namespace_id);
CREATE INDEX IF NOT EXISTS idx_module_versions_provider ON module_versions(provider_id);
CREATE INDEX IF NOT EXISTS idx_child_modules_version ON child_modules(version_id);
CREATE INDEX IF NOT EXISTS idx_redirects_provider ON module_provider_redirects(provider_id);
"#;
