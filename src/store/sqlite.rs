use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::schema::SCHEMA;
use super::{PageRequest, ProviderFilter, SortDirection, SortField, Store, VersionRecord};
use crate::error::{Error, Result};
use crate::types::*;
use crate::version::sort_newest_first;

const NAMESPACE_COLUMNS: &str = "id, name, display_name, namespace_type, created_at";

const GIT_PROVIDER_COLUMNS: &str =
    "id, name, base_url_template, clone_url_template, browse_url_template";

const PROVIDER_SELECT: &str = "SELECT m.id, m.namespace_id, n.name, m.module, m.provider, m.verified,
            m.git_provider_id, m.base_url_template, m.clone_url_template, m.browse_url_template,
            m.tag_format, m.git_path, m.archive_git_path, m.created_at
     FROM module_providers m JOIN namespaces n ON n.id = m.namespace_id";

const VERSION_COLUMNS: &str = "id, provider_id, version, published, beta, git_tag, commit_sha,
     published_at, indexed_at, details_id, tar_sha256, zip_sha256";

const DETAILS_COLUMNS: &str =
    "id, readme, variable_template, inputs, outputs, resources, terraform_version";

const CHILD_COLUMNS: &str = "id, version_id, kind, path, details_id";

const REDIRECT_COLUMNS: &str = "id, namespace, module, provider, provider_id, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("failed to encode: {e}")))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn namespace_from_row(row: &Row<'_>) -> rusqlite::Result<Namespace> {
    let namespace_type: String = row.get(3)?;
    Ok(Namespace {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        namespace_type: namespace_type.parse().unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn git_provider_from_row(row: &Row<'_>) -> rusqlite::Result<GitProvider> {
    Ok(GitProvider {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url_template: row.get(2)?,
        clone_url_template: row.get(3)?,
        browse_url_template: row.get(4)?,
    })
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleProvider> {
    Ok(ModuleProvider {
        id: row.get(0)?,
        namespace_id: row.get(1)?,
        namespace: row.get(2)?,
        module: row.get(3)?,
        provider: row.get(4)?,
        verified: row.get(5)?,
        git: GitConfig {
            git_provider_id: row.get(6)?,
            base_url_template: row.get(7)?,
            clone_url_template: row.get(8)?,
            browse_url_template: row.get(9)?,
            tag_format: row.get(10)?,
            git_path: row.get(11)?,
            archive_git_path: row.get(12)?,
        },
        created_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleVersion> {
    Ok(ModuleVersion {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        version: row.get(2)?,
        published: row.get(3)?,
        beta: row.get(4)?,
        git_tag: row.get(5)?,
        commit_sha: row.get(6)?,
        published_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(&s)),
        indexed_at: parse_datetime(&row.get::<_, String>(8)?),
        details_id: row.get(9)?,
        tar_sha256: row.get(10)?,
        zip_sha256: row.get(11)?,
    })
}

fn details_from_row(row: &Row<'_>) -> rusqlite::Result<ModuleDetails> {
    let variable_template = match row.get::<_, Option<String>>(2)? {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(ModuleDetails {
        id: row.get(0)?,
        readme: row.get(1)?,
        variable_template,
        inputs: json_column(row, 3)?,
        outputs: json_column(row, 4)?,
        resources: json_column(row, 5)?,
        terraform_version: row.get(6)?,
    })
}

fn child_from_row(row: &Row<'_>) -> rusqlite::Result<ChildModule> {
    let kind: String = row.get(2)?;
    Ok(ChildModule {
        id: row.get(0)?,
        version_id: row.get(1)?,
        kind: kind
            .parse()
            .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        path: row.get(3)?,
        details_id: row.get(4)?,
    })
}

fn redirect_from_row(row: &Row<'_>) -> rusqlite::Result<Redirect> {
    Ok(Redirect {
        id: row.get(0)?,
        namespace: row.get(1)?,
        module: row.get(2)?,
        provider: row.get(3)?,
        provider_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn insert_details(conn: &Connection, details: &ModuleDetails) -> Result<()> {
    let variable_template = details
        .variable_template
        .as_ref()
        .map(to_json)
        .transpose()?;
    conn.execute(
        "INSERT INTO module_details (id, readme, variable_template, inputs, outputs, resources, terraform_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            details.id,
            details.readme,
            variable_template,
            to_json(&details.inputs)?,
            to_json(&details.outputs)?,
            to_json(&details.resources)?,
            details.terraform_version,
        ],
    )?;
    Ok(())
}

fn delete_details(conn: &Connection, ids: &[String]) -> Result<()> {
    for id in ids {
        conn.execute("DELETE FROM module_details WHERE id = ?1", params![id])?;
    }
    Ok(())
}

/// WHERE clause and bound values for a provider filter.
fn filter_clause(filter: &ProviderFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(query) = &filter.query {
        for term in query.split_whitespace() {
            let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
            clauses.push(
                "(LOWER(n.name) LIKE ? ESCAPE '\\' OR LOWER(m.module) LIKE ? ESCAPE '\\' \
                 OR LOWER(m.provider) LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            args.extend(std::iter::repeat_n(Value::Text(pattern), 3));
        }
    }

    let mut in_list = |column: &str, values: &[String], negate: bool| {
        let op = if negate { "NOT IN" } else { "IN" };
        clauses.push(format!("LOWER({column}) {op} ({})", placeholders(values.len())));
        args.extend(values.iter().map(|v| Value::Text(v.to_lowercase())));
    };

    if !filter.namespaces.is_empty() {
        in_list("n.name", &filter.namespaces, false);
    }
    if !filter.providers.is_empty() {
        in_list("m.provider", &filter.providers, false);
    }
    match &filter.namespace_in {
        Some(names) if names.is_empty() => {
            in_list("n.name", &[], false);
        }
        Some(names) => in_list("n.name", names, false),
        None => {}
    }
    if let Some(names) = filter.namespace_not_in.as_ref().filter(|n| !n.is_empty()) {
        in_list("n.name", names, true);
    }
    if let Some(verified) = filter.verified {
        clauses.push("m.verified = ?".to_string());
        args.push(Value::Integer(i64::from(verified)));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (clause, args)
}

fn order_clause(page: &PageRequest) -> String {
    let column = match page.sort {
        SortField::Name => "m.module",
        SortField::Namespace => "n.name",
        SortField::Provider => "m.provider",
        SortField::CreatedAt => "m.created_at",
        SortField::Verified => "m.verified",
    };
    let direction = match page.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    format!(" ORDER BY {column} {direction}, n.name, m.module, m.provider, m.id")
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Namespace operations

    fn create_namespace(&self, ns: &Namespace) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO namespaces (id, name, display_name, namespace_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ns.id,
                    ns.name,
                    ns.display_name,
                    ns.namespace_type.as_str(),
                    format_datetime(&ns.created_at),
                ],
            )
            .map_err(|e| Error::from_insert(e, format!("namespace '{}'", ns.name)))?;
        Ok(())
    }

    fn get_namespace(&self, id: &str) -> Result<Option<Namespace>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE id = ?1"),
            params![id],
            namespace_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name = ?1"),
            params![name],
            namespace_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_namespaces(&self, cursor: &str, limit: i32) -> Result<Vec<Namespace>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE name > ?1 ORDER BY name LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], namespace_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_namespace(&self, id: &str) -> Result<bool> {
        match self
            .conn()
            .execute("DELETE FROM namespaces WHERE id = ?1", params![id])
        {
            Ok(rows) => Ok(rows > 0),
            Err(e) if is_constraint_violation(&e) => Err(Error::Conflict(
                "namespace still has module providers".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn count_namespace_providers(&self, namespace_id: &str) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM module_providers WHERE namespace_id = ?1",
            params![namespace_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // Git provider operations

    fn upsert_git_provider(&self, provider: &GitProvider) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO git_providers (id, name, base_url_template, clone_url_template, browse_url_template)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    base_url_template = excluded.base_url_template,
                    clone_url_template = excluded.clone_url_template,
                    browse_url_template = excluded.browse_url_template",
                params![
                    provider.id,
                    provider.name,
                    provider.base_url_template,
                    provider.clone_url_template,
                    provider.browse_url_template,
                ],
            )
            .map_err(|e| Error::from_insert(e, format!("git provider '{}'", provider.name)))?;
        Ok(())
    }

    fn get_git_provider(&self, id: &str) -> Result<Option<GitProvider>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GIT_PROVIDER_COLUMNS} FROM git_providers WHERE id = ?1"),
            params![id],
            git_provider_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_git_providers(&self) -> Result<Vec<GitProvider>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {GIT_PROVIDER_COLUMNS} FROM git_providers ORDER BY name"
        ))?;
        let rows = stmt.query_map([], git_provider_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Module provider operations

    fn create_module_provider(&self, provider: &ModuleProvider) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO module_providers (id, namespace_id, module, provider, verified,
                    git_provider_id, base_url_template, clone_url_template, browse_url_template,
                    tag_format, git_path, archive_git_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    provider.id,
                    provider.namespace_id,
                    provider.module,
                    provider.provider,
                    provider.verified,
                    provider.git.git_provider_id,
                    provider.git.base_url_template,
                    provider.git.clone_url_template,
                    provider.git.browse_url_template,
                    provider.git.tag_format,
                    provider.git.git_path,
                    provider.git.archive_git_path,
                    format_datetime(&provider.created_at),
                ],
            )
            .map_err(|e| Error::from_insert(e, format!("module provider {}", provider.triple())))?;
        Ok(())
    }

    fn get_module_provider(&self, id: &str) -> Result<Option<ModuleProvider>> {
        let conn = self.conn();
        conn.query_row(
            &format!("{PROVIDER_SELECT} WHERE m.id = ?1"),
            params![id],
            provider_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn find_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<ModuleProvider>> {
        let conn = self.conn();
        conn.query_row(
            &format!("{PROVIDER_SELECT} WHERE n.name = ?1 AND m.module = ?2 AND m.provider = ?3"),
            params![namespace, module, provider],
            provider_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_module_providers(&self, namespace_id: Option<&str>) -> Result<Vec<ModuleProvider>> {
        let conn = self.conn();
        let (sql, args): (String, Vec<Value>) = match namespace_id {
            Some(id) => (
                format!("{PROVIDER_SELECT} WHERE m.namespace_id = ? ORDER BY m.module, m.provider"),
                vec![Value::Text(id.to_string())],
            ),
            None => (
                format!("{PROVIDER_SELECT} ORDER BY n.name, m.module, m.provider"),
                Vec::new(),
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), provider_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_module_provider(&self, provider: &ModuleProvider) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE module_providers SET namespace_id = ?1, module = ?2, provider = ?3,
                    verified = ?4, git_provider_id = ?5, base_url_template = ?6,
                    clone_url_template = ?7, browse_url_template = ?8, tag_format = ?9,
                    git_path = ?10, archive_git_path = ?11
                 WHERE id = ?12",
                params![
                    provider.namespace_id,
                    provider.module,
                    provider.provider,
                    provider.verified,
                    provider.git.git_provider_id,
                    provider.git.base_url_template,
                    provider.git.clone_url_template,
                    provider.git.browse_url_template,
                    provider.git.tag_format,
                    provider.git.git_path,
                    provider.git.archive_git_path,
                    provider.id,
                ],
            )
            .map_err(|e| Error::from_insert(e, format!("module provider {}", provider.triple())))?;

        if rows == 0 {
            return Err(Error::not_found(format!("module provider {}", provider.triple())));
        }
        Ok(())
    }

    fn delete_module_provider(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let details_ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT details_id FROM module_versions WHERE provider_id = ?1
                 UNION ALL
                 SELECT c.details_id FROM child_modules c
                 JOIN module_versions v ON v.id = c.version_id
                 WHERE v.provider_id = ?1",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let rows = tx.execute("DELETE FROM module_providers WHERE id = ?1", params![id])?;
        delete_details(&tx, &details_ids)?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn search_module_providers(
        &self,
        filter: &ProviderFilter,
        page: &PageRequest,
    ) -> Result<(Vec<ModuleProvider>, u64)> {
        let (clause, args) = filter_clause(filter);
        let conn = self.conn();

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM module_providers m JOIN namespaces n ON n.id = m.namespace_id{clause}"
            ),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut page_args = args;
        page_args.push(Value::Integer(page.limit.map_or(-1, i64::from)));
        page_args.push(Value::Integer(i64::from(page.offset)));

        let mut stmt = conn.prepare(&format!(
            "{PROVIDER_SELECT}{clause}{} LIMIT ? OFFSET ?",
            order_clause(page)
        ))?;
        let rows = stmt.query_map(params_from_iter(page_args), provider_from_row)?;
        let rows = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((rows, u64::try_from(total).unwrap_or(0)))
    }

    // Module version operations

    fn get_module_version(
        &self,
        provider_id: &str,
        version: &str,
    ) -> Result<Option<ModuleVersion>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM module_versions WHERE provider_id = ?1 AND version = ?2"
            ),
            params![provider_id, version],
            version_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_module_version_by_tag(
        &self,
        provider_id: &str,
        git_tag: &str,
    ) -> Result<Option<ModuleVersion>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM module_versions WHERE provider_id = ?1 AND git_tag = ?2"
            ),
            params![provider_id, git_tag],
            version_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_module_versions(&self, provider_id: &str) -> Result<Vec<ModuleVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM module_versions WHERE provider_id = ?1"
        ))?;
        let rows = stmt.query_map(params![provider_id], version_from_row)?;
        let mut versions = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        sort_newest_first(&mut versions);
        Ok(versions)
    }

    fn persist_indexed_version(&self, record: &VersionRecord) -> Result<()> {
        let version = &record.version;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        insert_details(&tx, &record.details)?;
        tx.execute(
            "INSERT INTO module_versions (id, provider_id, version, published, beta, git_tag,
                commit_sha, published_at, indexed_at, details_id, tar_sha256, zip_sha256)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                version.id,
                version.provider_id,
                version.version,
                version.published,
                version.beta,
                version.git_tag,
                version.commit_sha,
                version.published_at.as_ref().map(format_datetime),
                format_datetime(&version.indexed_at),
                version.details_id,
                version.tar_sha256,
                version.zip_sha256,
            ],
        )
        .map_err(|e| Error::from_insert(e, format!("version {}", version.version)))?;

        for child in &record.children {
            insert_details(&tx, &child.details)?;
            tx.execute(
                "INSERT INTO child_modules (id, version_id, kind, path, details_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    child.child.id,
                    child.child.version_id,
                    child.child.kind.as_str(),
                    child.child.path,
                    child.child.details_id,
                ],
            )?;
            for file in &child.files {
                tx.execute(
                    "INSERT INTO example_files (child_id, path, content, is_binary)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![file.child_id, file.path, file.content, file.is_binary],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn publish_module_version(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE module_versions SET published = 1, published_at = COALESCE(published_at, ?1)
             WHERE id = ?2",
            params![format_datetime(&at), id],
        )?;
        Ok(rows > 0)
    }

    fn delete_module_version(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let details_ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT details_id FROM module_versions WHERE id = ?1
                 UNION ALL
                 SELECT details_id FROM child_modules WHERE version_id = ?1",
            )?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let rows = tx.execute("DELETE FROM module_versions WHERE id = ?1", params![id])?;
        delete_details(&tx, &details_ids)?;
        tx.commit()?;
        Ok(rows > 0)
    }

    // Details and child module operations

    fn get_module_details(&self, id: &str) -> Result<Option<ModuleDetails>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {DETAILS_COLUMNS} FROM module_details WHERE id = ?1"),
            params![id],
            details_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_child_modules(
        &self,
        version_id: &str,
        kind: Option<ChildKind>,
    ) -> Result<Vec<ChildModule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHILD_COLUMNS} FROM child_modules
             WHERE version_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY kind, path"
        ))?;
        let rows = stmt.query_map(params![version_id, kind.map(ChildKind::as_str)], child_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_child_module(
        &self,
        version_id: &str,
        kind: ChildKind,
        path: &str,
    ) -> Result<Option<ChildModule>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {CHILD_COLUMNS} FROM child_modules
                 WHERE version_id = ?1 AND kind = ?2 AND path = ?3"
            ),
            params![version_id, kind.as_str(), path],
            child_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_child_files(&self, child_id: &str) -> Result<Vec<ChildFile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT child_id, path, content, is_binary FROM example_files
             WHERE child_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![child_id], |row| {
            Ok(ChildFile {
                child_id: row.get(0)?,
                path: row.get(1)?,
                content: row.get(2)?,
                is_binary: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Redirect operations

    fn create_redirect(&self, redirect: &Redirect) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO module_provider_redirects (id, namespace, module, provider, provider_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    redirect.id,
                    redirect.namespace,
                    redirect.module,
                    redirect.provider,
                    redirect.provider_id,
                    format_datetime(&redirect.created_at),
                ],
            )
            .map_err(|e| {
                Error::from_insert(
                    e,
                    format!(
                        "redirect {}/{}/{}",
                        redirect.namespace, redirect.module, redirect.provider
                    ),
                )
            })?;
        Ok(())
    }

    fn find_redirect(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<Redirect>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {REDIRECT_COLUMNS} FROM module_provider_redirects
                 WHERE namespace = ?1 AND module = ?2 AND provider = ?3"
            ),
            params![namespace, module, provider],
            redirect_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_redirects(&self, provider_id: &str) -> Result<Vec<Redirect>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REDIRECT_COLUMNS} FROM module_provider_redirects
             WHERE provider_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![provider_id], redirect_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_redirect(&self, id: &str) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM module_provider_redirects WHERE id = ?1",
            params![id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::{ChildRecord, PageRequest};

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn namespace(id: &str, name: &str) -> Namespace {
        Namespace {
            id: id.to_string(),
            name: name.to_string(),
            display_name: None,
            namespace_type: NamespaceType::None,
            created_at: Utc::now(),
        }
    }

    fn provider(id: &str, ns: &Namespace, module: &str, prov: &str) -> ModuleProvider {
        ModuleProvider {
            id: id.to_string(),
            namespace_id: ns.id.clone(),
            namespace: ns.name.clone(),
            module: module.to_string(),
            provider: prov.to_string(),
            verified: false,
            git: GitConfig::default(),
            created_at: Utc::now(),
        }
    }

    fn details(id: &str) -> ModuleDetails {
        ModuleDetails {
            id: id.to_string(),
            readme: Some("# readme".to_string()),
            variable_template: Some(vec![TemplateVariable::text("region")]),
            inputs: vec!["region".to_string()],
            outputs: vec!["id".to_string()],
            resources: vec!["aws_vpc.this".to_string()],
            terraform_version: Some(">= 1.0".to_string()),
        }
    }

    fn record(id: &str, provider_id: &str, version: &str) -> VersionRecord {
        let details_id = format!("{id}-details");
        let child_id = format!("{id}-child");
        VersionRecord {
            version: ModuleVersion {
                id: id.to_string(),
                provider_id: provider_id.to_string(),
                version: version.to_string(),
                published: false,
                beta: false,
                git_tag: format!("v{version}"),
                commit_sha: "a".repeat(40),
                published_at: None,
                indexed_at: Utc::now(),
                details_id: details_id.clone(),
                tar_sha256: "0".repeat(64),
                zip_sha256: "1".repeat(64),
            },
            details: details(&details_id),
            children: vec![ChildRecord {
                child: ChildModule {
                    id: child_id.clone(),
                    version_id: id.to_string(),
                    kind: ChildKind::Example,
                    path: "examples/basic".to_string(),
                    details_id: format!("{child_id}-details"),
                },
                details: details(&format!("{child_id}-details")),
                files: vec![ChildFile {
                    child_id: child_id.clone(),
                    path: "examples/basic/main.tf".to_string(),
                    content: b"module \"x\" {}".to_vec(),
                    is_binary: false,
                }],
            }],
        }
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = setup();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "namespaces",
            "git_providers",
            "module_providers",
            "module_details",
            "module_versions",
            "child_modules",
            "example_files",
            "module_provider_redirects",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_namespace_names_unique_ignoring_case() {
        let (_temp, store) = setup();
        store.create_namespace(&namespace("ns-1", "HashiCorp")).unwrap();

        let err = store
            .create_namespace(&namespace("ns-2", "hashicorp"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        let found = store.get_namespace_by_name("HASHICORP").unwrap().unwrap();
        assert_eq!(found.id, "ns-1");
        assert_eq!(found.name, "HashiCorp");
    }

    #[test]
    fn test_list_namespaces_cursor() {
        let (_temp, store) = setup();
        for (i, name) in ["alpha", "bravo", "charlie"].iter().enumerate() {
            store
                .create_namespace(&namespace(&format!("ns-{i}"), name))
                .unwrap();
        }

        let first = store.list_namespaces("", 2).unwrap();
        assert_eq!(first.len(), 2);
        let rest = store.list_namespaces(&first[1].name, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "charlie");
    }

    #[test]
    fn test_namespace_delete_blocked_by_providers() {
        let (_temp, store) = setup();
        let ns = namespace("ns-1", "foo");
        store.create_namespace(&ns).unwrap();
        store
            .create_module_provider(&provider("p-1", &ns, "bar", "baz"))
            .unwrap();

        assert_eq!(store.count_namespace_providers("ns-1").unwrap(), 1);
        assert!(matches!(
            store.delete_namespace("ns-1"),
            Err(Error::Conflict(_))
        ));

        assert!(store.delete_module_provider("p-1").unwrap());
        assert!(store.delete_namespace("ns-1").unwrap());
    }

    #[test]
    fn test_persist_and_delete_version() {
        let (_temp, store) = setup();
        let ns = namespace("ns-1", "hashicorp");
        store.create_namespace(&ns).unwrap();
        store
            .create_module_provider(&provider("p-1", &ns, "consul", "aws"))
            .unwrap();

        store
            .persist_indexed_version(&record("v-1", "p-1", "1.2.3"))
            .unwrap();

        let version = store.get_module_version("p-1", "1.2.3").unwrap().unwrap();
        assert_eq!(version.git_tag, "v1.2.3");
        assert!(!version.published);
        let by_tag = store.get_module_version_by_tag("p-1", "v1.2.3").unwrap().unwrap();
        assert_eq!(by_tag.id, "v-1");

        let details = store.get_module_details(&version.details_id).unwrap().unwrap();
        assert_eq!(details.inputs, vec!["region"]);
        assert_eq!(details.variable_template.unwrap()[0].name, "region");

        let examples = store
            .list_child_modules("v-1", Some(ChildKind::Example))
            .unwrap();
        assert_eq!(examples.len(), 1);
        assert!(store
            .list_child_modules("v-1", Some(ChildKind::Submodule))
            .unwrap()
            .is_empty());
        let files = store.list_child_files(&examples[0].id).unwrap();
        assert_eq!(files[0].text(), Some("module \"x\" {}"));

        assert!(store.delete_module_version("v-1").unwrap());
        assert!(store.get_module_version("p-1", "1.2.3").unwrap().is_none());
        assert_eq!(count(&store, "module_details"), 0);
        assert_eq!(count(&store, "child_modules"), 0);
        assert_eq!(count(&store, "example_files"), 0);
    }

    #[test]
    fn test_duplicate_version_or_tag_rejected() {
        let (_temp, store) = setup();
        let ns = namespace("ns-1", "hashicorp");
        store.create_namespace(&ns).unwrap();
        store
            .create_module_provider(&provider("p-1", &ns, "consul", "aws"))
            .unwrap();
        store
            .persist_indexed_version(&record("v-1", "p-1", "1.0.0"))
            .unwrap();

        let err = store
            .persist_indexed_version(&record("v-2", "p-1", "1.0.0"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        // the failed transaction must not leave its details behind
        assert_eq!(count(&store, "module_details"), 2);
    }

    #[test]
    fn test_publish_and_latest() {
        let (_temp, store) = setup();
        let ns = namespace("ns-1", "hashicorp");
        store.create_namespace(&ns).unwrap();
        store
            .create_module_provider(&provider("p-1", &ns, "consul", "aws"))
            .unwrap();
        store.persist_indexed_version(&record("v-1", "p-1", "1.2.0")).unwrap();
        store.persist_indexed_version(&record("v-2", "p-1", "1.10.0")).unwrap();

        assert!(store.latest_version("p-1").unwrap().is_none());

        store.publish_module_version("v-1", Utc::now()).unwrap();
        assert_eq!(store.latest_version("p-1").unwrap().unwrap().version, "1.2.0");
        store.publish_module_version("v-2", Utc::now()).unwrap();
        assert_eq!(store.latest_version("p-1").unwrap().unwrap().version, "1.10.0");

        let listed: Vec<_> = store
            .list_module_versions("p-1")
            .unwrap()
            .into_iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(listed, vec!["1.10.0", "1.2.0"]);
    }

    #[test]
    fn test_search_filters_and_total() {
        let (_temp, store) = setup();
        let aws = namespace("ns-1", "aws-modules");
        let other = namespace("ns-2", "someone");
        store.create_namespace(&aws).unwrap();
        store.create_namespace(&other).unwrap();

        let mut vpc = provider("p-1", &aws, "vpc", "aws");
        vpc.verified = true;
        store.create_module_provider(&vpc).unwrap();
        store
            .create_module_provider(&provider("p-2", &aws, "vpc-endpoints", "aws"))
            .unwrap();
        store
            .create_module_provider(&provider("p-3", &other, "vpc", "gcp"))
            .unwrap();
        store
            .create_module_provider(&provider("p-4", &other, "100%_legit", "aws"))
            .unwrap();

        let page = PageRequest {
            limit: Some(1),
            ..PageRequest::ALL
        };
        let (rows, total) = store
            .search_module_providers(
                &ProviderFilter {
                    query: Some("VPC".to_string()),
                    ..ProviderFilter::default()
                },
                &page,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(total, 3);

        let (rows, total) = store
            .search_module_providers(
                &ProviderFilter {
                    query: Some("vpc".to_string()),
                    namespaces: vec!["AWS-Modules".to_string()],
                    verified: Some(true),
                    ..ProviderFilter::default()
                },
                &PageRequest::ALL,
            )
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, "p-1");

        let (_, total) = store
            .search_module_providers(
                &ProviderFilter {
                    namespace_not_in: Some(vec!["aws-modules".to_string()]),
                    providers: vec!["aws".to_string()],
                    ..ProviderFilter::default()
                },
                &PageRequest::ALL,
            )
            .unwrap();
        assert_eq!(total, 1);

        let (_, total) = store
            .search_module_providers(
                &ProviderFilter {
                    namespace_in: Some(Vec::new()),
                    ..ProviderFilter::default()
                },
                &PageRequest::ALL,
            )
            .unwrap();
        assert_eq!(total, 0);

        // LIKE wildcards in the query are literal
        let (rows, _) = store
            .search_module_providers(
                &ProviderFilter {
                    query: Some("0%_".to_string()),
                    ..ProviderFilter::default()
                },
                &PageRequest::ALL,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "p-4");
    }

    #[test]
    fn test_redirects_follow_provider_lifecycle() {
        let (_temp, store) = setup();
        let ns = namespace("ns-1", "foo");
        store.create_namespace(&ns).unwrap();
        store
            .create_module_provider(&provider("p-1", &ns, "bar", "baz"))
            .unwrap();

        let redirect = Redirect {
            id: "r-1".to_string(),
            namespace: "Old".to_string(),
            module: "bar".to_string(),
            provider: "baz".to_string(),
            provider_id: "p-1".to_string(),
            created_at: Utc::now(),
        };
        store.create_redirect(&redirect).unwrap();
        assert!(matches!(
            store.create_redirect(&Redirect {
                id: "r-2".to_string(),
                ..redirect.clone()
            }),
            Err(Error::AlreadyExists(_))
        ));

        assert_eq!(
            store.find_redirect("old", "bar", "baz").unwrap().unwrap().provider_id,
            "p-1"
        );
        assert_eq!(store.list_redirects("p-1").unwrap().len(), 1);

        store.delete_module_provider("p-1").unwrap();
        assert!(store.find_redirect("old", "bar", "baz").unwrap().is_none());
    }

    #[test]
    fn test_git_provider_upsert() {
        let (_temp, store) = setup();
        let mut gp = GitProvider {
            id: "github".to_string(),
            name: "GitHub".to_string(),
            base_url_template: None,
            clone_url_template: "https://github.com/{namespace}/{module}.git".to_string(),
            browse_url_template: None,
        };
        store.upsert_git_provider(&gp).unwrap();
        gp.browse_url_template = Some("https://github.com/{namespace}/{module}/tree/{tag}/{path}".to_string());
        store.upsert_git_provider(&gp).unwrap();

        assert_eq!(store.list_git_providers().unwrap().len(), 1);
        assert_eq!(store.get_git_provider("github").unwrap().unwrap(), gp);
    }
}
