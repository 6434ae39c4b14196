//! Module search: predicate composition over the store, latest-version gating
//! and facet counts.

use std::collections::BTreeMap;

use semver::{Prerelease, Version};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::{PageRequest, ProviderFilter, SortDirection, SortField, Store};
use crate::types::{ModuleProvider, ModuleVersion};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 50;

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub namespaces: Vec<String>,
    pub providers: Vec<String>,
    pub verified: Option<bool>,
    /// Only namespaces in the trusted set.
    pub trusted_namespaces: Option<bool>,
    /// Only namespaces outside the trusted set.
    pub contributed: Option<bool>,
    pub target_terraform_version: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl SearchQuery {
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub provider: ModuleProvider,
    pub latest: ModuleVersion,
    pub trusted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Facets {
    pub verified: u64,
    pub trusted: u64,
    pub contributed: u64,
    pub providers: BTreeMap<String, u64>,
    pub namespaces: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    /// Matching providers before the latest-version filter, so offsets stay stable.
    pub total_count: u64,
    pub limit: u32,
    pub offset: u32,
    pub facets: Facets,
}

pub struct SearchEngine<'a> {
    store: &'a dyn Store,
    trusted: &'a [String],
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a dyn Store, trusted: &'a [String]) -> Self {
        Self { store, trusted }
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        let target = query
            .target_terraform_version
            .as_deref()
            .map(parse_partial)
            .transpose()?
            .map(|(v, _)| v);

        let base = self.base_filter(query);
        let limit = query.effective_limit();
        let page = PageRequest {
            limit: Some(limit),
            offset: query.offset,
            sort: query.sort,
            direction: query.direction,
        };

        let (rows, total_count) = self.store.search_module_providers(&base, &page)?;
        let hits = self.with_latest(rows, target.as_ref())?;

        let mut facets = Facets {
            verified: self.count_with(&base, target.as_ref(), |f| f.verified = Some(true))?,
            trusted: self.count_with(&base, target.as_ref(), |f| {
                f.namespace_in = Some(self.trusted.to_vec());
            })?,
            contributed: self.count_with(&base, target.as_ref(), |f| {
                f.namespace_not_in = Some(self.trusted.to_vec());
            })?,
            ..Facets::default()
        };
        for hit in &hits {
            *facets
                .providers
                .entry(hit.provider.provider.clone())
                .or_default() += 1;
            *facets
                .namespaces
                .entry(hit.provider.namespace.clone())
                .or_default() += 1;
        }

        Ok(SearchResult {
            hits,
            total_count,
            limit,
            offset: query.offset,
            facets,
        })
    }

    fn base_filter(&self, query: &SearchQuery) -> ProviderFilter {
        let mut filter = ProviderFilter {
            query: query.query.clone().filter(|q| !q.trim().is_empty()),
            namespaces: query.namespaces.clone(),
            providers: query.providers.clone(),
            verified: query.verified.filter(|v| *v),
            namespace_in: None,
            namespace_not_in: None,
        };

        // Asking for both trusted and contributed is asking for everything.
        match (query.trusted_namespaces == Some(true), query.contributed == Some(true)) {
            (true, false) => filter.namespace_in = Some(self.trusted.to_vec()),
            (false, true) => filter.namespace_not_in = Some(self.trusted.to_vec()),
            _ => {}
        }
        filter
    }

    fn count_with<F>(&self, base: &ProviderFilter, target: Option<&Version>, add: F) -> Result<u64>
    where
        F: FnOnce(&mut ProviderFilter),
    {
        let mut filter = base.clone();
        add(&mut filter);
        let (rows, _) = self.store.search_module_providers(&filter, &PageRequest::ALL)?;
        Ok(self.with_latest(rows, target)?.len() as u64)
    }

    fn with_latest(
        &self,
        rows: Vec<ModuleProvider>,
        target: Option<&Version>,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::with_capacity(rows.len());
        for provider in rows {
            let Some(latest) = self.store.latest_version(&provider.id)? else {
                continue;
            };

            if let Some(target) = target {
                if !self.admits_target(&provider, &latest, target)? {
                    continue;
                }
            }

            let trusted = self
                .trusted
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&provider.namespace));
            hits.push(SearchHit {
                provider,
                latest,
                trusted,
            });
        }
        Ok(hits)
    }

    fn admits_target(
        &self,
        provider: &ModuleProvider,
        latest: &ModuleVersion,
        target: &Version,
    ) -> Result<bool> {
        let constraint = self
            .store
            .get_module_details(&latest.details_id)?
            .and_then(|d| d.terraform_version);

        let Some(constraint) = constraint else {
            return Ok(true);
        };

        match constraint_admits(&constraint, target) {
            Ok(admitted) => Ok(admitted),
            Err(e) => {
                tracing::warn!(
                    module = %provider.triple(),
                    version = %latest.version,
                    error = %e,
                    "unparseable required_version constraint"
                );
                Ok(false)
            }
        }
    }
}

/// Evaluates a Terraform `required_version` constraint such as
/// `">= 1.3.0, < 2.0.0"` or `"~> 1.5"` against `target`.
pub fn constraint_admits(constraint: &str, target: &Version) -> Result<bool> {
    let clauses: Vec<&str> = constraint
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if clauses.is_empty() {
        return Err(Error::Validation(format!(
            "empty version constraint '{constraint}'"
        )));
    }

    for clause in clauses {
        if !clause_admits(clause, target)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clause_admits(clause: &str, target: &Version) -> Result<bool> {
    const OPERATORS: &[&str] = &["~>", ">=", "<=", "!=", ">", "<", "="];

    let (op, rest) = OPERATORS
        .iter()
        .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest)))
        .unwrap_or(("=", clause));
    let (bound, segments) = parse_partial(rest.trim())?;

    let admitted = match op {
        "=" => *target == bound,
        "!=" => *target != bound,
        ">" => *target > bound,
        ">=" => *target >= bound,
        "<" => *target < bound,
        "<=" => *target <= bound,
        _ => {
            let upper = if segments >= 3 {
                bound.minor.checked_add(1).map(|minor| Version::new(bound.major, minor, 0))
            } else {
                bound.major.checked_add(1).map(|major| Version::new(major, 0, 0))
            };
            let upper = upper.ok_or_else(|| {
                Error::Validation(format!("constraint '{clause}' has no upper bound"))
            })?;
            *target >= bound && *target < upper
        }
    };
    Ok(admitted)
}

/// Parses `1`, `1.2`, `1.2.3` or `1.2.3-pre`, filling missing components
/// with zero. Returns the number of components given.
fn parse_partial(s: &str) -> Result<(Version, usize)> {
    let invalid = || Error::Validation(format!("invalid version '{s}'"));

    let s = s.strip_prefix('v').unwrap_or(s);
    let (core, pre) = match s.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (s, None),
    };

    let parts: Vec<u64> = core
        .split('.')
        .map(|p| p.parse::<u64>().map_err(|_| invalid()))
        .collect::<Result<_>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }

    let mut version = Version::new(
        parts[0],
        parts.get(1).copied().unwrap_or(0),
        parts.get(2).copied().unwrap_or(0),
    );
    if let Some(pre) = pre {
        version.pre = Prerelease::new(pre).map_err(|_| invalid())?;
    }
    Ok((version, parts.len()))
}
