//! Fetching module sources from git.
//!
//! The indexer only talks to [`GitFetcher`], so tests can swap in an
//! in-memory implementation and never need a `git` binary.

mod process;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use process::GitCommandFetcher;

use crate::error::{Error, Result};

const MAX_TAG_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub clone_timeout: Duration,
    pub checkout_timeout: Duration,
    /// Fetch full history and tags instead of a single shallow commit.
    pub need_tags: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            clone_timeout: Duration::from_secs(10 * 60),
            checkout_timeout: Duration::from_secs(2 * 60),
            need_tags: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTree {
    pub commit_sha: String,
}

#[async_trait]
pub trait GitFetcher: Send + Sync {
    /// Tag names advertised by the remote.
    async fn list_tags(
        &self,
        url: &str,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Materializes the tree at `tag` into the existing, empty `dest`.
    async fn clone_at_tag(
        &self,
        url: &str,
        tag: &str,
        dest: &Path,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<FetchedTree>;
}

/// Checks the tag exists upstream, then clones it.
pub async fn fetch_tag(
    fetcher: &dyn GitFetcher,
    url: &str,
    tag: &str,
    dest: &Path,
    options: &FetchOptions,
    cancel: &CancellationToken,
) -> Result<FetchedTree> {
    if tag.is_empty() || tag.starts_with('-') {
        return Err(Error::Validation(format!("invalid git tag '{tag}'")));
    }

    let tags = fetcher.list_tags(url, options, cancel).await?;
    if !tags.iter().any(|t| t == tag) {
        return Err(Error::UnknownTag {
            tag: tag.to_string(),
            candidates: closest_tags(tag, &tags),
        });
    }

    let tree = fetcher.clone_at_tag(url, tag, dest, options, cancel).await?;
    if !is_commit_sha(&tree.commit_sha) {
        return Err(Error::UpstreamUnavailable(format!(
            "unexpected commit id '{}' for tag {tag}",
            tree.commit_sha
        )));
    }
    Ok(tree)
}

/// Up to ten tags ordered by similarity to `wanted`.
#[must_use]
pub fn closest_tags(wanted: &str, tags: &[String]) -> Vec<String> {
    let mut scored: Vec<(f64, &String)> = tags
        .iter()
        .map(|t| (strsim::jaro_winkler(wanted, t), t))
        .collect();
    scored.sort_by(|(sa, ta), (sb, tb)| sb.total_cmp(sa).then_with(|| ta.cmp(tb)));
    scored
        .into_iter()
        .take(MAX_TAG_CANDIDATES)
        .map(|(_, t)| t.clone())
        .collect()
}

#[must_use]
pub fn is_commit_sha(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Strips userinfo so credentials never reach logs or error messages.
#[must_use]
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    match authority.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}{tail}"),
        None => url.to_string(),
    }
}
