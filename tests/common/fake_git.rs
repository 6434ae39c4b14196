use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use terrace::error::{Error, Result};
use terrace::git::{FetchOptions, FetchedTree, GitFetcher};

/// Serves file trees keyed by tag, the same trees for every URL.
#[derive(Default)]
pub struct FakeGitFetcher {
    tags: Mutex<BTreeMap<String, Vec<(String, Vec<u8>)>>>,
    clones: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl FakeGitFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&self, tag: &str, files: &[(&str, &str)]) {
        let files = files
            .iter()
            .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
            .collect();
        self.tags
            .lock()
            .unwrap()
            .insert(tag.to_string(), files);
    }

    /// Makes every clone take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    /// A stable fake commit id per tag.
    pub fn commit_for(tag: &str) -> String {
        let seed: u32 = tag.bytes().map(u32::from).sum();
        format!("{seed:040x}")
    }
}

#[async_trait]
impl GitFetcher for FakeGitFetcher {
    async fn list_tags(
        &self,
        _url: &str,
        _options: &FetchOptions,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        Ok(self.tags.lock().unwrap().keys().cloned().collect())
    }

    async fn clone_at_tag(
        &self,
        _url: &str,
        tag: &str,
        dest: &Path,
        _options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<FetchedTree> {
        self.clones.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::UpstreamUnavailable("clone cancelled".to_string()));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let files = self
            .tags
            .lock()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| Error::UpstreamUnavailable(format!("no such tag {tag}")))?;
        for (path, content) in files {
            let target = dest.join(path);
            tokio::fs::create_dir_all(target.parent().unwrap()).await?;
            tokio::fs::write(target, content).await?;
        }

        Ok(FetchedTree {
            commit_sha: Self::commit_for(tag),
        })
    }
}
