use super::counter::RuleCounter;
use super::registry::Registry;
use super::store::ContentStore;
use super::traits::{FetchError, Fetcher};
use super::types::{FilterEntry, ListFlags, ModifyOutcome, RefreshOutcome, RefreshSummary};
use crate::config::Config;
use crate::error::{FilterError, Result};
use bytes::Bytes;
use futures::{stream, StreamExt};
use rustc_hash::FxHasher;
use std::hash::Hasher;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Orchestrates the filter lifecycle on top of the [`Registry`].
///
/// Downloads and file writes happen outside the registry lock; only the final
/// commit of each operation takes it. Content files of entries handed back by
/// [`delete`](Self::delete) or a URL change in [`modify`](Self::modify) are
/// never removed here; the caller reclaims them (see [`reclaim`](Self::reclaim)).
pub struct FilterController {
    registry: Registry,
    store: ContentStore,
    fetcher: Arc<dyn Fetcher>,
    counter: RuleCounter,
    fetch_timeout: Duration,
    concurrent_downloads: usize,
    shutdown: CancellationToken,
}

struct Download {
    content: Bytes,
    rule_count: u64,
    checksum: u64,
}

impl FilterController {
    pub async fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let store = ContentStore::open(&config.filtering.filter_dir).await?;
        Ok(Self {
            registry: Registry::new(),
            store,
            fetcher,
            counter: RuleCounter::with_markers(&config.filtering.comment_markers),
            fetch_timeout: config.filtering.fetch_timeout(),
            concurrent_downloads: config.updates.concurrent_downloads.max(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn filter_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Adds `url` enabled and named after itself.
    pub async fn add(&self, url: &str) -> Result<FilterEntry> {
        self.add_with(url, url, true).await
    }

    pub async fn add_with(&self, url: &str, name: &str, enabled: bool) -> Result<FilterEntry> {
        self.ensure_open()?;
        validate_url(url)?;
        if self.registry.contains(url) {
            return Err(FilterError::DuplicateUrl(url.to_string()));
        }

        let entry = self.materialize(url, name, enabled).await?;
        if let Err(e) = self.registry.insert(entry.clone()) {
            // Lost a race against an identical add.
            self.discard(&entry.path).await;
            return Err(e);
        }

        info!(
            "Added filter '{}' (ID {}) from {}: {} rules",
            entry.name, entry.id, entry.url, entry.rule_count
        );
        Ok(entry)
    }

    pub async fn modify(
        &self,
        current_url: &str,
        enabled: bool,
        name: &str,
        new_url: &str,
    ) -> Result<ModifyOutcome> {
        self.ensure_open()?;
        let Some((slot, current)) = self.registry.find_slot(current_url) else {
            return Err(FilterError::NotFound(current_url.to_string()));
        };

        if new_url == current_url {
            let (before, after) = self
                .registry
                .set_flags(current_url, enabled, name)
                .ok_or_else(|| FilterError::NotFound(current_url.to_string()))?;
            let outcome = if before.enabled != after.enabled {
                ModifyOutcome::ChangedEnabled
            } else if before.name != after.name {
                ModifyOutcome::ChangedName
            } else {
                ModifyOutcome::Unchanged
            };
            debug!("Filter {} (ID {}): {}", after.url, after.id, outcome.as_str());
            return Ok(outcome);
        }

        validate_url(new_url)?;
        if self.registry.contains(new_url) {
            return Err(FilterError::DuplicateUrl(new_url.to_string()));
        }

        let replacement = self.materialize(new_url, name, enabled).await?;
        match self.registry.replace(slot, replacement.clone()) {
            Ok(superseded) => {
                info!(
                    "Filter ID {} ({}) superseded by ID {} ({}): {} rules",
                    superseded.id,
                    superseded.url,
                    replacement.id,
                    replacement.url,
                    replacement.rule_count
                );
                Ok(ModifyOutcome::ChangedUrl { superseded })
            }
            Err(e) => {
                warn!(
                    "Dropping download of {} for filter ID {}: {}",
                    new_url, current.id, e
                );
                self.discard(&replacement.path).await;
                Err(e)
            }
        }
    }

    /// Removes `url` from the index. `Ok(None)` means there was nothing to
    /// delete.
    pub fn delete(&self, url: &str) -> Result<Option<FilterEntry>> {
        self.ensure_open()?;
        let removed = self.registry.remove(url);
        match &removed {
            Some(entry) => info!("Deleted filter '{}' (ID {})", entry.name, entry.id),
            None => debug!("Delete of unknown filter {}", url),
        }
        Ok(removed)
    }

    pub fn list(&self, flags: ListFlags) -> Vec<FilterEntry> {
        let mut entries = self.registry.snapshot();
        entries.retain(|e| flags.admits(e));
        entries
    }

    pub fn find(&self, url: &str) -> Option<FilterEntry> {
        self.registry.find(url)
    }

    /// Removes the content file of an entry that is no longer registered.
    /// Returns `false` without touching anything while the entry is live.
    pub async fn reclaim(&self, entry: &FilterEntry) -> Result<bool> {
        if self.registry.contains_id(entry.id) {
            warn!(
                "Refusing to reclaim content of live filter ID {} ({})",
                entry.id, entry.url
            );
            return Ok(false);
        }
        self.store.remove(&entry.path).await?;
        debug!("Reclaimed {}", entry.path.display());
        Ok(true)
    }

    /// Downloads `url` again and swaps the stored content in place.
    pub async fn refresh(&self, url: &str) -> Result<RefreshOutcome> {
        self.ensure_open()?;
        let current = self
            .registry
            .find(url)
            .ok_or_else(|| FilterError::NotFound(url.to_string()))?;

        let content = self.download(url).await?;
        let checksum = checksum(&content);
        let now = unix_now();

        if checksum == current.checksum {
            self.registry
                .touch(current.id, now)
                .ok_or_else(|| FilterError::NotFound(url.to_string()))?;
            debug!("Filter {} (ID {}) is up to date", url, current.id);
            return Ok(RefreshOutcome::Unchanged);
        }

        let rules = self.counter.count(&content);
        let staged = self.store.stage(&current.path, &content).await?;
        match self
            .registry
            .commit_content(current.id, staged, rules, checksum, now)?
        {
            Some(updated) => {
                info!(
                    "Updated filter '{}' (ID {}): {} -> {} rules",
                    updated.name, updated.id, current.rule_count, updated.rule_count
                );
                Ok(RefreshOutcome::Updated {
                    previous_rules: current.rule_count,
                    rules,
                })
            }
            None => Err(FilterError::NotFound(url.to_string())),
        }
    }

    /// Refreshes every enabled filter, `concurrent_downloads` at a time.
    pub async fn refresh_all(&self) -> RefreshSummary {
        let urls: Vec<String> = self
            .list(ListFlags::ENABLED_ONLY)
            .into_iter()
            .map(|e| e.url)
            .collect();
        info!("Refreshing {} filter lists...", urls.len());

        let results: Vec<(String, Result<RefreshOutcome>)> = stream::iter(urls)
            .map(|url| async move {
                let result = self.refresh(&url).await;
                (url, result)
            })
            .buffer_unordered(self.concurrent_downloads)
            .collect()
            .await;

        let mut summary = RefreshSummary::default();
        for (url, result) in results {
            match result {
                Ok(RefreshOutcome::Updated { .. }) => summary.updated += 1,
                Ok(RefreshOutcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    error!("Failed to refresh {}: {}", url, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Filter refresh complete. Updated: {}, unchanged: {}, failed: {}",
            summary.updated, summary.unchanged, summary.failed
        );
        summary
    }

    /// Cancels in-flight downloads and rejects further mutations. Operations
    /// that already finished downloading still commit.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        info!("Filter controller closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(FilterError::Closed);
        }
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let timeout = self.fetch_timeout;
        info!("Fetching filter list from {}", url);

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(FilterError::Closed),
            result = self.fetcher.fetch(url, timeout) => result,
        };

        result.map_err(|e| {
            error!("Failed to fetch {}: {}", url, e);
            match e {
                FetchError::Timeout => FilterError::FetchTimeout {
                    url: url.to_string(),
                    timeout,
                },
                FetchError::Transport(reason) => FilterError::FetchTransport {
                    url: url.to_string(),
                    reason,
                },
            }
        })
    }

    async fn fetch_counted(&self, url: &str) -> Result<Download> {
        let content = self.download(url).await?;
        let rule_count = self.counter.count(&content);
        let checksum = checksum(&content);
        Ok(Download {
            content,
            rule_count,
            checksum,
        })
    }

    /// Downloads `url` into a fresh content file under a new ID. The returned
    /// entry is not registered yet.
    async fn materialize(&self, url: &str, name: &str, enabled: bool) -> Result<FilterEntry> {
        let download = self.fetch_counted(url).await?;
        let id = self.registry.allocate_id();
        let path = self.store.path_for(id);
        self.store.write(&path, &download.content).await?;

        Ok(FilterEntry {
            id,
            url: url.to_string(),
            name: name.to_string(),
            enabled,
            rule_count: download.rule_count,
            path,
            checksum: download.checksum,
            last_updated: unix_now(),
        })
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = self.store.remove(path).await {
            error!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| FilterError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FilterError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

fn checksum(content: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(content);
    hasher.finish()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
