/// Warm sandbox pool
///
/// One ordered sequence of sandboxes per registered language, each guarded by
/// its own mutex. Critical sections only touch memory: engine calls (create,
/// stop, remove) always run with the lock released, and a sandbox created on
/// demand is inserted already claimed so no other acquirer can see it free.
use crate::config::presets::LanguageRegistry;
use crate::config::types::{Result, SandboxId, WarmboxError};
use crate::observability::metrics::MetricsRegistry;
use crate::runtime::{SandboxRuntime, SandboxSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct PoolEntry {
    id: SandboxId,
    in_use: bool,
    uses: u64,
    created_at: DateTime<Utc>,
    last_released: Instant,
}

impl PoolEntry {
    fn new(id: SandboxId, in_use: bool) -> Self {
        Self {
            id,
            in_use,
            uses: u64::from(in_use),
            created_at: Utc::now(),
            last_released: Instant::now(),
        }
    }

    fn snapshot(&self) -> SandboxSnapshot {
        SandboxSnapshot {
            id: self.id.clone(),
            in_use: self.in_use,
            uses: self.uses,
            created_at: self.created_at,
            idle_ms: (!self.in_use).then(|| self.last_released.elapsed().as_millis() as u64),
        }
    }
}

#[derive(Debug)]
struct LanguagePool {
    image: String,
    entries: Mutex<Vec<PoolEntry>>,
}

impl LanguagePool {
    fn lock(&self) -> MutexGuard<'_, Vec<PoolEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flag the first free entry as in use
    fn claim_free(&self) -> Option<SandboxId> {
        let mut entries = self.lock();
        let entry = entries.iter_mut().find(|entry| !entry.in_use)?;
        entry.in_use = true;
        entry.uses += 1;
        Some(entry.id.clone())
    }
}

/// Point-in-time view of one pool entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSnapshot {
    pub id: SandboxId,
    pub in_use: bool,
    /// Number of leases handed out for this sandbox
    pub uses: u64,
    pub created_at: DateTime<Utc>,
    /// Time since the last release, for free entries
    pub idle_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageStatus {
    pub language: String,
    pub image: String,
    pub size: usize,
    pub in_use: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub runtime: String,
    pub languages: Vec<LanguageStatus>,
    pub captured_at: DateTime<Utc>,
}

/// One failed creation during start-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitFailure {
    pub language: String,
    pub error: String,
}

/// Outcome of warming the pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitReport {
    pub created: BTreeMap<String, usize>,
    pub failures: Vec<InitFailure>,
}

impl InitReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn total_created(&self) -> usize {
        self.created.values().sum()
    }
}

/// Outcome of an eviction or drain pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeardownReport {
    pub removed: Vec<(String, SandboxId)>,
    /// In-use entries left to their holders
    pub skipped_in_use: usize,
    pub failures: Vec<String>,
}

/// Per-language pools of warm sandboxes
pub struct SandboxPool {
    runtime: Arc<dyn SandboxRuntime>,
    registry: Arc<LanguageRegistry>,
    pools: BTreeMap<String, LanguagePool>,
    metrics: Arc<MetricsRegistry>,
    pull_on_create: bool,
}

impl SandboxPool {
    /// Empty pool with one (initially empty) sequence per registered language
    pub fn new(runtime: Arc<dyn SandboxRuntime>, registry: Arc<LanguageRegistry>) -> Self {
        Self::with_metrics(runtime, registry, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_metrics(
        runtime: Arc<dyn SandboxRuntime>,
        registry: Arc<LanguageRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let pools = registry
            .list()
            .into_iter()
            .map(|profile| {
                (
                    profile.language.clone(),
                    LanguagePool {
                        image: profile.image.clone(),
                        entries: Mutex::new(Vec::new()),
                    },
                )
            })
            .collect();

        Self {
            runtime,
            registry,
            pools,
            metrics,
            pull_on_create: false,
        }
    }

    /// Pull a missing image before every sandbox creation
    pub fn with_image_pulls(mut self, enabled: bool) -> Self {
        self.pull_on_create = enabled;
        self
    }

    /// Make sure `image` is available locally when pulls on create are enabled
    pub async fn prepare_image(&self, image: &str) -> Result<()> {
        if self.pull_on_create && self.runtime.ensure_image(image).await? {
            log::info!("Pulled missing image {}", image);
        }
        Ok(())
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    fn language_pool(&self, language: &str) -> Result<(&str, &LanguagePool)> {
        let canonical = self
            .registry
            .canonical(language)
            .ok_or_else(|| WarmboxError::unsupported_language(language))?;
        self.pools
            .get_key_value(canonical)
            .map(|(name, pool)| (name.as_str(), pool))
            .ok_or_else(|| WarmboxError::unsupported_language(language))
    }

    /// Pull the images of `languages` that are not present locally
    pub async fn pull_images(&self, languages: &[String]) -> Result<Vec<String>> {
        let mut pulled = Vec::new();
        for language in languages {
            let (_, pool) = self.language_pool(language)?;
            if self.runtime.ensure_image(&pool.image).await? {
                pulled.push(pool.image.clone());
            }
        }
        Ok(pulled)
    }

    /// Create and start `size` free sandboxes for each of `languages`.
    ///
    /// Sandboxes for one language are created concurrently. Failures do not
    /// abort the warm-up; every one of them is listed in the report.
    pub async fn initialize(&self, languages: &[String], size: usize) -> InitReport {
        let mut report = InitReport::default();

        for language in languages {
            let (canonical, pool) = match self.language_pool(language) {
                Ok(found) => found,
                Err(err) => {
                    report.failures.push(InitFailure {
                        language: language.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            if let Err(err) = self.prepare_image(&pool.image).await {
                log::error!("Image {} unavailable for {}: {}", pool.image, canonical, err);
                report.failures.push(InitFailure {
                    language: canonical.to_string(),
                    error: err.to_string(),
                });
                continue;
            }

            let spec = SandboxSpec::idle(&pool.image, canonical);
            let spec = &spec;
            let runtime = &self.runtime;
            let metrics = &self.metrics;
            let attempts = (0..size).map(move |_| async move {
                let started = Instant::now();
                let outcome = runtime.create_and_start(spec).await;
                metrics.record_creation(false, outcome.is_ok(), started.elapsed());
                outcome
            });

            let mut created = 0;
            for outcome in futures_util::future::join_all(attempts).await {
                match outcome {
                    Ok(id) => {
                        log::debug!("Warm sandbox {} ready for {}", id.short(), canonical);
                        pool.lock().push(PoolEntry::new(id, false));
                        created += 1;
                    }
                    Err(err) => {
                        log::error!("Failed to warm sandbox for {}: {}", canonical, err);
                        report.failures.push(InitFailure {
                            language: canonical.to_string(),
                            error: err.to_string(),
                        });
                    }
                }
            }

            log::info!(
                "Pool for {} warmed with {}/{} sandboxes ({})",
                canonical,
                created,
                size,
                pool.image
            );
            *report.created.entry(canonical.to_string()).or_insert(0) += created;
        }

        report
    }

    /// Hand out a sandbox for `language`, growing the pool when every
    /// existing sandbox is in use.
    ///
    /// Growth runs on its own task: if the caller stops waiting, the new
    /// sandbox still lands in the pool and is released there.
    pub async fn acquire(self: &Arc<Self>, language: &str) -> Result<SandboxLease> {
        let (canonical, pool) = self.language_pool(language)?;

        if let Some(id) = pool.claim_free() {
            log::debug!("Acquired sandbox {} for {}", id.short(), canonical);
            return Ok(self.lease(canonical, id));
        }

        log::info!(
            "Pool for {} exhausted ({} in use), creating sandbox on demand",
            canonical,
            pool.lock().len()
        );

        let language = canonical.to_string();
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.create_claimed(&language).await;
            if let Err(Ok(id)) = tx.send(outcome) {
                log::warn!(
                    "Requester for {} went away, returning new sandbox {} to the pool",
                    language,
                    id.short()
                );
                drop(this.lease(&language, id));
            }
        });

        let id = rx.await.map_err(|_| {
            WarmboxError::Resource(format!("sandbox creation for {} was aborted", canonical))
        })??;
        Ok(self.lease(canonical, id))
    }

    fn lease(self: &Arc<Self>, language: &str, id: SandboxId) -> SandboxLease {
        self.metrics.acquisitions.inc();
        self.metrics.sandboxes_in_use.inc();
        SandboxLease {
            pool: Arc::clone(self),
            language: language.to_string(),
            id,
            settled: false,
        }
    }

    /// Create a sandbox and append it already flagged as in use
    async fn create_claimed(&self, language: &str) -> Result<SandboxId> {
        let (canonical, pool) = self.language_pool(language)?;
        let spec = SandboxSpec::idle(&pool.image, canonical);
        self.prepare_image(&pool.image).await?;

        let started = Instant::now();
        let outcome = self.runtime.create_and_start(&spec).await;
        self.metrics
            .record_creation(true, outcome.is_ok(), started.elapsed());

        let id = outcome.map_err(|err| {
            log::error!("On-demand sandbox for {} failed: {}", canonical, err);
            err
        })?;

        let size = {
            let mut entries = pool.lock();
            entries.push(PoolEntry::new(id.clone(), true));
            entries.len()
        };
        log::info!(
            "Pool for {} grew to {} with sandbox {}",
            canonical,
            size,
            id.short()
        );
        Ok(id)
    }

    /// Mark `id` free again. Unknown languages or ids are logged and ignored.
    pub fn release(&self, language: &str, id: &SandboxId) -> bool {
        let Ok((canonical, pool)) = self.language_pool(language) else {
            log::warn!("Release of {} for unknown language {}", id.short(), language);
            self.metrics.release_misses.inc();
            return false;
        };

        let mut entries = pool.lock();
        match entries.iter_mut().find(|entry| entry.id == *id) {
            Some(entry) if entry.in_use => {
                entry.in_use = false;
                entry.last_released = Instant::now();
                self.metrics.releases.inc();
                self.metrics.sandboxes_in_use.dec();
                log::debug!("Released sandbox {} for {}", id.short(), canonical);
                true
            }
            Some(_) => {
                log::warn!("Sandbox {} for {} released while free", id.short(), canonical);
                self.metrics.release_misses.inc();
                false
            }
            None => {
                log::warn!("Release of unknown sandbox {} for {}", id.short(), canonical);
                self.metrics.release_misses.inc();
                false
            }
        }
    }

    /// Take `id` out of the pool without touching the engine
    fn detach(&self, language: &str, id: &SandboxId) -> bool {
        let Ok((_, pool)) = self.language_pool(language) else {
            return false;
        };
        let mut entries = pool.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != *id);
        before != entries.len()
    }

    async fn teardown(&self, id: &SandboxId) -> Result<()> {
        self.runtime.stop(id).await?;
        self.runtime.remove(id).await
    }

    /// Remove free sandboxes idle for longer than `max_idle`, keeping at
    /// least `keep` entries per language. In-use entries are never touched.
    pub async fn evict_idle(&self, max_idle: Duration, keep: usize) -> TeardownReport {
        let mut report = TeardownReport::default();

        for (language, pool) in &self.pools {
            let victims: Vec<SandboxId> = {
                let mut entries = pool.lock();
                let budget = entries.len().saturating_sub(keep);
                let mut expired: Vec<(Instant, SandboxId)> = entries
                    .iter()
                    .filter(|entry| !entry.in_use && entry.last_released.elapsed() >= max_idle)
                    .map(|entry| (entry.last_released, entry.id.clone()))
                    .collect();
                expired.sort_by_key(|(released, _)| *released);
                expired.truncate(budget);

                let victims: Vec<SandboxId> = expired.into_iter().map(|(_, id)| id).collect();
                entries.retain(|entry| !victims.contains(&entry.id));
                victims
            };

            for id in victims {
                self.metrics.evictions.inc();
                match self.teardown(&id).await {
                    Ok(()) => log::info!("Evicted idle sandbox {} for {}", id.short(), language),
                    Err(err) => {
                        log::warn!("Eviction of {} for {} failed: {}", id.short(), language, err);
                        report.failures.push(format!("{}: {}", id, err));
                    }
                }
                report.removed.push((language.clone(), id));
            }
        }

        report
    }

    /// Run `evict_idle` every `interval` until the pool is dropped
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        keep: usize,
    ) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let report = pool.evict_idle(max_idle, keep).await;
                if !report.removed.is_empty() {
                    log::info!("Reaper evicted {} idle sandboxes", report.removed.len());
                }
            }
        })
    }

    /// Stop and remove every free sandbox. Leased ones stay with their holders.
    pub async fn drain(&self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for (language, pool) in &self.pools {
            let free: Vec<SandboxId> = {
                let mut entries = pool.lock();
                let (free, leased): (Vec<PoolEntry>, Vec<PoolEntry>) =
                    entries.drain(..).partition(|entry| !entry.in_use);
                report.skipped_in_use += leased.len();
                *entries = leased;
                free.into_iter().map(|entry| entry.id).collect()
            };

            for id in free {
                if let Err(err) = self.teardown(&id).await {
                    log::warn!("Failed to remove {} for {}: {}", id.short(), language, err);
                    report.failures.push(format!("{}: {}", id, err));
                }
                report.removed.push((language.clone(), id));
            }
        }

        log::info!(
            "Pool drained: {} removed, {} still leased, {} failures",
            report.removed.len(),
            report.skipped_in_use,
            report.failures.len()
        );
        report
    }

    pub fn snapshot(&self, language: &str) -> Result<Vec<SandboxSnapshot>> {
        let (_, pool) = self.language_pool(language)?;
        let entries = pool.lock();
        Ok(entries.iter().map(PoolEntry::snapshot).collect())
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, Vec<SandboxSnapshot>> {
        self.pools
            .iter()
            .map(|(language, pool)| {
                let entries = pool.lock();
                (
                    language.clone(),
                    entries.iter().map(PoolEntry::snapshot).collect(),
                )
            })
            .collect()
    }

    /// Number of sandboxes held for `language` (0 for unknown languages)
    pub fn size(&self, language: &str) -> usize {
        self.language_pool(language)
            .map(|(_, pool)| pool.lock().len())
            .unwrap_or(0)
    }

    pub fn in_use(&self, language: &str) -> usize {
        self.language_pool(language)
            .map(|(_, pool)| pool.lock().iter().filter(|entry| entry.in_use).count())
            .unwrap_or(0)
    }

    pub fn status(&self) -> PoolStatus {
        let languages = self
            .pools
            .iter()
            .map(|(language, pool)| {
                let entries = pool.lock();
                LanguageStatus {
                    language: language.clone(),
                    image: pool.image.clone(),
                    size: entries.len(),
                    in_use: entries.iter().filter(|entry| entry.in_use).count(),
                }
            })
            .collect();

        PoolStatus {
            runtime: self.runtime.name().to_string(),
            languages,
            captured_at: Utc::now(),
        }
    }
}

/// Exclusive claim on one pooled sandbox. Dropping the lease releases it.
pub struct SandboxLease {
    pool: Arc<SandboxPool>,
    language: String,
    id: SandboxId,
    settled: bool,
}

impl SandboxLease {
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Return the sandbox to the pool
    pub fn release(mut self) -> bool {
        self.settled = true;
        self.pool.release(&self.language, &self.id)
    }

    /// Drop the sandbox from the pool and remove it at the engine.
    ///
    /// The pool entry is gone when this returns; engine teardown runs on the
    /// returned task.
    pub fn discard(mut self) -> JoinHandle<Result<()>> {
        self.settled = true;
        let pool = Arc::clone(&self.pool);
        let language = self.language.clone();
        let id = self.id.clone();

        if pool.detach(&language, &id) {
            pool.metrics.discards.inc();
            pool.metrics.sandboxes_in_use.dec();
            log::warn!("Discarding sandbox {} for {}", id.short(), language);
        }

        tokio::spawn(async move {
            let outcome = pool.teardown(&id).await;
            if let Err(err) = &outcome {
                log::warn!("Failed to remove discarded sandbox {}: {}", id.short(), err);
            }
            outcome
        })
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.release(&self.language, &self.id);
        }
    }
}

impl std::fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLease")
            .field("language", &self.language)
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_runtime::InMemoryRuntime;

    fn pool_with(runtime: Arc<InMemoryRuntime>) -> Arc<SandboxPool> {
        Arc::new(SandboxPool::new(runtime, Arc::new(LanguageRegistry::new())))
    }

    fn langs(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_initialize_creates_free_entries() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());

        let report = pool.initialize(&langs(&["python", "golang"]), 3).await;
        assert!(report.is_complete());
        assert_eq!(report.total_created(), 6);
        assert_eq!(pool.size("python"), 3);
        assert_eq!(pool.size("golang"), 3);
        assert_eq!(pool.size("javascript"), 0);
        assert_eq!(pool.in_use("python"), 0);
        assert_eq!(runtime.created(), 6);
    }

    #[tokio::test]
    async fn test_initialize_reports_failures() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.fail_next_creates(2);
        let pool = pool_with(runtime);

        let report = pool.initialize(&langs(&["python", "cobol"]), 3).await;
        assert!(!report.is_complete());
        assert_eq!(report.created.get("python"), Some(&1));
        assert_eq!(report.failures.len(), 3);
        assert!(report.failures.iter().any(|f| f.language == "cobol"));
        assert_eq!(
            report.failures.iter().filter(|f| f.language == "python").count(),
            2
        );
    }

    #[tokio::test]
    async fn test_acquire_prefers_free_entry() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());
        pool.initialize(&langs(&["python"]), 1).await;

        let lease = pool.acquire("py").await.unwrap();
        assert_eq!(lease.language(), "python");
        assert_eq!(pool.in_use("python"), 1);
        assert_eq!(runtime.created(), 1);

        let id = lease.id().clone();
        assert!(lease.release());
        assert_eq!(pool.in_use("python"), 0);

        let again = pool.acquire("python").await.unwrap();
        assert_eq!(again.id(), &id);
    }

    #[tokio::test]
    async fn test_on_demand_entry_is_claimed() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());

        let lease = pool.acquire("golang").await.unwrap();
        let snapshot = pool.snapshot("golang").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].in_use);
        assert_eq!(snapshot[0].uses, 1);
        assert_eq!(pool.metrics().sandboxes_created_on_demand.get(), 1);

        drop(lease);
        assert_eq!(pool.in_use("golang"), 0);
    }

    #[tokio::test]
    async fn test_unknown_language() {
        let pool = pool_with(Arc::new(InMemoryRuntime::new()));
        let err = pool.acquire("ruby").await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_release_unknown_is_noop() {
        let pool = pool_with(Arc::new(InMemoryRuntime::new()));
        pool.initialize(&langs(&["python"]), 1).await;

        assert!(!pool.release("python", &SandboxId::new("nope")));
        assert!(!pool.release("ruby", &SandboxId::new("nope")));
        assert_eq!(pool.size("python"), 1);
        assert_eq!(pool.metrics().release_misses.get(), 2);
    }

    #[tokio::test]
    async fn test_creation_failure_propagates() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.fail_next_creates(1);
        let pool = pool_with(runtime);

        let err = pool.acquire("javascript").await.unwrap_err();
        assert!(matches!(err, WarmboxError::Resource(_)));
        assert_eq!(pool.size("javascript"), 0);
    }

    #[tokio::test]
    async fn test_discard_removes_entry() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());
        pool.initialize(&langs(&["python"]), 2).await;

        let lease = pool.acquire("python").await.unwrap();
        let handle = lease.discard();
        assert_eq!(pool.size("python"), 1);
        assert_eq!(pool.in_use("python"), 0);

        handle.await.unwrap().unwrap();
        assert_eq!(runtime.removed(), 1);
        assert_eq!(runtime.live(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_minimum_and_leased() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());
        pool.initialize(&langs(&["python"]), 4).await;

        let lease = pool.acquire("python").await.unwrap();
        let report = pool.evict_idle(Duration::ZERO, 2).await;

        assert_eq!(report.removed.len(), 2);
        assert_eq!(pool.size("python"), 2);
        assert_eq!(pool.in_use("python"), 1);
        assert!(pool
            .snapshot("python")
            .unwrap()
            .iter()
            .any(|entry| entry.id == *lease.id()));
        assert_eq!(runtime.removed(), 2);
    }

    #[tokio::test]
    async fn test_drain_leaves_leased() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());
        pool.initialize(&langs(&["python", "javascript"]), 2).await;

        let lease = pool.acquire("javascript").await.unwrap();
        let report = pool.drain().await;

        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.skipped_in_use, 1);
        assert!(report.failures.is_empty());
        assert_eq!(pool.size("python"), 0);
        assert_eq!(pool.size("javascript"), 1);

        drop(lease);
        assert_eq!(pool.in_use("javascript"), 0);
    }

    #[tokio::test]
    async fn test_on_demand_growth_pulls_missing_image() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = Arc::new(
            SandboxPool::new(runtime.clone(), Arc::new(LanguageRegistry::new()))
                .with_image_pulls(true),
        );
        assert!(!runtime.image_present("golang:1.22").await.unwrap());

        let lease = pool.acquire("golang").await.unwrap();
        assert!(runtime.image_present("golang:1.22").await.unwrap());
        assert!(!runtime.image_present("python:3.12").await.unwrap());
        drop(lease);
    }

    #[tokio::test]
    async fn test_no_pulls_by_default() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let pool = pool_with(runtime.clone());

        pool.initialize(&langs(&["python"]), 1).await;
        drop(pool.acquire("python").await.unwrap());
        assert!(!runtime.image_present("python:3.12").await.unwrap());
    }

    #[tokio::test]
    async fn test_status() {
        let pool = pool_with(Arc::new(InMemoryRuntime::new()));
        pool.initialize(&langs(&["golang"]), 2).await;
        let _lease = pool.acquire("go").await.unwrap();

        let status = pool.status();
        assert_eq!(status.runtime, "in-memory");
        let golang = status
            .languages
            .iter()
            .find(|l| l.language == "golang")
            .unwrap();
        assert_eq!(golang.image, "golang:1.22");
        assert_eq!(golang.size, 2);
        assert_eq!(golang.in_use, 1);
    }
}
