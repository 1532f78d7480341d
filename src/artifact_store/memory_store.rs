use super::models::{Artifact, ArtifactFamily, ArtifactId};
use super::{ArtifactSession, ArtifactStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct Shared {
    family: ArtifactFamily,
    rows: Mutex<BTreeMap<ArtifactId, Artifact>>,
    fail_acquire: AtomicBool,
    fail_scan: AtomicBool,
    failing_writes: Mutex<HashMap<ArtifactId, StoreError>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    update_calls: AtomicUsize,
}

/// Artifact store kept in process memory.
///
/// Failures can be injected at acquisition, at scan time, or per artifact on
/// write. Session acquisition and release are counted.
#[derive(Clone)]
pub struct InMemoryArtifactStore {
    shared: Arc<Shared>,
}

impl InMemoryArtifactStore {
    pub fn new(family: ArtifactFamily) -> Self {
        Self {
            shared: Arc::new(Shared {
                family,
                rows: Mutex::new(BTreeMap::new()),
                fail_acquire: AtomicBool::new(false),
                fail_scan: AtomicBool::new(false),
                failing_writes: Mutex::new(HashMap::new()),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                update_calls: AtomicUsize::new(0),
            }),
        }
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<ArtifactId, Artifact>> {
        self.shared.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts or replaces an artifact. Its family is forced to the store's.
    pub fn insert(&self, mut artifact: Artifact) {
        artifact.family = self.shared.family;
        self.rows().insert(artifact.id.clone(), artifact);
    }

    pub fn get(&self, id: &ArtifactId) -> Option<Artifact> {
        self.rows().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    pub fn set_fail_acquire(&self, fail: bool) {
        self.shared.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_scan(&self, fail: bool) {
        self.shared.fail_scan.store(fail, Ordering::SeqCst);
    }

    /// Makes every write to `id` fail with `error`.
    pub fn fail_writes_for(&self, id: impl Into<ArtifactId>, error: StoreError) {
        self.shared
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.into(), error);
    }

    pub fn acquired_sessions(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn released_sessions(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.acquired_sessions() - self.released_sessions()
    }

    pub fn update_calls(&self) -> usize {
        self.shared.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn family(&self) -> ArtifactFamily {
        self.shared.family
    }

    async fn acquire(&self) -> Result<Box<dyn ArtifactSession>, StoreError> {
        if self.shared.fail_acquire.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected acquire failure".to_string()));
        }
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            store: self.clone(),
        }))
    }
}

struct InMemorySession {
    store: InMemoryArtifactStore,
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.store.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArtifactSession for InMemorySession {
    async fn find_expiring(&self, cutoff: DateTime<Utc>) -> Result<Vec<Artifact>, StoreError> {
        if self.store.shared.fail_scan.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected scan failure".to_string()));
        }
        let mut found: Vec<Artifact> = self
            .store
            .rows()
            .values()
            .filter(|a| a.expires_before(cutoff))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.url_expires_at);
        Ok(found)
    }

    async fn update_url(
        &self,
        id: &ArtifactId,
        access_url: &str,
        url_expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.store.shared.update_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .store
            .shared
            .failing_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned();
        if let Some(err) = injected {
            return Err(err);
        }

        let mut rows = self.store.rows();
        let row = rows
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        row.access_url = Some(access_url.to_string());
        row.url_expires_at = Some(url_expires_at);
        Ok(())
    }
}
