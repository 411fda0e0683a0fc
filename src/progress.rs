use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Counters shared by every task of one run.
#[derive(Clone, Default)]
pub struct AnalysisProgress {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    entities: AtomicUsize,
    cache_hits: AtomicUsize,
    containers: AtomicUsize,
    bytes_hashed: AtomicU64,
    errors: AtomicUsize,
    is_active: AtomicBool,
    started_at: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub is_active: bool,
    pub entities: usize,
    pub cache_hits: usize,
    pub containers: usize,
    pub bytes_hashed: u64,
    pub errors: usize,
    pub elapsed_ms: u64,
}

impl AnalysisProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.inner.entities.store(0, Ordering::Release);
        self.inner.cache_hits.store(0, Ordering::Release);
        self.inner.containers.store(0, Ordering::Release);
        self.inner.bytes_hashed.store(0, Ordering::Release);
        self.inner.errors.store(0, Ordering::Release);
        self.inner.is_active.store(true, Ordering::Release);
        *self.inner.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    /// An entity was analyzed for the first time.
    pub fn inc_entity(&self, bytes: u64) {
        self.inner.entities.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_hashed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_container(&self) {
        self.inner.containers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.inner.is_active.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed_ms = self
            .inner
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        ProgressSnapshot {
            is_active: self.inner.is_active.load(Ordering::Acquire),
            entities: self.inner.entities.load(Ordering::Acquire),
            cache_hits: self.inner.cache_hits.load(Ordering::Acquire),
            containers: self.inner.containers.load(Ordering::Acquire),
            bytes_hashed: self.inner.bytes_hashed.load(Ordering::Acquire),
            errors: self.inner.errors.load(Ordering::Acquire),
            elapsed_ms,
        }
    }
}
