//! The initialization token every entry point requires.
//!
//! A [`Runtime`] owns the operation [`Registry`], the resolved configuration,
//! the native handle counters and the per-operation call statistics. Creating
//! one is the one-time setup; [`Runtime::shutdown`] is the teardown, after which
//! every entry point fails with [`Error::ShutDown`].
//!
//! Most programs need exactly one runtime. [`Runtime::shared`] creates it
//! lazily on first use and hands out the same instance afterwards.
//!
//! ## Handle accounting
//!
//! Every image and library-allocated blob holds a [`ReleaseGuard`]. The guard
//! is created when the native resource is wrapped and dropped together with
//! it, so release happens exactly once, synchronously, when the last handle
//! goes away. [`Runtime::handle_stats`] exposes the counters; the shutdown
//! report uses them to detect leaks.

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::interpolate::Interpolator;
use crate::registry::{Registry, Schema};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, trace, warn};

static SHARED: OnceLock<Runtime> = OnceLock::new();

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    config: RuntimeConfig,
    registry: Registry,
    default_interpolator: Interpolator,
    handles: Arc<HandleTracker>,
    calls: Mutex<BTreeMap<String, CallCounter>>,
    shut_down: AtomicBool,
}

/// Calls and failures recorded for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CallCounter {
    pub calls: u64,
    pub failures: u64,
}

/// What was still alive when the runtime was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub leaked_images: usize,
    pub leaked_blobs: usize,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.leaked_images == 0 && self.leaked_blobs == 0
    }
}

impl Runtime {
    /// Start a runtime with the built-in operations.
    pub fn startup(config: RuntimeConfig) -> Result<Self> {
        Self::with_registry(config, Registry::builtin())
    }

    /// Start a runtime over a caller-assembled registry.
    pub fn with_registry(config: RuntimeConfig, registry: Registry) -> Result<Self> {
        config.validate()?;
        let default_interpolator =
            Interpolator::from_registry(&registry, &config.default_interpolator)?;
        info!(
            operations = registry.len(),
            interpolator = %default_interpolator,
            "runtime started"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                registry,
                default_interpolator,
                handles: Arc::new(HandleTracker::default()),
                calls: Mutex::new(BTreeMap::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// The process-wide runtime, created with default config on first use.
    ///
    /// Repeated calls return the same instance. Once it has been shut down it
    /// stays shut down.
    pub fn shared() -> Result<Self> {
        if let Some(runtime) = SHARED.get() {
            return Ok(runtime.clone());
        }
        let runtime = Self::startup(RuntimeConfig::default())?;
        Ok(SHARED.get_or_init(|| runtime).clone())
    }

    /// Tear the runtime down. Idempotent; only the first call reports leaks.
    pub fn shutdown(&self) -> ShutdownReport {
        let stats = self.handle_stats();
        let report = ShutdownReport {
            leaked_images: stats.live_images,
            leaked_blobs: stats.live_blobs,
        };
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return report;
        }
        if self.inner.config.report_leaks && !report.is_clean() {
            warn!(
                images = report.leaked_images,
                blobs = report.leaked_blobs,
                "handles still alive at shutdown"
            );
        }
        info!("runtime shut down");
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        Ok(())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn default_interpolator(&self) -> Interpolator {
        self.inner.default_interpolator
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<&'static str> {
        self.inner.registry.names()
    }

    /// Argument schema of one operation.
    pub fn describe(&self, operation: &str) -> Result<Arc<Schema>> {
        self.inner.registry.schema(operation)
    }

    pub fn handle_stats(&self) -> HandleStats {
        self.inner.handles.stats()
    }

    pub fn call_stats(&self) -> BTreeMap<String, CallCounter> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn handles(&self) -> &Arc<HandleTracker> {
        &self.inner.handles
    }

    pub(crate) fn record_call(&self, operation: &str, succeeded: bool) {
        if !self.inner.config.collect_stats {
            return;
        }
        let mut calls = self
            .inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let counter = calls.entry(operation.to_string()).or_default();
        counter.calls += 1;
        if !succeeded {
            counter.failures += 1;
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("operations", &self.inner.registry.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

// ============================================================================
// Handle accounting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    Image,
    Blob,
}

/// Live and released native handle counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HandleStats {
    pub live_images: usize,
    pub released_images: usize,
    pub live_blobs: usize,
    pub released_blobs: usize,
}

#[derive(Debug, Default)]
pub(crate) struct HandleTracker {
    next_id: AtomicU64,
    live_images: AtomicUsize,
    released_images: AtomicUsize,
    live_blobs: AtomicUsize,
    released_blobs: AtomicUsize,
}

impl HandleTracker {
    pub(crate) fn acquire(self: &Arc<Self>, kind: HandleKind) -> ReleaseGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live(kind).fetch_add(1, Ordering::SeqCst);
        trace!(?kind, id, "handle acquired");
        ReleaseGuard {
            tracker: Arc::clone(self),
            kind,
            id,
        }
    }

    pub(crate) fn stats(&self) -> HandleStats {
        HandleStats {
            live_images: self.live_images.load(Ordering::SeqCst),
            released_images: self.released_images.load(Ordering::SeqCst),
            live_blobs: self.live_blobs.load(Ordering::SeqCst),
            released_blobs: self.released_blobs.load(Ordering::SeqCst),
        }
    }

    fn live(&self, kind: HandleKind) -> &AtomicUsize {
        match kind {
            HandleKind::Image => &self.live_images,
            HandleKind::Blob => &self.live_blobs,
        }
    }

    fn released(&self, kind: HandleKind) -> &AtomicUsize {
        match kind {
            HandleKind::Image => &self.released_images,
            HandleKind::Blob => &self.released_blobs,
        }
    }
}

/// Accounts for one native resource. Dropping it is the release.
pub(crate) struct ReleaseGuard {
    tracker: Arc<HandleTracker>,
    kind: HandleKind,
    id: u64,
}

impl ReleaseGuard {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.tracker.live(self.kind).fetch_sub(1, Ordering::SeqCst);
        self.tracker.released(self.kind).fetch_add(1, Ordering::SeqCst);
        debug!(kind = ?self.kind, id = self.id, "handle released");
    }
}
