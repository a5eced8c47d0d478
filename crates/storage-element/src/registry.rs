//! Backend registry and logical path dispatch
//!
//! The registry holds an ordered set of active backends. Every operation
//! takes a logical path, tries the backends in registration order and
//! returns the first success, translated back into logical form. A backend
//! failing with an error that [falls through](storage_core::Error::falls_through)
//! hands the call to the next one; only when all of them fail does the
//! caller see [`Error::NoWorkingBackend`].
//!
//! The active set is meant to be rebuilt once at startup. Swapping in the
//! stored default set with [`Registry::use_defaults`] affects every user of
//! the registry until the guard is dropped, so callers running concurrently
//! must not overlap such scopes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use storage_core::{Error, Result};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::{FileSize, PathStream, StorageBackend};

type BackendFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Ordered set of active storage backends
#[derive(Default)]
pub struct Registry {
    /// Backends consulted by the dispatching operations
    active: RwLock<Vec<Arc<dyn StorageBackend>>>,

    /// Snapshot restored by `use_defaults`
    defaults: RwLock<Vec<Arc<dyn StorageBackend>>>,
}

/// Thread-safe handle to a registry
pub type RegistryHandle = Arc<Registry>;

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all active backends
    pub fn reset(&self) {
        self.active.write().clear();
    }

    /// Append a backend, making it the lowest priority one
    pub fn register(&self, backend: Arc<dyn StorageBackend>) {
        debug!(
            backend = backend.name(),
            prefix = backend.prefix(),
            "Registered storage backend"
        );
        self.active.write().push(backend);
    }

    /// Remember the current active set as the default set
    pub fn store(&self) {
        let active = self.active.read().clone();
        *self.defaults.write() = active;
    }

    /// Number of active backends
    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    /// Names and prefixes of the active backends, in order
    pub fn backends(&self) -> Vec<(&'static str, String)> {
        self.active
            .read()
            .iter()
            .map(|b| (b.name(), b.prefix().to_string()))
            .collect()
    }

    /// Make the default set active until the guard is dropped
    pub fn use_defaults(&self) -> DefaultsGuard<'_> {
        let defaults = self.defaults.read().clone();
        let previous = std::mem::replace(&mut *self.active.write(), defaults);
        DefaultsGuard {
            registry: self,
            previous: Some(previous),
        }
    }

    /// Run `fut` with the default set active
    pub async fn with_defaults<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.use_defaults();
        fut.await
    }

    /// Try `call` on every backend in order, returning the first success
    async fn dispatch<T, C>(
        &self,
        operation: &'static str,
        lfn: &str,
        call: C,
    ) -> Result<(Arc<dyn StorageBackend>, T)>
    where
        C: Fn(Arc<dyn StorageBackend>, String) -> BackendFuture<T>,
    {
        let backends = self.active.read().clone();

        for backend in backends {
            let pfn = backend.lfn_to_pfn(lfn);
            match call(Arc::clone(&backend), pfn.clone()).await {
                Ok(value) => {
                    debug!(operation, lfn, %pfn, backend = backend.name(), "Resolved");
                    return Ok((backend, value));
                }
                Err(e) if e.falls_through() => {
                    debug!(
                        operation,
                        lfn,
                        %pfn,
                        backend = backend.name(),
                        error = %e,
                        "Backend failed, trying next"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::NoWorkingBackend {
            operation: operation.to_string(),
            path: lfn.to_string(),
        })
    }

    pub async fn exists(&self, lfn: &str) -> Result<bool> {
        self.dispatch("exists", lfn, |b, pfn| {
            Box::pin(async move { b.exists(&pfn).await })
        })
        .await
        .map(|(_, v)| v)
    }

    pub async fn getsize(&self, lfn: &str) -> Result<FileSize> {
        self.dispatch("getsize", lfn, |b, pfn| {
            Box::pin(async move { b.getsize(&pfn).await })
        })
        .await
        .map(|(_, v)| v)
    }

    pub async fn isdir(&self, lfn: &str) -> Result<bool> {
        self.dispatch("isdir", lfn, |b, pfn| {
            Box::pin(async move { b.isdir(&pfn).await })
        })
        .await
        .map(|(_, v)| v)
    }

    pub async fn isfile(&self, lfn: &str) -> Result<bool> {
        self.dispatch("isfile", lfn, |b, pfn| {
            Box::pin(async move { b.isfile(&pfn).await })
        })
        .await
        .map(|(_, v)| v)
    }

    /// List a directory; entries come back as logical paths
    pub async fn list(&self, lfn: &str) -> Result<PathStream> {
        let (backend, stream) = self
            .dispatch("list", lfn, |b, pfn| {
                Box::pin(async move { b.list(&pfn).await })
            })
            .await?;

        Ok(Box::pin(stream.map(move |entry| {
            entry.map(|pfn| backend.pfn_to_lfn(&pfn))
        })))
    }

    /// List a directory into a vector of logical paths
    pub async fn list_all(&self, lfn: &str) -> Result<Vec<String>> {
        let mut stream = self.list(lfn).await?;
        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    pub async fn makedirs(&self, lfn: &str) -> Result<()> {
        self.dispatch("makedirs", lfn, |b, pfn| {
            Box::pin(async move { b.makedirs(&pfn).await })
        })
        .await
        .map(|(_, v)| v)
    }

    pub async fn remove(&self, lfn: &str) -> Result<()> {
        self.dispatch("remove", lfn, |b, pfn| {
            Box::pin(async move { b.remove(&pfn).await })
        })
        .await
        .map(|(_, v)| v)
    }
}

/// Restores the previously active backends when dropped
pub struct DefaultsGuard<'a> {
    registry: &'a Registry,
    previous: Option<Vec<Arc<dyn StorageBackend>>>,
}

impl Drop for DefaultsGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.registry.active.write() = previous;
        }
    }
}
