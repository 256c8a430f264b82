//! Connected-backend cache.
//!
//! Connecting a backend is expensive (COM init plus a tree walk), so live
//! adapters are cached per main-window handle and handed out one caller
//! at a time. The entry mutex is held for a whole workflow run, which
//! serializes automation against the same window while leaving other
//! windows free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::{debug, info, warn};

use crate::backend::{create_backend, BackendKind, WeChatBackend, DEFAULT_PREFERENCE};
use crate::config::BridgeConfig;
use crate::errors::AutomationError;
use crate::types::WindowRef;

type Factory =
    Box<dyn Fn(BackendKind, &BridgeConfig) -> Result<Box<dyn WeChatBackend>, AutomationError> + Send + Sync>;

pub struct PooledBackend {
    pub backend: Box<dyn WeChatBackend>,
    pub window: WindowRef,
}

pub struct BackendPool {
    entries: Mutex<HashMap<isize, Arc<Mutex<PooledBackend>>>>,
    config: BridgeConfig,
    factory: Factory,
}

impl BackendPool {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_factory(config, Box::new(create_backend))
    }

    /// Test seam: swap the adapter constructor.
    pub fn with_factory(config: BridgeConfig, factory: Factory) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            factory,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Get a connected backend for the window `hint` names, or for any
    /// WeChat main window when `hint` is `None`. Dead cached entries are
    /// evicted and reconnected. Adapter fallback happens only here: once
    /// an entry exists, its backend kind is fixed for its lifetime.
    pub fn acquire(
        &self,
        hint: Option<isize>,
    ) -> Result<Arc<Mutex<PooledBackend>>, AutomationError> {
        // The map lock is never held across an entry-mutex probe: a
        // workflow holding one window's entry must not stall lookups
        // for other windows.
        if let Some((key, entry)) = self.lookup(hint)? {
            let reusable = match entry.try_lock() {
                Ok(pooled) => pooled.backend.is_alive(),
                // Held entries are mid-workflow, hence alive.
                Err(TryLockError::WouldBlock) => true,
                Err(TryLockError::Poisoned(_)) => false,
            };
            if reusable {
                debug!(handle = key, "reusing pooled backend");
                return Ok(entry);
            }
            warn!(handle = key, "evicting dead pooled backend");
            self.evict(key, &entry)?;
        }

        let (backend, window) = self.connect_any(hint)?;
        let handle = window.handle;
        let mut entries = self.lock_entries()?;
        let entry = entries
            .entry(handle)
            .or_insert_with(|| Arc::new(Mutex::new(PooledBackend { backend, window })))
            .clone();
        Ok(entry)
    }

    /// Drop every cached adapter. Used at shutdown.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    fn lock_entries(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<isize, Arc<Mutex<PooledBackend>>>>, AutomationError> {
        self.entries
            .lock()
            .map_err(|_| AutomationError::Internal("backend pool poisoned".to_string()))
    }

    fn lookup(
        &self,
        hint: Option<isize>,
    ) -> Result<Option<(isize, Arc<Mutex<PooledBackend>>)>, AutomationError> {
        let entries = self.lock_entries()?;
        let key = match hint {
            Some(handle) => handle,
            None => match entries.keys().next() {
                Some(handle) => *handle,
                None => return Ok(None),
            },
        };
        Ok(entries.get(&key).map(|entry| (key, entry.clone())))
    }

    /// Remove `stale` unless another caller already replaced it.
    fn evict(
        &self,
        key: isize,
        stale: &Arc<Mutex<PooledBackend>>,
    ) -> Result<(), AutomationError> {
        let mut entries = self.lock_entries()?;
        if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, stale)) {
            entries.remove(&key);
        }
        Ok(())
    }

    fn connect_any(
        &self,
        hint: Option<isize>,
    ) -> Result<(Box<dyn WeChatBackend>, WindowRef), AutomationError> {
        let mut last_err = None;
        for kind in DEFAULT_PREFERENCE {
            let mut backend = match (self.factory)(kind, &self.config) {
                Ok(backend) => backend,
                Err(err) => {
                    warn!(kind = kind.as_str(), %err, "backend unavailable");
                    last_err = Some(err);
                    continue;
                }
            };
            match backend.connect(hint) {
                Ok(window) => {
                    info!(kind = kind.as_str(), handle = window.handle, "backend connected");
                    return Ok((backend, window));
                }
                Err(err) => {
                    warn!(kind = kind.as_str(), %err, "backend connect failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AutomationError::BackendUnavailable("no automation backend available".to_string())
        }))
    }
}
