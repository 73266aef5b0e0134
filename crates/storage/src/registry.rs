//! Named connection pools and the active database.

use crate::error::DbResult;
use parking_lot::{Mutex, RwLock};
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Keyed map of database name to pool, plus the name currently in use.
///
/// Lookups take a short read lock and never wait on the network. Creating a
/// pool is serialized per database name, so two callers racing to open the
/// same database end up sharing one pool, while a slow or unreachable
/// database never delays connecting to a different one.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    pools: RwLock<HashMap<String, PgPool>>,
    active: RwLock<Option<String>>,
    connect_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<PgPool> {
        self.pools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.read().contains_key(name)
    }

    /// Number of open pools.
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Names with an open pool, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn active(&self) -> Option<String> {
        self.active.read().clone()
    }

    /// Pool of the active database, if any.
    pub fn active_pool(&self) -> Option<(String, PgPool)> {
        let name = self.active()?;
        let pool = self.get(&name)?;
        Some((name, pool))
    }

    /// Make `name` active. Returns false (and changes nothing) when it has
    /// no pool.
    pub fn set_active(&self, name: &str) -> bool {
        if !self.contains(name) {
            return false;
        }
        *self.active.write() = Some(name.to_string());
        debug!(database = name, "Active database set");
        true
    }

    /// Return the pool for `name`, creating it with `connect` when missing.
    ///
    /// The flag is true when this call created the pool.
    pub async fn get_or_connect<F, Fut>(&self, name: &str, connect: F) -> DbResult<(PgPool, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<PgPool>>,
    {
        if let Some(pool) = self.get(name) {
            return Ok((pool, false));
        }

        let lock = Arc::clone(self.connect_locks.lock().entry(name.to_string()).or_default());
        let _guard = lock.lock().await;

        // Another caller may have connected while we waited.
        if let Some(pool) = self.get(name) {
            return Ok((pool, false));
        }

        let pool = connect().await?;
        self.pools.write().insert(name.to_string(), pool.clone());
        info!(database = name, "Registered connection pool");

        Ok((pool, true))
    }

    /// Close every pool and clear the active database.
    pub async fn close_all(&self) {
        let pools: Vec<(String, PgPool)> = self.pools.write().drain().collect();
        *self.active.write() = None;

        for (name, pool) in pools {
            pool.close().await;
            debug!(database = %name, "Closed connection pool");
        }
    }
}
