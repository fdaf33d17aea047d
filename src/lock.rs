// src/lock.rs

//! Mutual exclusion across processes, built from `SET NX PX` and a
//! token-checked delete.

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::{ensure_key, GuardError, Result};
use crate::storage::{ttl_millis, StorageBackend, StoreScript};
use crate::storage_op;

/// Key prefix for lock records
pub const LOCK_PREFIX: &str = "lock:";

/// A named lock with its own owner token.
///
/// Two `DistributedLock`s for the same name, in this process or another,
/// exclude each other. The lock never fails open: store errors surface as
/// errors, never as a successful acquire.
///
/// A holder that stalls past `ttl` loses the lock to the next acquirer. Its
/// later `release` is then a no-op returning `false`.
///
/// Every lock carries a distinct token, so the type is not `Clone`; build a
/// second lock with [`DistributedLock::new`].
#[derive(Debug)]
pub struct DistributedLock<S>
where
    S: StorageBackend + Clone + 'static,
{
    storage: S,
    name: String,
    key: String,
    token: String,
    config: LockConfig,
}

impl<S> DistributedLock<S>
where
    S: StorageBackend + Clone + 'static,
{
    pub fn new(storage: S, name: &str, config: LockConfig) -> Result<Self> {
        ensure_key(name)?;
        config.validate()?;
        Ok(Self {
            storage,
            name: name.to_string(),
            key: format!("{}{}", LOCK_PREFIX, name),
            token: Uuid::new_v4().simple().to_string(),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// One attempt. Returns whether this holder now owns the lock.
    pub async fn acquire(&self) -> Result<bool> {
        let start = Instant::now();
        let result = self
            .storage
            .set_if_absent(&self.key, self.token.as_bytes(), Some(self.config.ttl))
            .await;
        storage_op!("acquire_lock", self.key.as_str(), result, start.elapsed().as_millis() as u64);
        result
    }

    /// Polls every `poll_interval` until acquired, giving up with
    /// [`GuardError::LockTimeout`] once `timeout` has passed.
    pub async fn acquire_blocking(&self) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.acquire().await? {
                debug!(lock = %self.name, waited_ms = start.elapsed().as_millis() as u64, "Lock acquired");
                return Ok(());
            }

            let waited = start.elapsed();
            if let Some(timeout) = self.config.timeout {
                if waited >= timeout {
                    return Err(GuardError::LockTimeout {
                        name: self.name.clone(),
                        waited_ms: waited.as_millis() as u64,
                    });
                }
                time::sleep(self.config.poll_interval.min(timeout - waited)).await;
            } else {
                time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// Deletes the lock if this holder still owns it
    pub async fn release(&self) -> Result<bool> {
        release_token(&self.storage, &self.key, &self.token).await
    }

    /// Resets the remaining lifetime to `ttl`.
    ///
    /// Fails with [`GuardError::LockNotOwned`] when the lock expired or
    /// belongs to someone else.
    pub async fn extend(&self, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(GuardError::invalid("lock ttl must be positive"));
        }
        let extended = self
            .storage
            .eval_script(
                StoreScript::ExtendLock,
                &[&self.key],
                &[self.token.clone(), ttl_millis(ttl).to_string()],
            )
            .await?;
        if extended == 1 {
            Ok(())
        } else {
            Err(GuardError::LockNotOwned(self.name.clone()))
        }
    }

    /// Whether the stored token is this holder's
    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.storage.get(&self.key).await?.as_deref() == Some(self.token.as_bytes()))
    }

    /// Blocking acquire returning a guard that releases the lock when dropped
    pub async fn lock(&self) -> Result<LockGuard<S>> {
        self.acquire_blocking().await?;
        Ok(LockGuard {
            storage: self.storage.clone(),
            name: self.name.clone(),
            key: self.key.clone(),
            token: self.token.clone(),
            released: false,
        })
    }

    /// Runs `f` while holding the lock and releases it afterwards, whether `f`
    /// succeeded or not. A cancelled call leaves the release to the guard.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.lock().await?;
        let result = f().await;
        if let Err(err) = guard.unlock().await {
            warn!(lock = %self.name, error = %err, "Lock was lost before the critical section ended");
        }
        result
    }
}

async fn release_token<S: StorageBackend>(storage: &S, key: &str, token: &str) -> Result<bool> {
    let released = storage
        .eval_script(StoreScript::ReleaseLock, &[key], &[token.to_string()])
        .await?;
    Ok(released == 1)
}

/// Held lock. Dropping it spawns a best-effort release on the current tokio
/// runtime; without one the record is left to expire.
#[derive(Debug)]
pub struct LockGuard<S>
where
    S: StorageBackend + Clone + 'static,
{
    storage: S,
    name: String,
    key: String,
    token: String,
    released: bool,
}

impl<S> LockGuard<S>
where
    S: StorageBackend + Clone + 'static,
{
    /// Releases now, failing with [`GuardError::LockNotOwned`] if the lock
    /// expired while held
    pub async fn unlock(mut self) -> Result<()> {
        let released = release_token(&self.storage, &self.key, &self.token).await;
        self.released = true;
        if released? {
            Ok(())
        } else {
            Err(GuardError::LockNotOwned(self.name.clone()))
        }
    }
}

impl<S> Drop for LockGuard<S>
where
    S: StorageBackend + Clone + 'static,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %self.name, "No tokio runtime to release lock, leaving it to expire");
            return;
        };

        let storage = self.storage.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        let name = std::mem::take(&mut self.name);
        handle.spawn(async move {
            if let Err(err) = release_token(&storage, &key, &token).await {
                warn!(lock = %name, error = %err, "Failed to release dropped lock");
            }
        });
    }
}
