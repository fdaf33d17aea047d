// src/cache/ordered.rs

use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, warn};

use super::{read_or_miss, CacheKeys, CachePolicy};
use crate::config::CacheConfig;
use crate::error::{ensure_key, Result};
use crate::storage::StorageBackend;

/// End of the order list that loses an entry on overflow.
///
/// The list runs from the oldest (or least recently touched) key at the front
/// to the newest (or most recently touched) key at the back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictFrom {
    Front,
    Back,
}

/// How an [`OrderedCache`] maintains its order list and picks a victim
pub trait Discipline: Debug + Send + Sync + 'static {
    const NAME: &'static str;

    /// Move a key to the back of the list on every hit and every write
    const REORDER_ON_ACCESS: bool;

    const EVICT_FROM: EvictFrom;
}

/// Evicts the oldest insert
#[derive(Debug)]
pub struct Fifo;

impl Discipline for Fifo {
    const NAME: &'static str = "fifo";
    const REORDER_ON_ACCESS: bool = false;
    const EVICT_FROM: EvictFrom = EvictFrom::Front;
}

/// Evicts the newest insert
#[derive(Debug)]
pub struct Lifo;

impl Discipline for Lifo {
    const NAME: &'static str = "lifo";
    const REORDER_ON_ACCESS: bool = false;
    const EVICT_FROM: EvictFrom = EvictFrom::Back;
}

/// Evicts the least recently touched key
#[derive(Debug)]
pub struct Lru;

impl Discipline for Lru {
    const NAME: &'static str = "lru";
    const REORDER_ON_ACCESS: bool = true;
    const EVICT_FROM: EvictFrom = EvictFrom::Front;
}

/// Evicts the most recently touched key
#[derive(Debug)]
pub struct Mru;

impl Discipline for Mru {
    const NAME: &'static str = "mru";
    const REORDER_ON_ACCESS: bool = true;
    const EVICT_FROM: EvictFrom = EvictFrom::Back;
}

pub type FifoCache<S> = OrderedCache<S, Fifo>;
pub type LifoCache<S> = OrderedCache<S, Lifo>;
pub type LruCache<S> = OrderedCache<S, Lru>;
pub type MruCache<S> = OrderedCache<S, Mru>;

/// Cache whose bookkeeping is a single list of keys in `{namespace}#order`.
///
/// A value that expired by TTL leaves its key in the list until a `get` miss,
/// `set` or `delete` for that key removes it; until then it still counts
/// towards capacity.
#[derive(Debug)]
pub struct OrderedCache<S, D>
where
    S: StorageBackend,
    D: Discipline,
{
    storage: S,
    config: CacheConfig,
    keys: CacheKeys,
    order_key: String,
    _discipline: PhantomData<D>,
}

impl<S, D> OrderedCache<S, D>
where
    S: StorageBackend,
    D: Discipline,
{
    pub fn new(storage: S, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let keys = CacheKeys::new(&config.namespace);
        let order_key = keys.meta("order");
        Ok(Self {
            storage,
            config,
            keys,
            order_key,
            _discipline: PhantomData,
        })
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    async fn evict_one(&self) -> Result<Option<String>> {
        let victim = match D::EVICT_FROM {
            EvictFrom::Front => self.storage.pop_front(&self.order_key).await?,
            EvictFrom::Back => self.storage.pop_back(&self.order_key).await?,
        };
        if let Some(victim) = &victim {
            self.storage.delete(&self.keys.value(victim)).await?;
            debug!(
                policy = D::NAME,
                namespace = self.keys.namespace(),
                key = %victim,
                "Evicted cache entry"
            );
        }
        Ok(victim)
    }

    /// Moves a key that was just read to the back of the list
    async fn touch(&self, key: &str) -> Result<()> {
        // A concurrent delete may have removed it; do not resurrect it
        if self.storage.list_remove(&self.order_key, key).await? > 0 {
            self.storage.push_back(&self.order_key, key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S, D> CachePolicy for OrderedCache<S, D>
where
    S: StorageBackend,
    D: Discipline,
{
    fn name(&self) -> &'static str {
        D::NAME
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        ensure_key(key)?;
        let value = read_or_miss(self.storage.get(&self.keys.value(key)).await, D::NAME, key)?;

        match &value {
            Some(_) if D::REORDER_ON_ACCESS => {
                if let Err(err) = self.touch(key).await {
                    warn!(policy = D::NAME, key, error = %err, "Failed to update access order");
                }
            }
            Some(_) => {}
            None => {
                // Expired values leave their key behind in the list
                if let Err(err) = self.storage.list_remove(&self.order_key, key).await {
                    debug!(policy = D::NAME, key, error = %err, "Failed to drop stale order entry");
                }
            }
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<Option<String>> {
        ensure_key(key)?;
        let value_key = self.keys.value(key);
        let ttl = ttl.or(self.config.default_ttl);

        // Overwriting a live entry keeps its insertion position
        if !D::REORDER_ON_ACCESS && self.storage.exists(&value_key).await? {
            self.storage.set(&value_key, value, ttl).await?;
            return Ok(None);
        }

        let tracked = self.storage.list_remove(&self.order_key, key).await? > 0;
        let mut evicted = None;
        if !tracked
            && self.storage.list_len(&self.order_key).await? >= self.config.capacity as u64
        {
            evicted = self.evict_one().await?;
        }

        self.storage.push_back(&self.order_key, key).await?;
        self.storage.set(&value_key, value, ttl).await?;
        Ok(evicted)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;
        let existed = self.storage.delete(&self.keys.value(key)).await?;
        self.storage.list_remove(&self.order_key, key).await?;
        Ok(existed)
    }

    async fn clear(&self) -> Result<u64> {
        let values = self.storage.scan_prefix(&self.keys.value_prefix()).await?;
        let removed = self.storage.delete_many(&values).await?;
        self.storage.delete(&self.order_key).await?;
        debug!(policy = D::NAME, namespace = self.keys.namespace(), removed, "Cleared cache");
        Ok(removed)
    }

    async fn len(&self) -> Result<u64> {
        self.storage.list_len(&self.order_key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.storage.list_range(&self.order_key).await
    }
}
