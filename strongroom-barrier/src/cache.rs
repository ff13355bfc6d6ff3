use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    future::Future,
    hash::{Hash as StdHash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use strongroom_core::{log, parking_lot, tokio, ElasticKeyId, IntermediateKeyId};
use strongroom_encryption::SecretKey;

use crate::{BarrierError, CacheConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq, StdHash)]
pub struct CacheKey {
    pub elastic_key_id: ElasticKeyId,
    pub version: u32,
}

struct CacheEntry {
    material: Arc<SecretKey>,
    intermediate_key_id: IntermediateKeyId,
    last_access: Instant,
    tick: u64,
}

#[derive(Default)]
struct Shard {
    entries: HashMap<CacheKey, CacheEntry>,
    // bumped by every purge so a load that raced it is not inserted
    generation: u64,
}

impl Shard {
    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.tick)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            trace!("Evicting {:?}", key);
            self.entries.remove(&key);
        }
    }
}

/// Plaintext content key material for recently used versions. Sharded by
/// elastic key id so unrelated keys never contend on one lock. Material is
/// lent to a closure for one operation and never handed out by value.
pub struct UnwrappedKeyCache {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: usize,
    idle_timeout: Option<Duration>,
    clock: AtomicU64,
}

impl UnwrappedKeyCache {
    pub fn new(config: &CacheConfig) -> Self {
        let shards = config.shards.max(1);
        let shard_capacity = ((config.capacity + shards - 1) / shards).max(1);
        UnwrappedKeyCache {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            shard_capacity,
            idle_timeout: config.idle_timeout(),
            clock: AtomicU64::new(0),
        }
    }

    fn shard(&self, elastic_key_id: &ElasticKeyId) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        elastic_key_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn is_idle(&self, entry: &CacheEntry, now: Instant) -> bool {
        match self.idle_timeout {
            Some(timeout) => now.saturating_duration_since(entry.last_access) > timeout,
            None => false,
        }
    }

    /// Hit: the material is touched and returned. Miss: the current shard
    /// generation, to be handed back to `insert`.
    fn lookup(&self, key: &CacheKey) -> Result<Arc<SecretKey>, u64> {
        let now = Instant::now();
        let tick = self.tick();
        let mut shard = self.shard(&key.elastic_key_id).lock();
        let idle = match shard.entries.get(key) {
            Some(entry) => self.is_idle(entry, now),
            None => return Err(shard.generation),
        };
        if idle {
            shard.entries.remove(key);
            return Err(shard.generation);
        }
        match shard.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = now;
                entry.tick = tick;
                Ok(entry.material.clone())
            }
            None => Err(shard.generation),
        }
    }

    fn insert(
        &self,
        key: CacheKey,
        material: Arc<SecretKey>,
        intermediate_key_id: IntermediateKeyId,
        generation: u64,
    ) {
        let tick = self.tick();
        let mut shard = self.shard(&key.elastic_key_id).lock();
        if shard.generation != generation {
            trace!("Dropping stale load of {:?}", key);
            return;
        }
        if !shard.entries.contains_key(&key) && shard.entries.len() >= self.shard_capacity {
            shard.evict_lru();
        }
        shard.entries.insert(
            key,
            CacheEntry {
                material,
                intermediate_key_id,
                last_access: Instant::now(),
                tick,
            },
        );
    }

    /// Run `op` with the plaintext material for `key`, unwrapping through
    /// `load` on a miss. The loader runs without any shard lock held.
    pub async fn with_material<T, L, Fut, F>(
        &self,
        key: CacheKey,
        load: L,
        op: F,
    ) -> Result<T, BarrierError>
    where
        L: FnOnce() -> Fut,
        Fut: Future<Output = Result<(SecretKey, IntermediateKeyId), BarrierError>>,
        F: FnOnce(&SecretKey) -> Result<T, BarrierError>,
    {
        let material = match self.lookup(&key) {
            Ok(material) => material,
            Err(generation) => {
                trace!("Cache miss {:?}", key);
                let (secret, intermediate_key_id) = load().await?;
                let material = Arc::new(secret);
                self.insert(key, material.clone(), intermediate_key_id, generation);
                material
            }
        };
        op(material.as_ref())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.shard(&key.elastic_key_id).lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached versions of one elastic key.
    pub fn count_for(&self, elastic_key_id: &ElasticKeyId) -> usize {
        self.shard(elastic_key_id)
            .lock()
            .entries
            .keys()
            .filter(|k| &k.elastic_key_id == elastic_key_id)
            .count()
    }

    pub fn invalidate_version(&self, elastic_key_id: ElasticKeyId, version: u32) {
        let mut shard = self.shard(&elastic_key_id).lock();
        shard.generation += 1;
        if shard
            .entries
            .remove(&CacheKey {
                elastic_key_id,
                version,
            })
            .is_some()
        {
            debug!("Invalidated cached {} v{}", elastic_key_id, version);
        }
    }

    pub fn purge_elastic_key(&self, elastic_key_id: ElasticKeyId) {
        let mut shard = self.shard(&elastic_key_id).lock();
        shard.generation += 1;
        let before = shard.entries.len();
        shard.entries.retain(|k, _| k.elastic_key_id != elastic_key_id);
        debug!(
            "Purged {} cached versions of {}",
            before - shard.entries.len(),
            elastic_key_id
        );
    }

    /// Drop every entry unwrapped through `intermediate_key_id`.
    pub fn purge_intermediate_key(&self, intermediate_key_id: IntermediateKeyId) {
        let mut purged = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.generation += 1;
            let before = shard.entries.len();
            shard
                .entries
                .retain(|_, e| e.intermediate_key_id != intermediate_key_id);
            purged += before - shard.entries.len();
        }
        debug!(
            "Purged {} cached versions wrapped by {}",
            purged, intermediate_key_id
        );
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.generation += 1;
            shard.entries.clear();
        }
    }

    /// Remove entries idle longer than the configured timeout, as of `now`.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        if self.idle_timeout.is_none() {
            return 0;
        }
        let mut swept = 0;
        // one shard at a time, never across an await
        for shard in &self.shards {
            let mut shard = shard.lock();
            let before = shard.entries.len();
            shard.entries.retain(|_, e| !self.is_idle(e, now));
            swept += before - shard.entries.len();
        }
        if swept > 0 {
            debug!("Swept {} idle cache entries", swept);
        }
        swept
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// Periodic idle sweep for the lifetime of the returned task.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        })
    }
}
