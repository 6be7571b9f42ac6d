//! Hash map sharded by 128-bit key hash
//!
//! The hash space is cut into `n` equal chunks; shard `r` holds every key
//! whose hash falls in chunk `r`. Parallel builders give each worker one
//! shard through [`ParallelHashMap::shards_mut`], so no shard is ever
//! written by two threads.

use hashbrown::HashMap;

/// Bucket of `hash` when the 128-bit space is split into `n` chunks
pub fn bucket_of(hash: u128, n: usize) -> usize {
    let n = n.max(1);
    let chunk = u128::MAX / n as u128;
    ((hash / chunk) as usize).min(n - 1)
}

#[derive(Debug, Clone)]
pub struct ParallelHashMap<V> {
    shards: Vec<HashMap<u128, V>>,
}

impl<V> ParallelHashMap<V> {
    pub fn new(num_shards: usize) -> Self {
        Self {
            shards: (0..num_shards.max(1)).map(|_| HashMap::new()).collect(),
        }
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_of(&self, hash: u128) -> usize {
        bucket_of(hash, self.shards.len())
    }

    pub fn get(&self, hash: u128) -> Option<&V> {
        self.shards[self.shard_of(hash)].get(&hash)
    }

    pub fn contains_key(&self, hash: u128) -> bool {
        self.get(hash).is_some()
    }

    pub fn insert(&mut self, hash: u128, v: V) -> Option<V> {
        let r = self.shard_of(hash);
        self.shards[r].insert(hash, v)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(HashMap::is_empty)
    }

    pub fn shard(&self, r: usize) -> &HashMap<u128, V> {
        &self.shards[r]
    }

    /// One exclusive handle per shard
    pub fn shards_mut(&mut self) -> std::slice::IterMut<'_, HashMap<u128, V>> {
        self.shards.iter_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u128, &V)> {
        self.shards.iter().flat_map(|s| s.iter())
    }
}
