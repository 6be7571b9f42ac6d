//! Hash index over composite keys
//!
//! ## Build
//!
//! `build_index(columns)` groups the rows of `m` equally long columns by
//! their composite key. With `nt` workers:
//!
//! 1. **Hash pass.** Worker `k` owns a contiguous row range. For each row it
//!    hashes every column's entry, combines them into one 128-bit key hash
//!    and routes `(hash, row)` into its private bucket `bucket_of(hash, nt)`.
//! 2. **Merge pass.** The per-worker buckets are transposed by move, so
//!    worker `r` owns every pair routed to bucket `r` together with shard `r`
//!    of the group map. Groups keep rows in worker order, which is ascending
//!    row order because the hash-pass ranges are contiguous.
//! 3. **Output pass.** Worker `r` writes its groups into a disjoint range of
//!    the flat row column through its own segment and fills shard `r` of
//!    both lookup maps.
//!
//! ## Result
//!
//! ```text
//! keys     [int!]        representative (first) row of each distinct key
//! flat     [int:n!]      every row, grouped by key
//! grouped  [[int!]]      per key, a COLUMN_RANGE ref into `flat`
//! hash -> key ordinal, hash -> [lo, hi) into `flat`
//! ```
//!
//! Results are memoized by the structural hash of the source columns.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::codec::{combine_key_hashes, row_hash, struct_hash_all, value_hash};
use crate::column::{column_from_integers, column_length, value_column_at, value_deref, ColumnBuilder};
use crate::error::{StoreError, StoreResult};
use crate::hashmap::{bucket_of, ParallelHashMap};
use crate::pool::{partition, WorkerPool};
use crate::registry::Registry;
use crate::types::{assert_type_valid, IndexMode, ValueType};
use crate::value::{Value, ValueKind};

/// Contents of an INDEX value
pub struct IndexData {
    keys: Arc<Value>,
    flat: Arc<Value>,
    grouped: Arc<Value>,
    /// Distinct key hashes, in key order
    hashes: Vec<u128>,
    /// Per key, its rows' span in `flat`
    ranges: Vec<(i64, i64)>,
    singleton: ParallelHashMap<i64>,
    range_map: ParallelHashMap<(i64, i64)>,
    mode: IndexMode,
}

impl fmt::Debug for IndexData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexData")
            .field("keys", &self.hashes.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl IndexData {
    /// Reassemble an index from its stored parts, rebuilding the lookup maps
    pub fn from_parts(
        registry: &Registry,
        keys: Arc<Value>,
        flat: Arc<Value>,
        grouped: Arc<Value>,
        hashes: Vec<u128>,
        ranges: Vec<(i64, i64)>,
        mode: IndexMode,
    ) -> StoreResult<Self> {
        let n = hashes.len();
        if ranges.len() != n
            || column_length(registry, &keys)? != n as i64
            || column_length(registry, &grouped)? != n as i64
        {
            return Err(StoreError::malformed(format!(
                "index parts disagree on the number of keys ({} hashes, {} ranges)",
                n,
                ranges.len()
            )));
        }
        let total = column_length(registry, &flat)?;

        let mut singleton = ParallelHashMap::new(1);
        let mut range_map = ParallelHashMap::new(1);
        for (ordinal, (h, (lo, hi))) in hashes.iter().zip(&ranges).enumerate() {
            if *lo < 0 || lo > hi || *hi > total {
                return Err(StoreError::OutOfBounds { index: *hi, length: total });
            }
            if singleton.insert(*h, ordinal as i64).is_some() {
                return Err(StoreError::malformed(format!("duplicate key hash {:032x} in index", h)));
            }
            range_map.insert(*h, (*lo, *hi));
        }

        Ok(Self { keys, flat, grouped, hashes, ranges, singleton, range_map, mode })
    }

    /// Representative row of each distinct key
    pub fn keys(&self) -> &Arc<Value> {
        &self.keys
    }

    /// All rows, grouped by key
    pub fn flat(&self) -> &Arc<Value> {
        &self.flat
    }

    /// Per key, the column of its rows
    pub fn grouped(&self) -> &Arc<Value> {
        &self.grouped
    }

    pub fn hashes(&self) -> &[u128] {
        &self.hashes
    }

    pub fn ranges(&self) -> &[(i64, i64)] {
        &self.ranges
    }

    pub fn num_keys(&self) -> usize {
        self.hashes.len()
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    /// Ordinal of the key with this hash
    pub fn key_ordinal(&self, hash: u128) -> Option<i64> {
        self.singleton.get(hash).copied()
    }

    /// Span of `flat` holding the rows of the key with this hash
    pub fn range_of(&self, hash: u128) -> Option<(i64, i64)> {
        self.range_map.get(hash).copied()
    }
}

struct CacheInner {
    map: HashMap<u128, Arc<Value>>,
    /// Insertion order, oldest first
    order: VecDeque<u128>,
}

/// Memo of built indices keyed by the structural hash of their sources
pub struct IndexCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl IndexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner { map: HashMap::new(), order: VecDeque::new() }),
        }
    }

    pub fn get(&self, key: u128) -> Option<Arc<Value>> {
        self.inner.lock().map.get(&key).cloned()
    }

    /// Insert unless already present; returns the cached value either way
    pub fn insert(&self, key: u128, v: Arc<Value>) -> Arc<Value> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.map.get(&key) {
            return existing.clone();
        }
        while inner.map.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(old) => {
                    inner.map.remove(&old);
                    debug!(key = %format!("{:032x}", old), "evicted index");
                }
                None => break,
            }
        }
        inner.map.insert(key, v.clone());
        inner.order.push_back(key);
        v
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }
}

/// Merge-pass state owned by one worker
struct MergeShard<'a> {
    /// Pairs routed to this shard, one vector per hash-pass worker
    input: Vec<Vec<(u128, i64)>>,
    groups: &'a mut HashMap<u128, Vec<i64>>,
    /// Hashes in discovery order
    order: Vec<u128>,
}

/// Output-pass state owned by one worker
struct OutputShard<'a> {
    singleton: &'a mut HashMap<u128, i64>,
    range_map: &'a mut HashMap<u128, (i64, i64)>,
    ranges: Vec<(i64, i64)>,
}

/// Group the rows of `source_columns` by composite key.
///
/// Memoized in `cache`: sources with equal structural hash return the
/// identical INDEX value.
pub fn build_index(
    registry: &Registry,
    pool: &WorkerPool,
    cache: &IndexCache,
    source_columns: &[Arc<Value>],
    mode: IndexMode,
) -> StoreResult<Arc<Value>> {
    if source_columns.is_empty() {
        return Err(StoreError::malformed("index needs at least one source column"));
    }

    let memo_key = struct_hash_all(source_columns, registry)?;
    if let Some(hit) = cache.get(memo_key) {
        debug!(key = %format!("{:032x}", memo_key), "index cache hit");
        return Ok(hit);
    }

    let mut columns = Vec::with_capacity(source_columns.len());
    let mut n = None;
    for c in source_columns {
        c.ty().column_items()?;
        let c = value_deref(registry, c)?;
        let len = column_length(registry, &c)?;
        match n {
            Some(prev) if prev != len => {
                return Err(StoreError::malformed(format!(
                    "index source columns have different lengths ({} and {})",
                    prev, len
                )))
            }
            _ => n = Some(len),
        }
        columns.push(c);
    }
    let n = n.unwrap_or(0) as usize;
    let nt = pool.size();
    let m = columns.len();

    // Hash pass
    let per_worker: Vec<Vec<Vec<(u128, i64)>>> = pool.in_parallel(|k| {
        let (lo, hi) = partition(n, nt, k);
        let mut buckets = vec![Vec::new(); nt];
        let mut row_hashes = vec![0u128; m];
        for i in lo..hi {
            for (j, c) in columns.iter().enumerate() {
                row_hashes[j] = row_hash(registry, c, i as i64)?;
            }
            let h = combine_key_hashes(&row_hashes);
            buckets[bucket_of(h, nt)].push((h, i as i64));
        }
        Ok(buckets)
    })?;

    let mut by_bucket: Vec<Vec<Vec<(u128, i64)>>> = (0..nt).map(|_| Vec::with_capacity(nt)).collect();
    for buckets in per_worker {
        for (r, b) in buckets.into_iter().enumerate() {
            by_bucket[r].push(b);
        }
    }

    // Merge pass
    let mut groups: ParallelHashMap<Vec<i64>> = ParallelHashMap::new(nt);
    let mut shards: Vec<MergeShard<'_>> = groups
        .shards_mut()
        .zip(by_bucket)
        .map(|(groups, input)| MergeShard { input, groups, order: Vec::new() })
        .collect();
    pool.for_each_mut(&mut shards, |_, s| {
        for part in s.input.drain(..) {
            for (h, i) in part {
                match s.groups.entry(h) {
                    Entry::Vacant(e) => {
                        s.order.push(h);
                        e.insert(vec![i]);
                    }
                    Entry::Occupied(mut e) => e.get_mut().push(i),
                }
            }
        }
        Ok(())
    })?;
    let orders: Vec<Vec<u128>> = shards.into_iter().map(|s| s.order).collect();

    // Output pass
    let hashes: Vec<u128> = orders.iter().flatten().copied().collect();
    let mut value_base = Vec::with_capacity(nt);
    let mut total = 0i64;
    for r in 0..nt {
        value_base.push(total);
        total += orders[r]
            .iter()
            .map(|h| groups.get(*h).map_or(0, |g| g.len() as i64))
            .sum::<i64>();
    }

    let mut keys_builder = ColumnBuilder::new(ValueType::int(), 1);
    for h in &hashes {
        let first = groups
            .get(*h)
            .and_then(|g| g.first())
            .copied()
            .ok_or_else(|| StoreError::malformed("empty index group"))?;
        keys_builder.append_raw_scalar(first)?;
    }

    let mut flat_builder = ColumnBuilder::new(ValueType::int(), nt);
    flat_builder.extend_length_raw(total)?;
    let mut singleton: ParallelHashMap<i64> = ParallelHashMap::new(nt);
    let mut range_map: ParallelHashMap<(i64, i64)> = ParallelHashMap::new(nt);
    let mut outputs: Vec<OutputShard<'_>> = singleton
        .shards_mut()
        .zip(range_map.shards_mut())
        .map(|(singleton, range_map)| OutputShard { singleton, range_map, ranges: Vec::new() })
        .collect();
    let hash_base: Vec<i64> = orders
        .iter()
        .scan(0i64, |acc, o| {
            let base = *acc;
            *acc += o.len() as i64;
            Some(base)
        })
        .collect();
    {
        let flat_builder = &flat_builder;
        let groups = &groups;
        pool.for_each_mut(&mut outputs, |r, out| {
            let mut pos = value_base[r];
            for (j, h) in orders[r].iter().enumerate() {
                let rows = groups.get(*h).ok_or_else(|| StoreError::malformed("missing index group"))?;
                let lo = pos;
                for row in rows {
                    flat_builder.put_raw_scalar(*row, pos, r)?;
                    pos += 1;
                }
                out.singleton.insert(*h, hash_base[r] + j as i64);
                out.range_map.insert(*h, (lo, pos));
                out.ranges.push((lo, pos));
            }
            Ok(())
        })?;
    }
    let ranges: Vec<(i64, i64)> = outputs.into_iter().flat_map(|o| o.ranges).collect();

    let flat = flat_builder.finalize(true);
    let mut grouped_builder = ColumnBuilder::new(ValueType::column(ValueType::int(), None, true), 1);
    for (lo, hi) in &ranges {
        grouped_builder.append(registry, &Value::ref_column_range(flat.clone(), *lo, *hi)?)?;
    }

    let source_types = source_columns.iter().map(|c| c.ty().clone()).collect();
    let ty = ValueType::index(source_types, mode)?;
    let data = IndexData {
        keys: keys_builder.finalize(true),
        flat,
        grouped: grouped_builder.finalize(false),
        hashes,
        ranges,
        singleton,
        range_map,
        mode,
    };
    info!(rows = n, keys = data.num_keys(), workers = nt, "built index");

    Ok(cache.insert(memo_key, Value::from_parts(ty, ValueKind::Index(data))))
}

/// Rows of the key with composite hash `hash`; an empty column on a miss
pub fn index_lookup_by_hash(registry: &Registry, index: &Arc<Value>, hash: u128) -> StoreResult<Arc<Value>> {
    let index = value_deref(registry, index)?;
    let ix = index.as_index()?;
    match ix.mode() {
        IndexMode::Equals => match ix.key_ordinal(hash) {
            Some(ordinal) => value_column_at(registry, ix.grouped(), ordinal),
            None => column_from_integers(&[], true),
        },
    }
}

/// Rows whose composite key equals `keys`, one key value per source column
pub fn index_lookup(registry: &Registry, index: &Arc<Value>, keys: &[Arc<Value>]) -> StoreResult<Arc<Value>> {
    let resolved = value_deref(registry, index)?;
    let (source_types, _) = resolved.ty().index_items()?;
    if keys.len() != source_types.len() {
        return Err(StoreError::malformed(format!(
            "index has {} key columns, lookup gave {} keys",
            source_types.len(),
            keys.len()
        )));
    }
    let mut hashes = Vec::with_capacity(keys.len());
    for (ty, k) in source_types.iter().zip(keys) {
        assert_type_valid(ty.column_element()?, k.ty())?;
        hashes.push(value_hash(registry, k)?);
    }
    index_lookup_by_hash(registry, &resolved, combine_key_hashes(&hashes))
}

/// Rows of the index's `ordinal`-th key
pub fn index_group_at(registry: &Registry, index: &Arc<Value>, ordinal: i64) -> StoreResult<Arc<Value>> {
    let index = value_deref(registry, index)?;
    value_column_at(registry, index.as_index()?.grouped(), ordinal)
}
