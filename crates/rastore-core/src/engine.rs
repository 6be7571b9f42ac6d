//! Engine: the long-lived context every operation runs against.
//!
//! `Engine` owns the worker pool, the identity registry and the index memo
//! cache. Nothing in the crate is process-global; two engines never share
//! ids, loaded graphs or cached indices, and dropping an engine releases
//! all of them.
//!
//! **Build path**: `column_builder` / `table_builder` -> `finalize`
//! **Read path**: `column_at_deref` and friends resolve refs through the registry
//! **Index path**: `build_index` (memoized) -> `index_lookup`
//! **Persistence**: `save` / `load_from_path`

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{read_value, struct_hash, struct_hash_all, value_hash, write_value};
use crate::column::{self, ColumnBuilder, TableBuilder};
use crate::config::EngineConfig;
use crate::display::display_value;
use crate::error::{StoreError, StoreResult};
use crate::format::{BinReader, BinWriter};
use crate::index::{self, IndexCache};
use crate::persist;
use crate::pool::WorkerPool;
use crate::registry::{Registry, Url};
use crate::types::{assert_type_valid, IndexMode, TypeRef};
use crate::value::{Value, ValueKind};

/// Storage engine context.
///
/// All methods take `&self`; the engine can be shared across threads.
pub struct Engine {
    config: EngineConfig,
    pool: WorkerPool,
    registry: Registry,
    index_cache: IndexCache,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workers", &self.pool.size())
            .field("registry", &self.registry)
            .field("index_cache", &self.index_cache)
            .finish()
    }
}

impl Engine {
    /// Create an engine after validating `config`
    pub fn new(config: EngineConfig) -> StoreResult<Self> {
        config.validate()?;
        debug!(
            workers = config.worker_threads,
            durable = config.durable_writes,
            cache = config.index_cache_capacity,
            "engine created"
        );
        Ok(Self {
            pool: WorkerPool::new(config.worker_threads),
            registry: Registry::new(config.verify_checksums),
            index_cache: IndexCache::new(config.index_cache_capacity),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn index_cache(&self) -> &IndexCache {
        &self.index_cache
    }

    // ---- identity ----

    pub fn value_id(&self, v: &Arc<Value>) -> StoreResult<i64> {
        self.registry.value_id(v)
    }

    pub fn get_value_by_id(&self, url: Option<&Arc<Url>>, id: i64) -> StoreResult<Arc<Value>> {
        self.registry.get_value_by_id(url, id)
    }

    pub fn url_by_path(&self, path: &Path) -> Arc<Url> {
        self.registry.url_by_path(path)
    }

    /// Forget registrations of values that have been dropped
    pub fn prune_registry(&self) -> usize {
        self.registry.prune_dead()
    }

    // ---- building ----

    /// Builder with one segment per worker
    pub fn column_builder(&self, entry_type: TypeRef) -> ColumnBuilder {
        ColumnBuilder::new(entry_type, self.pool.size())
    }

    pub fn table_builder<S: AsRef<str>>(&self, names: &[S], element_types: &[TypeRef]) -> StoreResult<TableBuilder> {
        TableBuilder::new(names, element_types, self.pool.size())
    }

    pub fn column_from_values(&self, entry_type: TypeRef, values: &[Arc<Value>], known_unique: bool) -> StoreResult<Arc<Value>> {
        column::column_from_values(&self.registry, entry_type, values, known_unique)
    }

    pub fn column_from_integers(&self, values: &[i64], unique: bool) -> StoreResult<Arc<Value>> {
        column::column_from_integers(values, unique)
    }

    // ---- element access ----

    pub fn value_deref(&self, v: &Arc<Value>) -> StoreResult<Arc<Value>> {
        column::value_deref(&self.registry, v)
    }

    pub fn value_column_at(&self, v: &Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
        column::value_column_at(&self.registry, v, i)
    }

    pub fn column_at_deref(&self, v: &Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
        column::column_at_deref(&self.registry, v, i)
    }

    pub fn column_length(&self, v: &Arc<Value>) -> StoreResult<i64> {
        column::column_length(&self.registry, v)
    }

    pub fn ref_column_at_index(&self, v: &Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
        column::ref_column_at_index(&self.registry, v, i)
    }

    pub fn column_iterate<F>(&self, columns: &[Arc<Value>], visit: F) -> StoreResult<()>
    where
        F: FnMut(i64, Vec<Arc<Value>>) -> bool,
    {
        column::column_iterate(&self.registry, columns, visit)
    }

    // ---- serialization ----

    /// Self-describing bytes of `v`. Columns are referenced by id, not inlined.
    pub fn serialize(&self, v: &Arc<Value>) -> StoreResult<Vec<u8>> {
        let mut w = BinWriter::new();
        write_value(v, &mut w, &self.registry, None)?;
        Ok(w.into_vec())
    }

    /// Inverse of [`serialize`](Self::serialize) within the same engine
    pub fn deserialize(&self, bytes: &[u8]) -> StoreResult<Arc<Value>> {
        let mut r = BinReader::new(bytes);
        let v = read_value(&mut r, None, &self.registry)?;
        if !r.is_exhausted() {
            return Err(StoreError::corrupt(r.position(), "Trailing bytes after value"));
        }
        Ok(v)
    }

    pub fn struct_hash(&self, v: &Arc<Value>) -> StoreResult<u128> {
        struct_hash(v, &self.registry)
    }

    pub fn struct_hash_all(&self, values: &[Arc<Value>]) -> StoreResult<u128> {
        struct_hash_all(values, &self.registry)
    }

    /// Key hash of a single value, as used by [`index_lookup_by_hash`](Self::index_lookup_by_hash)
    pub fn value_hash(&self, v: &Arc<Value>) -> StoreResult<u128> {
        value_hash(&self.registry, v)
    }

    // ---- indexing ----

    pub fn build_index(&self, source_columns: &[Arc<Value>], mode: IndexMode) -> StoreResult<Arc<Value>> {
        index::build_index(&self.registry, &self.pool, &self.index_cache, source_columns, mode)
    }

    pub fn index_lookup_by_hash(&self, index: &Arc<Value>, hash: u128) -> StoreResult<Arc<Value>> {
        index::index_lookup_by_hash(&self.registry, index, hash)
    }

    pub fn index_lookup(&self, index: &Arc<Value>, keys: &[Arc<Value>]) -> StoreResult<Arc<Value>> {
        index::index_lookup(&self.registry, index, keys)
    }

    pub fn index_group_at(&self, index: &Arc<Value>, ordinal: i64) -> StoreResult<Arc<Value>> {
        index::index_group_at(&self.registry, index, ordinal)
    }

    // ---- persistence ----

    pub fn save<P: AsRef<Path>>(&self, v: &Arc<Value>, path: P) -> StoreResult<()> {
        persist::save(&self.registry, v, path.as_ref(), self.config.durable_writes)
    }

    pub fn load_from_path<P: AsRef<Path>>(&self, path: P) -> StoreResult<Arc<Value>> {
        persist::load_from_path(&self.registry, path.as_ref())
    }

    // ---- thunks ----

    /// Force a thunk. The result must be a valid subtype of the thunk's
    /// declared type. Other values are returned as they are.
    pub fn materialize(&self, v: &Arc<Value>) -> StoreResult<Arc<Value>> {
        match v.kind() {
            ValueKind::Thunk(query) => {
                let out = query.evaluate(self)?;
                assert_type_valid(v.ty(), out.ty())?;
                self.materialize(&out)
            }
            _ => Ok(v.clone()),
        }
    }

    pub fn display(&self, v: &Arc<Value>) -> StoreResult<String> {
        display_value(&self.registry, v)
    }
}
