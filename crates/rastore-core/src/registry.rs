//! Identity registry
//!
//! Every stored column gets a 64-bit value id the first time something asks
//! for it. The registry maps `(url_id, value_id)` to a weak handle on the
//! column, with `url_id = -1` for values that were never persisted.
//!
//! Lookups that miss on a persisted url load the column from
//! `<url>/objects/<id>` and pin it for the registry's lifetime. A hit whose
//! weak handle is dead is an identity violation and is reported as
//! [`StoreError::StaleReference`]; it is never silently reloaded.
//!
//! A [`RefContext`] travels with serialization and collects every column a
//! value transitively references, so a save can enumerate what to persist.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::column::load_column_from_disk_path;
use crate::error::{StoreError, StoreResult};
use crate::value::Value;

/// Url id used for values that live only in memory
pub const LOCAL_URL_ID: i64 = -1;

/// Handle to a saved value graph on disk
#[derive(Debug)]
pub struct Url {
    path: PathBuf,
    id: i64,
}

impl Url {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Path as stored inside url references
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Directory holding the segments of persisted column `value_id`
    pub fn object_dir(&self, value_id: i64) -> PathBuf {
        object_dir(&self.path, value_id)
    }
}

pub(crate) fn object_dir(root: &Path, value_id: i64) -> PathBuf {
    root.join("objects").join(format!("{:08}", value_id))
}

struct RefTargets {
    list: Vec<Arc<Value>>,
    seen: HashSet<usize>,
}

/// Accumulates the columns reached while serializing
pub struct RefContext {
    targets: Mutex<RefTargets>,
}

impl fmt::Debug for RefContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefContext").field("targets", &self.len()).finish()
    }
}

impl Default for RefContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RefContext {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(RefTargets { list: Vec::new(), seen: HashSet::new() }),
        }
    }

    /// Record `target`; each distinct value is kept once, strongly
    pub fn enroll(&self, target: &Arc<Value>) {
        let mut t = self.targets.lock();
        if t.seen.insert(Arc::as_ptr(target) as usize) {
            t.list.push(target.clone());
        }
    }

    pub fn targets(&self) -> Vec<Arc<Value>> {
        self.targets.lock().list.clone()
    }

    pub fn len(&self) -> usize {
        self.targets.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-lifetime identity maps, owned by an [`Engine`](crate::engine::Engine)
pub struct Registry {
    next_value_id: AtomicI64,
    next_url_id: AtomicI64,
    /// (url_id, value_id) -> column
    values: Mutex<HashMap<(i64, i64), Weak<Value>>>,
    /// Columns loaded from disk, kept alive for the registry's lifetime
    pinned: Mutex<HashMap<(i64, i64), Arc<Value>>>,
    urls: Mutex<HashMap<PathBuf, Weak<Url>>>,
    verify_checksums: bool,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("next_value_id", &self.next_value_id.load(Ordering::Relaxed))
            .field("values", &self.values.lock().len())
            .field("pinned", &self.pinned.lock().len())
            .finish()
    }
}

impl Registry {
    pub fn new(verify_checksums: bool) -> Self {
        Self {
            next_value_id: AtomicI64::new(0),
            next_url_id: AtomicI64::new(0),
            values: Mutex::new(HashMap::new()),
            pinned: Mutex::new(HashMap::new()),
            urls: Mutex::new(HashMap::new()),
            verify_checksums,
        }
    }

    pub fn verify_checksums(&self) -> bool {
        self.verify_checksums
    }

    /// Id of a stored column, assigned and registered on first request
    pub fn value_id(&self, v: &Arc<Value>) -> StoreResult<i64> {
        let column = v.as_column()?;
        let id = column.id_cell().get_or_init(|| {
            let id = self.next_value_id.fetch_add(1, Ordering::Relaxed);
            self.values.lock().insert((LOCAL_URL_ID, id), Arc::downgrade(v));
            id
        });
        Ok(*id)
    }

    /// Identity-cached url handle for `path`.
    ///
    /// Paths that exist are canonicalized first, so every spelling of one
    /// directory maps to the same url.
    pub fn url_by_path(&self, path: &Path) -> Arc<Url> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut urls = self.urls.lock();
        if let Some(u) = urls.get(&path).and_then(Weak::upgrade) {
            return u;
        }
        let url = Arc::new(Url {
            path: path.clone(),
            id: self.next_url_id.fetch_add(1, Ordering::Relaxed),
        });
        urls.insert(path, Arc::downgrade(&url));
        url
    }

    /// Resolve `(url, id)` to a live column.
    ///
    /// Local ids must still be alive. Url ids are loaded from disk on first use.
    pub fn get_value_by_id(&self, url: Option<&Arc<Url>>, id: i64) -> StoreResult<Arc<Value>> {
        let url_id = url.map_or(LOCAL_URL_ID, |u| u.id());
        let key = (url_id, id);

        let cached = self.values.lock().get(&key).map(Weak::upgrade);
        match cached {
            Some(Some(v)) => return Ok(v),
            Some(None) => {
                warn!(url_id, value_id = id, "requested value no longer present");
                return Err(StoreError::StaleReference { url_id, value_id: id });
            }
            None => {}
        }

        let url = url.ok_or(StoreError::UnknownValueId { value_id: id })?;
        let loaded = load_column_from_disk_path(&url.object_dir(id), url.clone(), id, self.verify_checksums)?;

        {
            let mut values = self.values.lock();
            if let Some(existing) = values.get(&key).and_then(Weak::upgrade) {
                return Ok(existing);
            }
            values.insert(key, Arc::downgrade(&loaded));
        }
        self.pinned.lock().insert(key, loaded.clone());
        debug!(path = %url.path().display(), value_id = id, "loaded column from disk");
        Ok(loaded)
    }

    /// Drop registrations whose value is gone. Returns how many were removed.
    pub fn prune_dead(&self) -> usize {
        let mut values = self.values.lock();
        let before = values.len();
        values.retain(|_, w| w.strong_count() > 0);
        let removed = before - values.len();
        if removed > 0 {
            debug!(removed, "pruned dead registry entries");
        }
        removed
    }

    /// Number of registrations whose value is still alive
    pub fn live_values(&self) -> usize {
        self.values.lock().values().filter(|w| w.strong_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnBuilder;
    use crate::types::ValueType;

    fn small_column() -> Arc<Value> {
        let mut b = ColumnBuilder::new(ValueType::int(), 1);
        b.append_raw_scalar(1i64).unwrap();
        b.append_raw_scalar(2i64).unwrap();
        b.finalize(false)
    }

    #[test]
    fn test_ids_are_stable_and_unique() {
        let reg = Registry::new(true);
        let a = small_column();
        let b = small_column();
        let ia = reg.value_id(&a).unwrap();
        let ib = reg.value_id(&b).unwrap();
        assert_ne!(ia, ib);
        assert_eq!(reg.value_id(&a).unwrap(), ia);
        assert!(Arc::ptr_eq(&reg.get_value_by_id(None, ia).unwrap(), &a));
        assert!(reg.value_id(&Value::int(3)).is_err());
    }

    #[test]
    fn test_dead_local_value_is_stale() {
        let reg = Registry::new(true);
        let a = small_column();
        let id = reg.value_id(&a).unwrap();
        drop(a);
        assert!(matches!(
            reg.get_value_by_id(None, id),
            Err(StoreError::StaleReference { url_id: LOCAL_URL_ID, value_id }) if value_id == id
        ));

        assert_eq!(reg.prune_dead(), 1);
        assert!(matches!(reg.get_value_by_id(None, id), Err(StoreError::UnknownValueId { .. })));
    }

    #[test]
    fn test_unknown_local_id() {
        let reg = Registry::new(true);
        assert!(matches!(reg.get_value_by_id(None, 77), Err(StoreError::UnknownValueId { value_id: 77 })));
    }

    #[test]
    fn test_url_identity_cache() {
        let reg = Registry::new(true);
        let u1 = reg.url_by_path(Path::new("/tmp/graph-a"));
        let u2 = reg.url_by_path(Path::new("/tmp/graph-a"));
        let u3 = reg.url_by_path(Path::new("/tmp/graph-b"));
        assert!(Arc::ptr_eq(&u1, &u2));
        assert_ne!(u1.id(), u3.id());
        assert_eq!(u1.object_dir(12), PathBuf::from("/tmp/graph-a/objects/00000012"));
    }

    #[test]
    fn test_url_identity_ignores_path_spelling() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("g")).unwrap();
        let reg = Registry::new(true);
        let plain = reg.url_by_path(&dir.path().join("g"));
        let dotted = reg.url_by_path(&dir.path().join(".").join("g"));
        let upward = reg.url_by_path(&dir.path().join("g").join("..").join("g"));
        assert!(Arc::ptr_eq(&plain, &dotted));
        assert!(Arc::ptr_eq(&plain, &upward));
        assert!(plain.path().is_absolute());
    }

    #[test]
    fn test_missing_url_object_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let reg = Registry::new(true);
        let url = reg.url_by_path(dir.path());
        assert!(matches!(reg.get_value_by_id(Some(&url), 3), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_ref_context_dedupes() {
        let ctx = RefContext::new();
        let a = small_column();
        ctx.enroll(&a);
        ctx.enroll(&a);
        ctx.enroll(&small_column());
        assert_eq!(ctx.len(), 2);
    }
}
