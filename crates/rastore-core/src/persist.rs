//! Saving and loading value graphs
//!
//! ## On-disk layout
//!
//! ```text
//! <path>/top                        top-level value (write_value form)
//! <path>/objects/<8-digit id>/meta  column metadata
//! <path>/objects/<8-digit id>/top   row table
//! <path>/objects/<8-digit id>/entries
//! ```
//!
//! Every file is a checksummed segment. `top` is written last, so a
//! directory without it holds no complete graph.
//!
//! A save writes every in-memory column reachable from the value, following
//! nested references through each column's own ref context. Columns that
//! were loaded from a saved graph are referenced by that graph's path and
//! are not copied.

use std::path::Path;
use std::sync::Arc;

use hashbrown::HashSet;
use tracing::{debug, info};

use crate::codec::{read_value, write_value};
use crate::column::write_column_files;
use crate::error::{StoreError, StoreResult};
use crate::format::{BinReader, BinWriter, SegmentKind};
use crate::registry::{object_dir, RefContext, Registry};
use crate::segment::{read_segment, write_segment};
use crate::value::Value;

/// Persist `v` and every local column it reaches under `path`
pub fn save(registry: &Registry, v: &Arc<Value>, path: &Path, durable: bool) -> StoreResult<()> {
    std::fs::create_dir_all(path.join("objects"))
        .map_err(|e| StoreError::io_at(path, e, "Failed to create output directory"))?;

    let ctx = RefContext::new();
    let mut w = BinWriter::new();
    write_value(v, &mut w, registry, Some(&ctx))?;

    let mut pending = ctx.targets();
    let mut written = HashSet::new();
    let mut skipped = 0usize;
    while let Some(c) = pending.pop() {
        let column = c.as_column()?;
        if column.url().is_some() {
            skipped += 1;
            continue;
        }
        let id = registry.value_id(&c)?;
        if !written.insert(id) {
            continue;
        }
        write_column_files(&object_dir(path, id), &c, durable)?;
        debug!(value_id = id, rows = column.len(), "wrote column");
        pending.extend(column.ref_context().targets());
    }

    write_segment(&path.join("top"), SegmentKind::Top, w.as_slice(), durable)?;
    info!(
        path = %path.display(),
        columns = written.len(),
        external = skipped,
        bytes = w.len(),
        "saved value"
    );
    Ok(())
}

/// Load the value saved at `path`. Its columns are loaded lazily on first
/// access and keep their identity for the registry's lifetime.
pub fn load_from_path(registry: &Registry, path: &Path) -> StoreResult<Arc<Value>> {
    let url = registry.url_by_path(path);
    let top = read_segment(&path.join("top"), SegmentKind::Top, registry.verify_checksums())?;
    let mut r = BinReader::new(&top);
    let v = read_value(&mut r, Some(&url), registry)?;
    if !r.is_exhausted() {
        return Err(StoreError::corrupt(
            r.position(),
            format!("{} trailing bytes after top-level value", r.remaining()),
        ));
    }
    info!(path = %path.display(), url_id = url.id(), ty = %v.ty(), "loaded value");
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{column_at_deref, column_from_integers, column_length, ColumnBuilder};
    use crate::types::ValueType;
    use tempfile::TempDir;

    #[test]
    fn test_layout_on_disk() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(true);
        let col = column_from_integers(&[1, 2, 3], false).unwrap();
        let id = registry.value_id(&col).unwrap();
        save(&registry, &col, dir.path(), false).unwrap();

        assert!(dir.path().join("top").is_file());
        let obj = object_dir(dir.path(), id);
        for f in ["meta", "top", "entries"] {
            assert!(obj.join(f).is_file(), "missing {}", f);
        }
    }

    #[test]
    fn test_scalar_roundtrip_without_columns() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(true);
        save(&registry, &Value::string("plain"), dir.path(), false).unwrap();
        let back = load_from_path(&registry, dir.path()).unwrap();
        assert_eq!(back.string_value().unwrap(), "plain");
    }

    #[test]
    fn test_nested_columns_are_followed() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(true);
        let mut outer = ColumnBuilder::new(ValueType::column(ValueType::int(), None, false), 1);
        outer.append(&registry, &column_from_integers(&[4, 5], false).unwrap()).unwrap();
        outer.append(&registry, &column_from_integers(&[6], false).unwrap()).unwrap();
        let outer = outer.finalize(false);
        save(&registry, &outer, dir.path(), false).unwrap();

        // A fresh registry sees only what is on disk
        let fresh = Registry::new(true);
        let back = load_from_path(&fresh, dir.path()).unwrap();
        let second = column_at_deref(&fresh, &back, 1).unwrap();
        assert_eq!(column_length(&fresh, &second).unwrap(), 1);
        assert_eq!(column_at_deref(&fresh, &second, 0).unwrap().scalar_i64().unwrap(), 6);
        assert!(second.as_column().unwrap().url().is_some());
    }

    #[test]
    fn test_resave_references_loaded_graph() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let registry = Registry::new(true);
        save(&registry, &column_from_integers(&[8, 9], false).unwrap(), first.path(), false).unwrap();

        let loaded = load_from_path(&registry, first.path()).unwrap();
        let rec = Value::record_of(vec![("c", loaded.clone())]).unwrap();
        save(&registry, &rec, second.path(), false).unwrap();
        // Nothing copied, the column stays with the first graph
        assert_eq!(std::fs::read_dir(second.path().join("objects")).unwrap().count(), 0);

        let fresh = Registry::new(true);
        let back = load_from_path(&fresh, second.path()).unwrap();
        let c = back.record_field("c").unwrap();
        assert_eq!(column_at_deref(&fresh, c, 1).unwrap().scalar_i64().unwrap(), 9);
    }

    #[test]
    fn test_missing_top_is_io_error() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(true);
        assert!(matches!(load_from_path(&registry, dir.path()), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_corrupted_column_detected() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(true);
        let col = column_from_integers(&[1, 2, 3], false).unwrap();
        let id = registry.value_id(&col).unwrap();
        save(&registry, &col, dir.path(), false).unwrap();

        let entries = object_dir(dir.path(), id).join("entries");
        let mut bytes = std::fs::read(&entries).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&entries, bytes).unwrap();

        let fresh = Registry::new(true);
        assert!(matches!(
            load_from_path(&fresh, dir.path()),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }
}
