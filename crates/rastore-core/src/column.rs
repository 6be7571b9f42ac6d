//! Column storage
//!
//! ## Write path
//!
//! [`ColumnBuilder`] is append-only. Each entry is type-checked against the
//! builder's entry type, serialized with the builder's own [`RefContext`]
//! (so referenced columns stay alive and can be enumerated on save), and
//! stored in the blob store. `extend_length_raw` + `put*` let parallel
//! producers fill disjoint rows through their own worker blocks.
//! [`finalize`](ColumnBuilder::finalize) freezes everything into an immutable
//! COLUMN value of type `[T:n]` (or `[T:n!]`).
//!
//! ## Read path
//!
//! A [`Column`] is the three serialized regions (`meta`, `top`, `entries`)
//! plus its identity. `at(i)` fetches row `i`'s bytes and decodes them
//! against the entry type. Columns loaded from disk decode local references
//! relative to the url they came from.
//!
//! ## Element access through references
//!
//! [`value_deref`] resolves whole-value and element refs eagerly and leaves
//! range and subset refs as lazy views; [`value_column_at`] indexes through
//! any of them.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tracing::debug;

use crate::codec::{load_raw, save_raw};
use crate::error::{StoreError, StoreResult};
use crate::format::{BinReader, BinWriter, ObjectId, SegmentKind};
use crate::registry::{RefContext, Registry, Url};
use crate::segment::{read_segment, write_segment, BlobStore, BlobStoreBuilder};
use crate::types::{assert_type_valid, Dtype, TypeKind, TypeRef, ValueType};
use crate::value::{RawScalar, RefKind, Value, ValueKind, ValueWhich};

/// Layout of a column's entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnFormat {
    /// Length-prefixed blobs addressed through the row table
    Variable = 0,
}

fn check_row(i: i64, length: i64) -> StoreResult<usize> {
    if i < 0 || i >= length {
        return Err(StoreError::OutOfBounds { index: i, length });
    }
    Ok(i as usize)
}

/// Immutable stored column
pub struct Column {
    /// Assigned on first request through the registry
    id: OnceLock<i64>,
    /// Saved graph this column was loaded from
    url: Option<Arc<Url>>,
    /// Columns referenced by this column's entries
    ref_context: Arc<RefContext>,
    entry_type: TypeRef,
    store: BlobStore,
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id.get())
            .field("url", &self.url.as_ref().map(|u| u.path_str()))
            .field("entry_type", &self.entry_type.to_string())
            .field("length", &self.store.len())
            .finish()
    }
}

impl Column {
    pub fn len(&self) -> i64 {
        self.store.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn entry_type(&self) -> &TypeRef {
        &self.entry_type
    }

    pub fn url(&self) -> Option<&Arc<Url>> {
        self.url.as_ref()
    }

    /// Id if one has been assigned
    pub fn id(&self) -> Option<i64> {
        self.id.get().copied()
    }

    pub(crate) fn id_cell(&self) -> &OnceLock<i64> {
        &self.id
    }

    pub fn ref_context(&self) -> &Arc<RefContext> {
        &self.ref_context
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    /// Decode row `i`
    pub fn at(&self, registry: &Registry, i: i64) -> StoreResult<Arc<Value>> {
        let bytes = self.at_raw(i)?;
        let mut r = BinReader::new(&bytes);
        load_raw(&mut r, &self.entry_type, self.url.as_ref(), registry)
    }

    /// Row `i`'s serialized bytes
    pub fn at_raw(&self, i: i64) -> StoreResult<Bytes> {
        let row = check_row(i, self.len())?;
        self.store.get(row)
    }

    /// 128-bit hash of row `i`'s serialized bytes
    pub fn at_raw_hash(&self, i: i64) -> StoreResult<u128> {
        Ok(xxhash_rust::xxh3::xxh3_128(&self.at_raw(i)?))
    }

    /// Row `i` of a scalar column, read without building a value
    pub fn raw_scalar<T: RawScalar>(&self, i: i64) -> StoreResult<T> {
        check_scalar_entry::<T>(&self.entry_type)?;
        let bytes = self.at_raw(i)?;
        T::read_le(&bytes).ok_or_else(|| StoreError::corrupt(0, format!("Bad {:?} scalar in row {}", T::DTYPE, i)))
    }

    pub fn raw_scalar_i64(&self, i: i64) -> StoreResult<i64> {
        self.raw_scalar::<i64>(i)
    }

    pub fn raw_scalar_f64(&self, i: i64) -> StoreResult<f64> {
        self.raw_scalar::<f64>(i)
    }

    /// Row `i` of a string column, read without building a value
    pub fn raw_string(&self, i: i64) -> StoreResult<String> {
        check_bytes_entry(&self.entry_type)?;
        let bytes = self.at_raw(i)?;
        let mut r = BinReader::new(&bytes);
        let at = r.position();
        let ndim = r.get_i64()?;
        if ndim != 1 {
            return Err(StoreError::corrupt(at, format!("String entry has rank {}", ndim)));
        }
        let n = r.get_len(1)?;
        Ok(String::from_utf8_lossy(r.get_raw(n)?).into_owned())
    }
}

fn check_scalar_entry<T: RawScalar>(entry_type: &ValueType) -> StoreResult<()> {
    match entry_type.kind() {
        TypeKind::NdVector { ndim: 0, dtype } if *dtype == T::DTYPE => Ok(()),
        _ => Err(StoreError::TypeMismatch {
            expected: entry_type.to_string(),
            received: ValueType::scalar(T::DTYPE).to_string(),
        }),
    }
}

fn check_bytes_entry(entry_type: &ValueType) -> StoreResult<()> {
    match entry_type.kind() {
        TypeKind::NdVector { ndim: 1, dtype: Dtype::I8 } => Ok(()),
        _ => Err(StoreError::TypeMismatch {
            expected: entry_type.to_string(),
            received: "str".to_string(),
        }),
    }
}

/// Append-only column writer
pub struct ColumnBuilder {
    entry_type: TypeRef,
    store: BlobStoreBuilder,
    ref_context: Arc<RefContext>,
}

impl fmt::Debug for ColumnBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBuilder")
            .field("entry_type", &self.entry_type.to_string())
            .field("length", &self.store.len())
            .field("workers", &self.store.num_blocks())
            .finish()
    }
}

impl ColumnBuilder {
    /// Builder with one entry block per worker
    pub fn new(entry_type: TypeRef, num_workers: usize) -> Self {
        Self {
            entry_type,
            store: BlobStoreBuilder::new(num_workers),
            ref_context: Arc::new(RefContext::new()),
        }
    }

    pub fn entry_type(&self) -> &TypeRef {
        &self.entry_type
    }

    pub fn len(&self) -> i64 {
        self.store.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn num_workers(&self) -> usize {
        self.store.num_blocks()
    }

    /// Grow the row table to `n` rows so they can be filled with `put*`
    pub fn extend_length_raw(&mut self, n: i64) -> StoreResult<()> {
        if n < 0 {
            return Err(StoreError::OutOfBounds { index: n, length: self.len() });
        }
        self.store.extend(n as usize);
        Ok(())
    }

    /// Store pre-serialized bytes as row `i` through worker block `worker`
    pub fn put_raw(&self, bytes: &[u8], i: i64, worker: usize) -> StoreResult<()> {
        let row = check_row(i, self.len())?;
        self.store.put(bytes, row, worker)
    }

    fn encode(&self, registry: &Registry, entry: &Arc<Value>) -> StoreResult<Vec<u8>> {
        assert_type_valid(&self.entry_type, entry.ty())?;
        let mut w = BinWriter::new();
        save_raw(entry, &mut w, registry, Some(&self.ref_context))?;
        Ok(w.into_vec())
    }

    /// Type-check, serialize and store `entry` as row `i`
    pub fn put(&self, registry: &Registry, entry: &Arc<Value>, i: i64, worker: usize) -> StoreResult<()> {
        check_row(i, self.len())?;
        let bytes = self.encode(registry, entry)?;
        self.put_raw(&bytes, i, worker)
    }

    pub fn append_raw(&mut self, bytes: &[u8]) -> StoreResult<()> {
        let i = self.len();
        self.extend_length_raw(i + 1)?;
        self.put_raw(bytes, i, 0)
    }

    /// Append `entry`. A rejected entry leaves the builder unchanged.
    pub fn append(&mut self, registry: &Registry, entry: &Arc<Value>) -> StoreResult<()> {
        let bytes = self.encode(registry, entry)?;
        self.append_raw(&bytes)
    }

    pub fn append_raw_scalar<T: RawScalar>(&mut self, x: T) -> StoreResult<()> {
        check_scalar_entry::<T>(&self.entry_type)?;
        let mut buf = Vec::with_capacity(T::DTYPE.size_bytes());
        x.write_le(&mut buf);
        self.append_raw(&buf)
    }

    pub fn put_raw_scalar<T: RawScalar>(&self, x: T, i: i64, worker: usize) -> StoreResult<()> {
        check_scalar_entry::<T>(&self.entry_type)?;
        let mut buf = Vec::with_capacity(T::DTYPE.size_bytes());
        x.write_le(&mut buf);
        self.put_raw(&buf, i, worker)
    }

    pub fn put_raw_string(&self, s: &str, i: i64, worker: usize) -> StoreResult<()> {
        check_bytes_entry(&self.entry_type)?;
        let mut w = BinWriter::with_capacity(16 + s.len());
        w.put_i64(1);
        w.put_i64(s.len() as i64);
        w.put_raw(s.as_bytes());
        self.put_raw(w.as_slice(), i, worker)
    }

    /// Decode row `i` before finalizing
    pub fn at(&self, registry: &Registry, i: i64) -> StoreResult<Arc<Value>> {
        let row = check_row(i, self.len())?;
        let bytes = self.store.get(row)?;
        load_raw(&mut BinReader::new(&bytes), &self.entry_type, None, registry)
    }

    /// Freeze into a COLUMN value of type `[T:len]`, or `[T:len!]` if `known_unique`
    pub fn finalize(self, known_unique: bool) -> Arc<Value> {
        let store = self.store.freeze();
        let ty = ValueType::column(self.entry_type.clone(), Some(store.len() as i64), known_unique);
        Value::from_parts(
            ty,
            ValueKind::Column(Column {
                id: OnceLock::new(),
                url: None,
                ref_context: self.ref_context,
                entry_type: self.entry_type,
                store,
            }),
        )
    }
}

/// Column of `i64` scalars; with `unique`, duplicate values are rejected
pub fn column_from_integers(values: &[i64], unique: bool) -> StoreResult<Arc<Value>> {
    if unique {
        let mut seen = hashbrown::HashSet::with_capacity(values.len());
        for v in values {
            if !seen.insert(*v) {
                return Err(StoreError::malformed(format!("duplicate value {} in unique column", v)));
            }
        }
    }
    let mut b = ColumnBuilder::new(ValueType::int(), 1);
    for v in values {
        b.append_raw_scalar(*v)?;
    }
    Ok(b.finalize(unique))
}

/// Column built by appending `values` in order
pub fn column_from_values(
    registry: &Registry,
    entry_type: TypeRef,
    values: &[Arc<Value>],
    known_unique: bool,
) -> StoreResult<Arc<Value>> {
    let mut b = ColumnBuilder::new(entry_type, 1);
    for v in values {
        b.append(registry, v)?;
    }
    Ok(b.finalize(known_unique))
}

/// Column metadata: object header, column type, value tag, column format
pub(crate) fn encode_meta(column_ty: &ValueType) -> Vec<u8> {
    let mut w = BinWriter::new();
    w.put_header(ObjectId::ColumnMeta);
    column_ty.write_bin(&mut w);
    w.put_u8(ValueWhich::Column as u8);
    w.put_u8(ColumnFormat::Variable as u8);
    w.into_vec()
}

fn decode_meta(bytes: &[u8]) -> StoreResult<TypeRef> {
    let mut r = BinReader::new(bytes);
    r.expect_header(ObjectId::ColumnMeta)?;
    let ty = ValueType::read_bin(&mut r)?;
    let at = r.position();
    if ValueWhich::from_u8(r.get_u8()?, at)? != ValueWhich::Column {
        return Err(StoreError::corrupt(at, "Column metadata does not describe a column"));
    }
    let at = r.position();
    let format = r.get_u8()?;
    if format != ColumnFormat::Variable as u8 {
        return Err(StoreError::unsupported(format!("column format {} at offset {}", format, at)));
    }
    Ok(ty)
}

fn column_from_parts(
    meta: &[u8],
    top: Bytes,
    entries: Bytes,
    url: Option<Arc<Url>>,
    id: Option<i64>,
) -> StoreResult<Arc<Value>> {
    let ty = decode_meta(meta)?;
    let (entry_type, length, _) = ty.column_items()?;
    let entry_type = entry_type.clone();
    let store = BlobStore::from_parts(top, entries)?;
    if let Some(n) = length {
        if n != store.len() as i64 {
            return Err(StoreError::corrupt(
                0,
                format!("Column type {} disagrees with {} stored rows", ty, store.len()),
            ));
        }
    }
    let cell = OnceLock::new();
    if let Some(id) = id {
        let _ = cell.set(id);
    }
    Ok(Value::from_parts(
        ty,
        ValueKind::Column(Column {
            id: cell,
            url,
            ref_context: Arc::new(RefContext::new()),
            entry_type,
            store,
        }),
    ))
}

/// Rebuild an in-memory column from its three serialized regions
pub fn load_column_from_binary_data(meta: &[u8], top: Bytes, entries: Bytes) -> StoreResult<Arc<Value>> {
    column_from_parts(meta, top, entries, None, None)
}

/// Load persisted column `id` of `url` from its object directory
pub fn load_column_from_disk_path(dir: &Path, url: Arc<Url>, id: i64, verify: bool) -> StoreResult<Arc<Value>> {
    let meta = read_segment(&dir.join("meta"), SegmentKind::ColumnMeta, verify)?;
    let top = read_segment(&dir.join("top"), SegmentKind::ColumnTable, verify)?;
    let entries = read_segment(&dir.join("entries"), SegmentKind::ColumnEntries, verify)?;
    let v = column_from_parts(&meta, top, entries, Some(url), Some(id))?;
    debug!(dir = %dir.display(), value_id = id, ty = %v.ty(), "opened column segments");
    Ok(v)
}

/// Persist a stored column as `dir/{meta,top,entries}`
pub(crate) fn write_column_files(dir: &Path, v: &Arc<Value>, durable: bool) -> StoreResult<()> {
    let column = v.as_column()?;
    std::fs::create_dir_all(dir)
        .map_err(|e| StoreError::io_at(dir, e, "Failed to create object directory"))?;
    write_segment(&dir.join("meta"), SegmentKind::ColumnMeta, &encode_meta(v.ty()), durable)?;
    write_segment(&dir.join("top"), SegmentKind::ColumnTable, column.store.top_bytes(), durable)?;
    write_segment(&dir.join("entries"), SegmentKind::ColumnEntries, column.store.entries_bytes(), durable)?;
    Ok(())
}

// ---- element access ----

/// Follow whole-value and element references to the value they denote.
///
/// Range and subset references are returned unchanged; they stay indexable
/// views. The resolved value must be a valid subtype of the reference's type.
pub fn value_deref(registry: &Registry, v: &Arc<Value>) -> StoreResult<Arc<Value>> {
    let r = match v.kind() {
        ValueKind::Ref(r) => r,
        _ => return Ok(v.clone()),
    };
    let resolved = match &r.kind {
        RefKind::Value => r.target.clone(),
        RefKind::ColumnElement(i) => {
            let e = value_column_at(registry, &r.target, *i)?;
            value_deref(registry, &e)?
        }
        RefKind::ColumnRange { .. } | RefKind::ColumnSubset(_) => return Ok(v.clone()),
    };
    assert_type_valid(v.ty(), resolved.ty())?;
    Ok(resolved)
}

/// Row `i` of a column-typed value, indexing through references
pub fn value_column_at(registry: &Registry, v: &Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
    match v.kind() {
        ValueKind::Column(c) => c.at(registry, i),
        ValueKind::Ref(r) => match &r.kind {
            RefKind::Value => value_column_at(registry, &r.target, i),
            RefKind::ColumnElement(_) => {
                let inner = value_deref(registry, v)?;
                value_column_at(registry, &inner, i)
            }
            RefKind::ColumnRange { lo, hi } => {
                check_row(i, hi - lo)?;
                value_column_at(registry, &r.target, lo + i)
            }
            RefKind::ColumnSubset(subset) => {
                let ri = value_column_at(registry, subset, i)?;
                let ri = value_deref(registry, &ri)?.integral_value()?;
                value_column_at(registry, &r.target, ri)
            }
        },
        ValueKind::Thunk(_) => Err(StoreError::unsupported("indexing an unmaterialized thunk")),
        _ => Err(StoreError::TypeMismatch {
            expected: "[T]".to_string(),
            received: v.ty().to_string(),
        }),
    }
}

/// Number of rows of a column-typed value
pub fn column_length(registry: &Registry, v: &Arc<Value>) -> StoreResult<i64> {
    match v.kind() {
        ValueKind::Column(c) => Ok(c.len()),
        ValueKind::Ref(r) => match &r.kind {
            RefKind::Value => column_length(registry, &r.target),
            RefKind::ColumnElement(_) => {
                let inner = value_deref(registry, v)?;
                column_length(registry, &inner)
            }
            RefKind::ColumnRange { lo, hi } => Ok(hi - lo),
            RefKind::ColumnSubset(subset) => column_length(registry, subset),
        },
        ValueKind::Thunk(_) => Err(StoreError::unsupported("length of an unmaterialized thunk")),
        _ => Err(StoreError::TypeMismatch {
            expected: "[T]".to_string(),
            received: v.ty().to_string(),
        }),
    }
}

/// Row `i` of a column-typed value as a COLUMN_ELEMENT reference into the
/// underlying stored column
pub fn ref_column_at_index(registry: &Registry, v: &Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
    match v.kind() {
        ValueKind::Column(_) => Value::ref_column_element(v.clone(), i),
        ValueKind::Ref(r) => match &r.kind {
            RefKind::Value => ref_column_at_index(registry, &r.target, i),
            RefKind::ColumnElement(_) => Err(StoreError::unsupported("element reference into an element reference")),
            RefKind::ColumnRange { lo, hi } => {
                check_row(i, hi - lo)?;
                Value::ref_column_element(r.target.clone(), lo + i)
            }
            RefKind::ColumnSubset(subset) => {
                let ri = value_column_at(registry, subset, i)?;
                let ri = value_deref(registry, &ri)?.integral_value()?;
                Value::ref_column_element(r.target.clone(), ri)
            }
        },
        _ => Err(StoreError::TypeMismatch {
            expected: "[T]".to_string(),
            received: v.ty().to_string(),
        }),
    }
}

/// Row `i`, with the result dereferenced
pub fn column_at_deref(registry: &Registry, v: &Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
    let e = value_column_at(registry, v, i)?;
    value_deref(registry, &e)
}

/// Visit the rows of equally long columns in order until `visit` returns false
pub fn column_iterate<F>(registry: &Registry, columns: &[Arc<Value>], mut visit: F) -> StoreResult<()>
where
    F: FnMut(i64, Vec<Arc<Value>>) -> bool,
{
    let mut resolved = Vec::with_capacity(columns.len());
    let mut n = None;
    for c in columns {
        let c = value_deref(registry, c)?;
        let len = column_length(registry, &c)?;
        match n {
            Some(m) if m != len => {
                return Err(StoreError::malformed(format!(
                    "cannot iterate columns of different lengths ({} and {})",
                    m, len
                )))
            }
            _ => n = Some(len),
        }
        resolved.push(c);
    }

    for i in 0..n.unwrap_or(0) {
        let row = resolved
            .iter()
            .map(|c| value_column_at(registry, c, i))
            .collect::<StoreResult<Vec<_>>>()?;
        if !visit(i, row) {
            break;
        }
    }
    Ok(())
}

/// Row-wise builder for a DATA_TABLE record
#[derive(Debug)]
pub struct TableBuilder {
    names: Vec<String>,
    builders: Vec<ColumnBuilder>,
}

impl TableBuilder {
    pub fn new<S: AsRef<str>>(names: &[S], element_types: &[TypeRef], num_workers: usize) -> StoreResult<Self> {
        // Validates arity and duplicate names
        ValueType::data_table(names, element_types)?;
        Ok(Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            builders: element_types
                .iter()
                .map(|t| ColumnBuilder::new(t.clone(), num_workers))
                .collect(),
        })
    }

    pub fn num_columns(&self) -> usize {
        self.builders.len()
    }

    pub fn num_rows(&self) -> i64 {
        self.builders.first().map_or(0, ColumnBuilder::len)
    }

    /// Append one row. A rejected row leaves every column unchanged.
    pub fn append_row(&mut self, registry: &Registry, row: &[Arc<Value>]) -> StoreResult<()> {
        if row.len() != self.builders.len() {
            return Err(StoreError::malformed(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.builders.len()
            )));
        }
        let encoded = self
            .builders
            .iter()
            .zip(row)
            .map(|(b, v)| b.encode(registry, v))
            .collect::<StoreResult<Vec<_>>>()?;
        for (b, bytes) in self.builders.iter_mut().zip(encoded) {
            b.append_raw(&bytes)?;
        }
        Ok(())
    }

    pub fn finalize(self) -> StoreResult<Arc<Value>> {
        let columns: Vec<Arc<Value>> = self.builders.into_iter().map(|b| b.finalize(false)).collect();
        Value::data_table(&self.names, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> Registry {
        Registry::new(true)
    }

    #[test]
    fn test_append_and_at() {
        let registry = reg();
        let mut b = ColumnBuilder::new(ValueType::string(), 2);
        for s in ["a", "bb", "ccc"] {
            b.append(&registry, &Value::string(s)).unwrap();
        }
        assert_eq!(b.at(&registry, 1).unwrap().string_value().unwrap(), "bb");

        let col = b.finalize(true);
        assert_eq!(col.ty().to_string(), "[str:3!]");
        let c = col.as_column().unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.at(&registry, 2).unwrap().string_value().unwrap(), "ccc");
        assert_eq!(c.raw_string(0).unwrap(), "a");
        assert!(matches!(c.at(&registry, 3), Err(StoreError::OutOfBounds { index: 3, length: 3 })));
        assert!(c.at(&registry, -1).is_err());
    }

    #[test]
    fn test_type_mismatch_leaves_builder_intact() {
        let registry = reg();
        let mut b = ColumnBuilder::new(ValueType::int(), 1);
        b.append(&registry, &Value::int(10)).unwrap();
        let err = b.append(&registry, &Value::string("nope")).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        b.append(&registry, &Value::int(11)).unwrap();

        let col = b.finalize(false);
        let c = col.as_column().unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.raw_scalar_i64(0).unwrap(), 10);
        assert_eq!(c.raw_scalar_i64(1).unwrap(), 11);
    }

    #[test]
    fn test_parallel_put_raw() {
        let registry = reg();
        let mut b = ColumnBuilder::new(ValueType::int(), 4);
        b.extend_length_raw(100).unwrap();
        std::thread::scope(|s| {
            for k in 0..4usize {
                let b = &b;
                s.spawn(move || {
                    for i in (k as i64 * 25)..((k as i64 + 1) * 25) {
                        b.put_raw_scalar(i * 2, i, k).unwrap();
                    }
                });
            }
        });
        let col = b.finalize(false);
        let c = col.as_column().unwrap();
        for i in 0..100 {
            assert_eq!(c.at(&registry, i).unwrap().scalar_i64().unwrap(), i * 2);
        }
    }

    #[test]
    fn test_raw_fast_paths_check_entry_type() {
        let mut b = ColumnBuilder::new(ValueType::float(), 1);
        assert!(b.append_raw_scalar(1i64).is_err());
        b.append_raw_scalar(1.5f64).unwrap();
        b.extend_length_raw(2).unwrap();
        assert!(b.put_raw_string("x", 1, 0).is_err());
        let col = b.finalize(false);
        assert_eq!(col.as_column().unwrap().raw_scalar_f64(0).unwrap(), 1.5);
        assert!(col.as_column().unwrap().raw_scalar_i64(0).is_err());
    }

    #[test]
    fn test_column_from_integers() {
        let col = column_from_integers(&[4, 5, 6], true).unwrap();
        assert_eq!(col.ty().to_string(), "[int:3!]");
        assert!(matches!(column_from_integers(&[1, 1], true), Err(StoreError::Malformed { .. })));
        assert!(column_from_integers(&[1, 1], false).is_ok());
        assert_eq!(column_from_integers(&[], true).unwrap().as_column().unwrap().len(), 0);
    }

    #[test]
    fn test_binary_data_roundtrip() {
        let registry = reg();
        let col = column_from_integers(&[7, 8, 9], false).unwrap();
        let c = col.as_column().unwrap();
        let meta = encode_meta(col.ty());
        let back = load_column_from_binary_data(&meta, c.store().top_bytes().clone(), c.store().entries_bytes().clone())
            .unwrap();
        assert_eq!(back.ty().to_string(), "[int:3]");
        assert_eq!(column_at_deref(&registry, &back, 2).unwrap().scalar_i64().unwrap(), 9);

        let truncated = c.store().top_bytes().slice(..24);
        assert!(load_column_from_binary_data(&meta, truncated, c.store().entries_bytes().clone()).is_err());
    }

    #[test]
    fn test_refs_index_through() {
        let registry = reg();
        let base = column_from_integers(&[10, 11, 12, 13, 14], false).unwrap();

        let range = Value::ref_column_range(base.clone(), 1, 4).unwrap();
        assert_eq!(range.ty().to_string(), "[int:3]");
        assert_eq!(column_length(&registry, &range).unwrap(), 3);
        assert_eq!(value_column_at(&registry, &range, 0).unwrap().scalar_i64().unwrap(), 11);
        assert!(value_column_at(&registry, &range, 3).is_err());

        let picks = column_from_integers(&[4, 0], false).unwrap();
        let subset = Value::ref_column_subset(base.clone(), picks).unwrap();
        assert_eq!(column_length(&registry, &subset).unwrap(), 2);
        assert_eq!(value_column_at(&registry, &subset, 0).unwrap().scalar_i64().unwrap(), 14);
        assert_eq!(value_column_at(&registry, &subset, 1).unwrap().scalar_i64().unwrap(), 10);

        let whole = Value::ref_value(base.clone()).unwrap();
        assert!(Arc::ptr_eq(&value_deref(&registry, &whole).unwrap(), &base));
        assert_eq!(value_column_at(&registry, &whole, 4).unwrap().scalar_i64().unwrap(), 14);

        let elem = ref_column_at_index(&registry, &subset, 1).unwrap();
        assert_eq!(value_deref(&registry, &elem).unwrap().scalar_i64().unwrap(), 10);

        // Range and subset refs stay lazy under deref
        assert!(Arc::ptr_eq(&value_deref(&registry, &range).unwrap(), &range));
        assert!(Value::ref_column_range(base, 3, 9).is_err());
    }

    #[test]
    fn test_nested_columns_resolve_through_ref_context() {
        let registry = reg();
        let inner = column_from_integers(&[1, 2], false).unwrap();
        let mut outer = ColumnBuilder::new(ValueType::column(ValueType::int(), None, false), 1);
        outer.append(&registry, &inner).unwrap();
        let inner_id = registry.value_id(&inner).unwrap();
        drop(inner);

        // The outer builder keeps the inner column alive
        let outer = outer.finalize(false);
        let got = column_at_deref(&registry, &outer, 0).unwrap();
        assert_eq!(registry.value_id(&got).unwrap(), inner_id);
        assert_eq!(column_length(&registry, &got).unwrap(), 2);
    }

    #[test]
    fn test_column_iterate_early_exit() {
        let registry = reg();
        let a = column_from_integers(&[1, 2, 3], false).unwrap();
        let b = column_from_integers(&[4, 5, 6], false).unwrap();
        let mut sums = Vec::new();
        column_iterate(&registry, &[a.clone(), b], |i, row| {
            sums.push(row[0].scalar_i64().unwrap() + row[1].scalar_i64().unwrap());
            i < 1
        })
        .unwrap();
        assert_eq!(sums, vec![5, 7]);

        let short = column_from_integers(&[1], false).unwrap();
        assert!(column_iterate(&registry, &[a, short], |_, _| true).is_err());
    }

    #[test]
    fn test_table_builder() {
        let registry = reg();
        let mut t = TableBuilder::new(&["id", "name"], &[ValueType::int(), ValueType::string()], 1).unwrap();
        t.append_row(&registry, &[Value::int(1), Value::string("ann")]).unwrap();
        assert!(t.append_row(&registry, &[Value::int(2), Value::int(3)]).is_err());
        assert!(t.append_row(&registry, &[Value::int(2)]).is_err());
        t.append_row(&registry, &[Value::int(2), Value::string("bo")]).unwrap();
        assert_eq!(t.num_rows(), 2);

        let table = t.finalize().unwrap();
        assert_eq!(table.ty().to_string(), "Table {id: [int], name: [str]}");
        let names = table.record_field("name").unwrap();
        assert_eq!(column_at_deref(&registry, names, 1).unwrap().string_value().unwrap(), "bo");
        assert!(TableBuilder::new(&["a", "a"], &[ValueType::int(), ValueType::int()], 1).is_err());
    }
}
