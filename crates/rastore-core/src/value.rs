//! Runtime value model
//!
//! A [`Value`] always carries its [`ValueType`]. Values are shared as
//! `Arc<Value>` and never mutated after construction.
//!
//! Owning variants hold their data (`NdVector`, `Record`, `Either`,
//! `Column`, `Index`). A [`ValueRef`] never owns data: it holds a strong
//! handle to a value owned elsewhere plus a description of which part of it
//! is meant. A `Thunk` wraps an external lazy query and is replaced by its
//! result on [`Engine::materialize`](crate::engine::Engine::materialize).

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::column::Column;
use crate::engine::Engine;
use crate::error::{StoreError, StoreResult};
use crate::index::IndexData;
use crate::types::{assert_type_valid, Dtype, TypeKind, TypeRef, TypeWhich, ValueType};

/// Discriminant of [`ValueKind`], also the on-disk value tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueWhich {
    NdVector = 0,
    Record = 1,
    Either = 2,
    Column = 3,
    Ref = 4,
    Index = 5,
    Thunk = 6,
}

impl ValueWhich {
    pub(crate) fn from_u8(b: u8, offset: usize) -> StoreResult<Self> {
        Ok(match b {
            0 => ValueWhich::NdVector,
            1 => ValueWhich::Record,
            2 => ValueWhich::Either,
            3 => ValueWhich::Column,
            4 => ValueWhich::Ref,
            5 => ValueWhich::Index,
            6 => ValueWhich::Thunk,
            _ => return Err(StoreError::corrupt(offset, format!("Unknown value tag {}", b))),
        })
    }

    /// Variant a value of a known-direct type is stored as
    pub(crate) fn direct_for(which: TypeWhich) -> Option<Self> {
        match which {
            TypeWhich::Column => Some(ValueWhich::Column),
            TypeWhich::NdVector => Some(ValueWhich::NdVector),
            TypeWhich::Record => Some(ValueWhich::Record),
            TypeWhich::Either => Some(ValueWhich::Either),
            TypeWhich::Function | TypeWhich::Index => None,
        }
    }
}

impl fmt::Display for ValueWhich {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueWhich::NdVector => "ND_VECTOR",
            ValueWhich::Record => "RECORD",
            ValueWhich::Either => "EITHER",
            ValueWhich::Column => "COLUMN",
            ValueWhich::Ref => "REF",
            ValueWhich::Index => "INDEX",
            ValueWhich::Thunk => "THUNK",
        };
        f.write_str(s)
    }
}

/// Fixed-width scalar that can be stored without building a [`Value`]
pub trait RawScalar: Copy + Send + Sync + 'static {
    const DTYPE: Dtype;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_raw_scalar {
    ($($t:ty => $d:expr),* $(,)?) => {$(
        impl RawScalar for $t {
            const DTYPE: Dtype = $d;
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
            fn read_le(bytes: &[u8]) -> Option<Self> {
                Some(<$t>::from_le_bytes(bytes.try_into().ok()?))
            }
        }
    )*};
}

impl_raw_scalar! {
    i8 => Dtype::I8,
    u8 => Dtype::U8,
    i32 => Dtype::I32,
    i64 => Dtype::I64,
    f32 => Dtype::F32,
    f64 => Dtype::F64,
}

impl RawScalar for bool {
    const DTYPE: Dtype = Dtype::Bool;
    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
    fn read_le(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

/// Row-major element strides for `shape`
pub fn contiguous_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![0i64; shape.len()];
    let mut acc = 1i64;
    for (i, dim) in shape.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

/// Dense n-dimensional buffer
#[derive(Clone)]
pub struct NdVector {
    data: Bytes,
    dtype: Dtype,
    shape: Vec<i64>,
    /// Element strides
    strides: Vec<i64>,
    contiguous: bool,
}

impl fmt::Debug for NdVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdVector")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl NdVector {
    /// Contiguous buffer; `data` must hold exactly `product(shape)` elements
    pub fn new(dtype: Dtype, shape: Vec<i64>, data: Bytes) -> StoreResult<Self> {
        if shape.iter().any(|d| *d < 0) {
            return Err(StoreError::malformed(format!("negative dimension in shape {:?}", shape)));
        }
        let expected = shape.iter().product::<i64>() as usize * dtype.size_bytes();
        if data.len() != expected {
            return Err(StoreError::malformed(format!(
                "shape {:?} of {:?} needs {} bytes, got {}",
                shape,
                dtype,
                expected,
                data.len()
            )));
        }
        let strides = contiguous_strides(&shape);
        Ok(Self { data, dtype, shape, strides, contiguous: true })
    }

    /// View over `data` with explicit element strides (e.g. a slice)
    pub fn with_strides(dtype: Dtype, shape: Vec<i64>, strides: Vec<i64>, data: Bytes) -> StoreResult<Self> {
        if strides.len() != shape.len() || strides.iter().any(|s| *s < 0) || shape.iter().any(|d| *d < 0) {
            return Err(StoreError::malformed("strides must be non-negative and match the shape rank"));
        }
        let empty = shape.iter().any(|d| *d == 0);
        if !empty {
            let last: i64 = shape.iter().zip(&strides).map(|(d, s)| (d - 1) * s).sum();
            if (last as usize + 1) * dtype.size_bytes() > data.len() {
                return Err(StoreError::malformed("strided view reaches past its buffer"));
            }
        }
        let contiguous = strides == contiguous_strides(&shape)
            && data.len() == shape.iter().product::<i64>() as usize * dtype.size_bytes();
        Ok(Self { data, dtype, shape, strides, contiguous })
    }

    pub fn scalar<T: RawScalar>(x: T) -> Self {
        let mut buf = Vec::with_capacity(T::DTYPE.size_bytes());
        x.write_le(&mut buf);
        Self {
            data: Bytes::from(buf),
            dtype: T::DTYPE,
            shape: Vec::new(),
            strides: Vec::new(),
            contiguous: true,
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> i64 {
        self.shape.iter().product()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    fn scalar_as<T: RawScalar>(&self) -> Option<T> {
        if self.shape.is_empty() && self.dtype == T::DTYPE {
            T::read_le(&self.data[..T::DTYPE.size_bytes().min(self.data.len())])
        } else {
            None
        }
    }
}

/// Which part of the target a reference denotes
#[derive(Debug, Clone)]
pub enum RefKind {
    /// The whole target
    Value,
    /// One row of the target column
    ColumnElement(i64),
    /// Rows `[lo, hi)` of the target column
    ColumnRange { lo: i64, hi: i64 },
    /// Rows of the target column selected by an integer column
    ColumnSubset(Arc<Value>),
}

/// Discriminant of [`RefKind`], also the on-disk ref tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefWhich {
    Value = 0,
    ColumnElement = 1,
    ColumnRange = 2,
    ColumnSubset = 3,
}

impl RefKind {
    pub fn which(&self) -> RefWhich {
        match self {
            RefKind::Value => RefWhich::Value,
            RefKind::ColumnElement(_) => RefWhich::ColumnElement,
            RefKind::ColumnRange { .. } => RefWhich::ColumnRange,
            RefKind::ColumnSubset(_) => RefWhich::ColumnSubset,
        }
    }
}

/// Non-owning alias into another value
#[derive(Debug, Clone)]
pub struct ValueRef {
    pub(crate) target: Arc<Value>,
    pub(crate) kind: RefKind,
}

impl ValueRef {
    pub fn target(&self) -> &Arc<Value> {
        &self.target
    }

    pub fn kind(&self) -> &RefKind {
        &self.kind
    }
}

/// External lazy query node
pub trait LazyQuery: Send + Sync + fmt::Debug {
    /// Type the evaluated value is declared to have
    fn value_type(&self) -> TypeRef;

    /// Force evaluation
    fn evaluate(&self, engine: &Engine) -> StoreResult<Arc<Value>>;
}

#[derive(Debug)]
pub enum ValueKind {
    NdVector(NdVector),
    Record(Vec<Arc<Value>>),
    Either { which: i64, payload: Arc<Value> },
    Column(Column),
    Ref(ValueRef),
    Index(IndexData),
    Thunk(Arc<dyn LazyQuery>),
}

/// Typed runtime value
#[derive(Debug)]
pub struct Value {
    ty: TypeRef,
    kind: ValueKind,
}

fn kind_mismatch(expected: &str, v: &Value) -> StoreError {
    StoreError::TypeMismatch {
        expected: expected.to_string(),
        received: format!("{} ({})", v.ty, v.which()),
    }
}

impl Value {
    pub(crate) fn from_parts(ty: TypeRef, kind: ValueKind) -> Arc<Value> {
        Arc::new(Value { ty, kind })
    }

    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn which(&self) -> ValueWhich {
        match &self.kind {
            ValueKind::NdVector(_) => ValueWhich::NdVector,
            ValueKind::Record(_) => ValueWhich::Record,
            ValueKind::Either { .. } => ValueWhich::Either,
            ValueKind::Column(_) => ValueWhich::Column,
            ValueKind::Ref(_) => ValueWhich::Ref,
            ValueKind::Index(_) => ValueWhich::Index,
            ValueKind::Thunk(_) => ValueWhich::Thunk,
        }
    }

    // ---- constructors ----

    /// Wrap a buffer; `ty` must be `ND_VECTOR(ndim, dtype)` matching the buffer
    pub fn nd_vector(ty: TypeRef, nd: NdVector) -> StoreResult<Arc<Value>> {
        let (ndim, dtype) = ty.nd_vector_items()?;
        if ndim != nd.ndim() as i64 || dtype != nd.dtype() {
            return Err(StoreError::TypeMismatch {
                expected: ty.to_string(),
                received: ValueType::nd_vector(nd.ndim() as i64, nd.dtype()).to_string(),
            });
        }
        Ok(Self::from_parts(ty, ValueKind::NdVector(nd)))
    }

    pub fn scalar<T: RawScalar>(x: T) -> Arc<Value> {
        Self::from_parts(ValueType::scalar(T::DTYPE), ValueKind::NdVector(NdVector::scalar(x)))
    }

    pub fn int(x: i64) -> Arc<Value> {
        Self::scalar(x)
    }

    pub fn float(x: f64) -> Arc<Value> {
        Self::scalar(x)
    }

    pub fn boolean(x: bool) -> Arc<Value> {
        Self::scalar(x)
    }

    fn byte_buffer(ty: TypeRef, data: Bytes) -> Arc<Value> {
        let shape = vec![data.len() as i64];
        let nd = NdVector {
            strides: contiguous_strides(&shape),
            data,
            dtype: Dtype::I8,
            shape,
            contiguous: true,
        };
        Self::from_parts(ty, ValueKind::NdVector(nd))
    }

    pub fn string(s: &str) -> Arc<Value> {
        Self::byte_buffer(ValueType::string(), Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn image(data: Bytes) -> Arc<Value> {
        Self::byte_buffer(ValueType::image(), data)
    }

    pub fn empty_record() -> Arc<Value> {
        Self::from_parts(ValueType::empty_record(), ValueKind::Record(Vec::new()))
    }

    /// Record of type `ty`; every entry must be a valid subtype of its field
    pub fn record(ty: TypeRef, entries: Vec<Arc<Value>>) -> StoreResult<Arc<Value>> {
        let fields = ty.record_items()?;
        if fields.len() != entries.len() {
            return Err(StoreError::malformed(format!(
                "record {} has {} fields, got {} entries",
                ty,
                fields.len(),
                entries.len()
            )));
        }
        for ((_, field_ty), entry) in fields.iter().zip(&entries) {
            assert_type_valid(field_ty, &entry.ty)?;
        }
        if ty.is_data_table() {
            check_table_lengths(&entries)?;
        }
        Ok(Self::from_parts(ty, ValueKind::Record(entries)))
    }

    /// Record whose type is inferred from its entries
    pub fn record_of<S: Into<String>>(fields: Vec<(S, Arc<Value>)>) -> StoreResult<Arc<Value>> {
        let mut field_types = Vec::with_capacity(fields.len());
        let mut entries = Vec::with_capacity(fields.len());
        for (name, v) in fields {
            field_types.push((name.into(), v.ty.clone()));
            entries.push(v);
        }
        let ty = ValueType::record(field_types)?;
        Ok(Self::from_parts(ty, ValueKind::Record(entries)))
    }

    /// Table from named columns of equal length
    pub fn data_table<S: AsRef<str>>(names: &[S], columns: Vec<Arc<Value>>) -> StoreResult<Arc<Value>> {
        let mut element_types = Vec::with_capacity(columns.len());
        for c in &columns {
            element_types.push(c.ty.column_element()?.clone());
        }
        check_table_lengths(&columns)?;
        let ty = ValueType::data_table(names, &element_types)?;
        Ok(Self::from_parts(ty, ValueKind::Record(columns)))
    }

    pub fn either(ty: TypeRef, which: i64, payload: Arc<Value>) -> StoreResult<Arc<Value>> {
        let cases = ty.either_items()?;
        let case_ty = usize::try_from(which)
            .ok()
            .and_then(|w| cases.get(w))
            .map(|(_, t)| t)
            .ok_or(StoreError::OutOfBounds { index: which, length: cases.len() as i64 })?;
        assert_type_valid(case_ty, &payload.ty)?;
        Ok(Self::from_parts(ty, ValueKind::Either { which, payload }))
    }

    pub fn optional_none(inner: TypeRef) -> Arc<Value> {
        Self::from_parts(
            ValueType::optional(inner),
            ValueKind::Either { which: 0, payload: Self::empty_record() },
        )
    }

    pub fn optional_some(inner: TypeRef, v: Arc<Value>) -> StoreResult<Arc<Value>> {
        Self::either(ValueType::optional(inner), 1, v)
    }

    pub fn thunk(query: Arc<dyn LazyQuery>) -> Arc<Value> {
        Self::from_parts(query.value_type(), ValueKind::Thunk(query))
    }

    // ---- references ----

    /// Alias of a whole value
    pub fn ref_value(target: Arc<Value>) -> StoreResult<Arc<Value>> {
        if target.which() == ValueWhich::Ref {
            return Err(StoreError::malformed("reference target must not itself be a reference"));
        }
        let ty = target.ty.clone();
        Ok(Self::from_parts(ty, ValueKind::Ref(ValueRef { target, kind: RefKind::Value })))
    }

    fn direct_column_target(target: &Arc<Value>) -> StoreResult<&Column> {
        target.as_column().map_err(|_| {
            StoreError::malformed(format!(
                "column reference target must be a stored column, got {}",
                target.which()
            ))
        })
    }

    /// Alias of row `i` of a stored column
    pub fn ref_column_element(target: Arc<Value>, i: i64) -> StoreResult<Arc<Value>> {
        let len = Self::direct_column_target(&target)?.len();
        if i < 0 || i >= len {
            return Err(StoreError::OutOfBounds { index: i, length: len });
        }
        let ty = target.ty.column_element()?.clone();
        Ok(Self::from_parts(ty, ValueKind::Ref(ValueRef { target, kind: RefKind::ColumnElement(i) })))
    }

    /// Alias of rows `[lo, hi)` of a stored column
    pub fn ref_column_range(target: Arc<Value>, lo: i64, hi: i64) -> StoreResult<Arc<Value>> {
        let len = Self::direct_column_target(&target)?.len();
        if lo < 0 || lo > hi || hi > len {
            return Err(StoreError::OutOfBounds { index: if lo < 0 || lo > hi { lo } else { hi }, length: len });
        }
        let (element, _, unique) = target.ty.column_items()?;
        let ty = ValueType::column(element.clone(), Some(hi - lo), unique);
        Ok(Self::from_parts(ty, ValueKind::Ref(ValueRef { target, kind: RefKind::ColumnRange { lo, hi } })))
    }

    /// Alias of the rows of a stored column selected by an integer column.
    /// The view is unique only when both the target and the selection are.
    pub fn ref_column_subset(target: Arc<Value>, subset: Arc<Value>) -> StoreResult<Arc<Value>> {
        Self::direct_column_target(&target)?;
        let (sub_element, sub_len, sub_unique) = subset.ty.column_items()?;
        match sub_element.kind() {
            TypeKind::NdVector { ndim: 0, dtype } if dtype.is_integral() => {}
            _ => {
                return Err(StoreError::TypeMismatch {
                    expected: "[int]".to_string(),
                    received: subset.ty.to_string(),
                })
            }
        }
        let length = match (sub_len, subset.as_column()) {
            (Some(n), _) => n,
            (None, Ok(c)) => c.len(),
            (None, Err(_)) => return Err(StoreError::malformed("subset column length is unknown")),
        };
        let (element, _, unique) = target.ty.column_items()?;
        let ty = ValueType::column(element.clone(), Some(length), unique && sub_unique);
        Ok(Self::from_parts(ty, ValueKind::Ref(ValueRef { target, kind: RefKind::ColumnSubset(subset) })))
    }

    // ---- accessors ----

    pub fn as_nd_vector(&self) -> StoreResult<&NdVector> {
        match &self.kind {
            ValueKind::NdVector(nd) => Ok(nd),
            _ => Err(kind_mismatch("ND_VECTOR", self)),
        }
    }

    pub fn as_column(&self) -> StoreResult<&Column> {
        match &self.kind {
            ValueKind::Column(c) => Ok(c),
            _ => Err(kind_mismatch("COLUMN", self)),
        }
    }

    pub fn as_ref_value(&self) -> StoreResult<&ValueRef> {
        match &self.kind {
            ValueKind::Ref(r) => Ok(r),
            _ => Err(kind_mismatch("REF", self)),
        }
    }

    pub fn as_index(&self) -> StoreResult<&IndexData> {
        match &self.kind {
            ValueKind::Index(ix) => Ok(ix),
            _ => Err(kind_mismatch("INDEX", self)),
        }
    }

    pub fn record_entries(&self) -> StoreResult<&[Arc<Value>]> {
        match &self.kind {
            ValueKind::Record(entries) => Ok(entries),
            _ => Err(kind_mismatch("RECORD", self)),
        }
    }

    pub fn record_field(&self, name: &str) -> StoreResult<&Arc<Value>> {
        let fields = self.ty.record_items()?;
        let pos = fields
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| StoreError::malformed(format!("no field {:?} in {}", name, self.ty)))?;
        Ok(&self.record_entries()?[pos])
    }

    pub fn either_items(&self) -> StoreResult<(i64, &Arc<Value>)> {
        match &self.kind {
            ValueKind::Either { which, payload } => Ok((*which, payload)),
            _ => Err(kind_mismatch("EITHER", self)),
        }
    }

    /// Payload of `Some(x)`, `None` for `None`
    pub fn optional_value(&self) -> StoreResult<Option<&Arc<Value>>> {
        if !self.ty.is_optional() {
            return Err(kind_mismatch("T?", self));
        }
        let (which, payload) = self.either_items()?;
        Ok(if which == 0 { None } else { Some(payload) })
    }

    fn scalar_as<T: RawScalar>(&self, expected: &str) -> StoreResult<T> {
        self.as_nd_vector()?
            .scalar_as::<T>()
            .ok_or_else(|| kind_mismatch(expected, self))
    }

    pub fn scalar_i64(&self) -> StoreResult<i64> {
        self.scalar_as::<i64>("int")
    }

    pub fn scalar_f64(&self) -> StoreResult<f64> {
        self.scalar_as::<f64>("d0")
    }

    pub fn scalar_bool(&self) -> StoreResult<bool> {
        self.scalar_as::<bool>("?0")
    }

    /// Any zero-dimensional integer or boolean scalar, widened to `i64`
    pub fn integral_value(&self) -> StoreResult<i64> {
        let nd = self.as_nd_vector()?;
        if !nd.shape.is_empty() {
            return Err(kind_mismatch("integral scalar", self));
        }
        Ok(match nd.dtype {
            Dtype::I8 => self.scalar_as::<i8>("b0")? as i64,
            Dtype::U8 => self.scalar_as::<u8>("B0")? as i64,
            Dtype::I32 => self.scalar_as::<i32>("i0")? as i64,
            Dtype::I64 => self.scalar_as::<i64>("int")?,
            Dtype::Bool => self.scalar_as::<bool>("?0")? as i64,
            Dtype::F32 | Dtype::F64 => return Err(kind_mismatch("integral scalar", self)),
        })
    }

    /// Text of a `str` value, invalid UTF-8 replaced
    pub fn string_value(&self) -> StoreResult<String> {
        if !self.ty.is_string() {
            return Err(kind_mismatch("str", self));
        }
        let nd = self.as_nd_vector()?;
        Ok(String::from_utf8_lossy(nd.data()).into_owned())
    }
}

/// Every column of a table must have the same number of rows. Columns whose
/// length is neither in their type nor stored directly are not checked.
pub(crate) fn check_table_lengths(columns: &[Arc<Value>]) -> StoreResult<()> {
    let mut length = None;
    for c in columns {
        let (_, len, _) = c.ty.column_items()?;
        let n = match (len, c.as_column()) {
            (Some(n), _) => n,
            (None, Ok(col)) => col.len(),
            (None, Err(_)) => continue,
        };
        match length {
            Some(m) if m != n => {
                return Err(StoreError::malformed(format!(
                    "table columns have different lengths ({} and {})",
                    m, n
                )))
            }
            _ => length = Some(n),
        }
    }
    Ok(())
}

/// Structural equality.
///
/// Defined for nd-vectors (dtype must agree, shapes compared, then bytes)
/// and recursively for records and sums. Other variants are not comparable.
pub fn value_eq(x: &Value, y: &Value) -> StoreResult<bool> {
    match (&x.kind, &y.kind) {
        (ValueKind::NdVector(a), ValueKind::NdVector(b)) => {
            if a.dtype != b.dtype {
                return Err(StoreError::TypeMismatch {
                    expected: x.ty.to_string(),
                    received: y.ty.to_string(),
                });
            }
            if a.shape != b.shape {
                return Ok(false);
            }
            if !a.contiguous || !b.contiguous {
                return Err(StoreError::unsupported("comparison of non-contiguous nd_vectors"));
            }
            Ok(a.data == b.data)
        }
        (ValueKind::Record(a), ValueKind::Record(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (ea, eb) in a.iter().zip(b) {
                if !value_eq(ea, eb)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (ValueKind::Either { which: wa, payload: pa }, ValueKind::Either { which: wb, payload: pb }) => {
            Ok(wa == wb && value_eq(pa, pb)?)
        }
        _ => Err(StoreError::unsupported(format!(
            "equality between {} and {}",
            x.which(),
            y.which()
        ))),
    }
}
