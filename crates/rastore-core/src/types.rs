//! Structural type algebra
//!
//! A [`ValueType`] is an immutable, shared descriptor. Types compare
//! structurally: two independently built descriptors of the same shape are
//! equal, hash alike, and serialize to the same bytes.
//!
//! ## Variants
//!
//! ```text
//! COLUMN(element, length?, known_unique)   [T], [T:3], [T!]
//! ND_VECTOR(ndim, dtype)                   int, d0, l1, str, image
//! RECORD([(name, T)])                      {a: T, b: U}, Table {...}
//! EITHER([(case, T)])                      T?, <a: T | b: U>
//! FUNCTION(domain, range)                  A -> B
//! INDEX([column types], mode)              <index>
//! ```
//!
//! A [`TypeTag`] refines a shape without changing its layout: `str` is
//! `ND_VECTOR(1, I8)` tagged `STRING`, and `T?` is
//! `EITHER[("None", {}), ("Some", T)]` tagged `OPTIONAL`.
//!
//! ## Subtyping
//!
//! [`type_valid`] is total. Column length and uniqueness widen (an unsized,
//! non-unique target accepts any sized or unique sub). Sums are covariant per
//! case, functions are contravariant in the domain and covariant in the range.

use std::fmt;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::format::{BinReader, BinWriter, ObjectId};

/// Shared handle to an immutable type descriptor
pub type TypeRef = Arc<ValueType>;

/// Element type of an n-dimensional vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Dtype {
    I8 = 0,
    U8 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    Bool = 6,
}

impl Dtype {
    pub fn size_bytes(self) -> usize {
        match self {
            Dtype::I8 | Dtype::U8 | Dtype::Bool => 1,
            Dtype::I32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::F64 => 8,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Dtype::I8 => 'b',
            Dtype::U8 => 'B',
            Dtype::I32 => 'i',
            Dtype::I64 => 'l',
            Dtype::F32 => 'f',
            Dtype::F64 => 'd',
            Dtype::Bool => '?',
        }
    }

    pub fn from_char(c: char) -> StoreResult<Self> {
        Ok(match c {
            'b' => Dtype::I8,
            'B' => Dtype::U8,
            'i' => Dtype::I32,
            'l' => Dtype::I64,
            'f' => Dtype::F32,
            'd' => Dtype::F64,
            '?' => Dtype::Bool,
            _ => return Err(StoreError::unsupported(format!("dtype character {:?}", c))),
        })
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Dtype::I8 | Dtype::U8 | Dtype::I32 | Dtype::I64 | Dtype::Bool)
    }

    fn from_u8(b: u8, offset: usize) -> StoreResult<Self> {
        Ok(match b {
            0 => Dtype::I8,
            1 => Dtype::U8,
            2 => Dtype::I32,
            3 => Dtype::I64,
            4 => Dtype::F32,
            5 => Dtype::F64,
            6 => Dtype::Bool,
            _ => return Err(StoreError::corrupt(offset, format!("Unknown dtype {}", b))),
        })
    }
}

/// Refinement that reinterprets a shape without changing its layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    DataTable = 0,
    Optional = 1,
    String = 2,
    Datetime = 3,
    Image = 4,
    ImageData = 5,
}

impl TypeTag {
    fn from_u8(b: u8, offset: usize) -> StoreResult<Self> {
        Ok(match b {
            0 => TypeTag::DataTable,
            1 => TypeTag::Optional,
            2 => TypeTag::String,
            3 => TypeTag::Datetime,
            4 => TypeTag::Image,
            5 => TypeTag::ImageData,
            _ => return Err(StoreError::corrupt(offset, format!("Unknown type tag {}", b))),
        })
    }
}

/// Index lookup semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexMode {
    /// Exact match on the composite key hash
    Equals = 0,
}

impl IndexMode {
    pub(crate) fn from_u8(b: u8) -> StoreResult<Self> {
        match b {
            0 => Ok(IndexMode::Equals),
            other => Err(StoreError::unsupported(format!("index mode {}", other))),
        }
    }
}

/// Discriminant of [`TypeKind`], also the on-disk variant byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeWhich {
    Column = 0,
    NdVector = 1,
    Record = 2,
    Either = 3,
    Function = 4,
    Index = 5,
}

/// Shape of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Column {
        element: TypeRef,
        length: Option<i64>,
        known_unique: bool,
    },
    NdVector {
        ndim: i64,
        dtype: Dtype,
    },
    Record {
        fields: Vec<(String, TypeRef)>,
    },
    Either {
        cases: Vec<(String, TypeRef)>,
    },
    Function {
        domain: TypeRef,
        range: TypeRef,
    },
    Index {
        source_types: Vec<TypeRef>,
        mode: IndexMode,
    },
}

/// Immutable structural type descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueType {
    kind: TypeKind,
    tag: Option<TypeTag>,
}

fn check_unique_names(names: &[(String, TypeRef)], what: &str) -> StoreResult<()> {
    let mut seen = hashbrown::HashSet::with_capacity(names.len());
    for (name, _) in names {
        if !seen.insert(name.as_str()) {
            return Err(StoreError::malformed(format!("duplicate {} name {:?}", what, name)));
        }
    }
    Ok(())
}

impl ValueType {
    pub fn new(kind: TypeKind, tag: Option<TypeTag>) -> TypeRef {
        Arc::new(Self { kind, tag })
    }

    pub fn column(element: TypeRef, length: Option<i64>, known_unique: bool) -> TypeRef {
        Self::new(TypeKind::Column { element, length, known_unique }, None)
    }

    pub fn nd_vector(ndim: i64, dtype: Dtype) -> TypeRef {
        Self::new(TypeKind::NdVector { ndim, dtype }, None)
    }

    /// Zero-dimensional vector
    pub fn scalar(dtype: Dtype) -> TypeRef {
        Self::nd_vector(0, dtype)
    }

    pub fn int() -> TypeRef {
        Self::scalar(Dtype::I64)
    }

    pub fn float() -> TypeRef {
        Self::scalar(Dtype::F64)
    }

    pub fn boolean() -> TypeRef {
        Self::scalar(Dtype::Bool)
    }

    /// Byte buffer interpreted as text
    pub fn string() -> TypeRef {
        Self::new(TypeKind::NdVector { ndim: 1, dtype: Dtype::I8 }, Some(TypeTag::String))
    }

    /// Byte buffer holding an encoded image
    pub fn image() -> TypeRef {
        Self::new(TypeKind::NdVector { ndim: 1, dtype: Dtype::I8 }, Some(TypeTag::Image))
    }

    /// Unsized, non-unique column of booleans
    pub fn bool_column() -> TypeRef {
        Self::column(Self::boolean(), None, false)
    }

    pub fn record(fields: Vec<(String, TypeRef)>) -> StoreResult<TypeRef> {
        check_unique_names(&fields, "field")?;
        Ok(Self::new(TypeKind::Record { fields }, None))
    }

    /// The unit type
    pub fn empty_record() -> TypeRef {
        Self::new(TypeKind::Record { fields: Vec::new() }, None)
    }

    /// Record of unsized, non-unique columns tagged as a table
    pub fn data_table<S: AsRef<str>>(names: &[S], element_types: &[TypeRef]) -> StoreResult<TypeRef> {
        if names.len() != element_types.len() {
            return Err(StoreError::malformed(format!(
                "table has {} column names but {} element types",
                names.len(),
                element_types.len()
            )));
        }
        let fields: Vec<(String, TypeRef)> = names
            .iter()
            .zip(element_types)
            .map(|(n, t)| (n.as_ref().to_string(), Self::column(t.clone(), None, false)))
            .collect();
        check_unique_names(&fields, "column")?;
        Ok(Self::new(TypeKind::Record { fields }, Some(TypeTag::DataTable)))
    }

    pub fn either(cases: Vec<(String, TypeRef)>) -> StoreResult<TypeRef> {
        if cases.is_empty() {
            return Err(StoreError::malformed("sum type needs at least one case"));
        }
        check_unique_names(&cases, "case")?;
        Ok(Self::new(TypeKind::Either { cases }, None))
    }

    pub fn optional(inner: TypeRef) -> TypeRef {
        Self::new(
            TypeKind::Either {
                cases: vec![("None".to_string(), Self::empty_record()), ("Some".to_string(), inner)],
            },
            Some(TypeTag::Optional),
        )
    }

    pub fn function(domain: TypeRef, range: TypeRef) -> TypeRef {
        Self::new(TypeKind::Function { domain, range }, None)
    }

    pub fn index(source_types: Vec<TypeRef>, mode: IndexMode) -> StoreResult<TypeRef> {
        if source_types.is_empty() {
            return Err(StoreError::malformed("index needs at least one source column"));
        }
        if let Some(bad) = source_types.iter().find(|t| t.which() != TypeWhich::Column) {
            return Err(StoreError::TypeMismatch {
                expected: "[T]".to_string(),
                received: bad.to_string(),
            });
        }
        Ok(Self::new(TypeKind::Index { source_types, mode }, None))
    }

    /// Parse a type name: `int`, `str`, `image`, or any of those followed by `?`
    pub fn parse(s: &str) -> StoreResult<TypeRef> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix('?') {
            return Ok(Self::optional(Self::parse(inner)?));
        }
        match s {
            "int" => Ok(Self::int()),
            "str" => Ok(Self::string()),
            "image" => Ok(Self::image()),
            other => Err(StoreError::unsupported(format!("type string {:?}", other))),
        }
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn tag(&self) -> Option<TypeTag> {
        self.tag
    }

    pub fn which(&self) -> TypeWhich {
        match &self.kind {
            TypeKind::Column { .. } => TypeWhich::Column,
            TypeKind::NdVector { .. } => TypeWhich::NdVector,
            TypeKind::Record { .. } => TypeWhich::Record,
            TypeKind::Either { .. } => TypeWhich::Either,
            TypeKind::Function { .. } => TypeWhich::Function,
            TypeKind::Index { .. } => TypeWhich::Index,
        }
    }

    pub fn which_str(&self) -> &'static str {
        match self.which() {
            TypeWhich::Column => "COLUMN",
            TypeWhich::NdVector => "ND_VECTOR",
            TypeWhich::Record => "RECORD",
            TypeWhich::Either => "EITHER",
            TypeWhich::Function => "FUNCTION",
            TypeWhich::Index => "INDEX",
        }
    }

    /// Values of this type are always stored as their direct variant, so the
    /// value tag can be omitted from their encoding.
    pub fn known_direct(&self) -> bool {
        self.which() == TypeWhich::NdVector
    }

    pub fn is_optional(&self) -> bool {
        self.tag == Some(TypeTag::Optional) && matches!(&self.kind, TypeKind::Either { cases } if cases.len() == 2)
    }

    pub fn is_string(&self) -> bool {
        self.tag == Some(TypeTag::String)
    }

    pub fn is_data_table(&self) -> bool {
        self.tag == Some(TypeTag::DataTable)
    }

    fn mismatch(&self, expected: &str) -> StoreError {
        StoreError::TypeMismatch {
            expected: expected.to_string(),
            received: self.to_string(),
        }
    }

    /// Payload type of `T?`
    pub fn unpack_optional(&self) -> StoreResult<&TypeRef> {
        match &self.kind {
            TypeKind::Either { cases } if self.is_optional() => Ok(&cases[1].1),
            _ => Err(self.mismatch("T?")),
        }
    }

    pub fn record_items(&self) -> StoreResult<&[(String, TypeRef)]> {
        match &self.kind {
            TypeKind::Record { fields } => Ok(fields),
            _ => Err(self.mismatch("{...}")),
        }
    }

    pub fn either_items(&self) -> StoreResult<&[(String, TypeRef)]> {
        match &self.kind {
            TypeKind::Either { cases } => Ok(cases),
            _ => Err(self.mismatch("<...>")),
        }
    }

    pub fn nd_vector_items(&self) -> StoreResult<(i64, Dtype)> {
        match &self.kind {
            TypeKind::NdVector { ndim, dtype } => Ok((*ndim, *dtype)),
            _ => Err(self.mismatch("nd_vector")),
        }
    }

    pub fn column_items(&self) -> StoreResult<(&TypeRef, Option<i64>, bool)> {
        match &self.kind {
            TypeKind::Column { element, length, known_unique } => Ok((element, *length, *known_unique)),
            _ => Err(self.mismatch("[T]")),
        }
    }

    pub fn column_element(&self) -> StoreResult<&TypeRef> {
        Ok(self.column_items()?.0)
    }

    pub fn index_items(&self) -> StoreResult<(&[TypeRef], IndexMode)> {
        match &self.kind {
            TypeKind::Index { source_types, mode } => Ok((source_types, *mode)),
            _ => Err(self.mismatch("<index>")),
        }
    }

    /// Append the self-describing encoding of this type
    pub fn write_bin(&self, w: &mut BinWriter) {
        w.put_header(ObjectId::ValueType);
        w.put_u8(self.which() as u8);
        match self.tag {
            Some(t) => {
                w.put_i8(1);
                w.put_u8(t as u8);
            }
            None => w.put_i8(0),
        }

        match &self.kind {
            TypeKind::Column { element, length, known_unique } => {
                element.write_bin(w);
                w.put_opt_i64(*length);
                w.put_bool(*known_unique);
            }
            TypeKind::NdVector { ndim, dtype } => {
                w.put_i64(*ndim);
                w.put_u8(*dtype as u8);
            }
            TypeKind::Record { fields: items } | TypeKind::Either { cases: items } => {
                w.put_i64(items.len() as i64);
                for (name, ty) in items {
                    w.put_string(name);
                    ty.write_bin(w);
                }
            }
            TypeKind::Function { domain, range } => {
                domain.write_bin(w);
                range.write_bin(w);
            }
            TypeKind::Index { source_types, mode } => {
                w.put_i64(source_types.len() as i64);
                for ty in source_types {
                    ty.write_bin(w);
                }
                w.put_u8(*mode as u8);
            }
        }
    }

    pub fn read_bin(r: &mut BinReader<'_>) -> StoreResult<TypeRef> {
        r.expect_header(ObjectId::ValueType)?;
        let at = r.position();
        let which = r.get_u8()?;
        let tag_at = r.position();
        let tag = match r.get_i8()? {
            0 => None,
            1 => {
                let b = r.get_u8()?;
                Some(TypeTag::from_u8(b, tag_at + 1)?)
            }
            f => return Err(StoreError::corrupt(tag_at, format!("Invalid tag flag {}", f))),
        };

        let kind = match which {
            0 => {
                let element = Self::read_bin(r)?;
                let length = r.get_opt_i64()?;
                let known_unique = r.get_bool()?;
                TypeKind::Column { element, length, known_unique }
            }
            1 => {
                let ndim = r.get_i64()?;
                let dtype_at = r.position();
                let dtype = Dtype::from_u8(r.get_u8()?, dtype_at)?;
                TypeKind::NdVector { ndim, dtype }
            }
            2 | 3 => {
                let n = r.get_len(3)?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = r.get_string()?;
                    items.push((name, Self::read_bin(r)?));
                }
                if which == 2 {
                    TypeKind::Record { fields: items }
                } else {
                    TypeKind::Either { cases: items }
                }
            }
            4 => {
                let domain = Self::read_bin(r)?;
                let range = Self::read_bin(r)?;
                TypeKind::Function { domain, range }
            }
            5 => {
                let n = r.get_len(3)?;
                let mut source_types = Vec::with_capacity(n);
                for _ in 0..n {
                    source_types.push(Self::read_bin(r)?);
                }
                let mode = IndexMode::from_u8(r.get_u8()?)?;
                TypeKind::Index { source_types, mode }
            }
            other => return Err(StoreError::corrupt(at, format!("Unknown type variant {}", other))),
        };

        Ok(Self::new(kind, tag))
    }

    /// Content hash of the serialized descriptor
    pub fn struct_hash(&self) -> u128 {
        let mut w = BinWriter::new();
        self.write_bin(&mut w);
        xxhash_rust::xxh3::xxh3_128(w.as_slice())
    }
}

/// Structural equality of two descriptors
pub fn struct_eq(x: &ValueType, y: &ValueType) -> bool {
    x == y
}

/// True if `sub` is a valid subtype of `target`.
pub fn type_valid(target: &ValueType, sub: &ValueType) -> bool {
    if target.which() != sub.which() {
        return false;
    }
    if target.tag.is_some() && target.tag != sub.tag {
        return false;
    }

    match (&target.kind, &sub.kind) {
        (
            TypeKind::Column { element: te, length: tl, known_unique: tu },
            TypeKind::Column { element: se, length: sl, known_unique: su },
        ) => {
            if !type_valid(te, se) {
                return false;
            }
            if tl.is_some() && tl != sl {
                return false;
            }
            !(*tu && !*su)
        }
        (TypeKind::NdVector { ndim: tn, dtype: td }, TypeKind::NdVector { ndim: sn, dtype: sd }) => {
            tn == sn && td == sd
        }
        (TypeKind::Record { fields: tf }, TypeKind::Record { fields: sf }) => {
            tf.len() == sf.len()
                && tf.iter().zip(sf).all(|((tn, tt), (sn, st))| tn == sn && type_valid(tt, st))
        }
        (TypeKind::Either { cases: tc }, TypeKind::Either { cases: sc }) => {
            if target.is_optional() && sub.is_optional() {
                return type_valid(&tc[1].1, &sc[1].1);
            }
            tc.len() == sc.len()
                && tc.iter().zip(sc).all(|((tn, tt), (sn, st))| tn == sn && type_valid(tt, st))
        }
        (TypeKind::Function { domain: td, range: tr }, TypeKind::Function { domain: sd, range: sr }) => {
            type_valid(sd, td) && type_valid(tr, sr)
        }
        (
            TypeKind::Index { source_types: tt, mode: tm },
            TypeKind::Index { source_types: st, mode: sm },
        ) => tm == sm && tt.len() == st.len() && tt.iter().zip(st).all(|(t, s)| type_valid(t, s)),
        _ => false,
    }
}

/// [`type_valid`] that reports the two types on failure
pub fn assert_type_valid(target: &ValueType, sub: &ValueType) -> StoreResult<()> {
    if type_valid(target, sub) {
        Ok(())
    } else {
        Err(StoreError::TypeMismatch {
            expected: target.to_string(),
            received: sub.to_string(),
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Column { element, length, known_unique } => {
                write!(f, "[{}", element)?;
                if let Some(n) = length {
                    write!(f, ":{}", n)?;
                }
                if *known_unique {
                    write!(f, "!")?;
                }
                write!(f, "]")
            }
            TypeKind::NdVector { ndim, dtype } => match self.tag {
                Some(TypeTag::String) => write!(f, "str"),
                Some(TypeTag::Image) => write!(f, "image"),
                Some(TypeTag::ImageData) => write!(f, "image_data"),
                Some(TypeTag::Datetime) => write!(f, "datetime"),
                _ if *ndim == 0 && *dtype == Dtype::I64 => write!(f, "int"),
                _ => write!(f, "{}{}", dtype.as_char(), ndim),
            },
            TypeKind::Record { fields } => {
                if self.is_data_table() {
                    write!(f, "Table ")?;
                }
                write!(f, "{{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, "}}")
            }
            TypeKind::Either { cases } => {
                if self.is_optional() {
                    return write!(f, "{}?", cases[1].1);
                }
                write!(f, "<")?;
                for (i, (name, ty)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}: {}", name, ty)?;
                }
                write!(f, ">")
            }
            TypeKind::Function { domain, range } => write!(f, "{} -> {}", domain, range),
            TypeKind::Index { .. } => write!(f, "<index>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zoo() -> Vec<TypeRef> {
        let int_col = ValueType::column(ValueType::int(), None, false);
        vec![
            ValueType::int(),
            ValueType::float(),
            ValueType::string(),
            ValueType::image(),
            ValueType::nd_vector(2, Dtype::F32),
            int_col.clone(),
            ValueType::column(ValueType::string(), Some(3), true),
            ValueType::record(vec![("a".into(), ValueType::int()), ("b".into(), ValueType::string())]).unwrap(),
            ValueType::empty_record(),
            ValueType::data_table(&["x", "y"], &[ValueType::int(), ValueType::float()]).unwrap(),
            ValueType::optional(ValueType::int()),
            ValueType::either(vec![("l".into(), ValueType::int()), ("r".into(), ValueType::string())]).unwrap(),
            ValueType::function(ValueType::int(), ValueType::string()),
            ValueType::index(vec![int_col], IndexMode::Equals).unwrap(),
            ValueType::bool_column(),
        ]
    }

    #[test]
    fn test_reflexive() {
        for t in zoo() {
            assert!(type_valid(&t, &t), "{} should accept itself", t);
        }
    }

    #[test]
    fn test_column_widening() {
        let wide = ValueType::column(ValueType::int(), None, false);
        let narrow = ValueType::column(ValueType::int(), Some(7), true);
        assert!(type_valid(&wide, &narrow));
        assert!(!type_valid(&narrow, &wide));

        let sized = ValueType::column(ValueType::int(), Some(6), false);
        assert!(!type_valid(&sized, &ValueType::column(ValueType::int(), Some(7), false)));
    }

    #[test]
    fn test_tags_and_shapes() {
        let bytes = ValueType::nd_vector(1, Dtype::I8);
        // Untagged target accepts tagged sub, not the reverse
        assert!(type_valid(&bytes, &ValueType::string()));
        assert!(!type_valid(&ValueType::string(), &bytes));
        assert!(!type_valid(&ValueType::string(), &ValueType::image()));
        assert!(!type_valid(&ValueType::int(), &ValueType::float()));
        assert!(!type_valid(&ValueType::int(), &ValueType::bool_column()));
    }

    #[test]
    fn test_record_field_order_matters() {
        let ab = ValueType::record(vec![("a".into(), ValueType::int()), ("b".into(), ValueType::int())]).unwrap();
        let ba = ValueType::record(vec![("b".into(), ValueType::int()), ("a".into(), ValueType::int())]).unwrap();
        assert!(!type_valid(&ab, &ba));
        assert!(ValueType::record(vec![("a".into(), ValueType::int()), ("a".into(), ValueType::int())]).is_err());
    }

    #[test]
    fn test_sum_and_function_variance() {
        let wide = ValueType::column(ValueType::int(), None, false);
        let narrow = ValueType::column(ValueType::int(), Some(2), true);

        assert!(type_valid(&ValueType::optional(wide.clone()), &ValueType::optional(narrow.clone())));
        assert!(!type_valid(&ValueType::optional(narrow.clone()), &ValueType::optional(wide.clone())));

        let s_wide = ValueType::either(vec![("c".into(), wide.clone())]).unwrap();
        let s_narrow = ValueType::either(vec![("c".into(), narrow.clone())]).unwrap();
        assert!(type_valid(&s_wide, &s_narrow));
        assert!(!type_valid(&s_narrow, &s_wide));

        // Accepting a wider domain or returning a narrower range is a valid sub
        let target = ValueType::function(narrow.clone(), wide.clone());
        let sub = ValueType::function(wide.clone(), narrow.clone());
        assert!(type_valid(&target, &sub));
        assert!(!type_valid(&sub, &target));
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueType::int().to_string(), "int");
        assert_eq!(ValueType::float().to_string(), "d0");
        assert_eq!(ValueType::string().to_string(), "str");
        assert_eq!(ValueType::column(ValueType::int(), Some(3), true).to_string(), "[int:3!]");
        assert_eq!(ValueType::optional(ValueType::string()).to_string(), "str?");
        assert_eq!(
            ValueType::data_table(&["a"], &[ValueType::int()]).unwrap().to_string(),
            "Table {a: [int]}"
        );
        assert_eq!(ValueType::function(ValueType::int(), ValueType::image()).to_string(), "int -> image");
        assert_eq!(
            ValueType::either(vec![("l".into(), ValueType::int()), ("r".into(), ValueType::string())])
                .unwrap()
                .to_string(),
            "<l: int | r: str>"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!(*ValueType::parse("int").unwrap(), *ValueType::int());
        assert_eq!(*ValueType::parse("str?").unwrap(), *ValueType::optional(ValueType::string()));
        assert!(ValueType::parse("image").unwrap().tag() == Some(TypeTag::Image));
        assert!(matches!(ValueType::parse("float"), Err(StoreError::Unsupported { .. })));
    }

    #[test]
    fn test_codec_roundtrip_and_hash() {
        for t in zoo() {
            let mut w = BinWriter::new();
            t.write_bin(&mut w);
            let bytes = w.into_vec();
            let mut r = BinReader::new(&bytes);
            let back = ValueType::read_bin(&mut r).unwrap();
            assert!(r.is_exhausted());
            assert!(struct_eq(&t, &back));
            assert_eq!(t.struct_hash(), back.struct_hash());
        }
        assert_ne!(ValueType::int().struct_hash(), ValueType::float().struct_hash());
    }

    #[test]
    fn test_unknown_index_mode_rejected() {
        let t = ValueType::index(vec![ValueType::bool_column()], IndexMode::Equals).unwrap();
        let mut w = BinWriter::new();
        t.write_bin(&mut w);
        let mut bytes = w.into_vec();
        let last = bytes.len() - 1;
        bytes[last] = 9;
        let err = ValueType::read_bin(&mut BinReader::new(&bytes)).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));
    }

    #[test]
    fn test_assert_type_valid_diagnostic() {
        let err = assert_type_valid(&ValueType::int(), &ValueType::string()).unwrap_err();
        assert_eq!(err.to_string(), " *** Type mismatch\n     Expected: int\n     Received: str");
    }

    #[test]
    fn test_accessors() {
        let opt = ValueType::optional(ValueType::int());
        assert!(opt.is_optional());
        assert_eq!(**opt.unpack_optional().unwrap(), *ValueType::int());
        assert!(ValueType::int().unpack_optional().is_err());
        assert_eq!(ValueType::string().nd_vector_items().unwrap(), (1, Dtype::I8));
        assert_eq!(ValueType::int().which_str(), "ND_VECTOR");
        assert!(ValueType::int().known_direct());
        assert!(!opt.known_direct());
        assert!(ValueType::index(vec![ValueType::int()], IndexMode::Equals).is_err());
        assert_eq!(Dtype::from_char('l').unwrap(), Dtype::I64);
    }
}
