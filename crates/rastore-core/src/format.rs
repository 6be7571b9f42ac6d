//! Binary format definitions for RaStore
//!
//! Everything is little-endian. Scalars are fixed width, strings and vectors
//! carry an `i64` length prefix, optionals carry an `i8` presence flag.
//! Aggregates (values, types, column metadata) are prefixed with a two-letter
//! object id so a reader can tell what it is looking at.
//!
//! Persisted files are wrapped in a [`SegmentHeader`] (32 bytes) carrying the
//! payload length and a CRC32C of the payload:
//! SegmentHeader (32 bytes) + payload

use bytes::BufMut;

use crate::error::{StoreError, StoreResult};

/// Magic bytes identifying RaStore segment files: "RAST" in ASCII
pub const MAGIC_ARRAY: [u8; 4] = *b"RAST";

/// Segment header size in bytes
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Size of one row slot in a column's top table: block, offset, length (3 x i64)
pub const TABLE_ENTRY_SIZE: usize = 24;

/// Two-letter ids written before each self-describing aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectId {
    /// Column metadata
    ColumnMeta,
    /// Pair. Reserved wire tag, nothing in this crate writes it.
    Pair,
    /// Lazy query node. Reserved wire tag: thunks are never serialized.
    Query,
    /// Value
    Value,
    /// Vector
    Vector,
    /// Value type
    ValueType,
}

impl ObjectId {
    pub fn as_bytes(self) -> [u8; 2] {
        match self {
            ObjectId::ColumnMeta => *b"CM",
            ObjectId::Pair => *b"PA",
            ObjectId::Query => *b"QU",
            ObjectId::Value => *b"VA",
            ObjectId::Vector => *b"VE",
            ObjectId::ValueType => *b"VT",
        }
    }
}

/// Kind of payload stored in a segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SegmentKind {
    /// Serialized top-level value of a saved graph
    Top = 1,
    /// Column metadata: object header, column type, value tag, column format
    ColumnMeta = 2,
    /// Column row table
    ColumnTable = 3,
    /// Column entry blobs
    ColumnEntries = 4,
}

impl SegmentKind {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            1 => Some(SegmentKind::Top),
            2 => Some(SegmentKind::ColumnMeta),
            3 => Some(SegmentKind::ColumnTable),
            4 => Some(SegmentKind::ColumnEntries),
            _ => None,
        }
    }
}

/// Fixed-size header at the start of every segment file
/// Size: 32 bytes
///
/// Layout:
///   [0..4]   magic:    [u8;4] - "RAST"
///   [4]      kind:     u8     - SegmentKind
///   [5..8]   reserved: [u8;3]
///   [8..16]  length:   u64 LE - payload length in bytes
///   [16..20] checksum: u32 LE - CRC32C of payload bytes
///   [20..32] padding:  [u8;12]
#[derive(Debug, Clone, Copy)]
pub struct SegmentHeader {
    /// Magic bytes for file identification
    pub magic: [u8; 4],
    /// Payload kind
    pub kind: u8,
    /// Payload length (excluding this header)
    pub length: u64,
    /// CRC32C checksum of the payload bytes
    pub checksum: u32,
}

impl SegmentHeader {
    /// Create a header describing `payload`
    pub fn new(kind: SegmentKind, payload: &[u8]) -> Self {
        Self {
            magic: MAGIC_ARRAY,
            kind: kind as u8,
            length: payload.len() as u64,
            checksum: crc32c::crc32c(payload),
        }
    }

    /// Serialize header to bytes for writing
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4] = self.kind;
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut length = [0u8; 8];
        length.copy_from_slice(&bytes[8..16]);
        Self {
            magic,
            kind: bytes[4],
            length: u64::from_le_bytes(length),
            checksum: u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        }
    }
}

/// Wrap a payload into a complete segment: header + payload
pub fn seal_segment(kind: SegmentKind, payload: &[u8]) -> Vec<u8> {
    let header = SegmentHeader::new(kind, payload);
    let mut buffer = Vec::with_capacity(SEGMENT_HEADER_SIZE + payload.len());
    buffer.extend_from_slice(&header.to_bytes());
    buffer.extend_from_slice(payload);
    buffer
}

/// Validate a segment read from `path` and return the payload range.
///
/// Magic, kind and length are always checked; the CRC32C only when `verify` is set.
pub fn open_segment(
    path: &std::path::Path,
    data: &[u8],
    kind: SegmentKind,
    verify: bool,
) -> StoreResult<std::ops::Range<usize>> {
    if data.len() < SEGMENT_HEADER_SIZE {
        return Err(StoreError::corrupt(
            0,
            format!(
                "Segment {} too short: {} bytes, need at least {}",
                path.display(),
                data.len(),
                SEGMENT_HEADER_SIZE
            ),
        ));
    }

    let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
    header_bytes.copy_from_slice(&data[..SEGMENT_HEADER_SIZE]);
    let header = SegmentHeader::from_bytes(&header_bytes);

    if header.magic != MAGIC_ARRAY {
        return Err(StoreError::NoMagicFound {
            path: path.to_path_buf(),
            found: header.magic,
        });
    }

    match SegmentKind::from_u8(header.kind) {
        Some(k) if k == kind => {}
        _ => {
            return Err(StoreError::corrupt(
                4,
                format!("Expected segment kind {:?}, found {}", kind, header.kind),
            ))
        }
    }

    let end = SEGMENT_HEADER_SIZE as u64 + header.length;
    if (data.len() as u64) < end {
        return Err(StoreError::corrupt(
            SEGMENT_HEADER_SIZE,
            format!(
                "Torn segment {}: header claims {} payload bytes, {} available",
                path.display(),
                header.length,
                data.len() - SEGMENT_HEADER_SIZE
            ),
        ));
    }
    let range = SEGMENT_HEADER_SIZE..end as usize;

    if verify {
        let actual = crc32c::crc32c(&data[range.clone()]);
        if actual != header.checksum {
            return Err(StoreError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: header.checksum,
                actual,
            });
        }
    }

    Ok(range)
}

/// Append-only little-endian encoder
#[derive(Debug, Default)]
pub struct BinWriter {
    buf: Vec<u8>,
}

impl BinWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn put_u8(&mut self, x: u8) {
        self.buf.put_u8(x);
    }

    pub fn put_i8(&mut self, x: i8) {
        self.buf.put_i8(x);
    }

    pub fn put_bool(&mut self, x: bool) {
        self.buf.put_u8(x as u8);
    }

    pub fn put_i64(&mut self, x: i64) {
        self.buf.put_i64_le(x);
    }

    pub fn put_u128(&mut self, x: u128) {
        self.buf.put_u128_le(x);
    }

    /// Raw bytes, no length prefix
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Length-prefixed byte string
    pub fn put_string(&mut self, s: &str) {
        self.put_i64(s.len() as i64);
        self.put_raw(s.as_bytes());
    }

    pub fn put_opt_i64(&mut self, x: Option<i64>) {
        match x {
            Some(v) => {
                self.put_i8(1);
                self.put_i64(v);
            }
            None => self.put_i8(0),
        }
    }

    pub fn put_header(&mut self, id: ObjectId) {
        self.put_raw(&id.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked little-endian decoder over a borrowed buffer
#[derive(Debug, Clone)]
pub struct BinReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn get_raw(&mut self, n: usize) -> StoreResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(StoreError::corrupt(
                self.pos,
                format!("Need {} bytes, {} remaining", n, self.remaining()),
            ));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn get_array<const N: usize>(&mut self) -> StoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_raw(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> StoreResult<u8> {
        Ok(self.get_array::<1>()?[0])
    }

    pub fn get_i8(&mut self) -> StoreResult<i8> {
        Ok(self.get_u8()? as i8)
    }

    pub fn get_bool(&mut self) -> StoreResult<bool> {
        let at = self.pos;
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(StoreError::corrupt(at, format!("Invalid bool byte {}", b))),
        }
    }

    pub fn get_i64(&mut self) -> StoreResult<i64> {
        Ok(i64::from_le_bytes(self.get_array::<8>()?))
    }

    pub fn get_u128(&mut self) -> StoreResult<u128> {
        Ok(u128::from_le_bytes(self.get_array::<16>()?))
    }

    /// Read an `i64` length prefix and check it against the remaining input
    pub fn get_len(&mut self, elem_size: usize) -> StoreResult<usize> {
        let at = self.pos;
        let n = self.get_i64()?;
        if n < 0 || (n as u128) * (elem_size.max(1) as u128) > self.remaining() as u128 {
            return Err(StoreError::corrupt(at, format!("Invalid length prefix {}", n)));
        }
        Ok(n as usize)
    }

    pub fn get_string(&mut self) -> StoreResult<String> {
        let at = self.pos;
        let n = self.get_len(1)?;
        let raw = self.get_raw(n)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StoreError::corrupt(at, "String is not valid UTF-8"))
    }

    pub fn get_opt_i64(&mut self) -> StoreResult<Option<i64>> {
        let at = self.pos;
        match self.get_i8()? {
            0 => Ok(None),
            1 => Ok(Some(self.get_i64()?)),
            f => Err(StoreError::corrupt(at, format!("Invalid option flag {}", f))),
        }
    }

    pub fn expect_header(&mut self, id: ObjectId) -> StoreResult<()> {
        let at = self.pos;
        let found = self.get_array::<2>()?;
        if found != id.as_bytes() {
            return Err(StoreError::corrupt(
                at,
                format!(
                    "Expected object id {:?}, found {:?}",
                    String::from_utf8_lossy(&id.as_bytes()),
                    String::from_utf8_lossy(&found)
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader::new(SegmentKind::ColumnTable, b"payload");
        let bytes = header.to_bytes();
        let parsed = SegmentHeader::from_bytes(&bytes);

        assert_eq!(parsed.magic, MAGIC_ARRAY);
        assert_eq!(parsed.kind, SegmentKind::ColumnTable as u8);
        assert_eq!(parsed.length, 7);
        assert_eq!(parsed.checksum, crc32c::crc32c(b"payload"));
    }

    #[test]
    fn test_segment_checksum_detects_corruption() {
        let mut seg = seal_segment(SegmentKind::Top, b"hello segment");
        let range = open_segment(Path::new("top"), &seg, SegmentKind::Top, true).unwrap();
        assert_eq!(&seg[range], b"hello segment");

        let last = seg.len() - 1;
        seg[last] ^= 0xFF;
        let err = open_segment(Path::new("top"), &seg, SegmentKind::Top, true).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));

        // Unverified reads still accept the payload
        assert!(open_segment(Path::new("top"), &seg, SegmentKind::Top, false).is_ok());
    }

    #[test]
    fn test_segment_bad_magic() {
        let mut seg = seal_segment(SegmentKind::Top, b"x");
        seg[0] = b'X';
        let err = open_segment(Path::new("top"), &seg, SegmentKind::Top, true).unwrap_err();
        assert!(matches!(err, StoreError::NoMagicFound { found, .. } if found[0] == b'X'));
    }

    #[test]
    fn test_segment_wrong_kind_and_torn() {
        let seg = seal_segment(SegmentKind::ColumnMeta, b"meta");
        assert!(open_segment(Path::new("m"), &seg, SegmentKind::Top, true).is_err());

        let torn = &seg[..seg.len() - 2];
        let err = open_segment(Path::new("m"), torn, SegmentKind::ColumnMeta, true).unwrap_err();
        assert!(matches!(err, StoreError::CorruptEncoding { .. }));
    }

    #[test]
    fn test_reader_primitives() {
        let mut w = BinWriter::new();
        w.put_header(ObjectId::Value);
        w.put_i64(-42);
        w.put_string("abc");
        w.put_opt_i64(Some(7));
        w.put_opt_i64(None);
        w.put_bool(true);
        w.put_u128(u128::MAX - 1);

        let bytes = w.into_vec();
        let mut r = BinReader::new(&bytes);
        r.expect_header(ObjectId::Value).unwrap();
        assert_eq!(r.get_i64().unwrap(), -42);
        assert_eq!(r.get_string().unwrap(), "abc");
        assert_eq!(r.get_opt_i64().unwrap(), Some(7));
        assert_eq!(r.get_opt_i64().unwrap(), None);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_u128().unwrap(), u128::MAX - 1);
        assert!(r.is_exhausted());
    }

    #[test]
    fn test_reader_rejects_truncation_and_bad_prefix() {
        let mut r = BinReader::new(&[1, 2, 3]);
        assert!(matches!(r.get_i64(), Err(StoreError::CorruptEncoding { offset: 0, .. })));

        let mut w = BinWriter::new();
        w.put_i64(1_000_000);
        let bytes = w.into_vec();
        let mut r = BinReader::new(&bytes);
        assert!(r.get_string().is_err());

        let mut r = BinReader::new(b"VT");
        assert!(r.expect_header(ObjectId::Value).is_err());
    }

    #[test]
    fn test_reserved_object_ids_are_distinct() {
        let all = [
            ObjectId::ColumnMeta,
            ObjectId::Pair,
            ObjectId::Query,
            ObjectId::Value,
            ObjectId::Vector,
            ObjectId::ValueType,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.as_bytes(), b.as_bytes());
            }
        }
        // A reserved tag never passes for a value
        for reserved in [ObjectId::Pair, ObjectId::Query] {
            let bytes = reserved.as_bytes();
            assert!(BinReader::new(&bytes).expect_header(ObjectId::Value).is_err());
        }
    }
}
