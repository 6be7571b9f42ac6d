//! Blob storage behind every column
//!
//! A column is stored as two byte regions:
//! - `top`: one fixed-width [`TableEntry`] per row (`block`, `offset`, `len`)
//! - `entries`: a block table followed by the concatenated blocks. One block
//!   per writer slot, so concurrent writers never share a buffer.
//!
//! Entries layout:
//!   num_blocks: i64 LE
//!   block_len:  i64 LE  (x num_blocks)
//!   block bytes          (x num_blocks, concatenated)
//!
//! On disk each region lives in its own segment file wrapped in a
//! checksummed [`SegmentHeader`](crate::format::SegmentHeader).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::durable::write_file;
use crate::error::{StoreError, StoreResult};
use crate::format::{open_segment, seal_segment, BinReader, BinWriter, SegmentKind, TABLE_ENTRY_SIZE};

/// Location of one row's bytes inside the entries region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableEntry {
    /// Writer block holding the bytes
    pub block: i64,
    /// Byte offset inside that block
    pub offset: i64,
    /// Number of bytes
    pub len: i64,
}

impl TableEntry {
    pub fn to_bytes(&self) -> [u8; TABLE_ENTRY_SIZE] {
        let mut buf = [0u8; TABLE_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.block.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let mut r = BinReader::new(bytes);
        Ok(Self {
            block: r.get_i64()?,
            offset: r.get_i64()?,
            len: r.get_i64()?,
        })
    }
}

/// Write side of the blob store.
///
/// The row table is pre-sized with [`extend`](Self::extend); rows are then
/// filled in any order with [`put`](Self::put). Each writer passes its own
/// block index, so the per-block locks are never contended.
pub struct BlobStoreBuilder {
    /// Three slots per row: block, offset, len
    top: Vec<AtomicU64>,
    /// One append buffer per writer
    blocks: Vec<Mutex<Vec<u8>>>,
}

impl BlobStoreBuilder {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            top: Vec::new(),
            blocks: (0..num_blocks.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn len(&self) -> usize {
        self.top.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty()
    }

    /// Grow the row table to `n` rows. Never shrinks.
    pub fn extend(&mut self, n: usize) {
        let want = n * 3;
        if want > self.top.len() {
            self.top.resize_with(want, || AtomicU64::new(0));
        }
    }

    /// Store `bytes` as row `i` through writer `block`
    pub fn put(&self, bytes: &[u8], i: usize, block: usize) -> StoreResult<()> {
        if i >= self.len() {
            return Err(StoreError::OutOfBounds {
                index: i as i64,
                length: self.len() as i64,
            });
        }
        let slot = self.blocks.get(block).ok_or(StoreError::OutOfBounds {
            index: block as i64,
            length: self.blocks.len() as i64,
        })?;

        let offset = {
            let mut buf = slot.lock();
            let offset = buf.len();
            buf.extend_from_slice(bytes);
            offset
        };

        self.top[3 * i].store(block as u64, Ordering::Relaxed);
        self.top[3 * i + 1].store(offset as u64, Ordering::Relaxed);
        self.top[3 * i + 2].store(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn entry(&self, i: usize) -> StoreResult<TableEntry> {
        if i >= self.len() {
            return Err(StoreError::OutOfBounds {
                index: i as i64,
                length: self.len() as i64,
            });
        }
        Ok(TableEntry {
            block: self.top[3 * i].load(Ordering::Relaxed) as i64,
            offset: self.top[3 * i + 1].load(Ordering::Relaxed) as i64,
            len: self.top[3 * i + 2].load(Ordering::Relaxed) as i64,
        })
    }

    /// Copy of row `i`'s bytes before the store is frozen
    pub fn get(&self, i: usize) -> StoreResult<Vec<u8>> {
        let e = self.entry(i)?;
        let block = self.blocks[e.block as usize].lock();
        let (lo, hi) = (e.offset as usize, (e.offset + e.len) as usize);
        if hi > block.len() {
            return Err(StoreError::corrupt(lo, "Row points past end of block"));
        }
        Ok(block[lo..hi].to_vec())
    }

    /// Freeze into an immutable store
    pub fn freeze(self) -> BlobStore {
        let length = self.len();
        let mut top = Vec::with_capacity(length * TABLE_ENTRY_SIZE);
        for slot in &self.top {
            top.extend_from_slice(&slot.load(Ordering::Relaxed).to_le_bytes());
        }

        let blocks: Vec<Vec<u8>> = self.blocks.into_iter().map(Mutex::into_inner).collect();
        let total: usize = blocks.iter().map(Vec::len).sum();
        let mut w = BinWriter::with_capacity(8 * (blocks.len() + 1) + total);
        w.put_i64(blocks.len() as i64);
        for b in &blocks {
            w.put_i64(b.len() as i64);
        }
        let mut block_starts = Vec::with_capacity(blocks.len());
        for b in &blocks {
            block_starts.push(w.len());
            w.put_raw(b);
        }

        BlobStore {
            top: Bytes::from(top),
            entries: Bytes::from(w.into_vec()),
            block_starts,
            length,
        }
    }
}

/// Read side of the blob store, backed by shared immutable buffers
#[derive(Clone)]
pub struct BlobStore {
    top: Bytes,
    entries: Bytes,
    /// Absolute start of each block inside `entries`
    block_starts: Vec<usize>,
    length: usize,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("length", &self.length)
            .field("blocks", &self.block_starts.len())
            .field("entries_bytes", &self.entries.len())
            .finish()
    }
}

impl BlobStore {
    /// Rebuild a store from its two serialized regions
    pub fn from_parts(top: Bytes, entries: Bytes) -> StoreResult<Self> {
        if top.len() % TABLE_ENTRY_SIZE != 0 {
            return Err(StoreError::corrupt(
                top.len(),
                format!("Row table length {} is not a multiple of {}", top.len(), TABLE_ENTRY_SIZE),
            ));
        }

        let mut r = BinReader::new(&entries);
        let num_blocks = r.get_len(8)?;
        let mut lens = Vec::with_capacity(num_blocks);
        for _ in 0..num_blocks {
            let at = r.position();
            let n = r.get_i64()?;
            if n < 0 {
                return Err(StoreError::corrupt(at, format!("Negative block length {}", n)));
            }
            lens.push(n as usize);
        }

        let mut block_starts = Vec::with_capacity(num_blocks);
        let mut pos = r.position();
        for n in lens {
            block_starts.push(pos);
            pos += n;
        }
        if pos != entries.len() {
            return Err(StoreError::corrupt(
                pos.min(entries.len()),
                format!("Block table covers {} bytes, entries hold {}", pos, entries.len()),
            ));
        }

        Ok(Self {
            length: top.len() / TABLE_ENTRY_SIZE,
            top,
            entries,
            block_starts,
        })
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn top_bytes(&self) -> &Bytes {
        &self.top
    }

    pub fn entries_bytes(&self) -> &Bytes {
        &self.entries
    }

    pub fn entry(&self, i: usize) -> StoreResult<TableEntry> {
        if i >= self.length {
            return Err(StoreError::OutOfBounds {
                index: i as i64,
                length: self.length as i64,
            });
        }
        TableEntry::from_bytes(&self.top[i * TABLE_ENTRY_SIZE..(i + 1) * TABLE_ENTRY_SIZE])
    }

    /// Row `i`'s bytes, sharing the underlying buffer
    pub fn get(&self, i: usize) -> StoreResult<Bytes> {
        let e = self.entry(i)?;
        let start = usize::try_from(e.block)
            .ok()
            .and_then(|b| self.block_starts.get(b))
            .copied()
            .ok_or_else(|| StoreError::corrupt(i * TABLE_ENTRY_SIZE, format!("Unknown block {}", e.block)))?;
        let block_end = self
            .block_starts
            .get(e.block as usize + 1)
            .copied()
            .unwrap_or(self.entries.len());

        if e.offset < 0 || e.len < 0 {
            return Err(StoreError::corrupt(i * TABLE_ENTRY_SIZE, "Negative row offset or length"));
        }
        let lo = start + e.offset as usize;
        let hi = lo + e.len as usize;
        if hi > block_end {
            return Err(StoreError::corrupt(lo, "Row points past end of block"));
        }
        Ok(self.entries.slice(lo..hi))
    }
}

/// Write a checksummed segment file
pub fn write_segment(path: &Path, kind: SegmentKind, payload: &[u8], durable: bool) -> StoreResult<()> {
    write_file(path, &seal_segment(kind, payload), durable)
}

/// Read a segment file and return its payload
pub fn read_segment(path: &Path, kind: SegmentKind, verify: bool) -> StoreResult<Bytes> {
    let data = std::fs::read(path)
        .map_err(|e| StoreError::io_at(path, e, "Failed to read segment"))?;
    let range = open_segment(path, &data, kind, verify)?;
    Ok(Bytes::from(data).slice(range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_across_blocks() {
        let mut b = BlobStoreBuilder::new(3);
        b.extend(4);
        b.put(b"row3", 3, 2).unwrap();
        b.put(b"r0", 0, 0).unwrap();
        b.put(b"row-one", 1, 1).unwrap();
        b.put(b"", 2, 0).unwrap();
        assert_eq!(b.get(1).unwrap(), b"row-one");

        let store = b.freeze();
        assert_eq!(store.len(), 4);
        assert_eq!(&store.get(0).unwrap()[..], b"r0");
        assert_eq!(&store.get(1).unwrap()[..], b"row-one");
        assert_eq!(&store.get(2).unwrap()[..], b"");
        assert_eq!(&store.get(3).unwrap()[..], b"row3");
        assert_eq!(store.entry(3).unwrap(), TableEntry { block: 2, offset: 0, len: 4 });
    }

    #[test]
    fn test_out_of_bounds() {
        let mut b = BlobStoreBuilder::new(1);
        b.extend(1);
        assert!(matches!(b.put(b"x", 1, 0), Err(StoreError::OutOfBounds { index: 1, length: 1 })));
        assert!(matches!(b.put(b"x", 0, 5), Err(StoreError::OutOfBounds { index: 5, .. })));
        let store = b.freeze();
        assert!(matches!(store.get(9), Err(StoreError::OutOfBounds { .. })));
    }

    #[test]
    fn test_concurrent_puts_disjoint_rows() {
        let mut b = BlobStoreBuilder::new(4);
        b.extend(400);
        std::thread::scope(|s| {
            for k in 0..4 {
                let b = &b;
                s.spawn(move || {
                    for i in (k * 100)..((k + 1) * 100) {
                        b.put(&(i as u32).to_le_bytes(), i, k).unwrap();
                    }
                });
            }
        });
        let store = b.freeze();
        for i in 0..400 {
            assert_eq!(&store.get(i).unwrap()[..], &(i as u32).to_le_bytes());
        }
    }

    #[test]
    fn test_from_parts_roundtrip_and_corruption() {
        let mut b = BlobStoreBuilder::new(2);
        b.extend(2);
        b.put(b"alpha", 0, 1).unwrap();
        b.put(b"beta", 1, 0).unwrap();
        let store = b.freeze();

        let rebuilt = BlobStore::from_parts(store.top_bytes().clone(), store.entries_bytes().clone()).unwrap();
        assert_eq!(&rebuilt.get(0).unwrap()[..], b"alpha");
        assert_eq!(&rebuilt.get(1).unwrap()[..], b"beta");

        let short = store.entries_bytes().slice(..store.entries_bytes().len() - 1);
        assert!(BlobStore::from_parts(store.top_bytes().clone(), short).is_err());
        let bad_top = store.top_bytes().slice(..5);
        assert!(BlobStore::from_parts(bad_top, store.entries_bytes().clone()).is_err());
    }

    #[test]
    fn test_segment_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries");
        write_segment(&path, SegmentKind::ColumnEntries, b"blob bytes", false).unwrap();
        let payload = read_segment(&path, SegmentKind::ColumnEntries, true).unwrap();
        assert_eq!(&payload[..], b"blob bytes");

        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 1;
        std::fs::write(&path, raw).unwrap();
        assert!(matches!(
            read_segment(&path, SegmentKind::ColumnEntries, true),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }
}
