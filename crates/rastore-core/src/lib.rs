//! RaStore Core: random-access value and column storage
//!
//! A structurally typed value model (n-d vectors, records, tagged unions,
//! columns, references, lazy thunks, hash indices) backed by immutable,
//! random-access columns and a parallel hash-indexing engine.
//!
//! # Architecture
//!
//! - **Types**: immutable structural types with a subtyping relation
//! - **Columns**: built in parallel per-worker segments, then frozen into
//!   a row table plus shared entry bytes with O(1) row access
//! - **Identity**: every column gets a stable id; saved graphs are
//!   reopened lazily and keep pointer identity per id
//! - **Indexing**: group-by over one or more key columns, sharded by
//!   128-bit hash across workers, memoized by structural hash
//! - **Persistence**: a directory of CRC32C-checked segment files
//!
//! All state lives in an [`Engine`]; there are no process-wide globals.

pub mod codec;
pub mod column;
pub mod config;
pub mod display;
pub mod durable;
pub mod engine;
pub mod error;
pub mod format;
pub mod hashmap;
pub mod index;
pub mod persist;
pub mod pool;
pub mod registry;
pub mod segment;
pub mod types;
pub mod value;

// Re-export key types for convenience
pub use column::{Column, ColumnBuilder, TableBuilder};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{StoreError, StoreResult};
pub use index::{IndexCache, IndexData};
pub use registry::{RefContext, Registry, Url};
pub use types::{assert_type_valid, type_valid, Dtype, IndexMode, TypeRef, TypeTag, ValueType};
pub use value::{LazyQuery, NdVector, RawScalar, RefKind, Value, ValueKind, ValueWhich};
