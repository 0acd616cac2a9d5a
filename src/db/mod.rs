//! Storage adapters: metadata store, vector index, blob store.

/// Blob store trait and backends.
pub mod blob;
/// Typed libsql metadata store.
pub mod meta;
/// Qdrant vector index backend.
#[cfg(feature = "qdrant")]
pub mod qdrant;
/// Vector index trait and in-memory backend.
pub mod vectorstore;

pub use blob::{BlobStore, FsBlobStore, InMemoryBlobStore, StoredBlob};
pub use meta::MetaStore;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorIndex;
pub use vectorstore::{
    InMemoryVectorIndex, PassagePayload, PassagePoint, ScoredPassage, SearchFilter, VectorIndex,
};
