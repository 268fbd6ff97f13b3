//! Vector stores.
//!
//! Passages, their embeddings and layout geometry are owned by a vector store.
//! Two backends are provided:
//! - `local` (default) - a directory of JSON table files, loaded into memory
//! - `inmemory` - nothing persisted, for tests and throwaway runs

#![allow(missing_docs)]

// Vector store abstraction layer
pub mod vectorstore;

// Provider implementations
pub mod local;

// Re-exports
pub use local::LocalVectorStore;
pub use vectorstore::{
    InMemoryVectorStore, TableInfo, TableStats, VectorStore, VectorStoreProvider,
};
