//! Incremental source-tree indexing with structural chunking and hybrid retrieval.
//!
//! Files are split into chunks along tree-sitter node boundaries, deduplicated
//! by content hash, embedded in batches and stored as vectors. A `SQLite`
//! snapshot records what was indexed so the next run only touches changed
//! files. Queries fuse a BM25 term index with vector similarity using
//! Reciprocal Rank Fusion.

pub mod catalog;
pub mod chunker;
pub mod classify;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod languages;
pub mod lexical;
pub mod pipeline;
pub mod retriever;
pub mod snapshot;
pub mod store;
pub mod walker;

pub use error::{IndexError, Result};
