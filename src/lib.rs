//! docsift - local document indexing with hybrid semantic and fuzzy search.
//!
//! Documents are parsed, split into overlapping sentence-aligned chunks,
//! embedded, and stored in a single [redb](https://github.com/cberner/redb)
//! database holding both the catalog and the vectors. Every index, reindex
//! and delete is one write transaction, so the catalog and the vector index
//! never disagree. Search fuses nearest-neighbour similarity with fuzzy
//! string matching.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docsift::{DataDir, HashEmbedder, IndexConfig, SearchEngine, SearchRequest};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let engine = SearchEngine::new(
//!     data_dir.index_db(),
//!     IndexConfig::default(),
//!     Arc::new(HashEmbedder::default()),
//! );
//! engine.initialize().unwrap();
//!
//! let result = engine.index_document("notes/rust.md".as_ref()).unwrap();
//! assert!(result.success, "{:?}", result.error);
//!
//! for hit in engine.search(&SearchRequest::new("ownership")).unwrap() {
//!     println!("{} ({:.3}): {}", hit.filename, hit.combined_score, hit.content);
//! }
//! ```

pub mod catalog;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fuzzy;
pub mod model_manager;
pub mod parser;
pub mod pipeline;
pub mod search;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use catalog::DocumentCatalog;
pub use config::IndexConfig;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding::{Embedder, HashEmbedder};
pub use engine::{IndexResult, LifecycleState, SearchEngine};
pub use error::{Error, Result};
pub use fuzzy::FuzzyMatcher;
pub use parser::{ParsedDocument, ParserRegistry};
pub use pipeline::CancellationToken;
pub use search::{HybridRetriever, SearchHit, SearchMode, SearchRequest};
pub use vector_index::{ExactVectorIndex, VectorIndex};
