//! # pagelens
//!
//! Document corpus ingestion and retrieval-augmented question answering
//! with page-image grounding.
//!
//! Uploaded documents are converted to page-labeled text, tagged with
//! LLM-extracted metadata, embedded, and stored in an embedded vector index
//! next to a SQLite table of document records. Questions go through
//! two-stage retrieval (vector search, then cross-encoder rerank); the
//! source pages behind the best chunks are re-rendered as images and sent
//! with the text context to a multimodal generation model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  Upload  │──▶│  Ingestion   │──▶│ Document Store  │
//! │          │   │ conv+meta+emb│   │ Vector Index    │
//! └──────────┘   └──────────────┘   └───────┬─────────┘
//!                                           │
//! ┌──────────┐   ┌──────────────┐   ┌───────▼─────────┐
//! │  Answer  │◀──│  Grounding   │◀──│ Retrieve+Rerank │
//! └──────────┘   └──────────────┘   └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pagelens init
//! pagelens ingest ./reports/*.pdf
//! pagelens list
//! pagelens ask "summarize the 2025 contract"
//! pagelens delete contract.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Document records and their status machine |
//! | [`extract`] | File → page-labeled text blocks |
//! | [`chunk`] | Splitting oversized blocks |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Generation model providers |
//! | [`metadata`] | LLM metadata extraction |
//! | [`index`] | Process-wide vector index |
//! | [`ingest`] | Ingestion pipeline, upload and removal |
//! | [`rerank`] | Lazily loaded cross-encoder |
//! | [`retrieve`] | Two-stage retrieval |
//! | [`render`] | Page-image grounding |
//! | [`answer`] | Prompt assembly and generation |
//! | [`corpus`] | The owner wiring it all together |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod render;
pub mod rerank;
pub mod retrieve;
pub mod store;

pub use answer::QueryOutcome;
pub use corpus::{Corpus, CorpusParts};
pub use error::{CorpusError, StorageError};
pub use ingest::{BatchSummary, IngestOutcome};
