//! # mailrag
//!
//! Local retrieval over exported email.
//!
//! The `mailrag` app wires the pipeline in [`mailrag_core`] (normalization,
//! chunking, indexing, ranking) to its concrete backends: a SQLite message
//! store, OpenAI or Ollama embeddings, and a Qdrant collection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ Mail export │──▶│ Normalizer │──▶│  SQLite  │
//! │   (JSON)    │   └────────────┘   │  emails  │
//! └─────────────┘                    └────┬─────┘
//!                                         │ mailrag index
//!                                         ▼
//!                  ┌──────────┐     ┌──────────┐
//!   mailrag search │Retriever │◀───▶│  Qdrant  │
//!                  └──────────┘     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mailrag init                   # create database
//! mailrag sync                   # import exported messages
//! mailrag index                  # embed and upsert into Qdrant
//! mailrag search "invoice from march"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`messages`] | Relational message store |
//! | [`connector_fs`] | Mail export connector |
//! | [`ingest`] | Sync pipeline |
//! | [`embedding`] | OpenAI / Ollama embedding providers |
//! | [`qdrant`] | Qdrant vector store |
//! | [`index_cmd`] | Vector indexing command |
//! | [`search`] | Semantic search command |
//! | [`show`] | List, show, parse and delete commands |
//! | [`stats`] | Database and collection overview |

pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod index_cmd;
pub mod ingest;
pub mod logging;
pub mod messages;
pub mod migrate;
pub mod qdrant;
pub mod search;
pub mod show;
pub mod stats;
