//! Trailgraph Core
//!
//! Provenance tracking for interactive applications: every command an
//! application runs is recorded as an action in a graph of states, actions
//! and objects, which can then be undone, replayed, forked and presented as
//! stories.
//!
//! # Architecture
//!
//! - **Arena graph**: nodes and edges live in memory keyed by numeric ids;
//!   the arena is the source of truth for reads
//! - **Pluggable persistence**: every mutation is mirrored to a backend
//!   (memory, local key-value storage, batched remote)
//! - **Serialized execution**: commands run one at a time, in submission
//!   order, through a job queue
//!
//! # Modules
//!
//! - [`models`] - Records (actions, states, objects, slides), dumps, descriptions
//! - [`db`] - Graph store and backends
//! - [`services`] - Orchestrator, command registry, narrative, graph managers
//! - [`config`] - Configuration and environment overrides

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::{BackendConfig, ConfigError, ProvenanceConfig, RemoteSyncConfig, StorageConfig};
pub use db::{GraphBase, GraphError, ProvenanceEvent, SelectOperation};
pub use models::*;
pub use services::*;
