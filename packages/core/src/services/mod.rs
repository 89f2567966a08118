//! Provenance Services
//!
//! The orchestration layer on top of the graph store:
//!
//! - `ProvenanceGraph` - records and executes actions, undo, jumps and forks
//! - `CommandRegistry` - function id to command lookup
//! - narrative builders over slides and stories
//! - graph managers listing, opening and creating stored graphs
//! - `LruDatasetCache` - shared datasets for object values
//!
//! Services coordinate between the store layer and the application's
//! commands; they never touch a backend directly.

pub mod commands;
pub mod dataset_cache;
pub mod error;
pub mod graph_manager;
pub mod narrative;
pub mod navigation;
pub mod provenance_graph;

pub use commands::{
    ActionSpec, CmdContext, CmdResult, CommandEntry, CommandFn, CommandFuture, CommandRegistry,
    InverseCreator, InverseInput, ObjectRef,
};
pub use dataset_cache::{DatasetLoader, LruDatasetCache};
pub use error::{CommandError, GraphManagerError, ProvenanceError};
pub use graph_manager::{
    open_manager, LocalStorageGraphManager, ManagerResult, MixedStorageGraphManager,
    ProvenanceGraphManager, RemoteStorageGraphManager,
};
pub use narrative::{DEFAULT_TEXT_SLIDE_TITLE, STORY_END_TITLE, STORY_START_TITLE};
pub use provenance_graph::{
    ActionOutcome, GraphEnvironment, GraphSnapshot, MigrationUpload, ProvenanceGraph,
    ProvenanceResult, PushHandle, DEFAULT_SELECTION, START_STATE_NAME,
};
