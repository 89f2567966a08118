//! Graph Store Layer
//!
//! The in-memory arena (`GraphBase`) plus the backends that make its
//! mutations durable:
//!
//! - `MemoryBackend` - nothing is persisted
//! - `LocalStorageBackend` - synchronous write-through into key-value storage
//! - `RemoteStoreBackend` - batched, debounced writes over a remote transport
//!
//! Backends implement the `GraphBackend` trait and are chosen when a store
//! is constructed.

mod backend;
mod error;
mod events;
mod graph_base;
mod http_remote;
mod local_store;
mod memory_store;
mod remote_store;
mod storage;
mod sync;
mod transport;

pub use backend::{BackendKind, GraphBackend, Mutation};
pub use error::{BackendSyncError, GraphError, RestoreError, Result as GraphResult, TransportError};
pub use events::{EventBus, ProvenanceEvent, SelectOperation, EVENT_CHANNEL_CAPACITY};
pub use graph_base::{Checkpoint, GraphBase, MigratedGraph};
pub use http_remote::{BatchRequest, HttpRemote, ImportRequest, RemoveResponse};
pub use local_store::LocalStorageBackend;
pub use memory_store::MemoryBackend;
pub use remote_store::{RejectedBatch, RemoteStoreBackend};
pub use storage::{read_json, write_json, FileStorage, KeyValueStorage, MemoryStorage};
pub use sync::{SyncHandle, SyncResult, SyncTicket};
pub use transport::{InMemoryRemote, RemoteCatalog, RemoteGraph, RemoteTransport, UploadRequest};
