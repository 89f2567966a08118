//! Data Models
//!
//! Records stored in a provenance graph:
//!
//! - `ActionNode` - an executed command with its parameter and metadata
//! - `StateNode` - an application state produced by an action
//! - `ObjectNode` - a reference to an application value
//! - `SlideNode` - a narrative node presenting a state
//!
//! plus the arena primitives (`GraphNode`, `GraphEdge`), their serialized
//! dumps, and graph descriptions used by graph managers.

mod action;
mod desc;
mod graph;
mod object;
mod slide;
mod state;
mod value;

pub use action::{ActionAttrs, ActionMeta, ActionNode, ActionOperation, ObjectCategory};
pub use desc::{
    DescPatch, GraphAttrs, GraphDesc, DEFAULT_PERMISSIONS, PERMISSION_EXECUTE, PERMISSION_READ,
    PERMISSION_WRITE, PROVENANCE_GRAPH_TYPE,
};
pub use graph::{
    EdgeDump, EdgeId, EdgeKind, GraphDump, GraphEdge, GraphNode, NodeDump, NodeId, NodeKind,
    NodeRecord, ProvenanceGraphDump, RecordDump,
};
pub use object::{default_hash, ObjectAttrs, ObjectNode, ObjectProxy};
pub use slide::{
    Annotation, AnnotationKind, SlideNode, DEFAULT_SLIDE_DURATION, DEFAULT_SLIDE_TRANSITION,
};
pub use state::StateNode;
pub use value::{
    Dataset, DatasetCache, DatasetError, Element, ElementRegistry, MemoryElementRegistry, Payload,
    PersistedValue, Primitive, ValueContext, ValueSlot,
};
