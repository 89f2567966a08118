//! Graph Records
//!
//! Nodes and edges live in an arena owned by the graph store and address
//! each other only by integer id. A node keeps the ids of its incoming and
//! outgoing edges; those lists are maintained by the store whenever an edge
//! is added or removed.
//!
//! # Dump format
//!
//! ```json
//! {"root": "g0",
//!  "nodes": [{"type": "state", "id": 0, "name": "Start", "description": ""}],
//!  "edges": [{"type": "resultsIn", "id": 1, "source": 2, "target": 0}]}
//! ```

use super::action::{ActionAttrs, ActionNode};
use super::object::{ObjectAttrs, ObjectNode};
use super::slide::SlideNode;
use super::state::StateNode;
use super::value::ValueContext;
use serde::{Deserialize, Serialize};

pub type NodeId = u64;
pub type EdgeId = u64;

/// Relationship kinds of the provenance graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// state -> action, action -> action (forked copies), slide -> slide
    Next,
    /// action -> state it produced
    ResultsIn,
    /// action -> object it reads (indexed)
    Requires,
    /// action -> object it creates (indexed)
    Creates,
    /// action -> object it removes
    Removes,
    /// inverse action -> action it undoes
    Inverses,
    /// state -> object alive in it
    ConsistsOf,
    /// slide -> state it presents
    JumpTo,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Next => "next",
            EdgeKind::ResultsIn => "resultsIn",
            EdgeKind::Requires => "requires",
            EdgeKind::Creates => "creates",
            EdgeKind::Removes => "removes",
            EdgeKind::Inverses => "inverses",
            EdgeKind::ConsistsOf => "consistsOf",
            EdgeKind::JumpTo => "jumpTo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Action,
    State,
    Object,
    Story,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Action => "action",
            NodeKind::State => "state",
            NodeKind::Object => "object",
            NodeKind::Story => "story",
        }
    }
}

/// Type-specific payload of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeRecord {
    Action(ActionNode),
    State(StateNode),
    Object(ObjectNode),
    Story(SlideNode),
}

impl NodeRecord {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRecord::Action(_) => NodeKind::Action,
            NodeRecord::State(_) => NodeKind::State,
            NodeRecord::Object(_) => NodeKind::Object,
            NodeRecord::Story(_) => NodeKind::Story,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NodeRecord::Action(a) => &a.meta.name,
            NodeRecord::State(s) => &s.name,
            NodeRecord::Object(o) => &o.name,
            NodeRecord::Story(s) => &s.name,
        }
    }

    fn to_dump(&self) -> RecordDump {
        match self {
            NodeRecord::Action(a) => RecordDump::Action(a.to_attrs()),
            NodeRecord::State(s) => RecordDump::State(s.clone()),
            NodeRecord::Object(o) => RecordDump::Object(o.to_attrs()),
            NodeRecord::Story(s) => RecordDump::Story(s.clone()),
        }
    }

    fn from_dump(dump: RecordDump, context: &ValueContext) -> Self {
        match dump {
            RecordDump::Action(attrs) => NodeRecord::Action(ActionNode::from_attrs(attrs)),
            RecordDump::State(s) => NodeRecord::State(s),
            RecordDump::Object(attrs) => {
                NodeRecord::Object(ObjectNode::from_attrs(attrs, context.clone()))
            }
            RecordDump::Story(s) => NodeRecord::Story(s),
        }
    }
}

/// Arena entry for a node
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,
    pub record: NodeRecord,
    pub(crate) outgoing: Vec<EdgeId>,
    pub(crate) incoming: Vec<EdgeId>,
}

impl GraphNode {
    pub(crate) fn new(id: NodeId, record: NodeRecord) -> Self {
        Self {
            id,
            record,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.record.kind()
    }

    pub fn outgoing(&self) -> &[EdgeId] {
        &self.outgoing
    }

    pub fn incoming(&self) -> &[EdgeId] {
        &self.incoming
    }

    pub fn as_action(&self) -> Option<&ActionNode> {
        match &self.record {
            NodeRecord::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_state(&self) -> Option<&StateNode> {
        match &self.record {
            NodeRecord::State(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectNode> {
        match &self.record {
            NodeRecord::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_slide(&self) -> Option<&SlideNode> {
        match &self.record {
            NodeRecord::Story(s) => Some(s),
            _ => None,
        }
    }

    pub fn persist(&self) -> NodeDump {
        NodeDump {
            id: self.id,
            record: self.record.to_dump(),
        }
    }

    pub(crate) fn restore(dump: NodeDump, context: &ValueContext) -> Self {
        Self::new(dump.id, NodeRecord::from_dump(dump.record, context))
    }
}

/// Arena entry for an edge
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub source: NodeId,
    pub target: NodeId,
    /// Argument position for `requires` and `creates`
    pub index: Option<usize>,
}

impl GraphEdge {
    pub fn persist(&self) -> EdgeDump {
        EdgeDump {
            kind: self.kind,
            id: self.id,
            source: self.source,
            target: self.target,
            index: self.index,
        }
    }

    pub(crate) fn restore(dump: EdgeDump) -> Self {
        Self {
            id: dump.id,
            kind: dump.kind,
            source: dump.source,
            target: dump.target,
            index: dump.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordDump {
    Action(ActionAttrs),
    State(StateNode),
    Object(ObjectAttrs),
    Story(SlideNode),
}

/// Serialized node: `{type, id, ...attrs}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDump {
    pub id: NodeId,
    #[serde(flatten)]
    pub record: RecordDump,
}

/// Serialized edge: `{type, id, source, target, index?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDump {
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDump {
    pub root: String,
    pub nodes: Vec<NodeDump>,
    pub edges: Vec<EdgeDump>,
}

/// Graph dump plus the orchestrator's pointers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceGraphDump {
    #[serde(flatten)]
    pub graph: GraphDump,
    pub act: Option<NodeId>,
    pub last_action: Option<NodeId>,
}
