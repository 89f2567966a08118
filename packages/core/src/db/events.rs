//! Provenance Events
//!
//! Events emitted by the graph store and the provenance orchestrator when
//! the graph changes. They are sent through a tokio broadcast channel so that
//! any number of observers (a UI, a logger, a sync indicator) can follow the
//! graph without coupling to the store.
//!
//! # Event Flow
//!
//! 1. The store or the orchestrator performs a mutation
//! 2. The matching event is sent on the broadcast channel
//! 3. Subscribers receive it asynchronously; sending never blocks and a graph
//!    without subscribers simply drops its events

use crate::models::{EdgeId, EdgeKind, NodeId, NodeKind};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of a graph's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a selection call changes the current selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectOperation {
    #[default]
    Set,
    Add,
    Remove,
    Toggle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    NodeAdded { id: NodeId, kind: NodeKind },
    NodeUpdated { id: NodeId },
    NodeRemoved { id: NodeId },
    EdgeAdded {
        id: EdgeId,
        kind: EdgeKind,
        source: NodeId,
        target: NodeId,
    },
    EdgeUpdated { id: EdgeId },
    EdgeRemoved { id: EdgeId },

    /// A command function is about to run
    Execute { action: Option<NodeId>, function_id: String },
    /// A command function finished and its records are in place
    Executed { action: NodeId, state: NodeId },
    AddObject { id: NodeId },
    AddState { id: NodeId },
    SwitchState { from: NodeId, to: NodeId },
    SwitchAction { from: Option<NodeId>, to: Option<NodeId> },
    RunChain { actions: Vec<NodeId> },
    RanChain { state: NodeId },
    ForkedBranch { action: NodeId, target: NodeId },
    Clear,

    AddSlide { id: NodeId },
    MoveSlide { id: NodeId, to: NodeId, before: bool },
    RemoveSlide { id: NodeId },
    ExtractSlide { id: NodeId },
    StartNewSlide { id: NodeId },
    SetJumpTarget {
        slide: NodeId,
        old: Option<NodeId>,
        new: Option<NodeId>,
    },

    SelectState {
        selection: String,
        operation: SelectOperation,
        id: Option<NodeId>,
    },
    SelectAction {
        selection: String,
        operation: SelectOperation,
        id: Option<NodeId>,
    },
    SelectSlide {
        selection: String,
        operation: SelectOperation,
        id: Option<NodeId>,
    },

    /// The backend started sending a batch
    SyncStarted { graph_id: String, batch_len: usize },
    /// The backend finished sending a batch
    SyncFinished {
        graph_id: String,
        batch_len: usize,
        ok: bool,
    },
}

impl ProvenanceEvent {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ProvenanceEvent::NodeAdded { .. } => "add_node",
            ProvenanceEvent::NodeUpdated { .. } => "update_node",
            ProvenanceEvent::NodeRemoved { .. } => "remove_node",
            ProvenanceEvent::EdgeAdded { .. } => "add_edge",
            ProvenanceEvent::EdgeUpdated { .. } => "update_edge",
            ProvenanceEvent::EdgeRemoved { .. } => "remove_edge",
            ProvenanceEvent::Execute { .. } => "execute",
            ProvenanceEvent::Executed { .. } => "executed",
            ProvenanceEvent::AddObject { .. } => "add_object",
            ProvenanceEvent::AddState { .. } => "add_state",
            ProvenanceEvent::SwitchState { .. } => "switch_state",
            ProvenanceEvent::SwitchAction { .. } => "switch_action",
            ProvenanceEvent::RunChain { .. } => "run_chain",
            ProvenanceEvent::RanChain { .. } => "ran_chain",
            ProvenanceEvent::ForkedBranch { .. } => "forked_branch",
            ProvenanceEvent::Clear => "clear",
            ProvenanceEvent::AddSlide { .. } => "add_slide",
            ProvenanceEvent::MoveSlide { .. } => "move_slide",
            ProvenanceEvent::RemoveSlide { .. } => "remove_slide",
            ProvenanceEvent::ExtractSlide { .. } => "extract_slide",
            ProvenanceEvent::StartNewSlide { .. } => "start_new_slide",
            ProvenanceEvent::SetJumpTarget { .. } => "set_jump_target",
            ProvenanceEvent::SelectState { .. } => "select_state",
            ProvenanceEvent::SelectAction { .. } => "select_action",
            ProvenanceEvent::SelectSlide { .. } => "select_slide",
            ProvenanceEvent::SyncStarted { .. } => "sync_started",
            ProvenanceEvent::SyncFinished { .. } => "sync_finished",
        }
    }
}

/// Sending half of a graph's event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProvenanceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProvenanceEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProvenanceEvent) {
        tracing::trace!("provenance event: {}", event.event_type());
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names() {
        assert_eq!(ProvenanceEvent::Clear.event_type(), "clear");
        assert_eq!(
            ProvenanceEvent::SwitchState { from: 0, to: 2 }.event_type(),
            "switch_state"
        );
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(ProvenanceEvent::EdgeAdded {
            id: 1,
            kind: EdgeKind::ResultsIn,
            source: 2,
            target: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "edge_added");
        assert_eq!(json["kind"], "resultsIn");
    }

    #[tokio::test]
    async fn emit_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(ProvenanceEvent::AddState { id: 5 });
        assert_eq!(rx.recv().await.unwrap(), ProvenanceEvent::AddState { id: 5 });
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        EventBus::new().emit(ProvenanceEvent::Clear);
    }
}
