//! Provenance Orchestrator
//!
//! `ProvenanceGraph` records what an application did as a graph of states,
//! actions and objects, and lets the application move through that history:
//!
//! - `push` runs a registered command and records it as a new action
//! - `undo` runs the inverse of the last action
//! - `jump_to` reverts and replays actions until a given state is current
//! - `fork` copies a branch of actions onto another state
//!
//! # Execution Model
//!
//! Operations that execute commands go through one job queue, drained by a
//! worker task. Jobs run strictly in submission order and each job finishes
//! (command run, records written) before the next one starts. Callers get a
//! [`PushHandle`] that resolves with the job's result.
//!
//! Records are only written after the command returned successfully, so a
//! failing command leaves the graph untouched.
//!
//! # Idempotence Window
//!
//! With `execute_current_action_within` configured, a push identical to the
//! previous one (same function, parameter and inputs) submitted within the
//! window returns the previous outcome instead of running again.

use super::commands::{
    ActionSpec, CmdContext, CmdResult, CommandEntry, CommandRegistry, InverseCreator,
    InverseInput, ObjectRef,
};
use super::error::ProvenanceError;
use super::navigation as nav;
use crate::config::ProvenanceConfig;
use crate::db::{
    BackendKind, EventBus, GraphBackend, GraphBase, GraphResult, ProvenanceEvent,
    SelectOperation, SyncHandle, TransportError,
};
use crate::models::{
    ActionNode, EdgeKind, GraphDesc, GraphDump, GraphNode, NodeId, NodeKind, NodeRecord,
    ObjectNode, ObjectProxy, Payload, ProvenanceGraphDump, StateNode, ValueContext,
};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

pub type ProvenanceResult<T> = std::result::Result<T, ProvenanceError>;

/// Name of the root state of a new or cleared graph
pub const START_STATE_NAME: &str = "Start";

/// Selection used when callers don't name one
pub const DEFAULT_SELECTION: &str = "selected";

/// What a graph needs from the application
#[derive(Clone)]
pub struct GraphEnvironment {
    pub registry: Arc<CommandRegistry>,
    pub values: ValueContext,
    /// Idempotence window for repeated pushes
    pub execute_current_action_within: Option<Duration>,
}

impl GraphEnvironment {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self {
            registry,
            values: ValueContext::new(),
            execute_current_action_within: None,
        }
    }

    pub fn from_config(
        config: &ProvenanceConfig,
        registry: Arc<CommandRegistry>,
        values: ValueContext,
    ) -> Self {
        Self {
            registry,
            values,
            execute_current_action_within: config.execute_current_action_within(),
        }
    }

    pub fn with_values(mut self, values: ValueContext) -> Self {
        self.values = values;
        self
    }

    pub fn with_idempotence_window(mut self, window: Option<Duration>) -> Self {
        self.execute_current_action_within = window;
        self
    }
}

impl fmt::Debug for GraphEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEnvironment")
            .field("registry", &self.registry)
            .field("values", &self.values)
            .field(
                "execute_current_action_within",
                &self.execute_current_action_within,
            )
            .finish()
    }
}

/// Result of executing an action
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: NodeId,
    /// The state the action resulted in, now current
    pub state: NodeId,
    pub created: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// Time the command took
    pub consumed: Duration,
    /// True if this push was answered from the idempotence window
    pub deduplicated: bool,
    /// Resolves once the backend acknowledged the records
    pub sync: SyncHandle,
}

/// A graph's description and content at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct GraphSnapshot {
    pub desc: GraphDesc,
    pub dump: ProvenanceGraphDump,
}

type Reply<T> = oneshot::Sender<ProvenanceResult<T>>;

/// Uploads a graph's content to its new home and hands back the uploaded
/// graph's description with a backend writing to it
pub type MigrationUpload = Box<
    dyn FnOnce(GraphDump) -> BoxFuture<'static, Result<(GraphDesc, Arc<dyn GraphBackend>), TransportError>>
        + Send,
>;

enum Job {
    Push {
        spec: ActionSpec,
        submitted: Instant,
        reply: Reply<ActionOutcome>,
    },
    Record {
        spec: ActionSpec,
        result: CmdResult,
        reply: Reply<ActionOutcome>,
    },
    Undo {
        reply: Reply<Option<ActionOutcome>>,
    },
    JumpTo {
        state: NodeId,
        within: Option<Duration>,
        reply: Reply<Vec<ActionOutcome>>,
    },
    Fork {
        action: NodeId,
        target: NodeId,
        replacements: Vec<(NodeId, ObjectRef)>,
        reply: Reply<bool>,
    },
    Clear {
        reply: Reply<()>,
    },
    Migrate {
        upload: MigrationUpload,
        reply: Reply<GraphDesc>,
    },
}

/// Pending result of a queued job
///
/// The job runs whether or not the handle is awaited.
#[must_use = "the job is queued regardless; await the handle for its result"]
pub struct PushHandle<T> {
    rx: oneshot::Receiver<ProvenanceResult<T>>,
}

impl<T> Future for PushHandle<T> {
    type Output = ProvenanceResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProvenanceError::WorkerStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PushHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushHandle").finish_non_exhaustive()
    }
}

struct LastPush {
    fingerprint: String,
    submitted: Instant,
    outcome: ActionOutcome,
}

/// An input resolved against the graph; `id` is None for objects that get
/// registered only once the command succeeded
struct ResolvedInput {
    id: Option<NodeId>,
    object: ObjectNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SelectionTarget {
    State,
    Action,
    Slide,
}

/// Named selections of states, actions and slides
#[derive(Debug, Default)]
pub(crate) struct Selections {
    sets: HashMap<(SelectionTarget, String), Vec<NodeId>>,
}

impl Selections {
    pub(crate) fn apply(
        &mut self,
        target: SelectionTarget,
        selection: &str,
        operation: SelectOperation,
        id: Option<NodeId>,
    ) {
        let ids = self
            .sets
            .entry((target, selection.to_string()))
            .or_default();
        match (operation, id) {
            (SelectOperation::Set, id) => {
                ids.clear();
                ids.extend(id);
            }
            (SelectOperation::Add, Some(id)) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            (SelectOperation::Remove, Some(id)) => ids.retain(|x| *x != id),
            (SelectOperation::Toggle, Some(id)) => {
                if ids.contains(&id) {
                    ids.retain(|x| *x != id);
                } else {
                    ids.push(id);
                }
            }
            (_, None) => {}
        }
    }

    pub(crate) fn get(&self, target: SelectionTarget, selection: &str) -> Vec<NodeId> {
        self.sets
            .get(&(target, selection.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Drops a removed node from every selection
    pub(crate) fn forget(&mut self, id: NodeId) {
        for ids in self.sets.values_mut() {
            ids.retain(|x| *x != id);
        }
    }
}

/// Everything behind the graph's lock
pub(crate) struct ProvenanceState {
    pub(crate) store: GraphBase,
    pub(crate) env: GraphEnvironment,
    pub(crate) act: NodeId,
    pub(crate) last_action: Option<NodeId>,
    pub(crate) selections: Selections,
    inverters: HashMap<NodeId, Arc<dyn InverseCreator>>,
    last_push: Option<LastPush>,
}

impl ProvenanceState {
    pub(crate) fn emit(&self, event: ProvenanceEvent) {
        self.store.events().emit(event);
    }

    pub(crate) fn ids_of(&self, kind: NodeKind) -> Vec<NodeId> {
        self.store
            .nodes()
            .filter(|n| n.kind() == kind)
            .map(|n| n.id)
            .collect()
    }

    pub(crate) fn action(&self, id: NodeId) -> ProvenanceResult<&ActionNode> {
        self.store
            .node(id)
            .and_then(GraphNode::as_action)
            .ok_or(ProvenanceError::UnknownAction(id))
    }

    pub(crate) fn object(&self, id: NodeId) -> ProvenanceResult<&ObjectNode> {
        self.store
            .node(id)
            .and_then(GraphNode::as_object)
            .ok_or(ProvenanceError::UnknownObject(id))
    }

    pub(crate) fn ensure_state(&self, id: NodeId) -> ProvenanceResult<()> {
        if nav::is_kind(&self.store, id, NodeKind::State) {
            Ok(())
        } else {
            Err(ProvenanceError::UnknownState(id))
        }
    }

    fn dim(&self) -> [usize; 4] {
        let mut dim = [0; 4];
        for node in self.store.nodes() {
            let slot = match node.kind() {
                NodeKind::Action => 0,
                NodeKind::Object => 1,
                NodeKind::State => 2,
                NodeKind::Story => 3,
            };
            dim[slot] += 1;
        }
        dim
    }

    fn persist(&self) -> ProvenanceGraphDump {
        ProvenanceGraphDump {
            graph: self.store.persist(),
            act: Some(self.act),
            last_action: self.last_action,
        }
    }

    pub(crate) fn switch_to(&mut self, action: Option<NodeId>, state: NodeId) {
        let (from_state, from_action) = (self.act, self.last_action);
        self.act = state;
        if action.is_some() {
            self.last_action = action;
        }
        if from_state != state {
            self.emit(ProvenanceEvent::SwitchState {
                from: from_state,
                to: state,
            });
        }
        if from_action != self.last_action {
            self.emit(ProvenanceEvent::SwitchAction {
                from: from_action,
                to: self.last_action,
            });
        }
    }

    // -- objects --

    fn find_object_by_value(&self, payload: &Payload) -> Option<NodeId> {
        self.store.nodes().find_map(|node| {
            let object = node.as_object()?;
            let held = match object.live_value() {
                Some(v) => v.same_as(payload),
                // primitives restored from a dump compare by value
                None => matches!(payload, Payload::Primitive(_))
                    && object.value().map(|v| v.same_as(payload)).unwrap_or(false),
            };
            held.then_some(node.id)
        })
    }

    /// Finds the object a proxy refers to
    ///
    /// Matches by value first, then by name, category and hash among objects
    /// without a live value; such a match gets the proxy's value re-attached.
    fn find_proxy(&self, proxy: &ObjectProxy) -> Option<NodeId> {
        if let Some(value) = &proxy.value {
            if let Some(id) = self.find_object_by_value(value) {
                return Some(id);
            }
        }
        let hash = proxy.effective_hash();
        let (id, object) = self.store.nodes().find_map(|node| {
            let object = node.as_object()?;
            let matches = object.name == proxy.name
                && object.category == proxy.category
                && object.hash == hash
                && object.live_value().is_none();
            matches.then_some((node.id, object))
        })?;
        if let Some(value) = &proxy.value {
            tracing::debug!("Re-attached value to object {} ('{}')", id, object.name);
            object.set_value(Some(value.clone()));
        }
        Some(id)
    }

    fn add_just_object(&mut self, object: ObjectNode) -> ProvenanceResult<NodeId> {
        let id = self.store.add_node(NodeRecord::Object(object))?;
        self.emit(ProvenanceEvent::AddObject { id });
        Ok(id)
    }

    pub(crate) fn find_or_add_just_object(&mut self, reference: ObjectRef) -> ProvenanceResult<NodeId> {
        match reference {
            ObjectRef::Node(id) => self.object(id).map(|_| id),
            ObjectRef::Proxy(proxy) => match self.find_proxy(&proxy) {
                Some(id) => Ok(id),
                None => {
                    let object = ObjectNode::from_proxy(&proxy, self.env.values.clone());
                    self.add_just_object(object)
                }
            },
        }
    }

    /// Registers an object and makes it part of the current state
    fn add_object(&mut self, reference: ObjectRef) -> ProvenanceResult<NodeId> {
        let id = self.find_or_add_just_object(reference)?;
        if !nav::consists_of(&self.store, self.act).contains(&id) {
            self.store.add_edge(self.act, EdgeKind::ConsistsOf, id)?;
        }
        Ok(id)
    }

    /// Sets an object's value and writes the object through
    fn set_object_value(&mut self, id: NodeId, payload: Option<Payload>) -> GraphResult<()> {
        if let Some(object) = self.store.node(id).and_then(GraphNode::as_object) {
            object.set_value(payload);
        }
        // the record shares the value slot; rewriting it persists the new value
        self.store.update_node(id, |_| {})
    }

    fn resolve_inputs(&self, refs: &[ObjectRef]) -> ProvenanceResult<Vec<ResolvedInput>> {
        refs.iter()
            .map(|reference| -> ProvenanceResult<ResolvedInput> {
                match reference {
                ObjectRef::Node(id) => Ok(ResolvedInput {
                    id: Some(*id),
                    object: self.object(*id)?.clone(),
                }),
                ObjectRef::Proxy(proxy) => Ok(match self.find_proxy(proxy) {
                    Some(id) => ResolvedInput {
                        id: Some(id),
                        object: self.object(id)?.clone(),
                    },
                    None => ResolvedInput {
                        id: None,
                        object: ObjectNode::from_proxy(proxy, self.env.values.clone()),
                    },
                }),
                }
            })
            .collect()
    }

    fn register_inputs(&mut self, inputs: Vec<ResolvedInput>) -> ProvenanceResult<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(inputs.len());
        for input in inputs {
            let id = match input.id {
                Some(id) => id,
                None => self.add_just_object(input.object)?,
            };
            ids.push(id);
        }
        Ok(ids)
    }

    // -- recording --

    /// Writes the records of a successful command execution
    ///
    /// Either every record is written or, when the backend refuses one, the
    /// records written so far are rolled back and the graph is unchanged.
    fn record_action(
        &mut self,
        spec: ActionSpec,
        inputs: Vec<ResolvedInput>,
        result: CmdResult,
        fallback_inverse: Option<Arc<dyn InverseCreator>>,
        consumed: Duration,
    ) -> ProvenanceResult<ActionOutcome> {
        let mark = self.store.checkpoint();
        let written = self.write_action(spec, inputs, result.created, result.removed);
        let (action, state, created_ids, removed_ids) = match written {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Recording action failed, rolling back: {}", e);
                self.store.rollback(mark);
                return Err(e);
            }
        };
        self.free_values(&removed_ids);
        self.emit(ProvenanceEvent::AddState { id: state });

        if let Some(creator) = result.inverse.or(fallback_inverse) {
            self.attach_inverse(action, creator);
        }

        self.switch_to(Some(action), state);
        self.emit(ProvenanceEvent::Executed { action, state });
        Ok(ActionOutcome {
            action,
            state,
            created: created_ids,
            removed: removed_ids,
            consumed,
            deduplicated: false,
            sync: self.store.take_sync(),
        })
    }

    fn write_action(
        &mut self,
        spec: ActionSpec,
        inputs: Vec<ResolvedInput>,
        created: Vec<ObjectProxy>,
        removed: Vec<usize>,
    ) -> ProvenanceResult<(NodeId, NodeId, Vec<NodeId>, Vec<NodeId>)> {
        let input_ids = self.register_inputs(inputs)?;
        let ActionSpec {
            meta,
            function_id,
            parameter,
            ..
        } = spec;
        let state_name = meta.name.clone();
        let previous = self.act;

        let action = self.store.add_node(NodeRecord::Action(ActionNode::new(
            meta,
            function_id,
            parameter,
        )))?;
        for (index, id) in input_ids.iter().enumerate() {
            self.store
                .add_indexed_edge(action, EdgeKind::Requires, *id, index)?;
        }
        self.store.add_edge(previous, EdgeKind::Next, action)?;
        let state = self
            .store
            .add_node(NodeRecord::State(StateNode::new(state_name)))?;
        self.store.add_edge(action, EdgeKind::ResultsIn, state)?;

        let (created_ids, removed_ids) =
            self.link_outputs(action, previous, state, &input_ids, created, removed)?;
        Ok((action, state, created_ids, removed_ids))
    }

    /// Links what an action created and removed on its first execution, and
    /// the objects its resulting state consists of
    fn link_outputs(
        &mut self,
        action: NodeId,
        previous: NodeId,
        state: NodeId,
        input_ids: &[NodeId],
        created: Vec<ObjectProxy>,
        removed: Vec<usize>,
    ) -> ProvenanceResult<(Vec<NodeId>, Vec<NodeId>)> {
        let mut created_ids = Vec::with_capacity(created.len());
        for (index, proxy) in created.into_iter().enumerate() {
            let id = self.find_or_add_just_object(ObjectRef::Proxy(proxy))?;
            self.store
                .add_indexed_edge(action, EdgeKind::Creates, id, index)?;
            created_ids.push(id);
        }

        let mut removed_ids = Vec::with_capacity(removed.len());
        for position in removed {
            let Some(&id) = input_ids.get(position) else {
                tracing::warn!(
                    "Action {} reported removed input {} but has {} inputs",
                    action,
                    position,
                    input_ids.len()
                );
                continue;
            };
            self.store.add_edge(action, EdgeKind::Removes, id)?;
            removed_ids.push(id);
        }

        if nav::consists_of(&self.store, state).is_empty() {
            let mut objects = nav::consists_of(&self.store, previous);
            objects.retain(|id| !removed_ids.contains(id));
            for id in &created_ids {
                if !objects.contains(id) {
                    objects.push(*id);
                }
            }
            for id in objects {
                self.store.add_edge(state, EdgeKind::ConsistsOf, id)?;
            }
        }
        Ok((created_ids, removed_ids))
    }

    /// Drops the values of removed objects
    ///
    /// Runs once the records are in place; a failed write of the emptied
    /// value only leaves the old value in the backend.
    fn free_values(&mut self, removed: &[NodeId]) {
        for id in removed {
            if let Err(e) = self.set_object_value(*id, None) {
                tracing::warn!("Failed to write freed value of object {}: {}", id, e);
            }
        }
    }

    /// Updates records after an existing action ran again
    fn apply_rerun(
        &mut self,
        action: NodeId,
        result: CmdResult,
        fallback_inverse: Option<Arc<dyn InverseCreator>>,
        consumed: Duration,
    ) -> ProvenanceResult<ActionOutcome> {
        if !self.action(action)?.once_executed {
            return self.apply_first_run(action, result, fallback_inverse, consumed);
        }
        let state = nav::results_in(&self.store, action).ok_or(ProvenanceError::UnknownAction(action))?;
        let CmdResult {
            created, removed, inverse, ..
        } = result;

        let created_ids = nav::creates(&self.store, action);
        for (index, proxy) in created.into_iter().enumerate() {
            match created_ids.get(index) {
                Some(&id) => self.set_object_value(id, proxy.value)?,
                None => tracing::warn!(
                    "Action {} created more objects than on its first run; extra output {} ignored",
                    action,
                    index
                ),
            }
        }

        let input_ids = nav::requires(&self.store, action);
        let mut removed_ids = Vec::with_capacity(removed.len());
        for position in removed {
            if let Some(&id) = input_ids.get(position) {
                self.set_object_value(id, None)?;
                removed_ids.push(id);
            }
        }

        if let Some(creator) = inverse {
            self.refresh_inverse(action, creator);
        }

        self.switch_to(Some(action), state);
        self.emit(ProvenanceEvent::Executed { action, state });
        Ok(ActionOutcome {
            action,
            state,
            created: created_ids,
            removed: removed_ids,
            consumed,
            deduplicated: false,
            sync: self.store.take_sync(),
        })
    }

    /// First execution of an action copied by a fork: its outputs get linked
    /// the way a pushed action's are
    fn apply_first_run(
        &mut self,
        action: NodeId,
        result: CmdResult,
        fallback_inverse: Option<Arc<dyn InverseCreator>>,
        consumed: Duration,
    ) -> ProvenanceResult<ActionOutcome> {
        let state = nav::results_in(&self.store, action).ok_or(ProvenanceError::UnknownAction(action))?;
        let previous = nav::previous(&self.store, action).unwrap_or(self.act);
        let input_ids = nav::requires(&self.store, action);
        let CmdResult {
            created, removed, inverse, ..
        } = result;

        let mark = self.store.checkpoint();
        let linked = self
            .link_outputs(action, previous, state, &input_ids, created, removed)
            .and_then(|linked| {
                self.store.update_node(action, |record| {
                    if let NodeRecord::Action(a) = record {
                        a.once_executed = true;
                    }
                })?;
                Ok(linked)
            });
        let (created_ids, removed_ids) = match linked {
            Ok(linked) => linked,
            Err(e) => {
                tracing::warn!("Linking outputs of action {} failed, rolling back: {}", action, e);
                self.store.rollback(mark);
                return Err(e);
            }
        };
        self.free_values(&removed_ids);
        tracing::debug!(
            "Action {} ran for the first time: {} created, {} removed",
            action,
            created_ids.len(),
            removed_ids.len()
        );

        if let Some(creator) = inverse.or(fallback_inverse) {
            self.attach_inverse(action, creator);
        }

        self.switch_to(Some(action), state);
        self.emit(ProvenanceEvent::Executed { action, state });
        Ok(ActionOutcome {
            action,
            state,
            created: created_ids,
            removed: removed_ids,
            consumed,
            deduplicated: false,
            sync: self.store.take_sync(),
        })
    }

    // -- inverses --

    fn inverse_spec(&self, action: NodeId, creator: &dyn InverseCreator) -> ProvenanceResult<ActionSpec> {
        let node = self.action(action)?;
        let inputs = nav::requires(&self.store, action);
        let created = nav::creates(&self.store, action);
        let removed = nav::removes(&self.store, action);
        creator
            .create_inverse(InverseInput {
                action,
                inputs: &inputs,
                parameter: &node.parameter,
                created: &created,
                removed: &removed,
            })
            .map_err(|e| ProvenanceError::command_execution(node.function_id.clone(), e))
    }

    /// Creates and links the inverse of `action`
    ///
    /// The inverse runs from the state `action` resulted in back to the state
    /// it started from, creating what `action` removed and removing what it
    /// created.
    fn create_inverse(&mut self, action: NodeId, creator: &dyn InverseCreator) -> ProvenanceResult<NodeId> {
        let spec = self.inverse_spec(action, creator)?;
        let resolved = self.resolve_inputs(&spec.inputs)?;
        let input_ids = self.register_inputs(resolved)?;
        let created = nav::creates(&self.store, action);
        let removed = nav::removes(&self.store, action);

        let ActionSpec {
            meta,
            function_id,
            parameter,
            ..
        } = spec;
        let inverted = self.store.add_node(NodeRecord::Action(ActionNode::new(
            meta,
            function_id,
            parameter,
        )))?;
        for (index, id) in input_ids.into_iter().enumerate() {
            self.store
                .add_indexed_edge(inverted, EdgeKind::Requires, id, index)?;
        }
        self.store.add_edge(inverted, EdgeKind::Inverses, action)?;
        for (index, id) in removed.into_iter().enumerate() {
            self.store
                .add_indexed_edge(inverted, EdgeKind::Creates, id, index)?;
        }
        for id in created {
            self.store.add_edge(inverted, EdgeKind::Removes, id)?;
        }
        if let Some(after) = nav::results_in(&self.store, action) {
            self.store.add_edge(after, EdgeKind::Next, inverted)?;
        }
        if let Some(before) = nav::previous(&self.store, action) {
            self.store.add_edge(inverted, EdgeKind::ResultsIn, before)?;
        }
        self.inverters.remove(&action);
        tracing::debug!("Created inverse {} of action {}", inverted, action);
        Ok(inverted)
    }

    /// Creates the inverse now, or keeps the creator for a later attempt
    fn attach_inverse(&mut self, action: NodeId, creator: Arc<dyn InverseCreator>) {
        if let Err(e) = self.create_inverse(action, creator.as_ref()) {
            tracing::warn!("Inverse of action {} not created yet: {}", action, e);
            self.inverters.insert(action, creator);
        }
    }

    /// Brings a cached inverse in line with the latest execution
    fn refresh_inverse(&mut self, action: NodeId, creator: Arc<dyn InverseCreator>) {
        if nav::is_inverse(&self.store, action) {
            return;
        }
        let Some(inverted) = nav::inverse_of(&self.store, action) else {
            self.attach_inverse(action, creator);
            return;
        };
        let refreshed = self.inverse_spec(action, creator.as_ref()).and_then(|spec| {
            self.store
                .update_node(inverted, |record| {
                    if let NodeRecord::Action(a) = record {
                        a.parameter = spec.parameter;
                    }
                })
                .map_err(ProvenanceError::from)
        });
        if let Err(e) = refreshed {
            tracing::warn!("Failed to refresh inverse {} of action {}: {}", inverted, action, e);
        }
    }

    fn get_or_create_inverse(&mut self, action: NodeId) -> ProvenanceResult<NodeId> {
        if let Some(inverted) = nav::inverse_of(&self.store, action) {
            return Ok(inverted);
        }
        let node = self.action(action)?;
        let creator = match self.inverters.get(&action) {
            Some(creator) => Some(Arc::clone(creator)),
            None => self
                .env
                .registry
                .get(&node.function_id)
                .and_then(|entry| entry.inverse),
        };
        match creator {
            Some(creator) => self.create_inverse(action, creator.as_ref()),
            None => Err(ProvenanceError::inverse_unavailable(action, node.name())),
        }
    }

    // -- navigation --

    /// Actions that lead from the current state to `target`
    fn plan_jump(&mut self, target: NodeId) -> ProvenanceResult<Vec<NodeId>> {
        let from = nav::path(&self.store, self.act);
        let to = nav::path(&self.store, target);
        let (i, j) = nav::find_common(&from, &to).ok_or(ProvenanceError::UnknownState(target))?;

        let mut chain = Vec::with_capacity(from.len() - i + to.len() - j);
        for state in from[i + 1..].iter().rev() {
            let creator = nav::creator_of(&self.store, *state).ok_or(ProvenanceError::UnknownState(*state))?;
            chain.push(self.get_or_create_inverse(creator)?);
        }
        for state in &to[j + 1..] {
            chain.push(nav::creator_of(&self.store, *state).ok_or(ProvenanceError::UnknownState(*state))?);
        }
        Ok(nav::compress(&self.store, chain))
    }

    fn fork(
        &mut self,
        action: NodeId,
        target: NodeId,
        replacements: Vec<(NodeId, ObjectRef)>,
    ) -> ProvenanceResult<bool> {
        self.action(action)?;
        self.ensure_state(target)?;
        if nav::is_inverse(&self.store, action) {
            return Ok(false);
        }
        let start = nav::results_in(&self.store, action).ok_or(ProvenanceError::UnknownAction(action))?;
        if nav::reachable_states(&self.store, start).contains(&target) {
            tracing::debug!("Refusing to fork action {} into its own subtree", action);
            return Ok(false);
        }
        let before = nav::previous(&self.store, action).ok_or(ProvenanceError::UnknownAction(action))?;

        let available: HashSet<NodeId> = nav::consists_of(&self.store, target).into_iter().collect();
        let removed: HashSet<NodeId> = nav::consists_of(&self.store, before)
            .into_iter()
            .filter(|id| !available.contains(id))
            .collect();

        let mut replaced = HashMap::with_capacity(replacements.len());
        for (from, to) in replacements {
            self.object(from)?;
            let to = self.find_or_add_just_object(to)?;
            replaced.insert(from, to);
        }

        self.copy_branch(action, target, &removed, &replaced)?;
        self.emit(ProvenanceEvent::ForkedBranch { action, target });
        Ok(true)
    }

    /// Copies `root` and its non-inverse descendants below `target`
    ///
    /// Actions requiring an object missing on the target side (and not
    /// replaced) are skipped; their descendants attach to the last copy.
    fn copy_branch(
        &mut self,
        root: NodeId,
        target: NodeId,
        removed: &HashSet<NodeId>,
        replaced: &HashMap<NodeId, NodeId>,
    ) -> ProvenanceResult<()> {
        let mut queue = VecDeque::from([(root, target)]);
        let mut visited = HashSet::new();
        while let Some((action, attach)) = queue.pop_front() {
            if !visited.insert(action) {
                continue;
            }
            let blocked = nav::requires(&self.store, action)
                .iter()
                .any(|id| removed.contains(id) && !replaced.contains_key(id));
            let next_attach = if blocked {
                tracing::debug!("Skipping action {} while forking: input unavailable", action);
                attach
            } else {
                self.copy_action(action, attach, replaced)?
            };
            if let Some(state) = nav::results_in(&self.store, action) {
                for child in nav::next_actions(&self.store, state) {
                    if !nav::is_inverse(&self.store, child) {
                        queue.push_back((child, next_attach));
                    }
                }
            }
        }
        Ok(())
    }

    fn copy_action(
        &mut self,
        action: NodeId,
        attach: NodeId,
        replaced: &HashMap<NodeId, NodeId>,
    ) -> ProvenanceResult<NodeId> {
        let record = self.action(action)?.unexecuted_copy();
        let state_record = nav::results_in(&self.store, action)
            .and_then(|s| self.store.node(s))
            .and_then(GraphNode::as_state)
            .map(|s| StateNode {
                thumbnail: None,
                ..s.clone()
            })
            .unwrap_or_else(|| StateNode::new(record.name()));
        let requires = nav::requires(&self.store, action);

        let copy = self.store.add_node(NodeRecord::Action(record))?;
        for (index, id) in requires.into_iter().enumerate() {
            let id = replaced.get(&id).copied().unwrap_or(id);
            self.store
                .add_indexed_edge(copy, EdgeKind::Requires, id, index)?;
        }
        self.store.add_edge(attach, EdgeKind::Next, copy)?;
        let state = self.store.add_node(NodeRecord::State(state_record))?;
        self.store.add_edge(copy, EdgeKind::ResultsIn, state)?;
        self.emit(ProvenanceEvent::AddState { id: state });
        Ok(state)
    }

    /// Rebuilds the store around `backend`, which already holds `base`
    fn switch_backend(
        &mut self,
        desc: GraphDesc,
        backend: Arc<dyn GraphBackend>,
        base: &GraphDump,
    ) -> ProvenanceResult<()> {
        let migrated = self.store.migrate();
        let events = self.store.events().clone();
        let mut store = GraphBase::from_migrated(desc, migrated, backend);
        store.attach_events(events);
        self.store = store;
        self.store.write_changes_since(base)?;
        Ok(())
    }

    fn clear(&mut self) -> ProvenanceResult<()> {
        self.store.clear()?;
        self.inverters.clear();
        self.selections = Selections::default();
        self.last_push = None;
        let start = self
            .store
            .add_node(NodeRecord::State(StateNode::new(START_STATE_NAME)))?;
        self.act = start;
        self.last_action = None;
        self.emit(ProvenanceEvent::Clear);
        Ok(())
    }
}

/// State shared between graph handles and the worker
struct Shared {
    state: RwLock<ProvenanceState>,
    env: GraphEnvironment,
    events: EventBus,
    executing: AtomicBool,
}

impl Shared {
    async fn run_job(&self, job: Job) {
        match job {
            Job::Push {
                spec,
                submitted,
                reply,
            } => {
                let _ = reply.send(self.push(spec, submitted).await);
            }
            Job::Record {
                spec,
                result,
                reply,
            } => {
                let _ = reply.send(self.record(spec, result));
            }
            Job::Undo { reply } => {
                let _ = reply.send(self.undo().await);
            }
            Job::JumpTo {
                state,
                within,
                reply,
            } => {
                let _ = reply.send(self.jump_to(state, within).await);
            }
            Job::Fork {
                action,
                target,
                replacements,
                reply,
            } => {
                let _ = reply.send(self.state.write().fork(action, target, replacements));
            }
            Job::Clear { reply } => {
                let _ = reply.send(self.state.write().clear());
            }
            Job::Migrate { upload, reply } => {
                let _ = reply.send(self.migrate(upload).await);
            }
        }
    }

    /// Uploads the graph and switches it to the uploaded copy's backend
    ///
    /// Queued jobs wait until the switch is done. Edits made directly (slides,
    /// selections) while the upload runs are written to the new backend
    /// after the switch.
    async fn migrate(&self, upload: MigrationUpload) -> ProvenanceResult<GraphDesc> {
        let backend = self.state.read().store.backend();
        backend.flush().await?;
        let base = self.state.read().store.persist();
        let (desc, target) = upload(base.clone())
            .await
            .map_err(ProvenanceError::Migration)?;

        let mut state = self.state.write();
        let from = state.store.desc().id.clone();
        state.switch_backend(desc.clone(), target, &base)?;
        tracing::info!(
            "Graph {} moved to {} on a {} backend",
            from,
            desc.id,
            state.store.backend().kind().as_str()
        );
        Ok(desc)
    }

    fn deduplicated(&self, fingerprint: &str, submitted: Instant) -> Option<ActionOutcome> {
        let window = self.env.execute_current_action_within?;
        let state = self.state.read();
        let last = state.last_push.as_ref()?;
        let repeated = last.fingerprint == fingerprint
            && submitted.saturating_duration_since(last.submitted) <= window
            && state.last_action == Some(last.outcome.action);
        repeated.then(|| ActionOutcome {
            deduplicated: true,
            ..last.outcome.clone()
        })
    }

    fn command(&self, function_id: &str) -> ProvenanceResult<CommandEntry> {
        self.env
            .registry
            .get(function_id)
            .ok_or_else(|| ProvenanceError::UnknownCommand(function_id.to_string()))
    }

    async fn push(&self, spec: ActionSpec, submitted: Instant) -> ProvenanceResult<ActionOutcome> {
        let fingerprint = spec.fingerprint();
        if let Some(outcome) = self.deduplicated(&fingerprint, submitted) {
            tracing::debug!(
                "Push of '{}' answered from the idempotence window",
                spec.function_id
            );
            return Ok(outcome);
        }

        let entry = self.command(&spec.function_id)?;
        let inputs = self.state.read().resolve_inputs(&spec.inputs)?;
        let ctx = CmdContext {
            inputs: inputs.iter().map(|input| input.object.clone()).collect(),
            parameter: spec.parameter.clone(),
            within: self.env.execute_current_action_within,
        };

        self.events.emit(ProvenanceEvent::Execute {
            action: None,
            function_id: spec.function_id.clone(),
        });
        let started = Instant::now();
        let result = entry.command.call(ctx).await.map_err(|e| {
            tracing::warn!("Command '{}' failed: {}", spec.function_id, e);
            ProvenanceError::command_execution(spec.function_id.clone(), e)
        })?;
        let consumed = result.consumed.unwrap_or_else(|| started.elapsed());

        let mut state = self.state.write();
        let outcome = state.record_action(spec, inputs, result, entry.inverse, consumed)?;
        if self.env.execute_current_action_within.is_some() {
            state.last_push = Some(LastPush {
                fingerprint,
                submitted,
                outcome: outcome.clone(),
            });
        }
        Ok(outcome)
    }

    /// Records an action whose effect the caller already applied
    fn record(&self, spec: ActionSpec, result: CmdResult) -> ProvenanceResult<ActionOutcome> {
        let fallback = self.env.registry.get(&spec.function_id).and_then(|e| e.inverse);
        let consumed = result.consumed.unwrap_or_default();
        let mut state = self.state.write();
        let inputs = state.resolve_inputs(&spec.inputs)?;
        state.record_action(spec, inputs, result, fallback, consumed)
    }

    /// Runs an action that is already part of the graph
    async fn run_existing(
        &self,
        action: NodeId,
        within: Option<Duration>,
    ) -> ProvenanceResult<ActionOutcome> {
        let (entry, ctx, function_id) = {
            let state = self.state.read();
            let node = state.action(action)?;
            let entry = self.command(&node.function_id)?;
            let inputs = nav::requires(&state.store, action)
                .into_iter()
                .map(|id| state.object(id).cloned())
                .collect::<ProvenanceResult<Vec<_>>>()?;
            let ctx = CmdContext {
                inputs,
                parameter: node.parameter.clone(),
                within,
            };
            (entry, ctx, node.function_id.clone())
        };

        self.events.emit(ProvenanceEvent::Execute {
            action: Some(action),
            function_id: function_id.clone(),
        });
        let started = Instant::now();
        let result = entry.command.call(ctx).await.map_err(|e| {
            tracing::warn!("Re-running action {} ('{}') failed: {}", action, function_id, e);
            ProvenanceError::command_execution(function_id, e)
        })?;
        let consumed = result.consumed.unwrap_or_else(|| started.elapsed());
        self.state
            .write()
            .apply_rerun(action, result, entry.inverse, consumed)
    }

    async fn undo(&self) -> ProvenanceResult<Option<ActionOutcome>> {
        enum Plan {
            Nothing,
            Jump(NodeId),
            Run(NodeId),
        }

        let plan = {
            let mut state = self.state.write();
            let last_action = state.last_action;
            match last_action {
                None => Plan::Nothing,
                Some(last) if nav::is_inverse(&state.store, last) => {
                    match nav::previous_state(&state.store, state.act) {
                        Some(target) => Plan::Jump(target),
                        None => Plan::Nothing,
                    }
                }
                Some(last) => Plan::Run(state.get_or_create_inverse(last)?),
            }
        };

        match plan {
            Plan::Nothing => Ok(None),
            Plan::Jump(target) => Ok(self.jump_to(target, None).await?.pop()),
            Plan::Run(inverse) => self.run_existing(inverse, None).await.map(Some),
        }
    }

    async fn jump_to(
        &self,
        target: NodeId,
        within: Option<Duration>,
    ) -> ProvenanceResult<Vec<ActionOutcome>> {
        let chain = {
            let mut state = self.state.write();
            state.ensure_state(target)?;
            if state.act == target {
                return Ok(Vec::new());
            }
            state.plan_jump(target)?
        };

        let outcomes = self.run_chain(chain, within).await?;

        let mut state = self.state.write();
        if state.act != target {
            state.switch_to(None, target);
        }
        Ok(outcomes)
    }

    /// Runs actions in order, sharing the time budget evenly among those left
    async fn run_chain(
        &self,
        chain: Vec<NodeId>,
        within: Option<Duration>,
    ) -> ProvenanceResult<Vec<ActionOutcome>> {
        self.events.emit(ProvenanceEvent::RunChain {
            actions: chain.clone(),
        });
        let total = chain.len();
        let mut remaining = within;
        let mut outcomes = Vec::with_capacity(total);
        for (i, action) in chain.into_iter().enumerate() {
            let budget = remaining.map(|r| r / (total - i) as u32);
            let outcome = self.run_existing(action, budget).await?;
            if let Some(r) = remaining.as_mut() {
                *r = r.saturating_sub(outcome.consumed);
            }
            outcomes.push(outcome);
        }
        let act = self.state.read().act;
        self.events.emit(ProvenanceEvent::RanChain { state: act });
        Ok(outcomes)
    }
}

async fn run_worker(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        shared.executing.store(true, Ordering::SeqCst);
        shared.run_job(job).await;
        shared.executing.store(false, Ordering::SeqCst);
    }
    tracing::debug!("Provenance worker stopped");
}

/// Handle on a provenance graph
///
/// Cloning is cheap; all clones share the graph and its job queue. The
/// worker task stops once every handle is dropped.
#[derive(Clone)]
pub struct ProvenanceGraph {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
}

impl ProvenanceGraph {
    /// Wraps a store; a graph without states gets a `Start` state
    ///
    /// Must be called within a tokio runtime.
    pub fn new(store: GraphBase, env: GraphEnvironment) -> ProvenanceResult<Self> {
        Self::restored(store, env, None, None)
    }

    /// Wraps a store holding a previously persisted graph
    ///
    /// `act` falls back to the first state when it doesn't name a state.
    pub fn restored(
        mut store: GraphBase,
        env: GraphEnvironment,
        act: Option<NodeId>,
        last_action: Option<NodeId>,
    ) -> ProvenanceResult<Self> {
        let events = EventBus::new();
        store.attach_events(events.clone());

        let first_state = store
            .nodes()
            .find(|n| n.kind() == NodeKind::State)
            .map(|n| n.id);
        let act = match act
            .filter(|id| nav::is_kind(&store, *id, NodeKind::State))
            .or(first_state)
        {
            Some(id) => id,
            None => store.add_node(NodeRecord::State(StateNode::new(START_STATE_NAME)))?,
        };
        let last_action = last_action.filter(|id| nav::is_kind(&store, *id, NodeKind::Action));

        let state = ProvenanceState {
            store,
            env: env.clone(),
            act,
            last_action,
            selections: Selections::default(),
            inverters: HashMap::new(),
            last_push: None,
        };
        let shared = Arc::new(Shared {
            state: RwLock::new(state),
            env,
            events,
            executing: AtomicBool::new(false),
        });
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(Arc::clone(&shared), rx));
        Ok(Self { shared, jobs })
    }

    /// Builds a graph from a dump, writing it through to the store's backend
    pub fn from_dump(
        mut store: GraphBase,
        env: GraphEnvironment,
        dump: ProvenanceGraphDump,
    ) -> ProvenanceResult<Self> {
        store.restore(dump.graph, &env.values)?;
        Self::restored(store, env, dump.act, dump.last_action)
    }

    fn enqueue<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> PushHandle<T> {
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(job(tx)).is_err() {
            tracing::warn!("Provenance worker stopped; job dropped");
        }
        PushHandle { rx }
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&ProvenanceState) -> R) -> R {
        let state = self.shared.state.read();
        f(&state)
    }

    pub(crate) fn with_state_mut<R>(&self, f: impl FnOnce(&mut ProvenanceState) -> R) -> R {
        let mut state = self.shared.state.write();
        f(&mut state)
    }

    /// Read access to the underlying store
    pub fn with_store<R>(&self, f: impl FnOnce(&GraphBase) -> R) -> R {
        self.with_state(|state| f(&state.store))
    }

    // -- queued operations --

    /// Runs a command and records it as a new action
    pub fn push(&self, spec: ActionSpec) -> PushHandle<ActionOutcome> {
        let submitted = Instant::now();
        self.enqueue(|reply| Job::Push {
            spec,
            submitted,
            reply,
        })
    }

    /// Records an action the application already executed itself
    pub fn push_with_result(&self, spec: ActionSpec, result: CmdResult) -> PushHandle<ActionOutcome> {
        self.enqueue(|reply| Job::Record {
            spec,
            result,
            reply,
        })
    }

    /// Reverts the last action; resolves to None when there is nothing to undo
    pub fn undo(&self) -> PushHandle<Option<ActionOutcome>> {
        self.enqueue(|reply| Job::Undo { reply })
    }

    /// Makes `state` current by reverting and replaying actions
    pub fn jump_to(&self, state: NodeId) -> PushHandle<Vec<ActionOutcome>> {
        self.jump_to_within(state, None)
    }

    /// Like [`jump_to`](Self::jump_to), giving the replayed commands a shared
    /// time budget
    pub fn jump_to_within(
        &self,
        state: NodeId,
        within: Option<Duration>,
    ) -> PushHandle<Vec<ActionOutcome>> {
        self.enqueue(|reply| Job::JumpTo {
            state,
            within,
            reply,
        })
    }

    /// Copies `action` and the branch below it onto `target`
    ///
    /// Resolves to false when `target` lies in the branch itself.
    pub fn fork(&self, action: NodeId, target: NodeId) -> PushHandle<bool> {
        self.fork_with(action, target, Vec::new())
    }

    /// Like [`fork`](Self::fork), substituting objects in the copied actions'
    /// inputs
    pub fn fork_with(
        &self,
        action: NodeId,
        target: NodeId,
        replacements: Vec<(NodeId, ObjectRef)>,
    ) -> PushHandle<bool> {
        self.enqueue(|reply| Job::Fork {
            action,
            target,
            replacements,
            reply,
        })
    }

    /// Removes everything and starts over with a `Start` state
    pub fn clear(&self) -> PushHandle<()> {
        self.enqueue(|reply| Job::Clear { reply })
    }

    /// True while the worker runs a job
    pub fn is_executing(&self) -> bool {
        self.shared.executing.load(Ordering::SeqCst)
    }

    // -- objects --

    /// Registers an object as part of the current state
    pub fn add_object(&self, reference: impl Into<ObjectRef>) -> ProvenanceResult<NodeId> {
        let reference = reference.into();
        self.with_state_mut(|state| state.add_object(reference))
    }

    /// Registers an object without attaching it to a state
    pub fn add_just_object(&self, proxy: ObjectProxy) -> ProvenanceResult<NodeId> {
        self.with_state_mut(|state| {
            let object = ObjectNode::from_proxy(&proxy, state.env.values.clone());
            state.add_just_object(object)
        })
    }

    pub fn find_object(&self, value: &Payload) -> Option<NodeId> {
        self.with_state(|state| state.find_object_by_value(value))
    }

    pub fn find_or_add_object(&self, reference: impl Into<ObjectRef>) -> ProvenanceResult<NodeId> {
        self.add_object(reference)
    }

    pub fn find_or_add_just_object(&self, reference: impl Into<ObjectRef>) -> ProvenanceResult<NodeId> {
        let reference = reference.into();
        self.with_state_mut(|state| state.find_or_add_just_object(reference))
    }

    // -- reading --

    /// The current state
    pub fn act(&self) -> NodeId {
        self.with_state(|state| state.act)
    }

    pub fn last_action(&self) -> Option<NodeId> {
        self.with_state(|state| state.last_action)
    }

    pub fn desc(&self) -> GraphDesc {
        self.with_store(|store| store.desc().clone())
    }

    pub fn set_desc(&self, desc: GraphDesc) {
        self.with_state_mut(|state| state.store.set_desc(desc));
    }

    /// Counts of actions, objects, states and slides
    pub fn dim(&self) -> [usize; 4] {
        self.with_state(ProvenanceState::dim)
    }

    pub fn node(&self, id: NodeId) -> Option<GraphNode> {
        self.with_store(|store| store.node(id).cloned())
    }

    pub fn action(&self, id: NodeId) -> Option<ActionNode> {
        self.with_store(|store| store.node(id).and_then(GraphNode::as_action).cloned())
    }

    pub fn state(&self, id: NodeId) -> Option<StateNode> {
        self.with_store(|store| store.node(id).and_then(GraphNode::as_state).cloned())
    }

    pub fn object(&self, id: NodeId) -> Option<ObjectNode> {
        self.with_store(|store| store.node(id).and_then(GraphNode::as_object).cloned())
    }

    pub fn actions(&self) -> Vec<NodeId> {
        self.with_state(|state| state.ids_of(NodeKind::Action))
    }

    pub fn states(&self) -> Vec<NodeId> {
        self.with_state(|state| state.ids_of(NodeKind::State))
    }

    pub fn objects(&self) -> Vec<NodeId> {
        self.with_state(|state| state.ids_of(NodeKind::Object))
    }

    /// States from the root to `state`
    pub fn path(&self, state: NodeId) -> Vec<NodeId> {
        self.with_store(|store| nav::path(store, state))
    }

    pub fn previous_state(&self, state: NodeId) -> Option<NodeId> {
        self.with_store(|store| nav::previous_state(store, state))
    }

    /// The state before a state, or the state an action started from
    pub fn previous(&self, id: NodeId) -> Option<NodeId> {
        self.with_store(|store| match store.node(id).map(GraphNode::kind) {
            Some(NodeKind::State) => nav::previous_state(store, id),
            Some(NodeKind::Action) => nav::previous(store, id),
            _ => None,
        })
    }

    /// True if nothing but the root state was recorded
    pub fn is_empty(&self) -> bool {
        self.with_store(|store| store.nnodes() <= 1)
    }

    pub fn next_states(&self, state: NodeId) -> Vec<NodeId> {
        self.with_store(|store| nav::next_states(store, state))
    }

    pub fn results_in(&self, action: NodeId) -> Option<NodeId> {
        self.with_store(|store| nav::results_in(store, action))
    }

    pub fn inverse_of(&self, action: NodeId) -> Option<NodeId> {
        self.with_store(|store| nav::inverse_of(store, action))
    }

    pub fn is_inverse(&self, action: NodeId) -> bool {
        self.with_store(|store| nav::is_inverse(store, action))
    }

    /// Objects alive in `state`
    pub fn consists_of(&self, state: NodeId) -> Vec<NodeId> {
        self.with_store(|store| nav::consists_of(store, state))
    }

    pub fn requires(&self, action: NodeId) -> Vec<NodeId> {
        self.with_store(|store| nav::requires(store, action))
    }

    pub fn creates(&self, action: NodeId) -> Vec<NodeId> {
        self.with_store(|store| nav::creates(store, action))
    }

    pub fn removes(&self, action: NodeId) -> Vec<NodeId> {
        self.with_store(|store| nav::removes(store, action))
    }

    // -- selections --

    pub fn select_state(&self, selection: &str, operation: SelectOperation, id: Option<NodeId>) {
        self.select(SelectionTarget::State, selection, operation, id);
    }

    pub fn select_action(&self, selection: &str, operation: SelectOperation, id: Option<NodeId>) {
        self.select(SelectionTarget::Action, selection, operation, id);
    }

    pub fn selected_states(&self, selection: &str) -> Vec<NodeId> {
        self.with_state(|state| state.selections.get(SelectionTarget::State, selection))
    }

    pub fn selected_actions(&self, selection: &str) -> Vec<NodeId> {
        self.with_state(|state| state.selections.get(SelectionTarget::Action, selection))
    }

    pub(crate) fn select(
        &self,
        target: SelectionTarget,
        selection: &str,
        operation: SelectOperation,
        id: Option<NodeId>,
    ) {
        self.with_state_mut(|state| {
            state.selections.apply(target, selection, operation, id);
            let selection = selection.to_string();
            state.emit(match target {
                SelectionTarget::State => ProvenanceEvent::SelectState {
                    selection,
                    operation,
                    id,
                },
                SelectionTarget::Action => ProvenanceEvent::SelectAction {
                    selection,
                    operation,
                    id,
                },
                SelectionTarget::Slide => ProvenanceEvent::SelectSlide {
                    selection,
                    operation,
                    id,
                },
            });
        });
    }

    // -- persistence --

    pub fn persist(&self) -> ProvenanceGraphDump {
        self.with_state(ProvenanceState::persist)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.with_state(|state| GraphSnapshot {
            desc: state.store.desc().clone(),
            dump: state.persist(),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.with_store(|store| store.backend().kind())
    }

    /// Moves the graph onto another backend, keeping ids and live values
    ///
    /// Runs as a queued job: `upload` receives the graph's content once every
    /// job queued before has finished, and jobs queued later run on the new
    /// backend. Resolves to the uploaded graph's description.
    pub fn migrate_with(&self, upload: MigrationUpload) -> PushHandle<GraphDesc> {
        self.enqueue(|reply| Job::Migrate { upload, reply })
    }

    /// Waits until the backend sent everything written so far
    pub async fn flush(&self) -> ProvenanceResult<()> {
        let backend = self.with_store(GraphBase::backend);
        backend.flush().await?;
        Ok(())
    }

    /// Number of backend batches in flight
    pub fn active_sync_operations(&self) -> usize {
        self.with_store(|store| store.backend().active_sync_operations())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProvenanceEvent> {
        self.shared.events.subscribe()
    }
}

impl fmt::Debug for ProvenanceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("ProvenanceGraph")
            .field("store", &state.store)
            .field("act", &state.act)
            .field("last_action", &state.last_action)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionMeta, ObjectCategory};
    use crate::services::CommandError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn meta(name: &str) -> ActionMeta {
        ActionMeta::new(name, ObjectCategory::Data)
    }

    fn counting_registry(counter: Arc<AtomicUsize>) -> Arc<CommandRegistry> {
        let registry = CommandRegistry::new();
        registry.register("count", move |_ctx: CmdContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CommandError>(CmdResult::new())
            }
        });
        registry.register("fail", |_ctx: CmdContext| async move {
            Err::<CmdResult, CommandError>("boom".into())
        });
        Arc::new(registry)
    }

    fn graph(registry: Arc<CommandRegistry>, window: Option<Duration>) -> ProvenanceGraph {
        let env = GraphEnvironment::new(registry).with_idempotence_window(window);
        ProvenanceGraph::new(GraphBase::in_memory(GraphDesc::in_memory("test")), env).unwrap()
    }

    #[tokio::test]
    async fn new_graph_starts_in_start_state() {
        let g = graph(counting_registry(Arc::default()), None);
        assert_eq!(g.states().len(), 1);
        assert_eq!(g.state(g.act()).unwrap().name, START_STATE_NAME);
        assert_eq!(g.last_action(), None);
    }

    #[tokio::test]
    async fn push_records_action_and_state() {
        let g = graph(counting_registry(Arc::default()), None);
        let start = g.act();
        let outcome = g.push(ActionSpec::new(meta("Count"), "count")).await.unwrap();

        assert_eq!(g.act(), outcome.state);
        assert_eq!(g.last_action(), Some(outcome.action));
        assert_eq!(g.previous_state(outcome.state), Some(start));
        assert_eq!(g.state(outcome.state).unwrap().name, "Count");
        assert_eq!(g.dim(), [1, 0, 2, 0]);
    }

    #[tokio::test]
    async fn failing_command_leaves_graph_untouched() {
        let g = graph(counting_registry(Arc::default()), None);
        let before = g.persist();
        let err = g.push(ActionSpec::new(meta("Fail"), "fail")).await.unwrap_err();
        assert!(matches!(err, ProvenanceError::CommandExecution { .. }));
        assert_eq!(g.persist(), before);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let g = graph(counting_registry(Arc::default()), None);
        let err = g.push(ActionSpec::new(meta("X"), "missing")).await.unwrap_err();
        assert!(matches!(err, ProvenanceError::UnknownCommand(id) if id == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_push_within_window_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let g = graph(counting_registry(counter.clone()), Some(Duration::from_millis(500)));
        let spec = ActionSpec::new(meta("Count"), "count").with_parameter(json!(1));

        let first = g.push(spec.clone()).await.unwrap();
        let second = g.push(spec.clone()).await.unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.action, first.action);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        let third = g.push(spec).await.unwrap();
        assert!(!third.deduplicated);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undo_without_inverse_is_an_error() {
        let g = graph(counting_registry(Arc::default()), None);
        let outcome = g.push(ActionSpec::new(meta("Count"), "count")).await.unwrap();
        let err = g.undo().await.unwrap_err();
        assert!(matches!(err, ProvenanceError::InverseUnavailable { action, .. } if action == outcome.action));
        assert_eq!(g.act(), outcome.state);
    }

    #[tokio::test]
    async fn undo_on_fresh_graph_does_nothing() {
        let g = graph(counting_registry(Arc::default()), None);
        assert!(g.undo().await.unwrap().is_none());
    }

    #[test]
    fn selections_follow_operation() {
        let mut selections = Selections::default();
        let t = SelectionTarget::State;
        selections.apply(t, "s", SelectOperation::Set, Some(1));
        selections.apply(t, "s", SelectOperation::Add, Some(2));
        selections.apply(t, "s", SelectOperation::Toggle, Some(1));
        assert_eq!(selections.get(t, "s"), vec![2]);
        selections.apply(t, "s", SelectOperation::Set, None);
        assert!(selections.get(t, "s").is_empty());
        assert!(selections.get(SelectionTarget::Slide, "s").is_empty());
    }
}
