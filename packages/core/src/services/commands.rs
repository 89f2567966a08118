//! Command Registry
//!
//! Commands are the application's side of an action: async functions
//! registered under a function id. The orchestrator looks them up by the
//! `function_id` stored on each action record, so a restored graph can
//! replay its actions as long as the same ids are registered.
//!
//! # Example
//!
//! ```rust
//! use trailgraph_core::services::{CmdContext, CmdResult, CommandError, CommandRegistry};
//!
//! let registry = CommandRegistry::new();
//! registry.register("noop", |_ctx: CmdContext| async move {
//!     Ok::<_, CommandError>(CmdResult::new())
//! });
//! assert!(registry.contains("noop"));
//! ```

use super::error::CommandError;
use crate::models::{ActionMeta, NodeId, ObjectNode, ObjectProxy};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Reference to a value an action reads
#[derive(Debug, Clone)]
pub enum ObjectRef {
    /// An object node already registered in the graph
    Node(NodeId),
    /// An object not known to the graph yet; registered on first use
    Proxy(ObjectProxy),
}

impl From<NodeId> for ObjectRef {
    fn from(id: NodeId) -> Self {
        ObjectRef::Node(id)
    }
}

impl From<ObjectProxy> for ObjectRef {
    fn from(proxy: ObjectProxy) -> Self {
        ObjectRef::Proxy(proxy)
    }
}

/// Everything needed to record and run one action
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub meta: ActionMeta,
    pub function_id: String,
    pub inputs: Vec<ObjectRef>,
    pub parameter: Value,
}

impl ActionSpec {
    pub fn new(meta: ActionMeta, function_id: impl Into<String>) -> Self {
        Self {
            meta,
            function_id: function_id.into(),
            inputs: Vec::new(),
            parameter: Value::Null,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<ObjectRef>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameter(mut self, parameter: Value) -> Self {
        self.parameter = parameter;
        self
    }

    /// Identity used by the idempotence window
    pub(crate) fn fingerprint(&self) -> String {
        let inputs: Vec<String> = self
            .inputs
            .iter()
            .map(|input| match input {
                ObjectRef::Node(id) => id.to_string(),
                ObjectRef::Proxy(p) => format!("~{}", p.effective_hash()),
            })
            .collect();
        format!("{}|{}|{}", self.function_id, self.parameter, inputs.join(","))
    }
}

/// Input of a command invocation
#[derive(Debug, Clone)]
pub struct CmdContext {
    /// Resolved input objects, in argument order
    pub inputs: Vec<ObjectNode>,
    pub parameter: Value,
    /// Time budget when the command runs as part of a timed chain
    pub within: Option<Duration>,
}

impl CmdContext {
    pub fn input(&self, index: usize) -> Option<&ObjectNode> {
        self.inputs.get(index)
    }

    /// Deserializes the parameter
    pub fn param<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        Ok(serde_json::from_value(self.parameter.clone())?)
    }
}

/// What a command did
#[derive(Default)]
pub struct CmdResult {
    /// Objects the command created, in output order
    pub created: Vec<ObjectProxy>,
    /// Positions (in the action's inputs) of objects the command removed
    pub removed: Vec<usize>,
    /// How to undo this particular execution
    pub inverse: Option<Arc<dyn InverseCreator>>,
    /// Time the command took; measured by the orchestrator when absent
    pub consumed: Option<Duration>,
}

impl CmdResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(mut self, proxy: ObjectProxy) -> Self {
        self.created.push(proxy);
        self
    }

    pub fn removed(mut self, input_index: usize) -> Self {
        self.removed.push(input_index);
        self
    }

    pub fn with_inverse(mut self, creator: impl InverseCreator + 'static) -> Self {
        self.inverse = Some(Arc::new(creator));
        self
    }

    /// Uses a fixed action as inverse
    pub fn with_inverse_action(self, action: ActionSpec) -> Self {
        self.with_inverse(move |_: InverseInput<'_>| -> Result<ActionSpec, CommandError> {
            Ok(action.clone())
        })
    }

    pub fn with_consumed(mut self, consumed: Duration) -> Self {
        self.consumed = Some(consumed);
        self
    }
}

impl fmt::Debug for CmdResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmdResult")
            .field("created", &self.created)
            .field("removed", &self.removed)
            .field("inverse", &self.inverse.is_some())
            .field("consumed", &self.consumed)
            .finish()
    }
}

pub type CommandFuture = BoxFuture<'static, Result<CmdResult, CommandError>>;

/// An executable command
pub trait CommandFn: Send + Sync {
    fn call(&self, ctx: CmdContext) -> CommandFuture;
}

impl<F, Fut> CommandFn for F
where
    F: Fn(CmdContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CmdResult, CommandError>> + Send + 'static,
{
    fn call(&self, ctx: CmdContext) -> CommandFuture {
        Box::pin(self(ctx))
    }
}

/// Data an inverse creator sees about the action it inverts
#[derive(Debug, Clone, Copy)]
pub struct InverseInput<'a> {
    pub action: NodeId,
    pub inputs: &'a [NodeId],
    pub parameter: &'a Value,
    pub created: &'a [NodeId],
    pub removed: &'a [NodeId],
}

/// Builds the action that undoes another action
pub trait InverseCreator: Send + Sync {
    fn create_inverse(&self, input: InverseInput<'_>) -> Result<ActionSpec, CommandError>;
}

impl<F> InverseCreator for F
where
    F: for<'a> Fn(InverseInput<'a>) -> Result<ActionSpec, CommandError> + Send + Sync,
{
    fn create_inverse(&self, input: InverseInput<'_>) -> Result<ActionSpec, CommandError> {
        self(input)
    }
}

/// A registered command and its optional default inverse
#[derive(Clone)]
pub struct CommandEntry {
    pub command: Arc<dyn CommandFn>,
    pub inverse: Option<Arc<dyn InverseCreator>>,
}

/// Function id to command lookup
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, CommandEntry>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, function_id: impl Into<String>, command: impl CommandFn + 'static) {
        self.insert(function_id.into(), Arc::new(command), None);
    }

    /// Registers a command together with the inverse creator used when an
    /// execution result does not bring its own
    pub fn register_with_inverse(
        &self,
        function_id: impl Into<String>,
        command: impl CommandFn + 'static,
        inverse: impl InverseCreator + 'static,
    ) {
        self.insert(function_id.into(), Arc::new(command), Some(Arc::new(inverse)));
    }

    fn insert(
        &self,
        function_id: String,
        command: Arc<dyn CommandFn>,
        inverse: Option<Arc<dyn InverseCreator>>,
    ) {
        tracing::debug!("Registered command '{}'", function_id);
        self.commands
            .write()
            .insert(function_id, CommandEntry { command, inverse });
    }

    pub fn get(&self, function_id: &str) -> Option<CommandEntry> {
        self.commands.read().get(function_id).cloned()
    }

    pub fn contains(&self, function_id: &str) -> bool {
        self.commands.read().contains_key(function_id)
    }

    pub fn function_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.commands.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.function_ids())
            .finish()
    }
}
