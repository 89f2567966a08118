//! Action Records
//!
//! An action is one executed (or executable) command: the identifier of the
//! registered command function, its serialized parameter, and descriptive
//! metadata. The value references an action requires, creates and removes
//! are not stored on the record; they are `requires`/`creates`/`removes`
//! edges maintained by the graph store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broad classification shared by actions and value references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectCategory {
    #[default]
    Data,
    Selection,
    Visual,
    Layout,
    Logic,
    Custom,
    Annotation,
}

impl ObjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectCategory::Data => "data",
            ObjectCategory::Selection => "selection",
            ObjectCategory::Visual => "visual",
            ObjectCategory::Layout => "layout",
            ObjectCategory::Logic => "logic",
            ObjectCategory::Custom => "custom",
            ObjectCategory::Annotation => "annotation",
        }
    }
}

/// What an action does to the objects it touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOperation {
    Create,
    #[default]
    Update,
    Remove,
}

/// Descriptive metadata of an action
///
/// # Examples
///
/// ```rust
/// use trailgraph_core::models::{ActionMeta, ObjectCategory};
///
/// let meta = ActionMeta::new("Filter rows", ObjectCategory::Data).with_user("ana");
/// assert_eq!(meta.name, "Filter rows");
/// assert_eq!(meta.user, "ana");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMeta {
    pub name: String,
    pub category: ObjectCategory,
    pub operation: ActionOperation,
    pub user: String,
    pub timestamp: DateTime<Utc>,
}

impl ActionMeta {
    pub fn new(name: impl Into<String>, category: ObjectCategory) -> Self {
        Self {
            name: name.into(),
            category,
            operation: ActionOperation::default(),
            user: "anonymous".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_operation(mut self, operation: ActionOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

/// Action record stored in the provenance graph
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNode {
    pub meta: ActionMeta,
    /// Identifier of the command function in the command registry
    pub function_id: String,
    pub parameter: Value,
    /// False for copies made by a fork until they ran for the first time
    pub once_executed: bool,
}

impl ActionNode {
    pub fn new(meta: ActionMeta, function_id: impl Into<String>, parameter: Value) -> Self {
        Self {
            meta,
            function_id: function_id.into(),
            parameter,
            once_executed: true,
        }
    }

    /// A copy of this action that still has to run to link its outputs
    pub fn unexecuted_copy(&self) -> Self {
        Self {
            once_executed: false,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub(crate) fn to_attrs(&self) -> ActionAttrs {
        ActionAttrs {
            meta: self.meta.clone(),
            function_id: self.function_id.clone(),
            parameter: self.parameter.clone(),
            once_executed: self.once_executed,
        }
    }

    pub(crate) fn from_attrs(attrs: ActionAttrs) -> Self {
        Self {
            meta: attrs.meta,
            function_id: attrs.function_id,
            parameter: attrs.parameter,
            once_executed: attrs.once_executed,
        }
    }
}

/// Serialized attributes of an action record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAttrs {
    #[serde(flatten)]
    pub meta: ActionMeta,
    pub function_id: String,
    #[serde(default)]
    pub parameter: Value,
    #[serde(default = "executed_by_default")]
    pub once_executed: bool,
}

fn executed_by_default() -> bool {
    true
}
