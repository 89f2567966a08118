//! State Snapshots

use serde::{Deserialize, Serialize};

/// A point in the exploration history
///
/// A state is produced by exactly one non-inverse action (incoming
/// `resultsIn`), may be followed by several actions (outgoing `next`, one per
/// branch) and lists the value references alive in it (outgoing
/// `consistsOf`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateNode {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Optional data-url or link to a rendered preview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// How long the state is shown when replayed, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl StateNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
