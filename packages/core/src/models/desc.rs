//! Graph Descriptions
//!
//! A description identifies a stored provenance graph and carries the
//! metadata graph managers list and edit without loading the graph itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `attrs.graphtype` of every provenance graph description
pub const PROVENANCE_GRAPH_TYPE: &str = "provenance_graph";

pub const PERMISSION_READ: u32 = 0b100;
pub const PERMISSION_WRITE: u32 = 0b010;
pub const PERMISSION_EXECUTE: u32 = 0b001;
/// Owner may do everything, everybody else may read
pub const DEFAULT_PERMISSIONS: u32 = 0o744;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphAttrs {
    pub graphtype: String,
    /// Application the graph belongs to
    pub of: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDesc {
    pub id: String,
    pub name: String,
    pub fqname: String,
    #[serde(default)]
    pub description: String,
    pub creator: String,
    pub ts: DateTime<Utc>,
    /// `[nodes, edges]`
    #[serde(default)]
    pub size: [usize; 2],
    pub attrs: GraphAttrs,
    #[serde(default)]
    pub local: bool,
    #[serde(default = "default_permissions")]
    pub permissions: u32,
}

fn default_permissions() -> u32 {
    DEFAULT_PERMISSIONS
}

impl GraphDesc {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        application: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            fqname: name.clone(),
            name,
            description: String::new(),
            creator: creator.into(),
            ts: Utc::now(),
            size: [0, 0],
            attrs: GraphAttrs {
                graphtype: PROVENANCE_GRAPH_TYPE.to_string(),
                of: application.into(),
            },
            local: false,
            permissions: DEFAULT_PERMISSIONS,
        }
    }

    /// Throw-away description for graphs that live only in memory
    pub fn in_memory(application: impl Into<String>) -> Self {
        let mut desc = Self::new("memory", "Temporary Session", application, "anonymous");
        desc.fqname = "provenance_graphs/Temporary Session".to_string();
        desc.local = true;
        desc
    }

    pub fn is_provenance_graph_of(&self, application: &str) -> bool {
        self.attrs.graphtype == PROVENANCE_GRAPH_TYPE && self.attrs.of == application
    }

    pub fn can_write(&self) -> bool {
        // owner bits
        (self.permissions >> 6) & PERMISSION_WRITE != 0
    }
}

/// Partial update of a description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
}

impl DescPatch {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, desc: &mut GraphDesc) {
        if let Some(name) = &self.name {
            desc.name = name.clone();
            desc.fqname = format!("provenance_graphs/{}", name);
        }
        if let Some(description) = &self.description {
            desc.description = description.clone();
        }
        if let Some(creator) = &self.creator {
            desc.creator = creator.clone();
        }
        if let Some(permissions) = self.permissions {
            desc.permissions = permissions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_updates_name_and_fqname() {
        let mut desc = GraphDesc::new("g0", "Old", "app", "me");
        DescPatch::named("New").apply_to(&mut desc);
        assert_eq!(desc.name, "New");
        assert_eq!(desc.fqname, "provenance_graphs/New");
        assert_eq!(desc.creator, "me");
    }

    #[test]
    fn provenance_graph_filter() {
        let desc = GraphDesc::new("g0", "n", "app", "me");
        assert!(desc.is_provenance_graph_of("app"));
        assert!(!desc.is_provenance_graph_of("other"));
        assert!(desc.can_write());
    }

    #[test]
    fn description_serializes_camel_case() {
        let json = serde_json::to_value(GraphDesc::in_memory("app")).unwrap();
        assert_eq!(json["attrs"]["graphtype"], PROVENANCE_GRAPH_TYPE);
        assert_eq!(json["local"], true);
    }
}
