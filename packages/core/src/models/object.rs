//! Value References
//!
//! Object nodes are the graph's handle on application values. Two object
//! nodes sharing the same [`ValueSlot`] observe the same value, which is how
//! a command's created objects stay connected to the records that mention
//! them.

use super::action::ObjectCategory;
use super::value::{Payload, PersistedValue, ValueContext, ValueSlot};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ObjectNode {
    pub name: String,
    pub category: ObjectCategory,
    pub hash: String,
    pub description: String,
    slot: Arc<ValueSlot>,
}

impl ObjectNode {
    /// Creates a reference holding `payload`; the hash defaults to `{name}_{category}`
    pub fn new(
        name: impl Into<String>,
        category: ObjectCategory,
        payload: Option<Payload>,
        context: ValueContext,
    ) -> Self {
        let name = name.into();
        Self {
            hash: default_hash(&name, category),
            name,
            category,
            description: String::new(),
            slot: ValueSlot::new(payload, context),
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub(crate) fn from_proxy(proxy: &ObjectProxy, context: ValueContext) -> Self {
        Self {
            name: proxy.name.clone(),
            category: proxy.category,
            hash: proxy
                .hash
                .clone()
                .unwrap_or_else(|| default_hash(&proxy.name, proxy.category)),
            description: proxy.description.clone(),
            slot: ValueSlot::new(proxy.value.clone(), context),
        }
    }

    /// Best-effort synchronous value access, see [`ValueSlot::value`]
    pub fn value(&self) -> Option<Payload> {
        ValueSlot::value(&self.slot)
    }

    /// Resolves the value, waiting for a pending dataset restore
    pub async fn v(&self) -> Option<Payload> {
        self.slot.v().await
    }

    /// Typed access to an opaque value
    pub fn value_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value().and_then(|p| p.downcast::<T>())
    }

    pub fn set_value(&self, payload: Option<Payload>) {
        self.slot.set(payload);
    }

    /// True if the reference lost its value (removed or unrestorable)
    pub fn is_detached(&self) -> bool {
        self.slot.is_empty()
    }

    pub(crate) fn live_value(&self) -> Option<Payload> {
        self.slot.peek()
    }

    pub(crate) fn shares_slot_with(&self, other: &ObjectNode) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    pub(crate) fn to_attrs(&self) -> ObjectAttrs {
        ObjectAttrs {
            name: self.name.clone(),
            category: self.category,
            hash: self.hash.clone(),
            description: self.description.clone(),
            v: self.slot.persist(),
        }
    }

    pub(crate) fn from_attrs(attrs: ObjectAttrs, context: ValueContext) -> Self {
        Self {
            name: attrs.name,
            category: attrs.category,
            hash: attrs.hash,
            description: attrs.description,
            slot: ValueSlot::from_persisted(attrs.v, context),
        }
    }
}

impl PartialEq for ObjectNode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.category == other.category
            && self.hash == other.hash
            && self.description == other.description
            && self.slot.persist() == other.slot.persist()
    }
}

pub fn default_hash(name: &str, category: ObjectCategory) -> String {
    format!("{}_{}", name, category.as_str())
}

/// Serialized attributes of an object record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectAttrs {
    pub name: String,
    pub category: ObjectCategory,
    pub hash: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub v: Option<PersistedValue>,
}

/// Description of an object that is not (yet) registered in a graph
///
/// Commands return proxies for the objects they create; the orchestrator
/// turns them into object nodes, reusing an existing node when the proxy
/// matches one.
#[derive(Debug, Clone)]
pub struct ObjectProxy {
    pub name: String,
    pub category: ObjectCategory,
    pub hash: Option<String>,
    pub description: String,
    pub value: Option<Payload>,
}

impl ObjectProxy {
    pub fn new(name: impl Into<String>, category: ObjectCategory, value: Option<Payload>) -> Self {
        Self {
            name: name.into(),
            category,
            hash: None,
            description: String::new(),
            value,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn effective_hash(&self) -> String {
        self.hash
            .clone()
            .unwrap_or_else(|| default_hash(&self.name, self.category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::value::Primitive;

    #[test]
    fn hash_defaults_to_name_and_category() {
        let node = ObjectNode::new("cars", ObjectCategory::Data, None, ValueContext::new());
        assert_eq!(node.hash, "cars_data");
    }

    #[test]
    fn clones_share_the_value_slot() {
        let node = ObjectNode::new("n", ObjectCategory::Logic, None, ValueContext::new());
        let alias = node.clone();
        node.set_value(Some(Payload::primitive(7i64)));
        assert_eq!(
            alias.value().and_then(|p| p.as_primitive().cloned()),
            Some(Primitive::Number(7.0))
        );
        assert!(alias.shares_slot_with(&node));
    }

    #[test]
    fn attrs_keep_persisted_value() {
        let node = ObjectNode::new(
            "title",
            ObjectCategory::Visual,
            Some(Payload::primitive("hello")),
            ValueContext::new(),
        );
        let restored = ObjectNode::from_attrs(node.to_attrs(), ValueContext::new());
        assert_eq!(restored, node);
        assert!(!restored.shares_slot_with(&node));
    }
}
