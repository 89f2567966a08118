//! Deferred Values
//!
//! A value reference does not own the application value directly. It holds a
//! [`ValueSlot`] that is either empty, holds a live [`Payload`], or holds the
//! persisted form of a payload that has not been materialized yet (after a
//! restore). Materialization goes through the collaborators in
//! [`ValueContext`]: an [`ElementRegistry`] for id-identified elements and a
//! [`DatasetCache`] for nested persistable datasets.
//!
//! # Persisted form
//!
//! | payload   | persisted JSON                          |
//! |-----------|-----------------------------------------|
//! | element   | `{"type":"element","id":..}`            |
//! | dataset   | `{"type":"dataset","id":..,"persist":..}` |
//! | primitive | `{"type":"primitive","v":..}`           |
//! | opaque    | `null`                                  |

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Scalar payload that is persisted inline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Bool(value)
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Number(value)
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::Number(value as f64)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::Text(value.to_string())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::Text(value)
    }
}

/// An application object that can be found again by its id
pub trait Element: Send + Sync + fmt::Debug {
    fn element_id(&self) -> Option<String>;
    fn as_any(&self) -> &dyn Any;
}

/// A nested dataset that knows how to describe itself for persistence
pub trait Dataset: Send + Sync + fmt::Debug {
    fn dataset_id(&self) -> &str;
    fn persist(&self) -> Value;
    fn as_any(&self) -> &dyn Any;
}

/// Errors raised while materializing a persisted dataset
#[derive(Error, Debug, Clone)]
pub enum DatasetError {
    #[error("Dataset '{id}' could not be loaded: {message}")]
    LoadFailed { id: String, message: String },
}

impl DatasetError {
    pub fn load_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Lookup of live elements by id
pub trait ElementRegistry: Send + Sync {
    fn element_by_id(&self, id: &str) -> Option<Arc<dyn Element>>;
}

/// Content-addressable cache of restored datasets
#[async_trait]
pub trait DatasetCache: Send + Sync {
    /// Returns an already loaded dataset without loading it
    fn peek(&self, id: &str) -> Option<Arc<dyn Dataset>>;

    /// Returns the dataset for `id`, loading it from its persisted form if needed
    async fn get(&self, id: &str, persisted: &Value)
        -> Result<Option<Arc<dyn Dataset>>, DatasetError>;
}

/// In-process element registry
#[derive(Default)]
pub struct MemoryElementRegistry {
    elements: RwLock<HashMap<String, Arc<dyn Element>>>,
}

impl MemoryElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an element under its own id; elements without id are ignored
    pub fn register(&self, element: Arc<dyn Element>) -> bool {
        match element.element_id() {
            Some(id) => {
                self.elements.write().insert(id, element);
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Element>> {
        self.elements.write().remove(id)
    }
}

impl ElementRegistry for MemoryElementRegistry {
    fn element_by_id(&self, id: &str) -> Option<Arc<dyn Element>> {
        self.elements.read().get(id).cloned()
    }
}

/// Collaborators used to materialize persisted values
#[derive(Clone, Default)]
pub struct ValueContext {
    pub datasets: Option<Arc<dyn DatasetCache>>,
    pub elements: Option<Arc<dyn ElementRegistry>>,
}

impl ValueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_datasets(mut self, datasets: Arc<dyn DatasetCache>) -> Self {
        self.datasets = Some(datasets);
        self
    }

    pub fn with_elements(mut self, elements: Arc<dyn ElementRegistry>) -> Self {
        self.elements = Some(elements);
        self
    }
}

impl fmt::Debug for ValueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueContext")
            .field("datasets", &self.datasets.is_some())
            .field("elements", &self.elements.is_some())
            .finish()
    }
}

/// A live application value
#[derive(Clone)]
pub enum Payload {
    Primitive(Primitive),
    Element(Arc<dyn Element>),
    Dataset(Arc<dyn Dataset>),
    /// Any other value; not persisted
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn primitive(value: impl Into<Primitive>) -> Self {
        Payload::Primitive(value.into())
    }

    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Opaque(Arc::new(value))
    }

    /// Identity for shared payloads, equality for primitives
    pub fn same_as(&self, other: &Payload) -> bool {
        match (self, other) {
            (Payload::Primitive(a), Payload::Primitive(b)) => a == b,
            (Payload::Element(a), Payload::Element(b)) => Arc::ptr_eq(a, b),
            (Payload::Dataset(a), Payload::Dataset(b)) => Arc::ptr_eq(a, b),
            (Payload::Opaque(a), Payload::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Payload::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Typed access to an opaque payload
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Payload::Opaque(value) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn persist(&self) -> Option<PersistedValue> {
        match self {
            Payload::Primitive(v) => Some(PersistedValue::Primitive { v: v.clone() }),
            Payload::Element(e) => Some(PersistedValue::Element {
                id: e.element_id(),
            }),
            Payload::Dataset(d) => Some(PersistedValue::Dataset {
                id: d.dataset_id().to_string(),
                persist: d.persist(),
            }),
            Payload::Opaque(_) => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Primitive(p) => f.debug_tuple("Primitive").field(p).finish(),
            Payload::Element(e) => f.debug_tuple("Element").field(e).finish(),
            Payload::Dataset(d) => f.debug_tuple("Dataset").field(d).finish(),
            Payload::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// Serialized form of a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PersistedValue {
    Element {
        #[serde(default)]
        id: Option<String>,
    },
    Dataset {
        id: String,
        persist: Value,
    },
    Primitive {
        v: Primitive,
    },
}

enum SlotState {
    Empty,
    Ready(Payload),
    Pending(PersistedValue),
    /// A background restore was started for this persisted value
    Restoring(PersistedValue),
}

/// Shared, lazily materialized value holder
pub struct ValueSlot {
    state: Mutex<SlotState>,
    context: ValueContext,
}

impl ValueSlot {
    pub fn new(payload: Option<Payload>, context: ValueContext) -> Arc<Self> {
        let state = match payload {
            Some(p) => SlotState::Ready(p),
            None => SlotState::Empty,
        };
        Arc::new(Self {
            state: Mutex::new(state),
            context,
        })
    }

    pub fn from_persisted(persisted: Option<PersistedValue>, context: ValueContext) -> Arc<Self> {
        let state = match persisted {
            Some(p) => SlotState::Pending(p),
            None => SlotState::Empty,
        };
        Arc::new(Self {
            state: Mutex::new(state),
            context,
        })
    }

    /// Synchronous best-effort access
    ///
    /// Primitives and elements are materialized in place. A dataset that is
    /// not in the cache yet is restored in the background when a tokio
    /// runtime is available and `None` is returned until it lands.
    pub fn value(slot: &Arc<ValueSlot>) -> Option<Payload> {
        let mut state = slot.state.lock();
        let pending = match &*state {
            SlotState::Ready(p) => return Some(p.clone()),
            SlotState::Empty | SlotState::Restoring(_) => return None,
            SlotState::Pending(p) => p.clone(),
        };

        match &pending {
            PersistedValue::Primitive { v } => {
                let payload = Payload::Primitive(v.clone());
                *state = SlotState::Ready(payload.clone());
                Some(payload)
            }
            PersistedValue::Element { id } => {
                let resolved = resolve_element(id.as_deref(), &slot.context);
                *state = match &resolved {
                    Some(p) => SlotState::Ready(p.clone()),
                    None => SlotState::Empty,
                };
                resolved
            }
            PersistedValue::Dataset { id, .. } => {
                if let Some(ds) = slot.context.datasets.as_ref().and_then(|c| c.peek(id)) {
                    let payload = Payload::Dataset(ds);
                    *state = SlotState::Ready(payload.clone());
                    return Some(payload);
                }
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    *state = SlotState::Restoring(pending.clone());
                    let slot = Arc::clone(slot);
                    handle.spawn(async move {
                        slot.v().await;
                    });
                }
                None
            }
        }
    }

    /// Resolves the value, waiting for a pending restore if necessary
    pub async fn v(&self) -> Option<Payload> {
        let pending = {
            let state = self.state.lock();
            match &*state {
                SlotState::Ready(p) => return Some(p.clone()),
                SlotState::Empty => return None,
                SlotState::Pending(p) | SlotState::Restoring(p) => p.clone(),
            }
        };

        let resolved = restore_payload(&pending, &self.context).await;

        let mut state = self.state.lock();
        match &*state {
            // a value set while restoring wins
            SlotState::Ready(p) => Some(p.clone()),
            SlotState::Empty => None,
            SlotState::Pending(_) | SlotState::Restoring(_) => {
                *state = match &resolved {
                    Some(p) => SlotState::Ready(p.clone()),
                    None => SlotState::Empty,
                };
                resolved
            }
        }
    }

    pub fn set(&self, payload: Option<Payload>) {
        *self.state.lock() = match payload {
            Some(p) => SlotState::Ready(p),
            None => SlotState::Empty,
        };
    }

    /// True when the slot neither holds nor can restore a value
    pub fn is_empty(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Empty)
    }

    /// Live payload, if already materialized; never triggers a restore
    pub fn peek(&self) -> Option<Payload> {
        match &*self.state.lock() {
            SlotState::Ready(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn persist(&self) -> Option<PersistedValue> {
        match &*self.state.lock() {
            SlotState::Ready(p) => p.persist(),
            SlotState::Pending(p) | SlotState::Restoring(p) => Some(p.clone()),
            SlotState::Empty => None,
        }
    }
}

impl fmt::Debug for ValueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            SlotState::Empty => "empty",
            SlotState::Ready(_) => "ready",
            SlotState::Pending(_) => "pending",
            SlotState::Restoring(_) => "restoring",
        };
        f.debug_struct("ValueSlot").field("state", &state).finish()
    }
}

fn resolve_element(id: Option<&str>, context: &ValueContext) -> Option<Payload> {
    let id = id?;
    context
        .elements
        .as_ref()
        .and_then(|registry| registry.element_by_id(id))
        .map(Payload::Element)
}

async fn restore_payload(persisted: &PersistedValue, context: &ValueContext) -> Option<Payload> {
    match persisted {
        PersistedValue::Primitive { v } => Some(Payload::Primitive(v.clone())),
        PersistedValue::Element { id } => resolve_element(id.as_deref(), context),
        PersistedValue::Dataset { id, persist } => {
            let cache = context.datasets.as_ref()?;
            match cache.get(id, persist).await {
                Ok(ds) => ds.map(Payload::Dataset),
                Err(err) => {
                    tracing::warn!("Failed to restore dataset '{}': {}", id, err);
                    None
                }
            }
        }
    }
}
