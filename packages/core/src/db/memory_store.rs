//! In-memory backend: nothing is persisted, every mutation completes at once.

use super::backend::{BackendKind, GraphBackend, Mutation};
use super::error::Result;
use super::sync::SyncTicket;
use crate::models::{EdgeDump, NodeDump};
use async_trait::async_trait;

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

impl MemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn wants_dumps(&self) -> bool {
        false
    }

    fn apply(&self, _mutation: Mutation) -> Result<SyncTicket> {
        Ok(SyncTicket::done())
    }

    async fn add_all(&self, _nodes: Vec<NodeDump>, _edges: Vec<EdgeDump>) -> Result<()> {
        Ok(())
    }
}
