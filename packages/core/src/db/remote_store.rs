//! Remote Store Backend
//!
//! Batches store mutations and sends them through a [`RemoteTransport`]
//! instead of issuing one request per edit.
//!
//! # Flush triggers
//!
//! - the queue reaches `batch_size` entries: flush immediately
//! - nothing was enqueued for `early_flush_delay`: flush (idle coalescing)
//! - the oldest queued entry waited `full_flush_delay`: flush, even while
//!   mutations keep arriving
//! - [`RemoteStoreBackend::flush`] is called
//!
//! A background task owns the timers. Each flush runs in its own task and
//! takes a send lock before draining the queue, so batches leave in enqueue
//! order even when flushes overlap.
//!
//! # Failures
//!
//! A rejected batch is not retried. Every ticket of the batch resolves with
//! the same [`BackendSyncError`] and the batch is parked; callers can inspect
//! it with [`rejected_batches`](RemoteStoreBackend::rejected_batches) and
//! either [`requeue_rejected`](RemoteStoreBackend::requeue_rejected) or
//! [`discard_rejected`](RemoteStoreBackend::discard_rejected) it.

use super::backend::{BackendKind, GraphBackend, Mutation};
use super::error::{BackendSyncError, GraphError, Result};
use super::events::{EventBus, ProvenanceEvent};
use super::sync::{SyncHandle, SyncResult, SyncTicket};
use super::transport::RemoteTransport;
use crate::config::RemoteSyncConfig;
use crate::models::{EdgeDump, NodeDump};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

struct QueuedMutation {
    mutation: Mutation,
    ack: oneshot::Sender<SyncResult>,
}

/// A batch the transport refused
#[derive(Debug, Clone)]
pub struct RejectedBatch {
    pub mutations: Vec<Mutation>,
    pub error: BackendSyncError,
}

enum FlushSignal {
    Enqueued,
    FlushNow(Option<oneshot::Sender<SyncResult>>),
}

struct RemoteShared {
    graph_id: String,
    transport: Arc<dyn RemoteTransport>,
    queue: Mutex<VecDeque<QueuedMutation>>,
    rejected: Mutex<Vec<RejectedBatch>>,
    active: AtomicUsize,
    send_lock: tokio::sync::Mutex<()>,
    events: Mutex<Option<EventBus>>,
}

impl RemoteShared {
    fn emit(&self, event: ProvenanceEvent) {
        if let Some(bus) = self.events.lock().as_ref() {
            bus.emit(event);
        }
    }
}

pub struct RemoteStoreBackend {
    shared: Arc<RemoteShared>,
    config: RemoteSyncConfig,
    signal_tx: mpsc::UnboundedSender<FlushSignal>,
}

impl RemoteStoreBackend {
    /// Creates the backend and starts its flush task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        graph_id: impl Into<String>,
        transport: Arc<dyn RemoteTransport>,
        config: RemoteSyncConfig,
    ) -> Self {
        let shared = Arc::new(RemoteShared {
            graph_id: graph_id.into(),
            transport,
            queue: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            send_lock: tokio::sync::Mutex::new(()),
            events: Mutex::new(None),
        });
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_flush_loop(
            Arc::clone(&shared),
            signal_rx,
            config.early_flush_delay(),
            config.full_flush_delay(),
        ));

        tracing::debug!(
            "Remote backend for graph {} started (batch_size={}, early={}ms, full={}ms)",
            shared.graph_id,
            config.batch_size,
            config.early_flush_delay_ms,
            config.full_flush_delay_ms
        );

        Self {
            shared,
            config,
            signal_tx,
        }
    }

    pub fn graph_id(&self) -> &str {
        &self.shared.graph_id
    }

    pub fn config(&self) -> &RemoteSyncConfig {
        &self.config
    }

    /// Number of mutations waiting for the next flush
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn rejected_batches(&self) -> Vec<RejectedBatch> {
        self.shared.rejected.lock().clone()
    }

    /// Puts every rejected mutation back at the head of the queue and flushes
    pub fn requeue_rejected(&self) -> SyncHandle {
        let batches: Vec<RejectedBatch> = std::mem::take(&mut *self.shared.rejected.lock());
        if batches.is_empty() {
            return SyncHandle::ready();
        }

        let mut tickets = Vec::new();
        let mut requeued = Vec::new();
        for mutation in batches.into_iter().flat_map(|b| b.mutations) {
            let (ack, rx) = oneshot::channel();
            tickets.push(SyncTicket::deferred(rx));
            requeued.push(QueuedMutation { mutation, ack });
        }
        tracing::info!(
            "Requeueing {} rejected mutation(s) for graph {}",
            requeued.len(),
            self.shared.graph_id
        );
        {
            let mut queue = self.shared.queue.lock();
            for item in requeued.into_iter().rev() {
                queue.push_front(item);
            }
        }
        let _ = self.signal_tx.send(FlushSignal::FlushNow(None));
        SyncHandle::from_tickets(tickets)
    }

    /// Drops every parked batch, returning how many mutations were discarded
    pub fn discard_rejected(&self) -> usize {
        let batches = std::mem::take(&mut *self.shared.rejected.lock());
        batches.iter().map(|b| b.mutations.len()).sum()
    }
}

#[async_trait]
impl GraphBackend for RemoteStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn attach_events(&self, events: EventBus) {
        *self.shared.events.lock() = Some(events);
    }

    fn apply(&self, mutation: Mutation) -> Result<SyncTicket> {
        let (ack, rx) = oneshot::channel();
        tracing::trace!(
            "Queueing {} for remote graph {}",
            mutation.op_name(),
            self.shared.graph_id
        );
        let len = {
            let mut queue = self.shared.queue.lock();
            queue.push_back(QueuedMutation { mutation, ack });
            queue.len()
        };
        let signal = if len >= self.config.batch_size {
            FlushSignal::FlushNow(None)
        } else {
            FlushSignal::Enqueued
        };
        if self.signal_tx.send(signal).is_err() {
            return Err(BackendSyncError::abandoned().into());
        }
        Ok(SyncTicket::deferred(rx))
    }

    async fn add_all(&self, nodes: Vec<NodeDump>, edges: Vec<EdgeDump>) -> Result<()> {
        tracing::debug!(
            "Bulk import into remote graph {}: {} nodes, {} edges",
            self.shared.graph_id,
            nodes.len(),
            edges.len()
        );
        self.shared
            .transport
            .import(&self.shared.graph_id, &nodes, &edges)
            .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.signal_tx
            .send(FlushSignal::FlushNow(Some(done_tx)))
            .map_err(|_| GraphError::from(BackendSyncError::abandoned()))?;
        done_rx
            .await
            .unwrap_or_else(|_| Err(BackendSyncError::abandoned()))?;
        Ok(())
    }

    fn active_sync_operations(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

async fn run_flush_loop(
    shared: Arc<RemoteShared>,
    mut signal_rx: mpsc::UnboundedReceiver<FlushSignal>,
    early_delay: Duration,
    full_delay: Duration,
) {
    let mut idle_deadline: Option<Instant> = None;
    let mut hard_deadline: Option<Instant> = None;

    loop {
        let deadline = match (idle_deadline, hard_deadline) {
            (Some(idle), Some(hard)) => Some(idle.min(hard)),
            (idle, hard) => idle.or(hard),
        };
        let sleep_target = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            biased;

            signal = signal_rx.recv() => match signal {
                Some(FlushSignal::Enqueued) => {
                    let now = Instant::now();
                    idle_deadline = Some(now + early_delay);
                    hard_deadline.get_or_insert(now + full_delay);
                }
                Some(FlushSignal::FlushNow(done)) => {
                    idle_deadline = None;
                    hard_deadline = None;
                    spawn_flush(Arc::clone(&shared), done);
                }
                None => {
                    // backend dropped: push out what is left, then stop
                    let _ = flush_queue(&shared).await;
                    tracing::debug!("Remote flush loop for graph {} stopped", shared.graph_id);
                    break;
                }
            },

            _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {
                idle_deadline = None;
                hard_deadline = None;
                spawn_flush(Arc::clone(&shared), None);
            }
        }
    }
}

fn spawn_flush(shared: Arc<RemoteShared>, done: Option<oneshot::Sender<SyncResult>>) {
    shared.active.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        let result = flush_queue(&shared).await;
        shared.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(done) = done {
            let _ = done.send(result);
        }
    });
}

async fn flush_queue(shared: &RemoteShared) -> SyncResult {
    let _send_guard = shared.send_lock.lock().await;
    let batch: Vec<QueuedMutation> = shared.queue.lock().drain(..).collect();
    if batch.is_empty() {
        return Ok(());
    }

    let (mutations, acks): (Vec<Mutation>, Vec<oneshot::Sender<SyncResult>>) =
        batch.into_iter().map(|q| (q.mutation, q.ack)).unzip();
    let batch_len = mutations.len();
    shared.emit(ProvenanceEvent::SyncStarted {
        graph_id: shared.graph_id.clone(),
        batch_len,
    });

    let result = match shared.transport.send_batch(&shared.graph_id, &mutations).await {
        Ok(()) => {
            tracing::debug!(
                "Flushed {} mutation(s) to remote graph {}",
                batch_len,
                shared.graph_id
            );
            Ok(())
        }
        Err(err) => {
            let error = BackendSyncError::new(&shared.graph_id, batch_len, err.to_string());
            tracing::warn!("{}", error);
            shared.rejected.lock().push(RejectedBatch {
                mutations,
                error: error.clone(),
            });
            Err(error)
        }
    };

    for ack in acks {
        let _ = ack.send(result.clone());
    }
    shared.emit(ProvenanceEvent::SyncFinished {
        graph_id: shared.graph_id.clone(),
        batch_len,
        ok: result.is_ok(),
    });
    result
}
