//! Sync acknowledgements
//!
//! Every store mutation yields a [`SyncTicket`]. Memory and local storage
//! backends hand out completed tickets; the remote backend hands out a
//! ticket that resolves once the batch carrying the mutation was
//! acknowledged (or rejected). The store folds the tickets of one operation
//! into a cloneable [`SyncHandle`].

use super::error::BackendSyncError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use tokio::sync::oneshot;

pub type SyncResult = Result<(), BackendSyncError>;

/// Acknowledgement of a single mutation
#[derive(Debug)]
pub struct SyncTicket {
    pending: Option<oneshot::Receiver<SyncResult>>,
}

impl SyncTicket {
    pub fn done() -> Self {
        Self { pending: None }
    }

    pub fn deferred(rx: oneshot::Receiver<SyncResult>) -> Self {
        Self { pending: Some(rx) }
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_none()
    }

    pub async fn wait(self) -> SyncResult {
        match self.pending {
            None => Ok(()),
            Some(rx) => rx.await.unwrap_or_else(|_| Err(BackendSyncError::abandoned())),
        }
    }
}

/// Awaitable acknowledgement of a group of mutations
#[derive(Clone)]
pub struct SyncHandle {
    inner: Shared<BoxFuture<'static, SyncResult>>,
}

impl SyncHandle {
    pub fn ready() -> Self {
        Self {
            inner: futures::future::ready(Ok(())).boxed().shared(),
        }
    }

    pub fn from_tickets(tickets: Vec<SyncTicket>) -> Self {
        let pending: Vec<SyncTicket> = tickets.into_iter().filter(|t| !t.is_done()).collect();
        if pending.is_empty() {
            return Self::ready();
        }
        let fut = async move {
            let results = futures::future::join_all(pending.into_iter().map(SyncTicket::wait)).await;
            results.into_iter().collect::<SyncResult>()
        };
        Self {
            inner: fut.boxed().shared(),
        }
    }

    /// Waits until every mutation is acknowledged; yields the first rejection
    pub async fn wait(&self) -> SyncResult {
        self.inner.clone().await
    }
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle")
            .field("resolved", &self.inner.peek().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_tickets_resolve_immediately() {
        let handle = SyncHandle::from_tickets(vec![SyncTicket::done(), SyncTicket::done()]);
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn handle_reports_first_rejection() {
        let (tx_ok, rx_ok) = oneshot::channel();
        let (tx_err, rx_err) = oneshot::channel();
        let handle =
            SyncHandle::from_tickets(vec![SyncTicket::deferred(rx_ok), SyncTicket::deferred(rx_err)]);

        tx_ok.send(Ok(())).unwrap();
        tx_err
            .send(Err(BackendSyncError::new("g", 2, "boom")))
            .unwrap();

        let copy = handle.clone();
        assert_eq!(handle.wait().await.unwrap_err().message, "boom");
        assert!(copy.wait().await.is_err());
    }

    #[test]
    fn deferred_ticket_waits_for_ack() {
        let (tx, rx) = oneshot::channel();
        let ticket = SyncTicket::deferred(rx);
        assert!(!ticket.is_done());

        let mut wait = tokio_test::task::spawn(ticket.wait());
        tokio_test::assert_pending!(wait.poll());
        tx.send(Ok(())).unwrap();
        assert!(wait.is_woken());
        tokio_test::assert_ready_ok!(wait.poll());
    }

    #[tokio::test]
    async fn dropped_sender_is_reported() {
        let (tx, rx) = oneshot::channel::<SyncResult>();
        drop(tx);
        assert!(SyncTicket::deferred(rx).wait().await.is_err());
    }
}
