//! Exclusive tunnels.
//!
//! A tunnel gives one task a private, ordered conversation with one
//! connection: the router hands it every frame that connection sends, and
//! the tunnel's own outbound queue is forwarded to the connection's sink
//! by a small task. Closing the tunnel flushes that queue first, so an
//! exchange can end with "send the last frame, then close" and nothing is
//! lost.

use std::time::Duration;

use mutclip_protocol::{ConnectionId, Message};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::router::{Registration, Router, Sink};
use crate::RouterError;

/// An open tunnel to one connection. See the [module docs](self).
///
/// Dropping a tunnel without [`close`](Tunnel::close) aborts it: the
/// routing rule is removed and anything still queued outbound is
/// discarded.
#[derive(Debug)]
pub struct Tunnel {
    id: ConnectionId,
    serial: u64,
    router: Router,
    inbound: mpsc::Receiver<Message>,
    outbound: Option<mpsc::Sender<Message>>,
    scope: CancellationToken,
    forwarder: Option<JoinHandle<()>>,
}

pub(crate) fn spawn(
    router: Router,
    id: ConnectionId,
    serial: u64,
    registration: Registration,
    inbound: mpsc::Receiver<Message>,
) -> Tunnel {
    let (out_tx, out_rx) = mpsc::channel(router.inner.config.queue_capacity.max(1));
    let scope = registration.scope.child_token();
    let forwarder = tokio::spawn(forward(
        id,
        out_rx,
        registration.sink,
        scope.clone(),
        router.inner.scope.clone(),
    ));

    Tunnel {
        id,
        serial,
        router,
        inbound,
        outbound: Some(out_tx),
        scope,
        forwarder: Some(forwarder),
    }
}

impl Tunnel {
    /// The connection on the other end.
    pub fn connection(&self) -> ConnectionId {
        self.id
    }

    /// Cancelled when the connection ends, the clip ends, or the tunnel
    /// is aborted.
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Queues a frame for the connection.
    ///
    /// # Errors
    /// `RouterError::Closed` once the tunnel's scope is cancelled.
    pub async fn send(&self, message: Message) -> Result<(), RouterError> {
        let outbound = self.outbound.as_ref().ok_or(RouterError::Closed(self.id))?;
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(RouterError::Closed(self.id)),
            sent = outbound.send(message) => sent.map_err(|_| RouterError::Closed(self.id)),
        }
    }

    /// Waits for the next frame from the connection.
    ///
    /// # Errors
    /// `RouterError::Closed` once the tunnel's scope is cancelled.
    pub async fn recv(&mut self) -> Result<Message, RouterError> {
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => Err(RouterError::Closed(self.id)),
            next = self.inbound.recv() => next.ok_or(RouterError::Closed(self.id)),
        }
    }

    /// [`recv`](Tunnel::recv) with a deadline.
    ///
    /// # Errors
    /// `RouterError::Timeout` if nothing arrives in time, otherwise as
    /// [`recv`](Tunnel::recv).
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message, RouterError> {
        let id = self.id;
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RouterError::Timeout(id))?
    }

    /// Closes the tunnel gracefully.
    ///
    /// The routing rule is removed first, so frames the connection sends
    /// from here on reach the drain again. Then the outbound queue is
    /// flushed to the sink before this returns.
    pub async fn close(mut self) {
        self.release();
        drop(self.outbound.take());
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }
        debug!(id = %self.id, serial = self.serial, "tunnel closed");
    }

    fn release(&self) {
        self.router
            .inner
            .tunnels
            .remove_if(&self.id, |_, rule| rule.serial == self.serial);
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.release();
        if self.forwarder.is_some() {
            self.scope.cancel();
            debug!(id = %self.id, serial = self.serial, "tunnel aborted");
        }
    }
}

/// Moves frames from the tunnel's outbound queue to the connection's sink.
///
/// Ends when the queue is closed and drained, or when either scope ends.
/// Cancels the tunnel scope on the way out so a pending `recv` wakes up.
async fn forward(
    id: ConnectionId,
    mut outbound: mpsc::Receiver<Message>,
    sink: Sink,
    scope: CancellationToken,
    router_scope: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            _ = router_scope.cancelled() => break,
            next = outbound.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };
        let sent = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            sent = sink.send(message) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
    scope.cancel();
    trace!(%id, "tunnel forwarder stopped");
}
