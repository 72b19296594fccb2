//! The router: connection table, inbound dispatch and outbound delivery.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mutclip_protocol::{ConnectionId, Message};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::tunnel::{self, Tunnel};
use crate::{RouterConfig, RouterError};

/// Global counter for connection ids. Ids are never reused within a
/// process, so a stale id can only ever miss, never hit a newer connection.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound queue of one connection. The transport adapter owns the
/// receiving half and writes whatever arrives to the socket.
pub type Sink = mpsc::Sender<Message>;

/// The queue the clip engine reads: every inbound frame that isn't claimed
/// by a tunnel.
pub type Drain = mpsc::Receiver<Inbound>;

/// One inbound frame, tagged with the connection it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub from: ConnectionId,
    pub message: Message,
}

#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub(crate) sink: Sink,
    pub(crate) scope: CancellationToken,
}

/// Concurrent map from connection id to its outbound sink.
///
/// A router normally builds its own, but it can be handed one through
/// [`Router::with_table`] so tests (or a future cross-clip admin view) can
/// look at registrations directly.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: DashMap<ConnectionId, Registration>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Snapshot of the registered ids, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    // Clones out of the map so no shard lock is held across an await.
    pub(crate) fn get(&self, id: ConnectionId) -> Option<Registration> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    fn insert(&self, id: ConnectionId, registration: Registration) {
        self.entries.insert(id, registration);
    }

    fn remove(&self, id: ConnectionId) {
        self.entries.remove(&id);
    }

    fn snapshot_except(&self, except: &HashSet<ConnectionId>) -> Vec<(ConnectionId, Registration)> {
        self.entries
            .iter()
            .filter(|e| !except.contains(e.key()))
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

/// A tunnel rule: frames from this connection go to `inbound` instead of
/// the drain. `serial` lets a closing tunnel remove only its own rule.
#[derive(Debug)]
pub(crate) struct TunnelRule {
    pub(crate) serial: u64,
    pub(crate) inbound: mpsc::Sender<Message>,
}

#[derive(Debug)]
pub(crate) struct RouterInner {
    pub(crate) config: RouterConfig,
    pub(crate) conns: Arc<ConnectionTable>,
    pub(crate) tunnels: DashMap<ConnectionId, TunnelRule>,
    pub(crate) drain: mpsc::Sender<Inbound>,
    pub(crate) scope: CancellationToken,
    next_tunnel: AtomicU64,
}

/// Per-clip router. Cheap to clone; all clones share the same tables.
///
/// The router is bound to a scope (the clip's lifetime). When that scope
/// is cancelled every registration is dropped after the grace delay and
/// every open tunnel is closed.
#[derive(Debug, Clone)]
pub struct Router {
    pub(crate) inner: Arc<RouterInner>,
}

impl Router {
    /// Creates a router with a fresh connection table.
    ///
    /// Returns the router and the receiving end of its drain queue, which
    /// belongs to whoever processes untunnelled frames (the clip engine).
    pub fn new(config: RouterConfig, scope: CancellationToken) -> (Self, Drain) {
        Self::with_table(config, scope, Arc::new(ConnectionTable::new()))
    }

    /// Like [`Router::new`], with a caller-supplied connection table.
    pub fn with_table(
        config: RouterConfig,
        scope: CancellationToken,
        conns: Arc<ConnectionTable>,
    ) -> (Self, Drain) {
        let (drain_tx, drain_rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = RouterInner {
            config,
            conns,
            tunnels: DashMap::new(),
            drain: drain_tx,
            scope,
            next_tunnel: AtomicU64::new(1),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            drain_rx,
        )
    }

    /// The scope this router lives in.
    pub fn scope(&self) -> &CancellationToken {
        &self.inner.scope
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// The table of live registrations.
    pub fn connections(&self) -> &ConnectionTable {
        &self.inner.conns
    }

    /// Registers a connection and returns its freshly minted id.
    ///
    /// The registration lasts until `scope` (or the router's own scope) is
    /// cancelled, plus the grace delay.
    pub fn connect(&self, sink: Sink, scope: CancellationToken) -> ConnectionId {
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.conns.insert(
            id,
            Registration {
                sink,
                scope: scope.clone(),
            },
        );
        debug!(%id, "connection registered");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = scope.cancelled() => {}
                _ = inner.scope.cancelled() => {}
            }
            tokio::time::sleep(inner.config.grace).await;
            inner.conns.remove(id);
            debug!(%id, "connection removed");
        });

        id
    }

    /// Returns the inbound handle for a registered connection.
    ///
    /// # Errors
    /// `RouterError::NotFound` if the id isn't registered.
    pub fn ingress(&self, id: ConnectionId) -> Result<Ingress, RouterError> {
        if !self.inner.conns.contains(id) {
            return Err(RouterError::NotFound(id));
        }
        Ok(Ingress {
            id,
            router: self.clone(),
        })
    }

    /// Queues one message on a connection's sink.
    ///
    /// Waits for queue space, but gives up as soon as the connection is
    /// cancelled.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `Closed` if the connection ended.
    pub async fn send(&self, id: ConnectionId, message: Message) -> Result<(), RouterError> {
        let registration = self
            .inner
            .conns
            .get(id)
            .ok_or(RouterError::NotFound(id))?;
        deliver(id, &registration, message).await
    }

    /// Sends `message` to every registered connection not in `except`.
    ///
    /// Best-effort: a failure on one connection is logged and doesn't stop
    /// delivery to the others. Returns how many connections got it.
    pub async fn broadcast(&self, message: &Message, except: &HashSet<ConnectionId>) -> usize {
        let targets = self.inner.conns.snapshot_except(except);
        let mut delivered = 0;
        for (id, registration) in targets {
            match deliver(id, &registration, message.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(%id, error = %e, "broadcast skipped connection"),
            }
        }
        trace!(kind = message.kind(), delivered, "broadcast done");
        delivered
    }

    /// Cancels a connection's scope. The transport adapter notices and
    /// closes the socket; the registration goes away after the grace delay.
    ///
    /// # Errors
    /// `RouterError::NotFound` if the id isn't registered.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), RouterError> {
        let registration = self
            .inner
            .conns
            .get(id)
            .ok_or(RouterError::NotFound(id))?;
        registration.scope.cancel();
        debug!(%id, "connection disconnected");
        Ok(())
    }

    /// Returns `true` while a tunnel is open for the connection.
    pub fn has_tunnel(&self, id: ConnectionId) -> bool {
        self.inner.tunnels.contains_key(&id)
    }

    /// Opens an exclusive tunnel to a connection.
    ///
    /// From now until the tunnel is closed or dropped, every inbound frame
    /// from `id` goes to the tunnel instead of the drain, and the tunnel's
    /// outbound frames are forwarded to the connection's sink.
    ///
    /// # Errors
    /// - `DuplicateTunnel` if the connection already has one.
    /// - `NotFound` if the id isn't registered.
    /// - `Closed` if the connection has already been cancelled.
    pub fn open_tunnel(&self, id: ConnectionId) -> Result<Tunnel, RouterError> {
        if self.inner.tunnels.contains_key(&id) {
            return Err(RouterError::DuplicateTunnel(id));
        }
        let registration = self
            .inner
            .conns
            .get(id)
            .ok_or(RouterError::NotFound(id))?;
        if registration.scope.is_cancelled() {
            return Err(RouterError::Closed(id));
        }

        let capacity = self.inner.config.queue_capacity.max(1);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let serial = self.inner.next_tunnel.fetch_add(1, Ordering::Relaxed);

        match self.inner.tunnels.entry(id) {
            Entry::Occupied(_) => return Err(RouterError::DuplicateTunnel(id)),
            Entry::Vacant(slot) => {
                slot.insert(TunnelRule {
                    serial,
                    inbound: in_tx,
                });
            }
        }
        debug!(%id, serial, "tunnel opened");

        Ok(tunnel::spawn(self.clone(), id, serial, registration, in_rx))
    }
}

/// The transport adapter's handle for pushing inbound frames.
///
/// Each frame goes to the connection's tunnel if one is open, otherwise to
/// the drain.
#[derive(Debug, Clone)]
pub struct Ingress {
    id: ConnectionId,
    router: Router,
}

impl Ingress {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Dispatches one inbound frame.
    ///
    /// Waits while the destination queue is full. That back-pressure is
    /// what stops a flooding client: its reader simply stops reading.
    ///
    /// # Errors
    /// `RouterError::Shutdown` if the drain is gone or the router's scope
    /// ended while waiting.
    pub async fn push(&self, message: Message) -> Result<(), RouterError> {
        let inner = &self.router.inner;

        let tunnel = inner.tunnels.get(&self.id).map(|rule| rule.inbound.clone());
        let message = match tunnel {
            Some(tx) => match tx.send(message).await {
                Ok(()) => return Ok(()),
                // The tunnel went away between lookup and send.
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let inbound = Inbound {
            from: self.id,
            message,
        };
        tokio::select! {
            biased;
            _ = inner.scope.cancelled() => Err(RouterError::Shutdown),
            sent = inner.drain.send(inbound) => sent.map_err(|_| RouterError::Shutdown),
        }
    }
}

async fn deliver(
    id: ConnectionId,
    registration: &Registration,
    message: Message,
) -> Result<(), RouterError> {
    tokio::select! {
        biased;
        _ = registration.scope.cancelled() => Err(RouterError::Closed(id)),
        sent = registration.sink.send(message) => sent.map_err(|_| RouterError::Closed(id)),
    }
}
