//! The sync worker: delivers committed content and engine replies.
//!
//! The worker itself never touches a socket. It takes jobs in the order
//! the engine queued them and hands each one to per-member lanes:
//!
//! ```text
//!   engine ──jobs──▶ worker ──▶ lane(conn-1) ──▶ sink / tunnel
//!                           ├─▶ lane(conn-2) ──▶ sink / tunnel
//!                           └─▶ lane(conn-3) ──▶ sink / tunnel
//! ```
//!
//! A lane delivers its queue strictly in order, so every member sees
//! committed values in commit order, and a newcomer's first frame is the
//! latest committed value. Lanes run independently: a member that stalls
//! a download only holds up its own lane. A file download still running
//! when a newer value is committed is abandoned, since the lane has the
//! newer value queued behind it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use mutclip_protocol::{ClipId, ConnectionId, Message};
use mutclip_router::{Router, RouterError, Tunnel};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ClipError, Content, FileTransfer};

/// Work for the sync worker.
#[derive(Debug)]
pub(crate) enum SyncJob {
    /// Push the current content to a new connection, then admit it.
    Join(ConnectionId),

    /// New content was committed. `origin` gets an `Ack` once every other
    /// member has it.
    Commit {
        content: Content,
        origin: Option<ConnectionId>,
    },

    /// A one-off reply from the engine.
    Reply { to: ConnectionId, message: Message },

    /// The connection is gone; drop its lane.
    Leave(ConnectionId),
}

pub(crate) type SyncSender = mpsc::UnboundedSender<SyncJob>;

/// One item in a member's lane.
enum Delivery {
    /// The content a newcomer starts from. The member is admitted once it
    /// has gone through.
    Initial { content: Content, generation: u64 },

    /// A committed value. `done` fires once it is delivered, abandoned or
    /// superseded.
    Content {
        content: Content,
        generation: u64,
        done: oneshot::Sender<()>,
    },

    Message(Message),
}

type LaneSender = mpsc::UnboundedSender<Delivery>;

pub(crate) struct Syncer {
    clip_id: ClipId,
    router: Router,
    members: Arc<DashSet<ConnectionId>>,
    current: Content,
    generation: u64,
    latest: watch::Sender<u64>,
    lanes: HashMap<ConnectionId, LaneSender>,
    jobs: mpsc::UnboundedReceiver<SyncJob>,
    exchange_timeout: Duration,
    scope: CancellationToken,
}

impl Syncer {
    pub(crate) fn new(
        clip_id: ClipId,
        router: Router,
        members: Arc<DashSet<ConnectionId>>,
        exchange_timeout: Duration,
        scope: CancellationToken,
    ) -> (Self, SyncSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (latest, _) = watch::channel(0);
        let syncer = Self {
            clip_id,
            router,
            members,
            current: Content::default(),
            generation: 0,
            latest,
            lanes: HashMap::new(),
            jobs: rx,
            exchange_timeout,
            scope,
        };
        (syncer, tx)
    }

    pub(crate) async fn run(mut self) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.scope.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            match job {
                SyncJob::Join(conn) => self.join(conn),
                SyncJob::Commit { content, origin } => self.commit(content, origin),
                SyncJob::Reply { to, message } => self.reply(to, message),
                SyncJob::Leave(conn) => {
                    self.lanes.remove(&conn);
                    self.members.remove(&conn);
                    debug!(clip_id = %self.clip_id, conn_id = %conn, "member removed");
                }
            }
        }
        debug!(clip_id = %self.clip_id, lanes = self.lanes.len(), "sync worker stopped");
    }

    fn join(&mut self, conn: ConnectionId) {
        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Lane {
            clip_id: self.clip_id.clone(),
            conn,
            router: self.router.clone(),
            members: Arc::clone(&self.members),
            latest: self.latest.subscribe(),
            exchange_timeout: self.exchange_timeout,
            deliveries: rx,
            scope: self.scope.clone(),
        };
        tokio::spawn(lane.run());

        let initial = Delivery::Initial {
            content: self.current.clone(),
            generation: self.generation,
        };
        if tx.send(initial).is_ok() {
            self.lanes.insert(conn, tx);
        }
    }

    fn commit(&mut self, content: Content, origin: Option<ConnectionId>) {
        self.generation += 1;
        self.latest.send_replace(self.generation);
        self.current = content.clone();

        let generation = self.generation;
        let mut pending = Vec::with_capacity(self.lanes.len());
        self.lanes.retain(|conn, lane| {
            if Some(*conn) == origin {
                return true;
            }
            let (done, delivered) = oneshot::channel();
            let queued = lane
                .send(Delivery::Content {
                    content: content.clone(),
                    generation,
                    done,
                })
                .is_ok();
            if queued {
                pending.push(delivered);
            }
            queued
        });
        debug!(
            clip_id = %self.clip_id,
            generation,
            kind = content.kind(),
            recipients = pending.len(),
            "content queued"
        );

        let Some(origin) = origin else {
            return;
        };
        let Some(lane) = self.lanes.get(&origin).cloned() else {
            debug!(clip_id = %self.clip_id, conn_id = %origin, "origin gone, no ack");
            return;
        };
        let clip_id = self.clip_id.clone();
        tokio::spawn(async move {
            // A dropped sender means the lane ended; that recipient is done.
            for delivered in pending {
                let _ = delivered.await;
            }
            if lane.send(Delivery::Message(Message::Ack)).is_err() {
                debug!(%clip_id, conn_id = %origin, "ack dropped");
            }
        });
    }

    fn reply(&mut self, to: ConnectionId, message: Message) {
        let queued = self
            .lanes
            .get(&to)
            .map(|lane| lane.send(Delivery::Message(message)).is_ok());
        match queued {
            Some(true) => {}
            Some(false) => {
                self.lanes.remove(&to);
                debug!(clip_id = %self.clip_id, conn_id = %to, "reply dropped");
            }
            None => debug!(clip_id = %self.clip_id, conn_id = %to, "reply for unknown member dropped"),
        }
    }
}

/// Delivers one member's queue in order.
struct Lane {
    clip_id: ClipId,
    conn: ConnectionId,
    router: Router,
    members: Arc<DashSet<ConnectionId>>,
    latest: watch::Receiver<u64>,
    exchange_timeout: Duration,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    scope: CancellationToken,
}

impl Lane {
    async fn run(mut self) {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.scope.cancelled() => break,
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            let open = match delivery {
                Delivery::Initial {
                    content,
                    generation,
                } => self.admit(content, generation).await,
                Delivery::Content {
                    content,
                    generation,
                    done,
                } => {
                    let pushed = self.push(content, generation).await;
                    let _ = done.send(());
                    match pushed {
                        Ok(()) => true,
                        Err(ClipError::Router(e)) if is_gone(&e) => false,
                        Err(e) => {
                            warn!(clip_id = %self.clip_id, conn_id = %self.conn, error = %e, "sync failed");
                            true
                        }
                    }
                }
                Delivery::Message(message) => match self.router.send(self.conn, message).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(clip_id = %self.clip_id, conn_id = %self.conn, error = %e, "reply dropped");
                        !is_gone(&e)
                    }
                },
            };
            if !open {
                break;
            }
        }
        self.members.remove(&self.conn);
    }

    async fn admit(&mut self, content: Content, generation: u64) -> bool {
        match self.push(content, generation).await {
            Ok(()) if self.router.connections().contains(self.conn) => {
                self.members.insert(self.conn);
                info!(
                    clip_id = %self.clip_id,
                    conn_id = %self.conn,
                    members = self.members.len(),
                    "member joined"
                );
                true
            }
            Ok(()) => {
                debug!(clip_id = %self.clip_id, conn_id = %self.conn, "connection left before admission");
                false
            }
            Err(e) => {
                warn!(clip_id = %self.clip_id, conn_id = %self.conn, error = %e, "initial sync failed");
                let _ = self.router.disconnect(self.conn);
                false
            }
        }
    }

    /// Sends one content value. A file download gives way as soon as a
    /// newer value is committed.
    async fn push(&mut self, content: Content, generation: u64) -> Result<(), ClipError> {
        match content {
            Content::Text(data) => Ok(self.router.send(self.conn, Message::Text { data }).await?),
            Content::File(file) => {
                let filename = file.filename().to_owned();
                tokio::select! {
                    pushed = push_file(&self.router, self.conn, file, self.exchange_timeout) => pushed,
                    _ = superseded(&mut self.latest, generation) => {
                        debug!(clip_id = %self.clip_id, conn_id = %self.conn, filename = filename.as_str(), "download superseded");
                        Ok(())
                    }
                }
            }
        }
    }
}

/// Resolves once something newer than `generation` has been committed.
async fn superseded(latest: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        let newest = *latest.borrow_and_update();
        if newest > generation {
            return;
        }
        if latest.changed().await.is_err() {
            // The worker is gone; the clip scope ends the lane.
            std::future::pending::<()>().await;
        }
    }
}

fn is_gone(e: &RouterError) -> bool {
    matches!(e, RouterError::NotFound(_) | RouterError::Closed(_))
}

/// Sends a complete file to one connection over its own tunnel.
///
/// Header first, then one chunk per `NextChunk` the receiver asks for.
/// A protocol violation is reported to the receiver as a non-fatal error.
async fn push_file(
    router: &Router,
    conn: ConnectionId,
    file: Arc<FileTransfer>,
    timeout: Duration,
) -> Result<(), ClipError> {
    let mut tunnel = router.open_tunnel(conn)?;

    let result = stream_file(&mut tunnel, &file, timeout).await;
    match &result {
        Ok(()) => tunnel.close().await,
        Err(ClipError::ProtocolViolation(desc)) => {
            // Hand the connection's frames back to the engine before it
            // hears about the error.
            tunnel.close().await;
            let _ = router.send(conn, Message::error(desc.clone())).await;
        }
        Err(_) => drop(tunnel),
    }
    result
}

async fn stream_file(
    tunnel: &mut Tunnel,
    file: &FileTransfer,
    timeout: Duration,
) -> Result<(), ClipError> {
    tunnel.send(file.header()).await?;

    // Receivers request a first chunk even when there is none.
    if file.chunks().is_empty() {
        return match tunnel.recv_timeout(timeout).await {
            Ok(Message::NextChunk) | Err(RouterError::Timeout(_)) => Ok(()),
            Ok(other) => Err(unexpected(&other)),
            Err(e) => Err(e.into()),
        };
    }

    for index in 0..file.chunks().len() {
        match tunnel.recv_timeout(timeout).await? {
            Message::NextChunk => {}
            other => return Err(unexpected(&other)),
        }
        let chunk = file
            .chunk_message(index)
            .ok_or_else(|| ClipError::Internal(format!("chunk {index} missing")))?;
        tunnel.send(chunk).await?;
    }
    Ok(())
}

fn unexpected(message: &Message) -> ClipError {
    ClipError::ProtocolViolation(format!("expected NextChunk, got {}", message.kind()))
}
