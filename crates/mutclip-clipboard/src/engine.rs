//! The protocol engine: the only code that changes a clip's content.
//!
//! One task per clip. Each turn of the loop takes exactly one event (a
//! frame from the drain, a frame from the upload tunnel, the idle
//! deadline, or cancellation) and handles it to completion before looking
//! at the next one.
//!
//! ```text
//!            Text                   FileHeader(n > 0)
//!   Idle ─────────▶ Idle      Idle ──────────────────▶ Receiving
//!                                    ▲                     │
//!                                    └── last chunk / abort┘
//! ```
//!
//! The engine decides what gets committed but does not keep the committed
//! value: it hands each one to the sync worker, which holds the latest
//! value for newcomers. An upload in progress lives only here, so an
//! aborted upload is dropped and nothing committed was ever touched.

use std::sync::Arc;

use mutclip_protocol::{ClipId, ConnectionId, Message};
use mutclip_router::{Drain, Inbound, Router, RouterError, Tunnel};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync::{SyncJob, SyncSender};
use crate::{ClipConfig, ClipError, Content, FileTransfer, Progress};

/// An upload in progress.
struct Upload {
    sender: ConnectionId,
    tunnel: Tunnel,
    transfer: FileTransfer,
    deadline: Instant,
}

enum Event {
    Drained(Inbound),
    Upload(Result<Message, RouterError>),
}

pub(crate) struct Engine {
    clip_id: ClipId,
    config: ClipConfig,
    router: Router,
    drain: Drain,
    sync: SyncSender,
    upload: Option<Upload>,
    scope: CancellationToken,
}

impl Engine {
    pub(crate) fn new(
        clip_id: ClipId,
        config: ClipConfig,
        router: Router,
        drain: Drain,
        sync: SyncSender,
        scope: CancellationToken,
    ) -> Self {
        Self {
            clip_id,
            config,
            router,
            drain,
            sync,
            upload: None,
            scope,
        }
    }

    /// Runs until the clip's scope ends. Cancels the scope itself when the
    /// idle deadline passes.
    pub(crate) async fn run(mut self) {
        info!(clip_id = %self.clip_id, "engine started");

        let idle = tokio::time::sleep(self.config.idle_timeout);
        tokio::pin!(idle);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.scope.cancelled() => break,
                _ = &mut idle => {
                    info!(clip_id = %self.clip_id, "clip idle, expiring");
                    break;
                }
                frame = next_upload_frame(&mut self.upload) => Event::Upload(frame),
                inbound = self.drain.recv() => match inbound {
                    Some(inbound) => Event::Drained(inbound),
                    None => break,
                },
            };
            idle.as_mut()
                .reset(Instant::now() + self.config.idle_timeout);

            match event {
                Event::Drained(inbound) => self.on_frame(inbound).await,
                Event::Upload(frame) => self.on_upload_frame(frame).await,
            }
        }

        if let Some(upload) = self.upload.take() {
            warn!(
                clip_id = %self.clip_id,
                conn_id = %upload.sender,
                filename = upload.transfer.filename(),
                "upload abandoned"
            );
        }
        self.scope.cancel();
        info!(clip_id = %self.clip_id, "engine stopped");
    }

    async fn on_frame(&mut self, Inbound { from, message }: Inbound) {
        debug!(clip_id = %self.clip_id, conn_id = %from, kind = message.kind(), "frame");

        if message.is_content_change() && self.upload.is_some() {
            warn!(clip_id = %self.clip_id, conn_id = %from, "content change refused while receiving");
            self.reply(from, Message::error("clip is busy receiving a file"));
            return;
        }

        match message {
            Message::Text { data } => self.commit(Content::Text(data), from),
            Message::FileHeader {
                filename,
                content_type,
                num_chunks,
            } => {
                self.begin_upload(from, FileTransfer::new(filename, content_type, num_chunks))
                    .await
            }
            Message::Chunk { .. } | Message::NextChunk => {
                warn!(clip_id = %self.clip_id, conn_id = %from, kind = message.kind(), "frame outside a transfer");
                self.reply(from, Message::error(format!("unexpected {}", message.kind())));
            }
            Message::Ack | Message::Error { .. } => {
                debug!(clip_id = %self.clip_id, conn_id = %from, ?message, "ignored");
            }
        }
    }

    async fn begin_upload(&mut self, from: ConnectionId, transfer: FileTransfer) {
        let num_chunks = transfer.total_chunks();
        if !(0..=self.config.max_chunks).contains(&num_chunks) {
            warn!(clip_id = %self.clip_id, conn_id = %from, num_chunks, "bad file header");
            self.reply(from, Message::error(format!("invalid chunk count {num_chunks}")));
            return;
        }
        if transfer.is_ready() {
            self.commit(Content::File(Arc::new(transfer)), from);
            return;
        }

        let tunnel = match self.router.open_tunnel(from) {
            Ok(tunnel) => tunnel,
            Err(e) => {
                warn!(clip_id = %self.clip_id, conn_id = %from, error = %e, "cannot start upload");
                self.reply(from, Message::error(format!("cannot start upload: {e}")));
                return;
            }
        };
        if let Err(e) = tunnel.send(Message::NextChunk).await {
            warn!(clip_id = %self.clip_id, conn_id = %from, error = %e, "uploader gone");
            return;
        }

        info!(
            clip_id = %self.clip_id,
            conn_id = %from,
            filename = transfer.filename(),
            num_chunks,
            "receiving file"
        );
        self.upload = Some(Upload {
            sender: from,
            tunnel,
            transfer,
            deadline: Instant::now() + self.config.exchange_timeout,
        });
    }

    async fn on_upload_frame(&mut self, frame: Result<Message, RouterError>) {
        let Some(mut upload) = self.upload.take() else {
            return;
        };

        let chunk = match frame {
            Ok(Message::Chunk { index, data }) => upload.transfer.push_chunk(index, data),
            Ok(other) => Err(ClipError::ProtocolViolation(format!(
                "expected Chunk, got {}",
                other.kind()
            ))),
            Err(e) => {
                warn!(clip_id = %self.clip_id, conn_id = %upload.sender, error = %e, "upload aborted");
                return;
            }
        };

        match chunk {
            Ok(Progress::More) => {
                upload.deadline = Instant::now() + self.config.exchange_timeout;
                match upload.tunnel.send(Message::NextChunk).await {
                    Ok(()) => self.upload = Some(upload),
                    Err(e) => {
                        warn!(clip_id = %self.clip_id, conn_id = %upload.sender, error = %e, "upload aborted");
                    }
                }
            }
            Ok(Progress::Complete) => {
                let Upload {
                    sender,
                    tunnel,
                    transfer,
                    ..
                } = upload;
                tunnel.close().await;
                info!(
                    clip_id = %self.clip_id,
                    conn_id = %sender,
                    filename = transfer.filename(),
                    bytes = transfer.len(),
                    "file received"
                );
                self.commit(Content::File(Arc::new(transfer)), sender);
            }
            Err(e) => {
                warn!(clip_id = %self.clip_id, conn_id = %upload.sender, error = %e, "upload rolled back");
                let sender = upload.sender;
                // Abort the tunnel before replying so later frames from the
                // sender land on the drain.
                drop(upload);
                self.reply(sender, Message::error(e.to_string()));
            }
        }
    }

    fn commit(&self, content: Content, origin: ConnectionId) {
        debug!(clip_id = %self.clip_id, conn_id = %origin, kind = content.kind(), "content committed");
        let job = SyncJob::Commit {
            content,
            origin: Some(origin),
        };
        if self.sync.send(job).is_err() {
            debug!(clip_id = %self.clip_id, "sync worker gone");
        }
    }

    fn reply(&self, to: ConnectionId, message: Message) {
        if self.sync.send(SyncJob::Reply { to, message }).is_err() {
            debug!(clip_id = %self.clip_id, "sync worker gone");
        }
    }
}

/// Next frame of the active upload, bounded by its deadline. Never
/// resolves when no upload is running.
async fn next_upload_frame(upload: &mut Option<Upload>) -> Result<Message, RouterError> {
    match upload {
        Some(upload) => {
            match tokio::time::timeout_at(upload.deadline, upload.tunnel.recv()).await {
                Ok(frame) => frame,
                Err(_) => Err(RouterError::Timeout(upload.sender)),
            }
        }
        None => std::future::pending().await,
    }
}
