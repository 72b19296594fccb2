//! Clip registry: creates clips, starts their tasks, admits connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use mutclip_protocol::{ClipId, ConnectionId};
use mutclip_router::{Ingress, Router, Sink};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Engine;
use crate::sync::{SyncJob, SyncSender, Syncer};
use crate::{ClipConfig, ClipError};

/// Characters clip ids are drawn from.
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Backing map of a [`ClipRegistry`].
pub type ClipStore = DashMap<ClipId, Arc<Clip>>;

/// One live clip.
///
/// Created by [`ClipRegistry::generate`]; its tasks run inside
/// [`ClipRegistry::start`].
pub struct Clip {
    id: ClipId,
    scope: CancellationToken,
    router: Router,
    members: Arc<DashSet<ConnectionId>>,
    sync: SyncSender,
    started: AtomicBool,
    tasks: Mutex<Option<(Engine, Syncer)>>,
}

impl std::fmt::Debug for Clip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clip")
            .field("id", &self.id)
            .field("members", &self.members.len())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl Clip {
    fn new(id: ClipId, config: &ClipConfig, parent: &CancellationToken) -> Self {
        let scope = parent.child_token();
        let (router, drain) = Router::new(config.router_config(), scope.clone());
        let members = Arc::new(DashSet::new());
        let (syncer, sync) = Syncer::new(
            id.clone(),
            router.clone(),
            Arc::clone(&members),
            config.exchange_timeout,
            scope.clone(),
        );
        let engine = Engine::new(
            id.clone(),
            config.clone(),
            router.clone(),
            drain,
            sync.clone(),
            scope.clone(),
        );

        Self {
            id,
            scope,
            router,
            members,
            sync,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Some((engine, syncer))),
        }
    }

    pub fn id(&self) -> &ClipId {
        &self.id
    }

    /// Cancelled when the clip ends (idle expiry or server shutdown).
    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Number of admitted members.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// A connection admitted to a clip.
#[derive(Debug)]
pub struct ClipConnection {
    pub id: ConnectionId,
    /// Where the transport adapter pushes decoded inbound frames.
    pub inbound: Ingress,
    /// Cancelled when the connection ends for any reason; the adapter
    /// closes the socket when it fires.
    pub scope: CancellationToken,
}

/// Registry of live clips. Cheap to clone; clones share one store.
#[derive(Debug, Clone)]
pub struct ClipRegistry {
    store: Arc<ClipStore>,
    config: ClipConfig,
}

impl ClipRegistry {
    pub fn new(config: ClipConfig) -> Self {
        Self::with_store(config, Arc::new(ClipStore::new()))
    }

    /// Builds a registry over an existing store.
    pub fn with_store(config: ClipConfig, store: Arc<ClipStore>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ClipConfig {
        &self.config
    }

    /// Creates a clip with empty text content and returns its id.
    ///
    /// The clip lives in a child scope of `parent`. Its engine is not
    /// started here; a clip nobody starts is expired after one idle
    /// timeout. Either way it leaves the store one grace period after its
    /// scope ends.
    pub fn generate(&self, parent: &CancellationToken) -> ClipId {
        let clip = loop {
            let candidate = random_id();
            match self.store.entry(candidate) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let clip = Arc::new(Clip::new(slot.key().clone(), &self.config, parent));
                    slot.insert(Arc::clone(&clip));
                    break clip;
                }
            }
        };
        info!(clip_id = %clip.id, clips = self.store.len(), "clip created");

        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let id = clip.id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = clip.scope.cancelled() => {}
                _ = tokio::time::sleep(config.idle_timeout) => {
                    if !clip.is_started() {
                        info!(clip_id = %clip.id, "clip never started, expiring");
                        clip.scope.cancel();
                    }
                    clip.scope.cancelled().await;
                }
            }
            tokio::time::sleep(config.grace_period).await;
            store.remove_if(&clip.id, |_, stored| Arc::ptr_eq(stored, &clip));
            info!(clip_id = %clip.id, "clip removed");
        });

        id
    }

    /// Runs the clip's engine and sync worker until the clip ends.
    ///
    /// # Errors
    /// `NotFound` for an unknown id, `AlreadyStarted` on a second call.
    pub async fn start(&self, id: &ClipId) -> Result<(), ClipError> {
        let clip = self.get(id)?;
        if clip.started.swap(true, Ordering::SeqCst) {
            return Err(ClipError::AlreadyStarted(id.clone()));
        }
        let (engine, syncer) = clip
            .tasks
            .lock()
            .map_err(|_| ClipError::Internal(format!("clip {id} state poisoned")))?
            .take()
            .ok_or_else(|| ClipError::AlreadyStarted(id.clone()))?;

        tokio::join!(engine.run(), syncer.run());
        debug!(clip_id = %id, "clip tasks finished");
        Ok(())
    }

    /// Returns `true` while a clip with this id is live.
    pub fn exists(&self, id: &ClipId) -> bool {
        self.store
            .get(id)
            .is_some_and(|clip| !clip.scope.is_cancelled())
    }

    /// Admits a connection to a clip.
    ///
    /// The connection's scope is a child of the clip's and also ends when
    /// `caller` does. Its first outbound frame is the clip's current
    /// content; it becomes a member (and starts getting updates) once
    /// that push has gone through.
    ///
    /// # Errors
    /// `ClipError::NotFound` if the clip doesn't exist or has ended.
    pub fn connect(
        &self,
        id: &ClipId,
        caller: &CancellationToken,
        sink: Sink,
    ) -> Result<ClipConnection, ClipError> {
        let clip = self.get(id)?;
        if clip.scope.is_cancelled() {
            return Err(ClipError::NotFound(id.clone()));
        }

        let scope = clip.scope.child_token();
        let conn = clip.router.connect(sink, scope.clone());
        let inbound = clip.router.ingress(conn)?;
        clip.sync
            .send(SyncJob::Join(conn))
            .map_err(|_| ClipError::NotFound(id.clone()))?;

        let caller = caller.clone();
        let sync = clip.sync.clone();
        let grace = self.config.grace_period;
        let conn_scope = scope.clone();
        let clip_id = id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => conn_scope.cancel(),
                _ = conn_scope.cancelled() => {}
            }
            tokio::time::sleep(grace).await;
            if sync.send(SyncJob::Leave(conn)).is_err() {
                debug!(%clip_id, conn_id = %conn, "clip already stopped");
            }
        });

        info!(clip_id = %id, conn_id = %conn, "connection admitted");
        Ok(ClipConnection {
            id: conn,
            inbound,
            scope,
        })
    }

    /// Looks up a live or recently ended clip.
    pub fn clip(&self, id: &ClipId) -> Option<Arc<Clip>> {
        self.store.get(id).map(|clip| Arc::clone(clip.value()))
    }

    /// Number of clips in the store.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn get(&self, id: &ClipId) -> Result<Arc<Clip>, ClipError> {
        self.clip(id).ok_or_else(|| ClipError::NotFound(id.clone()))
    }
}

/// Six random characters from [`ID_ALPHABET`] in three dash-separated
/// pairs, e.g. `k3-9a-zq`.
fn random_id() -> ClipId {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(8);
    for i in 0..6 {
        if i > 0 && i % 2 == 0 {
            id.push('-');
        }
        id.push(char::from(ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())]));
    }
    ClipId::new(id)
}
