//! Participant - one client's membership in one room.
//!
//! A participant owns two outgoing endpoints (camera, screen) created when it
//! joins, plus one incoming endpoint per (peer, kind) created lazily on the
//! first subscription to that peer:
//!
//! ```text
//! Absent ──receive_from──▶ Created ──connect──▶ Connected ──close──▶ Released
//! ```
//!
//! Incoming slots are inserted under the map's write lock and negotiated
//! under a per-slot lock, so concurrent first subscriptions to the same peer
//! create and connect exactly one endpoint. A new endpoint becomes visible
//! only after its first offer succeeds, and only if its slot is still in the
//! map at that point. Candidate routing reads only visible endpoints.

use crate::actors::ConnectionActorHandle;
use crate::errors::GroupCallError;
use crate::media::{CandidateReceiver, IceCandidate, MediaEndpoint, MediaKind, MediaPipeline};
use crate::observability::metrics;
use crate::signaling::OutboundMessage;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

type EndpointMap = RwLock<HashMap<String, Arc<IncomingSlot>>>;

/// One (peer, kind) subscription path.
#[derive(Default)]
struct IncomingSlot {
    /// Held for the duration of each negotiation on this path.
    negotiation: Mutex<()>,
    /// Set once the first negotiation on this path succeeds.
    endpoint: OnceCell<Arc<dyn MediaEndpoint>>,
}

/// Composite participant identity: equal iff name and room both match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantKey {
    pub name: String,
    pub room: String,
}

impl ParticipantKey {
    #[must_use]
    pub fn new(name: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room: room.into(),
        }
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.room)
    }
}

/// What `cancel` does with the incoming endpoints it removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Drop the map entries only; the engine resources stay allocated until
    /// the pipeline is released.
    #[default]
    KeepAlive,
    /// Also issue a release for every removed endpoint.
    Release,
}

/// Outcome of the releases issued by [`Participant::close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: usize,
    pub failed: usize,
}

/// Release requests issued by [`Participant::close`].
///
/// Awaiting is optional. Dropping this value leaves every request running.
#[derive(Debug, Default)]
#[must_use = "drop explicitly if the release outcome is not needed"]
pub struct ReleaseCompletion {
    tasks: Vec<JoinHandle<ReleaseReport>>,
}

impl ReleaseCompletion {
    /// Wrap a task that reports on a batch of releases.
    pub(crate) fn from_task(task: JoinHandle<ReleaseReport>) -> Self {
        Self { tasks: vec![task] }
    }

    /// Number of release tasks outstanding.
    pub fn issued(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every release to finish.
    pub async fn wait(self) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        for task in self.tasks {
            match task.await {
                Ok(outcome) => {
                    report.released += outcome.released;
                    report.failed += outcome.failed;
                }
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Fold another completion into this one.
    pub fn merge(&mut self, other: ReleaseCompletion) {
        self.tasks.extend(other.tasks);
    }
}

/// One user's presence in one room.
pub struct Participant {
    key: ParticipantKey,
    connection: ConnectionActorHandle,
    pipeline: Arc<dyn MediaPipeline>,
    outgoing_camera: Arc<dyn MediaEndpoint>,
    outgoing_screen: Arc<dyn MediaEndpoint>,
    incoming_camera: EndpointMap,
    incoming_screen: EndpointMap,
    cancel_policy: CancelPolicy,
    closed: AtomicBool,
}

impl Participant {
    /// Create a participant and its two outgoing endpoints in `pipeline`.
    ///
    /// Candidates discovered on the outgoing endpoints are sent to this
    /// participant's own client, tagged with its own name.
    pub async fn create(
        key: ParticipantKey,
        connection: ConnectionActorHandle,
        pipeline: Arc<dyn MediaPipeline>,
        cancel_policy: CancelPolicy,
    ) -> Result<Arc<Self>, GroupCallError> {
        let (outgoing_camera, camera_candidates) = pipeline.create_endpoint().await?;
        let (outgoing_screen, screen_candidates) = match pipeline.create_endpoint().await {
            Ok(bundle) => bundle,
            Err(e) => {
                release_endpoint(outgoing_camera, key.clone()).await;
                return Err(e.into());
            }
        };

        spawn_candidate_forwarder(
            camera_candidates,
            connection.clone(),
            MediaKind::Camera,
            key.name.clone(),
        );
        spawn_candidate_forwarder(
            screen_candidates,
            connection.clone(),
            MediaKind::Screen,
            key.name.clone(),
        );

        debug!(
            target: "groupcall.participant",
            participant = %key,
            camera_endpoint = %outgoing_camera.id(),
            screen_endpoint = %outgoing_screen.id(),
            "Participant created"
        );

        Ok(Arc::new(Self {
            key,
            connection,
            pipeline,
            outgoing_camera,
            outgoing_screen,
            incoming_camera: RwLock::new(HashMap::new()),
            incoming_screen: RwLock::new(HashMap::new()),
            cancel_policy,
            closed: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn key(&self) -> &ParticipantKey {
        &self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.key.name
    }

    #[must_use]
    pub fn room(&self) -> &str {
        &self.key.room
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionActorHandle {
        &self.connection
    }

    /// The outgoing endpoint for `kind`.
    #[must_use]
    pub fn outgoing(&self, kind: MediaKind) -> &Arc<dyn MediaEndpoint> {
        match kind {
            MediaKind::Camera => &self.outgoing_camera,
            MediaKind::Screen => &self.outgoing_screen,
        }
    }

    fn incoming(&self, kind: MediaKind) -> &EndpointMap {
        match kind {
            MediaKind::Camera => &self.incoming_camera,
            MediaKind::Screen => &self.incoming_screen,
        }
    }

    fn is_self(&self, name: &str) -> bool {
        self.key.name == name
    }

    /// The initialised incoming endpoint from `peer`, if any.
    pub async fn incoming_endpoint(
        &self,
        peer: &str,
        kind: MediaKind,
    ) -> Option<Arc<dyn MediaEndpoint>> {
        self.incoming(kind)
            .read()
            .await
            .get(peer)
            .and_then(|slot| slot.endpoint.get().cloned())
    }

    /// Number of initialised incoming endpoints of `kind`.
    pub async fn incoming_count(&self, kind: MediaKind) -> usize {
        self.incoming(kind)
            .read()
            .await
            .values()
            .filter(|slot| slot.endpoint.initialized())
            .count()
    }

    /// Negotiate receiving `sender`'s `kind` stream.
    ///
    /// Sends the answer to this participant's client before starting
    /// candidate gathering, and returns it.
    pub async fn receive_from(
        &self,
        sender: &Participant,
        sdp_offer: &str,
        kind: MediaKind,
    ) -> Result<String, GroupCallError> {
        let started = Instant::now();

        if sender.key == self.key {
            trace!(
                target: "groupcall.participant",
                participant = %self.key,
                kind = %kind,
                "Loopback negotiation"
            );
            let endpoint = Arc::clone(self.outgoing(kind));
            let sdp_answer = match endpoint.process_offer(sdp_offer).await {
                Ok(answer) => answer,
                Err(e) => {
                    metrics::record_negotiation(kind.as_str(), "failure", started.elapsed());
                    return Err(e.into());
                }
            };
            self.answer(sender.name(), kind, &sdp_answer, started).await;
            self.gather(&endpoint, sender.name(), kind).await;
            return Ok(sdp_answer);
        }

        let slot = self.incoming_slot(sender.name(), kind).await;
        let guard = slot.negotiation.lock().await;

        if !self.holds_slot(sender.name(), kind, &slot).await {
            return Err(GroupCallError::ParticipantNotFound(sender.name().to_string()));
        }

        let (endpoint, created) = match slot.endpoint.get() {
            Some(endpoint) => (Arc::clone(endpoint), false),
            None => (self.create_incoming(sender, kind).await?, true),
        };

        let sdp_answer = match endpoint.process_offer(sdp_offer).await {
            Ok(answer) => answer,
            Err(e) => {
                metrics::record_negotiation(kind.as_str(), "failure", started.elapsed());
                if created {
                    release_endpoint(endpoint, self.key.clone()).await;
                }
                return Err(e.into());
            }
        };

        if created && !self.publish(sender.name(), kind, &slot, &endpoint).await {
            debug!(
                target: "groupcall.participant",
                participant = %self.key,
                sender = %sender.name(),
                kind = %kind,
                endpoint_id = %endpoint.id(),
                "Subscription cancelled during negotiation, releasing endpoint"
            );
            metrics::record_negotiation(kind.as_str(), "failure", started.elapsed());
            release_endpoint(endpoint, self.key.clone()).await;
            return Err(GroupCallError::ParticipantNotFound(sender.name().to_string()));
        }

        self.answer(sender.name(), kind, &sdp_answer, started).await;
        drop(guard);

        self.gather(&endpoint, sender.name(), kind).await;
        Ok(sdp_answer)
    }

    async fn answer(&self, sender: &str, kind: MediaKind, sdp_answer: &str, started: Instant) {
        self.send(OutboundMessage::answer(
            kind,
            sender.to_string(),
            sdp_answer.to_string(),
        ))
        .await;
        metrics::record_negotiation(kind.as_str(), "success", started.elapsed());
    }

    async fn gather(&self, endpoint: &Arc<dyn MediaEndpoint>, sender: &str, kind: MediaKind) {
        if let Err(e) = endpoint.gather_candidates().await {
            warn!(
                target: "groupcall.participant",
                participant = %self.key,
                sender = %sender,
                kind = %kind,
                error = %e,
                "Candidate gathering failed after answer was sent"
            );
        }
    }

    /// The slot for `peer`, inserted if absent.
    async fn incoming_slot(&self, peer: &str, kind: MediaKind) -> Arc<IncomingSlot> {
        let map = self.incoming(kind);
        if let Some(slot) = map.read().await.get(peer) {
            return Arc::clone(slot);
        }
        Arc::clone(map.write().await.entry(peer.to_string()).or_default())
    }

    /// Whether `slot` is still the live entry for `peer`.
    async fn holds_slot(&self, peer: &str, kind: MediaKind, slot: &Arc<IncomingSlot>) -> bool {
        self.incoming(kind)
            .read()
            .await
            .get(peer)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Make a freshly negotiated endpoint visible.
    ///
    /// Fails if `cancel` or `close` ran while the slot was negotiating.
    async fn publish(
        &self,
        peer: &str,
        kind: MediaKind,
        slot: &Arc<IncomingSlot>,
        endpoint: &Arc<dyn MediaEndpoint>,
    ) -> bool {
        let map = self.incoming(kind).write().await;
        let live = !self.closed.load(Ordering::SeqCst)
            && map
            .get(peer)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        live && slot.endpoint.set(Arc::clone(endpoint)).is_ok()
    }

    /// Create an incoming endpoint and connect `sender`'s outgoing endpoint to it.
    async fn create_incoming(
        &self,
        sender: &Participant,
        kind: MediaKind,
    ) -> Result<Arc<dyn MediaEndpoint>, GroupCallError> {
        let (endpoint, candidates) = self.pipeline.create_endpoint().await?;

        spawn_candidate_forwarder(
            candidates,
            self.connection.clone(),
            kind,
            sender.name().to_string(),
        );

        if let Err(e) = sender.outgoing(kind).connect(endpoint.as_ref()).await {
            release_endpoint(endpoint, self.key.clone()).await;
            return Err(e.into());
        }

        debug!(
            target: "groupcall.participant",
            participant = %self.key,
            sender = %sender.name(),
            kind = %kind,
            endpoint_id = %endpoint.id(),
            "Incoming endpoint created and connected"
        );

        Ok(endpoint)
    }

    /// Apply a client candidate for the path identified by `origin`.
    ///
    /// A candidate for a path that has no endpoint yet is dropped.
    pub async fn add_candidate(
        &self,
        candidate: IceCandidate,
        origin: &str,
        kind: MediaKind,
    ) -> Result<(), GroupCallError> {
        let endpoint = if self.is_self(origin) {
            Some(Arc::clone(self.outgoing(kind)))
        } else {
            self.incoming_endpoint(origin, kind).await
        };

        match endpoint {
            Some(endpoint) => Ok(endpoint.add_ice_candidate(candidate).await?),
            None => {
                debug!(
                    target: "groupcall.participant",
                    participant = %self.key,
                    origin = %origin,
                    kind = %kind,
                    "Dropping candidate for unknown endpoint"
                );
                metrics::record_candidate_dropped(kind.as_str());
                Ok(())
            }
        }
    }

    /// Forget the incoming endpoints from `peer`. Returns the number removed.
    ///
    /// A negotiation still in flight for `peer` fails and releases its own
    /// endpoint.
    pub async fn cancel(&self, peer: &str) -> usize {
        let mut removed = Vec::new();
        for kind in [MediaKind::Camera, MediaKind::Screen] {
            let slot = self.incoming(kind).write().await.remove(peer);
            if let Some(endpoint) = slot.and_then(|slot| slot.endpoint.get().cloned()) {
                removed.push(endpoint);
            }
        }

        if self.cancel_policy == CancelPolicy::Release {
            for endpoint in &removed {
                tokio::spawn(release_endpoint(Arc::clone(endpoint), self.key.clone()));
            }
        }

        debug!(
            target: "groupcall.participant",
            participant = %self.key,
            peer = %peer,
            removed = removed.len(),
            policy = ?self.cancel_policy,
            "Cancelled incoming endpoints"
        );

        removed.len()
    }

    /// Issue a release for every endpoint this participant owns.
    ///
    /// Returns once the requests are issued. A second call issues nothing.
    pub async fn close(&self) -> ReleaseCompletion {
        if self.closed.swap(true, Ordering::SeqCst) {
            return ReleaseCompletion::default();
        }

        let mut endpoints = vec![
            Arc::clone(&self.outgoing_camera),
            Arc::clone(&self.outgoing_screen),
        ];
        for kind in [MediaKind::Camera, MediaKind::Screen] {
            let drained: Vec<_> = self.incoming(kind).write().await.drain().collect();
            endpoints.extend(
                drained
                    .into_iter()
                    .filter_map(|(_, slot)| slot.endpoint.get().cloned()),
            );
        }

        debug!(
            target: "groupcall.participant",
            participant = %self.key,
            endpoints = endpoints.len(),
            "Releasing participant endpoints"
        );

        ReleaseCompletion {
            tasks: endpoints
                .into_iter()
                .map(|endpoint| {
                    let owner = self.key.clone();
                    tokio::spawn(async move {
                        if release_endpoint(endpoint, owner).await {
                            ReleaseReport { released: 1, failed: 0 }
                        } else {
                            ReleaseReport { released: 0, failed: 1 }
                        }
                    })
                })
                .collect(),
        }
    }

    /// Deliver one message to this participant's client. Failures are logged.
    pub async fn send(&self, message: OutboundMessage) {
        let message_type = message.message_type();
        if let Err(e) = self.connection.send(message).await {
            debug!(
                target: "groupcall.participant",
                participant = %self.key,
                message_type,
                error = %e,
                "Dropping outbound message for closed connection"
            );
        }
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Participant {}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Participant")
            .field("key", &self.key)
            .field("connection_id", &self.connection.connection_id())
            .field("pipeline_id", &self.pipeline.id())
            .finish_non_exhaustive()
    }
}

fn spawn_candidate_forwarder(
    mut candidates: CandidateReceiver,
    connection: ConnectionActorHandle,
    kind: MediaKind,
    peer: String,
) {
    tokio::spawn(async move {
        while let Some(candidate) = candidates.recv().await {
            let message = OutboundMessage::ice_candidate(kind, peer.clone(), candidate);
            if let Err(e) = connection.send(message).await {
                debug!(
                    target: "groupcall.participant",
                    connection_id = %connection.connection_id(),
                    peer = %peer,
                    kind = %kind,
                    error = %e,
                    "Connection gone, stopping candidate forwarding"
                );
                break;
            }
        }
    });
}

async fn release_endpoint(endpoint: Arc<dyn MediaEndpoint>, owner: ParticipantKey) -> bool {
    match endpoint.release().await {
        Ok(()) => {
            trace!(
                target: "groupcall.participant",
                participant = %owner,
                endpoint_id = %endpoint.id(),
                "Endpoint released"
            );
            metrics::record_endpoint_release("success");
            true
        }
        Err(e) => {
            warn!(
                target: "groupcall.participant",
                participant = %owner,
                endpoint_id = %endpoint.id(),
                error = %e,
                "Endpoint release failed"
            );
            metrics::record_endpoint_release("failure");
            false
        }
    }
}
