//! In-memory media engine for group call testing.
//!
//! Every pipeline and endpoint the service creates is recorded, together
//! with the offers, candidates, gathers, connects and releases applied to
//! it. The mock can be configured to:
//! - Reject specific SDP offers (negotiation failure)
//! - Fail endpoint creation or release
//! - Delay endpoint creation to widen concurrency races
//! - Emit candidates as if the engine had discovered them
//!
//! # Example
//!
//! ```rust,ignore
//! use groupcall_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::builder()
//!     .reject_offer("garbage")
//!     .fail_releases()
//!     .build();
//!
//! // Hand `engine.as_engine()` to the registry, then inspect:
//! assert_eq!(engine.endpoints_created(), 2);
//! ```

use async_trait::async_trait;
use groupcall_service::media::{
    CandidateSender, EndpointBundle, IceCandidate, MediaEndpoint, MediaEngine, MediaError,
    MediaPipeline,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Mock media engine. Clones share the same recorded state.
#[derive(Clone, Default)]
pub struct MockMediaEngine {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    rejected_offers: HashSet<String>,
    creation_delay: Option<Duration>,
    emit_on_gather: bool,
    fail_releases: AtomicBool,
    fail_endpoint_creation: AtomicBool,
    fail_connect: AtomicBool,

    next_pipeline: AtomicUsize,
    pipeline_releases: AtomicUsize,
    endpoints: Mutex<Vec<Arc<MockEndpointRecord>>>,
    connects: Mutex<Vec<(String, String)>>,
}

/// Everything recorded for one endpoint.
#[derive(Debug)]
pub struct MockEndpointRecord {
    /// Endpoint ID (`pipeline-N/endpoint-M`).
    pub id: String,
    /// Owning pipeline ID.
    pub pipeline_id: String,
    offers: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
    gathers: AtomicUsize,
    releases: AtomicUsize,
    events: Mutex<Option<CandidateSender>>,
}

impl MockEndpointRecord {
    /// Offers processed by this endpoint, in order.
    #[must_use]
    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().unwrap().clone()
    }

    /// Client candidates applied to this endpoint, in order.
    #[must_use]
    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    /// Number of `gatherCandidates` calls.
    #[must_use]
    pub fn gathers(&self) -> usize {
        self.gathers.load(Ordering::SeqCst)
    }

    /// Number of release attempts (including failed ones).
    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Whether at least one release was attempted.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.releases() > 0
    }

    fn emit(&self, candidate: IceCandidate) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(candidate).is_ok(),
            None => false,
        }
    }
}

impl MockMediaEngine {
    /// Create a new MockMediaEngine builder.
    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// Create a mock with default behaviour (everything succeeds).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// This mock as the trait object the service consumes.
    #[must_use]
    pub fn as_engine(&self) -> Arc<dyn MediaEngine> {
        Arc::new(self.clone())
    }

    /// Make subsequent endpoint creations fail (or succeed again).
    pub fn set_fail_endpoint_creation(&self, fail: bool) {
        self.state.fail_endpoint_creation.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `connect` calls fail (or succeed again).
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent releases fail (or succeed again).
    pub fn set_fail_releases(&self, fail: bool) {
        self.state.fail_releases.store(fail, Ordering::SeqCst);
    }

    /// Number of pipelines created.
    #[must_use]
    pub fn pipelines_created(&self) -> usize {
        self.state.next_pipeline.load(Ordering::SeqCst)
    }

    /// Number of pipeline release attempts.
    #[must_use]
    pub fn pipeline_releases(&self) -> usize {
        self.state.pipeline_releases.load(Ordering::SeqCst)
    }

    /// Number of endpoints created.
    #[must_use]
    pub fn endpoints_created(&self) -> usize {
        self.state.endpoints.lock().unwrap().len()
    }

    /// Total endpoint release attempts across all endpoints.
    #[must_use]
    pub fn endpoint_releases(&self) -> usize {
        self.endpoints().iter().map(|e| e.releases()).sum()
    }

    /// All endpoint records in creation order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<MockEndpointRecord>> {
        self.state.endpoints.lock().unwrap().clone()
    }

    /// Record for the endpoint with `id`.
    #[must_use]
    pub fn endpoint(&self, id: &str) -> Option<Arc<MockEndpointRecord>> {
        self.endpoints().into_iter().find(|e| e.id == id)
    }

    /// `(source, sink)` pairs for every successful `connect`.
    #[must_use]
    pub fn connects(&self) -> Vec<(String, String)> {
        self.state.connects.lock().unwrap().clone()
    }

    /// Sinks connected to `source`.
    #[must_use]
    pub fn sinks_of(&self, source: &str) -> Vec<String> {
        self.connects()
            .into_iter()
            .filter(|(from, _)| from == source)
            .map(|(_, to)| to)
            .collect()
    }

    /// Emit `candidate` from endpoint `id` as if the engine found it.
    ///
    /// Returns false if the endpoint is unknown, released, or nobody listens.
    pub fn emit_candidate(&self, id: &str, candidate: IceCandidate) -> bool {
        self.endpoint(id).is_some_and(|e| e.emit(candidate))
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, MediaError> {
        let n = self.state.next_pipeline.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockPipeline {
            id: format!("pipeline-{n}"),
            next_endpoint: AtomicUsize::new(0),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockPipeline {
    id: String,
    next_endpoint: AtomicUsize,
    state: Arc<MockState>,
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_endpoint(&self) -> Result<EndpointBundle, MediaError> {
        if let Some(delay) = self.state.creation_delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_endpoint_creation.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("endpoint creation refused".to_string()));
        }

        let n = self.next_endpoint.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let record = Arc::new(MockEndpointRecord {
            id: format!("{}/endpoint-{n}", self.id),
            pipeline_id: self.id.clone(),
            offers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            gathers: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            events: Mutex::new(Some(tx)),
        });
        self.state.endpoints.lock().unwrap().push(Arc::clone(&record));

        let endpoint: Arc<dyn MediaEndpoint> = Arc::new(MockEndpoint {
            record,
            state: Arc::clone(&self.state),
        });
        Ok((endpoint, rx))
    }

    async fn release(&self) -> Result<(), MediaError> {
        self.state.pipeline_releases.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_releases.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("pipeline release refused".to_string()));
        }
        Ok(())
    }
}

struct MockEndpoint {
    record: Arc<MockEndpointRecord>,
    state: Arc<MockState>,
}

#[async_trait]
impl MediaEndpoint for MockEndpoint {
    fn id(&self) -> &str {
        &self.record.id
    }

    async fn process_offer(&self, sdp_offer: &str) -> Result<String, MediaError> {
        self.record.offers.lock().unwrap().push(sdp_offer.to_string());
        if self.state.rejected_offers.contains(sdp_offer) {
            return Err(MediaError::Negotiation(format!("offer rejected: {sdp_offer}")));
        }
        Ok(answer_for(sdp_offer))
    }

    async fn gather_candidates(&self) -> Result<(), MediaError> {
        let n = self.record.gathers.fetch_add(1, Ordering::SeqCst);
        if self.state.emit_on_gather {
            self.record.emit(server_candidate(&self.record.id, n));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.record.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn connect(&self, sink: &dyn MediaEndpoint) -> Result<(), MediaError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("connect refused".to_string()));
        }
        self.state
            .connects
            .lock()
            .unwrap()
            .push((self.record.id.clone(), sink.id().to_string()));
        Ok(())
    }

    async fn release(&self) -> Result<(), MediaError> {
        self.record.releases.fetch_add(1, Ordering::SeqCst);
        self.record.events.lock().unwrap().take();
        if self.state.fail_releases.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("endpoint release refused".to_string()));
        }
        Ok(())
    }
}

/// The answer the mock returns for `offer`.
#[must_use]
pub fn answer_for(offer: &str) -> String {
    format!("answer-for:{offer}")
}

/// The candidate the mock emits on the `n`th gather of endpoint `id`.
#[must_use]
pub fn server_candidate(id: &str, n: usize) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122252543 10.0.0.1 {} typ host {id}", 40000 + n),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: 0,
    }
}

/// Builder for MockMediaEngine configuration.
#[derive(Debug, Default)]
pub struct MockMediaEngineBuilder {
    rejected_offers: HashSet<String>,
    creation_delay: Option<Duration>,
    emit_on_gather: bool,
    fail_releases: bool,
}

impl MockMediaEngineBuilder {
    /// Reject `offer` with a negotiation error.
    #[must_use]
    pub fn reject_offer(mut self, offer: impl Into<String>) -> Self {
        self.rejected_offers.insert(offer.into());
        self
    }

    /// Sleep for `delay` inside every endpoint creation.
    #[must_use]
    pub fn creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = Some(delay);
        self
    }

    /// Emit one server candidate from an endpoint on each gather.
    #[must_use]
    pub fn emit_on_gather(mut self) -> Self {
        self.emit_on_gather = true;
        self
    }

    /// Fail every endpoint and pipeline release.
    #[must_use]
    pub fn fail_releases(mut self) -> Self {
        self.fail_releases = true;
        self
    }

    /// Build the MockMediaEngine.
    #[must_use]
    pub fn build(self) -> MockMediaEngine {
        MockMediaEngine {
            state: Arc::new(MockState {
                rejected_offers: self.rejected_offers,
                creation_delay: self.creation_delay,
                emit_on_gather: self.emit_on_gather,
                fail_releases: AtomicBool::new(self.fail_releases),
                ..MockState::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_endpoint_activity() {
        let engine = MockMediaEngine::builder().reject_offer("bad").build();
        let pipeline = engine.create_pipeline().await.unwrap();
        let (source, _) = pipeline.create_endpoint().await.unwrap();
        let (sink, _) = pipeline.create_endpoint().await.unwrap();

        assert_eq!(source.process_offer("good").await.unwrap(), answer_for("good"));
        assert!(matches!(
            sink.process_offer("bad").await,
            Err(MediaError::Negotiation(_))
        ));
        source.connect(sink.as_ref()).await.unwrap();

        assert_eq!(engine.pipelines_created(), 1);
        assert_eq!(engine.endpoints_created(), 2);
        assert_eq!(engine.sinks_of(source.id()), vec![sink.id().to_string()]);
        assert_eq!(engine.endpoint(sink.id()).unwrap().offers(), vec!["bad"]);
    }

    #[tokio::test]
    async fn test_emit_stops_after_release() {
        let engine = MockMediaEngine::new();
        let pipeline = engine.create_pipeline().await.unwrap();
        let (endpoint, mut candidates) = pipeline.create_endpoint().await.unwrap();

        assert!(engine.emit_candidate(endpoint.id(), server_candidate(endpoint.id(), 0)));
        assert!(candidates.recv().await.is_some());

        endpoint.release().await.unwrap();
        assert!(!engine.emit_candidate(endpoint.id(), server_candidate(endpoint.id(), 1)));
        assert!(candidates.recv().await.is_none());
        assert_eq!(engine.endpoint_releases(), 1);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let engine = MockMediaEngine::builder().fail_releases().build();
        let pipeline = engine.create_pipeline().await.unwrap();
        let (endpoint, _) = pipeline.create_endpoint().await.unwrap();
        assert!(endpoint.release().await.is_err());
        assert!(engine.endpoint(endpoint.id()).unwrap().is_released());

        engine.set_fail_endpoint_creation(true);
        assert!(pipeline.create_endpoint().await.is_err());
        engine.set_fail_endpoint_creation(false);
        assert!(pipeline.create_endpoint().await.is_ok());
    }
}
