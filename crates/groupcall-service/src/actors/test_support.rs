//! In-crate stubs for actor unit tests.
//!
//! Integration tests use the richer mocks in `groupcall-test-utils`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::errors::GroupCallError;
use crate::media::{
    EndpointBundle, IceCandidate, MediaEndpoint, MediaEngine, MediaError, MediaPipeline,
};
use crate::signaling::OutboundMessage;

use super::connection::{ConnectionActor, ConnectionActorHandle, SignalingTransport};
use super::metrics::ActorMetrics;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub(crate) struct StubCounters {
    pub pipelines: AtomicUsize,
    pub endpoints: AtomicUsize,
    pub releases: AtomicUsize,
    pub pipeline_releases: AtomicUsize,
}

/// Engine whose endpoints answer `offer` with `answer:offer` and reject `bad`.
#[derive(Default)]
pub(crate) struct StubEngine {
    pub counters: Arc<StubCounters>,
}

#[async_trait]
impl MediaEngine for StubEngine {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, MediaError> {
        let n = self.counters.pipelines.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubPipeline {
            id: format!("pipe-{n}"),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct StubPipeline {
    id: String,
    counters: Arc<StubCounters>,
}

#[async_trait]
impl MediaPipeline for StubPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_endpoint(&self) -> Result<EndpointBundle, MediaError> {
        let n = self.counters.endpoints.fetch_add(1, Ordering::SeqCst);
        let (_tx, rx) = mpsc::unbounded_channel();
        let endpoint: Arc<dyn MediaEndpoint> = Arc::new(StubEndpoint {
            id: format!("{}/ep-{n}", self.id),
            counters: Arc::clone(&self.counters),
        });
        Ok((endpoint, rx))
    }

    async fn release(&self) -> Result<(), MediaError> {
        self.counters.pipeline_releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubEndpoint {
    id: String,
    counters: Arc<StubCounters>,
}

#[async_trait]
impl MediaEndpoint for StubEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn process_offer(&self, sdp_offer: &str) -> Result<String, MediaError> {
        if sdp_offer == "bad" {
            return Err(MediaError::Negotiation("unparseable offer".to_string()));
        }
        Ok(format!("answer:{sdp_offer}"))
    }

    async fn gather_candidates(&self) -> Result<(), MediaError> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), MediaError> {
        Ok(())
    }

    async fn connect(&self, _sink: &dyn MediaEndpoint) -> Result<(), MediaError> {
        Ok(())
    }

    async fn release(&self) -> Result<(), MediaError> {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) type Outbox = Arc<Mutex<Vec<OutboundMessage>>>;

struct StubTransport {
    outbox: Outbox,
}

#[async_trait]
impl SignalingTransport for StubTransport {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), GroupCallError> {
        self.outbox.lock().await.push(message.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), GroupCallError> {
        Ok(())
    }
}

/// Spawn a connection actor that records everything written to it.
pub(crate) fn stub_connection(id: &str) -> (ConnectionActorHandle, Outbox) {
    let outbox = Outbox::default();
    let (handle, _task) = ConnectionActor::spawn(
        id.to_string(),
        Box::new(StubTransport {
            outbox: Arc::clone(&outbox),
        }),
        CancellationToken::new(),
        ActorMetrics::new(),
    );
    (handle, outbox)
}

/// Wait until the connection has written everything queued so far.
pub(crate) async fn drain(connection: &ConnectionActorHandle, outbox: &Outbox) -> Vec<OutboundMessage> {
    connection.ping().await.unwrap();
    outbox.lock().await.clone()
}
