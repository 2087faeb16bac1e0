//! Recording signaling transport.
//!
//! Stands in for the WebSocket sink owned by a `ConnectionActor`. Everything
//! written is captured in order; a failure switch makes writes error the way
//! a dead socket would.

use async_trait::async_trait;
use groupcall_service::actors::{ActorMetrics, ConnectionActor, ConnectionActorHandle, SignalingTransport};
use groupcall_service::errors::GroupCallError;
use groupcall_service::signaling::OutboundMessage;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Shared view of what a [`RecordingTransport`] captured.
#[derive(Debug, Clone, Default)]
pub struct TransportRecorder {
    inner: Arc<RecorderInner>,
}

#[derive(Debug, Default)]
struct RecorderInner {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
    failed_writes: AtomicUsize,
    closed: AtomicBool,
}

impl TransportRecorder {
    /// Messages written so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Remove and return the messages written so far.
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.inner.sent.lock().unwrap())
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Writes rejected while failing.
    #[must_use]
    pub fn failed_writes(&self) -> usize {
        self.inner.failed_writes.load(Ordering::SeqCst)
    }

    /// Whether the transport was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// Transport that records outbound messages.
#[derive(Debug)]
pub struct RecordingTransport {
    recorder: TransportRecorder,
}

impl RecordingTransport {
    /// Create a transport and the recorder observing it.
    #[must_use]
    pub fn new() -> (Self, TransportRecorder) {
        let recorder = TransportRecorder::default();
        (
            Self {
                recorder: recorder.clone(),
            },
            recorder,
        )
    }
}

#[async_trait]
impl SignalingTransport for RecordingTransport {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), GroupCallError> {
        if self.recorder.inner.failing.load(Ordering::SeqCst) {
            self.recorder.inner.failed_writes.fetch_add(1, Ordering::SeqCst);
            return Err(GroupCallError::Transport("connection reset".to_string()));
        }
        self.recorder.inner.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), GroupCallError> {
        self.recorder.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Spawn a `ConnectionActor` over a fresh [`RecordingTransport`].
#[must_use]
pub fn spawn_recording_connection(
    connection_id: &str,
    metrics: Arc<ActorMetrics>,
) -> (ConnectionActorHandle, TransportRecorder) {
    let (transport, recorder) = RecordingTransport::new();
    let (handle, _task) = ConnectionActor::spawn(
        connection_id.to_string(),
        Box::new(transport),
        CancellationToken::new(),
        metrics,
    );
    (handle, recorder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_fails() {
        let (handle, recorder) = spawn_recording_connection("conn-1", ActorMetrics::new());

        handle
            .send(OutboundMessage::NewParticipantArrived {
                name: "bob".to_string(),
            })
            .await
            .unwrap();
        handle.ping().await.unwrap();
        assert_eq!(recorder.sent().len(), 1);

        recorder.set_failing(true);
        handle
            .send(OutboundMessage::ParticipantLeft {
                name: "bob".to_string(),
            })
            .await
            .unwrap();
        handle.ping().await.unwrap();
        assert_eq!(recorder.take().len(), 1);
        assert!(recorder.sent().is_empty());
        assert_eq!(recorder.failed_writes(), 1);

        handle.close("done".to_string()).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !recorder.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
