//! Kurento Media Server client.
//!
//! Speaks the KMS JSON-RPC 2.0 protocol over one WebSocket:
//!
//! | Method      | Used for                                                     |
//! |-------------|--------------------------------------------------------------|
//! | `create`    | `MediaPipeline`, `WebRtcEndpoint`                            |
//! | `invoke`    | `processOffer`, `gatherCandidates`, `addIceCandidate`, `connect` |
//! | `subscribe` | `IceCandidateFound`                                          |
//! | `release`   | pipelines and endpoints                                      |
//!
//! One writer task drains the outbound queue into the socket; one reader task
//! completes pending requests and routes `onEvent` notifications to the
//! candidate channel registered for the event's object id.

use super::{
    CandidateSender, EndpointBundle, IceCandidate, MediaEndpoint, MediaEngine, MediaError,
    MediaPipeline,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

/// Failure of a single JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RpcError {
    /// The server answered with an `error` object.
    Rejected { code: i64, message: String },
    /// The connection dropped before a response arrived.
    Disconnected,
}

impl From<RpcError> for MediaError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Rejected { code, message } => {
                MediaError::Engine(format!("kms error {code}: {message}"))
            }
            RpcError::Disconnected => MediaError::Engine("engine connection lost".to_string()),
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

/// State shared between the client and its reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<PendingMap>,
    listeners: Mutex<HashMap<String, CandidateSender>>,
    session_id: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl Shared {
    /// Fail every in-flight request and close every candidate channel.
    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);

        let pending: Vec<_> = self.pending.lock().await.drain().collect();
        let failed = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(Err(RpcError::Disconnected));
        }
        self.listeners.lock().await.clear();

        warn!(
            target: "groupcall.kurento",
            failed_requests = failed,
            "Media server connection lost"
        );
    }
}

struct Inner {
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl Inner {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(RpcError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session_id = self.shared.session_id.lock().await.clone();
        let frame = build_request(id, method, params, session_id.as_deref());

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        trace!(target: "groupcall.kurento", id, method, "Sending request");

        if self
            .outbound
            .send(Message::Text(frame.to_string().into()))
            .is_err()
        {
            self.shared.pending.lock().await.remove(&id);
            return Err(RpcError::Disconnected);
        }

        rx.await.map_err(|_| RpcError::Disconnected)?
    }

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        operation_params: Value,
    ) -> Result<Value, RpcError> {
        self.request(
            "invoke",
            json!({
                "object": object,
                "operation": operation,
                "operationParams": operation_params,
            }),
        )
        .await
    }

    async fn release(&self, object: &str) -> Result<(), RpcError> {
        self.request("release", json!({ "object": object }))
            .await
            .map(|_| ())
    }
}

/// Handle to a Kurento Media Server connection.
///
/// Cheap to clone; every clone shares the same socket.
#[derive(Clone)]
pub struct KurentoClient {
    inner: Arc<Inner>,
}

impl KurentoClient {
    /// Connect to a media server at `url` (e.g. `ws://localhost:8888/kurento`).
    pub async fn connect(url: &str) -> Result<Self, MediaError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| MediaError::Engine(format!("connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!(target: "groupcall.kurento", error = %e, "Write to media server failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(target: "groupcall.kurento", error = %e, "Read from media server failed");
                        break;
                    }
                };
                dispatch(&reader_shared, text.as_str()).await;
            }
            reader_shared.disconnect().await;
        });

        info!(target: "groupcall.kurento", url = %url, "Connected to media server");

        Ok(Self {
            inner: Arc::new(Inner {
                outbound,
                shared,
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Whether the underlying socket is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.shared.connected.load(Ordering::SeqCst)
    }

    /// Send a close frame; pending requests fail once the server closes.
    pub fn close(&self) {
        let _ = self.inner.outbound.send(Message::Close(None));
    }
}

#[async_trait]
impl MediaEngine for KurentoClient {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, MediaError> {
        let result = self
            .inner
            .request("create", json!({ "type": "MediaPipeline", "properties": {} }))
            .await?;
        let id = object_id(&result)?;

        debug!(target: "groupcall.kurento", pipeline_id = %id, "Pipeline created");

        Ok(Arc::new(KurentoPipeline {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct KurentoPipeline {
    id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl MediaPipeline for KurentoPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_endpoint(&self) -> Result<EndpointBundle, MediaError> {
        let result = self
            .inner
            .request(
                "create",
                json!({
                    "type": "WebRtcEndpoint",
                    "constructorParams": { "mediaPipeline": self.id },
                    "properties": {},
                }),
            )
            .await?;
        let id = object_id(&result)?;

        // Listener goes in before the subscription so no event can slip past.
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .shared
            .listeners
            .lock()
            .await
            .insert(id.clone(), tx);

        let subscribed = self
            .inner
            .request(
                "subscribe",
                json!({ "type": "IceCandidateFound", "object": id }),
            )
            .await;

        if let Err(e) = subscribed {
            self.inner.shared.listeners.lock().await.remove(&id);
            if let Err(release_err) = self.inner.release(&id).await {
                warn!(
                    target: "groupcall.kurento",
                    endpoint_id = %id,
                    error = ?release_err,
                    "Failed to release endpoint after subscribe failure"
                );
            }
            return Err(e.into());
        }

        debug!(
            target: "groupcall.kurento",
            pipeline_id = %self.id,
            endpoint_id = %id,
            "Endpoint created"
        );

        let endpoint: Arc<dyn MediaEndpoint> = Arc::new(KurentoEndpoint {
            id,
            inner: Arc::clone(&self.inner),
        });
        Ok((endpoint, rx))
    }

    async fn release(&self) -> Result<(), MediaError> {
        // Endpoint ids are scoped under their pipeline id.
        let prefix = format!("{}/", self.id);
        self.inner
            .shared
            .listeners
            .lock()
            .await
            .retain(|object, _| !object.starts_with(&prefix));

        self.inner.release(&self.id).await?;
        debug!(target: "groupcall.kurento", pipeline_id = %self.id, "Pipeline released");
        Ok(())
    }
}

struct KurentoEndpoint {
    id: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl MediaEndpoint for KurentoEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn process_offer(&self, sdp_offer: &str) -> Result<String, MediaError> {
        let result = self
            .inner
            .invoke(&self.id, "processOffer", json!({ "offer": sdp_offer }))
            .await
            .map_err(|e| match e {
                RpcError::Rejected { code, message } => {
                    MediaError::Negotiation(format!("kms error {code}: {message}"))
                }
                other => other.into(),
            })?;

        result
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| MediaError::Engine("processOffer returned no answer".to_string()))
    }

    async fn gather_candidates(&self) -> Result<(), MediaError> {
        self.inner
            .invoke(&self.id, "gatherCandidates", json!({}))
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.inner
            .invoke(
                &self.id,
                "addIceCandidate",
                json!({ "candidate": kms_candidate(&candidate) }),
            )
            .await?;
        Ok(())
    }

    async fn connect(&self, sink: &dyn MediaEndpoint) -> Result<(), MediaError> {
        self.inner
            .invoke(&self.id, "connect", json!({ "sink": sink.id() }))
            .await?;
        Ok(())
    }

    async fn release(&self) -> Result<(), MediaError> {
        self.inner.shared.listeners.lock().await.remove(&self.id);
        self.inner.release(&self.id).await?;
        Ok(())
    }
}

/// A decoded inbound frame.
#[derive(Debug, PartialEq)]
enum Frame {
    Response {
        id: u64,
        session_id: Option<String>,
        result: Result<Value, RpcError>,
    },
    CandidateFound {
        object: String,
        candidate: IceCandidate,
    },
    Ignored,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct EventValue {
    #[serde(rename = "type")]
    event_type: String,
    object: String,
    #[serde(default)]
    data: Value,
}

fn build_request(id: u64, method: &str, mut params: Value, session_id: Option<&str>) -> Value {
    if let (Some(session_id), Some(map)) = (session_id, params.as_object_mut()) {
        map.insert("sessionId".to_string(), Value::String(session_id.to_string()));
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

fn kms_candidate(candidate: &IceCandidate) -> Value {
    let mut value = json!({
        "__module__": "kurento",
        "__type__": "IceCandidate",
        "candidate": candidate.candidate,
        "sdpMLineIndex": candidate.sdp_m_line_index,
    });
    if let (Some(mid), Some(fields)) = (&candidate.sdp_mid, value.as_object_mut()) {
        fields.insert("sdpMid".to_string(), Value::String(mid.clone()));
    }
    value
}

fn object_id(result: &Value) -> Result<String, MediaError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MediaError::Engine("create returned no object id".to_string()))
}

fn parse_frame(text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Frame::Ignored;
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        if let Some(err) = value.get("error") {
            let body = serde_json::from_value::<RpcErrorBody>(err.clone()).unwrap_or(RpcErrorBody {
                code: 0,
                message: err.to_string(),
            });
            return Frame::Response {
                id,
                session_id: None,
                result: Err(RpcError::Rejected {
                    code: body.code,
                    message: body.message,
                }),
            };
        }
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Frame::Response {
            id,
            session_id,
            result: Ok(result),
        };
    }

    if value.get("method").and_then(Value::as_str) != Some("onEvent") {
        return Frame::Ignored;
    }

    let Some(event) = value
        .pointer("/params/value")
        .cloned()
        .and_then(|v| serde_json::from_value::<EventValue>(v).ok())
    else {
        return Frame::Ignored;
    };
    if event.event_type != "IceCandidateFound" {
        return Frame::Ignored;
    }
    match event
        .data
        .get("candidate")
        .cloned()
        .map(serde_json::from_value::<IceCandidate>)
    {
        Some(Ok(candidate)) => Frame::CandidateFound {
            object: event.object,
            candidate,
        },
        _ => Frame::Ignored,
    }
}

async fn dispatch(shared: &Shared, text: &str) {
    match parse_frame(text) {
        Frame::Response {
            id,
            session_id,
            result,
        } => {
            if let Some(session_id) = session_id {
                let mut current = shared.session_id.lock().await;
                if current.is_none() {
                    debug!(target: "groupcall.kurento", session_id = %session_id, "Media server session established");
                    *current = Some(session_id);
                }
            }
            match shared.pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(result);
                }
                None => {
                    debug!(target: "groupcall.kurento", id, "Response for unknown request");
                }
            }
        }
        Frame::CandidateFound { object, candidate } => {
            let listeners = shared.listeners.lock().await;
            match listeners.get(&object) {
                Some(tx) => {
                    let _ = tx.send(candidate);
                }
                None => {
                    trace!(target: "groupcall.kurento", object = %object, "Candidate for unknown endpoint");
                }
            }
        }
        Frame::Ignored => {
            trace!(target: "groupcall.kurento", "Ignoring media server frame");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_adds_session_id() {
        let frame = build_request(7, "invoke", json!({ "object": "p/e" }), Some("s-1"));
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["method"], "invoke");
        assert_eq!(frame["params"]["object"], "p/e");
        assert_eq!(frame["params"]["sessionId"], "s-1");

        let first = build_request(1, "create", json!({ "type": "MediaPipeline" }), None);
        assert!(first["params"].get("sessionId").is_none());
    }

    #[test]
    fn test_kms_candidate_shape() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 1 10.0.0.1 4000 typ host".to_string(),
            sdp_mid: Some("audio".to_string()),
            sdp_m_line_index: 1,
        };
        let value = kms_candidate(&candidate);
        assert_eq!(value["__module__"], "kurento");
        assert_eq!(value["__type__"], "IceCandidate");
        assert_eq!(value["sdpMid"], "audio");
        assert_eq!(value["sdpMLineIndex"], 1);
    }

    #[test]
    fn test_kms_candidate_omits_missing_mid() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 1 10.0.0.1 4000 typ host".to_string(),
            sdp_mid: None,
            sdp_m_line_index: 0,
        };
        let value = kms_candidate(&candidate);
        assert!(value.get("sdpMid").is_none());
        assert_eq!(value["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_parse_success_response_captures_session() {
        let frame = parse_frame(
            r#"{"jsonrpc":"2.0","id":3,"result":{"value":"pipe-1_kurento.MediaPipeline","sessionId":"abc"}}"#,
        );
        match frame {
            Frame::Response {
                id,
                session_id,
                result,
            } => {
                assert_eq!(id, 3);
                assert_eq!(session_id.as_deref(), Some("abc"));
                assert_eq!(
                    object_id(&result.unwrap()).unwrap(),
                    "pipe-1_kurento.MediaPipeline"
                );
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let frame = parse_frame(
            r#"{"jsonrpc":"2.0","id":9,"error":{"code":40208,"message":"SDP parse error"}}"#,
        );
        assert_eq!(
            frame,
            Frame::Response {
                id: 9,
                session_id: None,
                result: Err(RpcError::Rejected {
                    code: 40208,
                    message: "SDP parse error".to_string()
                }),
            }
        );
    }

    #[test]
    fn test_parse_candidate_event() {
        let frame = parse_frame(
            r#"{"jsonrpc":"2.0","method":"onEvent","params":{"value":{
                "type":"IceCandidateFound",
                "object":"pipe/ep-1",
                "data":{"candidate":{"candidate":"candidate:2 1 UDP 5 1.2.3.4 9 typ srflx","sdpMid":"0","sdpMLineIndex":0}}
            }}}"#,
        );
        match frame {
            Frame::CandidateFound { object, candidate } => {
                assert_eq!(object, "pipe/ep-1");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignores_other_events_and_garbage() {
        assert_eq!(
            parse_frame(
                r#"{"method":"onEvent","params":{"value":{"type":"MediaFlowInStateChange","object":"x","data":{}}}}"#
            ),
            Frame::Ignored
        );
        assert_eq!(parse_frame("not json"), Frame::Ignored);
    }

    #[test]
    fn test_rpc_error_conversion() {
        let err: MediaError = RpcError::Disconnected.into();
        assert!(matches!(err, MediaError::Engine(_)));
    }

    #[tokio::test]
    async fn test_dispatch_routes_candidate_to_listener() {
        let shared = Shared::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.listeners.lock().await.insert("pipe/ep-2".to_string(), tx);

        dispatch(
            &shared,
            r#"{"method":"onEvent","params":{"value":{"type":"IceCandidateFound","object":"pipe/ep-2",
                "data":{"candidate":{"candidate":"c","sdpMid":"1","sdpMLineIndex":1}}}}}"#,
        )
        .await;

        let candidate = rx.try_recv().unwrap();
        assert_eq!(candidate.sdp_m_line_index, 1);
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_requests() {
        let shared = Shared::default();
        shared.connected.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().await.insert(1, tx);
        let (ltx, mut lrx) = mpsc::unbounded_channel();
        shared.listeners.lock().await.insert("e".to_string(), ltx);

        shared.disconnect().await;

        assert_eq!(rx.await.unwrap(), Err(RpcError::Disconnected));
        assert!(lrx.recv().await.is_none());
        assert!(!shared.connected.load(Ordering::SeqCst));
    }
}
