//! JSON-RPC client for one Kurento Media Server.
//!
//! One WebSocket per server. A writer task drains an outbound queue; a reader
//! task completes pending requests by id and routes `onEvent` notifications to
//! subscribers keyed by (object, event type). When the socket closes, every
//! pending request fails with [`KmsError::Disconnected`] and every subscription
//! is dropped.

use super::KmsError;
use crate::engine::{EngineEvent, EngineEventKind, EventSink, ObjectId};

use common::jsonrpc::{Id, Message, Request};
use common::types::{IceCandidate, MediaState};
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Responder = oneshot::Sender<Result<Value, KmsError>>;

/// State shared between the client and its reader/writer tasks.
#[derive(Debug, Default)]
struct Shared {
    pending: DashMap<u64, Responder>,
    subscribers: DashMap<(String, EngineEventKind), Vec<EventSink>>,
    session_id: Mutex<Option<String>>,
    connected: AtomicBool,
}

impl Shared {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_session(&self, result: &Value) {
        if let Some(session) = result.get("sessionId").and_then(Value::as_str) {
            let mut current = self.session_id.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() != Some(session) {
                *current = Some(session.to_string());
            }
        }
    }

    /// Handle one text frame from the server.
    fn dispatch(&self, uri: &str, text: &str) {
        match Message::parse(text) {
            Ok(Message::Response(response)) => {
                let Some(id) = response.id.as_ref().and_then(request_id) else {
                    warn!(target: "pc.kms", uri = %uri, "Response without usable id");
                    return;
                };
                let Some((_, respond_to)) = self.pending.remove(&id) else {
                    debug!(target: "pc.kms", uri = %uri, id = id, "Response for unknown request");
                    return;
                };

                let result = response
                    .into_result()
                    .map_err(|e| KmsError::Server {
                        code: e.code,
                        message: e.message,
                    })
                    .inspect(|value| self.remember_session(value));
                let _ = respond_to.send(result);
            }
            Ok(Message::Request(request)) if request.method == "onEvent" => {
                if let Some(params) = request.params {
                    self.route_event(uri, &params);
                }
            }
            Ok(Message::Request(request)) => {
                debug!(
                    target: "pc.kms",
                    uri = %uri,
                    method = %request.method,
                    "Ignoring server request"
                );
            }
            Err(e) => {
                warn!(target: "pc.kms", uri = %uri, error = %e, "Unparseable frame");
            }
        }
    }

    fn route_event(&self, uri: &str, params: &Value) {
        let Some(value) = params.get("value") else {
            return;
        };
        let object = value.get("object").and_then(Value::as_str);
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(EngineEventKind::from_wire);
        let (Some(object), Some(kind)) = (object, kind) else {
            return;
        };

        let data = value.get("data").cloned().unwrap_or(Value::Null);
        let Some(event) = decode_event(kind, &data) else {
            warn!(
                target: "pc.kms",
                uri = %uri,
                object = %object,
                event = kind.as_str(),
                "Undecodable event payload"
            );
            return;
        };

        let key = (object.to_string(), kind);
        let drained = match self.subscribers.get_mut(&key) {
            Some(mut sinks) => {
                sinks.retain(|sink| sink.send(event.clone()).is_ok());
                sinks.is_empty()
            }
            None => false,
        };
        if drained {
            // Every receiver is gone: the owning session was torn down.
            self.subscribers.remove_if(&key, |_, sinks| sinks.is_empty());
        }
    }

    fn prune_closed(&self) {
        self.subscribers.retain(|_, sinks| {
            sinks.retain(|sink| !sink.is_closed());
            !sinks.is_empty()
        });
    }

    fn disconnect(&self, uri: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, respond_to)) = self.pending.remove(&id) {
                let _ = respond_to.send(Err(KmsError::Disconnected));
            }
        }
        self.subscribers.clear();

        warn!(target: "pc.kms", uri = %uri, "Media server connection lost");
    }
}

fn request_id(id: &Id) -> Option<u64> {
    match id {
        Id::Number(n) => u64::try_from(*n).ok(),
        Id::String(s) => s.parse().ok(),
    }
}

fn decode_event(kind: EngineEventKind, data: &Value) -> Option<EngineEvent> {
    match kind {
        EngineEventKind::IceCandidateFound => {
            let candidate: IceCandidate = serde_json::from_value(data.get("candidate")?.clone()).ok()?;
            Some(EngineEvent::IceCandidateFound { candidate })
        }
        EngineEventKind::MediaStateChanged => {
            let new_state: MediaState = serde_json::from_value(data.get("newState")?.clone()).ok()?;
            Some(EngineEvent::MediaStateChanged { new_state })
        }
        EngineEventKind::Error => Some(EngineEvent::Error {
            description: data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        EngineEventKind::EndOfStream => Some(EngineEvent::EndOfStream),
    }
}

/// Connection to one media server.
#[derive(Debug)]
pub struct KmsClient {
    uri: String,
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    cancel_token: CancellationToken,
}

impl KmsClient {
    /// Open the WebSocket to `uri` and start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// `KmsError::Connect` if the server cannot be reached.
    pub async fn connect(uri: &str, cancel_token: CancellationToken) -> Result<Self, KmsError> {
        let (ws, _) = connect_async(uri)
            .await
            .map_err(|e| KmsError::Connect(format!("{uri}: {e}")))?;
        let (sink, stream) = ws.split();

        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            uri.to_string(),
            sink,
            outbound_rx,
            Arc::clone(&shared),
            cancel_token.clone(),
        ));
        tokio::spawn(read_loop(
            uri.to_string(),
            stream,
            Arc::clone(&shared),
            cancel_token.clone(),
        ));

        info!(target: "pc.kms", uri = %uri, "Connected to media server");

        Ok(Self {
            uri: uri.to_string(),
            outbound,
            shared,
            next_id: AtomicU64::new(1),
            cancel_token,
        })
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Server session id, once the server has assigned one.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    /// Send a request and wait for its result.
    ///
    /// # Errors
    ///
    /// - `KmsError::Server` - the server answered with an error
    /// - `KmsError::Disconnected` - the connection is down or dropped mid-request
    pub async fn request(&self, method: &str, mut params: Value) -> Result<Value, KmsError> {
        if !self.is_connected() {
            return Err(KmsError::Disconnected);
        }

        if let (Some(fields), Some(session)) = (params.as_object_mut(), self.session_id()) {
            fields.insert("sessionId".to_string(), Value::String(session));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&Request::new(id, method, params))
            .map_err(|e| KmsError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        // A disconnect between the check above and the insert would miss this entry.
        if !self.is_connected() || self.outbound.send(frame).is_err() {
            self.shared.pending.remove(&id);
            return Err(KmsError::Disconnected);
        }

        debug!(target: "pc.kms", uri = %self.uri, id = id, method = %method, "Request sent");

        rx.await.map_err(|_| KmsError::Disconnected)?
    }

    /// Create an object; returns its id.
    pub async fn create(&self, type_name: &str, constructor_params: Value) -> Result<ObjectId, KmsError> {
        let result = self
            .request(
                "create",
                json!({ "type": type_name, "constructorParams": constructor_params, "properties": {} }),
            )
            .await?;

        result
            .get("value")
            .and_then(Value::as_str)
            .map(ObjectId::new)
            .ok_or_else(|| KmsError::Protocol(format!("create {type_name} returned no object id")))
    }

    /// Invoke an operation; returns the `value` member of the result (or null).
    pub async fn invoke(
        &self,
        object: &ObjectId,
        operation: &str,
        operation_params: Value,
    ) -> Result<Value, KmsError> {
        let result = self
            .request(
                "invoke",
                json!({
                    "object": object.as_str(),
                    "operation": operation,
                    "operationParams": operation_params,
                }),
            )
            .await?;

        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    /// Route events of `kind` raised by `object` into `sink`.
    ///
    /// The sink is registered before the request goes out so no early event is lost.
    pub async fn subscribe(
        &self,
        object: &ObjectId,
        kind: EngineEventKind,
        sink: EventSink,
    ) -> Result<(), KmsError> {
        self.shared
            .subscribers
            .entry((object.as_str().to_string(), kind))
            .or_default()
            .push(sink);

        self.request(
            "subscribe",
            json!({ "type": kind.as_str(), "object": object.as_str() }),
        )
        .await
        .map(|_| ())
    }

    /// Release an object and forget subscriptions whose receivers are gone.
    pub async fn release(&self, object: &ObjectId) -> Result<(), KmsError> {
        let result = self
            .request("release", json!({ "object": object.as_str() }))
            .await
            .map(|_| ());
        self.shared.prune_closed();
        result
    }

    /// Liveness round trip.
    pub async fn ping(&self) -> Result<(), KmsError> {
        let result = self.request("ping", json!({ "interval": 240_000 })).await?;
        match result.get("value").and_then(Value::as_str) {
            Some("pong") => Ok(()),
            _ => Err(KmsError::Protocol(format!("unexpected ping result: {result}"))),
        }
    }

    /// Number of live (object, event) subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.subscribers.len()
    }
}

impl Drop for KmsClient {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn write_loop(
    uri: String,
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                    warn!(target: "pc.kms", uri = %uri, error = %e, "Write to media server failed");
                    break;
                }
            }
        }
    }
    shared.disconnect(&uri);
}

async fn read_loop(
    uri: String,
    mut stream: SplitStream<WsStream>,
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch(&uri, &text),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(target: "pc.kms", uri = %uri, error = %e, "Read from media server failed");
                    break;
                }
            }
        }
    }
    shared.disconnect(&uri);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Scripted media server: answers each request with `answer(method, params)`
    /// and can push raw frames to the client.
    async fn fake_server<F>(answer: F) -> (String, mpsc::UnboundedSender<String>)
    where
        F: Fn(&str, &Value) -> Value + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            let (mut sink, mut stream) = ws.split();
            loop {
                tokio::select! {
                    pushed = push_rx.recv() => match pushed {
                        Some(frame) if frame == "close" => {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        }
                        Some(frame) => sink.send(WsMessage::Text(frame)).await.unwrap(),
                        None => break,
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            let request: Value = serde_json::from_str(&text).unwrap();
                            let method = request["method"].as_str().unwrap().to_string();
                            let reply = answer(&method, &request["params"]);
                            let mut reply = reply.as_object().unwrap().clone();
                            reply.insert("jsonrpc".to_string(), json!("2.0"));
                            reply.insert("id".to_string(), request["id"].clone());
                            sink.send(WsMessage::Text(Value::Object(reply).to_string()))
                                .await
                                .unwrap();
                        }
                        _ => break,
                    }
                }
            }
        });

        (format!("ws://{addr}"), push_tx)
    }

    fn ok(value: Value) -> Value {
        json!({ "result": { "value": value, "sessionId": "kms-session-1" } })
    }

    #[tokio::test]
    async fn test_create_returns_object_id_and_tracks_session() {
        let (uri, _push) = fake_server(|method, params| {
            assert_eq!(method, "create");
            assert_eq!(params["type"], "MediaPipeline");
            ok(json!("pipeline-1"))
        })
        .await;

        let client = KmsClient::connect(&uri, CancellationToken::new()).await.unwrap();
        let id = client.create("MediaPipeline", json!({})).await.unwrap();

        assert_eq!(id.as_str(), "pipeline-1");
        assert_eq!(client.session_id().as_deref(), Some("kms-session-1"));
    }

    #[tokio::test]
    async fn test_session_id_sent_after_first_response() {
        let (uri, _push) = fake_server(|method, params| match method {
            "ping" => ok(json!("pong")),
            _ => {
                assert_eq!(params["sessionId"], "kms-session-1");
                ok(Value::Null)
            }
        })
        .await;

        let client = KmsClient::connect(&uri, CancellationToken::new()).await.unwrap();
        client.ping().await.unwrap();
        client
            .invoke(&ObjectId::new("player-1"), "play", json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let (uri, _push) = fake_server(|_, _| {
            json!({ "error": { "code": 40101, "message": "Not seekable" } })
        })
        .await;

        let client = KmsClient::connect(&uri, CancellationToken::new()).await.unwrap();
        let err = client
            .invoke(&ObjectId::new("player-1"), "setPosition", json!({ "position": 5 }))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            KmsError::Server {
                code: 40101,
                message: "Not seekable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_events_routed_to_subscriber() {
        let (uri, push) = fake_server(|_, _| ok(json!("sub-1"))).await;
        let client = KmsClient::connect(&uri, CancellationToken::new()).await.unwrap();

        let webrtc = ObjectId::new("webrtc-1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe(&webrtc, EngineEventKind::MediaStateChanged, tx)
            .await
            .unwrap();

        // Different object: must not be delivered.
        push.send(
            json!({"jsonrpc": "2.0", "method": "onEvent", "params": {"value": {
                "object": "webrtc-2", "type": "MediaStateChanged",
                "data": {"newState": "CONNECTED"}
            }}})
            .to_string(),
        )
        .unwrap();
        push.send(
            json!({"jsonrpc": "2.0", "method": "onEvent", "params": {"value": {
                "object": "webrtc-1", "type": "MediaStateChanged",
                "data": {"oldState": "DISCONNECTED", "newState": "CONNECTED"}
            }}})
            .to_string(),
        )
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            EngineEvent::MediaStateChanged {
                new_state: MediaState::Connected
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriber_pruned_on_release() {
        let (uri, _push) = fake_server(|_, _| ok(Value::Null)).await;
        let client = KmsClient::connect(&uri, CancellationToken::new()).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        client
            .subscribe(&ObjectId::new("player-1"), EngineEventKind::EndOfStream, tx)
            .await
            .unwrap();
        assert_eq!(client.subscription_count(), 1);

        drop(rx);
        client.release(&ObjectId::new("pipeline-1")).await.unwrap();
        assert_eq!(client.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_fails_requests_and_drops_subscriptions() {
        let (uri, push) = fake_server(|_, _| ok(Value::Null)).await;
        let client = KmsClient::connect(&uri, CancellationToken::new()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .subscribe(&ObjectId::new("player-1"), EngineEventKind::Error, tx)
            .await
            .unwrap();

        push.send("close".to_string()).unwrap();

        // Sink dropped by the client once the socket is gone.
        assert!(rx.recv().await.is_none());
        assert!(!client.is_connected());
        assert_eq!(
            client.create("MediaPipeline", json!({})).await.unwrap_err(),
            KmsError::Disconnected
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = KmsClient::connect(&format!("ws://{addr}"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KmsError::Connect(_)));
    }

    #[test]
    fn test_decode_error_and_candidate_events() {
        let event = decode_event(
            EngineEventKind::IceCandidateFound,
            &json!({"candidate": {
                "__module__": "kurento", "__type__": "IceCandidate",
                "candidate": "candidate:1 1 UDP 1 10.0.0.1 9 typ host",
                "sdpMid": "0", "sdpMLineIndex": 0
            }}),
        )
        .unwrap();
        assert!(matches!(event, EngineEvent::IceCandidateFound { .. }));

        assert_eq!(
            decode_event(EngineEventKind::Error, &json!({"description": "404"})),
            Some(EngineEvent::Error {
                description: "404".to_string()
            })
        );
        assert_eq!(
            decode_event(EngineEventKind::MediaStateChanged, &json!({})),
            None
        );
    }
}
