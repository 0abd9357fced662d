//! Scriptable in-memory media engine.
//!
//! `MockMediaEngine` hands out sequential object ids, records every call, can
//! be told to fail or stall any operation, and lets tests raise engine events
//! on the sinks sessions subscribed with.
//!
//! # Example
//!
//! ```rust,ignore
//! use pc_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::new().with_failure("set_position", rejected("setPosition"));
//! // ... start a session on it ...
//! engine.broadcast(EngineEvent::MediaStateChanged { new_state: MediaState::Connected });
//! ```

use async_trait::async_trait;
use common::types::{IceCandidate, VideoInfo};
use pc_service::engine::{EngineError, EngineEvent, EngineEventKind, EventSink, MediaEngine, ObjectId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// SDP answer returned by default.
pub const MOCK_SDP_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock-answer\r\n";

/// An engine refusal for `operation`, as a media server would report it.
pub fn rejected(operation: &str) -> EngineError {
    EngineError::Rejected {
        operation: operation.to_string(),
        message: "refused by mock engine".to_string(),
    }
}

struct Subscription {
    object: ObjectId,
    kind: EngineEventKind,
    sink: EventSink,
}

/// Mock media engine for integration tests.
pub struct MockMediaEngine {
    next_id: AtomicUsize,
    connected: AtomicBool,
    sdp_answer: String,
    video_info: VideoInfo,
    failures: Mutex<HashMap<String, EngineError>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<ObjectId>>,
    released: Mutex<Vec<ObjectId>>,
    candidates: Mutex<Vec<IceCandidate>>,
    positions: Mutex<Vec<i64>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaEngine {
    /// Engine that accepts everything.
    pub fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            connected: AtomicBool::new(true),
            sdp_answer: MOCK_SDP_ANSWER.to_string(),
            video_info: VideoInfo {
                is_seekable: true,
                init_seekable: 0,
                end_seekable: 120_000,
                duration: 120_000,
            },
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Make `operation` (a `MediaEngine` method name) fail with `error`.
    pub fn with_failure(self, operation: &str, error: EngineError) -> Self {
        self.set_failure(operation, error);
        self
    }

    /// Make `operation` wait `delay` before it does anything.
    pub fn with_delay(self, operation: &str, delay: Duration) -> Self {
        self.set_delay(operation, delay);
        self
    }

    pub fn with_video_info(mut self, info: VideoInfo) -> Self {
        self.video_info = info;
        self
    }

    pub fn with_sdp_answer(mut self, answer: &str) -> Self {
        self.sdp_answer = answer.to_string();
        self
    }

    pub fn set_failure(&self, operation: &str, error: EngineError) {
        self.failures
            .lock()
            .unwrap()
            .insert(operation.to_string(), error);
    }

    pub fn set_delay(&self, operation: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(operation.to_string(), delay);
    }

    pub fn clear_failure(&self, operation: &str) {
        self.failures.lock().unwrap().remove(operation);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every call made, by method name, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls to `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    /// Objects created so far, oldest first.
    pub fn created(&self) -> Vec<ObjectId> {
        self.created.lock().unwrap().clone()
    }

    /// Most recently created object whose id starts with `prefix`
    /// (`pipeline`, `webrtc`, `player`).
    pub fn last_created(&self, prefix: &str) -> Option<ObjectId> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|id| id.as_str().starts_with(prefix))
            .cloned()
    }

    pub fn released(&self) -> Vec<ObjectId> {
        self.released.lock().unwrap().clone()
    }

    /// Pipelines created and not yet released.
    pub fn live_pipelines(&self) -> usize {
        let released = self.released.lock().unwrap();
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str().starts_with("pipeline") && !released.contains(id))
            .count()
    }

    /// Remote ICE candidates added, in order.
    pub fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    /// Seek positions requested, in order.
    pub fn positions(&self) -> Vec<i64> {
        self.positions.lock().unwrap().clone()
    }

    /// Subscriptions whose receiver is still alive.
    pub fn open_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|sub| !sub.sink.is_closed())
            .count()
    }

    /// Raise `event` on `object`; returns how many subscribers received it.
    pub fn emit(&self, object: &ObjectId, event: EngineEvent) -> usize {
        self.deliver(|sub| &sub.object == object, event)
    }

    /// Raise `event` on every object subscribed to its kind.
    pub fn broadcast(&self, event: EngineEvent) -> usize {
        self.deliver(|_| true, event)
    }

    fn deliver(&self, matches: impl Fn(&Subscription) -> bool, event: EngineEvent) -> usize {
        let kind = event.kind();
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions.retain(|sub| !sub.sink.is_closed());
        subscriptions
            .iter()
            .filter(|sub| sub.kind == kind && matches(sub))
            .filter(|sub| sub.sink.send(event.clone()).is_ok())
            .count()
    }

    async fn record(&self, operation: &str) -> Result<(), EngineError> {
        let delay = self.delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(operation.to_string());
        match self.failures.lock().unwrap().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn new_object(&self, prefix: &str) -> ObjectId {
        let id = ObjectId::new(format!(
            "{prefix}-{}",
            self.next_id.fetch_add(1, Ordering::SeqCst)
        ));
        self.created.lock().unwrap().push(id.clone());
        id
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_pipeline(&self) -> Result<ObjectId, EngineError> {
        self.record("create_pipeline").await?;
        Ok(self.new_object("pipeline"))
    }

    async fn create_webrtc_endpoint(&self, _pipeline: &ObjectId) -> Result<ObjectId, EngineError> {
        self.record("create_webrtc_endpoint").await?;
        Ok(self.new_object("webrtc"))
    }

    async fn create_source_endpoint(
        &self,
        _pipeline: &ObjectId,
        _uri: &str,
    ) -> Result<ObjectId, EngineError> {
        self.record("create_source_endpoint").await?;
        Ok(self.new_object("player"))
    }

    async fn connect(&self, _source: &ObjectId, _sink: &ObjectId) -> Result<(), EngineError> {
        self.record("connect").await
    }

    async fn process_offer(&self, _webrtc: &ObjectId, _offer: &str) -> Result<String, EngineError> {
        self.record("process_offer").await?;
        Ok(self.sdp_answer.clone())
    }

    async fn gather_candidates(&self, _webrtc: &ObjectId) -> Result<(), EngineError> {
        self.record("gather_candidates").await
    }

    async fn add_ice_candidate(
        &self,
        _webrtc: &ObjectId,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError> {
        self.record("add_ice_candidate").await?;
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn play(&self, _source: &ObjectId) -> Result<(), EngineError> {
        self.record("play").await
    }

    async fn pause(&self, _source: &ObjectId) -> Result<(), EngineError> {
        self.record("pause").await
    }

    async fn set_position(&self, _source: &ObjectId, position_ms: i64) -> Result<(), EngineError> {
        self.record("set_position").await?;
        self.positions.lock().unwrap().push(position_ms);
        Ok(())
    }

    async fn get_video_info(&self, _source: &ObjectId) -> Result<VideoInfo, EngineError> {
        self.record("get_video_info").await?;
        Ok(self.video_info)
    }

    async fn subscribe(
        &self,
        object: &ObjectId,
        kind: EngineEventKind,
        sink: EventSink,
    ) -> Result<(), EngineError> {
        self.record("subscribe").await?;
        self.subscriptions.lock().unwrap().push(Subscription {
            object: object.clone(),
            kind,
            sink,
        });
        Ok(())
    }

    async fn release(&self, object: &ObjectId) -> Result<(), EngineError> {
        self.record("release").await?;
        self.released.lock().unwrap().push(object.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
