//! Test fixtures: canned commands and a fully wired controller over mock engines.

use crate::{MockMediaEngine, RecordingNotifier};

use common::types::IceCandidate;
use pc_service::dispatcher::{CommandDispatcher, Participant, PlayerControl};
use pc_service::engine::MediaEngine;
use pc_service::errors::PcError;
use pc_service::notify::Notifier;
use pc_service::playback::PlaybackController;
use pc_service::scheduler::{AuthorizationPolicy, Node, NodePool, Scheduler};
use pc_service::session::SessionRegistry;
use pc_service::signaling::SignalingHandshake;
use serde_json::{json, Value};
use std::sync::Arc;

/// Media source used by `start` fixtures.
pub const VIDEO_URL: &str = "http://files.example.org/video/sintel.webm";

/// Minimal browser-style SDP offer.
pub const SDP_OFFER: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// Participant with a caller identity.
pub fn participant(participant_id: &str, user: &str) -> Participant {
    Participant::new(participant_id, Some(user.to_string()))
}

/// Participant whose connection carried no identity.
pub fn anonymous(participant_id: &str) -> Participant {
    Participant::new(participant_id, None)
}

pub fn remote_candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122252543 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
    }
}

pub fn start_command() -> Value {
    json!({ "id": "start", "videourl": VIDEO_URL, "sdpOffer": SDP_OFFER })
}

/// A command with no fields (`play`, `pause`, `stop`, or anything unknown).
pub fn command(id: &str) -> Value {
    json!({ "id": id })
}

pub fn seek_command(position_ms: i64) -> Value {
    json!({ "id": "doSeek", "position": position_ms })
}

pub fn ice_command(candidate: &IceCandidate) -> Value {
    json!({ "id": "onIceCandidate", "candidate": candidate })
}

/// Controller wired over mock engines and a recording notifier.
pub struct TestHarness {
    pub engines: Vec<Arc<MockMediaEngine>>,
    pub pool: Arc<NodePool>,
    pub sessions: Arc<SessionRegistry>,
    pub notifier: Arc<RecordingNotifier>,
    pub dispatcher: CommandDispatcher<PlayerControl>,
}

impl TestHarness {
    /// `node_count` unlimited nodes, no authorization rule.
    pub fn new(node_count: usize) -> Self {
        Self::builder().nodes(node_count).build()
    }

    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    pub fn engine(&self, index: usize) -> &Arc<MockMediaEngine> {
        &self.engines[index]
    }

    /// Run one `customRequest` payload through the dispatcher.
    pub async fn send(&self, participant: &Participant, command: Value) -> Result<(), PcError> {
        self.dispatcher.handle(participant, command).await
    }

    pub async fn start(&self, participant: &Participant) -> Result<(), PcError> {
        self.send(participant, start_command()).await
    }

    /// The participant's connection went away.
    pub async fn disconnect(&self, participant: &Participant) {
        self.dispatcher.participant_left(participant).await;
    }

    pub fn loads(&self) -> Vec<usize> {
        self.pool.loads()
    }

    /// Pipelines still alive across all engines.
    pub fn live_pipelines(&self) -> usize {
        self.engines.iter().map(|e| e.live_pipelines()).sum()
    }
}

/// Builder for [`TestHarness`].
#[derive(Default)]
pub struct TestHarnessBuilder {
    engines: Vec<MockMediaEngine>,
    capacities: Vec<Option<usize>>,
    auth_pattern: Option<String>,
}

impl TestHarnessBuilder {
    /// Add `count` default mock engines with unlimited capacity.
    pub fn nodes(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.engines.push(MockMediaEngine::new());
            self.capacities.push(None);
        }
        self
    }

    /// Add one node backed by `engine`.
    pub fn node(mut self, engine: MockMediaEngine, capacity: Option<usize>) -> Self {
        self.engines.push(engine);
        self.capacities.push(capacity);
        self
    }

    pub fn auth_pattern(mut self, pattern: &str) -> Self {
        self.auth_pattern = Some(pattern.to_string());
        self
    }

    pub fn build(self) -> TestHarness {
        let engines: Vec<Arc<MockMediaEngine>> = self.engines.into_iter().map(Arc::new).collect();
        let nodes = engines
            .iter()
            .zip(self.capacities)
            .enumerate()
            .map(|(i, (engine, capacity))| {
                let engine: Arc<dyn MediaEngine> = Arc::clone(engine) as Arc<dyn MediaEngine>;
                Node::new(format!("ws://kms-{i}:8888/kurento"), engine, capacity)
            })
            .collect();
        let pool = Arc::new(NodePool::new(nodes));

        let policy = match &self.auth_pattern {
            Some(pattern) => AuthorizationPolicy::from_pattern(pattern).unwrap(),
            None => AuthorizationPolicy::allow_all(),
        };
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&pool), policy));
        let sessions = Arc::new(SessionRegistry::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let sink: Arc<dyn Notifier> = Arc::clone(&notifier) as Arc<dyn Notifier>;

        let control = PlayerControl::new(
            SignalingHandshake::new(scheduler, Arc::clone(&sessions), Arc::clone(&sink)),
            PlaybackController::new(Arc::clone(&sessions), sink),
        );

        TestHarness {
            engines,
            pool,
            sessions,
            notifier,
            dispatcher: CommandDispatcher::new(Arc::new(control)),
        }
    }
}
