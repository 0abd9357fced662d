//! [`MediaEngine`] backed by a Kurento Media Server.

use super::{KmsClient, KmsError};
use crate::engine::{EngineError, EngineEventKind, EventSink, MediaEngine, ObjectId};

use async_trait::async_trait;
use common::types::{IceCandidate, VideoInfo};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const MEDIA_PIPELINE: &str = "MediaPipeline";
const WEBRTC_ENDPOINT: &str = "WebRtcEndpoint";
const PLAYER_ENDPOINT: &str = "PlayerEndpoint";

/// Kurento-backed media engine for one node.
#[derive(Debug, Clone)]
pub struct KurentoEngine {
    client: Arc<KmsClient>,
}

impl KurentoEngine {
    #[must_use]
    pub fn new(client: Arc<KmsClient>) -> Self {
        Self { client }
    }

    /// Connect to the media server at `uri`.
    ///
    /// # Errors
    ///
    /// `KmsError::Connect` if the server is unreachable.
    pub async fn connect(uri: &str, cancel_token: CancellationToken) -> Result<Self, KmsError> {
        Ok(Self::new(Arc::new(KmsClient::connect(uri, cancel_token).await?)))
    }

    #[must_use]
    pub fn client(&self) -> &Arc<KmsClient> {
        &self.client
    }

    async fn invoke(
        &self,
        object: &ObjectId,
        operation: &str,
        params: Value,
    ) -> Result<Value, EngineError> {
        self.client
            .invoke(object, operation, params)
            .await
            .map_err(|e| e.into_engine_error(operation))
    }

    async fn create(&self, type_name: &str, params: Value) -> Result<ObjectId, EngineError> {
        self.client
            .create(type_name, params)
            .await
            .map_err(|e| e.into_engine_error(&format!("create {type_name}")))
    }
}

fn decode_video_info(value: &Value) -> Result<VideoInfo, EngineError> {
    let int = |field: &str| {
        value
            .get(field)
            .and_then(Value::as_i64)
            .ok_or_else(|| EngineError::Protocol(format!("getVideoInfo: missing {field}")))
    };

    Ok(VideoInfo {
        is_seekable: value
            .get("isSeekable")
            .and_then(Value::as_bool)
            .ok_or_else(|| EngineError::Protocol("getVideoInfo: missing isSeekable".to_string()))?,
        init_seekable: int("seekableInit")?,
        end_seekable: int("seekableEnd")?,
        duration: int("duration")?,
    })
}

#[async_trait]
impl MediaEngine for KurentoEngine {
    async fn create_pipeline(&self) -> Result<ObjectId, EngineError> {
        self.create(MEDIA_PIPELINE, json!({})).await
    }

    async fn create_webrtc_endpoint(&self, pipeline: &ObjectId) -> Result<ObjectId, EngineError> {
        self.create(WEBRTC_ENDPOINT, json!({ "mediaPipeline": pipeline.as_str() }))
            .await
    }

    async fn create_source_endpoint(
        &self,
        pipeline: &ObjectId,
        uri: &str,
    ) -> Result<ObjectId, EngineError> {
        self.create(
            PLAYER_ENDPOINT,
            json!({ "mediaPipeline": pipeline.as_str(), "uri": uri }),
        )
        .await
    }

    async fn connect(&self, source: &ObjectId, sink: &ObjectId) -> Result<(), EngineError> {
        self.invoke(source, "connect", json!({ "sink": sink.as_str() }))
            .await
            .map(|_| ())
    }

    async fn process_offer(&self, webrtc: &ObjectId, offer: &str) -> Result<String, EngineError> {
        let answer = self
            .invoke(webrtc, "processOffer", json!({ "offer": offer }))
            .await?;
        answer
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngineError::Protocol("processOffer returned no SDP answer".to_string()))
    }

    async fn gather_candidates(&self, webrtc: &ObjectId) -> Result<(), EngineError> {
        self.invoke(webrtc, "gatherCandidates", json!({}))
            .await
            .map(|_| ())
    }

    async fn add_ice_candidate(
        &self,
        webrtc: &ObjectId,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError> {
        let params = json!({
            "candidate": {
                "__module__": "kurento",
                "__type__": "IceCandidate",
                "candidate": candidate.candidate,
                "sdpMid": candidate.sdp_mid,
                "sdpMLineIndex": candidate.sdp_m_line_index,
            }
        });
        self.invoke(webrtc, "addIceCandidate", params)
            .await
            .map(|_| ())
    }

    async fn play(&self, source: &ObjectId) -> Result<(), EngineError> {
        self.invoke(source, "play", json!({})).await.map(|_| ())
    }

    async fn pause(&self, source: &ObjectId) -> Result<(), EngineError> {
        self.invoke(source, "pause", json!({})).await.map(|_| ())
    }

    async fn set_position(&self, source: &ObjectId, position_ms: i64) -> Result<(), EngineError> {
        self.invoke(source, "setPosition", json!({ "position": position_ms }))
            .await
            .map(|_| ())
    }

    async fn get_video_info(&self, source: &ObjectId) -> Result<VideoInfo, EngineError> {
        let value = self.invoke(source, "getVideoInfo", json!({})).await?;
        decode_video_info(&value)
    }

    async fn subscribe(
        &self,
        object: &ObjectId,
        kind: EngineEventKind,
        sink: EventSink,
    ) -> Result<(), EngineError> {
        self.client
            .subscribe(object, kind, sink)
            .await
            .map_err(|e| e.into_engine_error("subscribe"))
    }

    async fn release(&self, object: &ObjectId) -> Result<(), EngineError> {
        self.client
            .release(object)
            .await
            .map_err(|e| e.into_engine_error("release"))
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_video_info() {
        let info = decode_video_info(&json!({
            "isSeekable": true,
            "seekableInit": 0,
            "seekableEnd": 61_000,
            "duration": 61_440
        }))
        .unwrap();

        assert!(info.is_seekable);
        assert_eq!(info.init_seekable, 0);
        assert_eq!(info.end_seekable, 61_000);
        assert_eq!(info.duration, 61_440);
    }

    #[test]
    fn test_decode_video_info_missing_field() {
        let err = decode_video_info(&json!({ "isSeekable": false })).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }
}
