//! Media types shared by the signaling and engine layers.

use serde::{Deserialize, Serialize};

/// A WebRTC ICE candidate as exchanged with browsers.
///
/// Field names follow the browser `RTCIceCandidateInit` dictionary, which is also
/// what the media server accepts and emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: u32,
}

/// Seekability and duration of a media source.
///
/// Serialized with the field names clients expect in the `videoInfo` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(rename = "isSeekable")]
    pub is_seekable: bool,
    #[serde(rename = "initSeekable")]
    pub init_seekable: i64,
    #[serde(rename = "endSeekable")]
    pub end_seekable: i64,
    #[serde(rename = "videoDuration")]
    pub duration: i64,
}

/// Media flow state reported by a WebRTC endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaState {
    Connected,
    Disconnected,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ice_candidate_uses_browser_field_names() {
        let candidate: IceCandidate = serde_json::from_value(json!({
            "candidate": "candidate:1 1 UDP 2122252543 192.168.1.2 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();

        assert_eq!(candidate.sdp_mid, "0");
        assert_eq!(candidate.sdp_m_line_index, 0);

        let value = serde_json::to_value(&candidate).unwrap();
        assert!(value.get("sdpMid").is_some());
        assert!(value.get("sdp_mid").is_none());
    }

    #[test]
    fn test_ice_candidate_defaults_missing_mid() {
        let candidate: IceCandidate =
            serde_json::from_value(json!({"candidate": "candidate:2"})).unwrap();
        assert_eq!(candidate.sdp_mid, "");
        assert_eq!(candidate.sdp_m_line_index, 0);
    }

    #[test]
    fn test_video_info_client_field_names() {
        let info = VideoInfo {
            is_seekable: true,
            init_seekable: 0,
            end_seekable: 60_000,
            duration: 60_000,
        };

        assert_eq!(
            serde_json::to_value(info).unwrap(),
            json!({
                "isSeekable": true,
                "initSeekable": 0,
                "endSeekable": 60_000,
                "videoDuration": 60_000
            })
        );
    }

    #[test]
    fn test_media_state_wire_names() {
        let state: MediaState = serde_json::from_value(json!("CONNECTED")).unwrap();
        assert_eq!(state, MediaState::Connected);
    }
}
