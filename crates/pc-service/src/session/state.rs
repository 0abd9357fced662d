//! Playback state of one session.

use std::fmt;

/// Where a session is in its handshake and playback lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Uninitialized,
    /// Offer submitted, media not yet flowing.
    Negotiating,
    /// Media path established.
    Connected,
    Playing,
    Paused,
    /// Source reached end of stream.
    Ended,
    /// Source reported an error.
    Failed,
}

impl PlaybackState {
    /// Whether the source has stopped for good.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, PlaybackState::Ended | PlaybackState::Failed)
    }

    /// State after the WebRTC endpoint reports connected media.
    ///
    /// Only a session still negotiating moves; a session that already started
    /// playing keeps its state across reconnects.
    #[must_use]
    pub fn on_media_connected(self) -> Self {
        match self {
            PlaybackState::Uninitialized | PlaybackState::Negotiating => PlaybackState::Connected,
            other => other,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Uninitialized => "uninitialized",
            PlaybackState::Negotiating => "negotiating",
            PlaybackState::Connected => "connected",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Ended => "ended",
            PlaybackState::Failed => "failed",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_connected_only_advances_negotiation() {
        assert_eq!(
            PlaybackState::Negotiating.on_media_connected(),
            PlaybackState::Connected
        );
        assert_eq!(
            PlaybackState::Playing.on_media_connected(),
            PlaybackState::Playing
        );
        assert_eq!(PlaybackState::Ended.on_media_connected(), PlaybackState::Ended);
    }

    #[test]
    fn test_finished_states() {
        assert!(PlaybackState::Ended.is_finished());
        assert!(PlaybackState::Failed.is_finished());
        assert!(!PlaybackState::Paused.is_finished());
    }
}
