//! In-crate engine stubs for unit tests.
//!
//! Integration tests use `pc-test-utils` instead; importing it here would pull
//! in a second copy of this crate's types.

use crate::engine::{EngineError, EngineEventKind, EventSink, MediaEngine, ObjectId};

use async_trait::async_trait;
use common::types::{IceCandidate, VideoInfo};

/// Engine that refuses every operation except `release`.
#[derive(Debug, Default)]
pub struct InertEngine;

/// Like [`InertEngine`] but reports its control channel as down.
#[derive(Debug, Default)]
pub struct OfflineEngine;

macro_rules! inert_engine {
    ($engine:ty, $connected:expr) => {
        #[async_trait]
        impl MediaEngine for $engine {
            async fn create_pipeline(&self) -> Result<ObjectId, EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn create_webrtc_endpoint(&self, _: &ObjectId) -> Result<ObjectId, EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn create_source_endpoint(
                &self,
                _: &ObjectId,
                _: &str,
            ) -> Result<ObjectId, EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn connect(&self, _: &ObjectId, _: &ObjectId) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn process_offer(&self, _: &ObjectId, _: &str) -> Result<String, EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn gather_candidates(&self, _: &ObjectId) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn add_ice_candidate(
                &self,
                _: &ObjectId,
                _: &IceCandidate,
            ) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn play(&self, _: &ObjectId) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn pause(&self, _: &ObjectId) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn set_position(&self, _: &ObjectId, _: i64) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn get_video_info(&self, _: &ObjectId) -> Result<VideoInfo, EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn subscribe(
                &self,
                _: &ObjectId,
                _: EngineEventKind,
                _: EventSink,
            ) -> Result<(), EngineError> {
                Err(EngineError::Disconnected)
            }

            async fn release(&self, _: &ObjectId) -> Result<(), EngineError> {
                Ok(())
            }

            fn is_connected(&self) -> bool {
                $connected
            }
        }
    };
}

inert_engine!(InertEngine, true);
inert_engine!(OfflineEngine, false);
