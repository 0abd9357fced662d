//! Client signaling over WebSocket JSON-RPC 2.0.
//!
//! `GET /player?user=<name>` upgrades to a WebSocket; each socket is one
//! participant. Supported methods:
//! - `customRequest` - params are a player command, answered with `{}` once handled
//! - `ping` - answered with `{"value":"pong"}`
//!
//! Requests are handled concurrently, each on its own task. Replies and
//! notifications go through the participant's outbound queue and a single
//! writer task. When the socket closes, requests still running are awaited and
//! then the participant's session is torn down.

use super::ConnectionRegistry;
use crate::dispatcher::{CommandDispatcher, CommandTable, Participant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::jsonrpc::{
    ErrorObject, Message, ParseError, Request, Response, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Shared state of the signaling server.
pub struct SignalingState<T: CommandTable> {
    pub dispatcher: Arc<CommandDispatcher<T>>,
    pub connections: Arc<ConnectionRegistry>,
}

impl<T: CommandTable> Clone for SignalingState<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            connections: Arc::clone(&self.connections),
        }
    }
}

impl<T: CommandTable> SignalingState<T> {
    pub fn new(dispatcher: Arc<CommandDispatcher<T>>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            dispatcher,
            connections,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerQuery {
    user: Option<String>,
}

/// Router serving the player signaling endpoint.
pub fn signaling_router<T: CommandTable>(state: SignalingState<T>) -> Router {
    Router::new()
        .route("/player", get(player_handler::<T>))
        .with_state(state)
}

async fn player_handler<T: CommandTable>(
    ws: WebSocketUpgrade,
    Query(query): Query<PlayerQuery>,
    State(state): State<SignalingState<T>>,
) -> impl IntoResponse {
    let user_name = query.user.filter(|user| !user.trim().is_empty());
    let participant = Participant::new(Uuid::new_v4().to_string(), user_name);
    ws.on_upgrade(move |socket| handle_socket(socket, participant, state))
}

#[instrument(
    skip_all,
    name = "pc.transport.connection",
    fields(participant_id = %participant.participant_id)
)]
async fn handle_socket<T: CommandTable>(
    socket: WebSocket,
    participant: Participant,
    state: SignalingState<T>,
) {
    info!(
        target: "pc.transport",
        participant_id = %participant.participant_id,
        user = participant.user_name.as_deref().unwrap_or(""),
        "Participant connected"
    );

    let (mut sink, mut stream) = socket.split();
    let mut outbound = state.connections.register(&participant.participant_id);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut in_flight = JoinSet::new();

    while let Some(frame) = stream.next().await {
        while in_flight.try_join_next().is_some() {}

        match frame {
            Ok(WsMessage::Text(text)) => {
                let state = state.clone();
                let participant = participant.clone();
                in_flight.spawn(async move {
                    let Some(reply) = handle_frame(&state.dispatcher, &participant, &text).await
                    else {
                        return;
                    };
                    send_reply(&state.connections, &participant.participant_id, &reply).await;
                });
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    target: "pc.transport",
                    participant_id = %participant.participant_id,
                    error = %e,
                    "Socket read failed"
                );
                break;
            }
        }
    }

    // Dropping the registry's sender lets the writer drain and exit.
    state.connections.unregister(&participant.participant_id);
    // A start still running must finish (or fail) before teardown looks for it.
    while in_flight.join_next().await.is_some() {}
    state.dispatcher.participant_left(&participant).await;
    let _ = writer.await;

    info!(
        target: "pc.transport",
        participant_id = %participant.participant_id,
        "Participant disconnected"
    );
}

async fn send_reply(connections: &ConnectionRegistry, participant_id: &str, reply: &Response) {
    let frame = match serde_json::to_string(reply) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(target: "pc.transport", error = %e, "Failed to encode response");
            return;
        }
    };
    let Some(sender) = connections.sender(participant_id) else {
        debug!(
            target: "pc.transport",
            participant_id = %participant_id,
            "Participant gone before response"
        );
        return;
    };
    let _ = sender.send(frame).await;
}

/// Handle one text frame; returns the response to send, if any.
///
/// Notifications (requests without an id) are executed but never answered.
pub async fn handle_frame<T: CommandTable>(
    dispatcher: &CommandDispatcher<T>,
    participant: &Participant,
    text: &str,
) -> Option<Response> {
    let request = match Message::parse(text) {
        Ok(Message::Request(request)) => request,
        Ok(Message::Response(_)) => {
            debug!(
                target: "pc.transport",
                participant_id = %participant.participant_id,
                "Ignoring response frame from client"
            );
            return None;
        }
        Err(ParseError::Json(e)) if !e.is_data() => {
            return Some(Response::error(None, ErrorObject::new(PARSE_ERROR, "Parse error")));
        }
        Err(e) => {
            return Some(Response::error(
                None,
                ErrorObject::new(INVALID_REQUEST, format!("Invalid request: {e}")),
            ));
        }
    };

    let notification = request.is_notification();
    let Request {
        id, method, params, ..
    } = request;

    let response = match method.as_str() {
        "customRequest" => {
            let params = params.unwrap_or_else(|| json!({}));
            match dispatcher.handle(participant, params).await {
                Ok(()) => Response::success(id, json!({})),
                Err(e) => Response::error(id, e.to_error_object()),
            }
        }
        "ping" => Response::success(id, json!({ "value": "pong" })),
        other => {
            debug!(
                target: "pc.transport",
                participant_id = %participant.participant_id,
                method = %other,
                "Unknown method"
            );
            Response::error(
                id,
                ErrorObject::new(METHOD_NOT_FOUND, format!("Method not found: {other}")),
            )
        }
    };

    (!notification).then_some(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dispatcher::Command;
    use crate::errors::PcError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoTable {
        executed: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl CommandTable for EchoTable {
        async fn execute(&self, _participant: &Participant, command: Command) -> Result<(), PcError> {
            self.executed.lock().unwrap().push(command.name());
            match command {
                Command::Start { .. } => Err(PcError::NoCapacity {
                    uri: "ws://kms-0:8888/kurento".to_string(),
                }),
                _ => Ok(()),
            }
        }

        async fn participant_left(&self, _participant: &Participant) {}
    }

    fn dispatcher() -> CommandDispatcher<EchoTable> {
        CommandDispatcher::new(Arc::new(EchoTable::default()))
    }

    fn participant() -> Participant {
        Participant::new("p1", Some("alice".to_string()))
    }

    #[tokio::test]
    async fn test_custom_request_acknowledged_with_empty_object() {
        let dispatcher = dispatcher();
        let reply = handle_frame(
            &dispatcher,
            &participant(),
            r#"{"jsonrpc":"2.0","id":1,"method":"customRequest","params":{"id":"play"}}"#,
        )
        .await
        .unwrap();

        assert_eq!(reply.id, Some(1i64.into()));
        assert_eq!(reply.result.as_ref(), Some(&json!({})));
        assert_eq!(*dispatcher.table().executed.lock().unwrap(), vec!["play"]);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let dispatcher = dispatcher();
        let reply = handle_frame(
            &dispatcher,
            &participant(),
            r#"{"jsonrpc":"2.0","id":"7","method":"customRequest",
                "params":{"id":"start","videourl":"file:///v.webm","sdpOffer":"v=0"}}"#,
        )
        .await
        .unwrap();

        let error = reply.error.unwrap();
        assert_eq!(error.message, "No resources left to create new session");
        assert_eq!(reply.id, Some(common::jsonrpc::Id::String("7".to_string())));
    }

    #[tokio::test]
    async fn test_ping() {
        let reply = handle_frame(
            &dispatcher(),
            &participant(),
            r#"{"jsonrpc":"2.0","id":2,"method":"ping","params":{"interval":3000}}"#,
        )
        .await
        .unwrap();

        assert_eq!(reply.result.as_ref(), Some(&json!({"value": "pong"})));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let reply = handle_frame(
            &dispatcher(),
            &participant(),
            r#"{"jsonrpc":"2.0","id":3,"method":"joinRoom"}"#,
        )
        .await
        .unwrap();

        assert_eq!(reply.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_frames() {
        let dispatcher = dispatcher();

        let reply = handle_frame(&dispatcher, &participant(), "{not json")
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, PARSE_ERROR);

        let reply = handle_frame(&dispatcher, &participant(), r#"{"jsonrpc":"2.0","id":4}"#)
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, INVALID_REQUEST);

        let reply = handle_frame(&dispatcher, &participant(), r#"{"jsonrpc":"2.0","method":5}"#)
            .await
            .unwrap();
        assert_eq!(reply.error.unwrap().code, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_notification_runs_without_reply() {
        let dispatcher = dispatcher();
        let reply = handle_frame(
            &dispatcher,
            &participant(),
            r#"{"jsonrpc":"2.0","method":"customRequest","params":{"id":"pause"}}"#,
        )
        .await;

        assert!(reply.is_none());
        assert_eq!(*dispatcher.table().executed.lock().unwrap(), vec!["pause"]);
    }
}
