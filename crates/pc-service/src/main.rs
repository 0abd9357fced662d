//! Player Controller
//!
//! WebSocket signaling server that plays media sources to WebRTC clients
//! through a pool of Kurento Media Servers.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:8443, path `/player`)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to every media server (fail fast)
//! 4. Build scheduler, session registry and command dispatcher
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start signaling server and mark ready
//! 7. Wait for shutdown signal, then tear down every session

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use pc_service::config::Config;
use pc_service::dispatcher::{CommandDispatcher, PlayerControl};
use pc_service::engine::MediaEngine;
use pc_service::kms::KurentoEngine;
use pc_service::notify::Notifier;
use pc_service::observability::metrics::init_metrics_recorder;
use pc_service::observability::{health_router, HealthState};
use pc_service::playback::PlaybackController;
use pc_service::scheduler::{Node, NodePool, Scheduler};
use pc_service::session::SessionRegistry;
use pc_service::signaling::SignalingHandshake;
use pc_service::transport::{signaling_router, ConnectionRegistry, SignalingState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on session teardown during shutdown.
const SESSION_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pc_service=debug,pc=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Player Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        pc_id = %config.pc_id,
        nodes = config.nodes.len(),
        restricted = config.auth_pattern.is_some(),
        signaling_bind_address = %config.signaling_bind_address,
        health_bind_address = %config.health_bind_address,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    // Connect every media server before accepting clients
    let mut nodes = Vec::with_capacity(config.nodes.len());
    for node_config in &config.nodes {
        let engine = KurentoEngine::connect(&node_config.uri, shutdown_token.child_token())
            .await
            .map_err(|e| {
                error!(uri = %node_config.uri, error = %e, "Failed to connect to media server");
                e
            })?;
        let engine: Arc<dyn MediaEngine> = Arc::new(engine);
        nodes.push(Node::new(
            node_config.uri.clone(),
            engine,
            node_config.capacity,
        ));
    }
    let pool = Arc::new(NodePool::new(nodes));
    info!(nodes = pool.len(), "Media servers connected");

    let policy = config.authorization_policy()?;
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&pool), policy));
    let sessions = Arc::new(SessionRegistry::new());
    let connections = Arc::new(ConnectionRegistry::default());
    let notifier: Arc<dyn Notifier> = Arc::clone(&connections) as Arc<dyn Notifier>;

    let control = PlayerControl::new(
        SignalingHandshake::new(
            Arc::clone(&scheduler),
            Arc::clone(&sessions),
            Arc::clone(&notifier),
        ),
        PlaybackController::new(Arc::clone(&sessions), notifier),
    );
    let dispatcher = Arc::new(CommandDispatcher::new(Arc::new(control)));

    // Health server (liveness, readiness, metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state), Arc::clone(&pool)).merge(metrics_router);

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling server
    let signaling_addr: SocketAddr = config.signaling_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.signaling_bind_address, "Invalid signaling bind address");
        format!("Invalid signaling bind address: {e}")
    })?;

    let signaling_app = signaling_router(SignalingState::new(
        Arc::clone(&dispatcher),
        Arc::clone(&connections),
    ))
    .layer(TraceLayer::new_for_http());

    let signaling_listener = tokio::net::TcpListener::bind(signaling_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signaling_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {signaling_addr}: {e}")
        })?;

    let signaling_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %signaling_addr, "Signaling server starting");
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Player Controller running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so no new clients are routed here
    health_state.set_not_ready();

    // Release every pipeline while the media server connections are still up
    if tokio::time::timeout(SESSION_TEARDOWN_TIMEOUT, sessions.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SESSION_TEARDOWN_TIMEOUT.as_secs(),
            remaining = sessions.len(),
            "Session teardown timed out"
        );
    }

    shutdown_token.cancel();

    info!("Player Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
