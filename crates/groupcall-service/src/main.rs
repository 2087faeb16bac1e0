//! Group Call Service
//!
//! WebSocket signaling server for multi-party video calls backed by a
//! Kurento Media Server.
//!
//! # Servers
//!
//! - WebSocket signaling server (`GET /groupcall`, default: 0.0.0.0:8443)
//! - HTTP server for health and metrics endpoints (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Connect to the media server
//! 5. Spawn the room registry actor
//! 6. Bind and start health and signaling servers
//! 7. Mark ready
//! 8. Wait for shutdown signal
//! 9. Mark not ready, stop servers, shut down the registry

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use groupcall_service::actors::{ActorMetrics, RoomRegistryHandle};
use groupcall_service::config::Config;
use groupcall_service::media::{KurentoClient, MediaEngine};
use groupcall_service::observability::{health_router, init_metrics_recorder, HealthState};
use groupcall_service::signaling::{signaling_router, SignalingRouter, SignalingState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the media server connection is checked for readiness.
const ENGINE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to open sessions to drain before the registry shuts down.
const DRAIN_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "groupcall_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Group Call Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        signaling_bind_address = %config.signaling_bind_address,
        health_bind_address = %config.health_bind_address,
        release_on_cancel = config.release_on_cancel,
        join_retry_limit = config.join_retry_limit,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to media server...");
    let kurento = KurentoClient::connect(&config.kms_url).await.map_err(|e| {
        error!(error = %e, "Failed to connect to media server");
        e
    })?;
    info!("Media server connection established");

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let engine: Arc<dyn MediaEngine> = Arc::new(kurento.clone());
    let registry = RoomRegistryHandle::new(
        config.instance_id.clone(),
        engine,
        config.registry_settings(),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    // Servers are cancelled before the registry so no new joins race shutdown
    let shutdown_token = CancellationToken::new();

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let signaling_addr: SocketAddr = config.signaling_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.signaling_bind_address, "Invalid signaling bind address");
        format!("Invalid signaling bind address: {e}")
    })?;
    let signaling_listener = tokio::net::TcpListener::bind(signaling_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signaling_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {signaling_addr}: {e}")
        })?;
    info!(addr = %signaling_addr, "Signaling server bound successfully");

    // Spawn health server task
    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
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

    // Spawn signaling server task
    let signaling_app = signaling_router(SignalingState {
        router: SignalingRouter::new(registry.clone()),
        metrics: Arc::clone(&actor_metrics),
        cancel_token: shutdown_token.child_token(),
    })
    .layer(TraceLayer::new_for_http());
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

    // Readiness follows the media server connection
    health_state.set_ready();
    let engine_task_token = shutdown_token.child_token();
    let engine_task_health = Arc::clone(&health_state);
    let engine_task_client = kurento.clone();
    tokio::spawn(async move {
        run_engine_watch(engine_task_client, engine_task_health, engine_task_token).await;
    });

    info!("Group Call Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops sending traffic
    health_state.set_not_ready();

    shutdown_token.cancel();

    // Give sessions time to run their implicit leaves
    tokio::time::sleep(DRAIN_GRACE_PERIOD).await;

    // Rooms close their participants, releasing endpoints and pipelines
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }

    kurento.close();

    info!("Group Call Service shutdown complete");
    Ok(())
}

/// Keep readiness in step with the media server connection.
async fn run_engine_watch(
    client: KurentoClient,
    health_state: Arc<HealthState>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(ENGINE_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                let connected = client.is_connected();
                let was_ready = health_state.update_ready(connected);
                if was_ready && !connected {
                    error!("Media server connection lost, marking not ready");
                } else if !was_ready && connected {
                    info!("Media server connection restored, marking ready");
                }
            }
        }
    }
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
