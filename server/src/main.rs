use axum::{Router, response::IntoResponse, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use quizroom_server::config::Config;
use quizroom_server::server::{self, AppState};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Update gauge metrics for rooms and connections (called periodically)
fn update_gauge_metrics(state: &AppState) {
    let (rooms, connections) = state.get_stats();

    metrics::gauge!("quizroom_rooms_active").set(rooms as f64);
    metrics::gauge!("quizroom_ws_connections_active").set(connections as f64);
    metrics::gauge!("quizroom_tracked_users")
        .set(state.supervisor.membership().tracked_users() as f64);

    metrics::gauge!("quizroom_uptime_seconds").set(state.started_at.elapsed().as_secs() as f64);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Prometheus recorder must be installed before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "quizroom=debug,quizroom_server=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}",
        config.host, config.port
    );
    info!(
        "Rooms: chat_log_capacity={}, echo_chat_to_sender={}, empty_room_grace={:?}, max_vote_types={:?}",
        config.room.chat_log_capacity,
        config.room.echo_chat_to_sender,
        config.room.empty_room_grace,
        config.room.max_vote_types
    );

    let app_state = AppState::with_config(config.room.clone(), config.ws.clone());

    // Periodic teardown of rooms left empty past the grace period
    let sweep_state = app_state.clone();
    let sweep_interval = config.room.sweep_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            sweep_state.supervisor.reap_idle_rooms().await;
        }
    });

    // Periodic update of gauge metrics (every 5 seconds)
    let metrics_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            update_gauge_metrics(&metrics_state);
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = server::router(app_state)
        .merge(Router::new().route("/metrics/prometheus", get(prometheus_metrics)))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Quizroom server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
