//! MindGraph dashboard binary

use mindgraph_bus::{BusConnection, MqttBus};
use mindgraph_core::{topics, Settings};
use mindgraph_dashboard::{serve, server::AppState, DashboardState};
use mindgraph_store::MindGraphStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindgraph=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let store = MindGraphStore::connect(&settings.postgres_dsn)?;
    store.ensure_schema().await?;

    let dashboard = Arc::new(DashboardState::new());
    let BusConnection { bus: _bus, mut events } = MqttBus::connect(
        &settings,
        &settings.app_name,
        &[topics::AGENT_HEARTBEAT],
        shutdown.clone(),
    )
    .await?;
    {
        let dashboard = dashboard.clone();
        tokio::spawn(async move {
            while let Some((topic, envelope)) = events.recv().await {
                dashboard.handle_event(&topic, &envelope);
            }
        });
    }

    let state = Arc::new(AppState { store, dashboard });
    serve(state, settings.dashboard_port, shutdown).await
}
