//! MindGraph agent launcher — one binary, one subcommand per agent role

use clap::{Parser, Subcommand};
use mindgraph_agents::{
    consistency, frame_aggregator, graph_writer, llm_orchestrator, session_controller, snapshot,
    stt,
};
use mindgraph_core::Settings;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mindgraph-agent", about = "Collective MindGraph pipeline agent")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Own the session lifecycle rows
    SessionController,
    /// Coalesce audio frames into segments
    FrameAggregator,
    /// Transcribe segments through the STT service
    Stt,
    /// Ask the LLM service for attachment proposals
    LlmOrchestrator,
    /// Repair proposals into approved attachments
    Consistency,
    /// Persist approved nodes and session state
    GraphWriter,
    /// Fingerprint active session graphs
    Snapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindgraph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
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

    match cli.role {
        Role::SessionController => session_controller::run(settings, shutdown).await,
        Role::FrameAggregator => frame_aggregator::run(settings, shutdown).await,
        Role::Stt => stt::run(settings, shutdown).await,
        Role::LlmOrchestrator => llm_orchestrator::run(settings, shutdown).await,
        Role::Consistency => consistency::run(settings, shutdown).await,
        Role::GraphWriter => graph_writer::run(settings, shutdown).await,
        Role::Snapshot => snapshot::run(settings, shutdown).await,
    }
}
