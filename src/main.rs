//! Service entry point: configuration, wiring, and the HTTP server.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use mizuhiki::capabilities::{
    CompletionClient, CompletionProvider, RetrievalClient, RetrievalProvider,
};
use mizuhiki::channels::{Notifier, PushClient};
use mizuhiki::chat::ChatService;
use mizuhiki::config::Config;
use mizuhiki::conversation::ConversationFlow;
use mizuhiki::db::Store;
use mizuhiki::followup::FollowUpEngine;
use mizuhiki::guard::OwnershipGuard;
use mizuhiki::pipeline::Orchestrator;
use mizuhiki::queue::{HttpTaskQueue, JobQueue};
use mizuhiki::quota::QuotaLimiter;
use mizuhiki::server::{self, AppState};

#[derive(Parser)]
#[command(
    name = "mizuhiki",
    version,
    about = "Bereavement-procedure checklist assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (webhook, worker endpoint, health).
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
}

fn setup_logging(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,mizuhiki=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    setup_logging(config.telemetry.json_logs);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
    }
}

async fn migrate(config: Config) -> anyhow::Result<()> {
    let store = Store::connect(&config.database)
        .await
        .context("database connection failed")?;
    store.run_migrations().await.context("migrations failed")?;
    tracing::info!("migrations applied");
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Store::connect(&config.database)
        .await
        .context("database connection failed")?;
    store.run_migrations().await.context("migrations failed")?;

    let completion: Arc<dyn CompletionProvider> =
        Arc::new(CompletionClient::new(config.completion.clone())?);
    let retrieval: Arc<dyn RetrievalProvider> =
        Arc::new(RetrievalClient::new(config.retrieval.clone())?);
    let notifier: Arc<dyn Notifier> = Arc::new(PushClient::new(config.channel.clone())?);
    let queue: Arc<dyn JobQueue> = Arc::new(HttpTaskQueue::new(config.queue.clone())?);

    let quota = QuotaLimiter::new(
        store.clone(),
        config.quota.timezone,
        config.quota.daily_message_ceiling,
    );
    let followups = FollowUpEngine::new(store.clone());
    let guard = OwnershipGuard::new(store.clone());
    let chat = ChatService::new(store.clone(), completion.clone(), retrieval.clone());
    let flow = Arc::new(ConversationFlow::new(
        store.clone(),
        quota,
        followups,
        guard,
        chat,
        queue.clone(),
        notifier.clone(),
        config.quota.timezone,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        retrieval,
        completion,
        notifier,
        queue,
        config.queue.max_attempts,
    ));

    server::spawn_maintenance(store.clone());

    let state = AppState {
        store,
        flow,
        orchestrator,
        config: Arc::new(config),
    };
    let bind_addr = state.config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(bind_addr.as_str())
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    let addr = listener.local_addr().context("no local address")?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(server::shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
