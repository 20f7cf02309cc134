use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use wabalas::chatbot::webhook::{self, WebhookState};
use wabalas::chatbot::{engine, KnowledgeBase, MemorySessionStore, MessageRouter, TransportEvent, WhatsAppClient};
use wabalas::config::Config;
use wabalas::openai::Client as OpenAiClient;

/// Capacity of the webhook -> bot loop channel.
const EVENT_BUFFER: usize = 256;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wabalas.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(&config.data_dir);

    info!("🚀 Starting wabalas...");
    info!("Loaded config from {config_path}");

    match serve(config).await {
        Ok(()) => {
            info!("👋 Shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stdout and `{data_dir}/logs/wabalas.log`. Falls back to stdout only
/// when the log file cannot be opened.
fn init_logging(data_dir: &Path) -> Option<WorkerGuard> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("wabalas.log"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        );

    match log_file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(
                            tracing_subscriber::EnvFilter::from_default_env()
                                .add_directive(tracing::Level::INFO.into()),
                        ),
                )
                .init();
            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry().with(stdout_layer).init();
            warn!("Failed to open log file in {}: {e}", log_dir.display());
            None
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let knowledge = KnowledgeBase::load(&config.knowledge_path)?;
    info!("Loaded {} knowledge entries from {}", knowledge.len(), config.knowledge_path.display());

    let whatsapp = WhatsAppClient::new(
        config.whatsapp_access_token.clone(),
        config.phone_number_id.clone(),
        config.graph_api_version.clone(),
    );
    let phone = whatsapp.verify_credentials().await?;
    info!(
        "Connected as {} ({})",
        phone.verified_name.as_deref().unwrap_or("unnamed"),
        phone.display_phone_number
    );

    let completer = OpenAiClient::new(config.completion_settings());
    info!("Completions via {} ({})", config.openai_model, config.openai_base_url);

    let router = Arc::new(MessageRouter::new(
        Arc::new(knowledge),
        Arc::new(MemorySessionStore::new()),
        Arc::new(completer),
        Arc::new(whatsapp),
    ));

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let app = webhook::routes(WebhookState::new(
        config.verify_token.clone(),
        config.app_secret.clone(),
        tx.clone(),
    ));
    if config.app_secret.is_none() {
        warn!("app_secret not set, webhook signatures are not checked");
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Webhook listening on {}/webhook", config.listen_addr);

    tx.send(TransportEvent::LinkCode(phone.chat_link())).await?;
    tx.send(TransportEvent::Ready).await?;
    drop(tx);

    let bot = tokio::spawn(engine::run(router, rx));

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl-C received, shutting down");
        })
        .await?;

    // Webhook state is dropped with the server, which closes the channel
    bot.await?;
    Ok(())
}
