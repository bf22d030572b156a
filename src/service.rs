use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use urlrelay_core::fs_paths::ScratchDir;
use urlrelay_core::TransferContext;

use crate::commands::BotContext;
use crate::core::ffprobe::FfprobeProbe;
use crate::core::http_client;
use crate::core::ytdlp::{self, YtDlpExtractor};
use crate::models::settings::Settings;
use crate::platforms::telegram::{auth, client::GrammersClient, updates};

/// Whether the update loop is currently connected and serving.
pub type RunningFlag = Arc<AtomicBool>;

pub fn health_router(running: RunningFlag) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(running)
}

async fn index() -> &'static str {
    "Telegram Bot is Running!"
}

async fn health(State(running): State<RunningFlag>) -> impl IntoResponse {
    let bot = if running.load(Ordering::Relaxed) {
        "running"
    } else {
        "stopped"
    };
    Json(json!({ "status": "healthy", "bot": bot }))
}

pub async fn serve_health(
    port: u16,
    running: RunningFlag,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[health] listening on {}", addr);
    axum::serve(listener, health_router(running))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatus {
    Running,
    Stopped,
}

/// Owns the bot task: one start, one stop.
pub struct BotService {
    running: RunningFlag,
    shutdown: CancellationToken,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl BotService {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    pub fn running_flag(&self) -> RunningFlag {
        self.running.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn status(&self) -> BotStatus {
        if self.running.load(Ordering::Relaxed) {
            BotStatus::Running
        } else {
            BotStatus::Stopped
        }
    }

    pub fn start(&mut self, settings: Settings) -> anyhow::Result<()> {
        if self.task.is_some() {
            anyhow::bail!("Bot is already started");
        }
        self.task = Some(tokio::spawn(run_bot(
            settings,
            self.running.clone(),
            self.shutdown.clone(),
        )));
        Ok(())
    }

    /// Waits for the bot task to end on its own.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        joined.map_err(anyhow::Error::from)?
    }

    pub async fn stop(&mut self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.wait().await
    }
}

impl Default for BotService {
    fn default() -> Self {
        Self::new()
    }
}

/// Connects the bot and serves updates until `shutdown` fires.
async fn run_bot(
    settings: Settings,
    running: RunningFlag,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&settings.transfer.scratch_root).await?;
    ScratchDir::new(settings.transfer.scratch_root.clone())
        .clear_downloads()
        .await?;

    let ytdlp_binary = ytdlp::ensure_ytdlp().await?;
    let extractor = YtDlpExtractor::new(
        ytdlp_binary,
        settings.extractor.cookie_file.clone(),
        settings.proxy.url.clone(),
        settings.transfer.process_timeout(),
    );
    let http = http_client::build_client(&settings.proxy)?;

    let connection = auth::connect(&settings.telegram).await?;
    let api = Arc::new(GrammersClient::new(connection.client));

    let transfer = TransferContext::new(
        api.clone(),
        Arc::new(FfprobeProbe),
        Arc::new(extractor),
        http,
        settings.transfer.clone(),
    );
    let ctx = Arc::new(BotContext {
        api: api.clone(),
        transfer,
        access: settings.access.clone(),
        cookie_file: settings.extractor.cookie_file.clone(),
        limiter: Arc::new(Semaphore::new(settings.server.max_concurrent_transfers)),
    });

    running.store(true, Ordering::Relaxed);
    tracing::info!(
        "[bot] serving, up to {} transfers at once",
        settings.server.max_concurrent_transfers
    );
    let result = updates::run(ctx, api, connection.updates, shutdown).await;
    running.store(false, Ordering::Relaxed);
    result
}
