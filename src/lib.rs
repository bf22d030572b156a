use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod core;
pub mod models;
pub mod platforms;
pub mod service;
pub mod storage;

const DEFAULT_LOG_FILTER: &str = "info,grammers=warn";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    let settings = storage::config::load_settings()?;
    let mut bot = service::BotService::new();

    let health = tokio::spawn(service::serve_health(
        settings.server.port,
        bot.running_flag(),
        bot.shutdown_token(),
    ));

    bot.start(settings)?;
    let finished = tokio::select! {
        result = bot.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            tracing::info!("[bot] shutting down");
            bot.stop().await
        }
    };

    bot.shutdown_token().cancel();
    match health.await {
        Ok(Err(e)) => tracing::warn!("[health] server failed: {:#}", e),
        Err(e) => tracing::warn!("[health] server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    result
}
