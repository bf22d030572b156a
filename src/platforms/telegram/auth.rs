use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use grammers_client::client::updates::UpdateStream;
use grammers_client::{Client, UpdatesConfiguration};
use grammers_mtsender::SenderPool;
use grammers_session::storages::SqliteSession;

use crate::models::settings::TelegramSettings;

/// A signed-in bot client and the stream of updates addressed to it.
pub struct Connection {
    pub client: Client,
    pub updates: UpdateStream,
}

fn open_session(path: &Path) -> anyhow::Result<Arc<SqliteSession>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let session = SqliteSession::open(path)
        .with_context(|| format!("Cannot open session file {}", path.display()))?;
    Ok(Arc::new(session))
}

/// Opens the session, starts the network runner and signs in with the bot
/// token unless the stored session is already authorised.
pub async fn connect(settings: &TelegramSettings) -> anyhow::Result<Connection> {
    let session = open_session(&settings.session_file)?;
    let pool = SenderPool::new(session, settings.api_id);
    let client = Client::new(&pool);
    let SenderPool { runner, updates, .. } = pool;
    tokio::spawn(runner.run());

    let authorized = client
        .is_authorized()
        .await
        .map_err(|e| anyhow!("Cannot reach Telegram: {}", e))?;
    if !authorized {
        client
            .bot_sign_in(&settings.bot_token, &settings.api_hash)
            .await
            .map_err(|e| anyhow!("Bot sign-in failed: {}", e))?;
        tracing::info!("[telegram] signed in with bot token");
    }

    let me = client
        .get_me()
        .await
        .map_err(|e| anyhow!("Cannot load bot account: {}", e))?;
    tracing::info!(
        "[telegram] connected as @{}",
        me.username().unwrap_or("unknown")
    );

    let updates = client.stream_updates(
        updates,
        UpdatesConfiguration {
            catch_up: false,
            ..Default::default()
        },
    );

    Ok(Connection { client, updates })
}
