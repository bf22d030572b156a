use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context};

use crate::models::settings::Settings;

/// Reads settings from the process environment, after loading `.env` if
/// one is present.
pub fn load_settings() -> anyhow::Result<Settings> {
    match dotenvy::dotenv() {
        Ok(path) => tracing::info!("[config] loaded {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("[config] could not read .env: {}", e),
    }
    settings_from(|key| std::env::var(key).ok())
}

pub fn settings_from<F>(lookup: F) -> anyhow::Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let mut settings = Settings::default();

    settings.telegram.bot_token = get("BOT_TOKEN").ok_or_else(|| anyhow!("BOT_TOKEN is not set"))?;
    settings.telegram.api_hash = get("API_HASH").ok_or_else(|| anyhow!("API_HASH is not set"))?;
    settings.telegram.api_id = parse::<i32>(get("API_ID"), "API_ID")?
        .filter(|id| *id != 0)
        .ok_or_else(|| anyhow!("API_ID is not set"))?;
    if let Some(path) = get("SESSION_FILE") {
        settings.telegram.session_file = PathBuf::from(path);
    }

    settings.access.owner_id = parse::<i64>(get("OWNER_ID"), "OWNER_ID")?.filter(|id| *id != 0);
    settings.access.auth_users = get("AUTH_USERS")
        .map(|raw| {
            raw.split_whitespace()
                .filter_map(|id| id.parse::<i64>().ok())
                .filter(|id| *id != 0)
                .collect()
        })
        .unwrap_or_default();
    if let Some(owner) = settings.access.owner_id {
        if !settings.access.auth_users.is_empty() && !settings.access.auth_users.contains(&owner) {
            settings.access.auth_users.push(owner);
        }
    }

    let transfer = &mut settings.transfer;
    if let Some(dir) = get("DOWNLOAD_LOCATION") {
        transfer.scratch_root = PathBuf::from(dir);
    }
    if let Some(max) = parse::<u64>(get("TG_MAX_FILE_SIZE"), "TG_MAX_FILE_SIZE")? {
        transfer.max_file_size = max;
    }
    if let Some(chunk) = parse::<usize>(get("CHUNK_SIZE"), "CHUNK_SIZE")? {
        if chunk == 0 {
            return Err(anyhow!("CHUNK_SIZE must be positive"));
        }
        transfer.chunk_size = chunk;
    }
    if let Some(secs) = parse::<u64>(get("PROCESS_MAX_TIMEOUT"), "PROCESS_MAX_TIMEOUT")? {
        transfer.process_timeout_secs = secs;
    }
    if let Some(secs) = parse::<u64>(get("PROGRESS_INTERVAL"), "PROGRESS_INTERVAL")? {
        transfer.progress_interval_secs = secs;
    }
    if let Some(secs) = parse::<u64>(get("HEARTBEAT_INTERVAL"), "HEARTBEAT_INTERVAL")? {
        transfer.heartbeat_interval_secs = secs;
    }

    if let Some(path) = get("COOKIE_FILE") {
        settings.extractor.cookie_file = PathBuf::from(path);
    }
    settings.proxy.url = get("HTTP_PROXY");

    if let Some(port) = parse::<u16>(get("PORT"), "PORT")? {
        settings.server.port = port;
    }
    let max_transfers = get("MAX_CONCURRENT_TRANSFERS");
    if let Some(max) = parse::<usize>(max_transfers, "MAX_CONCURRENT_TRANSFERS")? {
        settings.server.max_concurrent_transfers = max.max(1);
    }

    Ok(settings)
}

fn parse<T>(raw: Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|v| v.parse::<T>().with_context(|| format!("{} has an invalid value: {}", key, v)))
        .transpose()
}
