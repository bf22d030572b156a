use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use urlrelay_core::models::settings::TransferSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub telegram: TelegramSettings,
    pub access: AccessSettings,
    pub transfer: TransferSettings,
    pub extractor: ExtractorSettings,
    pub proxy: ProxySettings,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessSettings {
    pub owner_id: Option<i64>,
    pub auth_users: Vec<i64>,
}

impl AccessSettings {
    /// An empty list lets everyone in. The owner is always allowed.
    pub fn is_allowed(&self, user: i64) -> bool {
        if self.auth_users.is_empty() {
            return true;
        }
        self.owner_id == Some(user) || self.auth_users.contains(&user)
    }

    pub fn is_owner(&self, user: i64) -> bool {
        self.owner_id == Some(user)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorSettings {
    pub cookie_file: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub port: u16,
    pub max_concurrent_transfers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram: TelegramSettings {
                bot_token: String::new(),
                api_id: 0,
                api_hash: String::new(),
                session_file: PathBuf::from("urlrelay.session"),
            },
            access: AccessSettings::default(),
            transfer: TransferSettings::default(),
            extractor: ExtractorSettings {
                cookie_file: PathBuf::from("cookies.txt"),
            },
            proxy: ProxySettings::default(),
            server: ServerSettings {
                port: 5000,
                max_concurrent_transfers: 4,
            },
        }
    }
}
