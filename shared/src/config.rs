/// Environment-derived configuration for both Gofer binaries.
///
/// Everything is read once at process start into an immutable struct that
/// the mains pass down explicitly; no handler looks at the environment.
use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Configuration for the fetch service (`gofer-api`).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Shared secret every request must present in `x-api-key`.
    pub api_key: String,
    pub host: String,
    pub port: u16,
    /// Scratch directory for transient per-request artifacts.
    pub download_dir: PathBuf,
    /// Download tool command. Overridable so tests can point at a fake.
    pub ytdlp_bin: String,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("API_KEY")
            .context("API_KEY environment variable must be set")?;
        let host = std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .unwrap_or(8000);
        let download_dir = std::env::var("DOWNLOAD_DIR")
            .unwrap_or_else(|_| "./temp_downloads".to_string());
        let ytdlp_bin = std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string());

        Ok(Self {
            api_key,
            host,
            port,
            download_dir: PathBuf::from(download_dir),
            ytdlp_bin,
        })
    }
}

/// Configuration for the Telegram relay (`gofer-bot`).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bot_token: String,
    /// Optional Bot API base URL override (e.g. a local Bot API server).
    pub telegram_api_url: Option<String>,
    /// Shared secret for the fetch service, same as the API's API_KEY.
    pub api_key: String,
    /// Base URL of the fetch service.
    pub api_base_url: String,
    /// Chats the relay reacts in.
    pub allowed_chat_ids: HashSet<i64>,
    /// URL prefixes the relay is willing to forward.
    pub allowed_url_prefixes: Vec<String>,
    /// Where response bodies are staged before being sent to the chat.
    pub staging_dir: PathBuf,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let bot_token = std::env::var("TELEGRAM_TOKEN")
            .context("TELEGRAM_TOKEN environment variable must be set")?;
        let telegram_api_url = std::env::var("TELEGRAM_API_URL").ok();
        let api_key = std::env::var("API_KEY")
            .context("API_KEY environment variable must be set (same as the fetch service)")?;
        let api_base_url = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let allowed_chat_ids: HashSet<i64> =
            parse_i64_list(&std::env::var("ALLOWED_GROUP_IDS").unwrap_or_default())
                .context("ALLOWED_GROUP_IDS must be a comma-separated or JSON list of chat ids")?
                .into_iter()
                .collect();
        let allowed_url_prefixes =
            parse_string_list(&std::env::var("ALLOWED_URL_WHITELIST").unwrap_or_default())
                .context("ALLOWED_URL_WHITELIST must be a comma-separated or JSON list of URL prefixes")?;

        let staging_dir = std::env::var("RELAY_STAGING_DIR")
            .unwrap_or_else(|_| "./relay_staging".to_string());

        Ok(Self {
            bot_token,
            telegram_api_url,
            api_key,
            api_base_url,
            allowed_chat_ids,
            allowed_url_prefixes,
            staging_dir: PathBuf::from(staging_dir),
        })
    }
}

/// Parse a list value that may be given either as JSON (`[1, 2]`) or as a
/// comma-separated string (`1,2`). Empty input yields an empty list.
pub fn parse_i64_list(raw: &str) -> Result<Vec<i64>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        let ids: Vec<i64> = serde_json::from_str(raw).context("invalid JSON list")?;
        return Ok(ids);
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().with_context(|| format!("invalid id: {s:?}")))
        .collect()
}

/// Same dual-form parsing for string lists.
pub fn parse_string_list(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        let items: Vec<String> = serde_json::from_str(raw).context("invalid JSON list")?;
        return Ok(items);
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
