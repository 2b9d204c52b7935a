/// Message handling for the relay bot.
///
/// Every allowed URL in a message is relayed independently: a status
/// message is posted per URL and edited as the fetch progresses, the
/// API response is streamed to a staging file, and the file is sent
/// back to the chat as a video. Staging files are removed on every
/// exit path, success or failure.
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::header::CONTENT_DISPOSITION;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use gofer_shared::config::RelayConfig;

use crate::links;

/// Shared application state for the relay handlers.
pub struct AppState {
    pub config: RelayConfig,
    pub http: reqwest::Client,
}

/// Entry point for every incoming text message.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    if !state.config.allowed_chat_ids.contains(&chat_id.0) {
        info!("Ignoring message from unauthorized chat {}", chat_id);
        bot.send_message(
            chat_id,
            format!(
                "This bot is not authorized to operate in this chat. Your chat id: {}",
                chat_id
            ),
        )
        .await?;
        return Ok(());
    }

    let urls: Vec<String> = links::extract_urls(text)
        .into_iter()
        .filter(|u| links::is_url_allowed(u, &state.config.allowed_url_prefixes))
        .collect();
    if urls.is_empty() {
        return Ok(());
    }

    for url in urls {
        info!("Relaying allowed URL: {}", url);
        let status = bot
            .send_message(
                chat_id,
                format!("URL received!\nProcessing: {}\nStarting download...", url),
            )
            .await?;

        if let Err(e) = relay_one(&bot, chat_id, status.id, &url, &state).await {
            warn!("Relay failed for {}: {}", url, e);
            // Best effort: the status message may have been deleted.
            if let Err(edit_err) = bot
                .edit_message_text(chat_id, status.id, format!("Error processing {}: {}", url, e))
                .await
            {
                warn!("Could not edit status message: {}", edit_err);
            }
        }
    }

    Ok(())
}

/// Fetch one URL through the API and send the result back to the chat.
async fn relay_one(
    bot: &Bot,
    chat_id: ChatId,
    status_id: MessageId,
    url: &str,
    state: &AppState,
) -> anyhow::Result<()> {
    bot.edit_message_text(chat_id, status_id, format!("Downloading video for: {}", url))
        .await?;

    let api_url = format!("{}/download_and_cleanup/", state.config.api_base_url);
    let resp = state
        .http
        .post(&api_url)
        .query(&[("url", url), ("output_format", "mp4")])
        .header("x-api-key", &state.config.api_key)
        .send()
        .await?;

    if resp.status() != reqwest::StatusCode::OK {
        let body = resp.text().await.unwrap_or_default();
        bot.edit_message_text(
            chat_id,
            status_id,
            format!("Could not download the file for: {}\nReason: {}", url, body),
        )
        .await?;
        return Ok(());
    }

    let filename = resp
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| filename_from_url(url));

    // Stage under a UUID prefix so concurrent relays never collide.
    let staging_path = state
        .config
        .staging_dir
        .join(format!("{}-{}", Uuid::new_v4(), filename));

    let write_result = write_body_to_file(resp, &staging_path).await;
    if let Err(e) = write_result {
        remove_quietly(&staging_path).await;
        return Err(e);
    }

    bot.edit_message_text(
        chat_id,
        status_id,
        format!("Download complete! Sending file for: {}", url),
    )
    .await?;

    let send_result = bot
        .send_video(chat_id, InputFile::file(&staging_path))
        .caption(format!("Here is your video for: {}", url))
        .await;

    // The staging copy is deleted before any send error propagates.
    remove_quietly(&staging_path).await;
    send_result?;

    bot.edit_message_text(chat_id, status_id, format!("Video sent for: {}", url))
        .await?;

    Ok(())
}

async fn write_body_to_file(resp: reqwest::Response, path: &PathBuf) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn remove_quietly(path: &PathBuf) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staging file {}: {}", path.display(), e);
        }
    }
}

/// Pull `filename="..."` out of a Content-Disposition header.
fn filename_from_disposition(value: &str) -> Option<String> {
    let idx = value.find("filename=")?;
    let rest = &value[idx + "filename=".len()..];
    let name = rest.trim().trim_matches('"');
    let name = name.split(';').next().unwrap_or(name).trim().trim_matches('"');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Fall back to the last URL path segment, query stripped.
fn filename_from_url(url: &str) -> String {
    let tail = url
        .rsplit('/')
        .next()
        .unwrap_or("")
        .split('?')
        .next()
        .unwrap_or("");
    if tail.is_empty() {
        "video.mp4".to_string()
    } else {
        tail.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"clip.mp4\""),
            Some("clip.mp4".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=plain.mp4"),
            Some("plain.mp4".to_string())
        );
        assert_eq!(filename_from_disposition("attachment"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"\""), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/videos/clip.mp4?sig=abc"),
            "clip.mp4"
        );
        assert_eq!(filename_from_url("https://example.com/"), "video.mp4");
    }

    #[tokio::test]
    async fn test_remove_quietly_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged.mp4");
        tokio::fs::write(&path, b"x").await.unwrap();
        remove_quietly(&path).await;
        assert!(!path.exists());
        // Second removal of a missing file is a no-op.
        remove_quietly(&path).await;
    }
}
