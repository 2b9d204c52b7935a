/// Download-and-serve core.
///
/// Shells out to the external download tool (yt-dlp by default), correlates
/// the produced file back to the request via a per-request UUID filename
/// prefix, and hands the caller a [`FetchedFile`] whose [`CleanupGuard`]
/// deletes the artifact exactly once, on every exit path.
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{FetchError, FetchResult};

/// Formats requested via the tool's extract-audio mode.
pub const AUDIO_FORMATS: [&str; 6] = ["mp3", "m4a", "wav", "aac", "opus", "flac"];

/// Whether the requested format selects audio mode (anything else is
/// treated as a video container).
pub fn is_audio_format(format: &str) -> bool {
    AUDIO_FORMATS.contains(&format)
}

/// Build the tool invocation for one request.
///
/// Audio mode extracts the best audio stream and converts it to the
/// requested codec (this needs ffmpeg next to the tool). Video mode picks
/// the best video in the requested container merged with the best audio,
/// falling back to the best available combination.
pub fn build_args(url: &str, output_format: &str, output_template: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if is_audio_format(output_format) {
        args.push("-f".into());
        args.push(format!("bestaudio[ext={output_format}]/bestaudio"));
        args.push("-x".into());
        args.push("--audio-format".into());
        args.push(output_format.into());
    } else {
        args.push("-f".into());
        args.push(format!(
            "bestvideo[ext={output_format}]+bestaudio/best[ext={output_format}]/best"
        ));
        args.push("--merge-output-format".into());
        args.push(output_format.into());
    }
    args.push("-o".into());
    args.push(output_template.into());
    args.push(url.into());
    args
}

/// Owns a materialized artifact and unlinks it exactly once when dropped.
///
/// Inline by default; [`defer_to_background`](Self::defer_to_background)
/// moves the unlink onto a spawned task so it runs after the response has
/// been handed off. A file that is already gone is a no-op; any other
/// unlink failure is logged and never escalated.
#[derive(Debug)]
pub struct CleanupGuard {
    path: PathBuf,
    background: bool,
}

impl CleanupGuard {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            background: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schedule the unlink on the runtime instead of running it inline.
    pub fn defer_to_background(&mut self) {
        self.background = true;
    }
}

fn remove_file_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove {}: {}", path.display(), e),
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        if self.background {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => debug!("removed {}", path.display()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => warn!("failed to remove {}: {}", path.display(), e),
                    }
                });
                return;
            }
        }
        remove_file_quietly(&path);
    }
}

/// A located artifact, owned exclusively by its request.
#[derive(Debug)]
pub struct FetchedFile {
    filename: String,
    guard: CleanupGuard,
}

impl FetchedFile {
    /// The artifact's actual on-disk name (the tool picks the extension).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }

    pub fn into_parts(self) -> (String, CleanupGuard) {
        (self.filename, self.guard)
    }
}

/// Runs the external download tool against a scratch directory.
#[derive(Debug, Clone)]
pub struct Fetcher {
    bin: String,
    download_dir: PathBuf,
}

impl Fetcher {
    pub fn new(bin: String, download_dir: PathBuf) -> Self {
        Self { bin, download_dir }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download `url` in `output_format` and return the materialized file.
    ///
    /// The child-process wait is the only suspension point; concurrent
    /// fetches never coordinate because each owns its UUID filename prefix.
    pub async fn fetch(&self, url: &str, output_format: &str) -> FetchResult<FetchedFile> {
        let request_id = Uuid::new_v4().to_string();
        let template = self.download_dir.join(format!("{request_id}.%(ext)s"));
        let args = build_args(url, output_format, &template.to_string_lossy());

        debug!("request {}: invoking {} {:?}", request_id, self.bin, args);
        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                FetchError::Internal(std::io::Error::new(
                    e.kind(),
                    format!("failed to run {}: {}", self.bin, e),
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                "request {}: {} exited with {}: {}",
                request_id, self.bin, output.status, stderr
            );
            // A partial file in the requested format may have been written
            // before the tool gave up.
            remove_file_quietly(&self.download_dir.join(format!("{request_id}.{output_format}")));
            return Err(FetchError::DownloadFailed(stderr));
        }

        let path = self.locate_artifact(&request_id, output_format).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| request_id.clone());
        info!("request {}: materialized {}", request_id, filename);

        Ok(FetchedFile {
            filename,
            guard: CleanupGuard::new(path),
        })
    }

    /// Find the artifact the tool produced for `request_id`.
    ///
    /// An exact match on the requested extension always wins. Audio
    /// conversions can land in a related container first, so for audio
    /// formats a lone prefixed candidate is accepted; with several
    /// candidates we refuse to guess.
    async fn locate_artifact(&self, request_id: &str, output_format: &str) -> FetchResult<PathBuf> {
        let suffix = format!(".{output_format}");
        let mut candidates: Vec<PathBuf> = Vec::new();

        let mut dir = tokio::fs::read_dir(&self.download_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(request_id) {
                continue;
            }
            if name.ends_with(&suffix) {
                return Ok(entry.path());
            }
            candidates.push(entry.path());
        }

        if is_audio_format(output_format) && candidates.len() == 1 {
            return Ok(candidates.remove(0));
        }
        warn!(
            "request {}: no artifact for format {} ({} other candidates)",
            request_id,
            output_format,
            candidates.len()
        );
        Err(FetchError::FileNotFound)
    }
}

/// Remove leftover files from the scratch directory.
///
/// Called once at service startup: nothing in-flight survives a restart, so
/// anything still present is residue from a crash.
pub async fn clear_scratch_dir(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("startup sweep: failed to remove {:?}: {}", entry.path(), e),
            }
        }
    }
    Ok(removed)
}
