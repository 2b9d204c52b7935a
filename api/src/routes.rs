/// API route handlers for the Gofer fetch service.
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use gofer_shared::errors::FetchError;

use crate::auth;
use crate::stream::ServedFile;
use crate::AppState;

// ====== REQUEST / RESPONSE TYPES ======

#[derive(Deserialize)]
pub struct DownloadParams {
    pub url: Option<String>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_output_format() -> String {
    "mp4".to_string()
}

#[derive(Serialize)]
pub struct Detail {
    pub detail: String,
}

fn error_response(err: FetchError) -> (StatusCode, Json<Detail>) {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(Detail {
            detail: err.to_string(),
        }),
    )
}

// ====== ROUTER ======

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/download/", post(download))
        .route("/download_and_cleanup/", post(download_and_cleanup))
        .layer(cors)
        .with_state(state)
}

// ====== DOWNLOAD ROUTES ======

/// POST /download/ - Fetch media and stream it back.
///
/// The temp file is removed when the response body is dropped, so a
/// client hanging up mid-transfer still leaves the scratch dir clean.
pub async fn download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DownloadParams>,
) -> Result<Response, (StatusCode, Json<Detail>)> {
    handle_download(state, headers, params, false).await
}

/// POST /download_and_cleanup/ - Same as /download/, but the removal is
/// handed off to a background task for hosts where the in-band drop is
/// not trusted to run.
pub async fn download_and_cleanup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DownloadParams>,
) -> Result<Response, (StatusCode, Json<Detail>)> {
    handle_download(state, headers, params, true).await
}

async fn handle_download(
    state: Arc<AppState>,
    headers: HeaderMap,
    params: DownloadParams,
    background_cleanup: bool,
) -> Result<Response, (StatusCode, Json<Detail>)> {
    auth::verify_api_key(&headers, &state.api_key).map_err(error_response)?;

    let url = params.url.as_deref().unwrap_or("").trim().to_string();
    if url.is_empty() {
        return Err(error_response(FetchError::InvalidRequest(
            "The 'url' query parameter is required.".to_string(),
        )));
    }

    let fetched = state
        .fetcher
        .fetch(&url, &params.output_format)
        .await
        .map_err(error_response)?;

    info!("Serving {} for url={}", fetched.filename(), url);

    let (filename, mut guard) = fetched.into_parts();
    if background_cleanup {
        guard.defer_to_background();
    }

    let file = tokio::fs::File::open(guard.path())
        .await
        .map_err(|e| error_response(FetchError::Internal(e)))?;

    let body = Body::from_stream(ServedFile::new(file, guard));
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', "_"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&filename).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".mp4") || filename.ends_with(".mkv") || filename.ends_with(".webm") {
        "video/mp4"
    } else if filename.ends_with(".mp3") {
        "audio/mpeg"
    } else if filename.ends_with(".m4a") || filename.ends_with(".aac") {
        "audio/mp4"
    } else if filename.ends_with(".opus") || filename.ends_with(".ogg") {
        "audio/ogg"
    } else if filename.ends_with(".flac") {
        "audio/flac"
    } else if filename.ends_with(".wav") {
        "audio/wav"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_covers_common_extensions() {
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.mkv"), "video/mp4");
        assert_eq!(content_type_for("a.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("a.opus"), "audio/ogg");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
    }
}

#[cfg(all(test, unix))]
mod endpoint_tests {
    use super::*;
    use axum::http::Request;
    use gofer_shared::fetcher::Fetcher;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tower::ServiceExt;

    const FAKE_KEY: &str = "test-key";

    // Records argv, then captures the path given after -o so the fake can
    // materialize an output file where the real tool would.
    const PREAMBLE: &str = r#"#!/bin/sh
printf '%s\n' "$@" > "$(dirname "$0")/args.txt"
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
"#;

    fn write_fake_tool(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("fake-ytdlp");
        std::fs::write(&path, format!("{}{}", PREAMBLE, body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn app_with_tool(scratch: &Path, tool: &Path) -> Router {
        let state = Arc::new(AppState {
            api_key: FAKE_KEY.to_string(),
            fetcher: Fetcher::new(tool.to_string_lossy().into_owned(), scratch.to_path_buf()),
        });
        router(state)
    }

    fn request(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_key_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "exit 0\n");
        let app = app_with_tool(dir.path(), &tool);

        let resp = app
            .oneshot(request("/download/?url=http://example.com/v", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(!dir.path().join("args.txt").exists());
    }

    #[tokio::test]
    async fn test_rejects_wrong_key() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "exit 0\n");
        let app = app_with_tool(dir.path(), &tool);

        let resp = app
            .oneshot(request("/download/?url=http://example.com/v", Some("bad")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rejects_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "exit 0\n");
        let app = app_with_tool(dir.path(), &tool);

        let resp = app
            .oneshot(request("/download/", Some(FAKE_KEY)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_streams_file_and_cleans_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let tool = write_fake_tool(
            dir.path(),
            "target=$(printf '%s' \"$out\" | sed 's/%(ext)s/mp3/')\nprintf 'fetched-bytes' > \"$target\"\n",
        );
        let app = app_with_tool(&scratch, &tool);

        let resp = app
            .oneshot(request(
                "/download/?url=http://example.com/song&output_format=mp3",
                Some(FAKE_KEY),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\""));
        assert!(disposition.ends_with(".mp3\""));

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"fetched-bytes");

        // Body consumed and dropped, so the scratch dir must be empty.
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failure_surfaces_tool_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_fake_tool(dir.path(), "echo 'ERROR: unsupported url' >&2\nexit 1\n");
        let app = app_with_tool(dir.path(), &tool);

        let resp = app
            .oneshot(request("/download/?url=http://example.com/v", Some(FAKE_KEY)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let detail: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(detail["detail"]
            .as_str()
            .unwrap()
            .contains("unsupported url"));
    }

    #[tokio::test]
    async fn test_video_format_passes_merge_flag() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let tool = write_fake_tool(
            dir.path(),
            "target=$(printf '%s' \"$out\" | sed 's/%(ext)s/mkv/')\nprintf 'v' > \"$target\"\n",
        );
        let app = app_with_tool(&scratch, &tool);

        let resp = app
            .oneshot(request(
                "/download/?url=http://example.com/v&output_format=mkv",
                Some(FAKE_KEY),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert!(args.contains("--merge-output-format"));
        assert!(args.contains("mkv"));
    }

    #[tokio::test]
    async fn test_background_cleanup_removes_file_after_send() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir(&scratch).unwrap();
        let tool = write_fake_tool(
            dir.path(),
            "target=$(printf '%s' \"$out\" | sed 's/%(ext)s/mp4/')\nprintf 'v' > \"$target\"\n",
        );
        let app = app_with_tool(&scratch, &tool);

        let resp = app
            .oneshot(request(
                "/download_and_cleanup/?url=http://example.com/v",
                Some(FAKE_KEY),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let _ = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();

        // Removal runs on a spawned task; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }
}
