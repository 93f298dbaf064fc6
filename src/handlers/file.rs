use axum::{
    body::Body,
    extract::{multipart::Field, multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use std::future::Future;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{FileRecord, FileResponse, ListQuery, PasswordQuery, UploadRequest};
use crate::AppState;

/// Upload body staged on local disk until the orchestrator copies it into
/// its tier. Removed when dropped, including on client disconnect.
struct StagedUpload {
    path: PathBuf,
    size: u64,
}

impl StagedUpload {
    async fn from_field(field: &mut Field<'_>, max: u64) -> Result<Self> {
        let mut staged = Self {
            path: std::env::temp_dir().join(format!("fileshare_upload_{}", Uuid::new_v4())),
            size: 0,
        };

        let mut file = tokio::fs::File::create(&staged.path).await.map_err(|e| {
            AppError::Internal(format!("Failed to create temp file: {}", e))
        })?;

        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max))? {
            staged.size += chunk.len() as u64;
            if staged.size > max {
                return Err(AppError::TooLarge { max, size: None });
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(staged)
    }
}

fn remove_staged(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::error!("Failed to remove temp file {:?}: {}", path, e);
        }
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_staged(&path));
            }
            Err(_) => remove_staged(&path),
        }
    }
}

/// Run a mutating service call on its own task; dropping the request future
/// does not cancel it.
async fn detached<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| AppError::Internal(format!("Background task failed: {}", e)))?
}

fn multipart_error(e: MultipartError, max: u64) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::TooLarge { max, size: None }
    } else {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    }
}

/// Empty means unlimited; anything else must be a positive integer
fn parse_max_downloads(raw: Option<String>) -> Result<Option<i64>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => match value.parse::<i64>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(AppError::BadRequest(format!(
                "max-downloads must be a positive integer, got '{}'",
                value
            ))),
        },
    }
}

/// Upload a file
/// POST /api/v1/files
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<FileResponse>>)> {
    let max = state.config.storage.max_upload();

    let mut staged: Option<StagedUpload> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut password: Option<String> = None;
    let mut max_downloads: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                content_type = field.content_type().map(|s| s.to_string());
                staged = Some(StagedUpload::from_field(&mut field, max).await?);
            }
            "password" => {
                password = Some(field.text().await.map_err(|e| multipart_error(e, max))?);
            }
            "max-downloads" => {
                max_downloads = Some(field.text().await.map_err(|e| multipart_error(e, max))?);
            }
            _ => {}
        }
    }

    let staged = staged.ok_or_else(|| {
        AppError::BadRequest(
            "Please add 'file' field in form and make sure it's file formatted".to_string(),
        )
    })?;
    let file_name = file_name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

    let req = UploadRequest {
        file_name,
        mime: content_type
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
        declared_size: staged.size,
        password: password.filter(|p| !p.is_empty()),
        max_downloads: parse_max_downloads(max_downloads)?,
    };

    let files = state.files.clone();
    let record = detached(async move {
        let mut source = tokio::fs::File::open(&staged.path).await?;
        let result = files.upload(req, &mut source).await;
        drop(staged);
        result
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success_with_message(
            "File successfully uploaded",
            FileResponse::from(record),
        )),
    ))
}

/// List files, one page at a time
/// GET /api/v1/files?offset=0
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<FileResponse>>>> {
    let files = state.files.list_page(query.offset).await?;
    Ok(Json(ApiResponse::success(
        files.into_iter().map(FileResponse::from).collect(),
    )))
}

/// Get file info by token
/// GET /api/v1/files/:token
pub async fn get_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = state.files.get_by_token(&token).await?;
    Ok(Json(ApiResponse::success(FileResponse::from(file))))
}

/// Headers for a download response, built from the stored record without any
/// fallible step.
fn download_headers(file: &FileRecord) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = if file.mime == "unknown" {
        None
    } else {
        HeaderValue::from_str(&file.mime).ok()
    };
    headers.insert(
        header::CONTENT_TYPE,
        content_type.unwrap_or_else(|| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size()));

    // Plain filename restricted to printable ASCII; the exact name goes in filename*
    let fallback_name: String = file
        .file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' '..='~' => c,
            _ => '_',
        })
        .collect();
    let encoded_name = urlencoding::encode(&file.file_name);
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_name, encoded_name
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    headers
}

/// Download a file
/// GET /api/v1/files/:token/download?password=xxx
pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Result<Response> {
    let download = state
        .files
        .download(&token, query.password.as_deref())
        .await?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(download.reader)));
    *response.headers_mut() = download_headers(&download.record);
    Ok(response)
}

/// Delete a file
/// DELETE /api/v1/files/:token?password=xxx
pub async fn delete_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let files = state.files.clone();
    let file = detached(async move { files.delete(&token, query.password.as_deref()).await }).await?;
    let message = format!("{} successfully deleted", file.file_name);
    Ok(Json(ApiResponse::success_with_message(
        &message,
        FileResponse::from(file),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, MB};
    use crate::db::Database;
    use crate::repository::FileRepository;
    use crate::services::FileService;
    use crate::storage::{BlobReader, LocalStorage, StorageProvider};
    use async_trait::async_trait;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncRead;
    use tower::ServiceExt;

    const BOUNDARY: &str = "fileshare-test-boundary";

    /// Local storage whose blob removal stalls after the file is gone
    #[derive(Default)]
    struct SlowDeleteStorage {
        inner: LocalStorage,
    }

    #[async_trait]
    impl StorageProvider for SlowDeleteStorage {
        async fn ensure_dir(&self, path: &std::path::Path) -> Result<()> {
            self.inner.ensure_dir(path).await
        }

        async fn put_stream(
            &self,
            path: &std::path::Path,
            reader: &mut (dyn AsyncRead + Send + Unpin),
            expected: u64,
        ) -> Result<u64> {
            self.inner.put_stream(path, reader, expected).await
        }

        async fn open(&self, path: &std::path::Path) -> Result<BlobReader> {
            self.inner.open(path).await
        }

        async fn delete(&self, path: &std::path::Path) -> Result<()> {
            self.inner.delete(path).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }

        async fn delete_dir(&self, path: &std::path::Path) -> Result<()> {
            self.inner.delete_dir(path).await
        }
    }

    async fn test_state(
        tmp: &TempDir,
        storage: Arc<dyn StorageProvider>,
        max_upload_mb: u64,
    ) -> AppState {
        let mut config = Config::default();
        config.storage.upload_path = tmp.path().join("uploads").to_string_lossy().into_owned();
        config.storage.max_upload_mb = max_upload_mb;
        config.storage.request_delete_log_path =
            tmp.path().join("logs").join("request").to_string_lossy().into_owned();
        config.storage.clear_log_path =
            tmp.path().join("logs").join("clear").to_string_lossy().into_owned();
        let config = Arc::new(config);

        let db = Database::new(tmp.path().join("data.db").to_str().unwrap())
            .await
            .unwrap();
        db.run_migrations().await.unwrap();

        let files = Arc::new(FileService::new(
            FileRepository::new(db),
            storage,
            config.clone(),
        ));
        AppState { config, files }
    }

    /// (field name, file name, body)
    fn multipart_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/v1/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn tier_entries(tmp: &TempDir) -> usize {
        ["small", "large"]
            .iter()
            .filter_map(|tier| std::fs::read_dir(tmp.path().join("uploads").join(tier)).ok())
            .map(|rd| rd.count())
            .sum()
    }

    fn record(file_name: &str, mime: &str) -> FileRecord {
        FileRecord {
            id: "id".to_string(),
            token: "token".to_string(),
            file_name: file_name.to_string(),
            mime: mime.to_string(),
            file_size: 42,
            password_hash: None,
            max_downloads: None,
            download_count: 0,
            expires_at: "2100-01-01T00:00:00+00:00".to_string(),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            updated_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn max_downloads_parsing() {
        assert_eq!(parse_max_downloads(None).unwrap(), None);
        assert_eq!(parse_max_downloads(Some(" ".to_string())).unwrap(), None);
        assert_eq!(parse_max_downloads(Some("3".to_string())).unwrap(), Some(3));
        assert!(parse_max_downloads(Some("0".to_string())).is_err());
        assert!(parse_max_downloads(Some("-1".to_string())).is_err());
        assert!(parse_max_downloads(Some("many".to_string())).is_err());
    }

    #[test]
    fn staged_upload_is_removed_on_drop() {
        let path = std::env::temp_dir().join(format!("fileshare_test_{}", Uuid::new_v4()));
        std::fs::write(&path, b"staged").unwrap();

        drop(StagedUpload {
            path: path.clone(),
            size: 6,
        });
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn staged_upload_dropped_on_runtime_is_removed() {
        let path = std::env::temp_dir().join(format!("fileshare_test_{}", Uuid::new_v4()));
        std::fs::write(&path, b"staged").unwrap();

        drop(StagedUpload {
            path: path.clone(),
            size: 6,
        });
        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!path.exists());
    }

    #[test]
    fn download_headers_survive_awkward_names() {
        let headers = download_headers(&record("r\u{e9}sum\u{e9} \"v2\"\n.pdf", "application/pdf"));
        assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(headers[header::CONTENT_LENGTH], "42");
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"r_sum_ _v2__.pdf\""));
        assert!(disposition.contains("filename*=UTF-8''r%C3%A9sum%C3%A9"));

        let headers = download_headers(&record("a.bin", "unknown"));
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");

        let headers = download_headers(&record("a.bin", "bad\nmime"));
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_then_download_over_http() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp, Arc::new(LocalStorage::new()), 1).await;
        let app = crate::create_router(state.clone());

        let response = app
            .clone()
            .oneshot(multipart_request(&[
                ("file", Some("notes.txt"), b"hello over http"),
                ("max-downloads", None, b"1"),
            ]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let records = state.files.list_page(0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_size, 15);
        assert_eq!(tier_entries(&tmp), 1);

        let uri = format!("/api/v1/files/{}/download", records[0].token);
        let response = app
            .clone()
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "15");

        let response = app
            .oneshot(Request::get(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn oversized_multipart_upload_is_rejected_without_side_effects() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp, Arc::new(LocalStorage::new()), 1).await;
        let app = crate::create_router(state.clone());

        let body = vec![b'x'; (MB + 1) as usize];
        let response = app
            .oneshot(multipart_request(&[("file", Some("big.bin"), &body)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        assert!(state.files.list_page(0).await.unwrap().is_empty());
        assert_eq!(tier_entries(&tmp), 0);
    }

    #[tokio::test]
    async fn upload_without_named_file_part_is_bad_request() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp, Arc::new(LocalStorage::new()), 1).await;
        let app = crate::create_router(state.clone());

        let response = app
            .clone()
            .oneshot(multipart_request(&[("password", None, b"secret")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(multipart_request(&[("file", Some(""), b"anonymous")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(state.files.list_page(0).await.unwrap().is_empty());
        assert_eq!(tier_entries(&tmp), 0);
    }

    #[tokio::test]
    async fn dropped_delete_request_still_removes_record_and_blob() {
        let tmp = TempDir::new().unwrap();
        let state = test_state(&tmp, Arc::new(SlowDeleteStorage::default()), 1).await;

        let mut body: &[u8] = b"short lived";
        let stored = state
            .files
            .upload(
                UploadRequest {
                    file_name: "gone.txt".to_string(),
                    mime: "text/plain".to_string(),
                    declared_size: 11,
                    password: None,
                    max_downloads: None,
                },
                &mut body,
            )
            .await
            .unwrap();
        assert_eq!(tier_entries(&tmp), 1);

        // Client goes away while the blob removal is still in flight
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            delete_file(
                State(state.clone()),
                Path(stored.token.clone()),
                Query(PasswordQuery { password: None }),
            ),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;

        let lookup = state.files.get_by_token(&stored.token).await;
        assert!(matches!(lookup, Err(AppError::NotFound(_))));
        assert_eq!(tier_entries(&tmp), 0);
    }
}
