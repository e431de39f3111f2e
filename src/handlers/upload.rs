//! Contains the `/upload` endpoint.

use crate::handlers::auth::Authorized;
use crate::validation::{sanitize_event_id, validate_file, DEFAULT_EVENT_ID};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use metrics::transfer::{TransferMetrics, UploadResult};
use serde::Serialize;
use shortguid::ShortGuid;
use tracing::{debug, error, info, warn};
use transfer_queue::{NewTransfer, TransferStatus};

pub trait UploadRoutes {
    /// Provides an API for uploading event photos.
    ///
    /// ```http
    /// POST /upload?token=... HTTP/1.1
    /// Content-Type: multipart/form-data; boundary=...
    /// ```
    ///
    /// The form carries one or more `files` fields, an optional `event_id`
    /// and an optional `uploader_name`.
    ///
    /// ## Arguments
    /// * `body_limit` - The maximum size of the request body, in bytes.
    fn map_upload_endpoint(self, body_limit: usize) -> Self;
}

impl UploadRoutes for Router<AppState> {
    fn map_upload_endpoint(self, body_limit: usize) -> Self {
        self.route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(body_limit)),
        )
    }
}

/// The response to an upload request.
#[derive(Debug, Serialize)]
struct UploadResponse {
    success: bool,
    uploaded: usize,
    failed: usize,
    event_id: String,
    uploader_name: String,
    files: Vec<AcceptedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<RejectedFile>,
}

#[derive(Debug, Serialize)]
struct AcceptedFile {
    original_name: String,
    saved_as: String,
    size_bytes: u64,
    mime_type: &'static str,
    transfer_id: ShortGuid,
    transfer_status: TransferStatus,
}

#[derive(Debug, Serialize)]
struct RejectedFile {
    file_name: String,
    error: String,
}

struct UploadForm {
    files: Vec<(String, Bytes)>,
    event_id: String,
    uploader_name: String,
}

async fn upload(_: Authorized, State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_form(multipart, state.uploads.max_files_per_request).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let event_id = sanitize_event_id(&form.event_id);
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for (original_name, content) in form.files {
        match store_file(&state, &event_id, &form.uploader_name, &original_name, &content).await {
            Ok(file) => {
                TransferMetrics::track_upload(UploadResult::Accepted);
                accepted.push(file);
            }
            Err(error) => {
                TransferMetrics::track_upload(UploadResult::Rejected);
                warn!("Rejected upload {original_name}: {error}");
                rejected.push(RejectedFile {
                    file_name: original_name,
                    error,
                });
            }
        }
    }

    let status = if accepted.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };

    info!(
        "Accepted {accepted} of {total} files for event {event_id}",
        accepted = accepted.len(),
        total = accepted.len() + rejected.len()
    );

    let response = UploadResponse {
        success: !accepted.is_empty(),
        uploaded: accepted.len(),
        failed: rejected.len(),
        event_id,
        uploader_name: form.uploader_name,
        files: accepted,
        errors: rejected,
    };
    (status, Json(response)).into_response()
}

/// Validates, stashes and enqueues a single file.
async fn store_file(
    state: &AppState,
    event_id: &str,
    uploader_name: &str,
    original_name: &str,
    content: &[u8],
) -> Result<AcceptedFile, String> {
    let detected =
        validate_file(&state.uploads, original_name, content).map_err(|e| e.to_string())?;

    let stashed = state
        .stash
        .store(event_id, content, original_name, uploader_name)
        .await
        .map_err(|e| {
            error!("Failed to stash {original_name}: {e}");
            String::from("Failed to save file")
        })?;

    debug!(
        "Stashed {original_name} as {path:?} ({size} bytes, {mime})",
        path = stashed.local_path,
        size = stashed.size_bytes,
        mime = detected.mime_type
    );

    let saved_as = stashed.file_name.clone();
    let local_path = stashed.local_path.clone();
    let input = NewTransfer::from_stashed(stashed, event_id, uploader_name, original_name);
    let record = match state.queue.enqueue(input).await {
        Ok(record) => record,
        Err(e) => {
            // Nothing tracks the file anymore.
            if let Err(cleanup) = state.stash.delete(&local_path).await {
                warn!("Failed to remove untracked file: {cleanup}");
            }
            return Err(e.to_string());
        }
    };

    Ok(AcceptedFile {
        original_name: original_name.to_string(),
        saved_as,
        size_bytes: record.size_bytes,
        mime_type: detected.mime_type,
        transfer_id: record.id,
        transfer_status: record.status,
    })
}

async fn read_form(mut multipart: Multipart, max_files: usize) -> Result<UploadForm, Response> {
    let mut form = UploadForm {
        files: Vec::new(),
        event_id: String::from(DEFAULT_EVENT_ID),
        uploader_name: String::new(),
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(bad_request(format!("Malformed multipart body: {e}"))),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" | "file" => {
                if form.files.len() >= max_files {
                    return Err(bad_request(format!(
                        "Too many files, at most {max_files} files are accepted per request"
                    )));
                }

                let file_name = field.file_name().unwrap_or("unknown").to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read {file_name}: {e}")))?;
                form.files.push((file_name, content));
            }
            "event_id" => {
                form.event_id = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Invalid event_id: {e}")))?;
            }
            "uploader_name" => {
                form.uploader_name = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Invalid uploader_name: {e}")))?
                    .trim()
                    .to_string();
            }
            other => debug!("Ignoring unexpected form field {other}"),
        }
    }

    if form.files.is_empty() {
        return Err(bad_request("No files provided"));
    }

    Ok(form)
}

fn bad_request<S: Into<String>>(detail: S) -> Response {
    problemdetails::new(StatusCode::BAD_REQUEST)
        .with_title("Invalid upload")
        .with_detail(detail.into())
        .with_instance("/upload")
        .into_response()
}
