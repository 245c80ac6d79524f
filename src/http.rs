use axum::extract::{Multipart, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

use crate::error::SheetError;

/// Multipart field the upload forms use for the file.
pub const UPLOAD_FIELD: &str = "file";

/// Log method, path, status and latency of every request.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis();
    if status.is_server_error() {
        log::error!("{} {} -> {} ({} ms)", method, path, status.as_u16(), elapsed_ms);
    } else {
        log::info!("{} {} -> {} ({} ms)", method, path, status.as_u16(), elapsed_ms);
    }
    response
}

/// Pull the uploaded file out of a multipart body
///
/// # Returns
/// * The client-side file name (possibly empty) and the file content
///
/// # Errors
/// * `BadRequest("No file part")` if no `file` field was sent
/// * `BadRequest` if the body is malformed or over the size limit
pub async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), SheetError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SheetError::bad_request(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| SheetError::bad_request(e.body_text()))?;
        return Ok((name, bytes.to_vec()));
    }

    Err(SheetError::bad_request("No file part"))
}
