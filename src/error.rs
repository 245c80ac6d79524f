use thiserror::Error;

/// Failures surfaced by ingestion, the dataset stores and the query engine.
///
/// Every variant maps to exactly one HTTP status, see [`SheetError::status_code`].
#[derive(Debug, Error)]
pub enum SheetError {
    /// Malformed request: missing file part, empty name, rejected extension, missing parameter
    #[error("{0}")]
    BadRequest(String),

    /// A sort or filter column that is not part of the dataset
    #[error("Column \"{0}\" not found")]
    InvalidColumn(String),

    /// The requested file is not stored
    #[error("File not found")]
    NotFound,

    /// The spreadsheet could not be decoded
    #[error("{0}")]
    ParseFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A blocking worker panicked or was cancelled
    #[error("{0}")]
    Internal(String),
}

impl SheetError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        SheetError::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            SheetError::BadRequest(_) | SheetError::InvalidColumn(_) => 400,
            SheetError::NotFound => 404,
            SheetError::ParseFailure(_) | SheetError::Io(_) | SheetError::Internal(_) => 500,
        }
    }
}

impl From<calamine::Error> for SheetError {
    fn from(e: calamine::Error) -> Self {
        SheetError::ParseFailure(e.to_string())
    }
}

impl From<csv::Error> for SheetError {
    fn from(e: csv::Error) -> Self {
        SheetError::ParseFailure(e.to_string())
    }
}

#[cfg(feature = "web")]
impl From<tokio::task::JoinError> for SheetError {
    fn from(e: tokio::task::JoinError) -> Self {
        SheetError::Internal(format!("worker failed: {}", e))
    }
}

#[cfg(feature = "web")]
impl axum::response::IntoResponse for SheetError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        (
            status,
            axum::Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
