use hyper::StatusCode;
pub use rusqlite::Error as DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("An unexpected database error occurred")]
    Database(#[from] DbError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Permission denied")]
    NoPermission,
    #[error("Validation failed: {0}")]
    ValidationFail(String),
    #[error("Wrong request format: {0}")]
    BadRequest(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Upstream service failure: {0}")]
    Upstream(String),
    #[error("An unexpected error occurred")]
    Unexpected(anyhow::Error),
    #[error("An I/O error occurred")]
    HyperError(#[from] hyper::Error),
    #[error("An I/O error occurred")]
    TokioIoError(#[from] tokio::io::Error),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationFailed(pub &'static str);

impl From<ValidationFailed> for AppError {
    fn from(e: ValidationFailed) -> AppError {
        AppError::ValidationFail(e.0.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        use AppError::*;
        match self {
            NotFound(_) => StatusCode::NOT_FOUND,
            NoPermission => StatusCode::FORBIDDEN,
            ValidationFail(_) | BadRequest(_) => StatusCode::BAD_REQUEST,
            MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        use AppError::*;
        match self {
            NotFound(_) => "NOT_FOUND",
            NoPermission => "NO_PERMISSION",
            ValidationFail(_) => "VALIDATION_FAIL",
            BadRequest(_) => "BAD_REQUEST",
            MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Upstream(_) => "UPSTREAM",
            _ => "UNEXPECTED",
        }
    }

    pub fn missing() -> AppError {
        AppError::BadRequest("The request was sent with the wrong path or method".to_string())
    }
}

macro_rules! unexpected {
    () => {
        |e| {
            ::log::error!("Unexpected error: [{}][{}]{}", file!(), line!(), e);
            crate::error::AppError::Unexpected(e.into())
        }
    };
    ($msg: expr) => {{
        let msg = $msg.to_string();
        ::log::error!("Unexpected error: [{}][{}]{}", file!(), line!(), msg);
        crate::error::AppError::Unexpected(::anyhow::anyhow!(msg))
    }};
}
