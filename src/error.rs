//! Crate-wide error type.
//!
//! One `thiserror` enum at crate scope rather than one per subsystem: every
//! subsystem here ultimately reports through the same axum `IntoResponse`
//! boundary, so a single enum with a `From` impl per source error keeps the
//! ingress handlers free of manual status-code plumbing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("handshake rejected")]
    HandshakeRejected,

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::HandshakeRejected => StatusCode::CONFLICT,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, self.to_string()).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert("Retry-After", "120".parse().expect("valid header value"));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, Error>;
