//! Upload pipeline
//!
//! Drives one multipart upload end to end: parse, sniff, classify against
//! the configured groups, cap, spool and relay to the object store. Every
//! failure mode maps to exactly one HTTP status; detail stays in the logs.

use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

pub mod classify;
mod handler;
mod limit;

pub use handler::{UploadContext, UploadService};
pub use limit::{size_limit_exceeded, CappedReader, SizeLimitExceeded};

/// Multipart field name that carries the file payload.
pub const FILE_FIELD: &str = "file";

/// Upload pipeline errors, one variant per response status.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("request exceeds an allowed size limit")]
    PayloadTooLarge,

    #[error("invalid upload request: {0}")]
    BadRequest(String),

    #[error("no upload group accepts content type '{0}'")]
    UnsupportedMediaType(String),

    #[error("no storage extension resolvable for content type '{0}'")]
    NoExtension(String),

    #[error("multipart stream failed while sniffing content type: {0}")]
    Sniff(#[source] multer::Error),

    #[error("spooling to disk failed: {0}")]
    Spool(#[source] std::io::Error),

    #[error("storage backend failure: {0}")]
    Store(#[from] StoreError),
}

impl UploadError {
    /// The one HTTP status this failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::BadRequest(_) => StatusCode::BAD_REQUEST,
            UploadError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::NoExtension(_) => StatusCode::UNPROCESSABLE_ENTITY,
            UploadError::Sniff(_) | UploadError::Spool(_) | UploadError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Body of a successful upload response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Stored file name: `<id>.<extension>`.
    pub file: String,
    /// Full storage key: `<folder>/<id>.<extension>`.
    pub relative_path: String,
    /// Configured public download prefix.
    pub base_url: String,
}
