//! Remote upload collaborator.
//!
//! The engine only knows the [`Uploader`] trait. The HTTP implementation
//! lives in [`xero`]; tests plug in scripted fakes.

pub mod xero;

use crate::model::Record;
use std::future::Future;
use thiserror::Error;

pub use xero::XeroUploader;

/// Phrase in a rejection body meaning the account code is already taken.
pub const DUPLICATE_PHRASE: &str = "Please enter a unique";

/// Why a single upload attempt failed.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The natural key already exists remotely.
    #[error("record already exists: {body}")]
    Duplicate { body: String },

    #[error("failed to read response body (status {status}): {message}")]
    BodyRead { status: u16, message: String },

    #[error("failed to serialize record: {0}")]
    Serialize(String),
}

impl UploadError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, UploadError::Duplicate { .. })
    }

    /// Classify a non-success response body.
    pub fn from_rejection(status: u16, body: String) -> Self {
        if body.contains(DUPLICATE_PHRASE) {
            UploadError::Duplicate { body }
        } else {
            UploadError::Status { status, body }
        }
    }
}

/// Performs one remote upsert per call.
///
/// Implementations must not retry internally; retry policy belongs to the
/// worker.
pub trait Uploader: Send + Sync + 'static {
    fn upload(&self, record: &Record) -> impl Future<Output = Result<(), UploadError>> + Send;
}
