//! Document storage collaborator.
//!
//! Requesters upload a proof-of-enrollment document with their first voucher
//! request. The issuance engine never sees raw bytes:
//! [`crate::app::IssuanceService::upload_document`] stores the upload through
//! the context's [`FileStorage`] and the resulting [`StoredDocument`] travels
//! with the voucher request.

use crate::config::DocumentsConfig;
use crate::error::{Result, ValidationErrors, VoucherError};
use crate::types::StoredDocument;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Content types accepted for enrollment documents
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &["application/pdf", "image/jpeg", "image/png"];

/// Default upload limit (5 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Where uploaded documents are kept.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persist an upload and describe where it can be fetched.
    ///
    /// # Errors
    ///
    /// - [`VoucherError::Validation`] if the upload is empty, too large or of
    ///   an unaccepted type
    /// - [`VoucherError::Persistence`] if the bytes cannot be written
    async fn store(&self, file_name: &str, content_type: &str, bytes: &[u8]) -> Result<StoredDocument>;
}

/// Stores documents on the local filesystem under `root`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
    base_url: String,
    max_bytes: u64,
}

impl LocalFileStorage {
    /// Creates a storage from upload settings
    #[must_use]
    pub fn from_config(config: &DocumentsConfig) -> Self {
        Self::new(&config.upload_dir, config.public_base_url.clone()).with_max_bytes(config.max_bytes)
    }

    /// Creates a storage writing under `root`, served from `base_url`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Override the upload size limit
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Directory files are written to
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate(&self, file_name: &str, content_type: &str, size: u64) -> Result<()> {
        let mut errors = ValidationErrors::new();
        if file_name.trim().is_empty() {
            errors.add("document", "file name is required");
        }
        if !ACCEPTED_CONTENT_TYPES.contains(&content_type) {
            errors.add("document", "must be a PDF, JPEG or PNG file");
        }
        if size == 0 {
            errors.add("document", "file is empty");
        } else if size > self.max_bytes {
            errors.add("document", format!("file exceeds {} bytes", self.max_bytes));
        }
        errors.into_result()
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        _ => "png",
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn store(&self, file_name: &str, content_type: &str, bytes: &[u8]) -> Result<StoredDocument> {
        let size_bytes = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.validate(file_name, content_type, size_bytes)?;

        let stored_name = format!("{}.{}", Uuid::new_v4().simple(), extension_for(content_type));
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| VoucherError::Persistence(format!("create upload dir: {e}")))?;
        tokio::fs::write(self.root.join(&stored_name), bytes)
            .await
            .map_err(|e| VoucherError::Persistence(format!("write upload: {e}")))?;

        tracing::info!(stored_name = %stored_name, "Document stored");

        Ok(StoredDocument {
            url: format!("{}/{stored_name}", self.base_url),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size_bytes,
        })
    }
}
