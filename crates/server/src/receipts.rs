use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::ApiError;

pub const RECEIPT_ROUTE_PREFIX: &str = "/uploads/receipts";
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "pdf"];

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("Only .png, .jpg, .jpeg and .pdf receipts are allowed")]
    UnsupportedType,
    #[error("Receipt exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("Please upload a receipt")]
    Empty,
    #[error("receipt storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ReceiptError> for ApiError {
    fn from(value: ReceiptError) -> Self {
        match value {
            ReceiptError::Io(_) => ApiError::integration(value.to_string()),
            other => ApiError::validation(other.to_string()),
        }
    }
}

/// Receipt files on local disk, named `{uuid}.{ext}` and served under
/// [`RECEIPT_ROUTE_PREFIX`].
#[derive(Clone, Debug)]
pub struct ReceiptStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl ReceiptStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self { dir: dir.into(), max_bytes }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Writes the file and returns its public URL path.
    pub async fn save(&self, file_name: Option<&str>, bytes: &[u8]) -> Result<String, ReceiptError> {
        let extension = file_name.and_then(allowed_extension).ok_or(ReceiptError::UnsupportedType)?;
        if bytes.is_empty() {
            return Err(ReceiptError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(ReceiptError::TooLarge { limit: self.max_bytes });
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let stored_name = format!("{}.{extension}", uuid::Uuid::new_v4());
        tokio::fs::write(self.dir.join(&stored_name), bytes).await?;

        tracing::info!(
            event_name = "receipts.stored",
            file = %stored_name,
            size_bytes = bytes.len(),
            "receipt stored"
        );
        Ok(format!("{RECEIPT_ROUTE_PREFIX}/{stored_name}"))
    }

    /// Deletes a receipt previously returned by [`save`](Self::save). Unknown
    /// or foreign URLs are ignored.
    pub async fn remove(&self, url: &str) {
        let Some(stored_name) = url
            .strip_prefix(RECEIPT_ROUTE_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && !name.contains(".."))
        else {
            return;
        };

        match tokio::fs::remove_file(self.dir.join(stored_name)).await {
            Ok(()) => tracing::info!(event_name = "receipts.removed", file = %stored_name, "receipt removed"),
            Err(error) => tracing::warn!(
                event_name = "receipts.remove_failed",
                file = %stored_name,
                error = %error,
                "could not remove receipt"
            ),
        }
    }
}

fn allowed_extension(file_name: &str) -> Option<String> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&extension.as_str()).then_some(extension)
}
