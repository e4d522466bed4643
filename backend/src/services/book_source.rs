use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::{info, instrument};

use crate::errors::{AppError, Result};

/// Where the book text comes from. The cache manager reads the full text once
/// per cache initialization; implementations decide whether that is a local
/// file or a remote fetch.
#[async_trait]
pub trait BookSource: Send + Sync {
    /// Reads the complete book text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ContentUnavailable` when the text cannot be read.
    async fn read_book(&self) -> Result<String>;
}

/// Reads the book from a file on disk.
pub struct FileBookSource {
    path: PathBuf,
}

impl FileBookSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BookSource for FileBookSource {
    #[instrument(skip(self), err)]
    async fn read_book(&self) -> Result<String> {
        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            AppError::ContentUnavailable(format!(
                "Failed to read book at {}: {}",
                self.path.display(),
                e
            ))
        })?;
        info!(
            path = %self.path.display(),
            bytes = content.len(),
            "Loaded book content"
        );
        Ok(content)
    }
}

/// Fetches the book over HTTP, for deployments where the text is not bundled
/// with the binary.
pub struct HttpBookSource {
    url: String,
}

impl HttpBookSource {
    #[must_use]
    pub const fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl BookSource for HttpBookSource {
    #[instrument(skip(self), err)]
    async fn read_book(&self) -> Result<String> {
        let response = reqwest::get(&self.url).await.map_err(|e| {
            AppError::ContentUnavailable(format!("Failed to fetch book from {}: {}", self.url, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::ContentUnavailable(format!(
                "Book fetch from {} returned status {}",
                self.url,
                response.status()
            )));
        }

        let content = response.text().await.map_err(|e| {
            AppError::ContentUnavailable(format!("Failed to read book response body: {e}"))
        })?;
        info!(url = %self.url, bytes = content.len(), "Fetched book content");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_book_source_reads_content() {
        let temp_dir = tempdir().unwrap();
        let book_path = temp_dir.path().join("book.md");
        tokio::fs::write(&book_path, "# Das Buch\n\nSteh auf.")
            .await
            .unwrap();

        let source = FileBookSource::new(&book_path);
        let content = source.read_book().await.unwrap();
        assert_eq!(content, "# Das Buch\n\nSteh auf.");
    }

    #[tokio::test]
    async fn test_file_book_source_missing_file_is_content_unavailable() {
        let temp_dir = tempdir().unwrap();
        let source = FileBookSource::new(temp_dir.path().join("missing.md"));

        let err = source.read_book().await.unwrap_err();
        assert!(matches!(err, AppError::ContentUnavailable(_)));
    }
}
