use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::Result;

/// Temporary file backing one media send.
///
/// Removed exactly once: explicitly through [`UploadArtifact::remove`], or on
/// drop if the request ends early.
#[derive(Debug)]
pub struct UploadArtifact {
    path: PathBuf,
    original_name: Option<String>,
    content_type: Option<String>,
    removed: bool,
}

impl UploadArtifact {
    /// Create a fresh, uniquely named file in `dir` and return it open for writing.
    pub async fn create(
        dir: &Path,
        original_name: Option<String>,
        content_type: Option<String>,
    ) -> Result<(Self, tokio::fs::File)> {
        let ext = original_name
            .as_deref()
            .and_then(safe_extension)
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let path = dir.join(format!("upload-{}{ext}", uuid::Uuid::new_v4()));

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok((
            Self {
                path,
                original_name: original_name.filter(|n| !n.trim().is_empty()),
                content_type: content_type.filter(|c| !c.trim().is_empty()),
                removed: false,
            },
            file,
        ))
    }

    /// Convenience for callers that already hold the whole body.
    pub async fn from_bytes(
        dir: &Path,
        original_name: Option<String>,
        content_type: Option<String>,
        bytes: &[u8],
    ) -> Result<Self> {
        let (artifact, mut file) = Self::create(dir, original_name, content_type).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name as sent by the client.
    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    pub async fn remove(mut self) -> Result<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for UploadArtifact {
    fn drop(&mut self) {
        if !self.removed {
            // Early-exit path only; normal flow goes through the async `remove`.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn safe_extension(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}
