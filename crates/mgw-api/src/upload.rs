use std::{collections::HashMap, path::Path};

use axum::extract::Multipart;
use tokio::io::AsyncWriteExt;

use mgw_core::upload::UploadArtifact;

use crate::ApiError;

/// Decoded multipart form: text fields plus at most one spooled file.
#[derive(Default)]
pub(crate) struct UploadForm {
    fields: HashMap<String, String>,
    pub file: Option<UploadArtifact>,
}

impl UploadForm {
    /// Non-blank text field.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}

/// Read every field, streaming the one named `file_field` to disk.
///
/// If decoding fails half-way the partially written artifact is dropped and
/// its file removed with it.
pub(crate) async fn read_form(
    mut multipart: Multipart,
    upload_dir: &Path,
    file_field: &str,
) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == file_field {
            if form.file.is_some() {
                return Err(ApiError::bad_request(format!("only one {file_field} is allowed")));
            }
            let (artifact, mut out) = UploadArtifact::create(
                upload_dir,
                field.file_name().map(str::to_string),
                field.content_type().map(str::to_string),
            )
            .await?;
            // Owned by the form from here on; dropping the form removes the file.
            form.file = Some(artifact);

            let mut size = 0usize;
            while let Some(chunk) = field.chunk().await? {
                size += chunk.len();
                out.write_all(&chunk)
                    .await
                    .map_err(|e| ApiError::internal(format!("upload write error: {e}")))?;
            }
            out.flush()
                .await
                .map_err(|e| ApiError::internal(format!("upload write error: {e}")))?;
            tracing::debug!(field = %name, size, "upload spooled");
        } else {
            let value = field.text().await?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}
