use std::path::PathBuf;
use tracing::info;

use crate::error::{RecordingError, Result};
use crate::format::RecordingFormat;
use crate::session::SessionToken;

/// Destination for finished recordings
#[async_trait::async_trait]
pub trait UploadSink: Send + Sync {
    /// Store `data` as `filename`; returns the URL it can be retrieved from
    async fn upload(&self, data: &[u8], filename: &str, mime_type: &str) -> Result<String>;
}

/// File name of an exported recording, namespaced by the requesting user
///
/// `Jane Doe`, token 42, user `u1`, FLAC → `Jane_Doe_session_42_u1.flac`
pub fn recording_filename(
    display_name: &str,
    token: SessionToken,
    user_id: &str,
    format: RecordingFormat,
) -> String {
    let owner: Vec<String> = display_name
        .split_whitespace()
        .map(sanitize)
        .filter(|part| !part.is_empty())
        .collect();

    let base = format!("session_{}_{}.{}", token, sanitize(user_id), format.extension());
    if owner.is_empty() {
        base
    } else {
        format!("{}_{}", owner.join("_"), base)
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '\0'))
        .collect()
}

/// Writes recordings into a directory
pub struct DirectoryUploadSink {
    directory: PathBuf,
    public_base_url: String,
}

impl DirectoryUploadSink {
    pub fn new(directory: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            directory: directory.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl UploadSink for DirectoryUploadSink {
    async fn upload(&self, data: &[u8], filename: &str, mime_type: &str) -> Result<String> {
        let failed = |e: std::io::Error| RecordingError::UploadFailed(format!("{}: {}", filename, e));

        tokio::fs::create_dir_all(&self.directory).await.map_err(failed)?;
        let path = self.directory.join(filename);
        tokio::fs::write(&path, data).await.map_err(failed)?;

        info!("Stored {} ({} bytes, {})", path.display(), data.len(), mime_type);
        Ok(format!("{}/{}", self.public_base_url, filename))
    }
}
