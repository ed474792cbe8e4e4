//! `files/*`: uploading local files for use as `file_data` parts.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{ListOptions, Page};
use crate::client::{Client, RequestOptions};
use crate::names;
use crate::transport::{ApiCall, FileUpload};
use crate::types::serde_helpers::{opt_duration, opt_i64_string};
use crate::types::Part;
use crate::{Error, ErrorContext, Result};

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    #[default]
    StateUnspecified,
    /// Still being processed; not usable in requests yet.
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct File {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, with = "opt_i64_string", skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_hash: Option<String>,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub state: FileState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_metadata: Option<VideoMetadata>,
}

impl File {
    /// A `file_data` part referencing this file.
    pub fn to_part(&self) -> Part {
        Part::file_data(self.uri.clone(), Some(self.mime_type.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadFileOptions {
    /// Overrides detection from the file extension.
    pub mime_type: Option<String>,
    pub display_name: Option<String>,
    /// Requested resource name (`files/<slug>` or the bare slug).
    pub name: Option<String>,
}

impl UploadFileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

fn detect_mime(path: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(mime) = explicit {
        return Ok(mime.to_string());
    }
    mime_guess::from_path(path)
        .first_raw()
        .map(str::to_string)
        .ok_or_else(|| {
            Error::invalid_input_with_context(
                format!(
                    "cannot determine the mime type of `{}`; pass one explicitly",
                    path.display()
                ),
                ErrorContext::new()
                    .with_field_path("mime_type")
                    .with_source("files"),
            )
        })
}

fn upload_metadata(options: &UploadFileOptions, mime_type: &str) -> Result<Value> {
    let mut file = Map::new();
    if let Some(name) = &options.name {
        file.insert("name".into(), Value::String(names::file_name(name)?));
    }
    if let Some(display) = &options.display_name {
        file.insert("displayName".into(), Value::String(display.clone()));
    }
    file.insert("mimeType".into(), Value::String(mime_type.to_string()));
    Ok(json!({ "file": file }))
}

impl Client {
    /// Upload a local file in a single multipart request.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        options: &UploadFileOptions,
    ) -> Result<File> {
        let path = path.as_ref();
        let mime_type = detect_mime(path, options.mime_type.as_deref())?;
        let metadata = upload_metadata(options, &mime_type)?;
        let bytes = tokio::fs::read(path).await?;
        let size = bytes.len();

        let raw = self
            .transport()
            .upload(
                FileUpload {
                    metadata,
                    bytes: Bytes::from(bytes),
                    mime_type: mime_type.clone(),
                },
                &RequestOptions::default(),
            )
            .await?;
        let file: File = match raw.get("file") {
            Some(inner) => serde_json::from_value(inner.clone()),
            None => serde_json::from_value(raw),
        }
        .map_err(|e| Error::protocol(format!("malformed upload response: {}", e)))?;
        info!(name = %file.name, mime = %mime_type, size, "uploaded file");
        Ok(file)
    }

    pub async fn get_file(&self, name: &str) -> Result<File> {
        self.fetch(ApiCall::get(names::file_name(name)?), "file")
            .await
    }

    pub async fn list_files(&self, options: &ListOptions) -> Result<Page<File>> {
        self.fetch_page(ApiCall::get("files"), options, "files")
            .await
    }

    pub async fn delete_file(&self, name: &str) -> Result<()> {
        let name = names::file_name(name)?;
        self.execute(ApiCall::delete(name.clone())).await?;
        info!(name = %name, "deleted file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_detection() {
        assert_eq!(detect_mime(Path::new("clip.mp4"), None).unwrap(), "video/mp4");
        assert_eq!(detect_mime(Path::new("notes.txt"), None).unwrap(), "text/plain");
        assert_eq!(
            detect_mime(Path::new("data.bin"), Some("application/x-custom")).unwrap(),
            "application/x-custom"
        );
        assert!(detect_mime(Path::new("no_extension"), None).is_err());
    }

    #[test]
    fn test_upload_metadata_validates_name() {
        let meta = upload_metadata(&UploadFileOptions::new().name("my-file"), "image/png").unwrap();
        assert_eq!(meta["file"]["name"], "files/my-file");
        assert_eq!(meta["file"]["mimeType"], "image/png");
        assert!(upload_metadata(&UploadFileOptions::new().name("Bad_Name"), "image/png").is_err());
    }

    #[test]
    fn test_file_metadata_decodes() {
        let file: File = serde_json::from_value(serde_json::json!({
            "name": "files/abc-123",
            "mimeType": "video/mp4",
            "sizeBytes": "1048576",
            "uri": "https://example.test/v1beta/files/abc-123",
            "state": "PROCESSING",
            "createTime": "2024-05-01T10:00:00Z",
            "videoMetadata": {"videoDuration": "12.5s"}
        }))
        .unwrap();
        assert_eq!(file.state, FileState::Processing);
        assert_eq!(file.size_bytes, Some(1_048_576));
        assert_eq!(
            file.video_metadata.as_ref().unwrap().video_duration,
            Some(Duration::from_millis(12_500))
        );
        assert!(matches!(file.to_part(), Part::FileData(_)));
    }
}
