//! Records returned by the site's JSON endpoints, plus the small value types
//! the pipeline passes between stages.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// A creator resolved from the directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorRef {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// Response of `/json/creators.json`.
#[derive(Debug, Deserialize)]
pub struct CreatorDirectory {
    #[serde(default)]
    pub creators: Vec<CreatorRef>,
}

/// Response of `/<creator id>.json`.
#[derive(Debug, Default, Deserialize)]
pub struct CreatorData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub posts: Vec<PostRecord>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shared_files: Vec<SharedFileRecord>,
}

/// Post data from the metadata API
#[derive(Debug, Clone, Deserialize)]
pub struct PostRecord {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    /// Unix timestamp in seconds.
    pub created: i64,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<FileRef>,
    #[serde(default)]
    pub post_file: Option<FileRef>,
}

/// A `{file_name, file_url}` pair, used by attachments and post files.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharedFileRecord {
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl SharedFileRecord {
    /// Name the file is stored under in the shared-files directory.
    pub fn stored_name(&self) -> String {
        format!("{}_{}", self.id, self.file_name)
    }

    /// Contents of the `.meta` sidecar.
    pub fn meta_text(&self) -> String {
        format!(
            "Title: {}\nDescription: {}",
            self.title,
            self.description.as_deref().unwrap_or("<None>")
        )
    }
}

/// One resolved unit of download work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    pub directory: PathBuf,
    pub filename: String,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, directory: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            directory: directory.into(),
            filename: filename.into(),
        }
    }
}

/// A text artifact written next to a post's downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxFile {
    pub name: String,
    pub content: String,
}

impl AuxFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
