//! Data models for finder-ipc.
//!
//! Requests and responses mirror the two backend wire protocols. Raw entries
//! keep the backend-native shape; [`Entry`] is the normalized record handed
//! to callers after [`crate::mapper`] has classified it.

use serde::{Deserialize, Serialize};

/// Request sent to a backend process.
///
/// The serde representation is the JSON-line wire shape: `Search` and
/// `Activate` serialize as single-key objects, `Exit` as the bare string
/// `"Exit"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Request {
    Search(String),
    Activate(u32),
    Exit,
}

impl Request {
    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Search(_) => "Search",
            Request::Activate(_) => "Activate",
            Request::Exit => "Exit",
        }
    }
}

/// Decoded backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A complete result set, in backend order.
    Update(Vec<RawEntry>),
    /// Backend acknowledged a request without producing results.
    Ack,
    /// Backend reported a failure for the current request.
    Error(String),
}

/// Icon descriptor attached to pop-launcher results.
///
/// Externally tagged on the wire: `{"Mime": "image/png"}` or
/// `{"Name": "folder"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IconSource {
    Name(String),
    Mime(String),
}

/// Result item as produced by the JSON-line backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherEntry {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<IconSource>,
}

/// Result item as produced by the delimited-text backend.
///
/// The id is the zero-based position of the path within its batch and is
/// meaningless outside that batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    pub id: u32,
    pub path: String,
}

/// Backend-native result shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEntry {
    Launcher(LauncherEntry),
    Path(PathEntry),
}

impl RawEntry {
    pub fn id(&self) -> u32 {
        match self {
            RawEntry::Launcher(entry) => entry.id,
            RawEntry::Path(entry) => entry.id,
        }
    }

    /// MIME type carried by the backend itself, if any.
    pub fn mime_hint(&self) -> Option<&str> {
        match self {
            RawEntry::Launcher(LauncherEntry {
                icon: Some(IconSource::Mime(mime)),
                ..
            }) => Some(mime),
            _ => None,
        }
    }
}

/// Coarse file classification derived from a MIME string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Image,
    Directory,
    Video,
    Audio,
    Code,
    Text,
    /// Fallback for unknown or missing MIME types
    #[default]
    Document,
}

impl Classification {
    /// Icon name used by the launcher front end.
    pub fn icon_name(&self) -> &'static str {
        match self {
            Classification::Image => "Image",
            Classification::Directory => "Folder",
            Classification::Video => "Film",
            Classification::Audio => "Music",
            Classification::Code => "Code",
            Classification::Text => "Text",
            Classification::Document => "Document",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Image => "image",
            Classification::Directory => "directory",
            Classification::Video => "video",
            Classification::Audio => "audio",
            Classification::Code => "code",
            Classification::Text => "text",
            Classification::Document => "document",
        }
    }
}

/// Normalized search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: u32,
    pub title: String,
    pub subtitle: String,
    pub classification: Classification,
    /// MIME string the classification was derived from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Absolute path for results that name a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
