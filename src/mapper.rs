//! Normalization of backend results into [`Entry`] records.

use crate::models::{Classification, Entry, RawEntry};

/// Ordered substring checks; the first match wins.
const CLASSIFICATION_RULES: &[(&str, Classification)] = &[
    ("image", Classification::Image),
    ("directory", Classification::Directory),
    ("video", Classification::Video),
    ("audio", Classification::Audio),
    ("application", Classification::Code),
    ("html", Classification::Code),
    ("text", Classification::Text),
];

/// Classify a MIME string. Missing or unrecognized types map to
/// [`Classification::Document`].
pub fn classify(mime: Option<&str>) -> Classification {
    let Some(mime) = mime else {
        return Classification::Document;
    };
    CLASSIFICATION_RULES
        .iter()
        .find(|(needle, _)| mime.contains(needle))
        .map(|(_, class)| *class)
        .unwrap_or_default()
}

/// Map a raw backend result to a normalized entry.
pub fn map_entry(raw: &RawEntry, mime: Option<&str>) -> Entry {
    let classification = classify(mime);
    let mime = mime.filter(|m| !m.is_empty()).map(str::to_owned);

    match raw {
        RawEntry::Launcher(entry) => Entry {
            id: entry.id,
            title: entry.name.clone(),
            subtitle: entry.description.clone(),
            classification,
            mime,
            path: None,
        },
        RawEntry::Path(entry) => Entry {
            id: entry.id,
            title: file_name(&entry.path).to_string(),
            subtitle: entry.path.clone(),
            classification,
            mime,
            path: Some(entry.path.clone()),
        },
    }
}

/// Last `/`-separated component, or the whole path when there is none.
fn file_name(path: &str) -> &str {
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => path,
    }
}
