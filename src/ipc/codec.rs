//! Wire codecs for the two backend protocols.
//!
//! # JSON-line (pop-launcher)
//!
//! ```text
//! → {"Search":"find notes"}\n
//! → {"Activate":3}\n
//! → "Exit"\n
//! ← {"Update":[{"id":0,"name":"notes.md","description":"~/notes.md","icon":{"Mime":"text/markdown"}}]}\n
//! ```
//!
//! # Delimited-text (gf)
//!
//! ```text
//! → q:notes\n
//! → c:Exit                      (no newline, no reply)
//! ← 2\n/home/a/notes.md\n/home/a/notes.txt\n
//! ```
//!
//! Neither protocol carries request identifiers; correlation is the
//! client's job.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::error::CodecError;
use super::framing::{Frame, FrameMode};
use crate::models::{LauncherEntry, PathEntry, RawEntry, Request, Response};

/// Why a frame produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The frame could not be parsed at all.
    Malformed(String),
    /// The frame parsed but has a shape this client does not consume.
    Unrecognized(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Malformed(detail) => write!(f, "malformed frame: {}", detail),
            SkipReason::Unrecognized(detail) => write!(f, "unrecognized frame: {}", detail),
        }
    }
}

/// Outcome of decoding one frame.
///
/// Skips are recoverable: the caller moves on to the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Response(Response),
    Skipped(SkipReason),
}

/// Encoder/decoder pair for one wire protocol.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Protocol name for logs and errors.
    fn name(&self) -> &'static str;

    /// How the byte stream is cut into frames for this protocol.
    fn frame_mode(&self) -> FrameMode;

    /// Serialize a request to its exact wire bytes.
    fn encode(&self, request: &Request) -> Result<Vec<u8>, CodecError>;

    /// Decode one complete frame.
    fn decode(&self, frame: &Frame) -> Decoded;
}

/// Wire protocol selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Json,
    Text,
}

impl ProtocolKind {
    pub fn codec(self) -> Box<dyn Codec> {
        match self {
            ProtocolKind::Json => Box::new(JsonLineCodec),
            ProtocolKind::Text => Box::new(DelimitedTextCodec),
        }
    }
}

// =============================================================================
// JSON-line
// =============================================================================

/// One JSON value per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLineCodec;

impl Codec for JsonLineCodec {
    fn name(&self) -> &'static str {
        "json-line"
    }

    fn frame_mode(&self) -> FrameMode {
        FrameMode::Line
    }

    fn encode(&self, request: &Request) -> Result<Vec<u8>, CodecError> {
        let mut bytes = serde_json::to_vec(request)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn decode(&self, frame: &Frame) -> Decoded {
        let value: Value = match serde_json::from_slice(frame.as_bytes()) {
            Ok(value) => value,
            Err(e) => return Decoded::Skipped(SkipReason::Malformed(e.to_string())),
        };

        let Some(update) = value.get("Update") else {
            return Decoded::Skipped(SkipReason::Unrecognized(describe_shape(&value)));
        };

        // An Update always answers one request, however broken its payload
        let Value::Array(items) = update else {
            return Decoded::Response(Response::Error(format!(
                "malformed Update payload: {}",
                describe_shape(update)
            )));
        };

        let entries: Vec<RawEntry> = items
            .iter()
            .filter_map(|item| match LauncherEntry::deserialize(item) {
                Ok(entry) => Some(RawEntry::Launcher(entry)),
                Err(e) => {
                    debug!("Dropping Update entry {}: {}", describe_shape(item), e);
                    None
                }
            })
            .collect();
        debug!(
            "Decoded Update with {} of {} entries ({} bytes)",
            entries.len(),
            items.len(),
            frame.len()
        );
        Decoded::Response(Response::Update(entries))
    }
}

/// Short description of a JSON value's shape for skip logs.
fn describe_shape(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with keys {:?}", keys)
        }
        Value::String(s) => format!("string {:?}", s),
        Value::Array(items) => format!("array of {}", items.len()),
        other => other.to_string(),
    }
}

// =============================================================================
// Delimited-text
// =============================================================================

/// `q:`-prefixed queries, count-prefixed path batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedTextCodec;

impl DelimitedTextCodec {
    pub const EXIT_MARKER: &'static [u8] = b"c:Exit";
}

impl Codec for DelimitedTextCodec {
    fn name(&self) -> &'static str {
        "delimited-text"
    }

    fn frame_mode(&self) -> FrameMode {
        FrameMode::CountedBatch
    }

    fn encode(&self, request: &Request) -> Result<Vec<u8>, CodecError> {
        match request {
            Request::Search(query) => {
                // A newline inside the query would end the request early
                let query = query.replace(['\n', '\r'], " ");
                Ok(format!("q:{}\n", query).into_bytes())
            }
            Request::Exit => Ok(Self::EXIT_MARKER.to_vec()),
            Request::Activate(_) => Err(CodecError::Unsupported {
                protocol: self.name(),
                request: request.kind(),
            }),
        }
    }

    fn decode(&self, frame: &Frame) -> Decoded {
        let text = frame.text();
        let mut lines = text
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.trim().is_empty());

        let declared = lines.next().map(|header| header.trim().parse::<usize>());
        let entries: Vec<RawEntry> = lines
            .enumerate()
            .map(|(position, path)| {
                RawEntry::Path(PathEntry {
                    id: position as u32,
                    path: path.to_string(),
                })
            })
            .collect();

        match declared {
            Some(Ok(count)) if count != entries.len() => debug!(
                "Batch declared {} items but carried {}",
                count,
                entries.len()
            ),
            Some(Err(e)) => debug!("Batch count line is not a number: {}", e),
            _ => {}
        }

        Decoded::Response(Response::Update(entries))
    }
}
