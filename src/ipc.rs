//! Subprocess IPC with external search backends.
//!
//! A backend is a long-running process that reads requests on stdin and
//! writes result sets on stdout:
//!
//! ```text
//! ┌─────────────────┐   stdin: requests      ┌──────────────────────┐
//! │  BackendClient  │ ─────────────────────► │  pop-launcher / gf   │
//! │                 │ ◄───────────────────── │  (child process)     │
//! └─────────────────┘   stdout: results      └──────────────────────┘
//! ```
//!
//! # Layers
//!
//! ```text
//! BackendClient   connect / search / activate / close, state machine
//!   ├─ Codec        Request → bytes, Frame → Response (json-line, delimited-text)
//!   ├─ LineFramer   bytes → Frames across arbitrary read boundaries
//!   └─ ProcessSession  child process + pipes, bounded shutdown
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use finder_ipc::config::BackendConfig;
//! use finder_ipc::ipc::BackendClient;
//!
//! let client = BackendClient::from_config(&BackendConfig::fuzzy_finder());
//! client.connect().await?;
//! let entries = client.search("notes").await?;
//! client.close().await?;
//! ```

mod client;
mod codec;
mod error;
mod framing;
mod session;

pub use client::{BackendClient, ClientOptions, Launch, SessionState};
pub use codec::{Codec, Decoded, DelimitedTextCodec, JsonLineCodec, ProtocolKind, SkipReason};
pub use error::{ClientError, CodecError, IpcError};
pub use framing::{Frame, FrameMode, LineFramer, MAX_BUFFER_SIZE};
pub use session::{BackendCommand, Chunk, ProcessSession, StderrMode};
