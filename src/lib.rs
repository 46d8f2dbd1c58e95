//! finder-ipc library
//!
//! Drives external search backends (`pop-launcher`, `gf`) as child processes
//! over their stdin/stdout pipes:
//!
//! - `ipc` - process sessions, stream framing, wire codecs and the client
//! - `mapper` - normalization of backend results into [`models::Entry`]
//! - `models` - requests, responses and result records
//! - `results` - caller-side result set with stale-response protection
//! - `config` - backend presets and the settings file
//! - `platform` - MIME lookup, open/reveal helpers, file details
//!
//! # Example
//!
//! ```ignore
//! use finder_ipc::config::Settings;
//! use finder_ipc::ipc::BackendClient;
//! use finder_ipc::results::ResultSet;
//!
//! let settings = Settings::load(None)?;
//! let backend = settings.select_backend(None)?;
//! let client = BackendClient::from_config(backend);
//! client.connect().await?;
//!
//! let mut results = ResultSet::new();
//! let ticket = results.begin();
//! let entries = client.search("report").await?;
//! results.apply(ticket, entries);
//! ```

pub mod config;
pub mod ipc;
pub mod mapper;
pub mod models;
pub mod platform;
pub mod results;
