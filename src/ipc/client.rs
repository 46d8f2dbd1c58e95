//! Backend client: one search backend process behind `connect/search/activate/close`.
//!
//! Neither wire protocol tags responses with the request they answer, so the
//! client keeps a single pending-request slot (an async mutex held from the
//! write until the matching `Update` is read). Requests therefore reach the
//! backend in issue order and responses are consumed in the same order.
//!
//! A search abandoned by its caller (see [`BackendClient::search_with_timeout`])
//! leaves a response in flight. The client counts such unanswered requests
//! and the next search discards that many leading `Update`s before accepting
//! its own. When nothing is outstanding, whatever the backend sent unasked is
//! dropped before a new request goes out.

use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::codec::{Codec, Decoded};
use super::error::{ClientError, IpcError};
use super::framing::LineFramer;
use super::session::{BackendCommand, Chunk, ProcessSession};
use crate::config::BackendConfig;
use crate::mapper::map_entry;
use crate::models::{Entry, RawEntry, Request, Response};
use crate::platform;

/// How long a counted batch that is still short of its declared items may sit
/// without new data before it is accepted as is.
const BATCH_SETTLE: Duration = Duration::from_millis(100);

/// Something that can start a backend session.
///
/// Implemented for [`BackendCommand`]; tests substitute in-process fakes.
pub trait Launch: Send + Sync {
    fn launch(&self) -> Result<ProcessSession, IpcError>;

    /// Human-readable backend name for logs.
    fn describe(&self) -> String;
}

impl Launch for BackendCommand {
    fn launch(&self) -> Result<ProcessSession, IpcError> {
        ProcessSession::spawn(self)
    }

    fn describe(&self) -> String {
        self.program.clone()
    }
}

/// Lifecycle of a client's backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `connect()` has never been called.
    Uninitialized,
    Connecting,
    Ready,
    /// A search is waiting for its response.
    Searching,
    /// The backend died or could not be started; `connect()` to recover.
    Failed,
    /// Terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Searching => "searching",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }
}

/// Per-backend request and mapping options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Prepended to every query (pop-launcher selects its plugin this way).
    pub query_prefix: String,
    /// Look up the MIME type of path results that carry none.
    pub resolve_mime: bool,
}

/// State guarded by the pending-request slot.
struct Inner {
    session: Option<ProcessSession>,
    framer: LineFramer,
    /// Requests written whose `Update` has not been consumed yet.
    unanswered: usize,
    /// Why the session entered `Failed`.
    failure: Option<String>,
}

/// Client for a single search backend.
///
/// All operations take `&self`; concurrent callers are serialized through
/// the pending-request slot.
pub struct BackendClient {
    launcher: Box<dyn Launch>,
    codec: Box<dyn Codec>,
    options: ClientOptions,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
}

impl BackendClient {
    pub fn new(launcher: Box<dyn Launch>, codec: Box<dyn Codec>, options: ClientOptions) -> Self {
        let framer = LineFramer::new(codec.frame_mode());
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            launcher,
            codec,
            options,
            inner: Mutex::new(Inner {
                session: None,
                framer,
                unanswered: 0,
                failure: None,
            }),
            state,
        }
    }

    /// Build a client for a configured backend.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            Box::new(config.command()),
            config.protocol.codec(),
            config.client_options(),
        )
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to session state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Name of the wire protocol in use.
    pub fn protocol(&self) -> &'static str {
        self.codec.name()
    }

    /// Start the backend if it is not already running.
    ///
    /// Idempotent while the session is live. From `Failed` the old process is
    /// reaped and a new one spawned.
    ///
    /// # Errors
    ///
    /// `ClientError::Connect` if the backend cannot be started (never
    /// retried), `ClientError::Disconnected` after `close()`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;

        match self.state() {
            SessionState::Closed => return Err(ClientError::Disconnected),
            SessionState::Ready | SessionState::Searching => {
                debug!("connect(): backend {} already running", self.launcher.describe());
                return Ok(());
            }
            SessionState::Uninitialized | SessionState::Connecting | SessionState::Failed => {}
        }

        if let Some(mut stale) = inner.session.take() {
            debug!("Reaping failed backend {}", stale.label());
            if let Err(e) = stale.close(None).await {
                warn!("Failed to reap previous backend: {}", e);
            }
        }

        self.set_state(SessionState::Connecting);
        match self.launcher.launch() {
            Ok(session) => {
                info!(
                    "Connected to backend {} ({} protocol, pid {:?})",
                    self.launcher.describe(),
                    self.codec.name(),
                    session.pid()
                );
                inner.session = Some(session);
                inner.framer.reset();
                inner.unanswered = 0;
                inner.failure = None;
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start backend {}: {}", self.launcher.describe(), e);
                inner.failure = Some(e.to_string());
                self.set_state(SessionState::Failed);
                Err(ClientError::Connect(e))
            }
        }
    }

    /// Run a query and return its results in backend order.
    ///
    /// Waits for any in-flight request to finish first.
    ///
    /// # Errors
    ///
    /// - `NotConnected` / `Disconnected` / `BackendDied` per session state
    /// - `BackendDied` if the pipes break while searching (session → Failed)
    /// - `Protocol` if the backend floods the framer (session → Failed)
    /// - `Disconnected` if `close()` is called while waiting
    pub async fn search(&self, query: &str) -> Result<Vec<Entry>, ClientError> {
        let raw = {
            let mut inner = self.inner.lock().await;
            self.check_usable(&inner)?;

            let request = Request::Search(format!("{}{}", self.options.query_prefix, query));
            let bytes = self.codec.encode(&request)?;

            if inner.unanswered == 0 {
                let dropped = inner.framer.discard_pending();
                if dropped > 0 {
                    debug!("Dropping {} unsolicited bytes before search", dropped);
                }
            }

            self.set_state(SessionState::Searching);
            self.write(&mut inner, &bytes).await?;
            inner.unanswered += 1;
            debug!("Search sent: {:?}", request);

            let result = self.await_update(&mut inner).await;
            if matches!(result, Ok(_) | Err(ClientError::Backend(_))) {
                self.set_state(SessionState::Ready);
            }
            result?
        };

        Ok(self.map_entries(raw).await)
    }

    /// [`search`](Self::search) bounded by a deadline.
    ///
    /// On timeout the backend is left running and the session stays usable;
    /// the late response is discarded by the next search.
    pub async fn search_with_timeout(
        &self,
        query: &str,
        deadline: Duration,
    ) -> Result<Vec<Entry>, ClientError> {
        match timeout(deadline, self.search(query)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Search {:?} timed out after {:?}", query, deadline);
                self.state.send_if_modified(|state| {
                    if *state == SessionState::Searching {
                        *state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                Err(ClientError::Timeout(deadline))
            }
        }
    }

    /// Ask the backend to activate a result. No response is awaited.
    ///
    /// # Errors
    ///
    /// `ClientError::Codec` if the protocol cannot express activation, plus
    /// the state and pipe errors of [`search`](Self::search).
    pub async fn activate(&self, id: u32) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        self.check_usable(&inner)?;

        let bytes = self.codec.encode(&Request::Activate(id))?;
        self.write(&mut inner, &bytes).await?;
        debug!("Activate sent for id {}", id);
        Ok(())
    }

    /// Send `Exit`, then shut the backend down and release its handles.
    ///
    /// Idempotent. Before `connect()` this is a no-op and the client stays
    /// `Uninitialized`. A search waiting for its response is abandoned with
    /// `ClientError::Disconnected`.
    ///
    /// # Errors
    ///
    /// `ClientError::Shutdown` if the process could not be reaped. The client
    /// is `Closed` regardless.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut previous = SessionState::Closed;
        self.state.send_if_modified(|state| match *state {
            SessionState::Uninitialized | SessionState::Closed => false,
            other => {
                previous = other;
                *state = SessionState::Closed;
                true
            }
        });

        match previous {
            SessionState::Closed => {
                debug!("close(): nothing to do ({})", self.state().as_str());
                return Ok(());
            }
            other => debug!("Session state {} -> closed", other.as_str()),
        }

        let mut inner = self.inner.lock().await;
        inner.framer.reset();
        inner.unanswered = 0;
        let Some(mut session) = inner.session.take() else {
            return Ok(());
        };

        // A dead backend can't read the exit marker
        let marker = if previous == SessionState::Failed {
            None
        } else {
            match self.codec.encode(&Request::Exit) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Could not encode exit request: {}", e);
                    None
                }
            }
        };

        match session.close(marker.as_deref()).await {
            Ok(status) => {
                info!(
                    "Disconnected from backend {} (exit status: {:?})",
                    self.launcher.describe(),
                    status
                );
                Ok(())
            }
            Err(e) => {
                error!("Backend {} shutdown incomplete: {}", self.launcher.describe(), e);
                Err(ClientError::Shutdown(e))
            }
        }
    }

    /// Move to `next` unless the client has been closed.
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next || *state == SessionState::Closed {
                return false;
            }
            debug!("Session state {} -> {}", state.as_str(), next.as_str());
            *state = next;
            true
        });
    }

    fn check_usable(&self, inner: &Inner) -> Result<(), ClientError> {
        match self.state() {
            SessionState::Ready | SessionState::Searching => Ok(()),
            SessionState::Uninitialized | SessionState::Connecting => {
                Err(ClientError::NotConnected)
            }
            SessionState::Closed => Err(ClientError::Disconnected),
            SessionState::Failed => Err(ClientError::BackendDied(
                inner
                    .failure
                    .clone()
                    .unwrap_or_else(|| "backend is not running".to_string()),
            )),
        }
    }

    /// Record a fatal session error and move to `Failed`.
    fn fail(&self, inner: &mut Inner, reason: String) {
        error!("Backend {} failed: {}", self.launcher.describe(), reason);
        inner.failure = Some(reason);
        inner.unanswered = 0;
        self.set_state(SessionState::Failed);
    }

    async fn write(&self, inner: &mut Inner, bytes: &[u8]) -> Result<(), ClientError> {
        let session = inner.session.as_mut().ok_or(ClientError::NotConnected)?;
        if let Err(e) = session.write_bytes(bytes).await {
            return Err(self.backend_died(inner, &e));
        }
        Ok(())
    }

    /// Fail the session after a pipe error.
    fn backend_died(&self, inner: &mut Inner, e: &IpcError) -> ClientError {
        let reason = if e.is_broken_pipe() {
            format!("backend exited ({})", e)
        } else {
            e.to_string()
        };
        self.fail(inner, reason.clone());
        ClientError::BackendDied(reason)
    }

    /// Read frames until the `Update` answering the newest request arrives.
    async fn await_update(&self, inner: &mut Inner) -> Result<Vec<RawEntry>, ClientError> {
        let mut closing = self.state.subscribe();

        loop {
            while let Some(frame) = inner.framer.next_frame() {
                match self.codec.decode(&frame) {
                    Decoded::Skipped(reason) => {
                        debug!("Skipping {} frame: {}", self.codec.name(), reason)
                    }
                    Decoded::Response(Response::Ack) => debug!("Ignoring Ack while searching"),
                    Decoded::Response(Response::Error(message)) => {
                        inner.unanswered = inner.unanswered.saturating_sub(1);
                        if inner.unanswered == 0 {
                            return Err(ClientError::Backend(message));
                        }
                        debug!("Discarding stale error response: {}", message);
                    }
                    Decoded::Response(Response::Update(entries)) => {
                        inner.unanswered = inner.unanswered.saturating_sub(1);
                        if inner.unanswered == 0 {
                            debug!("Search answered with {} entries", entries.len());
                            return Ok(entries);
                        }
                        debug!(
                            "Discarding stale update ({} entries, {} still unanswered)",
                            entries.len(),
                            inner.unanswered
                        );
                    }
                }
            }

            let settle = inner.framer.has_partial_batch();
            let session = inner.session.as_mut().ok_or(ClientError::NotConnected)?;
            let chunk = tokio::select! {
                chunk = session.read_chunk() => chunk,
                _ = tokio::time::sleep(BATCH_SETTLE), if settle => {
                    inner.framer.flush_batch();
                    continue;
                }
                _ = closing.wait_for(|state| *state == SessionState::Closed) => {
                    debug!("Search abandoned by close()");
                    return Err(ClientError::Disconnected);
                }
            };

            match chunk {
                Ok(Chunk::Data(bytes)) => {
                    if let Err(e) = inner.framer.push(&bytes) {
                        let reason = e.to_string();
                        self.fail(inner, reason.clone());
                        return Err(ClientError::Protocol(reason));
                    }
                }
                Ok(Chunk::Eof) => {
                    inner.framer.finish();
                    let reason = "backend closed its output".to_string();
                    self.fail(inner, reason.clone());
                    return Err(ClientError::BackendDied(reason));
                }
                Err(e) => return Err(self.backend_died(inner, &e)),
            }
        }
    }

    /// Normalize raw results, resolving MIME types for bare paths if enabled.
    async fn map_entries(&self, raw: Vec<RawEntry>) -> Vec<Entry> {
        let mut mimes: Vec<Option<String>> = raw
            .iter()
            .map(|entry| entry.mime_hint().map(str::to_owned))
            .collect();

        if self.options.resolve_mime {
            let targets: Vec<(usize, &str)> = raw
                .iter()
                .enumerate()
                .filter_map(|(i, entry)| match entry {
                    RawEntry::Path(p) if mimes[i].is_none() => Some((i, p.path.as_str())),
                    _ => None,
                })
                .collect();

            if !targets.is_empty() {
                let paths: Vec<&str> = targets.iter().map(|(_, path)| *path).collect();
                let resolved = platform::mime_types(&paths).await;
                for ((i, _), mime) in targets.iter().zip(resolved) {
                    mimes[*i] = Some(mime);
                }
            }
        }

        raw.iter()
            .zip(mimes)
            .map(|(entry, mime)| map_entry(entry, mime.as_deref()))
            .collect()
    }
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("backend", &self.launcher.describe())
            .field("protocol", &self.codec.name())
            .field("state", &self.state())
            .finish()
    }
}
