//! Request/response correlation over the worker's stdio.
//!
//! Requests are written to the worker's stdin as single JSON lines. A reader
//! task splits the worker's stdout into lines, keeps only those shaped like a
//! JSON object, and resolves the pending request whose id matches. Anything
//! else on stdout (log text, partial garbage, late responses) is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::supervisor::{ExitInfo, Supervisor};

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest partial line kept while waiting for its terminator.
///
/// A longer response is discarded. When its id appears before the `result`
/// or `error` member, the waiting request fails with `InvalidResponse`;
/// otherwise it runs into its timeout.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// How far into an oversized line to look for its id.
const ID_SCAN_BYTES: usize = 1024;

/// How long a failed write waits for the worker's exit to be recorded.
const EXIT_SETTLE: Duration = Duration::from_millis(100);

/// Lifecycle of the channel and its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
    /// The worker exited on its own. Only an explicit `start()` leaves this state.
    Errored(ExitInfo),
}

/// Splits worker output into protocol messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    oversized: Vec<RequestId>,
}

impl FrameBuffer {
    /// Append bytes and return every complete protocol message they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<JsonRpcResponse> {
        self.buf.extend_from_slice(bytes);

        let mut messages = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(message) = parse_line(&line) {
                messages.push(message);
            }
        }

        if self.buf.len() > MAX_LINE_BYTES {
            let id = leading_id(&self.buf);
            warn!(bytes = self.buf.len(), id = ?id, "dropping oversized partial line from worker");
            self.oversized.extend(id);
            self.buf.clear();
        }

        messages
    }

    /// Ids of responses dropped for exceeding `MAX_LINE_BYTES` since the last call.
    pub fn take_oversized(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.oversized)
    }

    /// Bytes held back waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// The `id` of a truncated response, if it precedes the payload.
fn leading_id(buf: &[u8]) -> Option<RequestId> {
    let head = String::from_utf8_lossy(&buf[..buf.len().min(ID_SCAN_BYTES)]);
    let head = head.trim_start();
    if !head.starts_with('{') {
        return None;
    }

    let id_at = head.find("\"id\":")?;
    let payload_at = ["\"result\":", "\"error\":"]
        .iter()
        .filter_map(|key| head.find(key))
        .min()
        .unwrap_or(usize::MAX);
    if id_at > payload_at {
        return None;
    }

    let rest = head[id_at + "\"id\":".len()..].trim_start();
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(RequestId::String(quoted[..end].to_string()));
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok().map(RequestId::Number)
}

fn parse_line(line: &[u8]) -> Option<JsonRpcResponse> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();

    if !(text.starts_with('{') && text.ends_with('}')) {
        if !text.is_empty() {
            trace!(line = %text, "ignoring non-protocol output");
        }
        return None;
    }

    match serde_json::from_str::<JsonRpcResponse>(text) {
        Ok(message) if message.is_response() => Some(message),
        Ok(message) => {
            trace!(method = ?message.method, "ignoring worker-originated message");
            None
        }
        Err(e) => {
            trace!(error = %e, "ignoring unparseable line");
            None
        }
    }
}

type Responder = oneshot::Sender<Result<Value>>;

struct PendingRequest {
    method: String,
    generation: u64,
    responder: Responder,
}

/// In-flight requests keyed by correlation id.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request and get the receiver its outcome will arrive on.
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
        generation: u64,
    ) -> oneshot::Receiver<Result<Value>> {
        let (responder, receiver) = oneshot::channel();
        let pending = PendingRequest {
            method: method.to_string(),
            generation,
            responder,
        };
        if self.lock().insert(id.clone(), pending).is_some() {
            warn!(%id, "correlation id registered twice");
        }
        receiver
    }

    /// Deliver a response to its request. Returns false for unknown ids.
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(pending) = self.lock().remove(&response.id) else {
            trace!(id = %response.id, "discarding response with unknown id");
            return false;
        };
        trace!(id = %response.id, method = %pending.method, "response received");
        let outcome = response.into_result().map_err(Error::from);
        // The caller may have given up already.
        let _ = pending.responder.send(outcome);
        true
    }

    /// Drop a request without answering it.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Fail one request. Returns false for unknown ids.
    pub fn reject_one(&self, id: &RequestId, error: Error) -> bool {
        let Some(pending) = self.lock().remove(id) else {
            return false;
        };
        let _ = pending.responder.send(Err(error));
        true
    }

    /// Reject every request sent to the given worker generation.
    pub fn reject_generation(&self, generation: u64, error: impl Fn() -> Error) -> usize {
        let rejected: Vec<PendingRequest> = {
            let mut entries = self.lock();
            let (rejected, kept): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|(_, pending)| pending.generation == generation);
            *entries = kept;
            rejected.into_values().collect()
        };
        Self::reject(rejected, error)
    }

    /// Reject every request.
    pub fn reject_all(&self, error: impl Fn() -> Error) -> usize {
        let rejected: Vec<PendingRequest> = self.lock().drain().map(|(_, p)| p).collect();
        Self::reject(rejected, error)
    }

    fn reject(rejected: Vec<PendingRequest>, error: impl Fn() -> Error) -> usize {
        let count = rejected.len();
        for pending in rejected {
            let _ = pending.responder.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Removes a pending entry when the awaiting call ends for any reason.
struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: &'a RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

struct Shared {
    pending: PendingTable,
    state: Mutex<ChannelState>,
    /// Generation of the worker the state describes.
    current: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ChannelState) {
        *self.state() = next;
    }

    fn worker_exited(&self, generation: u64, info: ExitInfo) {
        let rejected = self
            .pending
            .reject_generation(generation, || Error::ProcessExited(info));

        let mut state = self.state();
        // A worker replaced after `stop` must not touch its successor's state.
        if generation != self.current.load(Ordering::SeqCst) {
            debug!(generation, exit = %info, rejected, "previous worker exited");
            return;
        }
        if matches!(*state, ChannelState::Starting | ChannelState::Ready) {
            *state = ChannelState::Errored(info);
            warn!(generation, exit = %info, rejected, "worker exited unexpectedly");
        }
    }
}

/// Correlated request/response channel to one supervised worker.
pub struct Channel {
    supervisor: tokio::sync::Mutex<Supervisor>,
    shared: Arc<Shared>,
    next_id: AtomicI64,
    timeout: Duration,
}

impl Channel {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor: tokio::sync::Mutex::new(supervisor),
            shared: Arc::new(Shared {
                pending: PendingTable::default(),
                state: Mutex::new(ChannelState::NotStarted),
                current: AtomicU64::new(0),
            }),
            next_id: AtomicI64::new(1),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state()
    }

    /// Number of requests awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Start the worker. No-op while one is running; recovers from `Errored`.
    pub async fn start(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        self.start_locked(&mut supervisor)
    }

    fn start_locked(&self, supervisor: &mut Supervisor) -> Result<()> {
        if supervisor.is_running() {
            return Ok(());
        }

        let previous = self.state();
        // Generations count up by one per successful start.
        let previous_generation = self
            .shared
            .current
            .swap(supervisor.generation() + 1, Ordering::SeqCst);
        self.shared.set_state(ChannelState::Starting);

        let shared = Arc::clone(&self.shared);
        let started = supervisor.start(move |generation, info| shared.worker_exited(generation, info));

        match started {
            Ok(stdout) => {
                if let Some(stdout) = stdout {
                    let generation = supervisor.generation();
                    let reader = tokio::spawn(read_responses(
                        stdout,
                        Arc::clone(&self.shared),
                        generation,
                    ));
                    supervisor.attach(reader);
                }
                // The worker may already have died; keep `Errored` if so.
                let mut state = self.shared.state();
                if *state == ChannelState::Starting {
                    *state = ChannelState::Ready;
                }
                Ok(())
            }
            Err(e) => {
                self.shared
                    .current
                    .store(previous_generation, Ordering::SeqCst);
                self.shared.set_state(previous);
                Err(e)
            }
        }
    }

    fn ensure_started(&self, supervisor: &mut Supervisor) -> Result<()> {
        match self.state() {
            ChannelState::Errored(info) => Err(Error::ProcessExited(info)),
            _ if supervisor.is_running() => Ok(()),
            // Exited, but the observer has not reported it yet.
            ChannelState::Starting | ChannelState::Ready => match supervisor.exit_info() {
                Some(info) => Err(Error::ProcessExited(info)),
                None => self.start_locked(supervisor),
            },
            _ => self.start_locked(supervisor),
        }
    }

    /// Write one line; a write that fails because the worker died reports the exit.
    async fn write_to_worker(&self, supervisor: &mut Supervisor, line: &[u8]) -> Result<()> {
        let Some(stdin) = supervisor.stdin() else {
            return Err(match supervisor.exit_info() {
                Some(info) => Error::ProcessExited(info),
                None => self.closed_error(),
            });
        };
        match write_line(stdin, line).await {
            Ok(()) => Ok(()),
            Err(e) => match supervisor.wait_exit(EXIT_SETTLE).await {
                Some(info) => Err(Error::ProcessExited(info)),
                None => Err(e),
            },
        }
    }

    fn closed_error(&self) -> Error {
        match self.state() {
            ChannelState::Errored(info) => Error::ProcessExited(info),
            _ => Error::Stopped,
        }
    }

    /// Send a request and wait for its response's result.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut line = serde_json::to_vec(&JsonRpcRequest::new(id.clone(), method, params))?;
        line.push(b'\n');

        let mut supervisor = self.supervisor.lock().await;
        self.ensure_started(&mut supervisor)?;

        let receiver = self
            .shared
            .pending
            .register(id.clone(), method, supervisor.generation());
        let _guard = PendingGuard {
            table: &self.shared.pending,
            id: &id,
        };

        self.write_to_worker(&mut supervisor, &line).await?;
        drop(supervisor);

        debug!(%id, method, "request sent");

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                warn!(%id, method, timeout = ?self.timeout, "request timed out");
                Err(Error::RequestTimeout {
                    method: method.to_string(),
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Send a request with typed params and result.
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let value = self.send(method, serde_json::to_value(params)?).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidResponse(format!("{method}: {e}")))
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let mut line = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        line.push(b'\n');

        let mut supervisor = self.supervisor.lock().await;
        self.ensure_started(&mut supervisor)?;
        self.write_to_worker(&mut supervisor, &line).await
    }

    /// Stop the worker and reject everything still pending.
    pub async fn stop(&self) {
        let mut supervisor = self.supervisor.lock().await;
        self.shared.set_state(ChannelState::Stopping);

        let rejected = self.shared.pending.reject_all(|| Error::Stopped);
        if rejected > 0 {
            debug!(rejected, "rejected pending requests on stop");
        }

        supervisor.stop().await;
        self.shared.set_state(ChannelState::Stopped);
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &[u8]) -> Result<()> {
    stdin.write_all(line).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_responses(mut stdout: ChildStdout, shared: Arc<Shared>, generation: u64) {
    let mut frames = FrameBuffer::default();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for response in frames.push(&chunk[..n]) {
                    shared.pending.resolve(response);
                }
                for id in frames.take_oversized() {
                    let error = Error::InvalidResponse(format!(
                        "response {id} exceeds {MAX_LINE_BYTES} bytes"
                    ));
                    shared.pending.reject_one(&id, error);
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "failed reading worker output");
                break;
            }
        }
    }

    debug!(generation, "worker output closed");
}
