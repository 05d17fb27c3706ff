//! Remote execution boundary.
//!
//! Closures cannot cross a process boundary, so remote work is addressed by
//! task name with an opaque payload. A [`RemoteScheduler`] turns
//! `post_remote(name, payload)` into a [`RemoteRequest`], hands it to a
//! [`Transport`] from one of its dispatch workers, and resolves a
//! [`JobFuture`] from the [`RemoteResponse`]. Transports are pluggable; the
//! crate ships only [`LoopbackTransport`], an in-process server used in tests.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::diagnostics::DiagnosticsSnapshot;
use crate::core::future::{promise, JobFuture};
use crate::core::job::panic_message;
use crate::core::queue::JobQueue;
use crate::core::scheduler::{Scheduler, SchedulerHandle, SchedulerState, ShutdownMode};
use crate::core::{CallError, Job, RemoteError, SchedulerError};

/// Request sent to a remote executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Correlation id echoed in the response.
    pub id: Uuid,
    /// Name of the task the remote side should run.
    pub task_name: String,
    /// Opaque task input.
    pub payload: Vec<u8>,
}

/// Outcome reported by a remote executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    /// `result` holds the task output.
    Ok,
    /// `result` holds UTF-8 error text.
    Error,
}

/// Response from a remote executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Id of the request being answered.
    pub id: Uuid,
    /// Success or failure.
    pub status: RemoteStatus,
    /// Task output, or error text.
    pub result: Vec<u8>,
}

impl RemoteRequest {
    /// New request with a fresh correlation id.
    #[must_use]
    pub fn new(task_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: task_name.into(),
            payload,
        }
    }
}

impl RemoteResponse {
    /// Successful response to `id`.
    #[must_use]
    pub const fn ok(id: Uuid, result: Vec<u8>) -> Self {
        Self {
            id,
            status: RemoteStatus::Ok,
            result,
        }
    }

    /// Failed response to `id`.
    #[must_use]
    pub fn error(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id,
            status: RemoteStatus::Error,
            result: message.into().into_bytes(),
        }
    }
}

/// Carries a request to wherever it runs and brings the response back.
///
/// Calls are blocking; [`RemoteScheduler`] makes them from its dispatch
/// workers, never from the posting thread.
pub trait Transport: Send + Sync + 'static {
    /// Deliver `request` and wait for its response.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Transport`] or [`RemoteError::Codec`] when delivery fails.
    fn call(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// Scheduler front for remote execution.
///
/// Named tasks go through the transport. Plain [`Job`]s posted through the
/// [`Scheduler`] interface cannot be marshalled and run on the dispatch
/// scheduler instead.
pub struct RemoteScheduler<T: Transport> {
    name: String,
    dispatch: SchedulerHandle,
    transport: Arc<T>,
}

impl<T: Transport> RemoteScheduler<T> {
    /// Send requests through `transport` from `dispatch`'s workers.
    pub fn new(name: impl Into<String>, dispatch: SchedulerHandle, transport: T) -> Self {
        let name = name.into();
        info!(scheduler = %name, dispatch = %dispatch.name(), "remote scheduler created");
        Self {
            name,
            dispatch,
            transport: Arc::new(transport),
        }
    }

    /// Run the named task remotely with a raw payload.
    pub fn post_remote(&self, task_name: impl Into<String>, payload: Vec<u8>) -> JobFuture<Vec<u8>> {
        self.call(RemoteRequest::new(task_name, payload), Ok)
    }

    /// Run the named task remotely with JSON-encoded input and output.
    pub fn post_json<I, O>(&self, task_name: impl Into<String>, input: &I) -> JobFuture<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned + Send + 'static,
    {
        match serde_json::to_vec(input) {
            Ok(payload) => self.call(RemoteRequest::new(task_name, payload), |bytes| {
                serde_json::from_slice(&bytes).map_err(RemoteError::from)
            }),
            Err(e) => JobFuture::resolved(Err(RemoteError::from(e).into())),
        }
    }

    fn call<R, D>(&self, request: RemoteRequest, decode: D) -> JobFuture<R>
    where
        R: Send + 'static,
        D: FnOnce(Vec<u8>) -> Result<R, RemoteError> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let (promise, future) = promise();
        let job = Job::named(request.task_name.clone(), move || {
            let id = request.id;
            let task = request.task_name.clone();
            debug!(request_id = %id, task = %task, "dispatching remote request");
            let outcome = transport
                .call(request)
                .and_then(|response| interpret(id, &task, response))
                .and_then(decode)
                .map_err(CallError::from);
            promise.fulfill(outcome);
        });
        match self.dispatch.post(job) {
            Ok(()) => future,
            Err(_) => JobFuture::resolved(Err(CallError::SchedulerUnavailable)),
        }
    }
}

fn interpret(id: Uuid, task: &str, response: RemoteResponse) -> Result<Vec<u8>, RemoteError> {
    if response.id != id {
        return Err(RemoteError::Mismatch);
    }
    match response.status {
        RemoteStatus::Ok => Ok(response.result),
        RemoteStatus::Error => Err(RemoteError::Task {
            task: task.to_owned(),
            message: String::from_utf8_lossy(&response.result).into_owned(),
        }),
    }
}

impl<T: Transport> Scheduler for RemoteScheduler<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, job: Job) -> Result<(), SchedulerError> {
        self.dispatch.post(job)
    }

    fn post_with_priority(&self, job: Job, priority: usize) -> Result<(), SchedulerError> {
        self.dispatch.post_with_priority(job, priority)
    }

    fn queue_sizes(&self) -> Vec<usize> {
        self.dispatch.queue_sizes()
    }

    fn request_shutdown(&self, mode: ShutdownMode) {
        self.dispatch.request_shutdown(mode);
    }

    fn join(&self) {
        self.dispatch.join();
    }

    fn state(&self) -> SchedulerState {
        self.dispatch.state()
    }

    fn worker_count(&self) -> usize {
        self.dispatch.worker_count()
    }

    fn thread_ids(&self) -> Vec<ThreadId> {
        self.dispatch.thread_ids()
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.dispatch.diagnostics()
    }

    fn queues(&self) -> Vec<Arc<dyn JobQueue>> {
        // Remote work is not stealable.
        Vec::new()
    }

    fn attach_steal_sources(&self, _sources: Vec<Arc<dyn JobQueue>>) {}
}

/// Handler for one named task on a [`LoopbackTransport`].
pub type TaskHandler = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync>;

type Envelope = (Vec<u8>, Sender<Vec<u8>>);

/// In-process transport: a server thread with named handlers.
///
/// Requests and responses are JSON-encoded on the way through, so anything
/// that works here has a wire representation.
pub struct LoopbackTransport {
    requests: Mutex<Option<Sender<Envelope>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

/// Registers handlers before the loopback server starts.
#[derive(Default)]
pub struct LoopbackBuilder {
    handlers: HashMap<String, TaskHandler>,
}

impl LoopbackBuilder {
    /// Serve `task_name` with `handler`.
    #[must_use]
    pub fn handler<F>(mut self, task_name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Vec<u8>, String> + Send + Sync + 'static,
    {
        self.handlers.insert(task_name.into(), Box::new(handler));
        self
    }

    /// Start the server thread.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Transport`] if the thread could not be spawned.
    pub fn spawn(self) -> Result<LoopbackTransport, RemoteError> {
        let (tx, rx) = unbounded::<Envelope>();
        let handlers = self.handlers;
        let server = thread::Builder::new()
            .name("loopback-server".into())
            .spawn(move || serve(&rx, &handlers))
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(LoopbackTransport {
            requests: Mutex::new(Some(tx)),
            server: Mutex::new(Some(server)),
        })
    }
}

fn serve(rx: &Receiver<Envelope>, handlers: &HashMap<String, TaskHandler>) {
    debug!(tasks = handlers.len(), "loopback server started");
    for (bytes, reply) in rx {
        let response = match serde_json::from_slice::<RemoteRequest>(&bytes) {
            Ok(request) => handle(&request, handlers),
            Err(e) => {
                warn!(error = %e, "undecodable loopback request");
                continue;
            }
        };
        match serde_json::to_vec(&response) {
            Ok(encoded) => {
                let _ = reply.send(encoded);
            }
            Err(e) => warn!(error = %e, "unencodable loopback response"),
        }
    }
    debug!("loopback server stopped");
}

fn handle(request: &RemoteRequest, handlers: &HashMap<String, TaskHandler>) -> RemoteResponse {
    let Some(handler) = handlers.get(&request.task_name) else {
        return RemoteResponse::error(request.id, format!("unknown task `{}`", request.task_name));
    };
    match panic::catch_unwind(AssertUnwindSafe(|| handler(request.payload.as_slice()))) {
        Ok(Ok(result)) => RemoteResponse::ok(request.id, result),
        Ok(Err(message)) => RemoteResponse::error(request.id, message),
        Err(payload) => RemoteResponse::error(request.id, panic_message(payload.as_ref())),
    }
}

impl LoopbackTransport {
    /// Start registering handlers.
    #[must_use]
    pub fn builder() -> LoopbackBuilder {
        LoopbackBuilder::default()
    }
}

impl Transport for LoopbackTransport {
    fn call(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let sender = self
            .requests
            .lock()
            .clone()
            .ok_or_else(|| RemoteError::Transport("loopback closed".into()))?;
        let (reply_tx, reply_rx) = bounded(1);
        sender
            .send((serde_json::to_vec(&request)?, reply_tx))
            .map_err(|_| RemoteError::Transport("loopback server gone".into()))?;
        let bytes = reply_rx
            .recv()
            .map_err(|_| RemoteError::Transport("no response".into()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.requests.lock().take();
        if let Some(server) = self.server.lock().take() {
            if server.join().is_err() {
                warn!("loopback server panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::core::ThreadPoolScheduler;

    fn echo_transport() -> LoopbackTransport {
        LoopbackTransport::builder()
            .handler("echo", |payload| Ok(payload.to_vec()))
            .handler("fail", |_| Err("nope".into()))
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_interpret_rejects_mismatched_id() {
        let sent = Uuid::new_v4();
        let response = RemoteResponse::ok(Uuid::new_v4(), vec![1]);
        assert_eq!(interpret(sent, "t", response), Err(RemoteError::Mismatch));
    }

    #[test]
    fn test_loopback_unknown_task() {
        let transport = echo_transport();
        let request = RemoteRequest::new("missing", Vec::new());
        let id = request.id;
        let response = transport.call(request).unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.status, RemoteStatus::Error);
    }

    #[test]
    fn test_remote_scheduler_round_trip() {
        let dispatch = ThreadPoolScheduler::spawn(SchedulerConfig::new().with_worker_count(2)).unwrap();
        let remote = RemoteScheduler::new("remote", dispatch, echo_transport());
        assert_eq!(remote.post_remote("echo", b"ping".to_vec()).wait(), Ok(b"ping".to_vec()));

        let err = remote.post_remote("fail", Vec::new()).wait().unwrap_err();
        assert_eq!(
            err,
            CallError::Remote(RemoteError::Task {
                task: "fail".into(),
                message: "nope".into()
            })
        );
    }
}
