//! Runtime adapters: remote execution boundary and tokio integration.

pub mod remote;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_scheduler;

pub use remote::{
    LoopbackBuilder, LoopbackTransport, RemoteRequest, RemoteResponse, RemoteScheduler,
    RemoteStatus, TaskHandler, Transport,
};
#[cfg(feature = "tokio-runtime")]
pub use tokio_scheduler::TokioScheduler;
