//! qclet: worker lifecycle supervisor and inference RPC client for the
//! medical QC model server.
//!
//! The model server is an external long-running Python process that loads
//! the hemorrhage model and answers one inference request per WebSocket
//! connection. This crate owns two things:
//!
//! - the worker's lifecycle: conditional autostart, interpreter
//!   resolution, readiness detection, output draining, and teardown
//!   including descendant processes
//! - the one-shot request/response exchange with it: connection retry,
//!   bounded deadlines, and error normalization
//!
//! The surrounding CRUD backend consumes all of it through
//! [`InferenceService`].

mod config;
mod health;
mod logging;
mod probe;
mod process_tree;
pub mod rpc;
mod service;
mod supervisor;

pub use config::{AddressError, ModelServerConfig, WorkerAddress};
pub use health::{StartReport, StartStatus, WorkerState};
pub use logging::init_tracing;
pub use probe::probe_ready;
pub use rpc::client::{ClientConfig, InferError, infer};
pub use rpc::protocol::{Analysis, InferenceRequest};
pub use service::InferenceService;
pub use supervisor::{
    CancellationToken, StartError, StartOutcome, WorkerHandle, WorkerSupervisor,
};
