//! Host-facing inference service.
//!
//! The surrounding backend calls [`InferenceService::run_inference`] per
//! upload and wires [`InferenceService::start`] and
//! [`InferenceService::shutdown`] into its own lifecycle. Autostart
//! failures are logged and swallowed here - the host must come up and run
//! degraded even when the model server is unavailable. Inference failures
//! are always surfaced
//! structurally; the HTTP layer is expected to translate them into a
//! client error and to never persist a record for a failed call.

use anyhow::Context;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{AddressError, ModelServerConfig, WorkerAddress};
use crate::health::{StartReport, WorkerState};
use crate::rpc::client::{ClientConfig, InferError, infer};
use crate::rpc::protocol::{Analysis, InferenceRequest};
use crate::supervisor::{StartOutcome, WorkerSupervisor};

/// Facade tying the supervisor and the RPC client together for the host.
///
/// Concurrent `run_inference` calls are independent and lock-free; only
/// lifecycle operations and state queries go through the supervisor lock.
pub struct InferenceService {
    address: WorkerAddress,
    client: ClientConfig,
    supervisor: Mutex<WorkerSupervisor>,
    cancel: CancellationToken,
}

impl InferenceService {
    /// Build from configuration. Fails only on a malformed server URL.
    pub fn new(config: ModelServerConfig) -> Result<Self, AddressError> {
        let address = WorkerAddress::parse(&config.server_url)?;
        Ok(Self {
            address,
            client: ClientConfig::default(),
            supervisor: Mutex::new(WorkerSupervisor::new(config)),
            cancel: CancellationToken::new(),
        })
    }

    /// Build from the environment (see [`ModelServerConfig::from_env`]).
    pub fn from_env() -> anyhow::Result<Self> {
        let config = ModelServerConfig::from_env();
        let url = config.server_url.clone();
        Self::new(config).with_context(|| format!("invalid model server url '{url}'"))
    }

    pub fn with_client_config(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Autostart the model server. Failures are logged, never propagated -
    /// autostart is a convenience, not a hard dependency.
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;
        match supervisor.start(&self.cancel).await {
            Ok(StartOutcome::Started { pid }) => {
                tracing::info!(pid, "Model server autostart complete");
            }
            Ok(StartOutcome::AlreadyRunning) => {
                tracing::info!("Model server autostart skipped (already running)");
            }
            Ok(StartOutcome::Disabled) => {}
            Err(e) => {
                tracing::error!(error = %e, "Model server autostart failed, continuing degraded");
            }
        }
    }

    /// Run one inference for the given image path.
    pub async fn run_inference(
        &self,
        image_path: impl Into<String>,
    ) -> Result<Analysis, InferError> {
        let request = InferenceRequest::new(image_path);
        infer(&self.address, &request, &self.client).await
    }

    /// Observed worker state, derived fresh.
    pub async fn state(&self) -> WorkerState {
        self.supervisor.lock().await.state().await
    }

    /// The most recent autostart attempt, if any.
    pub async fn last_start_report(&self) -> Option<StartReport> {
        self.supervisor.lock().await.last_report().cloned()
    }

    /// Stop the worker. Runs on host shutdown; idempotent, never fails.
    ///
    /// Cancels any in-flight startup polling first, so a shutdown racing a
    /// slow start neither blocks for the full startup timeout nor leaks
    /// the half-started process.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.supervisor.lock().await.stop().await;
    }
}
