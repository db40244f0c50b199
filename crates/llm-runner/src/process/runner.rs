use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Mutex, PoisonError};

use super::health::terminate;
use super::supervisor::RunnerSupervisor;
use crate::assets::StagedRunner;
use crate::error::Result;
use crate::execution::cancellable::CancellationToken;
use crate::http::InferenceClient;
use crate::options::{GenerationOptions, LaunchParameters};
use crate::session::{GenerationRequest, GenerationSession};
use crate::types::GenerateResponse;

/// A running inference server, exclusively owned.
///
/// The process is killed and reaped when this value is stopped or dropped.
pub struct RunnerProcess {
    client: InferenceClient,
    options: GenerationOptions,
    launch: LaunchParameters,
    child: Option<Child>,
    cancel: CancellationToken,
    flight: Mutex<()>,
    // Declared last: the staged executable must outlive the child.
    _staged: Option<StagedRunner>,
}

impl RunnerProcess {
    pub(crate) fn new(
        client: InferenceClient,
        options: GenerationOptions,
        launch: LaunchParameters,
        child: Child,
        cancel: CancellationToken,
        staged: Option<StagedRunner>,
    ) -> Self {
        Self {
            client,
            options,
            launch,
            child: Some(child),
            cancel,
            flight: Mutex::new(()),
            _staged: staged,
        }
    }

    /// Start a runner with the default [`RunnerSupervisor`].
    pub fn start(
        model: &Path,
        runner: &Path,
        adapters: &[PathBuf],
        options: &GenerationOptions,
    ) -> Result<Self> {
        RunnerSupervisor::default().start(model, runner, adapters, options)
    }

    pub fn port(&self) -> u16 {
        self.client.port()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn launch_parameters(&self) -> &LaunchParameters {
        &self.launch
    }

    /// Execution context of the process, cancelled by [`stop`](Self::stop).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_healthy(&self) -> bool {
        self.client.is_healthy()
    }

    /// Replace the options used by subsequent generations.
    ///
    /// Only sampling parameters take effect. Launch parameters are baked into the running
    /// process and need a restart.
    pub fn set_options(&mut self, options: GenerationOptions) {
        let relaunch = LaunchParameters::new(
            &self.launch.model,
            self.launch.adapter.as_deref(),
            &options,
            self.launch.gpu_layers,
        );
        if relaunch != self.launch {
            log::warn!(
                "Launch parameters changed for runner on port {}, restart it to apply them",
                self.port()
            );
        }
        self.options = options;
    }

    /// Run one generation against this process.
    ///
    /// Generations are serialised: a second caller blocks until the first one returns.
    pub fn generate<F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        on_response: F,
    ) -> Result<()>
    where
        F: FnMut(GenerateResponse),
    {
        let _flight = self.flight.lock().unwrap_or_else(PoisonError::into_inner);
        GenerationSession::new(&self.client, &self.options).generate(
            &request.context,
            &request.prompt,
            cancel,
            on_response,
        )
    }

    /// Cancel the process's execution context, then block until the process has exited.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();

        let Some(mut child) = self.child.take() else {
            return;
        };
        let port = self.port();

        let exited_before = matches!(child.try_wait(), Ok(Some(_)));
        match terminate(&mut child) {
            Ok(status) if exited_before && !status.success() => {
                log::warn!("Llama runner on port {port} exited with error: {status}");
            }
            Ok(status) => log::info!("Llama runner on port {port} stopped ({status})"),
            Err(e) => log::warn!("Failed to stop llama runner on port {port}: {e}"),
        }
    }
}

impl Drop for RunnerProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RunnerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerProcess")
            .field("port", &self.port())
            .field("pid", &self.pid())
            .field("model", &self.launch.model)
            .finish()
    }
}
