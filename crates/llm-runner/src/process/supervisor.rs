use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use super::health::{StartupProbe, terminate, wait_for_runner};
use super::port::{PortSelector, RandomPortSelector};
use super::runner::RunnerProcess;
use crate::assets::{AssetResolver, Platform, StagedRunner};
use crate::check_cancelled;
use crate::config::SupervisorConfig;
use crate::error::{Result, RunnerError};
use crate::execution::cancellable::{CancellablePoller, CancellationToken};
use crate::http::InferenceClient;
use crate::options::{GenerationOptions, GpuLayerPolicy, LaunchParameters, VramTierPolicy};

/// Launches runner processes and keeps trying until one of them answers its health probe.
///
/// Every attempt listens on a fresh port from the [`PortSelector`]. A runner that fails to spawn,
/// exits early or stays silent past the startup timeout is killed and reaped before the next
/// attempt, so a failed [`start`](Self::start) never leaves a process behind.
pub struct RunnerSupervisor {
    config: SupervisorConfig,
    port_selector: Mutex<Box<dyn PortSelector>>,
    gpu_policy: Box<dyn GpuLayerPolicy>,
}

impl Default for RunnerSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl RunnerSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let gpu_policy = VramTierPolicy::new(config.free_vram_mib, Platform::current().os);
        Self {
            config,
            port_selector: Mutex::new(Box::new(RandomPortSelector)),
            gpu_policy: Box::new(gpu_policy),
        }
    }

    pub fn with_port_selector(mut self, selector: impl PortSelector + 'static) -> Self {
        self.port_selector = Mutex::new(Box::new(selector));
        self
    }

    pub fn with_gpu_policy(mut self, policy: impl GpuLayerPolicy + 'static) -> Self {
        self.gpu_policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start `runner` serving `model`, with at most one LoRA adapter.
    pub fn start(
        &self,
        model: &Path,
        runner: &Path,
        adapters: &[PathBuf],
        options: &GenerationOptions,
    ) -> Result<RunnerProcess> {
        self.start_cancellable(model, runner, adapters, options, CancellationToken::new())
    }

    /// Like [`start`](Self::start), but gives up as soon as `cancel` is triggered.
    ///
    /// The token becomes the execution context of the returned process: cancelling it later
    /// aborts generations that share it, and [`RunnerProcess::stop`] cancels it.
    pub fn start_cancellable(
        &self,
        model: &Path,
        runner: &Path,
        adapters: &[PathBuf],
        options: &GenerationOptions,
        cancel: CancellationToken,
    ) -> Result<RunnerProcess> {
        self.launch(model, runner, adapters, options, None, cancel)
    }

    /// Resolve the runner for this host, stage it in a temporary directory and start it.
    ///
    /// The staged copy lives as long as the returned process.
    pub fn load(
        &self,
        resolver: &dyn AssetResolver,
        gpu_available: bool,
        model: &Path,
        adapters: &[PathBuf],
        options: &GenerationOptions,
    ) -> Result<RunnerProcess> {
        validate_model(model)?;
        validate_adapters(adapters)?;

        let assets = resolver.resolve(gpu_available, &Platform::current())?;
        let staged = StagedRunner::stage(&assets)?;
        let executable = staged.executable().to_path_buf();

        self.launch(
            model,
            &executable,
            adapters,
            options,
            Some(staged),
            CancellationToken::new(),
        )
    }

    fn launch(
        &self,
        model: &Path,
        runner: &Path,
        adapters: &[PathBuf],
        options: &GenerationOptions,
        staged: Option<StagedRunner>,
        cancel: CancellationToken,
    ) -> Result<RunnerProcess> {
        validate_model(model)?;
        if !runner.exists() {
            return Err(RunnerError::Validation(format!(
                "runner executable not found: {}",
                runner.display()
            )));
        }
        validate_adapters(adapters)?;

        let range = self.config.port_range()?;
        let gpu_layers = self.gpu_policy.gpu_layers(options);
        let params = LaunchParameters::new(
            model,
            adapters.first().map(PathBuf::as_path),
            options,
            gpu_layers,
        );
        let poller =
            CancellablePoller::with_interval(cancel.clone(), self.config.health_poll_interval());
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            check_cancelled!(cancel);

            let port = self.select_port(&range);
            let client = InferenceClient::new(&self.config.host, port, self.config.probe_timeout())?;

            log::info!(
                "Starting llama runner {} on port {port} (attempt {attempt}/{max_attempts})",
                runner.display()
            );
            let mut child = match spawn(runner, &params, port) {
                Ok(child) => child,
                Err(e) => {
                    log::warn!("Error starting the llama runner: {e}");
                    continue;
                }
            };

            let started = Instant::now();
            let outcome =
                wait_for_runner(&mut child, &client, &poller, self.config.startup_timeout());

            match outcome {
                Ok(StartupProbe::Ready) => {
                    log::info!(
                        "Llama runner started in {:.3} seconds",
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(RunnerProcess::new(
                        client,
                        options.clone(),
                        params,
                        child,
                        cancel,
                        staged,
                    ));
                }
                Ok(StartupProbe::Exited(status)) => {
                    log::warn!("Llama runner on port {port} exited during startup: {status}");
                }
                Ok(StartupProbe::TimedOut) => {
                    log::warn!(
                        "Llama runner on port {port} did not respond within {:?}, retrying",
                        self.config.startup_timeout()
                    );
                }
                Ok(StartupProbe::Cancelled) => {
                    reap(&mut child, port);
                    return Err(RunnerError::Cancelled);
                }
                Err(e) => {
                    log::warn!("Error waiting for llama runner on port {port}: {e}");
                }
            }

            reap(&mut child, port);
        }

        log::error!("Llama runner failed to start after {max_attempts} attempts");
        Err(RunnerError::RunnerStartupExhausted {
            attempts: max_attempts,
        })
    }

    fn select_port(&self, range: &std::ops::Range<u16>) -> u16 {
        self.port_selector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .select(range)
    }
}

fn validate_model(model: &Path) -> Result<()> {
    if !model.exists() {
        return Err(RunnerError::Validation(format!(
            "model not found: {}",
            model.display()
        )));
    }
    Ok(())
}

fn validate_adapters(adapters: &[PathBuf]) -> Result<()> {
    if adapters.len() > 1 {
        return Err(RunnerError::UnsupportedConfiguration(format!(
            "only one lora adapter is supported, but {} were provided",
            adapters.len()
        )));
    }
    Ok(())
}

fn spawn(runner: &Path, params: &LaunchParameters, port: u16) -> io::Result<Child> {
    // Runner output is diagnostic only and goes to our stderr.
    Command::new(runner)
        .args(params.args_with_port(port))
        .stdin(Stdio::null())
        .stdout(Stdio::from(io::stderr()))
        .stderr(Stdio::inherit())
        .spawn()
}

fn reap(child: &mut Child, port: u16) {
    if let Err(e) = terminate(child) {
        log::warn!("Failed to reap llama runner on port {port}: {e}");
    }
}
