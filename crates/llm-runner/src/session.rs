//! One user facing generation: prior context plus a new prompt, streamed back as
//! [`GenerateResponse`]s.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, bounded};
use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::check_cancelled;
use crate::error::{Result, RunnerError};
use crate::execution::cancellable::CancellationToken;
use crate::http::InferenceClient;
use crate::options::GenerationOptions;
use crate::process::RunnerProcess;
use crate::types::{ConversationContext, GenerateResponse};

const JOB_CHANNEL_CAPACITY: usize = 64;

/// Caller input for one turn of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub context: ConversationContext,
    pub prompt: String,
}

impl GenerationRequest {
    pub fn new(context: ConversationContext, prompt: impl Into<String>) -> Self {
        Self {
            context,
            prompt: prompt.into(),
        }
    }
}

/// Coordinates a single generation against a runner it borrows for the call's duration.
#[derive(new)]
pub struct GenerationSession<'a> {
    client: &'a InferenceClient,
    options: &'a GenerationOptions,
}

impl GenerationSession<'_> {
    /// Decode `context`, append `prompt` and stream the completion into `on_response`.
    ///
    /// Every fragment is forwarded as it arrives, followed by a single response with `done` set
    /// carrying the updated context. A runner that does not answer its liveness probe fails the
    /// call with [`RunnerError::RunnerUnhealthy`] before anything is sent.
    pub fn generate<F>(
        &self,
        context: &ConversationContext,
        prompt: &str,
        cancel: &CancellationToken,
        on_response: F,
    ) -> Result<()>
    where
        F: FnMut(GenerateResponse),
    {
        check_cancelled!(cancel);
        if let Err(e) = self.client.ping() {
            log::warn!("Runner on port {} failed its liveness probe: {e}", self.client.port());
            return Err(RunnerError::RunnerUnhealthy {
                port: self.client.port(),
            });
        }

        let mut full_prompt = self.client.decode(context, cancel)?;
        full_prompt.push_str(prompt);

        self.client
            .stream_predict(&full_prompt, self.options, cancel, on_response)
    }
}

/// A generation running on a worker thread.
///
/// Responses arrive on [`responses`](Self::responses) in stream order. The channel closes once
/// the worker is done; [`join`](Self::join) then reports how it ended.
pub struct GenerationJob {
    responses: Receiver<GenerateResponse>,
    cancel: CancellationToken,
    join: Option<JoinHandle<Result<()>>>,
}

impl GenerationJob {
    pub fn spawn(runner: Arc<RunnerProcess>, request: GenerationRequest) -> Self {
        let (tx, rx) = bounded(JOB_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker_cancel = cancel.clone();
        let join = std::thread::spawn(move || {
            runner.generate(&request, &worker_cancel, |response| {
                if tx.send(response).is_err() {
                    log::debug!("Generation receiver dropped, cancelling");
                    worker_cancel.cancel();
                }
            })
        });

        Self {
            responses: rx,
            cancel,
            join: Some(join),
        }
    }

    pub fn responses(&self) -> &Receiver<GenerateResponse> {
        &self.responses
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn join(mut self) -> Result<()> {
        match self.join.take() {
            Some(join) => join.join().unwrap_or_else(|e| {
                Err(RunnerError::WorkerPanicked(format!(
                    "generation thread panicked: {e:?}"
                )))
            }),
            None => Ok(()),
        }
    }
}
