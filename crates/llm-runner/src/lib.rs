//! Supervisor and streaming client for an out-of-process llama.cpp inference server.
//!
//! A [`RunnerSupervisor`] launches the server on a free loopback port and waits for it to
//! answer. The resulting [`RunnerProcess`] owns the subprocess and serves generations through
//! [`GenerationSession`], which speaks the server's JSON and event-stream protocol via
//! [`InferenceClient`].

pub mod assets;
pub mod config;
pub mod error;
pub mod execution;
pub mod http;
pub mod options;
pub mod process;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use assets::{AssetResolver, BundledAssetResolver, Platform, RunnerAssets, StagedRunner};
pub use config::{ConfigError, SupervisorConfig};
pub use error::{Result, RunnerError};
pub use execution::cancellable::CancellationToken;
pub use http::{InferenceClient, PredictStream};
pub use options::{GenerationOptions, GpuLayerPolicy, LaunchParameters};
pub use process::{PortSelector, RunnerProcess, RunnerSupervisor};
pub use session::{GenerationJob, GenerationRequest, GenerationSession};
pub use types::{ConversationContext, GenerateResponse, PredictSummary, StreamEvent, Token};
