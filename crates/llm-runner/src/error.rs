use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid runner input: {0}")]
    Validation(String),
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    #[error("Runner failed to start after {attempts} attempts")]
    RunnerStartupExhausted { attempts: u32 },
    #[error("Runner on port {port} is not responding")]
    RunnerUnhealthy { port: u16 },
    #[error("Inference server error{}: {message}", status_suffix(.status))]
    InferenceServer {
        status: Option<StatusCode>,
        message: String,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Operation was cancelled")]
    Cancelled,
    #[error("Generation worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("Runner asset error: {0}")]
    Asset(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    pub(crate) fn server(message: impl Into<String>) -> Self {
        RunnerError::InferenceServer {
            status: None,
            message: message.into(),
        }
    }

    /// Whether the error comes from the caller cancelling the operation.
    ///
    /// Callers use this to suppress user facing error messages on intentional
    /// cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled)
    }

    /// The HTTP status returned by the runner, if the error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RunnerError::InferenceServer { status, .. } => *status,
            RunnerError::Transport(err) => err.status(),
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<StatusCode>) -> String {
    match status {
        Some(status) => format!(" {status}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_message_includes_status_when_known() {
        let err = RunnerError::InferenceServer {
            status: Some(StatusCode::BAD_REQUEST),
            message: "prompt too long".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Inference server error 400 Bad Request: prompt too long"
        );
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));

        let err = RunnerError::server("stream closed");
        assert_eq!(err.to_string(), "Inference server error: stream closed");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(RunnerError::Cancelled.is_cancelled());
        assert!(!RunnerError::RunnerStartupExhausted { attempts: 3 }.is_cancelled());
    }
}
