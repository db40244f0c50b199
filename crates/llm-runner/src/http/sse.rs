//! Line framing of the runner's server-sent event stream.

use super::schemas::Prediction;
use crate::error::{Result, RunnerError};

const DATA_PREFIX: &str = "data: ";

/// Extract the payload of a `data:` line. Blank lines and any other framing (`event:`, `id:`,
/// comments) yield `None` and are skipped by the reader.
pub fn data_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    line.strip_prefix(DATA_PREFIX)
}

/// Parse one line of the stream into a prediction record, if it carries one.
pub fn parse_line(line: &str) -> Result<Option<Prediction>> {
    let Some(payload) = data_payload(line) else {
        return Ok(None);
    };

    serde_json::from_str(payload).map(Some).map_err(|e| {
        RunnerError::server(format!("error unmarshaling llm prediction response: {e}"))
    })
}
