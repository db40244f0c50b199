use std::time::Duration;

use derive_more::{Deref, From};
use serde::{Deserialize, Serialize};

/// Token identifier as produced by the runner's tokenizer.
pub type Token = i32;

/// Accumulated dialogue history, as token ids.
///
/// Owned by the caller across turns: passed into a generation and returned, extended, in its
/// final [`GenerateResponse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, From)]
#[serde(transparent)]
pub struct ConversationContext(Vec<Token>);

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.0
    }
}

/// Timings and counts reported with the last record of a completion stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictSummary {
    pub context: ConversationContext,
    pub prompt_eval_count: u32,
    pub prompt_eval_duration: Duration,
    pub eval_count: u32,
    pub eval_duration: Duration,
}

/// One unit of a completion stream. Exactly one [`StreamEvent::Final`] ends a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(String),
    Final(PredictSummary),
}

/// Progress notification handed to generation callbacks.
///
/// Partial responses only carry the text delta; the final one has `done` set along with the
/// updated context and the runner's timings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateResponse {
    pub response: String,
    pub done: bool,
    pub context: Option<ConversationContext>,
    pub prompt_eval_count: u32,
    pub prompt_eval_duration: Duration,
    pub eval_count: u32,
    pub eval_duration: Duration,
}

impl From<StreamEvent> for GenerateResponse {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Fragment(text) => GenerateResponse {
                response: text,
                ..Default::default()
            },
            StreamEvent::Final(summary) => GenerateResponse {
                response: String::new(),
                done: true,
                context: Some(summary.context),
                prompt_eval_count: summary.prompt_eval_count,
                prompt_eval_duration: summary.prompt_eval_duration,
                eval_count: summary.eval_count,
                eval_duration: summary.eval_duration,
            },
        }
    }
}
