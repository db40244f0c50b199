use serde::{Deserialize, Serialize};

use crate::options::GenerationOptions;
use crate::types::Token;

#[derive(Serialize, Debug)]
pub struct TokenizeRequest<'a> {
    pub content: &'a str,
}

#[derive(Deserialize, Debug)]
pub struct TokenizeResponse {
    pub tokens: Vec<Token>,
}

#[derive(Serialize, Debug)]
pub struct DetokenizeRequest<'a> {
    pub tokens: &'a [Token],
}

#[derive(Deserialize, Debug)]
pub struct DetokenizeResponse {
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct EmbeddingRequest<'a> {
    pub content: &'a str,
}

#[derive(Deserialize, Debug)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f64>,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_empty(v: &&[String]) -> bool {
    v.is_empty()
}

/// Body of a `/completion` request. Zero values are left out so the runner applies its own
/// defaults for them.
#[derive(Serialize, Debug, PartialEq)]
pub struct PredictRequest<'a> {
    pub prompt: &'a str,
    pub stream: bool,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub n_predict: i32,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub n_keep: i32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub top_k: i32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub top_p: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub tfs_z: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub typical_p: f32,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub repeat_last_n: i32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub repeat_penalty: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub frequency_penalty: f32,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub mirostat: i32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub mirostat_tau: f32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub mirostat_eta: f32,
    #[serde(skip_serializing_if = "is_false")]
    pub penalize_nl: bool,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub seed: i32,
    #[serde(skip_serializing_if = "is_empty")]
    pub stop: &'a [String],
}

impl<'a> PredictRequest<'a> {
    pub fn new(prompt: &'a str, options: &'a GenerationOptions) -> Self {
        Self {
            prompt,
            stream: true,
            n_predict: options.num_predict,
            n_keep: options.num_keep,
            temperature: options.temperature,
            top_k: options.top_k,
            top_p: options.top_p,
            tfs_z: options.tfs_z,
            typical_p: options.typical_p,
            repeat_last_n: options.repeat_last_n,
            repeat_penalty: options.repeat_penalty,
            presence_penalty: options.presence_penalty,
            frequency_penalty: options.frequency_penalty,
            mirostat: options.mirostat,
            mirostat_tau: options.mirostat_tau,
            mirostat_eta: options.mirostat_eta,
            penalize_nl: options.penalize_newline,
            seed: options.seed,
            stop: &options.stop,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Timings {
    pub predicted_n: u32,
    pub predicted_ms: f64,
    pub prompt_n: u32,
    pub prompt_ms: f64,
}

/// One `data:` record of a completion stream.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Prediction {
    pub content: String,
    pub stop: bool,
    pub timings: Timings,
}
