//! Runtime and sampling options for a runner.
//!
//! A single [`GenerationOptions`] snapshot carries both the parameters that are baked into the
//! runner's command line when it is launched ([`LaunchParameters`]) and the sampling parameters
//! sent with every completion request.
mod gpu;
mod launch;

pub use gpu::{FixedGpuLayers, GpuLayerPolicy, VramTierPolicy};
pub use launch::LaunchParameters;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ConfigError, load_json};

/// Immutable snapshot of runtime and sampling parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationOptions {
    // Launch parameters
    pub num_ctx: u32,
    pub num_batch: u32,
    pub num_gqa: u32,
    /// Number of layers to offload to the GPU, `-1` lets the [`GpuLayerPolicy`] decide.
    pub num_gpu: i32,
    /// Number of threads, `0` lets the runner decide.
    pub num_thread: u32,
    pub f16_kv: bool,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub use_numa: bool,
    pub rope_frequency_base: f32,
    pub rope_frequency_scale: f32,

    // Sampling parameters
    pub num_keep: i32,
    pub num_predict: i32,
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub tfs_z: f32,
    pub typical_p: f32,
    pub repeat_last_n: i32,
    pub repeat_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub mirostat: i32,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    pub penalize_newline: bool,
    pub seed: i32,
    pub stop: Vec<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        GenerationOptions {
            num_ctx: 2048,
            num_batch: 512,
            num_gqa: 0,
            num_gpu: -1,
            num_thread: 0,
            f16_kv: true,
            use_mmap: true,
            use_mlock: false,
            use_numa: false,
            rope_frequency_base: 10000.0,
            rope_frequency_scale: 1.0,

            num_keep: 0,
            num_predict: -1,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.9,
            tfs_z: 1.0,
            typical_p: 1.0,
            repeat_last_n: 64,
            repeat_penalty: 1.1,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            mirostat: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            penalize_newline: true,
            seed: -1,
            stop: Vec::new(),
        }
    }
}

impl GenerationOptions {
    /// Load options from a JSON file. Fields absent from the file keep their default value.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path.as_ref())
    }

    pub fn with_stop(mut self, stop: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }
}
