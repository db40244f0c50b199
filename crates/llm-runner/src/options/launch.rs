use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::GenerationOptions;

/// Command line surface of a runner, derived once from [`GenerationOptions`] when the runner is
/// launched. The listening port is appended per spawn attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchParameters {
    pub model: PathBuf,
    pub adapter: Option<PathBuf>,
    pub num_ctx: u32,
    pub rope_frequency_base: f32,
    pub rope_frequency_scale: f32,
    pub num_batch: u32,
    pub gpu_layers: i32,
    pub num_gqa: u32,
    pub num_thread: u32,
    pub f16_kv: bool,
    pub use_mlock: bool,
    pub use_mmap: bool,
    pub use_numa: bool,
}

impl LaunchParameters {
    pub fn new(
        model: &Path,
        adapter: Option<&Path>,
        options: &GenerationOptions,
        gpu_layers: i32,
    ) -> Self {
        Self {
            model: model.to_path_buf(),
            adapter: adapter.map(Path::to_path_buf),
            num_ctx: options.num_ctx,
            rope_frequency_base: options.rope_frequency_base,
            rope_frequency_scale: options.rope_frequency_scale,
            num_batch: options.num_batch,
            gpu_layers,
            num_gqa: options.num_gqa,
            num_thread: options.num_thread,
            f16_kv: options.f16_kv,
            use_mlock: options.use_mlock,
            use_mmap: options.use_mmap,
            use_numa: options.use_numa,
        }
    }

    /// Arguments shared by every spawn attempt.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--model".into(),
            self.model.clone().into_os_string(),
            "--ctx-size".into(),
            self.num_ctx.to_string().into(),
            "--rope-freq-base".into(),
            format!("{:.6}", self.rope_frequency_base).into(),
            "--rope-freq-scale".into(),
            format!("{:.6}", self.rope_frequency_scale).into(),
            "--batch-size".into(),
            self.num_batch.to_string().into(),
            "--n-gpu-layers".into(),
            self.gpu_layers.to_string().into(),
            "--embedding".into(),
        ];

        if self.num_gqa > 0 {
            args.push("--gqa".into());
            args.push(self.num_gqa.to_string().into());
        }

        if let Some(adapter) = &self.adapter {
            args.push("--lora".into());
            args.push(adapter.clone().into_os_string());
        }

        if self.num_thread > 0 {
            args.push("--threads".into());
            args.push(self.num_thread.to_string().into());
        }

        if !self.f16_kv {
            args.push("--memory-f32".into());
        }
        if self.use_mlock {
            args.push("--mlock".into());
        }
        if !self.use_mmap {
            args.push("--no-mmap".into());
        }
        if self.use_numa {
            args.push("--numa".into());
        }

        args
    }

    /// Full argument vector for a runner listening on `port`.
    pub fn args_with_port(&self, port: u16) -> Vec<OsString> {
        let mut args = self.to_args();
        args.push("--port".into());
        args.push(port.to_string().into());
        args
    }
}
