//! Locating and staging the runner executable.
//!
//! The supervisor never reaches for process-wide embedded state. An [`AssetResolver`] is handed
//! in explicitly and returns the files making up a runner; [`StagedRunner`] then copies them to
//! a writable temporary directory from which the executable is launched.

use std::fs;
use std::path::{Path, PathBuf};

use strum::{Display, EnumString};
use tempfile::TempDir;

use crate::error::{Result, RunnerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OsKind {
    Linux,
    MacOs,
    Windows,
    Other,
}

/// Platform identifiers handed to an [`AssetResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: OsKind,
    pub arch: String,
}

impl Platform {
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "linux" => OsKind::Linux,
            "macos" => OsKind::MacOs,
            "windows" => OsKind::Windows,
            _ => OsKind::Other,
        };
        Self {
            os,
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// File name of the runner executable on this platform.
    pub fn executable_name(&self) -> &'static str {
        match self.os {
            OsKind::Windows => "server.exe",
            _ => "server",
        }
    }
}

/// Build flavour of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RunnerVariant {
    Gpu,
    Cpu,
}

/// Files making up one runner: the executable plus any file it loads from its own directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerAssets {
    pub variant: RunnerVariant,
    pub executable: PathBuf,
    pub auxiliary: Vec<PathBuf>,
}

/// Capability returning the runner to launch for a given host.
pub trait AssetResolver: Send + Sync {
    fn resolve(&self, gpu_available: bool, platform: &Platform) -> Result<RunnerAssets>;
}

/// Resolves runners from a bundle directory laid out as `<root>/gpu` and `<root>/cpu`.
///
/// Windows builds live one level deeper, in a `Release` directory. The Metal build on macOS
/// ships its shader next to the executable.
#[derive(Debug, Clone)]
pub struct BundledAssetResolver {
    root: PathBuf,
}

impl BundledAssetResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn variant_dir(&self, variant: RunnerVariant, platform: &Platform) -> PathBuf {
        let dir = self.root.join(variant.to_string());
        match platform.os {
            OsKind::Windows => dir.join("Release"),
            _ => dir,
        }
    }
}

impl AssetResolver for BundledAssetResolver {
    fn resolve(&self, gpu_available: bool, platform: &Platform) -> Result<RunnerAssets> {
        let gpu_dir = self.variant_dir(RunnerVariant::Gpu, platform);
        let variant = if gpu_available && gpu_dir.is_dir() {
            RunnerVariant::Gpu
        } else {
            RunnerVariant::Cpu
        };
        let dir = self.variant_dir(variant, platform);

        let executable = dir.join(platform.executable_name());
        if !executable.is_file() {
            return Err(RunnerError::Asset(format!(
                "runner executable not found in {}",
                dir.display()
            )));
        }

        let mut auxiliary = Vec::new();
        if variant == RunnerVariant::Gpu && platform.os == OsKind::MacOs {
            auxiliary.push(dir.join("ggml-metal.metal"));
        }

        log::debug!("Resolved {variant} runner at {}", executable.display());
        Ok(RunnerAssets {
            variant,
            executable,
            auxiliary,
        })
    }
}

/// Runner files copied into a private temporary directory.
///
/// The directory and its contents are removed when the value is dropped, so it has to outlive
/// the process launched from it.
#[derive(Debug)]
pub struct StagedRunner {
    dir: TempDir,
    executable: PathBuf,
}

impl StagedRunner {
    pub fn stage(assets: &RunnerAssets) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("llm-runner-")
            .tempdir()
            .map_err(|e| RunnerError::Asset(format!("failed to create temp dir: {e}")))?;

        let executable = copy_into(&assets.executable, dir.path(), true)?;
        for file in &assets.auxiliary {
            copy_into(file, dir.path(), false)?;
        }

        Ok(Self { dir, executable })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

fn copy_into(source: &Path, dir: &Path, executable: bool) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| RunnerError::Asset(format!("invalid asset path {}", source.display())))?;
    let dest = dir.join(name);

    fs::copy(source, &dest)
        .map_err(|e| RunnerError::Asset(format!("copy {}: {e}", source.display())))?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
    }
    #[cfg(not(unix))]
    let _ = executable;

    Ok(dest)
}
