use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use llm_runner::{
    BundledAssetResolver, CancellationToken, ConversationContext, GenerationOptions,
    GenerationRequest, RunnerProcess, RunnerSupervisor, SupervisorConfig, Token,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub runner: RunnerArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct RunnerArgs {
    /// Model weights served by the runner.
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    /// Runner executable to launch.
    #[arg(long, global = true, conflicts_with = "runner_dir")]
    pub runner: Option<PathBuf>,

    /// Bundle directory holding `gpu/` and `cpu/` runner builds.
    #[arg(long, global = true)]
    pub runner_dir: Option<PathBuf>,

    /// Prefer the GPU runner build when the bundle has one.
    #[arg(long, global = true)]
    pub gpu: bool,

    /// LoRA adapter applied on top of the model.
    #[arg(long, global = true)]
    pub lora: Vec<PathBuf>,

    /// JSON file with generation options.
    #[arg(long, global = true)]
    pub options: Option<PathBuf>,

    /// JSON file with supervisor settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Free GPU memory in MiB, used to pick how many layers to offload.
    #[arg(long, global = true, value_name = "MIB")]
    pub free_vram: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a completion for a prompt to stdout.
    Generate {
        #[arg(long)]
        prompt: String,
        /// JSON token array holding the conversation so far, updated after the generation.
        #[arg(long)]
        context_file: Option<PathBuf>,
    },
    /// Print the embedding of a text as JSON.
    Embed { text: String },
    /// Print the tokens of a text as JSON.
    Tokenize { text: String },
    /// Print the text of a token sequence.
    Detokenize { tokens: Vec<Token> },
}

pub fn cli_main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let options = match &args.runner.options {
        Some(path) => GenerationOptions::from_file(path)
            .with_context(|| format!("Failed to load options from {}", path.display()))?,
        None => GenerationOptions::default(),
    };

    let runner = start_runner(&args.runner, &options)?;
    let result = handle_command(args.command, &runner);
    runner.stop();
    result
}

fn supervisor_config(args: &RunnerArgs) -> anyhow::Result<SupervisorConfig> {
    let config = match &args.config {
        Some(path) => SupervisorConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SupervisorConfig::default(),
    };
    Ok(match args.free_vram {
        Some(mib) => config.with_free_vram(Some(mib)),
        None => config,
    })
}

fn start_runner(args: &RunnerArgs, options: &GenerationOptions) -> anyhow::Result<RunnerProcess> {
    let supervisor = RunnerSupervisor::new(supervisor_config(args)?);

    let model = args.model.as_deref().context("--model is required")?;
    let runner = match (&args.runner, &args.runner_dir) {
        (Some(runner), _) => supervisor.start(model, runner, &args.lora, options)?,
        (None, Some(dir)) => supervisor.load(
            &BundledAssetResolver::new(dir),
            args.gpu,
            model,
            &args.lora,
            options,
        )?,
        (None, None) => anyhow::bail!("either --runner or --runner-dir is required"),
    };

    Ok(runner)
}

fn handle_command(command: Commands, runner: &RunnerProcess) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let client = runner.client();

    match command {
        Commands::Generate {
            prompt,
            context_file,
        } => generate(runner, &prompt, context_file.as_deref(), &cancel),
        Commands::Embed { text } => {
            let embedding = client.embed(&text, &cancel)?;
            println!("{}", serde_json::to_string(&embedding)?);
            Ok(())
        }
        Commands::Tokenize { text } => {
            let tokens = client.encode(&text, &cancel)?;
            println!("{}", serde_json::to_string(&tokens)?);
            Ok(())
        }
        Commands::Detokenize { tokens } => {
            println!("{}", client.decode(&tokens, &cancel)?);
            Ok(())
        }
    }
}

fn generate(
    runner: &RunnerProcess,
    prompt: &str,
    context_file: Option<&Path>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let context = match context_file {
        Some(path) if path.exists() => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<ConversationContext>(&contents)
                .with_context(|| format!("Invalid context file {}", path.display()))?
        }
        _ => ConversationContext::new(),
    };

    let mut stdout = std::io::stdout();
    let mut next_context = None;
    runner.generate(
        &GenerationRequest::new(context, prompt),
        cancel,
        |response| {
            if response.done {
                log::info!(
                    "prompt: {} tokens in {:?}, generation: {} tokens in {:?}",
                    response.prompt_eval_count,
                    response.prompt_eval_duration,
                    response.eval_count,
                    response.eval_duration
                );
                next_context = response.context;
            } else {
                let _ = write!(stdout, "{}", response.response);
                let _ = stdout.flush();
            }
        },
    )?;
    println!();

    if let (Some(path), Some(context)) = (context_file, next_context) {
        fs::write(path, serde_json::to_string(&context)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_flags_are_accepted_after_the_subcommand() {
        let args = CliArgs::try_parse_from([
            "llm-runner",
            "generate",
            "--prompt",
            "Hello",
            "--model",
            "model.bin",
            "--runner-dir",
            "runners",
            "--lora",
            "adapter.bin",
            "--gpu",
            "--free-vram",
            "8192",
        ])
        .unwrap();

        assert_eq!(args.runner.model, Some(PathBuf::from("model.bin")));
        assert_eq!(args.runner.runner_dir, Some(PathBuf::from("runners")));
        assert_eq!(args.runner.lora, vec![PathBuf::from("adapter.bin")]);
        assert!(args.runner.gpu);
        assert_eq!(args.runner.free_vram, Some(8192));
        assert!(matches!(args.command, Commands::Generate { prompt, .. } if prompt == "Hello"));
    }

    #[test]
    fn runner_and_runner_dir_are_exclusive() {
        let err = CliArgs::try_parse_from([
            "llm-runner",
            "--runner",
            "server",
            "--runner-dir",
            "runners",
            "tokenize",
            "hi",
        ])
        .unwrap_err();

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn free_vram_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, r#"{"free_vram_mib": 2048, "max_attempts": 5}"#).unwrap();
        let config_arg = config_path.to_str().unwrap();

        let from_file =
            CliArgs::try_parse_from(["llm-runner", "--config", config_arg, "tokenize", "hi"])
                .unwrap();
        let config = supervisor_config(&from_file.runner).unwrap();
        assert_eq!(config.free_vram_mib, Some(2048));

        let overridden = CliArgs::try_parse_from([
            "llm-runner",
            "--config",
            config_arg,
            "--free-vram",
            "16384",
            "tokenize",
            "hi",
        ])
        .unwrap();
        let config = supervisor_config(&overridden.runner).unwrap();
        assert_eq!(config.free_vram_mib, Some(16384));
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn detokenize_takes_token_list() {
        let args = CliArgs::try_parse_from(["llm-runner", "detokenize", "15043", "3186"]).unwrap();
        assert!(matches!(args.command, Commands::Detokenize { tokens } if tokens == vec![15043, 3186]));
    }
}
