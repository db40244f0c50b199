use env_logger::{Builder, Env};

/// Logger writing to stderr, `info` unless `RUST_LOG` says otherwise.
pub fn init_logger() -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_target(false);
    builder
}
