pub mod chat_cmd;
mod event_printer;
pub mod login;

use std::fs::OpenOptions;

use parley_common::CliConfigOverrides;
use parley_core::config::Config;
use parley_core::config::ConfigOverrides;
use parley_core::config::log_dir;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub use chat_cmd::ChatCli;
pub use chat_cmd::Color;

const DEFAULT_LOG_FILTER: &str = "parley_core=info,parley_cli=info";

/// Route `tracing` output to `$PARLEY_HOME/log/parley.log`. Keep the returned
/// guard alive for the lifetime of the process so buffered lines are flushed.
pub fn init_file_logging(config: &Config) -> std::io::Result<WorkerGuard> {
    let log_dir = log_dir(config);
    std::fs::create_dir_all(&log_dir)?;

    let mut log_file_opts = OpenOptions::new();
    log_file_opts.create(true).append(true);

    // The log may contain chat content; keep it private to the user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        log_file_opts.mode(0o600);
    }

    let log_file = log_file_opts.open(log_dir.join("parley.log"))?;
    let (non_blocking, guard) = non_blocking(log_file);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);

    let _ = tracing_subscriber::registry().with(file_layer).try_init();
    Ok(guard)
}

/// Parse `-c` overrides and load the config, or explain what went wrong.
pub fn load_config(
    cli_config_overrides: &CliConfigOverrides,
    overrides: ConfigOverrides,
) -> anyhow::Result<Config> {
    let cli_overrides = cli_config_overrides
        .parse_overrides()
        .map_err(|e| anyhow::anyhow!("Error parsing -c overrides: {e}"))?;
    Config::load_with_cli_overrides(cli_overrides, overrides)
        .map_err(|e| anyhow::anyhow!("Error loading configuration: {e}"))
}
