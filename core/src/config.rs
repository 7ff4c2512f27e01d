use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;
use toml::Value as TomlValue;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws/chat";

/// Substring of a `status` frame payload that means the stream is ready.
pub const DEFAULT_READY_STATUS_MARKER: &str = "ready";

/// `event` frame payload that ends the current stream.
pub const DEFAULT_END_OF_STREAM_EVENT: &str = "end_of_stream";

const DEFAULT_AUTH_READY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;

const CONFIG_TOML_FILE: &str = "config.toml";

/// Application configuration loaded from disk and merged with overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Websocket base URL; the chat id is appended as a path segment.
    pub server_url: String,

    /// REST base URL for the out-of-band cancel-generation call.
    pub api_base_url: Option<String>,

    /// Model used when `connect` is not given an explicit override.
    pub model_name: Option<String>,

    /// Per-call credential forwarded to the backend's model provider.
    pub api_key: Option<String>,

    pub ready_status_marker: String,

    pub end_of_stream_event: String,

    /// How long a connect attempt waits for an authenticated identity.
    pub auth_ready_timeout: Duration,

    /// Upper bound on the graceful websocket close handshake.
    pub close_timeout: Duration,

    /// Directory holding `config.toml`, `auth.json` and `log/`.
    pub parley_home: PathBuf,
}

/// Base config deserialized from `~/.parley/config.toml`.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ConfigToml {
    pub server_url: Option<String>,
    pub api_base_url: Option<String>,
    pub model_name: Option<String>,
    pub api_key: Option<String>,
    pub ready_status_marker: Option<String>,
    pub end_of_stream_event: Option<String>,
    pub auth_ready_timeout_secs: Option<u64>,
    pub close_timeout_ms: Option<u64>,
}

/// Optional overrides for user configuration (e.g., from CLI flags).
#[derive(Default, Debug, Clone)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub model_name: Option<String>,
    pub api_key: Option<String>,
}

impl Config {
    /// Load `config.toml` from the parley home, apply the `-c key=value`
    /// overrides, then the typed `overrides` (highest precedence).
    pub fn load_with_cli_overrides(
        cli_overrides: Vec<(String, TomlValue)>,
        overrides: ConfigOverrides,
    ) -> std::io::Result<Self> {
        let parley_home = find_parley_home()?;

        let mut root_value = load_config_as_toml(&parley_home)?;
        for (path, value) in cli_overrides.into_iter() {
            apply_toml_override(&mut root_value, &path, value);
        }

        let cfg: ConfigToml = root_value.try_into().map_err(|e| {
            tracing::error!("Failed to deserialize overridden config: {e}");
            std::io::Error::new(std::io::ErrorKind::InvalidData, e)
        })?;

        Self::load_from_base_config_with_overrides(cfg, overrides, parley_home)
    }

    pub fn load_from_base_config_with_overrides(
        cfg: ConfigToml,
        overrides: ConfigOverrides,
        parley_home: PathBuf,
    ) -> std::io::Result<Self> {
        let ConfigOverrides {
            server_url,
            model_name,
            api_key,
        } = overrides;

        let server_url = server_url
            .or(cfg.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        url::Url::parse(&server_url).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid server_url `{server_url}`: {e}"),
            )
        })?;

        let ready_status_marker = cfg
            .ready_status_marker
            .unwrap_or_else(|| DEFAULT_READY_STATUS_MARKER.to_string());
        if ready_status_marker.trim().is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "ready_status_marker must not be empty",
            ));
        }

        Ok(Self {
            server_url,
            api_base_url: cfg.api_base_url.filter(|url| !url.is_empty()),
            model_name: model_name.or(cfg.model_name),
            api_key: api_key.or(cfg.api_key),
            ready_status_marker,
            end_of_stream_event: cfg
                .end_of_stream_event
                .unwrap_or_else(|| DEFAULT_END_OF_STREAM_EVENT.to_string()),
            auth_ready_timeout: Duration::from_secs(
                cfg.auth_ready_timeout_secs
                    .unwrap_or(DEFAULT_AUTH_READY_TIMEOUT_SECS),
            ),
            close_timeout: Duration::from_millis(
                cfg.close_timeout_ms.unwrap_or(DEFAULT_CLOSE_TIMEOUT_MS),
            ),
            parley_home,
        })
    }
}

/// Read `config.toml` as a generic TOML table. A missing file yields an empty
/// table.
fn load_config_as_toml(parley_home: &Path) -> std::io::Result<TomlValue> {
    let config_path = parley_home.join(CONFIG_TOML_FILE);
    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<toml::Table>(&contents) {
            Ok(table) => Ok(TomlValue::Table(table)),
            Err(e) => {
                tracing::error!("Failed to parse config.toml: {e}");
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("config.toml not found, using defaults");
            Ok(TomlValue::Table(Default::default()))
        }
        Err(e) => {
            tracing::error!("Failed to read config.toml: {e}");
            Err(e)
        }
    }
}

/// Apply a single dotted-path override onto a TOML value, creating
/// intermediate tables as necessary.
fn apply_toml_override(root: &mut TomlValue, path: &str, value: TomlValue) {
    use toml::value::Table;

    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (idx, segment) in segments.iter().enumerate() {
        let is_last = idx == segments.len() - 1;

        if is_last {
            match current {
                TomlValue::Table(table) => {
                    table.insert(segment.to_string(), value);
                }
                _ => {
                    let mut table = Table::new();
                    table.insert(segment.to_string(), value);
                    *current = TomlValue::Table(table);
                }
            }
            return;
        }

        match current {
            TomlValue::Table(table) => {
                current = table
                    .entry(segment.to_string())
                    .or_insert_with(|| TomlValue::Table(Table::new()));
            }
            _ => {
                *current = TomlValue::Table(Table::new());
                if let TomlValue::Table(tbl) = current {
                    current = tbl
                        .entry(segment.to_string())
                        .or_insert_with(|| TomlValue::Table(Table::new()));
                }
            }
        }
    }
}

/// Returns the parley home directory: `$PARLEY_HOME` when set and non-empty,
/// otherwise `~/.parley`. Does not verify that the directory exists.
pub fn find_parley_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var("PARLEY_HOME") {
        if !val.is_empty() {
            return Ok(PathBuf::from(val));
        }
    }

    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".parley");
    Ok(p)
}

/// Returns the path to the folder where logs are stored. Does not verify that
/// the directory exists.
pub fn log_dir(cfg: &Config) -> PathBuf {
    cfg.parley_home.join("log")
}
