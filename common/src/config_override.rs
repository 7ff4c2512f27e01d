//! `-c key=value` overrides shared by the parley binaries.
//!
//! [`CliConfigOverrides`] is embedded into a `clap`-derived CLI struct with
//! `#[clap(flatten)]`. Each occurrence of `-c key=value` (or
//! `--config key=value`) is collected as a raw string and parsed into a TOML
//! value only when the config is loaded.

use clap::ArgAction;
use clap::Parser;
use toml::Value;

#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a value from `~/.parley/config.toml`. Use a dotted path
    /// (`foo.bar`) for nested values. The value is parsed as TOML; if that
    /// fails it is used as a literal string.
    ///
    /// Examples:
    ///   - `-c model_name="gpt-4o"`
    ///   - `-c server_url=wss://chat.example.com/ws/chat`
    ///   - `-c close_timeout_ms=500`
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    /// Parse the raw strings into `(dotted.path, value)` pairs.
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, String> {
        self.raw_overrides
            .iter()
            .map(|s| {
                // Split on the first '=' only; values may contain it.
                let (key, value_str) = s
                    .split_once('=')
                    .ok_or_else(|| format!("Invalid override (missing '='): {s}"))?;
                let key = key.trim();
                let value_str = value_str.trim();

                if key.is_empty() {
                    return Err(format!("Empty key in override: {s}"));
                }

                // `-c model_name=gpt-4o` works without quotes.
                let value = parse_toml_value(value_str)
                    .unwrap_or_else(|| Value::String(value_str.to_string()));

                Ok((key.to_string(), value))
            })
            .collect()
    }
}

fn parse_toml_value(raw: &str) -> Option<Value> {
    let wrapped = format!("_x_ = {raw}");
    let mut table: toml::Table = toml::from_str(&wrapped).ok()?;
    table.remove("_x_")
}
