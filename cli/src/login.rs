use std::io::IsTerminal;
use std::io::Read;

use parley_common::CliConfigOverrides;
use parley_core::config::Config;
use parley_core::config::ConfigOverrides;
use parley_login::AuthManager;
use parley_login::AuthTokenProvider;
use parley_login::PARLEY_AUTH_TOKEN_ENV_VAR;
use parley_login::login_with_token;
use parley_login::logout;

pub fn run_login_with_token(
    cli_config_overrides: CliConfigOverrides,
    token: String,
    user_id: Option<String>,
) -> ! {
    let config = load_config_or_exit(cli_config_overrides);

    match login_with_token(&config.parley_home, &token, user_id) {
        Ok(_) => {
            eprintln!("Successfully logged in");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error logging in: {e}");
            std::process::exit(1);
        }
    }
}

pub fn read_token_from_stdin() -> String {
    let mut stdin = std::io::stdin();

    if stdin.is_terminal() {
        eprintln!(
            "--with-token expects the token on stdin. Try piping it, e.g. `printenv PARLEY_AUTH_TOKEN | parley login --with-token`."
        );
        std::process::exit(1);
    }

    eprintln!("Reading token from stdin...");

    let mut buffer = String::new();
    if let Err(err) = stdin.read_to_string(&mut buffer) {
        eprintln!("Failed to read token from stdin: {err}");
        std::process::exit(1);
    }

    let token = buffer.trim().to_string();
    if token.is_empty() {
        eprintln!("No token provided via stdin.");
        std::process::exit(1);
    }

    token
}

pub async fn run_login_status(cli_config_overrides: CliConfigOverrides) -> ! {
    let config = load_config_or_exit(cli_config_overrides);

    let manager = match AuthManager::load(&config.parley_home, config.auth_ready_timeout).await {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("Error checking login status: {e}");
            std::process::exit(1);
        }
    };

    match manager.auth_token().await {
        Ok(token) => {
            match manager.user_id() {
                Some(user_id) => eprintln!(
                    "Logged in as {user_id} using a token - {}",
                    safe_format_key(&token)
                ),
                None => eprintln!("Logged in using a token - {}", safe_format_key(&token)),
            }
            if std::env::var(PARLEY_AUTH_TOKEN_ENV_VAR).is_ok_and(|env_token| env_token == token) {
                eprintln!("   Token loaded from the {PARLEY_AUTH_TOKEN_ENV_VAR} environment variable");
            }
            std::process::exit(0);
        }
        Err(parley_login::AuthError::NotAuthenticated) => {
            eprintln!("Not logged in");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Unexpected error retrieving token: {e}");
            std::process::exit(1);
        }
    }
}

pub fn run_logout(cli_config_overrides: CliConfigOverrides) -> ! {
    let config = load_config_or_exit(cli_config_overrides);

    match logout(&config.parley_home) {
        Ok(true) => {
            eprintln!("Successfully logged out");
            std::process::exit(0);
        }
        Ok(false) => {
            eprintln!("Not logged in");
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error logging out: {e}");
            std::process::exit(1);
        }
    }
}

fn load_config_or_exit(cli_config_overrides: CliConfigOverrides) -> Config {
    match crate::load_config(&cli_config_overrides, ConfigOverrides::default()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn safe_format_key(key: &str) -> String {
    if key.len() <= 13 || !key.is_ascii() {
        return "***".to_string();
    }
    let prefix = &key[..8];
    let suffix = &key[key.len() - 5..];
    format!("{prefix}***{suffix}")
}
