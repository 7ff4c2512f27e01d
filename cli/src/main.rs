use clap::Parser;
use parley_cli::ChatCli;
use parley_cli::chat_cmd::run_main;
use parley_cli::login::read_token_from_stdin;
use parley_cli::login::run_login_status;
use parley_cli::login::run_login_with_token;
use parley_cli::login::run_logout;
use parley_common::CliConfigOverrides;

/// Parley CLI
///
/// Attach to a chat stream from the terminal and manage the stored identity.
#[derive(Debug, Parser)]
#[clap(author, name = "parley", version, bin_name = "parley")]
struct MultitoolCli {
    #[clap(flatten)]
    pub config_overrides: CliConfigOverrides,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Attach to a chat and converse interactively.
    Chat(ChatCli),

    /// Manage login.
    Login(LoginCommand),

    /// Remove stored authentication credentials.
    Logout(LogoutCommand),
}

#[derive(Debug, Parser)]
struct LoginCommand {
    #[clap(skip)]
    config_overrides: CliConfigOverrides,

    /// Bearer token to store in auth.json.
    #[arg(long = "token", value_name = "TOKEN", conflicts_with = "with_token")]
    token: Option<String>,

    #[arg(
        long = "with-token",
        help = "Read the token from stdin (e.g. `printenv PARLEY_AUTH_TOKEN | parley login --with-token`)"
    )]
    with_token: bool,

    /// Identity the token belongs to.
    #[arg(long = "user-id", value_name = "USER_ID")]
    user_id: Option<String>,

    #[command(subcommand)]
    action: Option<LoginSubcommand>,
}

#[derive(Debug, clap::Subcommand)]
enum LoginSubcommand {
    /// Show login status.
    Status,
}

#[derive(Debug, Parser)]
struct LogoutCommand {
    #[clap(skip)]
    config_overrides: CliConfigOverrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = MultitoolCli::parse();

    match cli.subcommand {
        Subcommand::Chat(mut chat_cli) => {
            prepend_config_flags(&mut chat_cli.config_overrides, cli.config_overrides);
            run_main(chat_cli).await?;
        }
        Subcommand::Login(mut login_cli) => {
            prepend_config_flags(&mut login_cli.config_overrides, cli.config_overrides);
            match login_cli.action {
                Some(LoginSubcommand::Status) => {
                    run_login_status(login_cli.config_overrides).await;
                }
                None => {
                    let token = if let Some(token) = login_cli.token {
                        token
                    } else if login_cli.with_token {
                        read_token_from_stdin()
                    } else {
                        eprintln!(
                            "Provide a token with --token <TOKEN> or pipe one in with --with-token."
                        );
                        std::process::exit(1);
                    };
                    run_login_with_token(login_cli.config_overrides, token, login_cli.user_id);
                }
            }
        }
        Subcommand::Logout(mut logout_cli) => {
            prepend_config_flags(&mut logout_cli.config_overrides, cli.config_overrides);
            run_logout(logout_cli.config_overrides);
        }
    }

    Ok(())
}

/// Prepend root-level overrides so they have lower precedence than
/// CLI-specific ones specified after the subcommand (if any).
fn prepend_config_flags(
    subcommand_config_overrides: &mut CliConfigOverrides,
    cli_config_overrides: CliConfigOverrides,
) {
    subcommand_config_overrides
        .raw_overrides
        .splice(0..0, cli_config_overrides.raw_overrides);
}
