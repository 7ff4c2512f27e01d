use std::io::IsTerminal;
use std::sync::Arc;

use clap::Parser;
use clap::ValueEnum;
use parley_backend_client::BackendClient;
use parley_common::CliConfigOverrides;
use parley_core::ChatSession;
use parley_core::ConfigOverrides;
use parley_core::WebSocketConnector;
use parley_login::AuthManager;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tracing::info;
use tracing::warn;

use crate::event_printer::EventPrinter;

#[derive(Debug, Parser)]
pub struct ChatCli {
    /// Project the chat belongs to.
    #[arg(long = "project", value_name = "PROJECT_ID")]
    pub project_id: String,

    /// Chat to attach to.
    #[arg(long = "chat", value_name = "CHAT_ID")]
    pub chat_id: String,

    /// Model the server should answer with.
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Per-call provider key forwarded to the server.
    #[arg(long = "api-key", value_name = "KEY")]
    pub api_key: Option<String>,

    /// Specifies color settings for use in the output.
    #[arg(long = "color", value_enum, default_value_t = Color::Auto)]
    pub color: Color,

    #[clap(skip)]
    pub config_overrides: CliConfigOverrides,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum Color {
    Always,
    Never,
    #[default]
    Auto,
}

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum ChatInput<'a> {
    Quit,
    Cancel,
    History,
    Reconnect,
    Help,
    Unknown(&'a str),
    Message(&'a str),
    Blank,
}

impl ChatInput<'_> {
    /// Whether handling this input attaches a fresh stream whose events need
    /// polling again. Other input leaves a closed stream closed.
    fn reattaches(&self) -> bool {
        matches!(self, ChatInput::Reconnect)
    }
}

fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Blank;
    }
    if !trimmed.starts_with('/') {
        return ChatInput::Message(line);
    }
    match trimmed {
        "/quit" | "/exit" => ChatInput::Quit,
        "/cancel" => ChatInput::Cancel,
        "/history" => ChatInput::History,
        "/reconnect" => ChatInput::Reconnect,
        "/help" => ChatInput::Help,
        other => ChatInput::Unknown(other),
    }
}

pub async fn run_main(cli: ChatCli) -> anyhow::Result<()> {
    let ChatCli {
        project_id,
        chat_id,
        model,
        api_key,
        color,
        config_overrides,
    } = cli;

    let config = crate::load_config(
        &config_overrides,
        ConfigOverrides {
            api_key,
            ..Default::default()
        },
    )?;
    let _log_guard = crate::init_file_logging(&config)?;

    let with_ansi = match color {
        Color::Always => true,
        Color::Never => false,
        Color::Auto => {
            std::io::stdout().is_terminal()
                && supports_color::on_cached(supports_color::Stream::Stdout).is_some()
        }
    };

    let auth = Arc::new(AuthManager::load(&config.parley_home, config.auth_ready_timeout).await?);
    let backend = match config.api_base_url.as_deref() {
        Some(url) => Some(BackendClient::new(url, auth.clone())?),
        None => None,
    };

    let mut session = ChatSession::new(&config, Arc::new(WebSocketConnector), auth);
    let mut printer = EventPrinter::new(std::io::stdout(), with_ansi);
    printer.banner(&project_id, &chat_id, &config.server_url);
    session.connect(&project_id, &chat_id, model.as_deref()).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Cleared once the current stream has closed and drained.
    let mut stream_live = true;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    session.disconnect().await;
                    break;
                };
                let input = parse_input(&line);
                let reattaches = input.reattaches();
                match input {
                    ChatInput::Quit => {
                        session.disconnect().await;
                        break;
                    }
                    ChatInput::Cancel => {
                        let sent = session.cancel_generation();
                        if let Some(backend) = &backend {
                            match backend.cancel_generation(&project_id, &chat_id).await {
                                Ok(response) => {
                                    info!("backend cancel: cancelled={}", response.cancelled);
                                }
                                Err(err) => {
                                    warn!("backend cancel failed: {err}");
                                    printer.note(&format!("cancel request failed: {err}"));
                                }
                            }
                        } else if !sent {
                            printer.note("not connected; nothing to cancel");
                        }
                    }
                    ChatInput::History => printer.print_history(session.timeline()),
                    ChatInput::Reconnect => {
                        session.disconnect().await;
                        session.connect(&project_id, &chat_id, model.as_deref()).await;
                    }
                    ChatInput::Help => printer.help(),
                    ChatInput::Unknown(command) => {
                        printer.note(&format!("unknown command {command}; try /help"));
                    }
                    ChatInput::Message(text) => {
                        if session.send_message(text).is_none() {
                            printer.note("not connected; message not sent");
                        }
                    }
                    ChatInput::Blank => {}
                }
                if reattaches {
                    stream_live = true;
                }
            }
            event = session.next_event(), if stream_live => match event {
                Some(event) => printer.process_event(&event, session.timeline()),
                None => {
                    stream_live = false;
                    printer.note("chat stream closed; /reconnect to try again or /quit to exit");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                session.disconnect().await;
                break;
            }
        }
    }

    // Drain what the disconnect produced.
    while let Some(event) = session.next_event().await {
        printer.process_event(&event, session.timeline());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slash_commands_are_recognized() {
        assert_eq!(parse_input("/quit"), ChatInput::Quit);
        assert_eq!(parse_input("  /cancel "), ChatInput::Cancel);
        assert_eq!(parse_input("/history"), ChatInput::History);
        assert_eq!(parse_input("/reconnect"), ChatInput::Reconnect);
        assert_eq!(parse_input("/help"), ChatInput::Help);
        assert_eq!(parse_input("/nope"), ChatInput::Unknown("/nope"));
    }

    #[test]
    fn only_reconnect_resumes_polling_a_closed_stream() {
        assert!(parse_input("/reconnect").reattaches());
        for line in ["hello", "/history", "/cancel", "/help", "/nope", ""] {
            assert!(!parse_input(line).reattaches(), "{line:?} should not reattach");
        }
    }

    #[test]
    fn other_lines_are_messages() {
        assert_eq!(parse_input("hello /quit"), ChatInput::Message("hello /quit"));
        assert_eq!(parse_input("   "), ChatInput::Blank);
    }
}
