use std::io::Write;
use std::time::Instant;

use owo_colors::OwoColorize;
use owo_colors::Style;
use parley_common::elapsed::format_elapsed;
use parley_core::DeltaKind;
use parley_core::SessionEvent;
use parley_protocol::Message;
use parley_protocol::Role;

/// Renders session events as a line-oriented transcript.
pub(crate) struct EventPrinter<W: Write> {
    out: W,

    bold: Style,
    dimmed: Style,
    red: Style,
    green: Style,
    yellow: Style,
    magenta: Style,
    cyan: Style,

    stream_started: Option<Instant>,
    /// Kind of the last delta written; `None` right after the reply label.
    last_delta: Option<DeltaKind>,
    /// Content of the last reply printed live, so its server echo is not
    /// printed a second time.
    last_streamed: Option<String>,
}

impl<W: Write> EventPrinter<W> {
    pub(crate) fn new(out: W, with_ansi: bool) -> Self {
        if with_ansi {
            Self {
                out,
                bold: Style::new().bold(),
                dimmed: Style::new().dimmed(),
                red: Style::new().red(),
                green: Style::new().green(),
                yellow: Style::new().yellow(),
                magenta: Style::new().magenta(),
                cyan: Style::new().cyan(),
                stream_started: None,
                last_delta: None,
                last_streamed: None,
            }
        } else {
            Self {
                out,
                bold: Style::new(),
                dimmed: Style::new(),
                red: Style::new(),
                green: Style::new(),
                yellow: Style::new(),
                magenta: Style::new(),
                cyan: Style::new(),
                stream_started: None,
                last_delta: None,
                last_streamed: None,
            }
        }
    }

    pub(crate) fn banner(&mut self, project_id: &str, chat_id: &str, server_url: &str) {
        let _ = writeln!(
            self.out,
            "{} chat {} in project {} via {}",
            "parley".style(self.bold),
            chat_id.style(self.bold),
            project_id,
            server_url.style(self.dimmed),
        );
        let _ = writeln!(
            self.out,
            "{}",
            "type a message, or /help for commands".style(self.dimmed)
        );
    }

    pub(crate) fn note(&mut self, text: &str) {
        self.end_open_line();
        let _ = writeln!(self.out, "{}", text.style(self.dimmed));
    }

    pub(crate) fn help(&mut self) {
        for (command, what) in [
            ("/cancel", "stop the reply being generated"),
            ("/history", "print the conversation so far"),
            ("/reconnect", "reattach to the chat stream"),
            ("/quit", "disconnect and exit"),
        ] {
            let _ = writeln!(self.out, "  {:<12}{}", command.style(self.bold), what);
        }
    }

    pub(crate) fn print_history(&mut self, timeline: &[Message]) {
        self.end_open_line();
        let _ = writeln!(
            self.out,
            "{}",
            format!("history ({} messages)", timeline.len()).style(self.dimmed)
        );
        for message in timeline {
            self.print_message(message);
        }
    }

    pub(crate) fn process_event(&mut self, event: &SessionEvent, timeline: &[Message]) {
        match event {
            SessionEvent::Connected => {
                self.end_open_line();
                let _ = writeln!(self.out, "{}", "connected".style(self.green));
            }
            SessionEvent::StatusMessage(text) => {
                self.note(&format!("status: {text}"));
            }
            SessionEvent::TimelineReplaced { .. } => {
                self.print_history(timeline);
            }
            SessionEvent::MessageUpserted { id } => {
                let Some(message) = timeline.iter().find(|m| &m.id == id) else {
                    return;
                };
                // Local input is already on screen.
                if message.role == Role::User {
                    return;
                }
                if self.last_streamed.as_deref() == Some(message.content.as_str()) {
                    self.last_streamed = None;
                    return;
                }
                self.end_open_line();
                self.print_message(message);
            }
            SessionEvent::StreamStarted { .. } => {
                self.end_open_line();
                self.stream_started = Some(Instant::now());
                self.last_delta = None;
                let _ = write!(self.out, "{} ", "assistant>".style(self.bold));
                let _ = self.out.flush();
            }
            SessionEvent::StreamDelta { kind, delta, .. } => {
                self.print_delta(*kind, delta);
            }
            SessionEvent::StreamEnded { message_id } => {
                let _ = writeln!(self.out);
                if let Some(started) = self.stream_started.take() {
                    let _ = writeln!(
                        self.out,
                        "{}",
                        format!("(reply finished in {})", format_elapsed(started))
                            .style(self.dimmed)
                    );
                }
                self.last_delta = None;
                self.last_streamed = timeline
                    .iter()
                    .find(|m| &m.id == message_id)
                    .map(|m| m.content.clone());
            }
            SessionEvent::ServerEvent(name) => {
                self.note(&format!("event: {name}"));
            }
            SessionEvent::Warning(text) => {
                self.end_open_line();
                let _ = writeln!(self.out, "{} {text}", "warning:".style(self.yellow));
            }
            SessionEvent::Error(err) => {
                self.end_open_line();
                let _ = writeln!(self.out, "{} {err}", "error:".style(self.red));
            }
            SessionEvent::Disconnected { code, reason } => {
                self.end_open_line();
                let text = if reason.is_empty() {
                    format!("disconnected (code {code})")
                } else {
                    format!("disconnected (code {code}): {reason}")
                };
                let _ = writeln!(self.out, "{}", text.style(self.dimmed));
            }
        }
    }

    fn print_delta(&mut self, kind: DeltaKind, delta: &str) {
        if self.last_delta != Some(kind) {
            let label = match kind {
                DeltaKind::Content => None,
                DeltaKind::ToolCode => Some("[tool code]".style(self.magenta).to_string()),
                DeltaKind::ToolOutput => Some("[tool output]".style(self.cyan).to_string()),
            };
            // Content directly after the reply label stays on its line.
            if self.last_delta.is_some() || label.is_some() {
                let _ = writeln!(self.out);
            }
            if let Some(label) = label {
                let _ = writeln!(self.out, "{label}");
            }
            self.last_delta = Some(kind);
        }
        let _ = match kind {
            DeltaKind::Content => write!(self.out, "{delta}"),
            DeltaKind::ToolCode => write!(self.out, "{}", delta.style(self.magenta)),
            DeltaKind::ToolOutput => write!(self.out, "{}", delta.style(self.dimmed)),
        };
        let _ = self.out.flush();
    }

    fn print_message(&mut self, message: &Message) {
        let label = match message.role {
            Role::User => "you>".style(self.cyan).to_string(),
            Role::Assistant => "assistant>".style(self.bold).to_string(),
            Role::System => "system>".style(self.yellow).to_string(),
        };
        let _ = writeln!(self.out, "{label} {}", message.content);
        if let Some(code) = message.tool_code.as_deref().filter(|c| !c.is_empty()) {
            let _ = writeln!(
                self.out,
                "{}\n{}",
                "[tool code]".style(self.magenta),
                code.style(self.magenta)
            );
        }
        if let Some(output) = message.tool_output.as_deref().filter(|o| !o.is_empty()) {
            let _ = writeln!(
                self.out,
                "{}\n{}",
                "[tool output]".style(self.cyan),
                output.style(self.dimmed)
            );
        }
    }

    /// Terminate a reply that is still being streamed before printing
    /// anything else.
    fn end_open_line(&mut self) {
        if self.stream_started.is_some() {
            let _ = writeln!(self.out);
            self.stream_started = None;
            self.last_delta = None;
        }
    }
}
