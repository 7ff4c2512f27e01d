use parley_protocol::FrameDecodeError;
use parley_protocol::InboundFrame;
use parley_protocol::Message;
use parley_protocol::Role;
use parley_protocol::decode_inbound;
use parley_protocol::message::new_optimistic_id;
use parley_protocol::message::new_streaming_id;
use parley_protocol::message::sort_by_timestamp;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::config::Config;
use crate::error::ParleyErr;
use crate::transport::NO_STATUS_RECEIVED;
use crate::transport::NORMAL_CLOSURE;
use crate::transport::TransportEvent;

const GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Connection status combined with whether a reply is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Error,
}

/// Which field of the streaming message a delta was appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Content,
    ToolCode,
    ToolOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The server reported the stream ready.
    Connected,
    /// A `status` frame that is not the ready signal.
    StatusMessage(String),
    TimelineReplaced {
        len: usize,
    },
    MessageUpserted {
        id: String,
    },
    StreamStarted {
        message_id: String,
    },
    StreamDelta {
        message_id: String,
        kind: DeltaKind,
        delta: String,
    },
    StreamEnded {
        message_id: String,
    },
    /// An `event` frame other than end-of-stream.
    ServerEvent(String),
    Warning(String),
    Error(ParleyErr),
    Disconnected {
        code: u16,
        reason: String,
    },
}

/// Everything the session knows about one chat stream. Synchronous and free of
/// I/O: each inbound event is applied in delivery order and returns the
/// notifications it produced.
#[derive(Debug, Clone)]
pub struct SessionState {
    timeline: Vec<Message>,
    status: ConnectionStatus,
    streaming_id: Option<String>,
    optimistic_id: Option<String>,
    current_error: Option<ParleyErr>,
    ready_marker: String,
    end_marker: String,
}

impl SessionState {
    pub fn new(ready_marker: &str, end_marker: &str) -> Self {
        Self {
            timeline: Vec::new(),
            status: ConnectionStatus::Disconnected,
            streaming_id: None,
            optimistic_id: None,
            current_error: None,
            ready_marker: ready_marker.to_lowercase(),
            end_marker: end_marker.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.ready_status_marker, &config.end_of_stream_event)
    }

    pub fn timeline(&self) -> &[Message] {
        &self.timeline
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn streaming_id(&self) -> Option<&str> {
        self.streaming_id.as_deref()
    }

    pub fn optimistic_id(&self) -> Option<&str> {
        self.optimistic_id.as_deref()
    }

    pub fn current_error(&self) -> Option<&ParleyErr> {
        self.current_error.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_id.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        match self.status {
            ConnectionStatus::Disconnected => SessionPhase::Disconnected,
            ConnectionStatus::Connecting => SessionPhase::Connecting,
            ConnectionStatus::Connected if self.is_streaming() => SessionPhase::Streaming,
            ConnectionStatus::Connected => SessionPhase::Connected,
            ConnectionStatus::Error => SessionPhase::Error,
        }
    }

    /// Forget the previous chat entirely and wait for the new one.
    pub fn reset_for_connect(&mut self) {
        self.timeline.clear();
        self.streaming_id = None;
        self.optimistic_id = None;
        self.current_error = None;
        self.status = ConnectionStatus::Connecting;
    }

    /// Local disconnect. The timeline stays.
    pub fn mark_disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.streaming_id = None;
    }

    /// Append an optimistic user message if sending is allowed. Returns its
    /// local id.
    pub fn begin_send(&mut self, text: &str) -> Option<String> {
        if self.status != ConnectionStatus::Connected {
            debug!("not connected ({:?}); dropping outgoing message", self.status);
            return None;
        }
        if text.trim().is_empty() {
            return None;
        }
        let id = new_optimistic_id();
        self.timeline
            .push(Message::optimistic_user(id.clone(), text));
        self.optimistic_id = Some(id.clone());
        Some(id)
    }

    /// Record a local error without changing the connection status.
    pub fn record_error(&mut self, err: ParleyErr) -> SessionEvent {
        self.current_error = Some(err.clone());
        SessionEvent::Error(err)
    }

    pub fn apply_transport_event(&mut self, event: TransportEvent) -> Vec<SessionEvent> {
        match event {
            TransportEvent::Open => {
                debug!("chat stream open; waiting for ready status");
                Vec::new()
            }
            TransportEvent::Message(text) => match decode_inbound(&text) {
                Ok(frame) => self.apply_frame(frame),
                Err(FrameDecodeError::UnknownType(kind)) => {
                    warn!("ignoring frame of unknown type `{kind}`");
                    Vec::new()
                }
                Err(err @ FrameDecodeError::Malformed(_)) => {
                    warn!("ignoring inbound frame: {err}");
                    Vec::new()
                }
            },
            // Send failures are reported to the caller of `send` directly.
            TransportEvent::Error(ParleyErr::NotOpen | ParleyErr::Encode(_)) => Vec::new(),
            TransportEvent::Error(err) => self.fail(err),
            TransportEvent::Close { code, reason } => self.apply_close(code, reason),
        }
    }

    pub fn apply_frame(&mut self, frame: InboundFrame) -> Vec<SessionEvent> {
        trace!("applying {} frame", frame.kind());
        match frame {
            InboundFrame::Status(text) => self.apply_status(text),
            InboundFrame::FullHistory(messages) => self.apply_full_history(messages),
            InboundFrame::Message(message) => self.apply_message(message),
            InboundFrame::Chunk(delta) => self.apply_delta(DeltaKind::Content, delta),
            InboundFrame::ToolCode(delta) => self.apply_delta(DeltaKind::ToolCode, delta),
            InboundFrame::ToolOutput(delta) => self.apply_delta(DeltaKind::ToolOutput, delta),
            InboundFrame::Event(name) if name.trim() == self.end_marker => {
                match self.streaming_id.take() {
                    Some(message_id) => vec![SessionEvent::StreamEnded { message_id }],
                    None => {
                        debug!("end of stream without an active stream");
                        Vec::new()
                    }
                }
            }
            InboundFrame::Event(name) => vec![SessionEvent::ServerEvent(name)],
            InboundFrame::Error(text) => self.fail(ParleyErr::Server(text)),
            InboundFrame::Warning(text) => {
                warn!("server warning: {text}");
                vec![SessionEvent::Warning(text)]
            }
        }
    }

    fn apply_status(&mut self, text: String) -> Vec<SessionEvent> {
        let is_ready = text.to_lowercase().contains(&self.ready_marker);
        if is_ready && self.status == ConnectionStatus::Connecting {
            self.status = ConnectionStatus::Connected;
            vec![SessionEvent::Connected]
        } else {
            vec![SessionEvent::StatusMessage(text)]
        }
    }

    fn apply_full_history(&mut self, mut messages: Vec<Message>) -> Vec<SessionEvent> {
        sort_by_timestamp(&mut messages);

        if let Some(streaming_id) = &self.streaming_id {
            if !messages.iter().any(|m| &m.id == streaming_id) {
                if let Some(local) = self.timeline.iter().find(|m| &m.id == streaming_id) {
                    messages.push(local.clone());
                }
            }
        }

        if let Some(optimistic_id) = &self.optimistic_id {
            if !messages.iter().any(|m| &m.id == optimistic_id) {
                self.optimistic_id = None;
            }
        }

        self.timeline = messages;
        vec![SessionEvent::TimelineReplaced {
            len: self.timeline.len(),
        }]
    }

    fn apply_message(&mut self, message: Message) -> Vec<SessionEvent> {
        let id = message.id.clone();
        let existing = self.position_of(&id);

        let placeholder = match (&message.role, self.optimistic_id.take()) {
            (Role::User, Some(optimistic_id)) => self.position_of(&optimistic_id),
            (_, pending) => {
                self.optimistic_id = pending;
                None
            }
        };

        match (placeholder, existing) {
            (Some(p), Some(e)) if p != e => {
                self.timeline.remove(p);
                let e = if e > p { e - 1 } else { e };
                self.timeline[e] = message;
            }
            (Some(idx), _) | (None, Some(idx)) => self.timeline[idx] = message,
            (None, None) => self.timeline.push(message),
        }

        vec![SessionEvent::MessageUpserted { id }]
    }

    fn apply_delta(&mut self, kind: DeltaKind, delta: String) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        let active = self
            .streaming_id
            .as_deref()
            .and_then(|id| self.timeline.iter().position(|m| m.id == id));
        let idx = match active {
            Some(idx) => idx,
            None => {
                let message_id = new_streaming_id();
                self.timeline
                    .push(Message::streaming_assistant(message_id.clone()));
                self.streaming_id = Some(message_id.clone());
                events.push(SessionEvent::StreamStarted { message_id });
                self.timeline.len() - 1
            }
        };

        let message = &mut self.timeline[idx];
        match kind {
            DeltaKind::Content => message.append_content(&delta),
            DeltaKind::ToolCode => message.append_tool_code(&delta),
            DeltaKind::ToolOutput => message.append_tool_output(&delta),
        }
        events.push(SessionEvent::StreamDelta {
            message_id: message.id.clone(),
            kind,
            delta,
        });
        events
    }

    fn apply_close(&mut self, code: u16, reason: String) -> Vec<SessionEvent> {
        self.streaming_id = None;
        let mut events = Vec::new();
        let normal = matches!(code, NORMAL_CLOSURE | GOING_AWAY | NO_STATUS_RECEIVED);
        match self.status {
            // Keep the earlier, more specific error.
            ConnectionStatus::Error => {}
            _ if normal => self.status = ConnectionStatus::Disconnected,
            _ => events.extend(self.fail(ParleyErr::AbnormalClose {
                code,
                reason: reason.clone(),
            })),
        }
        events.push(SessionEvent::Disconnected { code, reason });
        events
    }

    fn fail(&mut self, err: ParleyErr) -> Vec<SessionEvent> {
        warn!("chat session error: {err}");
        self.current_error = Some(err.clone());
        self.status = ConnectionStatus::Error;
        self.streaming_id = None;
        vec![SessionEvent::Error(err)]
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.timeline.iter().position(|m| m.id == id)
    }
}
