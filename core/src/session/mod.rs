//! Session state machine: one chat stream, one transport adapter, one
//! timeline.

mod state;

use std::collections::VecDeque;
use std::sync::Arc;

use parley_login::AuthTokenProvider;
use parley_protocol::ControlFrame;
use parley_protocol::Message;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::error::ParleyErr;
use crate::transport::ChatTransport;
use crate::transport::ConnectParams;
use crate::transport::Connector;
use crate::transport::NORMAL_CLOSURE;
use crate::transport::TransportEvent;
use crate::transport::TransportEventKind;

pub use state::ConnectionStatus;
pub use state::DeltaKind;
pub use state::SessionEvent;
pub use state::SessionPhase;
pub use state::SessionState;

/// Identity of one chat attachment. Connecting again with an equal key while
/// live is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatKey {
    pub project_id: String,
    pub chat_id: String,
    pub model: Option<String>,
}

pub struct ChatSession {
    config: Config,
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthTokenProvider>,
    state: SessionState,
    transport: Option<ChatTransport>,
    /// Events of the current transport only; replaced on every connect.
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pending: VecDeque<SessionEvent>,
    chat_key: Option<ChatKey>,
}

impl ChatSession {
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthTokenProvider>,
    ) -> Self {
        Self {
            state: SessionState::from_config(config),
            config: config.clone(),
            connector,
            auth,
            transport: None,
            events_rx: None,
            pending: VecDeque::new(),
            chat_key: None,
        }
    }

    /// Attach to a chat stream, replacing any previous attachment. The old
    /// adapter is fully closed before the new one is created.
    pub async fn connect(&mut self, project_id: &str, chat_id: &str, model: Option<&str>) {
        let key = ChatKey {
            project_id: project_id.to_string(),
            chat_id: chat_id.to_string(),
            model: model.map(str::to_string),
        };
        if self.chat_key.as_ref() == Some(&key)
            && matches!(
                self.state.status(),
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        {
            debug!("already attached to chat {chat_id}; ignoring connect");
            return;
        }

        self.events_rx = None;
        self.pending.clear();
        // A key is only held while a transport for it exists.
        self.chat_key = None;
        self.state.reset_for_connect();
        if let Some(mut previous) = self.transport.take() {
            previous.shutdown().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut transport = ChatTransport::new(
            Arc::clone(&self.connector),
            Arc::clone(&self.auth),
            self.config.server_url.clone(),
            self.config.close_timeout,
        );
        for kind in TransportEventKind::ALL {
            let tx = tx.clone();
            transport.on(
                kind,
                Box::new(move |event| {
                    // The receiver is gone once this adapter was replaced.
                    let _ = tx.send(event.clone());
                    Ok(())
                }),
            );
        }

        info!("connecting to chat {chat_id} in project {project_id}");
        transport.connect(ConnectParams {
            chat_id: chat_id.to_string(),
            model_name: key.model.clone().or_else(|| self.config.model_name.clone()),
            api_key: self.config.api_key.clone(),
        });

        self.transport = Some(transport);
        self.events_rx = Some(rx);
        self.chat_key = Some(key);
    }

    /// Show `text` immediately and forward it to the server. Returns the
    /// optimistic message id, or `None` when nothing was sent.
    pub fn send_message(&mut self, text: &str) -> Option<String> {
        let id = self.state.begin_send(text)?;
        self.pending
            .push_back(SessionEvent::MessageUpserted { id: id.clone() });

        let sent = match &self.transport {
            Some(transport) => transport.send(text),
            None => Err(ParleyErr::NotOpen),
        };
        if let Err(err) = sent {
            // The placeholder stays; a later full_history reconciles it.
            warn!("failed to send message: {err}");
            let event = self.state.record_error(err);
            self.pending.push_back(event);
        }
        Some(id)
    }

    /// Ask the server to stop generating. The stream stays open. Returns
    /// whether the request went out.
    pub fn cancel_generation(&mut self) -> bool {
        if self.state.status() != ConnectionStatus::Connected {
            debug!("not connected; nothing to cancel");
            return false;
        }
        let sent = ControlFrame::Cancel
            .to_payload()
            .map_err(ParleyErr::from)
            .and_then(|payload| match &self.transport {
                Some(transport) => transport.send(payload),
                None => Err(ParleyErr::NotOpen),
            });
        match sent {
            Ok(()) => {
                info!("requested cancellation of the current reply");
                true
            }
            Err(err) => {
                warn!("failed to request cancellation: {err}");
                let event = self.state.record_error(err);
                self.pending.push_back(event);
                false
            }
        }
    }

    /// Close the stream. The timeline is kept until the next `connect`.
    pub async fn disconnect(&mut self) {
        self.events_rx = None;
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.chat_key = None;
        if self.state.status() != ConnectionStatus::Disconnected {
            self.state.mark_disconnected();
            self.pending.push_back(SessionEvent::Disconnected {
                code: NORMAL_CLOSURE,
                reason: String::new(),
            });
        }
    }

    /// Next notification, applying transport events as they arrive. Returns
    /// `None` once the current stream has closed and everything was drained.
    ///
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let rx = self.events_rx.as_mut()?;
            let Some(event) = rx.recv().await else {
                self.events_rx = None;
                continue;
            };
            let closed = matches!(event, TransportEvent::Close { .. });
            self.pending
                .extend(self.state.apply_transport_event(event));
            if closed {
                self.events_rx = None;
            }
        }
    }

    pub fn timeline(&self) -> &[Message] {
        self.state.timeline()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    pub fn current_error(&self) -> Option<&ParleyErr> {
        self.state.current_error()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn chat_key(&self) -> Option<&ChatKey> {
        self.chat_key.as_ref()
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("chat_key", &self.chat_key)
            .field("phase", &self.phase())
            .field("timeline_len", &self.timeline().len())
            .finish_non_exhaustive()
    }
}
