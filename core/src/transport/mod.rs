//! Transport adapter: one duplex socket per instance, raw frames in and out,
//! no interpretation of what the frames mean.

mod listeners;
mod socket;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use parley_login::AuthTokenProvider;
use parley_protocol::OutboundPayload;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::ParleyErr;
use crate::error::Result;

pub use listeners::EventListeners;
pub use listeners::Listener;
pub use listeners::TransportEvent;
pub use listeners::TransportEventKind;
pub use socket::ABNORMAL_CLOSURE;
pub use socket::Connector;
pub use socket::DuplexSocket;
pub use socket::NORMAL_CLOSURE;
pub use socket::NO_STATUS_RECEIVED;
pub use socket::WebSocketConnector;
pub use socket::WireFrame;

/// Per-connection parameters embedded in the connect URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectParams {
    pub chat_id: String,
    pub model_name: Option<String>,
    /// Per-call credential override forwarded to the backend.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// `connect` has not been called yet.
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// `{server_url}/{chat_id}?token=..&model_name=..&api_key=..`
pub fn build_connect_url(server_url: &str, params: &ConnectParams, token: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)?;
    if params.chat_id.is_empty() {
        return Err(ParleyErr::InvalidEndpoint("chat id is empty".to_string()));
    }
    url.path_segments_mut()
        .map_err(|()| ParleyErr::InvalidEndpoint(format!("{server_url} cannot be a base")))?
        .pop_if_empty()
        .push(&params.chat_id);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("token", token);
        if let Some(model_name) = params.model_name.as_deref().filter(|m| !m.is_empty()) {
            query.append_pair("model_name", model_name);
        }
        if let Some(api_key) = params.api_key.as_deref().filter(|k| !k.is_empty()) {
            query.append_pair("api_key", api_key);
        }
    }
    Ok(url)
}

/// One chat stream adapter. At most one physical socket is ever open per
/// instance; the socket is driven by a single background task.
pub struct ChatTransport {
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthTokenProvider>,
    server_url: String,
    close_timeout: Duration,
    listeners: Arc<Mutex<EventListeners>>,
    ready_state: Arc<Mutex<ReadyState>>,
    outbound_tx: Option<mpsc::UnboundedSender<String>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChatTransport {
    pub fn new(
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthTokenProvider>,
        server_url: impl Into<String>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            auth,
            server_url: server_url.into(),
            close_timeout,
            listeners: Arc::new(Mutex::new(EventListeners::default())),
            ready_state: Arc::new(Mutex::new(ReadyState::Idle)),
            outbound_tx: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn on(&self, kind: TransportEventKind, listener: Listener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on(kind, listener);
    }

    pub fn ready_state(&self) -> ReadyState {
        *self
            .ready_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start connecting in the background. Failures are reported through
    /// `error`/`close` events, never returned.
    pub fn connect(&mut self, params: ConnectParams) {
        match self.ready_state() {
            ReadyState::Connecting | ReadyState::Open | ReadyState::Closing => {
                warn!(
                    "chat transport already active ({:?}); ignoring connect for chat {}",
                    self.ready_state(),
                    params.chat_id
                );
                return;
            }
            ReadyState::Idle | ReadyState::Closed => {}
        }

        set_state(&self.ready_state, ReadyState::Connecting);
        self.cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound_tx = Some(outbound_tx);

        let io = IoTask {
            connector: Arc::clone(&self.connector),
            auth: Arc::clone(&self.auth),
            server_url: self.server_url.clone(),
            close_timeout: self.close_timeout,
            listeners: Arc::clone(&self.listeners),
            ready_state: Arc::clone(&self.ready_state),
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(io.run(params, outbound_rx)));
    }

    /// Queue one frame for the socket. Fails with [`ParleyErr::NotOpen`] unless
    /// the socket is open; the payload is dropped, not buffered.
    pub fn send(&self, payload: impl Into<OutboundPayload>) -> Result<()> {
        let result = self.try_send(payload.into());
        if let Err(err) = &result {
            emit(&self.listeners, &TransportEvent::Error(err.clone()));
        }
        result
    }

    fn try_send(&self, payload: OutboundPayload) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(ParleyErr::NotOpen);
        }
        let frame = payload.into_frame()?;
        let tx = self.outbound_tx.as_ref().ok_or(ParleyErr::NotOpen)?;
        tx.send(frame).map_err(|_| ParleyErr::NotOpen)
    }

    /// Request a graceful shutdown. Safe to call any number of times.
    pub fn close(&mut self) {
        if matches!(self.ready_state(), ReadyState::Idle | ReadyState::Closed) {
            return;
        }
        debug!("closing chat transport");
        self.outbound_tx = None;
        self.cancel.cancel();
    }

    /// Close and wait for the I/O task, so the socket is gone on return.
    pub async fn shutdown(&mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("chat transport task failed: {err}");
            }
        }
    }
}

impl Drop for ChatTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ChatTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatTransport")
            .field("server_url", &self.server_url)
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

fn set_state(ready_state: &Mutex<ReadyState>, next: ReadyState) {
    *ready_state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Deliver `event` without holding the registry lock, so listeners can call
/// back into the transport.
fn emit(listeners: &Mutex<EventListeners>, event: &TransportEvent) {
    let kind = event.kind();
    let mut taken = listeners
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take(kind);
    self::listeners::notify(&mut taken, event);
    listeners
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .restore(kind, taken);
}

struct IoTask {
    connector: Arc<dyn Connector>,
    auth: Arc<dyn AuthTokenProvider>,
    server_url: String,
    close_timeout: Duration,
    listeners: Arc<Mutex<EventListeners>>,
    ready_state: Arc<Mutex<ReadyState>>,
    cancel: CancellationToken,
}

impl IoTask {
    async fn run(self, params: ConnectParams, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
        let token = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish(NORMAL_CLOSURE, String::new());
                return;
            }
            token = self.auth.auth_token() => token,
        };
        let token = match token {
            Ok(token) => token,
            Err(err) => {
                warn!("no credential for chat {}: {err}", params.chat_id);
                self.fail(ParleyErr::MissingCredential(err.to_string()));
                return;
            }
        };

        let url = match build_connect_url(&self.server_url, &params, &token) {
            Ok(url) => url,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        info!(
            "opening chat stream for chat {} (model: {})",
            params.chat_id,
            params.model_name.as_deref().unwrap_or("default")
        );
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish(NORMAL_CLOSURE, String::new());
                return;
            }
            opened = self.connector.open(&url) => opened,
        };
        let mut socket = match opened {
            Ok(socket) => socket,
            Err(err) => {
                warn!("failed to open chat stream: {err}");
                self.fail(err);
                return;
            }
        };

        set_state(&self.ready_state, ReadyState::Open);
        emit(&self.listeners, &TransportEvent::Open);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    set_state(&self.ready_state, ReadyState::Closing);
                    match tokio::time::timeout(
                        self.close_timeout,
                        socket.close(NORMAL_CLOSURE, "client closed"),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => debug!("close handshake failed: {err}"),
                        Err(_) => debug!("close handshake timed out after {:?}", self.close_timeout),
                    }
                    self.finish(NORMAL_CLOSURE, String::new());
                    return;
                }

                Some(frame) = outbound_rx.recv() => {
                    if let Err(err) = socket.send_text(frame).await {
                        warn!("failed to send frame: {err}");
                        emit(&self.listeners, &TransportEvent::Error(err));
                    }
                }

                frame = socket.next_frame() => match frame {
                    Some(Ok(WireFrame::Text(text))) => {
                        emit(&self.listeners, &TransportEvent::Message(text));
                    }
                    Some(Ok(WireFrame::Close { code, reason })) => {
                        debug!("chat stream closed by peer: {code} {reason}");
                        self.finish(code, reason);
                        return;
                    }
                    Some(Err(err)) => {
                        warn!("chat stream failed: {err}");
                        emit(&self.listeners, &TransportEvent::Error(err));
                        self.finish(ABNORMAL_CLOSURE, String::new());
                        return;
                    }
                    None => {
                        self.finish(ABNORMAL_CLOSURE, String::new());
                        return;
                    }
                },
            }
        }
    }

    /// Error before a socket existed.
    fn fail(&self, err: ParleyErr) {
        emit(&self.listeners, &TransportEvent::Error(err));
        self.finish(ABNORMAL_CLOSURE, String::new());
    }

    fn finish(&self, code: u16, reason: String) {
        set_state(&self.ready_state, ReadyState::Closed);
        emit(&self.listeners, &TransportEvent::Close { code, reason });
    }
}
