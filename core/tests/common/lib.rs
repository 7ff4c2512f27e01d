#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::ChatSession;
use parley_core::ParleyErr;
use parley_core::SessionEvent;
use parley_core::config::Config;
use parley_core::config::ConfigOverrides;
use parley_core::config::ConfigToml;
use parley_core::error::Result;
use parley_core::transport::Connector;
use parley_core::transport::DuplexSocket;
use parley_core::transport::WireFrame;
use parley_login::AuthManager;
use parley_login::AuthTokenProvider;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn load_default_config_for_test(parley_home: &TempDir) -> Config {
    Config::load_from_base_config_with_overrides(
        ConfigToml::default(),
        ConfigOverrides::default(),
        parley_home.path().to_path_buf(),
    )
    .expect("defaults for test should always succeed")
}

pub async fn test_auth() -> Arc<dyn AuthTokenProvider> {
    Arc::new(
        AuthManager::with_token("test-token")
            .await
            .expect("static token auth"),
    )
}

/// In-memory stand-in for the websocket server. Every `open` produces a
/// [`ServerHandle`] on the receiver returned by [`ScriptedConnector::new`].
pub struct ScriptedConnector {
    log: Arc<Mutex<Vec<String>>>,
    servers: mpsc::UnboundedSender<ServerHandle>,
    fail_next_open: Mutex<Option<ParleyErr>>,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerHandle>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            log: Arc::new(Mutex::new(Vec::new())),
            servers,
            fail_next_open: Mutex::new(None),
        });
        (connector, rx)
    }

    /// `open:<chat>` and `close:<chat>` entries in call order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }

    pub fn open_count(&self) -> usize {
        self.log()
            .iter()
            .filter(|entry| entry.starts_with("open:"))
            .count()
    }

    pub fn fail_next_open(&self, err: ParleyErr) {
        *self.fail_next_open.lock().expect("fail lock") = Some(err);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn DuplexSocket>> {
        let chat_id = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        self.log
            .lock()
            .expect("log lock")
            .push(format!("open:{chat_id}"));

        if let Some(err) = self.fail_next_open.lock().expect("fail lock").take() {
            return Err(err);
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.servers.send(ServerHandle {
            url: url.clone(),
            to_client,
            from_client,
        });
        Ok(Box::new(FakeSocket {
            chat_id,
            log: Arc::clone(&self.log),
            inbound,
            outbound,
        }))
    }
}

struct FakeSocket {
    chat_id: String,
    log: Arc<Mutex<Vec<String>>>,
    inbound: mpsc::UnboundedReceiver<WireFrame>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl DuplexSocket for FakeSocket {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| ParleyErr::Transport("server hung up".to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<WireFrame>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<()> {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("close:{}", self.chat_id));
        Ok(())
    }
}

/// Server side of one fake socket. Dropping it ends the client's stream
/// without a close frame.
pub struct ServerHandle {
    pub url: Url,
    to_client: mpsc::UnboundedSender<WireFrame>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerHandle {
    pub fn send_text(&self, text: &str) {
        self.to_client
            .send(WireFrame::Text(text.to_string()))
            .expect("client socket gone");
    }

    /// Like [`ServerHandle::send_text`], but reports whether the client socket
    /// still exists instead of panicking.
    pub fn try_send_text(&self, text: &str) -> bool {
        self.to_client
            .send(WireFrame::Text(text.to_string()))
            .is_ok()
    }

    pub fn send_json(&self, frame: Value) {
        self.send_text(&frame.to_string());
    }

    pub fn send_ready(&self) {
        self.send_json(serde_json::json!({"type": "status", "payload": "ready"}));
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.to_client
            .send(WireFrame::Close {
                code,
                reason: reason.to_string(),
            })
            .expect("client socket gone");
    }

    /// Next frame the client sent.
    pub async fn recv_text(&mut self) -> String {
        timeout(EVENT_TIMEOUT, self.from_client.recv())
            .await
            .expect("timeout waiting for client frame")
            .expect("client socket gone")
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

pub async fn next_server(servers: &mut mpsc::UnboundedReceiver<ServerHandle>) -> ServerHandle {
    timeout(EVENT_TIMEOUT, servers.recv())
        .await
        .expect("timeout waiting for the client to open a socket")
        .expect("connector dropped")
}

pub async fn wait_for_event<F>(session: &mut ChatSession, mut predicate: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let ev = timeout(EVENT_TIMEOUT, session.next_event())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended unexpectedly");
        if predicate(&ev) {
            return ev;
        }
    }
}
