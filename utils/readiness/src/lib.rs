//! Readiness flag with token-based authorization and async waiting.
//!
//! A component that will eventually make something available (an identity,
//! a credential) subscribes for a [`Token`] and marks the flag ready with it.
//! Consumers call [`Readiness::wait_ready`] instead of polling.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::watch;
use tokio::time;

/// Opaque subscription token returned by `subscribe()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(i32);

const LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

#[async_trait::async_trait]
pub trait Readiness: Send + Sync + 'static {
    /// Returns true if the flag is currently marked ready.
    fn is_ready(&self) -> bool;

    /// Subscribe to readiness and receive an authorization token.
    ///
    /// Fails once the flag is already ready.
    async fn subscribe(&self) -> Result<Token, errors::ReadinessError>;

    /// Mark the flag ready. Only a token handed out by `subscribe` is
    /// accepted; returns `Ok(false)` for unknown tokens or when already ready.
    async fn mark_ready(&self, token: Token) -> Result<bool, errors::ReadinessError>;

    /// Resolves once the flag is ready.
    async fn wait_ready(&self);
}

pub struct ReadinessFlag {
    ready: AtomicBool,
    next_id: AtomicI32,
    tokens: Mutex<HashSet<Token>>,
    tx: watch::Sender<bool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            ready: AtomicBool::new(false),
            next_id: AtomicI32::new(1),
            tokens: Mutex::new(HashSet::new()),
            tx,
        }
    }

    async fn with_tokens<R>(
        &self,
        f: impl FnOnce(&mut HashSet<Token>) -> R,
    ) -> Result<R, errors::ReadinessError> {
        let mut guard = time::timeout(LOCK_TIMEOUT, self.tokens.lock())
            .await
            .map_err(|_| errors::ReadinessError::TokenLockFailed)?;
        Ok(f(&mut guard))
    }
}

impl Default for ReadinessFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReadinessFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessFlag")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[async_trait::async_trait]
impl Readiness for ReadinessFlag {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn subscribe(&self) -> Result<Token, errors::ReadinessError> {
        if self.is_ready() {
            return Err(errors::ReadinessError::FlagAlreadyReady);
        }
        let token = Token(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.with_tokens(|tokens| {
            tokens.insert(token);
        })
        .await?;
        Ok(token)
    }

    async fn mark_ready(&self, token: Token) -> Result<bool, errors::ReadinessError> {
        if self.is_ready() {
            return Ok(false);
        }
        let known = self.with_tokens(|tokens| tokens.remove(&token)).await?;
        if !known {
            return Ok(false);
        }
        self.ready.store(true, Ordering::Release);
        self.with_tokens(HashSet::clear).await?;
        self.tx.send_replace(true);
        Ok(true)
    }

    async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error, PartialEq, Eq)]
    pub enum ReadinessError {
        #[error("failed to acquire readiness token lock")]
        TokenLockFailed,
        #[error("flag is already ready; subscribing is no longer possible")]
        FlagAlreadyReady,
    }
}
