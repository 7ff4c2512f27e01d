use std::path::Path;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use parley_utils_readiness::Readiness;
use parley_utils_readiness::ReadinessFlag;
use parley_utils_readiness::Token;
use parley_utils_readiness::errors::ReadinessError;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth_store::AuthDotJson;
use crate::auth_store::get_auth_file;
use crate::auth_store::try_read_auth_json;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not signed in; run `parley login --token <token>` or set PARLEY_AUTH_TOKEN")]
    NotAuthenticated,

    #[error("timed out after {0:?} waiting for an authenticated identity")]
    ReadinessTimeout(Duration),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("failed to read auth.json: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of the bearer credential used to open chat streams and call the
/// REST backend.
#[async_trait::async_trait]
pub trait AuthTokenProvider: Send + Sync {
    /// Returns a fresh token, waiting for the identity to become available
    /// rather than retrying.
    async fn auth_token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParleyAuth {
    pub token: String,
    pub user_id: Option<String>,
}

/// Holds the current identity and gates access to it on a readiness flag.
#[derive(Debug)]
pub struct AuthManager {
    auth: RwLock<Option<ParleyAuth>>,
    readiness: ReadinessFlag,
    pending: Mutex<Option<Token>>,
    ready_timeout: Duration,
}

impl AuthManager {
    /// Resolve the identity from `auth.json`, falling back to the
    /// `PARLEY_AUTH_TOKEN` environment variable. The manager is ready when this
    /// returns, even if no identity was found.
    pub async fn load(parley_home: &Path, ready_timeout: Duration) -> Result<Self, AuthError> {
        let auth = load_auth(parley_home, true)?;
        let manager = Self::pending(ready_timeout).await?;
        manager.resolve(auth).await?;
        Ok(manager)
    }

    /// A manager whose identity is not known yet; callers of `auth_token`
    /// wait until [`AuthManager::set_auth`] or [`AuthManager::resolve`] runs.
    pub async fn pending(ready_timeout: Duration) -> Result<Self, AuthError> {
        let readiness = ReadinessFlag::new();
        let token = readiness.subscribe().await?;
        Ok(Self {
            auth: RwLock::new(None),
            readiness,
            pending: Mutex::new(Some(token)),
            ready_timeout,
        })
    }

    /// Ready immediately with a fixed token.
    pub async fn with_token(token: &str) -> Result<Self, AuthError> {
        let manager = Self::pending(Duration::from_secs(1)).await?;
        manager
            .set_auth(ParleyAuth {
                token: token.to_string(),
                user_id: None,
            })
            .await?;
        Ok(manager)
    }

    pub async fn set_auth(&self, auth: ParleyAuth) -> Result<(), AuthError> {
        self.resolve(Some(auth)).await
    }

    /// Record the outcome of identity resolution and release waiters.
    pub async fn resolve(&self, auth: Option<ParleyAuth>) -> Result<(), AuthError> {
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = auth;
        if let Some(token) = self.pending.lock().await.take() {
            self.readiness.mark_ready(token).await?;
        }
        Ok(())
    }

    pub fn user_id(&self) -> Option<String> {
        self.auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|auth| auth.user_id.clone())
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.is_ready()
    }
}

#[async_trait::async_trait]
impl AuthTokenProvider for AuthManager {
    async fn auth_token(&self) -> Result<String, AuthError> {
        if !self.readiness.is_ready() {
            debug!("waiting for identity before issuing a token");
            tokio::time::timeout(self.ready_timeout, self.readiness.wait_ready())
                .await
                .map_err(|_| AuthError::ReadinessTimeout(self.ready_timeout))?;
        }
        self.auth
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|auth| auth.token.clone())
            .ok_or(AuthError::NotAuthenticated)
    }
}

pub(crate) fn load_auth(
    parley_home: &Path,
    include_env_var: bool,
) -> Result<Option<ParleyAuth>, AuthError> {
    let auth_file = get_auth_file(parley_home);
    let auth_dot_json = match try_read_auth_json(&auth_file) {
        Ok(auth) => auth,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AuthDotJson::default(),
        // A malformed auth.json is surfaced rather than silently replaced by
        // the environment variable.
        Err(e) => return Err(AuthError::Io(e)),
    };

    if let Some(token) = auth_dot_json.token.filter(|t| !t.is_empty()) {
        return Ok(Some(ParleyAuth {
            token,
            user_id: auth_dot_json.user_id,
        }));
    }

    if include_env_var {
        if let Some(token) = read_token_from_env() {
            return Ok(Some(ParleyAuth {
                token,
                user_id: None,
            }));
        }
    }

    Ok(None)
}

fn read_token_from_env() -> Option<String> {
    std::env::var(crate::PARLEY_AUTH_TOKEN_ENV_VAR)
        .ok()
        .filter(|s| !s.is_empty())
}
