use std::sync::Arc;

use parley_login::AuthError;
use parley_login::AuthTokenProvider;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::types::CancelGenerationResponse;

const DEFAULT_USER_AGENT: &str = concat!("parley/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid api base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{method} {url} failed: {status}; body={body}")]
    Status {
        method: &'static str,
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode error for {url}: {source}; body={body}")]
    Decode {
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },
}

/// REST collaborator of the chat stream. Single attempt per call.
#[derive(Clone)]
pub struct BackendClient {
    base_url: Url,
    http: reqwest::Client,
    auth: Arc<dyn AuthTokenProvider>,
}

impl BackendClient {
    pub fn new(
        api_base_url: &str,
        auth: Arc<dyn AuthTokenProvider>,
    ) -> Result<Self, BackendError> {
        let trimmed = api_base_url.trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|e| BackendError::InvalidBaseUrl {
            url: api_base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidBaseUrl {
                url: api_base_url.to_string(),
                reason: "cannot be a base".to_string(),
            });
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            http,
            auth,
        })
    }

    /// `POST {base}/projects/{project_id}/chats/{chat_id}/cancel`
    pub async fn cancel_generation(
        &self,
        project_id: &str,
        chat_id: &str,
    ) -> Result<CancelGenerationResponse, BackendError> {
        let url = self.endpoint(&["projects", project_id, "chats", chat_id, "cancel"]);
        let headers = self.headers().await?;
        debug!("POST {url}");
        let req = self.http.post(url.clone()).headers(headers);
        let body = self.exec_request(req, "POST", url.as_str()).await?;
        decode_json(url.as_str(), &body)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn headers(&self) -> Result<HeaderMap, BackendError> {
        let token = self.auth.auth_token().await?;
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        if let Ok(hv) = HeaderValue::from_str(&format!("Bearer {token}")) {
            h.insert(AUTHORIZATION, hv);
        }
        Ok(h)
    }

    async fn exec_request(
        &self,
        req: reqwest::RequestBuilder,
        method: &'static str,
        url: &str,
    ) -> Result<String, BackendError> {
        let res = req.send().await?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(BackendError::Status {
                method,
                url: url.to_string(),
                status,
                body,
            });
        }
        Ok(body)
    }
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

fn decode_json<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, BackendError> {
    serde_json::from_str::<T>(body).map_err(|source| BackendError::Decode {
        url: url.to_string(),
        body: body.to_string(),
        source,
    })
}
