//! HTTP client for the Taskboard REST API.
//!
//! [`HttpTaskStore`] is the production [`TaskStore`]: every call is one
//! request against the server's `/api` routes, authenticated with the bearer
//! token obtained from [`HttpTaskStore::login`] or [`HttpTaskStore::register`].

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use taskboard_proto::api::{
    AuthResponse, DeleteResponse, ErrorBody, LoginRequest, RegisterRequest, TaskEnvelope,
};
use taskboard_proto::task::{Task, TaskDraft, TaskId, TaskPatch};
use url::Url;

use crate::mutation::TaskStore;

/// Errors from talking to the REST API.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The configured server URL is not usable as a base.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    /// A task route was called before a token was set.
    #[error("not logged in")]
    NotLoggedIn,
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with an error status.
    #[error("{status}: {message} ({code})")]
    Api {
        /// HTTP status.
        status: StatusCode,
        /// Machine-readable error code from the body.
        code: String,
        /// Human-readable message from the body.
        message: String,
    },
    /// The server reported a delete that did not happen.
    #[error("server did not confirm the delete")]
    DeleteNotConfirmed,
}

impl RemoteError {
    /// HTTP status of an [`RemoteError::Api`] error.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
}

/// REST-backed task store for one authenticated user.
#[derive(Debug, Clone)]
pub struct HttpTaskStore {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpTaskStore {
    /// Creates a store talking to `server_url` (e.g. `http://127.0.0.1:3000`).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidUrl`] if the URL cannot be parsed or
    /// cannot carry a path.
    pub fn new(server_url: &str) -> Result<Self, RemoteError> {
        let base = Url::parse(server_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(server_url.to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            token: None,
        })
    }

    /// Sets the bearer token used for task routes.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Id of the user the bearer token was issued to.
    ///
    /// Read from the `sub` claim without checking the signature; the server
    /// verifies the token on every request.
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        let token = self.token.as_deref()?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        match jsonwebtoken::decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation) {
            Ok(data) => Some(data.claims.sub),
            Err(e) => {
                tracing::debug!(error = %e, "bearer token carries no readable subject");
                None
            }
        }
    }

    /// Registers a new account and stores the returned token.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Api`] with status 400 if the input is invalid
    /// or the email is taken.
    pub async fn register(&mut self, req: &RegisterRequest) -> Result<AuthResponse, RemoteError> {
        let resp: AuthResponse = self
            .send_json(self.request(Method::POST, &["api", "auth", "register"])?.json(req))
            .await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    /// Logs in and stores the returned token.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Api`] with status 401 on bad credentials.
    pub async fn login(&mut self, req: &LoginRequest) -> Result<AuthResponse, RemoteError> {
        let resp: AuthResponse = self
            .send_json(self.request(Method::POST, &["api", "auth", "login"])?.json(req))
            .await?;
        self.token = Some(resp.token.clone());
        Ok(resp)
    }

    /// Fetches one task.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Api`] with 404/403 for unknown or foreign tasks.
    pub async fn get(&self, id: &TaskId) -> Result<Task, RemoteError> {
        let envelope: TaskEnvelope = self
            .send_json(self.authed(Method::GET, &["api", "tasks", id.as_str()])?)
            .await?;
        Ok(envelope.task)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, RemoteError> {
        Ok(self.client.request(method, self.endpoint(segments)?))
    }

    fn authed(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, RemoteError> {
        let token = self.token.as_deref().ok_or(RemoteError::NotLoggedIn)?;
        Ok(self.request(method, segments)?.bearer_auth(token))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let resp = check(req.send().await?).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn send_body<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        body: &B,
    ) -> Result<T, RemoteError> {
        self.send_json(req.json(body)).await
    }
}

/// Maps a non-2xx response to [`RemoteError::Api`].
async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (format!("HTTP_{}", status.as_u16()), text),
    };
    tracing::debug!(status = %status, code = %code, "request rejected");
    Err(RemoteError::Api {
        status,
        code,
        message,
    })
}

impl TaskStore for HttpTaskStore {
    async fn create(&self, draft: &TaskDraft) -> Result<Task, RemoteError> {
        self.send_body(self.authed(Method::POST, &["api", "tasks"])?, draft)
            .await
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, RemoteError> {
        let envelope: TaskEnvelope = self
            .send_body(
                self.authed(Method::PUT, &["api", "tasks", id.as_str()])?,
                patch,
            )
            .await?;
        Ok(envelope.task)
    }

    async fn delete(&self, id: &TaskId) -> Result<(), RemoteError> {
        let resp: DeleteResponse = self
            .send_json(self.authed(Method::DELETE, &["api", "tasks", id.as_str()])?)
            .await?;
        if resp.success {
            Ok(())
        } else {
            Err(RemoteError::DeleteNotConfirmed)
        }
    }

    async fn list(&self) -> Result<Vec<Task>, RemoteError> {
        self.send_json(self.authed(Method::GET, &["api", "tasks"])?)
            .await
    }
}
