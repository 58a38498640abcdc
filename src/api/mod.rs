// src/api/mod.rs
//! API gateway: every outbound HTTP call goes through [`ApiClient`], which
//! injects the bearer token and turns a 401 into a global logout.

pub mod admin;
pub mod auth;
pub mod conversations;
pub mod sops;
pub mod sources;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{ConsoleError, Result};
use crate::{log_debug, log_warn};

/// Who is logged in. Lives only in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub token: Option<String>,
    pub role: Option<String>,
    pub username: Option<String>,
}

impl AuthState {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    auth: Arc<RwLock<AuthState>>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ApiClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        // No client-wide timeout: it would also cut long-lived SSE bodies.
        let http = reqwest::Client::builder().build()?;
        let auth = AuthState {
            token: config.token.clone(),
            ..AuthState::default()
        };

        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http,
            request_timeout: config.request_timeout(),
            auth: Arc::new(RwLock::new(auth)),
            on_unauthorized: None,
        })
    }

    /// Register the callback fired whenever any call comes back 401.
    pub fn with_unauthorized_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn auth(&self) -> AuthState {
        self.auth.read().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth().token.is_some()
    }

    pub(crate) fn set_auth(&self, state: AuthState) {
        if let Ok(mut auth) = self.auth.write() {
            *auth = state;
        }
    }

    pub fn logout(&self) {
        self.set_auth(AuthState::default());
    }

    fn token(&self) -> Option<String> {
        self.auth.read().ok().and_then(|a| a.token.clone())
    }

    /// A REST request with auth and the per-request timeout applied.
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.raw_request(method, path).timeout(self.request_timeout)
    }

    /// Same as `request` but without a timeout, for event streams.
    pub(crate) fn stream_request(&self, path: &str) -> RequestBuilder {
        self.raw_request(Method::GET, path)
            .header(reqwest::header::ACCEPT, "text/event-stream")
    }

    fn raw_request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and check the status. 401 logs out and fires the hook before
    /// anything else sees the error.
    pub(crate) async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_failure(status, &body);
        if matches!(error, ConsoleError::Unauthorized) {
            log_warn!("Backend answered 401, dropping credentials");
            self.logout();
            if let Some(hook) = &self.on_unauthorized {
                hook();
            }
        }
        Err(error)
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.execute(builder).await?;
        let body = response.text().await?;
        log_debug!("response body: {} bytes", body.len());
        decode_body(&body)
    }

    pub(crate) async fn send_unit(&self, builder: RequestBuilder) -> Result<()> {
        self.execute(builder).await.map(|_| ())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(self.request(Method::GET, path)).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> Result<T> {
        self.send_json(self.request(Method::POST, path).json(body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &impl serde::Serialize) -> Result<T> {
        self.send_json(self.request(Method::PUT, path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send_unit(self.request(Method::DELETE, path)).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

/// Empty bodies decode as JSON `null` so unit-like endpoints still work
/// with `Value` or `Option<T>` targets.
fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_str(body)?)
}

/// Map a non-success status to an error, preferring the backend's
/// `detail` message.
pub fn classify_failure(status: u16, body: &str) -> ConsoleError {
    if status == 401 {
        return ConsoleError::Unauthorized;
    }
    ConsoleError::Api { status, detail: extract_detail(status, body) }
}

pub fn extract_detail(status: u16, body: &str) -> String {
    let fallback = || format!("request failed with status {}", status);
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => fallback(),
        },
        _ if !body.trim().is_empty() && body.len() <= 200 => body.trim().to_string(),
        _ => fallback(),
    }
}
