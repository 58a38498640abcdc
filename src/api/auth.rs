// src/api/auth.rs

use reqwest::Method;
use serde::Deserialize;

use super::{extract_detail, ApiClient, AuthState};
use crate::error::{ConsoleError, Result};
use crate::log_info;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl ApiClient {
    /// Exchange credentials for a bearer token and keep it in memory.
    ///
    /// Bad credentials also come back as 401 here, which must not trip the
    /// global logout hook, so this bypasses `execute`.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthState> {
        let response = self
            .request(Method::POST, "/token")
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ConsoleError::Api { status, detail: extract_detail(status, &body) });
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let state = AuthState {
            token: Some(token.access_token),
            role: token.role,
            username: Some(username.to_string()),
        };
        self.set_auth(state.clone());
        log_info!("Logged in as {}", username);
        Ok(state)
    }
}
