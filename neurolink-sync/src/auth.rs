//! Session credentials and the sign-up / sign-in collaborator.
//!
//! The document client only consumes a [`Credential`]; obtaining one is the
//! job of an [`Authenticator`]. Tokens are never persisted and never refreshed
//! here. An expired token surfaces as a store error on the next request.

use std::fmt;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{error_chain, error_message};
use crate::config::AuthConfig;

pub const UNKNOWN_AUTH_ERROR: &str = "unknown auth error";

/// Bearer token plus the identity that owns it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user_id: String,
    pub id_token: String,
}

impl Credential {
    pub fn new(user_id: impl Into<String>, id_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            id_token: id_token.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("id_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The service answered and refused (bad password, email taken, ...).
    #[error("authentication rejected: {0}")]
    Rejected(String),
    #[error("network error during authentication: {0}")]
    Network(String),
}

/// Sign-up / sign-in collaborator.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Credential, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, AuthError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    id_token: String,
}

/// Identity Toolkit (email / password) REST client.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl IdentityToolkitClient {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::Network(error_chain(&e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// `{endpoint}/accounts:{action}?key={api_key}`
    pub fn action_url(&self, action: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&format!("accounts:{action}"));
        }
        url.query_pairs_mut().append_pair("key", &self.api_key);
        url
    }

    async fn password_call(
        &self,
        action: &str,
        email: &str,
        password: &str,
    ) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(self.action_url(action))
            .json(&PasswordRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| AuthError::Network(error_chain(&e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::Network(error_chain(&e)))?;
        parse_password_response(status, &body)
    }
}

fn parse_password_response(
    status: reqwest::StatusCode,
    body: &[u8],
) -> Result<Credential, AuthError> {
    if !status.is_success() {
        let message = error_message(body).unwrap_or_else(|| UNKNOWN_AUTH_ERROR.to_string());
        return Err(AuthError::Rejected(message));
    }
    let parsed: PasswordResponse = serde_json::from_slice(body)
        .map_err(|e| AuthError::Rejected(format!("malformed auth response: {e}")))?;
    Ok(Credential::new(parsed.local_id, parsed.id_token))
}

#[async_trait]
impl Authenticator for IdentityToolkitClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        let credential = self.password_call("signUp", email, password).await?;
        log::info!("registered new account {}", credential.user_id);
        Ok(credential)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        let credential = self.password_call("signInWithPassword", email, password).await?;
        log::info!("signed in as {}", credential.user_id);
        Ok(credential)
    }
}
