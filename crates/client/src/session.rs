//! Bot session: exchanges the per-bot access token for a user-scoped JWT and
//! keeps it fresh.
//!
//! The JWT's `exp` claim is decoded (base64url payload, no signature check,
//! we only need the timestamp) and the session re-authenticates slightly
//! before expiry so in-flight requests never race a dead token.

use base64::Engine;
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::sync::Arc;

use mew_domain::error::{Error, Result};
use mew_domain::types::User;

use crate::http::{api_error, from_reqwest};

const REFRESH_MARGIN_SECS: i64 = 120;

struct SessionState {
    me: User,
    token: String,
}

/// Authenticated session for one bot identity.
#[derive(Clone)]
pub struct BotSession {
    api_base: String,
    access_token: String,
    http: reqwest::Client,
    state: Arc<RwLock<Option<SessionState>>>,
}

impl BotSession {
    pub fn new(api_base: &str, access_token: &str, http: reqwest::Client) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_owned(),
            access_token: access_token.trim().to_owned(),
            http,
            state: Arc::new(RwLock::new(None)),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The authenticated bot user; logs in on first use.
    pub async fn user(&self) -> Result<User> {
        self.token().await?;
        Ok(self.state.read().as_ref().map(|s| s.me.clone()).unwrap_or_default())
    }

    /// A currently valid JWT, re-authenticating when missing or near expiry.
    pub async fn token(&self) -> Result<String> {
        if self.access_token.is_empty() {
            return Err(Error::Auth("access token is required".into()));
        }

        let current = self.state.read().as_ref().map(|s| s.token.clone());
        if let Some(token) = current {
            match jwt_exp_unix(&token) {
                Some(exp) if Utc::now().timestamp() + REFRESH_MARGIN_SECS < exp => {
                    return Ok(token)
                }
                None => return Ok(token),
                _ => {}
            }
        }

        self.login().await?;
        Ok(self.state.read().as_ref().map(|s| s.token.clone()).unwrap_or_default())
    }

    /// Force a fresh `POST /auth/bot` exchange.
    pub async fn login(&self) -> Result<()> {
        let url = format!("{}/auth/bot", self.api_base);
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "accessToken": self.access_token }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(format!("bot auth rejected: status={status}")));
        }
        if !status.is_success() {
            return Err(api_error(resp).await);
        }

        #[derive(serde::Deserialize)]
        struct AuthResponse {
            user: User,
            token: String,
        }
        let parsed: AuthResponse = resp.json().await.map_err(from_reqwest)?;
        if parsed.token.trim().is_empty() {
            return Err(Error::Auth("auth response missing token".into()));
        }

        *self.state.write() = Some(SessionState { me: parsed.user, token: parsed.token });
        Ok(())
    }

    /// A GET request builder carrying the bearer token.
    pub async fn get(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.token().await?;
        Ok(self.http.get(format!("{}{path}", self.api_base)).bearer_auth(token))
    }

    /// A POST request builder carrying the bearer token.
    pub async fn post(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.token().await?;
        Ok(self.http.post(format!("{}{path}", self.api_base)).bearer_auth(token))
    }
}

/// Decode the `exp` claim from a JWT without verifying the signature.
pub fn jwt_exp_unix(jwt: &str) -> Option<i64> {
    let payload = jwt.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    let parsed: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = parsed.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Render a unix timestamp for logs.
pub fn format_exp(exp: i64) -> String {
    Utc.timestamp_opt(exp, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| exp.to_string())
}
