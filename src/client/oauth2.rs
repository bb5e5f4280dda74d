//! OAuth2 client credentials flow for the admin REST client
//!
//! The data plane hands the same parameters to the `pulsar` crate's own OAuth2
//! provider. The admin client has no such provider, so it discovers the issuer's token
//! endpoint, exchanges the key file's client id and secret for an access token, and
//! caches the token until shortly before it expires.

use super::AdminError;
use crate::config::OAuth2Credentials;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Refresh this long before the issuer's expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Key file referenced by `privateKey`
#[derive(Debug, Deserialize)]
struct KeyFile {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct Discovery {
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

/// Fetches and caches bearer tokens for admin requests
pub struct OAuth2TokenSource {
    credentials: OAuth2Credentials,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for OAuth2TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2TokenSource")
            .field("issuer_url", &self.credentials.issuer_url)
            .finish_non_exhaustive()
    }
}

impl OAuth2TokenSource {
    pub fn new(credentials: OAuth2Credentials, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            cached: Mutex::new(None),
        }
    }

    /// Current access token, fetching a new one if none is cached or it is about to expire
    pub async fn token(&self) -> Result<String, AdminError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            let fresh = token
                .expires_at
                .map(|at| Instant::now() + EXPIRY_MARGIN < at)
                .unwrap_or(true);
            if fresh {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch(&self) -> Result<CachedToken, AdminError> {
        let key = load_key_file(&self.credentials.private_key)?;
        let endpoint = self.token_endpoint().await?;

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", key.client_id),
            ("client_secret", key.client_secret),
        ];
        if let Some(audience) = &self.credentials.audience {
            form.push(("audience", audience.clone()));
        }
        if let Some(scope) = &self.credentials.scope {
            form.push(("scope", scope.clone()));
        }

        let response = self
            .http
            .post(&endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| AdminError::Request(Box::new(e)))?;
        if !response.status().is_success() {
            return Err(AdminError::Status {
                status: response.status().as_u16(),
                message: format!("token request to '{endpoint}' was rejected"),
            });
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AdminError::Request(Box::new(e)))?;

        debug!(expires_in = ?token.expires_in, "Fetched admin access token");
        Ok(CachedToken {
            value: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    async fn token_endpoint(&self) -> Result<String, AdminError> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            self.credentials.issuer_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AdminError::Request(Box::new(e)))?;
        if !response.status().is_success() {
            return Err(AdminError::Status {
                status: response.status().as_u16(),
                message: format!("OAuth2 discovery at '{url}' failed"),
            });
        }
        let discovery: Discovery = response
            .json()
            .await
            .map_err(|e| AdminError::Request(Box::new(e)))?;
        Ok(discovery.token_endpoint)
    }
}

fn load_key_file(location: &str) -> Result<KeyFile, AdminError> {
    let raw = if let Some(encoded) = location.strip_prefix("data:application/json;base64,") {
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| AdminError::Request(Box::new(e)))?
    } else {
        let path = location.strip_prefix("file://").unwrap_or(location);
        std::fs::read(path).map_err(|e| AdminError::Request(Box::new(e)))?
    };
    serde_json::from_slice(&raw).map_err(|e| AdminError::Request(Box::new(e)))
}
