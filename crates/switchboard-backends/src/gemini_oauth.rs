//! OAuth-gated Gemini connector
//!
//! Like the HTTPS Gemini connector, but authenticates with a user-owned
//! on-disk credential file (`~/.gemini/oauth_creds.json`) instead of an
//! API key. Expired access tokens are refreshed through the Google token
//! endpoint and the refreshed credentials are written back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchboard_core::translation::gemini as translate;
use switchboard_core::{ChatMessage, ChatRequest, ProxyError, Result};

use crate::connector::{
    response_to_error, transport_error, BackendConnector, CallContext, ResponseEnvelope,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash"];

/// Refresh this many milliseconds before the recorded expiry.
const EXPIRY_SLACK_MS: i64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Expiry as Unix milliseconds.
    pub expiry_date: Option<i64>,
}

impl OauthCredentials {
    fn is_expired(&self, now_ms: i64) -> bool {
        match self.expiry_date {
            Some(expiry) => now_ms >= expiry - EXPIRY_SLACK_MS,
            None => false,
        }
    }
}

pub struct GeminiOauthConnector {
    name: String,
    client: Client,
    base_url: String,
    credentials_path: PathBuf,
    oauth_client_id: Option<String>,
    oauth_client_secret: Option<String>,
    credentials: RwLock<Option<OauthCredentials>>,
    functional: AtomicBool,
}

impl GeminiOauthConnector {
    pub fn new(name: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials_path: default_credentials_path(),
            oauth_client_id: std::env::var("GEMINI_OAUTH_CLIENT_ID").ok(),
            oauth_client_secret: std::env::var("GEMINI_OAUTH_CLIENT_SECRET").ok(),
            credentials: RwLock::new(None),
            functional: AtomicBool::new(false),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    fn load_credentials(&self) -> Result<OauthCredentials> {
        let raw = std::fs::read_to_string(&self.credentials_path).map_err(|err| {
            ProxyError::Configuration(format!(
                "Cannot read OAuth credentials {}: {err}",
                self.credentials_path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            ProxyError::Configuration(format!(
                "Malformed OAuth credentials {}: {err}",
                self.credentials_path.display()
            ))
        })
    }

    fn store_credentials(&self, credentials: &OauthCredentials) {
        match serde_json::to_string_pretty(credentials) {
            Ok(serialized) => {
                if let Err(err) = std::fs::write(&self.credentials_path, serialized) {
                    warn!(
                        path = %self.credentials_path.display(),
                        error = %err,
                        "Failed to persist refreshed OAuth credentials"
                    );
                }
            }
            Err(err) => warn!(error = %err, "Failed to serialize OAuth credentials"),
        }
        *self.credentials.write() = Some(credentials.clone());
    }

    /// Current access token, refreshing through the token endpoint first
    /// when the cached one is expired.
    async fn access_token(&self) -> Result<String> {
        let cached = self.credentials.read().clone();
        let credentials = match cached {
            Some(credentials) => credentials,
            None => self.load_credentials()?,
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        if !credentials.is_expired(now_ms) {
            return Ok(credentials.access_token.clone());
        }

        let Some(refresh_token) = credentials.refresh_token.clone() else {
            return Err(ProxyError::Authentication(
                "OAuth access token expired and no refresh token is available".to_string(),
            ));
        };

        debug!(backend = %self.name, "Refreshing expired OAuth access token");
        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.clone()),
        ];
        if let Some(client_id) = &self.oauth_client_id {
            form.push(("client_id".to_string(), client_id.clone()));
        }
        if let Some(client_secret) = &self.oauth_client_secret {
            form.push(("client_secret".to_string(), client_secret.clone()));
        }

        let response = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&form)
            .send()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Authentication(format!(
                "OAuth token refresh failed ({status}): {body}"
            )));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            expires_in: Option<i64>,
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| transport_error(&self.name, err))?;

        let refreshed = OauthCredentials {
            access_token: token.access_token.clone(),
            refresh_token: Some(refresh_token),
            expiry_date: token
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp_millis() + secs * 1000),
        };
        self.store_credentials(&refreshed);
        Ok(token.access_token)
    }
}

fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".gemini")
        .join("oauth_creds.json")
}

#[async_trait]
impl BackendConnector for GeminiOauthConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        match self.load_credentials() {
            Ok(credentials) => {
                *self.credentials.write() = Some(credentials);
                self.functional.store(true, Ordering::SeqCst);
                info!(backend = %self.name, "OAuth credentials loaded");
            }
            Err(err) => {
                warn!(backend = %self.name, error = %err, "OAuth backend disabled");
                self.functional.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn is_functional(&self) -> bool {
        self.functional.load(Ordering::SeqCst)
    }

    fn available_models(&self) -> Vec<String> {
        if !self.is_functional() {
            return Vec::new();
        }
        DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
    }

    async fn chat_completions(
        &self,
        request: &ChatRequest,
        messages: &[ChatMessage],
        call: &CallContext,
    ) -> Result<ResponseEnvelope> {
        let token = self.access_token().await?;
        let body = translate::request_to_gemini(request, messages);
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, call.effective_model
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        if !response.status().is_success() {
            return Err(response_to_error(&self.name, response).await);
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| transport_error(&self.name, err))?;
        let id = format!("chatcmpl-{}", Uuid::new_v4().simple());
        let canonical = translate::response_from_gemini(&data, &call.effective_model, &id);
        Ok(ResponseEnvelope::complete(serde_json::to_value(&canonical)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_check() {
        let now = chrono::Utc::now().timestamp_millis();
        let live = OauthCredentials {
            access_token: "tok".to_string(),
            refresh_token: None,
            expiry_date: Some(now + 3_600_000),
        };
        assert!(!live.is_expired(now));

        let stale = OauthCredentials {
            access_token: "tok".to_string(),
            refresh_token: None,
            expiry_date: Some(now - 1),
        };
        assert!(stale.is_expired(now));

        let no_expiry = OauthCredentials {
            access_token: "tok".to_string(),
            refresh_token: None,
            expiry_date: None,
        };
        assert!(!no_expiry.is_expired(now));
    }

    #[tokio::test]
    async fn test_initialize_without_credentials_is_non_functional() {
        let dir = tempfile::tempdir().unwrap();
        let connector = GeminiOauthConnector::new("gemini-oauth", Client::new())
            .with_credentials_path(dir.path().join("missing.json"));
        connector.initialize().await.unwrap();
        assert!(!connector.is_functional());
        assert!(connector.available_models().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_with_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oauth_creds.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "access_token": "tok",
                "refresh_token": "ref",
                "expiry_date": chrono::Utc::now().timestamp_millis() + 3_600_000
            })
            .to_string(),
        )
        .unwrap();

        let connector =
            GeminiOauthConnector::new("gemini-oauth", Client::new()).with_credentials_path(path);
        connector.initialize().await.unwrap();
        assert!(connector.is_functional());
        assert_eq!(connector.available_models(), DEFAULT_MODELS.to_vec());

        let token = connector.access_token().await.unwrap();
        assert_eq!(token, "tok");
    }
}
