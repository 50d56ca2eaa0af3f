//! OAuth 2.0 authorization-code flow against the game platform.
//!
//! The opaque `state` parameter is the verification token issued by the
//! session store; the callback handler consumes it before exchanging the code.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::OAuthConfig;
use crate::error::ExternalError;

/// Claims returned by the userinfo endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    /// External user id
    pub sub: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserInfo {
    pub fn external_user_id(&self) -> Result<u64, ExternalError> {
        self.sub
            .parse()
            .map_err(|_| ExternalError::Decode(format!("non-numeric subject: {}", self.sub)))
    }

    /// Name to show for the linked account
    pub fn display_name(&self) -> String {
        self.preferred_username
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.sub.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Redirect target that starts the provider's consent screen
    fn authorize_url(&self, state: &str) -> Result<Url, ExternalError>;

    /// Exchange an authorization code and fetch the identity behind it
    async fn exchange(&self, code: &str) -> Result<UserInfo, ExternalError>;
}

pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("RoNexus-Bridge/1.0")
            .use_rustls_tls()
            .https_only(config.token_url.starts_with("https://"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create OAuth client: {}", e))?;

        info!(client_id = %config.client_id, "OAuth client ready");
        Ok(Self { http, config })
    }

    fn token_request(&self, code: &str) -> RequestBuilder {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        self.http.post(&self.config.token_url).form(&form)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ExternalError> {
        let resp = self.token_request(code).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status.as_u16(), None));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ExternalError::Decode(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<UserInfo, ExternalError> {
        let resp = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status.as_u16(), None));
        }

        resp.json()
            .await
            .map_err(|e| ExternalError::Decode(e.to_string()))
    }
}

#[async_trait]
impl OAuthProvider for OAuthClient {
    fn authorize_url(&self, state: &str) -> Result<Url, ExternalError> {
        let mut url = Url::parse(&self.config.authorize_url)
            .map_err(|e| ExternalError::Decode(format!("bad authorize URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        Ok(url)
    }

    async fn exchange(&self, code: &str) -> Result<UserInfo, ExternalError> {
        let access_token = self.exchange_code(code).await?;
        let info = self.fetch_userinfo(&access_token).await?;
        debug!(sub = %info.sub, "OAuth identity resolved");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        let config = OAuthConfig {
            client_id: "8123".to_string(),
            client_secret: "secret-secret-secret".to_string(),
            ..OAuthConfig::default()
        };
        OAuthClient::new(config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_authorize_url_carries_state() {
        let url = client().authorize_url("abc123").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("state".to_string(), "abc123".to_string())));
        assert!(pairs.contains(&("response_type".to_string(), "code".to_string())));
        assert!(pairs.contains(&("client_id".to_string(), "8123".to_string())));
    }

    #[test]
    fn test_token_request_is_form_encoded() {
        let request = client().token_request("a&b c").build().unwrap();
        assert_eq!(
            request.headers()[reqwest::header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );

        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let body = std::str::from_utf8(body).unwrap();
        assert!(body.starts_with("grant_type=authorization_code&code=a%26b+c&"));
        assert!(body.contains("client_id=8123"));
        assert!(body.contains("client_secret=secret-secret-secret"));
    }

    #[test]
    fn test_userinfo_display_name_fallbacks() {
        let info = UserInfo {
            sub: "42".to_string(),
            preferred_username: None,
            name: Some("Fallback".to_string()),
        };
        assert_eq!(info.display_name(), "Fallback");
        assert_eq!(info.external_user_id().unwrap(), 42);

        let bad = UserInfo { sub: "abc".to_string(), preferred_username: None, name: None };
        assert!(bad.external_user_id().is_err());
        assert_eq!(bad.display_name(), "abc");
    }
}
