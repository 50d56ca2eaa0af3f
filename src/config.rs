use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration for the identity bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// External game platform API endpoints
    pub external: ExternalApiConfig,
    /// OAuth provider used for account linking
    pub oauth: OAuthConfig,
    /// Chat platform REST access
    pub chat: ChatConfig,
    /// Verification session settings
    pub verification: VerificationConfig,
    /// Risk scoring settings
    pub risk: RiskConfig,
    /// Guild licensing
    pub licensing: LicensingConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
    /// Public base URL (OAuth redirect target lives under it)
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Require HTTPS for all external communications
    pub require_https: bool,
    /// Enable API authentication
    pub enable_auth: bool,
    /// Rate limit per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Keys accepted by the API authentication middleware
    #[serde(skip_serializing, default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalApiConfig {
    pub users_url: String,
    pub badges_url: String,
    pub friends_url: String,
    pub groups_url: String,
    pub premium_url: String,
    /// Open Cloud base, used for credentialed group rank writes
    pub open_cloud_url: String,
    /// Timeout applied to every single external call
    pub call_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Upper bound on badge pages fetched per assessment
    pub max_badge_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub api_url: String,
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Lifetime of a linking token
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Concurrent external calls per assessment
    pub max_concurrency: usize,
    /// Overall assessment deadline
    pub deadline_secs: u64,
    /// Assessments younger than this are served from cache
    pub cache_freshness_secs: u64,
    /// Operator-maintained blacklist, applied to every guild
    pub static_blacklist: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicensingConfig {
    /// Starter license inserted at startup if missing
    pub seed_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses in-memory stores)
    pub postgres_enabled: bool,
    /// Interval of the reconciliation sweep, 0 disables it
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug)
    pub level: String,
    /// Mask secrets before they reach the logs
    pub sanitize_logs: bool,
    /// Enable request/response logging
    pub log_requests: bool,
}

impl Default for ExternalApiConfig {
    fn default() -> Self {
        Self {
            users_url: "https://users.roblox.com".to_string(),
            badges_url: "https://badges.roblox.com".to_string(),
            friends_url: "https://friends.roblox.com".to_string(),
            groups_url: "https://groups.roblox.com".to_string(),
            premium_url: "https://premiumfeatures.roblox.com".to_string(),
            open_cloud_url: "https://apis.roblox.com".to_string(),
            call_timeout_secs: 5,
            max_retries: 3,
            retry_delay_ms: 250,
            max_badge_pages: 10,
        }
    }
}

impl ExternalApiConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(), // Must be set via environment
            redirect_uri: "https://bridge.ronexus.app/verify/callback".to_string(),
            authorize_url: "https://apis.roblox.com/oauth/v1/authorize".to_string(),
            token_url: "https://apis.roblox.com/oauth/v1/token".to_string(),
            userinfo_url: "https://apis.roblox.com/oauth/v1/userinfo".to_string(),
            scopes: "openid profile".to_string(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 6,
            deadline_secs: 12,
            cache_freshness_secs: 300,
            static_blacklist: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/ronexus".to_string(),
            postgres_enabled: false,
            reconcile_interval_secs: 900,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                base_url: "https://bridge.ronexus.app".to_string(),
            },
            security: SecurityConfig {
                require_https: true,
                enable_auth: true,
                rate_limit_per_minute: 120,
                max_request_size: 64 * 1024,
                api_keys: Vec::new(),
            },
            external: ExternalApiConfig::default(),
            oauth: OAuthConfig::default(),
            chat: ChatConfig {
                api_url: "https://discord.com/api/v10".to_string(),
                bot_token: String::new(),
            },
            verification: VerificationConfig { session_ttl_secs: 600 },
            risk: RiskConfig::default(),
            licensing: LicensingConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                sanitize_logs: true,
                log_requests: false,
            },
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => Ok(Some(
            raw.trim()
                .parse()
                .with_context(|| format!("Invalid {} value", name))?,
        )),
        Err(_) => Ok(None),
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server
        if let Ok(host) = env::var("RONEXUS_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_env("RONEXUS_PORT")? {
            config.server.port = port;
        }
        if let Ok(base_url) = env::var("RONEXUS_BASE_URL") {
            config.server.base_url = base_url.trim_end_matches('/').to_string();
            config.oauth.redirect_uri = format!("{}/verify/callback", config.server.base_url);
        }

        // Security
        if let Some(require_https) = parse_env("RONEXUS_REQUIRE_HTTPS")? {
            config.security.require_https = require_https;
        }
        if let Some(enable_auth) = parse_env("RONEXUS_ENABLE_AUTH")? {
            config.security.enable_auth = enable_auth;
        }
        if let Some(rate_limit) = parse_env("RONEXUS_RATE_LIMIT_PER_MINUTE")? {
            config.security.rate_limit_per_minute = rate_limit;
        }
        config.security.api_keys = api_keys_from_env();

        // External platform
        if let Some(timeout) = parse_env("RONEXUS_EXTERNAL_TIMEOUT_SECS")? {
            config.external.call_timeout_secs = timeout;
        }
        if let Some(retries) = parse_env("RONEXUS_EXTERNAL_MAX_RETRIES")? {
            config.external.max_retries = retries;
        }
        if let Some(pages) = parse_env("RONEXUS_MAX_BADGE_PAGES")? {
            config.external.max_badge_pages = pages;
        }
        if let Ok(url) = env::var("RONEXUS_OPEN_CLOUD_URL") {
            config.external.open_cloud_url = url;
        }

        // OAuth - client credentials are required
        config.oauth.client_id = env::var("RONEXUS_OAUTH_CLIENT_ID")
            .context("RONEXUS_OAUTH_CLIENT_ID environment variable is required")?;
        config.oauth.client_secret = env::var("RONEXUS_OAUTH_CLIENT_SECRET")
            .context("RONEXUS_OAUTH_CLIENT_SECRET environment variable is required")?;
        if let Ok(redirect) = env::var("RONEXUS_OAUTH_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect;
        }

        // Chat platform
        config.chat.bot_token = env::var("RONEXUS_CHAT_BOT_TOKEN")
            .context("RONEXUS_CHAT_BOT_TOKEN environment variable is required")?;
        if let Ok(url) = env::var("RONEXUS_CHAT_API_URL") {
            config.chat.api_url = url;
        }

        // Verification
        if let Some(ttl) = parse_env("RONEXUS_SESSION_TTL_SECS")? {
            config.verification.session_ttl_secs = ttl;
        }

        // Risk
        if let Some(concurrency) = parse_env("RONEXUS_RISK_MAX_CONCURRENCY")? {
            config.risk.max_concurrency = concurrency;
        }
        if let Some(deadline) = parse_env("RONEXUS_RISK_DEADLINE_SECS")? {
            config.risk.deadline_secs = deadline;
        }
        if let Some(freshness) = parse_env("RONEXUS_RISK_CACHE_SECS")? {
            config.risk.cache_freshness_secs = freshness;
        }
        if let Ok(list) = env::var("RONEXUS_STATIC_BLACKLIST") {
            config.risk.static_blacklist = parse_id_list(&list)
                .context("Invalid RONEXUS_STATIC_BLACKLIST value")?;
        }

        // Licensing
        config.licensing.seed_key = env::var("RONEXUS_SEED_LICENSE")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        // Database
        if let Ok(url) = env::var("RONEXUS_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        if let Some(enabled) = parse_env("RONEXUS_POSTGRES_ENABLED")? {
            config.database.postgres_enabled = enabled;
        }
        if let Some(interval) = parse_env("RONEXUS_RECONCILE_INTERVAL_SECS")? {
            config.database.reconcile_interval_secs = interval;
        }

        // Logging
        if let Ok(level) = env::var("RONEXUS_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(sanitize) = parse_env("RONEXUS_SANITIZE_LOGS")? {
            config.logging.sanitize_logs = sanitize;
        }
        if let Some(log_requests) = parse_env("RONEXUS_LOG_REQUESTS")? {
            config.logging.log_requests = log_requests;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.security.require_https {
            let urls = [
                ("base URL", &self.server.base_url),
                ("OAuth redirect URI", &self.oauth.redirect_uri),
                ("OAuth token URL", &self.oauth.token_url),
                ("Open Cloud URL", &self.external.open_cloud_url),
                ("chat API URL", &self.chat.api_url),
            ];
            for (name, url) in urls {
                if !url.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "HTTPS is required but {} is not HTTPS: {}",
                        name,
                        url
                    ));
                }
            }
        }

        if self.oauth.client_id.is_empty() {
            return Err(anyhow::anyhow!("OAuth client id is required"));
        }

        if self.oauth.client_secret.len() < 16 {
            return Err(anyhow::anyhow!(
                "OAuth client secret is too short (minimum 16 characters)"
            ));
        }

        if self.security.enable_auth && self.security.api_keys.is_empty() {
            warn!("No API keys configured - authentication will fail if enabled");
        }

        if self.verification.session_ttl_secs == 0 {
            return Err(anyhow::anyhow!("Session TTL must be non-zero"));
        }

        if self.risk.max_concurrency == 0 {
            return Err(anyhow::anyhow!("Risk max concurrency must be non-zero"));
        }

        if self.external.call_timeout_secs >= self.risk.deadline_secs {
            warn!(
                "External call timeout ({}s) is not below the assessment deadline ({}s)",
                self.external.call_timeout_secs, self.risk.deadline_secs
            );
        }

        Ok(())
    }
}

/// `RONEXUS_API_KEY` plus the comma-separated `RONEXUS_API_KEYS`
fn api_keys_from_env() -> Vec<String> {
    let mut keys: Vec<String> = env::var("RONEXUS_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .into_iter()
        .collect();

    if let Ok(extra_keys) = env::var("RONEXUS_API_KEYS") {
        keys.extend(
            extra_keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        );
    }

    if !keys.is_empty() {
        info!("Loaded {} API key(s) for authentication", keys.len());
    }
    keys
}

fn parse_id_list(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("Invalid id: {}", s)))
        .collect()
}

/// Sanitize sensitive data for logging
pub fn sanitize_for_logging(data: &str) -> String {
    if data.len() > 20 {
        format!("{}***{}", &data[..6], &data[data.len().saturating_sub(6)..])
    } else if data.len() > 4 {
        format!(
            "{}***{}",
            &data[..2],
            &data[data.len().saturating_sub(2)..]
        )
    } else {
        "*".repeat(data.len())
    }
}

/// Per-group Open Cloud API keys.
///
/// Loaded from `RONEXUS_GROUP_<groupId>_API_KEY`; never persisted.
pub struct CredentialManager {
    credentials: HashMap<u64, String>,
}

impl CredentialManager {
    pub fn new() -> Self {
        Self {
            credentials: HashMap::new(),
        }
    }

    /// Load every group credential present in the environment
    pub fn load_from_env(&mut self) -> Result<()> {
        self.load_from_vars(env::vars())
    }

    fn load_from_vars(&mut self, vars: impl Iterator<Item = (String, String)>) -> Result<()> {
        for (name, value) in vars {
            let Some(group) = name
                .strip_prefix("RONEXUS_GROUP_")
                .and_then(|rest| rest.strip_suffix("_API_KEY"))
            else {
                continue;
            };
            let group_id: u64 = group
                .parse()
                .with_context(|| format!("Invalid group id in {}", name))?;
            self.insert(group_id, value)?;
        }

        if self.credentials.is_empty() {
            warn!("No group API keys configured - entitlement sync will fail for every group");
        }

        Ok(())
    }

    /// Register a group credential after validating it
    pub fn insert(&mut self, group_id: u64, api_key: String) -> Result<()> {
        validate_credential(group_id, &api_key)?;
        info!(
            group = group_id,
            key = %sanitize_for_logging(&api_key),
            "Loaded group credential"
        );
        self.credentials.insert(group_id, api_key);
        Ok(())
    }

    pub fn api_key(&self, group_id: u64) -> Option<&str> {
        self.credentials.get(&group_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl Default for CredentialManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate credential strength
fn validate_credential(group_id: u64, api_key: &str) -> Result<()> {
    if api_key.len() < 16 {
        return Err(anyhow::anyhow!(
            "API key for group {} is too short (minimum 16 characters)",
            group_id
        ));
    }

    if api_key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(anyhow::anyhow!(
            "API key for group {} contains invalid characters",
            group_id
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.oauth.client_id = "1234567890".to_string();
        config.oauth.client_secret = "RBX-secret-abcdefghijkl".to_string();
        config
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("abcd"), "****");
        assert_eq!(sanitize_for_logging("api_key_secret"), "ap***et");
        assert_eq!(
            sanitize_for_logging("RBX-0123456789abcdefghijklmn"),
            "RBX-01***ijklmn"
        );
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());

        let mut short_secret = valid_config();
        short_secret.oauth.client_secret = "short".to_string();
        assert!(short_secret.validate().is_err());

        let mut plain_http = valid_config();
        plain_http.server.base_url = "http://bridge.local".to_string();
        assert!(plain_http.validate().is_err());

        plain_http.security.require_https = false;
        assert!(plain_http.validate().is_ok());
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("1,abc").is_err());
    }

    #[test]
    fn test_credentials_from_vars() {
        let vars = vec![
            ("RONEXUS_GROUP_4242_API_KEY".to_string(), "abcdefghijklmnopqrstu".to_string()),
            ("RONEXUS_LOG_LEVEL".to_string(), "debug".to_string()),
        ];
        let mut manager = CredentialManager::new();
        manager.load_from_vars(vars.into_iter()).unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.api_key(4242), Some("abcdefghijklmnopqrstu"));
        assert_eq!(manager.api_key(1), None);
    }

    #[test]
    fn test_rejects_weak_credential() {
        let mut manager = CredentialManager::new();
        assert!(manager.insert(7, "short".to_string()).is_err());
        assert!(manager.insert(7, "has a space in the key".to_string()).is_err());
        assert!(manager.is_empty());
    }
}
