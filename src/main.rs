use anyhow::{Context, Result};
use axum::middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use ronexus::{
    AppState, BridgeConfig, CredentialManager, DatabasePool, DiscordGateway, EntitlementSync,
    ExternalPlatform, IdentityLedger, IdentityStore, LicenseService, LicenseStore,
    MemoryIdentityStore, MemoryLicenseStore, MemoryPointStore, MemoryRankStore,
    MemorySessionStore, OAuthClient, OAuthProvider, PointLedger, PointStore, PrivilegeGateway,
    RankEngine, RankStore, Reconciler, RobloxClient, SessionManager, SessionStore,
    api::{
        SecurityMiddlewareConfig, SecurityState, auth_middleware, body_size_middleware,
        create_router, logging_middleware, rate_limit_middleware, security_headers_middleware,
    },
    risk::{Blacklist, BlacklistStore, MemoryBlacklistStore, RiskEngine, RiskSettings},
};

/// Store backends chosen at startup
struct Stores {
    sessions: Arc<dyn SessionStore>,
    identities: Arc<dyn IdentityStore>,
    points: Arc<dyn PointStore>,
    ranks: Arc<dyn RankStore>,
    blacklist: Arc<dyn BlacklistStore>,
    licenses: Arc<dyn LicenseStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - this validates all security requirements
    let config = Arc::new(BridgeConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check RONEXUS_* environment variables.");
        e
    })?);

    init_secure_logging(&config)?;

    info!("Starting RoNexus identity bridge");
    info!(
        "Security settings: HTTPS required: {}, Auth enabled: {}",
        config.security.require_https, config.security.enable_auth
    );

    let stores = open_stores(&config).await?;

    // Group credentials come from the environment only
    let mut credentials = CredentialManager::new();
    credentials.load_from_env()?;
    info!("Loaded {} group credential(s)", credentials.len());
    let credentials = Arc::new(credentials);

    let call_timeout = config.external.call_timeout();
    let platform: Arc<dyn ExternalPlatform> = Arc::new(
        RobloxClient::new(config.external.clone()).context("Failed to create platform client")?,
    );
    let oauth: Arc<dyn OAuthProvider> = Arc::new(
        OAuthClient::new(config.oauth.clone(), call_timeout)
            .context("Failed to create OAuth client")?,
    );
    let gateway: Arc<dyn PrivilegeGateway> = Arc::new(
        DiscordGateway::new(
            config.chat.api_url.clone(),
            config.chat.bot_token.clone(),
            call_timeout,
        )
        .context("Failed to create chat gateway")?,
    );
    if config.chat.bot_token.is_empty() {
        warn!("No chat bot token configured - privilege checks will fail");
    }

    let sessions = Arc::new(SessionManager::new(
        stores.sessions,
        chrono::Duration::seconds(config.verification.session_ttl_secs as i64),
    ));
    let identities = Arc::new(IdentityLedger::new(stores.identities));
    let points = Arc::new(PointLedger::new(stores.points));

    let sync = Arc::new(
        EntitlementSync::new(
            stores.ranks.clone(),
            platform.clone(),
            credentials,
            config.risk.max_concurrency,
        )
        .with_call_timeout(call_timeout),
    );
    let engine = Arc::new(RankEngine::new(
        points,
        stores.ranks.clone(),
        identities.clone(),
        gateway,
        sync,
    ));

    let blacklist = Blacklist::new(config.risk.static_blacklist.iter().copied(), stores.blacklist);
    let risk = Arc::new(RiskEngine::new(
        platform,
        blacklist,
        RiskSettings::from_config(&config.risk, &config.external),
    ));

    let licenses = Arc::new(LicenseService::new(stores.licenses));
    if let Some(seed_key) = &config.licensing.seed_key {
        licenses
            .seed(seed_key)
            .await
            .context("Failed to seed license")?;
    }

    if config.database.reconcile_interval_secs > 0 {
        let reconciler = Arc::new(Reconciler::new(
            engine.clone(),
            stores.ranks.clone(),
            sessions.clone(),
        ));
        let _sweep = reconciler.spawn(Duration::from_secs(config.database.reconcile_interval_secs));
        info!(
            "Reconciliation sweep every {}s",
            config.database.reconcile_interval_secs
        );
    } else {
        info!("Reconciliation sweep disabled");
    }

    let state = AppState {
        sessions,
        oauth,
        identities,
        engine,
        ranks: stores.ranks,
        risk,
        licenses,
    };

    let security_state = SecurityState::new(SecurityMiddlewareConfig::from_config(&config));
    spawn_rate_limit_cleanup(&security_state);

    // Outermost layer runs first
    let app = create_router(state)
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            body_size_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn_with_state(
            security_state.clone(),
            logging_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Bridge listening on {}", bind_addr);
    info!(
        "Security middleware: Auth={}, Rate limit={}/min, Max body={}KB",
        config.security.enable_auth,
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );

    // Serve with connect info for client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Initialize logging; `RUST_LOG` overrides the configured level
fn init_secure_logging(config: &BridgeConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    if config.logging.sanitize_logs {
        info!("Secure logging initialized with data sanitization enabled");
    }

    Ok(())
}

async fn open_stores(config: &BridgeConfig) -> Result<Stores> {
    if !config.database.postgres_enabled {
        warn!("PostgreSQL disabled - using in-memory stores, nothing survives a restart");
        return Ok(Stores {
            sessions: Arc::new(MemorySessionStore::new()),
            identities: Arc::new(MemoryIdentityStore::new()),
            points: Arc::new(MemoryPointStore::new()),
            ranks: Arc::new(MemoryRankStore::new()),
            blacklist: Arc::new(MemoryBlacklistStore::new()),
            licenses: Arc::new(MemoryLicenseStore::new()),
        });
    }

    let db = DatabasePool::new(&config.database.postgres_url).await?;
    db.init_schema().await?;

    Ok(Stores {
        sessions: db.sessions(),
        identities: db.identities(),
        points: db.points(),
        ranks: db.ranks(),
        blacklist: db.blacklist(),
        licenses: db.licenses(),
    })
}

fn spawn_rate_limit_cleanup(security_state: &SecurityState) {
    let limiter = security_state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            limiter.cleanup();
            debug!(clients = limiter.tracked(), "Rate limit windows pruned");
        }
    });
}
