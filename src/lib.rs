pub mod access_log;
pub mod api;
pub mod app_state;
pub mod clock;
pub mod config;
pub mod error;
pub mod issuer;
pub mod rate_limit;
pub mod resource;
pub mod session;
pub mod signer;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::Extension;
use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

//
// Re-export
//
pub use access_log::{AccessLog, AccessLogEntry};
pub use api::{get_audio_url, log_request_errors, serve_audio, signed_url_middleware};
pub use app_state::AppState;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{ErrorBody, ErrorKind, InvalidRequest, IssueError};
pub use issuer::{Issuer, IssuerConfig, SignedUrl};
pub use rate_limit::{
    InMemoryRateLimitStore, RateLimitExceeded, RateLimitStore, RateLimits, RateWindow,
};
pub use resource::{AudioLibrary, ResourceId};
pub use session::{ClientInfo, SessionContext};
pub use signer::{SignatureError, UrlSigner};

/// Build the HTTP router
pub fn router(state: AppState, allowed_origin: Option<&str>) -> Result<Router> {
    // Issuance is GET only, HEAD included in the rejection
    let issue = get(api::get_audio_url)
        .head(api::method_not_allowed)
        .fallback(api::method_not_allowed);

    // Signed routes (token verified before the handler runs)
    let audio = Router::new()
        .route("/audio/{filename}", get(api::serve_audio))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            api::signed_url_middleware,
        ));

    let mut app = Router::new()
        .route("/get-audio-url", issue.clone())
        .route("/api/get-audio-url.php", issue)
        .route("/health", get(api::health))
        .merge(audio)
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(Extension(state))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(TraceLayer::new_for_http());

    if let Some(origin) = allowed_origin {
        let origin = HeaderValue::from_str(origin).context("Invalid allowed origin")?;
        let cors = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::HEAD])
            .allow_credentials(true);
        app = app.layer(cors);
    }

    Ok(app)
}

pub async fn run(config: Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = InMemoryRateLimitStore::new();
    store.start_cleanup_task(clock.clone(), Duration::from_secs(config.cleanup_interval));

    let access_log_path = config.access_log.as_ref().map(PathBuf::from);
    if let Some(parent) = access_log_path.as_deref().and_then(|p| p.parent())
        && !parent.as_os_str().is_empty()
        && let Err(error) = tokio::fs::create_dir_all(parent).await
    {
        warn!(?parent, %error, "Failed to create access log directory");
    }

    let issuer = Issuer::new(
        config.to_issuer_config(),
        Arc::new(store),
        clock,
        AccessLog::new(access_log_path),
    )?;
    let state = AppState::new(issuer);
    let app = router(state, config.allowed_origin.as_deref())?;

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    info!("Listening on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")
}
