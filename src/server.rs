// HTTP surface - JSON resolution endpoint, health check and merged-file serving

use axum::{
    extract::{rejection::JsonRejection, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::AppConfig;
use crate::resolver::browser::ChromeFallback;
use crate::resolver::errors::ResolveError;
use crate::resolver::fetcher::HttpFetcher;
use crate::resolver::models::MediaRecord;
use crate::resolver::muxer::{is_merged_file_name, HttpStreamDownloader, MediaMuxer, MERGED_ROUTE};
use crate::resolver::utils::{build_http_client, parse_post_url};
use crate::resolver::MediaPipeline;

/// Shared per-process state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<MediaPipeline>,
    /// Raw page access for the debug passthrough
    pub raw_fetcher: Arc<HttpFetcher>,
    /// Owner of the merged-file cache
    pub muxer: Arc<MediaMuxer>,
}

impl AppState {
    /// Wire fetcher, muxer, browser fallback and pipeline from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, ResolveError> {
        let fetcher = Arc::new(HttpFetcher::new(
            &config.user_agent,
            config.proxy.as_deref(),
            config.fetch_timeout,
        )?);

        let mut pipeline = MediaPipeline::new(fetcher.clone());

        let stream_client = build_http_client(&config.user_agent, config.proxy.as_deref(), None)?;
        let muxer = Arc::new(MediaMuxer::new(
            config.muxer_config(),
            Arc::new(HttpStreamDownloader::new(stream_client)),
        ));

        if config.browser_fallback {
            let fallback = ChromeFallback::new(config.browser_config(), muxer.clone());
            pipeline = pipeline.with_fallback(Arc::new(fallback));
        } else {
            tracing::info!("browser fallback disabled");
        }

        Ok(Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            raw_fetcher: fetcher,
            muxer,
        })
    }

    /// Drop merged files older than `cache_max_age`; a no-op when unset
    pub async fn purge_stale_cache(&self) -> usize {
        let Some(max_age) = self.config.cache_max_age else {
            return 0;
        };
        match self.muxer.purge_older_than(max_age).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "cache purge failed");
                0
            }
        }
    }
}

/// Error response wrapper; diagnostics are only attached when the config allows it
pub struct AppError {
    error: ResolveError,
    expose_details: bool,
}

impl AppError {
    pub fn new(error: ResolveError, expose_details: bool) -> Self {
        Self {
            error,
            expose_details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status.is_server_error() && status != StatusCode::GATEWAY_TIMEOUT {
            "Failed to resolve media".to_string()
        } else {
            self.error.to_string()
        };

        let mut body = serde_json::json!({
            "error": message,
            "code": self.error.code(),
            "retryable": self.error.is_retryable(),
        });

        if self.expose_details {
            let details = match &self.error {
                ResolveError::NotFound(diagnostics) => serde_json::to_value(diagnostics).ok(),
                other => Some(serde_json::Value::String(other.to_string())),
            };
            if let Some(details) = details {
                body["details"] = details;
            }
        }

        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct FetchContentRequest {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawQuery {
    pub url: Option<String>,
}

/// Build the router; the debug route exists only when enabled in config
pub fn create_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/fetch-content", post(fetch_content));

    if state.config.debug_endpoints {
        tracing::warn!("debug endpoints enabled: /debug/raw proxies upstream pages");
        app = app.route("/debug/raw", get(debug_raw));
    }

    let merged = Router::<()>::new()
        .fallback_service(ServeDir::new(&state.config.cache_dir))
        .layer(middleware::from_fn(merged_files_only));

    app.nest_service(MERGED_ROUTE, merged)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Only finished outputs are public; temporaries and stray files are 404
async fn merged_files_only(request: Request, next: Next) -> Response {
    let name = request.uri().path().trim_start_matches('/');
    if !is_merged_file_name(name) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

async fn health() -> impl IntoResponse {
    let time = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    Json(serde_json::json!({
        "status": "ok",
        "time": time,
    }))
}

async fn fetch_content(
    State(state): State<AppState>,
    payload: Result<Json<FetchContentRequest>, JsonRejection>,
) -> Result<Json<MediaRecord>, AppError> {
    let expose = state.config.expose_error_details;

    let url = match payload {
        Ok(Json(FetchContentRequest { url: Some(url) })) if !url.trim().is_empty() => url,
        Ok(_) => {
            return Err(AppError::new(
                ResolveError::Validation("URL is required".to_string()),
                expose,
            ))
        }
        Err(rejection) => {
            return Err(AppError::new(
                ResolveError::Validation(rejection.body_text()),
                expose,
            ))
        }
    };

    match state.pipeline.resolve(&url).await {
        Ok(record) => {
            tracing::info!(url = %url, media_type = ?record.media_type, "resolved");
            Ok(Json(record))
        }
        Err(e) => {
            tracing::warn!(url = %url, code = e.code(), error = %e, "resolution failed");
            Err(AppError::new(e, expose))
        }
    }
}

/// Upstream page as served, for inspecting markup changes
async fn debug_raw(
    State(state): State<AppState>,
    Query(query): Query<RawQuery>,
) -> Result<Response, AppError> {
    let expose = state.config.expose_error_details;
    let url = query.url.unwrap_or_default();

    // Only post URLs, so this never becomes an open proxy
    parse_post_url(&url).map_err(|e| AppError::new(e, expose))?;

    let (status, body) = state
        .raw_fetcher
        .fetch_raw(url.trim())
        .await
        .map_err(|e| AppError::new(e, expose))?;

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, body).into_response())
}

/// Serve until ctrl-c / SIGTERM
pub async fn start_server(state: AppState) -> std::io::Result<()> {
    let addr = state.config.bind_addr;
    let app = create_router(state);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
