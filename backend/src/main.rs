use dotenvy::dotenv;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

mod error;
mod config {
    pub mod app_config;
}
mod handlers {
    pub mod application_dtos;
    pub mod application_handlers;
}
mod models {
    pub mod application_models;
}
mod repositories {
    pub mod application_repository;
}
mod utils {
    pub mod rate_limit;
    pub mod validation;
}
mod jobs {
    pub mod scheduler;
}

use config::app_config::{AppConfig, CorsPolicy};
use handlers::application_handlers;
use repositories::application_repository::{ApplicationStore, InMemoryStore, SupabaseStore};
use utils::rate_limit::{self, SlidingWindowLimiter};

pub struct AppState {
    store: Arc<dyn ApplicationStore>,
    rate_limiter: SlidingWindowLimiter,
}

impl AppState {
    pub fn new(store: Arc<dyn ApplicationStore>, config: &AppConfig) -> Self {
        Self {
            store,
            rate_limiter: SlidingWindowLimiter::new(
                config.rate_limit_window,
                config.rate_limit_max_requests,
            ),
        }
    }
}

fn cors_layer(policy: &CorsPolicy) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match policy {
        CorsPolicy::AnyOrigin => cors.allow_origin(Any),
        CorsPolicy::AllowList(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect();
            cors.allow_origin(AllowOrigin::list(origins))
                .allow_credentials(true)
        }
    }
}

pub fn build_router(state: Arc<AppState>, config: &AppConfig) -> Router {
    let app = Router::new()
        .route(
            "/health",
            get(application_handlers::health_check).fallback(application_handlers::method_not_allowed),
        )
        .route(
            "/api/health",
            get(application_handlers::health_check).fallback(application_handlers::method_not_allowed),
        )
        .route(
            "/api/applications",
            post(application_handlers::submit_application)
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit::enforce_rate_limit,
                ))
                .fallback(application_handlers::method_not_allowed),
        );

    // The built frontend can be served from the same origin as the API.
    let app = match &config.static_dir {
        Some(dir) => app.fallback_service(
            ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
        ),
        None => app.fallback(application_handlers::not_found),
    };

    app.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors_layer(&config.cors))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let _guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(if config.development { "development" } else { "production" }.into()),
                ..Default::default()
            },
        ))
    });

    let store: Arc<dyn ApplicationStore> = match &config.supabase {
        Some(supabase) => {
            let store = SupabaseStore::new(supabase)?;
            info!("Supabase table endpoint: {}", store.endpoint());
            Arc::new(store)
        }
        None => Arc::new(InMemoryStore::new()),
    };
    info!("Storing applications in the {} store", store.describe());

    let state = Arc::new(AppState::new(store, &config));

    let _scheduler = jobs::scheduler::start_scheduler(state.clone())
        .await
        .map_err(|e| anyhow::anyhow!("failed to start scheduler: {:?}", e))?;

    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Backend listening on http://{}", config.bind_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
