//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the site API, admin API and static fallback
//! - Wrap it in the request-defense pipeline and request tracing
//! - Serve with graceful shutdown and background maintenance

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::admin::{self, AdminState};
use crate::api::{self, notify::LoggingNotifier, notify::Notifier, storage::MemoryStorage, ApiState};
use crate::config::{CorsConfig, SiteConfig};
use crate::http::request::X_API_KEY;
use crate::http::response::ApiError;
use crate::lifecycle::maintenance::spawn_maintenance;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::SecurityEventLog;
use crate::security::SecurityPipeline;

/// Interval between purges of expired counters and blocks.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// The site server: API routes behind the security pipeline.
pub struct SiteServer {
    router: Router,
    config: SiteConfig,
    pipeline: SecurityPipeline,
    events: Arc<SecurityEventLog>,
    storage: Arc<MemoryStorage>,
}

impl SiteServer {
    pub fn new(config: SiteConfig) -> Self {
        Self::with_notifier(config, Arc::new(LoggingNotifier))
    }

    pub fn with_notifier(config: SiteConfig, notifier: Arc<dyn Notifier>) -> Self {
        let events = Arc::new(SecurityEventLog::default());
        let pipeline = SecurityPipeline::from_config(&config, events.clone());
        let storage = Arc::new(MemoryStorage::new());

        let api_state = ApiState {
            storage: storage.clone(),
            notifier,
            events: events.clone(),
        };
        let admin_state = AdminState {
            pipeline: pipeline.clone(),
            events: events.clone(),
            started_at: Instant::now(),
        };

        let router = Self::build_router(&config, &pipeline, api_state, admin_state);
        Self {
            router,
            config,
            pipeline,
            events,
            storage,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        config: &SiteConfig,
        pipeline: &SecurityPipeline,
        api_state: ApiState,
        admin_state: AdminState,
    ) -> Router {
        let mut app = Router::new()
            .route("/health", get(health))
            .merge(api::setup_api_router(api_state, &config.csp.report_uri));
        if config.admin.enabled {
            app = app.nest("/api/admin", admin::setup_admin_router(admin_state));
        }
        let app = match &config.static_dir {
            Some(dir) => app.fallback_service(ServeDir::new(dir)),
            None => app.fallback(not_found),
        };

        pipeline
            .wrap(app, cors_layer(&config.cors))
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router. Requests must carry `ConnectInfo<SocketAddr>`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pipeline(&self) -> &SecurityPipeline {
        &self.pipeline
    }

    pub fn events(&self) -> &Arc<SecurityEventLog> {
        &self.events
    }

    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = ?self.config.environment,
            strict = self.config.security.strict,
            "HTTP server starting"
        );

        let maintenance =
            spawn_maintenance(self.pipeline.clone(), MAINTENANCE_INTERVAL, shutdown.subscribe());

        let mut stop = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await?;

        let _ = maintenance.await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(X_API_KEY),
        ])
        .max_age(Duration::from_secs(600))
}
