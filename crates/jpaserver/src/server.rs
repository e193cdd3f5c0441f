use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use jpaserver_search::{ResourceDao, SearchParamRegistry};
use jpaserver_subscription::InMemorySubscriptionDao;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub resources: Arc<ResourceDao>,
    pub subscriptions: Arc<InMemorySubscriptionDao>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let resources = Arc::new(ResourceDao::new(
            Arc::new(SearchParamRegistry::with_defaults()),
            config.search.clone(),
        ));
        let subscriptions = Arc::new(
            InMemorySubscriptionDao::new(resources.clone())
                .with_queue_limit(config.subscriptions.max_queued_resources),
        );
        Self {
            resources,
            subscriptions,
            config,
        }
    }
}

pub struct JpaServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        .route("/health", get(handlers::health))
        // Subscription notifications
        .route("/websocket", get(handlers::subscription_websocket))
        .route(
            "/fhir/{resource_type}",
            get(handlers::search_resource).post(handlers::create_resource),
        )
        .route(
            "/fhir/{resource_type}/{id}",
            get(handlers::read_resource)
                .put(handlers::update_resource)
                .delete(handlers::delete_resource),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<axum::body::Body>| {
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri(),
                                http.status_code = tracing::field::Empty,
                            )
                        })
                        .on_response(
                            |res: &axum::http::Response<_>,
                             latency: std::time::Duration,
                             span: &tracing::Span| {
                                span.record(
                                    "http.status_code",
                                    tracing::field::display(res.status().as_u16()),
                                );
                                tracing::info!(
                                    http.status = %res.status().as_u16(),
                                    elapsed_ms = %latency.as_millis(),
                                    "request handled"
                                );
                            },
                        ),
                )
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub fn build(self) -> JpaServer {
        let app = build_app(AppState::new(self.config));
        JpaServer {
            addr: self.addr,
            app,
        }
    }
}

impl JpaServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
