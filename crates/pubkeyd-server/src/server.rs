use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use pubkeyd_core::{DirectoryProvider, KeyCache, KeyFetcher, RefreshCoordinator, Resolver};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::middleware::{self as app_middleware, AccessToken};
use crate::providers::{GitHubKeys, OneLoginDirectory};
use crate::{config::AppConfig, handlers};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Resolver,
}

impl AppState {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let key_token = AccessToken::new(cfg.auth.token());
    let refresh_token = AccessToken::new(cfg.auth.refresh_token());

    let key_routes = Router::new()
        .route(
            "/authorized_keys/{id}",
            get(handlers::get_authorized_keys).delete(handlers::delete_authorized_keys),
        )
        .route(
            "/role_authorized_keys/{role}",
            get(handlers::get_role_authorized_keys),
        )
        .route("/github_name/{id}", get(handlers::get_github_name))
        .route_layer(middleware::from_fn_with_state(
            key_token,
            app_middleware::require_token,
        ));

    let refresh_routes = Router::new()
        .route("/refresh", get(handlers::refresh).post(handlers::refresh))
        .route_layer(middleware::from_fn_with_state(
            refresh_token,
            app_middleware::require_token,
        ));

    Router::new()
        // Always open
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(key_routes)
        .merge(refresh_routes)
        .with_state(state)
        // Outermost first: request id -> trace -> timeout
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(app_middleware::request_id))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &axum::http::Request<_>| {
                            use tracing::field::Empty;
                            let req_id = req
                                .extensions()
                                .get::<axum::http::HeaderValue>()
                                .and_then(|v| v.to_str().ok())
                                .unwrap_or("")
                                .to_string();
                            tracing::info_span!(
                                "http.request",
                                http.method = %req.method(),
                                http.target = %req.uri().path(),
                                http.status_code = Empty,
                                request_id = %req_id
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
                .layer(TimeoutLayer::new(cfg.server.request_timeout())),
        )
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    directory: Option<Arc<dyn DirectoryProvider>>,
    keys: Option<Arc<dyn KeyFetcher>>,
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
            directory: None,
            keys: None,
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

    /// Use `provider` instead of the configured OneLogin directory.
    pub fn with_directory_provider(mut self, provider: Arc<dyn DirectoryProvider>) -> Self {
        self.directory = Some(provider);
        self
    }

    /// Use `fetcher` instead of the configured GitHub key source.
    pub fn with_key_fetcher(mut self, fetcher: Arc<dyn KeyFetcher>) -> Self {
        self.keys = Some(fetcher);
        self
    }

    /// Construct providers and load the directory.
    ///
    /// # Errors
    ///
    /// Fails if a provider cannot be constructed or the initial directory
    /// load fails; the server must not start without a directory.
    pub async fn build(self) -> anyhow::Result<PubkeydServer> {
        let directory: Arc<dyn DirectoryProvider> = match self.directory {
            Some(provider) => provider,
            None => Arc::new(OneLoginDirectory::new(&self.config.onelogin)?),
        };
        let keys: Arc<dyn KeyFetcher> = match self.keys {
            Some(fetcher) => fetcher,
            None => Arc::new(GitHubKeys::new(&self.config.keys)?),
        };

        let coordinator =
            RefreshCoordinator::bootstrap(directory, self.config.refresh.to_refresh_config())
                .await?;
        let cache = KeyCache::new(keys, self.config.keys.to_cache_config());
        let state = AppState::new(Resolver::new(Arc::new(coordinator), cache));

        Ok(PubkeydServer {
            addr: self.addr,
            app: build_app(state.clone(), &self.config),
            state,
            shutdown: CancellationToken::new(),
        })
    }
}

pub struct PubkeydServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
    shutdown: CancellationToken,
}

impl PubkeydServer {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Token that stops the server and its background tasks when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn run_on(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let refresh_task = self.state.resolver.directory().spawn(self.shutdown.child_token());
        let sweep_task = self
            .state
            .resolver
            .key_cache()
            .spawn_sweeper(self.shutdown.child_token());

        tracing::info!("listening on {}", listener.local_addr()?);
        let shutdown = self.shutdown.clone();
        let served = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal(shutdown))
            .await;

        self.shutdown.cancel();
        let _ = tokio::join!(refresh_task, sweep_task);
        served?;
        Ok(())
    }
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        _ = token.cancelled() => tracing::info!("shutdown requested"),
    }
}
