//! HTTP serving subsystem.
//!
//! # Responsibilities
//! - Collect routes contributed by modules into one Axum router
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve on the configured listener with graceful shutdown

use std::time::Duration;

use axum::routing::MethodRouter;
use axum::Router;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::HttpConfig;
use crate::registry::{Capability, Module};
use crate::serve::{Listen, ServeError, Subsystem};

/// The external handle HTTP modules register their routes on.
#[derive(Default)]
pub struct HttpRouter {
    router: Router,
    routes: usize,
}

impl HttpRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. Panics like `axum::Router::route` on conflicting paths;
    /// the orchestrator reports that as a dispatch failure.
    pub fn route(&mut self, path: &str, method_router: MethodRouter) -> &mut Self {
        self.router = std::mem::take(&mut self.router).route(path, method_router);
        self.routes += 1;
        self
    }

    /// Merge a whole router built by the module.
    pub fn merge(&mut self, other: Router) -> &mut Self {
        self.router = std::mem::take(&mut self.router).merge(other);
        self.routes += 1;
        self
    }

    /// Mount a router under a path prefix.
    pub fn nest(&mut self, path: &str, other: Router) -> &mut Self {
        self.router = std::mem::take(&mut self.router).nest(path, other);
        self.routes += 1;
        self
    }

    /// Number of `route`/`merge`/`nest` calls made.
    pub fn route_count(&self) -> usize {
        self.routes
    }

    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Serves every module implementing [`ServesHttp`](crate::registry::ServesHttp).
pub struct HttpSubsystem {
    listen: Listen,
    request_timeout: Duration,
    router: HttpRouter,
    bindings: usize,
}

impl HttpSubsystem {
    pub fn new(listen: impl Into<Listen>) -> Self {
        Self {
            listen: listen.into(),
            request_timeout: Duration::from_secs(30),
            router: HttpRouter::new(),
            bindings: 0,
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(config.bind_address.clone())
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(router: HttpRouter, timeout: Duration) -> Router {
        router
            .into_router()
            .layer(TimeoutLayer::new(timeout))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }
}

impl Subsystem for HttpSubsystem {
    fn capability(&self) -> Capability {
        Capability::Http
    }

    fn bind(&mut self, module: &dyn Module) {
        if let Some(http) = module.as_http() {
            http.serve_http(&mut self.router);
            self.bindings += 1;
        }
    }

    fn bindings(&self) -> usize {
        self.bindings
    }

    fn serve(self: Box<Self>, shutdown: CancellationToken) -> BoxFuture<'static, Result<(), ServeError>> {
        let this = *self;
        Box::pin(async move {
            let listener = this.listen.into_listener().await?;
            let addr = listener.local_addr()?;
            tracing::info!(
                address = %addr,
                modules = this.bindings,
                routes = this.router.route_count(),
                "HTTP server starting"
            );

            let app = Self::build_router(this.router, this.request_timeout);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;

            tracing::info!("HTTP server stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_collects_routes_with_request_id() {
        let mut router = HttpRouter::new();
        router.route("/ping", get(|| async { "pong" }));
        router.nest("/v1", Router::new().route("/hello", get(|| async { "hi" })));
        assert_eq!(router.route_count(), 2);

        let app = HttpSubsystem::build_router(router, Duration::from_secs(5));

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));

        let res = app
            .oneshot(Request::builder().uri("/v1/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let subsystem = Box::new(HttpSubsystem::new(listener));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(subsystem.serve(shutdown.clone()));
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
