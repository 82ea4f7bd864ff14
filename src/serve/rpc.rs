//! RPC serving subsystem.
//!
//! Services are named collections of JSON methods. They are exposed as
//! `POST /rpc/{service}/{method}` on the RPC listener; the body is the JSON
//! parameter value and the response body is the JSON result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::RpcConfig;
use crate::registry::{Capability, Module};
use crate::serve::{Listen, ServeError, Subsystem};

/// Errors returned from an RPC call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unknown service {0:?}")]
    UnknownService(String),

    #[error("unknown method {service}.{method}")]
    UnknownMethod { service: String, method: String },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    fn status(&self) -> StatusCode {
        match self {
            RpcError::UnknownService(_) | RpcError::UnknownMethod { .. } => StatusCode::NOT_FOUND,
            RpcError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            RpcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// A named group of RPC methods.
pub struct RpcService {
    name: String,
    methods: HashMap<String, Handler>,
}

impl RpcService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |params| Box::pin(handler(params)) as BoxFuture<'static, _>));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The external handle RPC modules register their services on.
#[derive(Default)]
pub struct RpcRegistry {
    services: HashMap<String, RpcService>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. A later service with the same name replaces the earlier one.
    pub fn register(&mut self, service: RpcService) -> &mut Self {
        if self.services.contains_key(&service.name) {
            tracing::warn!(service = %service.name, "RPC service registered twice, replacing");
        }
        self.services.insert(service.name.clone(), service);
        self
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Invoke `service.method` in-process.
    pub async fn call(&self, service: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let svc = self
            .services
            .get(service)
            .ok_or_else(|| RpcError::UnknownService(service.to_string()))?;
        let handler = svc.methods.get(method).ok_or_else(|| RpcError::UnknownMethod {
            service: service.to_string(),
            method: method.to_string(),
        })?;
        handler(params).await
    }
}

async fn rpc_handler(
    State(registry): State<Arc<RpcRegistry>>,
    Path((service, method)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, RpcError> {
    let params = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| RpcError::InvalidParams(e.to_string()))?
    };
    tracing::debug!(service = %service, method = %method, "RPC call");
    registry.call(&service, &method, params).await.map(Json)
}

/// Serves every module implementing [`ServesRpc`](crate::registry::ServesRpc).
pub struct RpcSubsystem {
    listen: Listen,
    registry: RpcRegistry,
    bindings: usize,
}

impl RpcSubsystem {
    pub fn new(listen: impl Into<Listen>) -> Self {
        Self {
            listen: listen.into(),
            registry: RpcRegistry::new(),
            bindings: 0,
        }
    }

    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(config.bind_address.clone())
    }

    fn build_router(registry: RpcRegistry) -> Router {
        Router::new()
            .route("/rpc/{service}/{method}", post(rpc_handler))
            .with_state(Arc::new(registry))
            .layer(TraceLayer::new_for_http())
    }
}

impl Subsystem for RpcSubsystem {
    fn capability(&self) -> Capability {
        Capability::Rpc
    }

    fn bind(&mut self, module: &dyn Module) {
        if let Some(rpc) = module.as_rpc() {
            rpc.serve_rpc(&mut self.registry);
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
            tracing::info!(address = %addr, services = this.registry.len(), "RPC server starting");

            let app = Self::build_router(this.registry);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;

            tracing::info!("RPC server stopped");
            Ok(())
        })
    }
}
