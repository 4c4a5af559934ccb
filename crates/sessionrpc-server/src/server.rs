//! HTTP server implementation using Axum.

use crate::handler::{handle_call, handle_handshake, handle_health};
use crate::protocol::{WireBody, RESERVED_PREFIXES};
use crate::push::handle_push;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName},
    routing::{get, post},
    Json, Router,
};
use sessionrpc_core::{Dispatcher, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Build the router: one `POST` route per endpoint method, one handshake
/// route per callable interface, the push socket and a health check.
pub fn build_router(dispatcher: Arc<Dispatcher>) -> anyhow::Result<Router> {
    let registry = dispatcher.registry();
    for reserved in RESERVED_PREFIXES {
        if registry.contains_prefix(reserved) {
            anyhow::bail!("Prefix /{} is reserved by the server", reserved);
        }
    }

    let mut router: Router<Arc<AppState>> = Router::new()
        .route("/health", get(handle_health))
        .route(TransportConfig::PUSH_PATH, get(handle_push));

    for route in dispatcher.routes() {
        let prefix = route.prefix.clone();
        let method = route.method;
        router = router.route(
            &route.path(),
            post(
                move |State(state): State<Arc<AppState>>,
                      headers: HeaderMap,
                      Json(body): Json<WireBody>| {
                    handle_call(state, headers, body, prefix, method)
                },
            ),
        );
    }

    for interface in registry.interfaces() {
        let prefix = interface.prefix.clone();
        router = router.route(
            &format!("/{}", interface.prefix),
            post(
                move |State(state): State<Arc<AppState>>, headers: HeaderMap| {
                    handle_handshake(state, headers, prefix)
                },
            ),
        );
    }

    // Configure CORS for browser clients; they need to read the session header.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(TransportConfig::SESSION_HEADER)]);

    let state = Arc::new(AppState { dispatcher });
    Ok(router
        .layer(DefaultBodyLimit::max(TransportConfig::MAX_MESSAGE_SIZE))
        .layer(ConcurrencyLimitLayer::new(TransportConfig::MAX_IN_FLIGHT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Start the HTTP and push server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    dispatcher: Arc<Dispatcher>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(dispatcher)?;

    // Parse the address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    // Bind to the address
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    // Spawn the server in the background
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use sessionrpc_core::{
        DispatcherConfig, EndpointRegistry, LogConfig, MemorySessionStore, RemoteInterface,
    };

    sessionrpc_core::remote_interface! {
        pub struct Probe {
            fn ping();
        }
    }

    #[tokio::test]
    async fn test_server_starts() {
        let dispatcher = demo::build_dispatcher(
            Arc::new(MemorySessionStore::new()),
            DispatcherConfig::default(),
        )
        .unwrap();

        let addr = start_server(Arc::new(dispatcher), "127.0.0.1", 0)
            .await
            .unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn test_reserved_prefix_rejected() {
        let mut registry = EndpointRegistry::new();
        registry
            .register_callable_interface::<Probe>("push", None)
            .unwrap();
        let dispatcher = Dispatcher::builder(registry, Arc::new(MemorySessionStore::new()))
            .log(LogConfig::quiet())
            .build()
            .unwrap();

        assert!(build_router(Arc::new(dispatcher)).is_err());
        assert_eq!(Probe::METHODS, &["ping"]);
    }
}
