//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the store, registry, method table and gateway from config
//! - Bind the listener and register before serving any traffic
//! - Tie registration and drain to the shutdown signal
//!
//! # Design Decisions
//! - Fail fast: any startup error, registration included, is fatal
//! - `serve` takes an already bound listener so tests can use port 0

use std::net::AddrParseError;
use std::sync::Arc;

use crate::config::{MeshConfig, ObservabilityConfig, RegistryBackend, RegistryConfig, TracerKind};
use crate::gateway::GatewayBuilder;
use crate::http::{build_router, MeshServer, ProtocolMux, ServerError};
use crate::lifecycle::{signals, Shutdown};
use crate::net::{Listener, ListenerError};
use crate::observability::{metrics, LogTracer, NoopTracer, Tracer};
use crate::registry::{CoordinationStore, EtcdStore, MemoryStore, Registry, RegistryError, StoreError};
use crate::rpc::{MethodTable, RpcServer, ServerInterceptors};
use crate::tag::upstream::UpstreamError;
use crate::tag::{self, BlogApi, TagServer, TagService, SERVICE_NAME};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid bind address: {0}")]
    Address(#[from] AddrParseError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("coordination store: {0}")]
    Store(#[from] StoreError),
    #[error("registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("downstream api: {0}")]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

pub fn tracer(config: &ObservabilityConfig) -> Arc<dyn Tracer> {
    match config.tracer {
        TracerKind::Log => Arc::new(LogTracer::new(SERVICE_NAME)),
        TracerKind::Noop => Arc::new(NoopTracer),
    }
}

/// The store named by the registry config. The memory store needs a runtime.
pub fn coordination_store(config: &RegistryConfig) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    Ok(match config.backend {
        RegistryBackend::Memory => Arc::new(MemoryStore::new()),
        RegistryBackend::Etcd => Arc::new(EtcdStore::new(&config.etcd_endpoint, config.request_timeout())?),
    })
}

/// Method table, gateway and router for `service`, behind one mux.
pub fn build_mux(config: &MeshConfig, service: Arc<dyn TagService>, tracer: Arc<dyn Tracer>) -> ProtocolMux {
    let interceptors = ServerInterceptors::new(tracer, config.server.handler_timeout());
    let table = Arc::new(tag::service::register(MethodTable::builder(interceptors), service).build());

    let gateway = tag::service::register_gateway(GatewayBuilder::new(Arc::clone(&table))).build();
    let router = build_router(gateway, config.server.http_timeout());
    ProtocolMux::new(RpcServer::new(table), router)
}

/// Register on `registry`, then serve `listener` until `shutdown` fires.
pub async fn serve(
    config: &MeshConfig,
    listener: Listener,
    registry: &Registry,
    service: Arc<dyn TagService>,
    shutdown: Shutdown,
) -> Result<(), StartupError> {
    let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
    let advertise = config
        .registry
        .advertise_address
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", local_addr.port()));

    let mux = build_mux(config, service, tracer(&config.observability));

    let registration = registry
        .register(SERVICE_NAME, &advertise, config.registry.lease_ttl())
        .await?;
    tracing::info!(
        service = SERVICE_NAME,
        address = %advertise,
        key = %registration.key(),
        ttl = ?config.registry.lease_ttl(),
        "Service registered"
    );

    let mut deregister_on = shutdown.subscribe();
    let deregister = tokio::spawn(async move {
        let _ = deregister_on.recv().await;
        registration.close().await
    });

    let server = MeshServer::new(mux, config.server.drain_timeout());
    let served = server.run(listener, shutdown.subscribe()).await;

    // The server can only stop on its own because of an error; make sure
    // the registration goes away in that case too.
    shutdown.trigger();
    match deregister.await {
        Ok(Ok(())) => tracing::info!(service = SERVICE_NAME, "Service deregistered"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Failed to deregister"),
        Err(e) => tracing::warn!(error = %e, "Deregistration task failed"),
    }
    served?;
    Ok(())
}

/// Full server startup from config, until a termination signal.
pub async fn start(config: MeshConfig) -> Result<(), StartupError> {
    let observability = &config.observability;
    if observability.metrics_enabled {
        match observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = coordination_store(&config.registry)?;
    let registry = Registry::new(store, config.registry.namespace.clone());
    let api = BlogApi::new(&config.downstream.base_url, config.downstream.timeout())?;
    let service: Arc<dyn TagService> = Arc::new(TagServer::new(api));

    let listener = Listener::bind(config.server.socket_addr()?, config.server.max_connections).await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    serve(&config, listener, &registry, service, shutdown).await
}
