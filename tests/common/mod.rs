//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::Query, routing::get, Json, Router};
use futures_util::future::{BoxFuture, FutureExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::Status;

use tag_mesh::config::{ClientConfig, MeshConfig, TracerKind};
use tag_mesh::lifecycle::{self, Shutdown, StartupError};
use tag_mesh::net::Listener;
use tag_mesh::observability::NoopTracer;
use tag_mesh::registry::{MemoryStore, Registry};
use tag_mesh::rpc::CallContext;
use tag_mesh::tag::{GetTagListReply, GetTagListRequest, Pager, Tag, TagService, TagServiceClient, SERVICE_NAME};

/// Config for in-process servers: fast timeouts, quiet tracer.
pub fn test_config() -> MeshConfig {
    let mut config = MeshConfig::default();
    config.server.bind_address = "127.0.0.1".to_owned();
    config.server.port = 0;
    config.server.handler_timeout_ms = 2_000;
    config.server.drain_timeout_secs = 5;
    config.registry.lease_ttl_secs = 5;
    config.observability.tracer = TracerKind::Noop;
    config
}

pub fn memory_registry() -> Registry {
    Registry::new(Arc::new(MemoryStore::new()), "test")
}

/// A mesh server running in the background.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), StartupError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) -> Result<(), StartupError> {
        self.shutdown.trigger();
        self.task.await.expect("server task panicked")
    }
}

/// Bind an ephemeral port and serve `service`, registered on `registry`.
/// Returns once the registration is visible.
pub async fn start_server(
    config: MeshConfig,
    registry: Registry,
    service: Arc<dyn TagService>,
) -> TestServer {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let listener = Listener::from_tcp(tcp, config.server.max_connections);

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    let server_registry = registry.clone();
    let task = tokio::spawn(async move {
        lifecycle::serve(&config, listener, &server_registry, service, server_shutdown).await
    });

    let advertised = addr.to_string();
    wait_for(|| {
        let registry = registry.clone();
        let advertised = advertised.clone();
        async move {
            registry
                .resolver()
                .resolve(SERVICE_NAME)
                .await
                .map(|set| set.contains(&advertised))
                .unwrap_or(false)
        }
    })
    .await;

    TestServer {
        addr,
        shutdown,
        task,
    }
}

/// Poll `check` every 10ms for up to 5s.
pub async fn wait_for<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

/// gRPC client straight at `addr`.
pub async fn direct_client(addr: SocketAddr) -> TagServiceClient {
    let config = ClientConfig {
        targets: vec![addr.to_string()],
        ..Default::default()
    };
    TagServiceClient::connect(&config, &memory_registry(), Arc::new(NoopTracer))
        .await
        .unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

type Behavior = dyn Fn(GetTagListRequest) -> BoxFuture<'static, Result<GetTagListReply, Status>> + Send + Sync;

/// `TagService` whose answer is given by a closure.
pub struct ScriptedTags {
    behavior: Box<Behavior>,
}

impl ScriptedTags {
    pub fn new<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(GetTagListRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetTagListReply, Status>> + Send + 'static,
    {
        Arc::new(Self {
            behavior: Box::new(move |req| f(req).boxed()),
        })
    }

    /// Echoes the requested name back as a single tag.
    pub fn echo() -> Arc<Self> {
        Self::new(|req| async move { Ok(reply_with(&[req.name.as_str()])) })
    }
}

#[async_trait]
impl TagService for ScriptedTags {
    async fn get_tag_list(
        &self,
        _ctx: CallContext,
        request: GetTagListRequest,
    ) -> Result<GetTagListReply, Status> {
        (self.behavior)(request).await
    }
}

pub fn reply_with(names: &[&str]) -> GetTagListReply {
    GetTagListReply {
        tags: names
            .iter()
            .enumerate()
            .map(|(i, name)| Tag {
                id: i as i64 + 1,
                name: (*name).to_owned(),
                state: 1,
            })
            .collect(),
        pager: Some(Pager {
            page: 1,
            page_size: 10,
            total_rows: names.len() as i64,
        }),
    }
}

/// The blog API the real `TagServer` reads from: `GET /api/v1/tags`.
pub async fn start_mock_blog() -> SocketAddr {
    #[derive(serde::Deserialize)]
    struct Params {
        #[serde(default)]
        name: String,
    }

    let app = Router::new().route(
        "/api/v1/tags",
        get(|Query(params): Query<Params>| async move {
            Json(serde_json::json!({
                "list": [
                    {"id": 7, "name": format!("{}-tag", params.name), "state": 1}
                ],
                "pager": {"page": 1, "page_size": 10, "total_rows": 1}
            }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
