//! Registration, resolution and load-balanced calls through the registry.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tag_mesh::config::{ClientConfig, RetryConfig};
use tag_mesh::observability::NoopTracer;
use tag_mesh::registry::{MemoryStore, Registry};
use tag_mesh::tag::{GetTagListRequest, TagServiceClient, SERVICE_NAME};

mod common;
use common::{memory_registry, reply_with, start_server, test_config, wait_for, ScriptedTags};

fn named(name: &'static str) -> Arc<ScriptedTags> {
    ScriptedTags::new(move |_req| async move { Ok(reply_with(&[name])) })
}

#[tokio::test]
async fn client_calls_a_server_found_through_the_registry() {
    let registry = memory_registry();
    let server = start_server(test_config(), registry.clone(), ScriptedTags::echo()).await;

    let client = TagServiceClient::connect(&ClientConfig::default(), &registry, Arc::new(NoopTracer))
        .await
        .unwrap();
    let reply = client
        .get_tag_list(GetTagListRequest {
            name: "found".into(),
            state: 1,
        })
        .await
        .unwrap();
    assert_eq!(reply.tags[0].name, "found");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn calls_are_spread_over_registered_instances() {
    let registry = memory_registry();
    let a = start_server(test_config(), registry.clone(), named("a")).await;
    let b = start_server(test_config(), registry.clone(), named("b")).await;

    let client = TagServiceClient::connect(&ClientConfig::default(), &registry, Arc::new(NoopTracer))
        .await
        .unwrap();
    let mut seen = HashSet::new();
    for _ in 0..4 {
        let reply = client.get_tag_list(GetTagListRequest::default()).await.unwrap();
        seen.insert(reply.tags[0].name.clone());
    }
    assert_eq!(seen, HashSet::from(["a".to_owned(), "b".to_owned()]));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_server_is_deregistered_and_clients_follow() {
    let registry = memory_registry();
    let a = start_server(test_config(), registry.clone(), named("a")).await;
    let b = start_server(test_config(), registry.clone(), named("b")).await;
    let stopped = a.addr.to_string();

    let client = TagServiceClient::connect(&ClientConfig::default(), &registry, Arc::new(NoopTracer))
        .await
        .unwrap();
    a.stop().await.unwrap();

    let resolved = registry.resolver().resolve(SERVICE_NAME).await.unwrap();
    assert!(!resolved.contains(&stopped));

    wait_for(|| {
        let pool = Arc::clone(client.pool());
        let stopped = stopped.clone();
        async move { pool.endpoints().iter().all(|e| e.address() != stopped) }
    })
    .await;

    for _ in 0..3 {
        let reply = client.get_tag_list(GetTagListRequest::default()).await.unwrap();
        assert_eq!(reply.tags[0].name, "b");
    }

    b.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lapsed_lease_disappears_only_after_its_ttl() {
    let registry = Registry::new(Arc::new(MemoryStore::new()), "test");
    let handle = registry
        .register(SERVICE_NAME, "10.0.0.9:8004", Duration::from_secs(2))
        .await
        .unwrap();
    // Dropping the handle stops the keep-alives without revoking.
    drop(handle);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let set = registry.resolver().resolve(SERVICE_NAME).await.unwrap();
    assert!(set.contains("10.0.0.9:8004"));

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let set = registry.resolver().resolve(SERVICE_NAME).await.unwrap();
    assert!(!set.contains("10.0.0.9:8004"));
}

#[tokio::test]
async fn registration_failure_is_fatal() {
    let registry = memory_registry();
    let mut config = test_config();
    config.registry.advertise_address = Some(String::new());

    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = tag_mesh::net::Listener::from_tcp(tcp, 16);
    let result = tag_mesh::lifecycle::serve(
        &config,
        listener,
        &registry,
        ScriptedTags::echo(),
        tag_mesh::Shutdown::new(),
    )
    .await;
    assert!(matches!(result, Err(tag_mesh::lifecycle::StartupError::Registry(_))));
}

#[tokio::test]
async fn dead_static_target_is_used_again_once_it_comes_up() {
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let config = ClientConfig {
        targets: vec![addr.to_string()],
        connect_timeout_ms: 200,
        unhealthy_cooldown_ms: 200,
        retry: RetryConfig {
            max_attempts: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let client = TagServiceClient::connect(&config, &memory_registry(), Arc::new(NoopTracer))
        .await
        .unwrap();

    for _ in 0..config.unhealthy_threshold {
        let err = client.get_tag_list(GetTagListRequest::default()).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }
    assert!(!client.pool().endpoints()[0].is_available());

    let listener = tag_mesh::net::Listener::bind(addr, 16).await.unwrap();
    let shutdown = tag_mesh::Shutdown::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        tag_mesh::lifecycle::serve(&test_config(), listener, &memory_registry(), named("back"), server_shutdown).await
    });

    // No active monitor: the endpoint comes back through a trial call after its cooldown.
    wait_for(|| {
        let client = client.clone();
        async move { client.get_tag_list(GetTagListRequest::default()).await.is_ok() }
    })
    .await;
    let reply = client.get_tag_list(GetTagListRequest::default()).await.unwrap();
    assert_eq!(reply.tags[0].name, "back");
    assert!(client.pool().endpoints()[0].is_available());

    shutdown.trigger();
    server.await.unwrap().unwrap();
}
