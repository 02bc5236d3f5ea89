//! HTTP/JSON gateway end to end.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tonic::Status;

use tag_mesh::config::MeshConfig;
use tag_mesh::rpc::status::GET_TAG_LIST_FAIL;
use tag_mesh::tag::{BlogApi, TagServer, TagService};

mod common;
use common::{http_client, memory_registry, reply_with, start_mock_blog, start_server, test_config, ScriptedTags};

fn blog_service(base_url: &str) -> Arc<dyn TagService> {
    Arc::new(TagServer::new(BlogApi::new(base_url, Duration::from_secs(2)).unwrap()))
}

#[tokio::test]
async fn get_returns_the_reply_as_json() {
    let service = ScriptedTags::new(|_req| async { Ok(reply_with(&["Go", "Rust"])) });
    let server = start_server(test_config(), memory_registry(), service).await;

    let res = http_client()
        .get(server.url("/api/v1/tags?name=Go&state=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tags"].as_array().unwrap().len(), 2);
    assert_eq!(body["tags"][1]["name"], "Rust");
    assert_eq!(body["pager"]["total_rows"], 2);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn post_decodes_a_json_body() {
    let server = start_server(test_config(), memory_registry(), ScriptedTags::echo()).await;

    let res = http_client()
        .post(server.url("/api/v1/tags"))
        .json(&json!({"name": "posted", "state": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tags"][0]["name"], "posted");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_input_is_invalid_argument() {
    let server = start_server(test_config(), memory_registry(), ScriptedTags::echo()).await;

    let res = http_client()
        .get(server.url("/api/v1/tags?state=not-a-number"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], 3);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn handler_timeout_is_gateway_timeout() {
    let mut config: MeshConfig = test_config();
    config.server.handler_timeout_ms = 100;
    let service = ScriptedTags::new(|_req| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(reply_with(&[]))
    });
    let server = start_server(config, memory_registry(), service).await;

    let res = http_client().get(server.url("/api/v1/tags")).send().await.unwrap();
    assert_eq!(res.status(), 504);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"code": 4, "message": "deadline exceeded"}));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn grpc_timeout_header_bounds_a_gateway_call() {
    let service = ScriptedTags::new(|_req| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(reply_with(&[]))
    });
    let server = start_server(test_config(), memory_registry(), service).await;

    let res = http_client()
        .get(server.url("/api/v1/tags"))
        .header("grpc-timeout", "100m")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn structured_detail_overrides_code_and_message() {
    let service = ScriptedTags::new(|_req| async { Err::<_, Status>(GET_TAG_LIST_FAIL.to_status()) });
    let server = start_server(test_config(), memory_registry(), service).await;

    let res = http_client().get(server.url("/api/v1/tags")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"code": 20010001, "message": "failed to get tag list"}));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn tag_server_reads_the_blog_api() {
    let blog = start_mock_blog().await;
    let service = blog_service(&format!("http://{blog}"));
    let server = start_server(test_config(), memory_registry(), service).await;

    let res = http_client()
        .get(server.url("/api/v1/tags?name=Go"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tags"][0]["id"], 7);
    assert_eq!(body["tags"][0]["name"], "Go-tag");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn unreachable_blog_api_is_a_business_error() {
    let service = blog_service("http://127.0.0.1:1");
    let server = start_server(test_config(), memory_registry(), service).await;

    let res = http_client().get(server.url("/api/v1/tags")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], 20010001);

    server.stop().await.unwrap();
}
