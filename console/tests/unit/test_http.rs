//! Console API routes over the fake fleet

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use console_api::{CacheServerSummary, ErrorResponse, SubmitJobResponse};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use clusterctl::jobs::runner::JobRunner;
use clusterctl::server::serve::router;
use clusterctl::server::state::ServerState;
use clusterctl::storage::store::Records;

use crate::fakes::{server, Fleet};

fn app(fleet: &Fleet) -> Router {
    let runner = Arc::new(JobRunner::new(fleet.orchestrator.clone(), 1));
    router(Arc::new(ServerState::new(runner, fleet.orchestrator.clone())))
}

fn fleet() -> Fleet {
    let mut provider = server(1, "ldap-1.example.org", "10.0.6.1", true);
    provider.mmr = true;
    let mut consumer = server(2, "ldap-2.example.org", "10.0.6.2", false);
    consumer.mmr = true;
    Fleet::new(Records {
        servers: vec![provider, consumer],
        ..Default::default()
    })
}

async fn call(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_submit_job_is_accepted() {
    let fleet = fleet();
    let (status, body) = call(
        app(&fleet),
        Method::POST,
        "/jobs",
        Some(serde_json::json!({"procedure": "remove_log_shipping"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    let submitted: SubmitJobResponse = parse(&body);
    assert_eq!(submitted.procedure, "remove_log_shipping");
}

#[tokio::test]
async fn test_removal_of_a_provider_is_a_conflict() {
    let fleet = fleet();
    fleet.world().providers.insert(
        "ldap-2.example.org".to_string(),
        vec!["ldap-1.example.org".to_string()],
    );

    let (status, body) = call(app(&fleet), Method::POST, "/replication/1/remove", None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    let error: ErrorResponse = parse(&body);
    assert_eq!(
        error.message,
        "This server is a provider for Ldap Server ldap-2.example.org. \
         Please first remove this server as provider."
    );
    assert!(fleet.world().position("remove_providers").is_none());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let fleet = fleet();
    let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
    let (status, _) = call(app(&fleet), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_registering_a_cache_server() {
    let fleet = fleet();
    let (status, body) = call(
        app(&fleet),
        Method::POST,
        "/cache-servers",
        Some(serde_json::json!({"hostname": "cache-1.example.org", "ip": "10.0.6.9"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let created: CacheServerSummary = parse(&body);
    assert_eq!(created.id, 1);
    assert!(created.primary);
    assert!(!String::from_utf8_lossy(&body).contains("redis_password"));

    let (status, _) = call(
        app(&fleet),
        Method::POST,
        "/cache-servers",
        Some(serde_json::json!({"hostname": "cache-2.example.org", "ip": "not an ip"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_new_primary_cache_server_replaces_the_old_one() {
    let fleet = fleet();
    for (hostname, ip) in [("cache-1.example.org", "10.0.6.9"), ("cache-2.example.org", "10.0.6.10")] {
        let (status, _) = call(
            app(&fleet),
            Method::POST,
            "/cache-servers",
            Some(serde_json::json!({"hostname": hostname, "ip": ip, "primary": true})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = call(app(&fleet), Method::GET, "/cache-servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<CacheServerSummary> = parse(&body);
    let primaries: Vec<u64> = listed.iter().filter(|c| c.primary).map(|c| c.id).collect();
    assert_eq!(primaries, vec![2]);
}
