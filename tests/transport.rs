mod common;

use std::{
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use artifact_cache::{
    client::{Body, GitHubClient, Page as _},
    error::{ErrorKind, ResolveError, Step, TransportError},
    framework::RetryPolicy,
    repository::{RepositoryContextError, resolve_cache_repo},
};
use futures::TryStreamExt as _;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

fn client(server: &MockServer, token: Option<&str>) -> GitHubClient {
    GitHubClient::new(
        &server.uri(),
        token.map(str::to_owned),
        RetryPolicy::immediate(2),
    )
    .unwrap()
}

#[tokio::test]
async fn attaches_the_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, Some(common::TOKEN))
        .request(Method::GET, "repos/org/app", &[], None)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn not_found_is_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, None)
        .request(Method::GET, "repos/org/missing", &[], None)
        .await
        .unwrap();

    assert!(response.is_not_found());
    assert!(response.json_if_found::<Value>().unwrap().is_none());
}

#[tokio::test]
async fn retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, None)
        .request(Method::GET, "repos/org/app", &[], None)
        .await
        .unwrap();

    assert_eq!(response.json::<Value>().unwrap()["id"], 1);
}

#[tokio::test]
async fn retries_rate_limits_with_the_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("retry-after", "0")
                .set_body_json(json!({ "message": "API rate limit exceeded" })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, None)
        .request(Method::GET, "repos/org/app", &[], None)
        .await;

    assert!(response.is_ok());
}

#[tokio::test]
async fn retries_secondary_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/org/catalog/releases"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("retry-after", "0")
                .insert_header("x-ratelimit-remaining", "4000")
                .set_body_json(json!({ "message": "You have exceeded a secondary rate limit" })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/org/catalog/releases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let body = Body::Json(json!({ "tag_name": "app-artifacts" }));
    let response = client(&server, Some(common::TOKEN))
        .request(Method::POST, "repos/org/catalog/releases", &[], Some(&body))
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn exhausted_secondary_rate_limits_are_transport_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/org/catalog/releases"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("retry-after", "0")
                .insert_header("x-ratelimit-remaining", "4000")
                .set_body_json(json!({ "message": "You have exceeded a secondary rate limit" })),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server, Some(common::TOKEN))
        .request(Method::POST, "repos/org/catalog/releases", &[], None)
        .await
        .unwrap_err();
    let err = ResolveError::transport(Step::ReleaseCreation)(err);

    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn retries_dropped_connections() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU8::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let client =
        GitHubClient::new(&format!("http://{addr}"), None, RetryPolicy::immediate(3)).unwrap();
    let err = client
        .request(Method::GET, "repos/org/app", &[], None)
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Network { .. }), "{err}");
    assert_eq!(accepted.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn gives_up_after_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server, None)
        .request(Method::GET, "repos/org/app", &[], None)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/repos/org/catalog/releases"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({ "message": "Validation Failed", "errors": [{ "code": "already_exists" }] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, Some(common::TOKEN))
        .request(Method::POST, "repos/org/catalog/releases", &[], None)
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(matches!(err, TransportError::Status { ref message, .. } if message == "Validation Failed"));
}

#[tokio::test]
async fn pages_are_fetched_lazily() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/catalog/releases"))
        .and(query_param("per_page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(
                        r#"<{}/repositories/9/releases?page=2>; rel="next", <{}/repositories/9/releases?page=3>; rel="last""#,
                        server.uri(),
                        server.uri()
                    )
                    .as_str(),
                )
                .set_body_json(json!([{ "id": 1 }, { "id": 2 }])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/9/releases"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 3 }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repositories/9/releases"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, None);
    let params = [("per_page", String::from("2"))];
    let mut pages = pin!(client.pages::<Vec<Value>>("repos/org/catalog/releases", &params));

    let first = pages.try_next().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    let second = pages.try_next().await.unwrap().unwrap();
    assert_eq!(second[0]["id"], 3);

    // The second page announces no `next` link, so the listing ends here.
    assert!(pages.try_next().await.unwrap().is_none());
}

#[tokio::test]
async fn missing_collections_list_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/app/actions/workflows/missing.yml/runs"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, None);
    let pages: Vec<Vec<Value>> = client
        .pages::<Vec<Value>>("repos/org/app/actions/workflows/missing.yml/runs", &[])
        .try_collect()
        .await
        .unwrap();

    assert!(pages.is_empty());
}

#[tokio::test]
async fn canonicalizes_the_cache_repository() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/org/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 9,
            "full_name": "Org/Catalog",
            "default_branch": "main",
            "permissions": { "admin": false, "push": true, "pull": true },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, Some(common::TOKEN));
    let repo = resolve_cache_repo(&client, Some("org/catalog"))
        .await
        .unwrap();
    assert_eq!(repo.as_str(), "Org/Catalog");

    let err = resolve_cache_repo(&client, None).await.unwrap_err();
    assert!(matches!(err, RepositoryContextError::Unconfigured));
}

#[test]
fn vectors_are_pages() {
    let items = vec![json!({ "id": 1 })].into_items();
    assert_eq!(items.len(), 1);
}
