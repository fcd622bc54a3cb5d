//! RestPolicyStore against a local mock of the provider API.

use std::time::Duration;

use armor_schemas::{Policy, Rule};
use armor_store::{PolicyStore, RestPolicyStore, StoreError};
use httpmock::prelude::*;
use serde_json::json;

fn store(server: &MockServer) -> RestPolicyStore {
    RestPolicyStore::new_with_base_url(Some("test-token".to_string()), server.url("/compute/v1"))
        .with_poll_interval(Duration::from_millis(1))
}

const POLICIES: &str = "/compute/v1/projects/p1/global/securityPolicies";

#[tokio::test]
async fn get_policy_sends_bearer_token_and_decodes_string_id() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("{POLICIES}/pol-a"))
                .header("authorization", "Bearer test-token");
            then.status(200).json_body(json!({
                "id": "4242",
                "name": "pol-a",
                "fingerprint": "abc=",
                "rules": [{"priority": 10, "action": "allow", "preview": false}]
            }));
        })
        .await;

    let got = store(&server).get_policy("p1", "pol-a").await.unwrap();
    m.assert_async().await;
    assert_eq!(got.id, Some(4242));
    assert_eq!(got.rules.unwrap()[0].priority, Some(10));
}

#[tokio::test]
async fn list_follows_page_tokens() {
    let server = MockServer::start_async().await;
    // The first registered matching mock answers, so the narrower one goes first.
    let second = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(POLICIES)
                .query_param("pageToken", "next-1");
            then.status(200)
                .json_body(json!({"items": [{"name": "pol-b"}]}));
        })
        .await;
    let first = server
        .mock_async(|when, then| {
            when.method(GET).path(POLICIES);
            then.status(200).json_body(json!({
                "items": [{"name": "pol-a"}],
                "nextPageToken": "next-1"
            }));
        })
        .await;

    let got = store(&server).list_policies("p1").await.unwrap();
    first.assert_async().await;
    second.assert_async().await;

    let names: Vec<_> = got.iter().filter_map(|p| p.name.as_deref()).collect();
    assert_eq!(names, vec!["pol-a", "pol-b"]);
}

#[tokio::test]
async fn cycling_page_tokens_are_detected() {
    let server = MockServer::start_async().await;
    let to_b = server
        .mock_async(|when, then| {
            when.method(GET).path(POLICIES).query_param("pageToken", "tok-a");
            then.status(200).json_body(json!({
                "items": [{"name": "pol-b"}],
                "nextPageToken": "tok-b"
            }));
        })
        .await;
    let back_to_a = server
        .mock_async(|when, then| {
            when.method(GET).path(POLICIES).query_param("pageToken", "tok-b");
            then.status(200).json_body(json!({
                "items": [{"name": "pol-c"}],
                "nextPageToken": "tok-a"
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(POLICIES);
            then.status(200).json_body(json!({
                "items": [{"name": "pol-a"}],
                "nextPageToken": "tok-a"
            }));
        })
        .await;

    let err = tokio::time::timeout(Duration::from_secs(5), store(&server).list_policies("p1"))
        .await
        .expect("pagination must terminate")
        .unwrap_err();
    assert_eq!(err, StoreError::Decode("page token repeated: tok-a".to_string()));
    to_b.assert_hits_async(1).await;
    back_to_a.assert_hits_async(1).await;
}

#[tokio::test]
async fn provider_error_envelope_becomes_api_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("{POLICIES}/missing"));
            then.status(404).json_body(json!({
                "error": {"code": 404, "message": "The resource 'missing' was not found"}
            }));
        })
        .await;

    let err = store(&server).get_policy("p1", "missing").await.unwrap_err();
    assert_eq!(
        err,
        StoreError::api(404, "The resource 'missing' was not found")
    );
}

#[tokio::test]
async fn mutation_waits_for_operation_to_finish() {
    let server = MockServer::start_async().await;
    let add = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{POLICIES}/pol-a/addRule"))
                .json_body_partial(r#"{"priority": 20, "action": "deny(403)"}"#);
            then.status(200)
                .json_body(json!({"name": "operation-7", "status": "RUNNING"}));
        })
        .await;
    let wait = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/compute/v1/projects/p1/global/operations/operation-7/wait");
            then.status(200)
                .json_body(json!({"name": "operation-7", "status": "DONE"}));
        })
        .await;

    let rule = Rule {
        priority: Some(20),
        action: Some("deny(403)".to_string()),
        preview: Some(false),
        ..Rule::default()
    };
    store(&server).add_rule("p1", "pol-a", &rule).await.unwrap();

    add.assert_async().await;
    wait.assert_async().await;
}

#[tokio::test]
async fn first_wait_is_issued_without_polling_delay() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(format!("{POLICIES}/pol-a/removeRule"));
            then.status(200)
                .json_body(json!({"name": "operation-8", "status": "PENDING"}));
        })
        .await;
    let wait = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/compute/v1/projects/p1/global/operations/operation-8/wait");
            then.status(200)
                .json_body(json!({"name": "operation-8", "status": "DONE"}));
        })
        .await;

    let slow_poll = store(&server).with_poll_interval(Duration::from_secs(60));
    tokio::time::timeout(Duration::from_secs(5), slow_poll.remove_rule("p1", "pol-a", 20))
        .await
        .expect("blocking wait must not sleep first")
        .unwrap();
    wait.assert_hits_async(1).await;
}

#[tokio::test]
async fn failed_operation_surfaces_its_http_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(POLICIES);
            then.status(200).json_body(json!({
                "name": "operation-9",
                "status": "DONE",
                "httpErrorStatusCode": 409,
                "httpErrorMessage": "CONFLICT",
                "error": {"errors": [{"code": "RESOURCE_ALREADY_EXISTS", "message": "pol-a exists"}]}
            }));
        })
        .await;

    let policy = Policy {
        name: Some("pol-a".to_string()),
        ..Policy::default()
    };
    let err = store(&server)
        .create_policy("p1", &policy)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Operation {
            status: Some(409),
            message: "RESOURCE_ALREADY_EXISTS: pol-a exists".to_string()
        }
    );
}

#[tokio::test]
async fn rule_calls_carry_priority_query() {
    let server = MockServer::start_async().await;
    let remove = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{POLICIES}/pol-a/removeRule"))
                .query_param("priority", "20");
            then.status(200)
                .json_body(json!({"name": "operation-3", "status": "DONE"}));
        })
        .await;

    store(&server).remove_rule("p1", "pol-a", 20).await.unwrap();
    remove.assert_async().await;
}

#[tokio::test]
async fn preconfigured_sets_are_unwrapped() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(format!("{POLICIES}/listPreconfiguredExpressionSets"));
            then.status(200).json_body(json!({
                "preconfiguredExpressionSets": {"wafRules": {"expressionSets": [
                    {"id": "xss-v33-stable", "aliases": ["owasp-crs-v030301-id941100-xss"]},
                    {"id": "sqli-v33-stable"}
                ]}}
            }));
        })
        .await;

    let sets = store(&server)
        .list_preconfigured_expression_sets("p1")
        .await
        .unwrap();
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].id.as_deref(), Some("xss-v33-stable"));
}

#[tokio::test]
async fn attach_posts_policy_self_link() {
    let server = MockServer::start_async().await;
    let attach = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/compute/v1/projects/p1/global/backendServices/web/setSecurityPolicy")
                .json_body(json!({"securityPolicy": "https://x/securityPolicies/pol-a"}));
            then.status(200)
                .json_body(json!({"name": "operation-5", "status": "DONE"}));
        })
        .await;

    store(&server)
        .set_backend_security_policy("p1", "web", "https://x/securityPolicies/pol-a")
        .await
        .unwrap();
    attach.assert_async().await;
}

#[tokio::test]
async fn unreachable_provider_is_transport_error() {
    let s = RestPolicyStore::new_with_base_url(None, "http://127.0.0.1:9".to_string());
    let err = s.get_policy("p1", "pol-a").await.unwrap_err();
    assert!(matches!(err, StoreError::Transport(_)));
}
