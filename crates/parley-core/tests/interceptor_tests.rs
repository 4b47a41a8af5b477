//! Authenticated client: bearer attachment, refresh-and-replay, pass-through.

mod common;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{pair, tokens, Harness};
use parley_core::models::{Conversation, ConversationQuery, NewConversation};
use parley_core::{ApiError, AuthenticatedClient, ClearReason, Transport};
use reqwest::{header, Method, Request, Response, StatusCode};
use serde_json::json;
use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_refresh(server: &MockServer, template: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({"refresh_token": "R1"})))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_conversations(server: &MockServer, bearer: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .and(header_eq("authorization", bearer))
        .respond_with(template)
        .mount(server)
        .await;
}

fn conversation_list() -> serde_json::Value {
    json!([{"id": "c-1", "title": "Trip planning"}])
}

#[tokio::test]
async fn test_refresh_and_replay_with_new_token() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(&h.server, "Bearer A1", ResponseTemplate::new(401)).await;
    mount_conversations(
        &h.server,
        "Bearer A2",
        ResponseTemplate::new(200).set_body_json(conversation_list()),
    )
    .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(tokens("A2", "R2")),
        1,
    )
    .await;

    let conversations = h
        .client()
        .list_conversations(&ConversationQuery::default())
        .await
        .expect("401 is hidden by refresh");

    assert_eq!(conversations.len(), 1);
    assert_eq!(h.session.access_token().as_deref(), Some("A2"));
    assert_eq!(h.stored(), Some(("A2".to_string(), "R2".to_string())));
}

#[tokio::test]
async fn test_concurrent_unauthorized_requests_refresh_once() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(&h.server, "Bearer A1", ResponseTemplate::new(401)).await;
    mount_conversations(
        &h.server,
        "Bearer A2",
        ResponseTemplate::new(200).set_body_json(conversation_list()),
    )
    .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200)
            .set_body_json(tokens("A2", "R2"))
            .set_delay(Duration::from_millis(150)),
        1,
    )
    .await;

    let client = h.client();
    let query = ConversationQuery::default();
    let requests = (0..8).map(|_| client.list_conversations(&query));
    let results = futures::future::join_all(requests).await;

    for result in results {
        let conversations: Vec<Conversation> = result.expect("every request succeeds");
        assert_eq!(conversations[0].id, "c-1");
    }

    let received = h.server.received_requests().await.expect("recording enabled");
    let replayed = received
        .iter()
        .filter(|r| r.url.path() == "/api/conversations")
        .filter(|r| {
            r.headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer A2")
        })
        .count();
    assert_eq!(replayed, 8);
}

#[tokio::test]
async fn test_rejected_refresh_surfaces_original_unauthorized() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(&h.server, "Bearer A1", ResponseTemplate::new(401)).await;
    mount_refresh(&h.server, ResponseTemplate::new(401), 1).await;

    let cleared = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&cleared);
    h.session.on_session_cleared(move |reason| {
        if reason == ClearReason::RefreshFailed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let client = h.client();
    let query = ConversationQuery::default();
    let requests = (0..4).map(|_| client.list_conversations(&query));
    let results = futures::future::join_all(requests).await;

    for result in results {
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }
    assert!(!h.session.is_authenticated());
    assert!(h.stored().is_none());
    assert_eq!(cleared.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_refresh_returns_original_response() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .mount(&h.server)
        .await;
    mount_refresh(&h.server, ResponseTemplate::new(403), 1).await;

    let client = h.client();
    let request = client
        .request(Method::GET, "/api/conversations")
        .build()
        .expect("request builds");
    let response = client.send(request).await.expect("transport succeeds");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.text().await.expect("body"), "token expired");
    assert!(!h.session.is_authenticated());
}

#[tokio::test]
async fn test_refresh_endpoint_is_never_intercepted() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_refresh(&h.server, ResponseTemplate::new(401), 1).await;

    let client = h.client();
    let request = client
        .request(Method::POST, "/api/auth/refresh")
        .json(&json!({"refresh_token": "R1"}))
        .build()
        .expect("request builds");
    let response = client.send(request).await.expect("transport succeeds");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // The interceptor did not react, so the session is as it was
    assert_eq!(h.session.access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_retry_still_unauthorized_is_final() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(tokens("A2", "R2")),
        1,
    )
    .await;

    let result = h
        .client()
        .list_conversations(&ConversationQuery::default())
        .await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    // Refresh itself succeeded, so the new pair stands
    assert_eq!(h.stored(), Some(("A2".to_string(), "R2".to_string())));
}

#[tokio::test]
async fn test_server_errors_pass_through() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(
        &h.server,
        "Bearer A1",
        ResponseTemplate::new(503).set_body_string("maintenance"),
    )
    .await;
    mount_refresh(&h.server, ResponseTemplate::new(200), 0).await;

    let result = h
        .client()
        .list_conversations(&ConversationQuery::default())
        .await;

    assert!(matches!(result, Err(ApiError::ServerError(ref body)) if body == "maintenance"));
    assert_eq!(h.session.access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_anonymous_unauthorized_does_not_refresh() {
    let h = Harness::start(None).await;

    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    let result = h
        .client()
        .list_conversations(&ConversationQuery::default())
        .await;
    assert!(matches!(result, Err(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_expiring_token_is_used_until_rejected() {
    let h = Harness::start_with(Some(pair("A1", "R1").expiring_in(Some(30)))).await;
    assert!(h.session.needs_refresh());

    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .and(header_eq("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_list()))
        .expect(1)
        .mount(&h.server)
        .await;
    // An unavailable refresh endpoint must not cost a still-valid session
    mount_refresh(&h.server, ResponseTemplate::new(503), 0).await;

    let conversations = h
        .client()
        .list_conversations(&ConversationQuery::default())
        .await
        .expect("server still accepts A1");
    assert_eq!(conversations.len(), 1);
    assert!(h.session.is_authenticated());
    assert_eq!(h.stored(), Some(("A1".to_string(), "R1".to_string())));
}

#[tokio::test]
async fn test_short_lived_tokens_do_not_refresh_every_request() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(&h.server, "Bearer A1", ResponseTemplate::new(401)).await;
    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .and(header_eq("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(conversation_list()))
        .expect(5)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A2",
            "refresh_token": "R2",
            "expires_in": 30
        })),
        1,
    )
    .await;

    let client = h.client();
    for _ in 0..5 {
        client
            .list_conversations(&ConversationQuery::default())
            .await
            .expect("request succeeds");
    }
    assert_eq!(h.session.access_token().as_deref(), Some("A2"));
}

#[tokio::test]
async fn test_late_unauthorized_reuses_completed_refresh() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(&h.server, "Bearer A1", ResponseTemplate::new(401)).await;
    mount_conversations(
        &h.server,
        "Bearer A2",
        ResponseTemplate::new(200).set_body_json(conversation_list()),
    )
    .await;
    // Sent with A1 alongside the first request, but rejected only after the
    // refresh has already finished
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .and(header_eq("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(400)))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .and(header_eq("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::profile()))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(tokens("A2", "R2")),
        1,
    )
    .await;

    let client = h.client();
    let query = ConversationQuery::default();
    let slow = async {
        let profile: serde_json::Value = client.get_json("/api/users/me").await?;
        Ok::<_, ApiError>((profile, h.session.is_refreshing()))
    };
    let (listed, slow) = tokio::join!(client.list_conversations(&query), slow);

    assert_eq!(listed.expect("replayed with A2").len(), 1);
    let (profile, refreshing_after) = slow.expect("late 401 replayed with A2");
    assert_eq!(profile["username"], "ada");
    assert!(!refreshing_after);
    assert_eq!(h.stored(), Some(("A2".to_string(), "R2".to_string())));
}

#[tokio::test]
async fn test_query_and_body_reach_server() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    Mock::given(method("GET"))
        .and(path("/api/conversations"))
        .and(query_param("search", "rust"))
        .and(query_param("tags", "t1,t2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/conversations"))
        .and(header_eq("authorization", "Bearer A1"))
        .and(body_json(json!({"title": "New chat"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-9", "title": "New chat"})))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/conversations/c-9/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string("# New chat\n"))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/conversations/c-9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.server)
        .await;

    let client = h.client();
    let found = client
        .list_conversations(&ConversationQuery::search("rust").with_tags(["t1", "t2"]))
        .await
        .expect("list succeeds");
    assert!(found.is_empty());

    let created = client
        .create_conversation(&NewConversation {
            title: "New chat".to_string(),
            ..Default::default()
        })
        .await
        .expect("create succeeds");
    assert_eq!(created.id, "c-9");

    let export = client.export_conversation("c-9").await.expect("export succeeds");
    assert!(export.starts_with("# New chat"));

    client.delete_conversation("c-9").await.expect("delete succeeds");
}

/// Transport that records the Authorization header of everything it sends.
#[derive(Clone)]
struct RecordingTransport {
    inner: reqwest::Client,
    seen: Arc<Mutex<Vec<Option<String>>>>,
}

impl Transport for RecordingTransport {
    fn execute(&self, request: Request) -> impl Future<Output = reqwest::Result<Response>> + Send {
        let auth = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        self.seen.lock().expect("recording lock").push(auth);
        self.inner.execute(request)
    }
}

#[tokio::test]
async fn test_custom_transport_sees_replay() {
    let h = Harness::start(Some(("A1", "R1"))).await;

    mount_conversations(&h.server, "Bearer A1", ResponseTemplate::new(401)).await;
    mount_conversations(
        &h.server,
        "Bearer A2",
        ResponseTemplate::new(200).set_body_json(conversation_list()),
    )
    .await;
    mount_refresh(
        &h.server,
        ResponseTemplate::new(200).set_body_json(tokens("A2", "R2")),
        1,
    )
    .await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let transport = RecordingTransport {
        inner: reqwest::Client::new(),
        seen: Arc::clone(&seen),
    };
    let client = AuthenticatedClient::with_transport(transport, h.session.clone(), &h.server.uri());

    client
        .list_conversations(&ConversationQuery::default())
        .await
        .expect("request succeeds");

    let seen = seen.lock().expect("recording lock").clone();
    assert_eq!(
        seen,
        vec![Some("Bearer A1".to_string()), Some("Bearer A2".to_string())]
    );
}
