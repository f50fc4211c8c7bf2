//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the XRPC service and run
//! whole crawls end-to-end through the real HTTP client.

use bluesky_crawler::config::{
    AuthConfig, Config, CrawlConfig, CrawlMode, OutputConfig, OutputFormat, RetryAccounting,
    RetryConfig,
};
use bluesky_crawler::output::{MemorySink, NormalizedRecord, StopReason};
use bluesky_crawler::state::TerminalReason;
use bluesky_crawler::storage::{RunStatus, SqliteDataset};
use bluesky_crawler::{Coordinator, CrawlError, CrawlReport};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const CREATE_SESSION: &str = "/xrpc/com.atproto.server.createSession";
const DELETE_SESSION: &str = "/xrpc/com.atproto.server.deleteSession";
const SEARCH_POSTS: &str = "/xrpc/app.bsky.feed.searchPosts";

/// Matches first-page requests, which carry no cursor
struct NoCursor;

impl Match for NoCursor {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(key, _)| key == "cursor")
    }
}

/// Creates a test configuration pointing at the mock server
fn create_test_config(service_url: &str, queries: &[&str], mode: CrawlMode) -> Config {
    Config {
        auth: AuthConfig {
            identifier: "crawler.test".to_string(),
            app_password: "app-pass".to_string(),
            service_url: service_url.to_string(),
        },
        crawl: CrawlConfig {
            queries: queries.iter().map(|q| q.to_string()).collect(),
            mode,
            max_requests_per_crawl: None,
            concurrency: 3,
            page_size: 10,
            request_timeout_secs: 5,
            retry_accounting: RetryAccounting::Single,
            enrich_profiles: false,
            sort: None,
        },
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            max_auth_attempts: 2,
        },
        output: OutputConfig {
            path: "unused.jsonl".to_string(),
            format: OutputFormat::Jsonl,
            report_path: None,
        },
    }
}

fn post_json(uri: &str, did: &str) -> Value {
    json!({
        "uri": uri,
        "cid": format!("cid-{}", uri.rsplit('/').next().unwrap_or_default()),
        "author": { "did": did, "handle": format!("{}.test", did.trim_start_matches("did:plc:")) },
        "record": {
            "$type": "app.bsky.feed.post",
            "text": format!("post {}", uri),
            "createdAt": "2024-03-01T12:00:00.000Z",
            "langs": ["en"]
        },
        "indexedAt": "2024-03-01T12:00:01.000Z",
        "likeCount": 2
    })
}

/// A search page of posts `first..first + count`, all by distinct authors
fn page(first: usize, count: usize, cursor: Option<&str>) -> Value {
    let posts: Vec<Value> = (first..first + count)
        .map(|i| post_json(&post_uri(i), &format!("did:plc:user{}", i)))
        .collect();
    match cursor {
        Some(cursor) => json!({ "posts": posts, "cursor": cursor }),
        None => json!({ "posts": posts }),
    }
}

fn post_uri(i: usize) -> String {
    format!("at://did:plc:user{}/app.bsky.feed.post/{}", i, i)
}

async fn mount_session(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(CREATE_SESSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessJwt": token,
            "refreshJwt": "refresh",
            "handle": "crawler.test",
            "did": "did:plc:crawler"
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(DELETE_SESSION))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn run_with_memory(config: Config) -> (Arc<MemorySink>, Result<CrawlReport, CrawlError>) {
    let timeout = Duration::from_secs(config.crawl.request_timeout_secs);
    let api = bluesky_crawler::api::XrpcClient::new(&config.auth.service_url, timeout).unwrap();
    let sink = Arc::new(MemorySink::new());
    let result = Coordinator::new(config, Arc::new(api), sink.clone()).run().await;
    (sink, result)
}

async fn search_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == SEARCH_POSTS)
        .count()
}

#[tokio::test]
async fn test_paginates_single_query_in_order() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("q", "rust"))
        .and(NoCursor)
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 10, Some("c2"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(10, 10, Some("c3"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("cursor", "c3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(20, 10, None)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("crawl should complete");

    let ids: Vec<String> = sink.records().iter().map(|r| r.id().to_string()).collect();
    let expected: Vec<String> = (0..30).map(post_uri).collect();
    assert_eq!(ids, expected);

    assert_eq!(report.status, StopReason::Completed);
    assert_eq!(report.budget_charged, 3);
    assert_eq!(report.records_emitted, 30);
    assert_eq!(report.queries[0].pages, 3);
    assert_eq!(report.queries[0].terminal, Some(TerminalReason::Exhausted));
    assert_eq!(sink.final_status(), Some(RunStatus::Completed));
}

#[tokio::test]
async fn test_budget_is_never_exceeded() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    // Every page points at another page
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 10, Some("more"))))
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), &["a", "b", "c"], CrawlMode::Posts);
    config.crawl.max_requests_per_crawl = Some(5);
    config.crawl.concurrency = 4;

    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("crawl should stop cleanly");

    assert_eq!(report.status, StopReason::BudgetExhausted);
    assert_eq!(report.budget_charged, 5);
    assert_eq!(search_requests(&server).await, 5);
    assert_eq!(sink.len(), 10);
    assert_eq!(report.duplicates_dropped, 40);
    assert_eq!(sink.final_status(), Some(RunStatus::BudgetExhausted));
}

#[tokio::test]
async fn test_zero_budget_issues_no_requests() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    config.crawl.max_requests_per_crawl = Some(0);

    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("zero budget is not an error");

    assert_eq!(report.status, StopReason::BudgetExhausted);
    assert_eq!(report.budget_charged, 0);
    assert!(sink.is_empty());
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_overlapping_queries_emit_unique_posts() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 10, None)))
        .expect(2)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["rust", "rustlang"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("crawl should complete");

    let ids: HashSet<String> = sink.records().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(ids.len(), 10);
    assert_eq!(sink.len(), 10);
    assert_eq!(report.duplicates_dropped, 10);
    assert_eq!(report.status, StopReason::Completed);
}

#[tokio::test]
async fn test_users_mode_deduplicates_authors() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    let posts = json!({ "posts": [
        post_json("at://did:plc:alice/app.bsky.feed.post/1", "did:plc:alice"),
        post_json("at://did:plc:alice/app.bsky.feed.post/2", "did:plc:alice"),
        post_json("at://did:plc:bob/app.bsky.feed.post/3", "did:plc:bob"),
    ]});
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("q", "rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts))
        .mount(&server)
        .await;

    let posts = json!({ "posts": [
        post_json("at://did:plc:bob/app.bsky.feed.post/4", "did:plc:bob"),
        post_json("at://did:plc:carol/app.bsky.feed.post/5", "did:plc:carol"),
    ]});
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("q", "tokio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(posts))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["rust", "tokio"], CrawlMode::Users);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("crawl should complete");

    let mut dids: Vec<String> = sink.records().iter().map(|r| r.id().to_string()).collect();
    dids.sort();
    assert_eq!(dids, vec!["did:plc:alice", "did:plc:bob", "did:plc:carol"]);
    assert!(sink
        .records()
        .iter()
        .all(|r| matches!(r, NormalizedRecord::User(_))));
    assert_eq!(report.duplicates_dropped, 2);
}

#[tokio::test]
async fn test_expired_session_is_replaced_transparently() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CREATE_SESSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessJwt": "token-1", "refreshJwt": "refresh", "handle": "crawler.test", "did": "did:plc:crawler"
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_session(&server, "token-2").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "ExpiredToken", "message": "Token has expired"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 5, None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    config.crawl.concurrency = 1;

    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("expiry should be recovered");

    assert_eq!(sink.len(), 5);
    assert_eq!(report.status, StopReason::Completed);
    assert_eq!(report.budget_charged, 1);
}

#[tokio::test]
async fn test_second_expiry_is_fatal() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "AuthenticationRequired", "message": "Invalid token"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    config.crawl.concurrency = 1;

    let (sink, result) = run_with_memory(config).await;
    assert!(matches!(result, Err(CrawlError::Auth(_))));
    assert_eq!(sink.final_status(), Some(RunStatus::Failed));
}

#[tokio::test]
async fn test_rejected_credentials_abort_crawl() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CREATE_SESSION))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "AuthenticationRequired", "message": "Invalid identifier or password"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["rust", "tokio"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;

    match result {
        Err(CrawlError::Auth(message)) => assert!(message.contains("Invalid identifier")),
        other => panic!("expected an auth error, got {:?}", other.map(|r| r.status)),
    }
    assert!(sink.is_empty());
    assert_eq!(search_requests(&server).await, 0);
}

#[tokio::test]
async fn test_empty_first_page_ends_query() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "posts": [], "cursor": "more" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["nothing matches"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("crawl should complete");

    assert!(sink.is_empty());
    assert_eq!(report.status, StopReason::Completed);
    assert_eq!(report.budget_charged, 1);
    assert_eq!(report.queries[0].terminal, Some(TerminalReason::Exhausted));
}

#[tokio::test]
async fn test_concurrent_expiry_reports_share_one_new_session() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(CREATE_SESSION))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessJwt": "token-1", "refreshJwt": "refresh", "handle": "crawler.test", "did": "did:plc:crawler"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_session(&server, "token-2").await;

    // Every worker is holding token-1 by the time the first rejection lands
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "error": "ExpiredToken", "message": "Token has expired" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(3)
        .mount(&server)
        .await;
    for (i, query) in ["rust", "tokio", "serde"].iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(SEARCH_POSTS))
            .and(header("authorization", "Bearer token-2"))
            .and(query_param("q", *query))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(i * 10, 4, None)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = create_test_config(&server.uri(), &["rust", "tokio", "serde"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("expiry should be recovered");

    let sessions_created = server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == CREATE_SESSION)
        .count();
    assert_eq!(sessions_created, 2);
    assert_eq!(sink.len(), 12);
    assert_eq!(report.status, StopReason::Completed);
}

#[tokio::test]
async fn test_malformed_page_ends_query() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "cursor": "c2" })))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("a malformed page is not fatal");

    assert!(sink.is_empty());
    assert_eq!(search_requests(&server).await, 1);
    assert_eq!(report.status, StopReason::Completed);
    assert_eq!(report.queries[0].terminal, Some(TerminalReason::Exhausted));
}

#[tokio::test]
async fn test_malformed_record_is_skipped() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    let mut first = page(0, 3, Some("c2"));
    first["posts"][1]["record"]
        .as_object_mut()
        .unwrap()
        .remove("text");
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(NoCursor)
        .respond_with(ResponseTemplate::new(200).set_body_json(first))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(3, 2, None)))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("a malformed record is not fatal");

    let uris: Vec<String> = sink.records().iter().map(|r| r.id().to_string()).collect();
    assert_eq!(uris, vec![post_uri(0), post_uri(2), post_uri(3), post_uri(4)]);
    assert_eq!(report.malformed_skipped, 1);
    assert_eq!(report.records_emitted, 4);
    assert_eq!(report.status, StopReason::Completed);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 3, None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    config.crawl.concurrency = 1;

    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("rate limit should be absorbed");

    assert_eq!(sink.len(), 3);
    assert_eq!(report.budget_charged, 1);
    assert_eq!(report.requests_sent, 2);
    assert_eq!(report.status, StopReason::Completed);
    assert_eq!(report.failed_queries().count(), 0);
}

#[tokio::test]
async fn test_bad_query_is_skipped_and_others_continue() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("q", "bad"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "InvalidRequest", "message": "Error: q must not be empty"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .and(query_param("q", "good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 4, None)))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), &["bad", "good"], CrawlMode::Posts);
    let (sink, result) = run_with_memory(config).await;
    let report = result.expect("a bad query is not fatal");

    assert_eq!(sink.len(), 4);
    assert_eq!(report.status, StopReason::Completed);
    let failed: Vec<&str> = report.failed_queries().map(|q| q.query.as_str()).collect();
    assert_eq!(failed, vec!["bad"]);
}

#[tokio::test]
async fn test_cancel_keeps_in_flight_page() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page(0, 10, Some("more")))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    config.crawl.concurrency = 1;

    let timeout = Duration::from_secs(config.crawl.request_timeout_secs);
    let api = bluesky_crawler::api::XrpcClient::new(&config.auth.service_url, timeout).unwrap();
    let sink = Arc::new(MemorySink::new());
    let coordinator = Coordinator::new(config, Arc::new(api), sink.clone());

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let report = coordinator.run().await.expect("cancellation is not an error");

    assert_eq!(report.status, StopReason::Cancelled);
    assert_eq!(report.budget_charged, 1);
    assert_eq!(sink.len(), 10);
    assert_eq!(sink.final_status(), Some(RunStatus::Cancelled));
}

#[tokio::test]
async fn test_sqlite_output_from_config() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 6, None)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dataset.db");

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Posts);
    config.output.format = OutputFormat::Sqlite;
    config.output.path = db_path.display().to_string();

    let coordinator = Coordinator::from_config(config, "test-hash").unwrap();
    let report = coordinator.run().await.unwrap();
    assert_eq!(report.records_emitted, 6);

    let dataset = SqliteDataset::new(&db_path).unwrap();
    assert_eq!(dataset.count_posts().unwrap(), 6);
}

#[tokio::test]
async fn test_jsonl_output_from_config() {
    let server = MockServer::start().await;
    mount_session(&server, "token-1").await;

    Mock::given(method("GET"))
        .and(path(SEARCH_POSTS))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 4, None)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out").join("users.jsonl");

    let mut config = create_test_config(&server.uri(), &["rust"], CrawlMode::Users);
    config.output.path = out_path.display().to_string();

    let report = bluesky_crawler::crawl(config, "test-hash").await.unwrap();
    assert_eq!(report.records_emitted, 4);

    let content = std::fs::read_to_string(&out_path).unwrap();
    let lines: Vec<Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["did"], "did:plc:user0");
    assert_eq!(lines[0]["handle"], "user0.test");
}
