// tests/soda_fetcher.rs
//
// SodaFetcher against a local axum server bound to an ephemeral port.
//
// Covered:
// - query parameters ($where / $order / $limit) and limit clamping
// - non-2xx -> Fetch error, with and without retries
// - non-array body -> MalformedResponse
// - end to end: an HTTP error on one source leaves its checkpoint alone
//   while the next source still runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use feed_ingest::error::IngestError;
use feed_ingest::host::XmlEventWriter;
use feed_ingest::ingest::providers::SodaFetcher;
use feed_ingest::ingest::retry::RetryPolicy;
use feed_ingest::ingest::types::{NaiveTz, PageQuery, RecordFetcher, Source};
use feed_ingest::{CheckpointStore, Ingester};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Seen {
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    hits: Arc<AtomicU32>,
}

async fn traffic(
    State(seen): State<Seen>,
    Query(q): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    seen.hits.fetch_add(1, Ordering::SeqCst);
    seen.queries.lock().unwrap().push(q);
    Json(json!([
        {"incident_date": "2016-01-02T00:00:00.000", "kind": "closure"},
        {"incident_date": "2016-01-03T00:00:00.000", "kind": "crash"}
    ]))
}

async fn broken(State(seen): State<Seen>) -> impl IntoResponse {
    seen.hits.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded")
}

async fn not_a_list() -> impl IntoResponse {
    Json(json!({"error": true, "message": "query coordinator error"}))
}

async fn spawn_server(seen: Seen) -> String {
    let app = Router::new()
        .route("/resource/traffic.json", get(traffic))
        .route("/resource/broken.json", get(broken))
        .route("/resource/odd.json", get(not_a_list))
        .with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

fn no_retry() -> SodaFetcher {
    SodaFetcher::new().with_retry(RetryPolicy::none())
}

#[tokio::test]
async fn sends_soda_query_and_parses_records() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let url = format!("{base}/resource/traffic.json");

    let page = no_retry()
        .fetch(&PageQuery {
            url: &url,
            order_field: "incident_date",
            since: "2016-01-01T00:00:00.000",
            limit: Some(0),
        })
        .await
        .expect("fetch");
    assert_eq!(page.len(), 2);

    let q = seen.queries.lock().unwrap()[0].clone();
    assert_eq!(q["$where"], "incident_date > '2016-01-01T00:00:00.000'");
    assert_eq!(q["$order"], "incident_date");
    assert_eq!(q["$limit"], "5000");
}

#[tokio::test]
async fn explicit_limit_in_range_is_sent_as_is() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let url = format!("{base}/resource/traffic.json");

    no_retry()
        .fetch(&PageQuery {
            url: &url,
            order_field: "incident_date",
            since: "2016-01-01",
            limit: Some(100),
        })
        .await
        .expect("fetch");
    assert_eq!(seen.queries.lock().unwrap()[0]["$limit"], "100");
}

#[tokio::test]
async fn server_error_is_a_fetch_error() {
    let seen = Seen::default();
    let base = spawn_server(seen.clone()).await;
    let url = format!("{base}/resource/broken.json");
    let query = PageQuery {
        url: &url,
        order_field: "incident_date",
        since: "2016-01-01",
        limit: None,
    };

    let err = no_retry().fetch(&query).await.unwrap_err();
    assert!(matches!(err, IngestError::Fetch { ref reason, .. } if reason.contains("500")));
    assert_eq!(seen.hits.load(Ordering::SeqCst), 1);

    let retrying = SodaFetcher::new().with_retry(
        RetryPolicy::default()
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(1)),
    );
    let err = retrying.fetch(&query).await.unwrap_err();
    assert!(matches!(err, IngestError::Fetch { .. }));
    assert_eq!(seen.hits.load(Ordering::SeqCst), 4, "one earlier hit, then three attempts");
}

#[tokio::test]
async fn object_body_is_malformed() {
    let base = spawn_server(Seen::default()).await;
    let url = format!("{base}/resource/odd.json");
    let err = no_retry()
        .fetch(&PageQuery {
            url: &url,
            order_field: "incident_date",
            since: "2016-01-01",
            limit: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::MalformedResponse { .. }));
}

#[tokio::test]
async fn http_error_on_one_source_does_not_stop_the_next() {
    let base = spawn_server(Seen::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CheckpointStore::in_dir(dir.path()).unwrap());
    let writer = Arc::new(XmlEventWriter::new(Vec::<u8>::new()));

    let sources = vec![
        Source {
            name: "socrata_feed://broken".into(),
            url: format!("{base}/resource/broken.json"),
            order_field: "incident_date".into(),
            default_checkpoint: "2016-01-01T00:00:00.000".into(),
            limit: None,
            naive_tz: NaiveTz::Utc,
        },
        Source {
            name: "socrata_feed://traffic".into(),
            url: format!("{base}/resource/traffic.json"),
            order_field: "incident_date".into(),
            default_checkpoint: "2016-01-01T00:00:00.000".into(),
            limit: Some(50_000),
            naive_tz: NaiveTz::Utc,
        },
    ];

    let ingester = Ingester::new(store.clone(), Arc::new(no_retry()), writer.clone());
    let summary = ingester.run_all(&sources, &CancellationToken::new()).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.events, 2);
    assert_eq!(
        store.get("socrata_feed://broken", "unset"),
        "unset",
        "failed source keeps its (absent) checkpoint"
    );
    assert_eq!(
        store.get("socrata_feed://traffic", "unset"),
        "2016-01-03T00:00:00.000"
    );

    writer.finish().unwrap();
    drop(ingester);
    let out = String::from_utf8(
        Arc::try_unwrap(writer)
            .ok()
            .expect("sole owner")
            .into_inner(),
    )
    .unwrap();
    assert_eq!(out.matches("<event stanza=\"socrata_feed://traffic\">").count(), 2);
    assert!(!out.contains("broken"));
    assert!(out.contains("<time>1451692800.000</time>"));
}
