use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{Client, StatusCode};

use crate::error::{IngestError, Result};
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::{Page, PageQuery, Record, RecordFetcher};

pub const DEFAULT_LIMIT: u32 = 5_000;
pub const MAX_LIMIT: u32 = 10_000;

/// Characters of response body echoed into the debug log.
const BODY_PREVIEW: usize = 512;

/// Page size actually sent: anything outside `[1, MAX_LIMIT]` falls back to the default.
pub fn clamp_limit(requested: Option<i64>) -> u32 {
    match requested {
        Some(n) if (1..=i64::from(MAX_LIMIT)).contains(&n) => n as u32,
        _ => DEFAULT_LIMIT,
    }
}

/// Query parameter names of a sorted/filtered REST resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDialect {
    pub filter_param: String,
    pub order_param: String,
    pub limit_param: String,
}

impl Default for QueryDialect {
    /// Socrata SODA names.
    fn default() -> Self {
        Self {
            filter_param: "$where".into(),
            order_param: "$order".into(),
            limit_param: "$limit".into(),
        }
    }
}

impl QueryDialect {
    pub fn params(&self, order_field: &str, since: &str, limit: u32) -> Vec<(String, String)> {
        vec![
            (
                self.filter_param.clone(),
                format!("{order_field} > '{}'", since.replace('\'', "''")),
            ),
            (self.order_param.clone(), order_field.to_string()),
            (self.limit_param.clone(), limit.to_string()),
        ]
    }
}

/// Why a single attempt failed, and whether another attempt could help.
#[derive(Debug)]
struct AttemptError {
    reason: String,
    retryable: bool,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Fetches one page per call from a SODA-style HTTP resource.
#[derive(Clone)]
pub struct SodaFetcher {
    client: Client,
    dialect: QueryDialect,
    retry: RetryPolicy,
}

impl Default for SodaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SodaFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            dialect: QueryDialect::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_dialect(mut self, dialect: QueryDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get_body(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<String, AttemptError> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| AttemptError {
                retryable: e.is_timeout() || e.is_connect(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptError {
                reason: format!("HTTP {status}"),
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            });
        }

        resp.text().await.map_err(|e| AttemptError {
            retryable: e.is_timeout(),
            reason: format!("reading body: {e}"),
        })
    }
}

/// Parse a response body into records; anything but a JSON array of objects is malformed.
pub fn parse_page(url: &str, body: &str) -> Result<Page> {
    let records: Vec<Record> =
        serde_json::from_str(body).map_err(|e| IngestError::MalformedResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Page::new(records))
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

#[async_trait]
impl RecordFetcher for SodaFetcher {
    async fn fetch(&self, query: &PageQuery<'_>) -> Result<Page> {
        let limit = clamp_limit(query.limit);
        let params = self.dialect.params(query.order_field, query.since, limit);

        tracing::debug!(
            url = query.url,
            params = %serde_json::to_string(&params).unwrap_or_default(),
            "requesting page"
        );

        let t0 = Instant::now();
        let params = &params;
        let body = self
            .retry
            .run("soda fetch", |e: &AttemptError| e.retryable, move || {
                self.get_body(query.url, params)
            })
            .await
            .map_err(|e| {
                counter!("feed_fetch_errors_total").increment(1);
                IngestError::Fetch {
                    url: query.url.to_string(),
                    reason: e.reason,
                }
            })?;
        histogram!("feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        tracing::debug!(
            url = query.url,
            bytes = body.len(),
            body = preview(&body),
            "received response"
        );
        tracing::trace!(url = query.url, body = %body, "full response body");

        parse_page(query.url, &body)
    }

    fn name(&self) -> &'static str {
        "soda"
    }
}
