//! Layout-aware text extraction through the document-partitioning service.
//!
//! [`ExtractionClient`] owns the retry policy; [`PartitionService`] is one
//! request to the service and nothing more. Splitting the two keeps the
//! policy testable with a fake service and no network.
//!
//! ## Retry Strategy
//!
//! The partitioning service is slow (`hi_res` layout models plus table
//! inference) and flaky under load. Timeouts, connection failures and non-2xx
//! answers are retried up to `max_attempts` in total, sleeping
//! `base_delay * 2^(n-1)` before retry `n`: with a 1 s base and 3 attempts the
//! sequence is attempt → 1 s → attempt → 2 s → attempt. There is no sleep
//! after the final failure. A 2xx body that is not an element list is not
//! retried.

use crate::error::{AttemptError, ExtractionError};
use crate::pipeline::text::PositionedFragment;
use async_trait::async_trait;
use reqwest::multipart;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Longest service error body kept in an [`AttemptError::Service`].
const MAX_ERROR_BODY_CHARS: usize = 2000;

// ── Response model ───────────────────────────────────────────────────────────

/// One element of the partitioning response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionElement {
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub element_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: ElementMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementMetadata {
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub filename: Option<String>,
    /// Everything else the service attached (table HTML, languages, …).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Bounding polygon; the first point is the top-left corner. `null`
    /// reads as empty and short points are kept as sent.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub points: Vec<Vec<f64>>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub layout_width: Option<f64>,
    #[serde(default)]
    pub layout_height: Option<f64>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Vec<f64>>>::deserialize(deserializer)?.unwrap_or_default())
}

impl PartitionElement {
    /// Text and top-left anchor for the cleaner.
    ///
    /// An element whose first point has fewer than two numbers is left
    /// unplaced, which the cleaner drops.
    pub fn to_fragment(&self) -> PositionedFragment {
        let anchor = self
            .metadata
            .coordinates
            .as_ref()
            .and_then(|c| c.points.first())
            .and_then(|p| match p.as_slice() {
                [x, y, ..] => Some((*x, *y)),
                _ => None,
            });
        PositionedFragment {
            text: self.text.clone().unwrap_or_default(),
            x: anchor.map(|(x, _)| x),
            y: anchor.map(|(_, y)| y),
        }
    }
}

/// Successful extraction of one page.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The service's raw elements, for callers that want the metadata.
    pub elements: Vec<PartitionElement>,
    /// One fragment per element, ready for [`crate::pipeline::text`].
    pub fragments: Vec<PositionedFragment>,
}

/// Parse a 2xx response body into elements.
pub fn parse_elements(body: &str) -> Result<Vec<PartitionElement>, ExtractionError> {
    serde_json::from_str(body).map_err(|e| ExtractionError::Decode(e.to_string()))
}

// ── Retry policy ─────────────────────────────────────────────────────────────

/// Fixed-cap exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Bound on one whole attempt (connect, upload, wait, download).
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Sleep before the 0-indexed `attempt`. Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt - 1))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// ── Service seam ─────────────────────────────────────────────────────────────

/// One request to the partitioning service.
#[async_trait]
pub trait PartitionService: Send + Sync {
    /// Submit one single-page PDF and return the 2xx response body.
    ///
    /// Non-2xx answers must come back as [`AttemptError::Service`].
    async fn partition(&self, file_name: &str, pdf: &[u8]) -> Result<String, AttemptError>;
}

/// HTTP client for the Unstructured partition endpoint.
pub struct UnstructuredApi {
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl UnstructuredApi {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    fn classify(&self, e: reqwest::Error) -> AttemptError {
        if e.is_timeout() {
            AttemptError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            AttemptError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl PartitionService for UnstructuredApi {
    async fn partition(&self, file_name: &str, pdf: &[u8]) -> Result<String, AttemptError> {
        let part = multipart::Part::bytes(pdf.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| self.classify(e))?;
        let form = multipart::Form::new()
            .part("files", part)
            .text("strategy", "hi_res")
            .text("coordinates", "true")
            .text("pdf_infer_table_structure", "true");

        let response = self
            .client
            .post(&self.url)
            .header("unstructured-api-key", &self.api_key)
            .header("accept", "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(AttemptError::Service {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        Ok(body)
    }
}

fn truncate_body(body: String) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}\u{2026}", &body[..idx]),
        None => body,
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Partitioning client with retry, backoff and per-attempt timeout.
#[derive(Clone)]
pub struct ExtractionClient {
    service: Arc<dyn PartitionService>,
    policy: RetryPolicy,
    large_file_threshold_bytes: u64,
}

impl ExtractionClient {
    pub fn new(service: Arc<dyn PartitionService>, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            large_file_threshold_bytes: u64::MAX,
        }
    }

    /// Log an advisory for page files above `bytes`.
    pub fn with_large_file_threshold(mut self, bytes: u64) -> Self {
        self.large_file_threshold_bytes = bytes;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Extract the elements of one single-page PDF.
    pub async fn extract(&self, page_pdf: &Path) -> Result<Extraction, ExtractionError> {
        let bytes = tokio::fs::read(page_pdf)
            .await
            .map_err(|source| ExtractionError::Io {
                path: page_pdf.to_path_buf(),
                source,
            })?;

        if bytes.len() as u64 > self.large_file_threshold_bytes {
            warn!(
                "{}: {:.1} MB exceeds the {:.1} MB advisory threshold; partitioning may be slow",
                page_pdf.display(),
                bytes.len() as f64 / 1_048_576.0,
                self.large_file_threshold_bytes as f64 / 1_048_576.0
            );
        }

        let file_name = page_pdf
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "page.pdf".to_string());

        let body = self.send_with_retry(&file_name, &bytes).await?;
        let elements = parse_elements(&body)?;
        let fragments = elements.iter().map(PartitionElement::to_fragment).collect();
        info!("{}: {} elements", file_name, elements.len());

        Ok(Extraction {
            elements,
            fragments,
        })
    }

    async fn send_with_retry(&self, file_name: &str, pdf: &[u8]) -> Result<String, ExtractionError> {
        let attempts = self.policy.attempts();
        let timeout_secs = self.policy.attempt_timeout.as_secs();
        let mut last_err: Option<AttemptError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = self.policy.delay_before(attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    file_name,
                    attempt,
                    attempts - 1,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            let outcome = timeout(
                self.policy.attempt_timeout,
                self.service.partition(file_name, pdf),
            )
            .await
            .unwrap_or(Err(AttemptError::Timeout { secs: timeout_secs }));

            match outcome {
                Ok(body) => {
                    debug!("{}: attempt {} succeeded", file_name, attempt + 1);
                    return Ok(body);
                }
                Err(e) => {
                    warn!("{}: attempt {} failed — {}", file_name, attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ExtractionError::Exhausted {
            attempts,
            last: last_err.unwrap_or(AttemptError::Transport("no attempt was made".into())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Replays scripted outcomes and records when each call happened.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<String, AttemptError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<String, AttemptError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PartitionService for Scripted {
        async fn partition(&self, _file_name: &str, _pdf: &[u8]) -> Result<String, AttemptError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AttemptError::Transport("script exhausted".into())))
        }
    }

    /// Never answers.
    struct Hanging;

    #[async_trait]
    impl PartitionService for Hanging {
        async fn partition(&self, _file_name: &str, _pdf: &[u8]) -> Result<String, AttemptError> {
            sleep(Duration::from_secs(24 * 3600)).await;
            Ok("[]".into())
        }
    }

    const ONE_ELEMENT: &str = r#"[{"type":"Title","element_id":"e1","text":"PLUMBING PLAN",
        "metadata":{"coordinates":{"points":[[10.5,20.25],[10.5,40.0],[200.0,40.0],[200.0,20.25]],
        "system":"PixelSpace","layout_width":1700,"layout_height":2200},"page_number":1,
        "filename":"page_2.pdf","languages":["eng"]}}]"#;

    fn page_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        std::io::Write::write_all(&mut f, b"%PDF-1.7 fake").unwrap();
        f
    }

    /// Paused-clock durations land on millisecond ticks.
    fn assert_close(actual: Duration, expected: Duration) {
        let slack = Duration::from_millis(5);
        assert!(
            actual >= expected && actual <= expected + slack,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn service_error(status: u16) -> AttemptError {
        AttemptError::Service {
            status,
            body: "unavailable".into(),
        }
    }

    #[test]
    fn backoff_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_before(0), Duration::ZERO);
        assert_eq!(p.delay_before(1), Duration::from_secs(1));
        assert_eq!(p.delay_before(2), Duration::from_secs(2));
        assert_eq!(p.delay_before(3), Duration::from_secs(4));
    }

    #[test]
    fn element_to_fragment_uses_first_point() {
        let elements = parse_elements(ONE_ELEMENT).unwrap();
        let frag = elements[0].to_fragment();
        assert_eq!(frag.text, "PLUMBING PLAN");
        assert_eq!(frag.x, Some(10.5));
        assert_eq!(frag.y, Some(20.25));
        assert_eq!(
            elements[0].metadata.extra.get("languages"),
            Some(&serde_json::json!(["eng"]))
        );
    }

    #[test]
    fn element_without_coordinates_is_unplaced() {
        let elements = parse_elements(r#"[{"type":"Text","text":"orphan","metadata":{}}]"#).unwrap();
        let frag = elements[0].to_fragment();
        assert_eq!(frag.x, None);
        assert_eq!(frag.y, None);
    }

    #[test]
    fn malformed_points_leave_only_that_element_unplaced() {
        let body = r#"[
            {"type":"Text","text":"nulled","metadata":{"coordinates":{"points":null}}},
            {"type":"Text","text":"three-d","metadata":{"coordinates":{"points":[[1.0,2.0,3.0]]}}},
            {"type":"Text","text":"short","metadata":{"coordinates":{"points":[[7.0]]}}},
            {"type":"Text","text":"empty","metadata":{"coordinates":{"points":[]}}},
            {"type":"Text","text":"2\" CW","metadata":{"coordinates":{"points":[[5.0,9.0]]}}}
        ]"#;
        let elements = parse_elements(body).expect("one bad element must not sink the page");
        assert_eq!(elements.len(), 5);

        let frags: Vec<_> = elements.iter().map(PartitionElement::to_fragment).collect();
        assert_eq!((frags[0].x, frags[0].y), (None, None));
        assert_eq!((frags[1].x, frags[1].y), (Some(1.0), Some(2.0)));
        assert_eq!((frags[2].x, frags[2].y), (None, None));
        assert_eq!((frags[3].x, frags[3].y), (None, None));
        assert_eq!((frags[4].x, frags[4].y), (Some(5.0), Some(9.0)));

        assert_eq!(
            crate::pipeline::text::clean_fragments(&frags),
            "three-d\n2\" CW"
        );
    }

    #[test]
    fn truncates_long_error_bodies() {
        let long = "x".repeat(MAX_ERROR_BODY_CHARS + 50);
        let t = truncate_body(long);
        assert_eq!(t.chars().count(), MAX_ERROR_BODY_CHARS + 1);
        assert_eq!(truncate_body("short".into()), "short");
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_1s_and_2s() {
        let service = Scripted::new(vec![
            Err(service_error(503)),
            Err(AttemptError::Transport("connection reset".into())),
            Ok(ONE_ELEMENT.to_string()),
        ]);
        let client = ExtractionClient::new(service.clone(), RetryPolicy::default());
        let file = page_file();

        let started = Instant::now();
        let extraction = client.extract(file.path()).await.expect("third attempt succeeds");
        assert_eq!(extraction.elements.len(), 1);
        assert_eq!(extraction.fragments[0].text, "PLUMBING PLAN");

        let calls = service.call_times();
        assert_eq!(calls.len(), 3);
        assert_close(calls[0] - started, Duration::ZERO);
        assert_close(calls[1] - calls[0], Duration::from_secs(1));
        assert_close(calls[2] - calls[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_with_last_cause_and_no_trailing_sleep() {
        let service = Scripted::new(vec![
            Err(service_error(500)),
            Err(service_error(502)),
            Err(service_error(503)),
        ]);
        let client = ExtractionClient::new(service.clone(), RetryPolicy::default());
        let file = page_file();

        let started = Instant::now();
        let err = client.extract(file.path()).await.unwrap_err();
        match err {
            ExtractionError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, service_error(503));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.call_times().len(), 3);
        assert_close(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_is_retryable_and_reported() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(600),
        };
        let client = ExtractionClient::new(Arc::new(Hanging), policy);
        let file = page_file();

        let started = Instant::now();
        let err = client.extract(file.path()).await.unwrap_err();
        match err {
            ExtractionError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last, AttemptError::Timeout { secs: 600 });
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_close(started.elapsed(), Duration::from_secs(600 + 1 + 600));
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_body_is_not_retried() {
        let service = Scripted::new(vec![Ok("<html>gateway</html>".into()), Ok("[]".into())]);
        let client = ExtractionClient::new(service.clone(), RetryPolicy::default());
        let file = page_file();

        let err = client.extract(file.path()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Decode(_)), "got {err:?}");
        assert_eq!(service.call_times().len(), 1);
    }

    #[tokio::test]
    async fn missing_page_file_is_io_error() {
        let service = Scripted::new(vec![Ok("[]".into())]);
        let client = ExtractionClient::new(service.clone(), RetryPolicy::default());
        let err = client
            .extract(Path::new("/definitely/not/here/page_9.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io { .. }), "got {err:?}");
        assert!(service.call_times().is_empty());
    }

    #[tokio::test]
    async fn large_file_advisory_does_not_change_behaviour() {
        let service = Scripted::new(vec![Ok("[]".into())]);
        let client = ExtractionClient::new(service, RetryPolicy::default())
            .with_large_file_threshold(1);
        let file = page_file();
        let extraction = tokio_test::assert_ok!(client.extract(file.path()).await);
        assert!(extraction.elements.is_empty());
        assert!(extraction.fragments.is_empty());
    }

    // ── HTTP status and transport mapping ───────────────────────────────────

    /// Read one request: headers plus a `content-length` or chunked body.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            if head.contains("transfer-encoding: chunked") {
                if buf.ends_with(b"0\r\n\r\n") {
                    break;
                }
                continue;
            }
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + body_len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Accept one connection on 127.0.0.1, answer with `response`, return the
    /// request as seen on the wire.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::AsyncWriteExt;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/general/v0/general", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            request
        });
        (url, handle)
    }

    fn api(url: &str, timeout: Duration) -> UnstructuredApi {
        UnstructuredApi::new(url, "secret-key", timeout).unwrap()
    }

    #[tokio::test]
    async fn non_2xx_status_maps_to_service_error() {
        let (url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbusy",
        )
        .await;

        let err = api(&url, Duration::from_secs(10))
            .partition("page_2.pdf", b"%PDF-1.7 fake")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AttemptError::Service {
                status: 503,
                body: "busy".into()
            }
        );

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(lower.starts_with("post /general/v0/general"), "{request}");
        assert!(lower.contains("unstructured-api-key: secret-key"), "{request}");
        assert!(request.contains("filename=\"page_2.pdf\""), "{request}");
        assert!(request.contains("hi_res"), "{request}");
        assert!(request.contains("%PDF-1.7 fake"), "{request}");
    }

    #[tokio::test]
    async fn success_status_returns_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n[]",
        )
        .await;

        let body = api(&url, Duration::from_secs(10))
            .partition("page_3.pdf", b"%PDF-1.7 fake")
            .await;
        assert_eq!(body, Ok("[]".to_string()));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_maps_to_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/general/v0/general", listener.local_addr().unwrap());
        drop(listener);

        let err = api(&url, Duration::from_secs(10))
            .partition("page_2.pdf", b"%PDF-1.7 fake")
            .await
            .unwrap_err();
        assert!(matches!(err, AttemptError::Transport(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn silent_server_maps_to_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/general/v0/general", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_request(&mut stream).await;
            sleep(Duration::from_secs(60)).await;
        });

        let err = api(&url, Duration::from_secs(1))
            .partition("page_2.pdf", b"%PDF-1.7 fake")
            .await
            .unwrap_err();
        assert_eq!(err, AttemptError::Timeout { secs: 1 });
        server.abort();
    }
}
