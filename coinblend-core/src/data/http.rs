//! Blocking JSON-over-HTTP client shared by the remote providers.
//!
//! Adds an explicit request timeout and a small bounded retry with exponential
//! backoff. Only transient failures are retried (connect errors, timeouts,
//! 429 and 5xx); everything else is returned on the first attempt.

use super::provider::FetchErrorKind;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Timeout and retry settings for provider HTTP calls.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Thin wrapper over `reqwest::blocking::Client` that decodes JSON bodies.
pub struct JsonClient {
    client: reqwest::blocking::Client,
    settings: HttpSettings,
}

impl JsonClient {
    pub fn new(settings: HttpSettings) -> Result<Self, FetchErrorKind> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("coinblend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchErrorKind::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// GET `url` and decode the body as `T`.
    ///
    /// `label` is what gets logged in place of the URL, which may carry a key.
    pub fn get_json<T: DeserializeOwned>(&self, url: &str, label: &str) -> Result<T, FetchErrorKind> {
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.settings.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(source = label, attempt, ?delay, "retrying");
                std::thread::sleep(delay);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) => {
                    let e = e.without_url();
                    if e.is_timeout() {
                        last_error = Some(self.timeout_error());
                        continue;
                    }
                    if e.is_connect() {
                        last_error = Some(FetchErrorKind::Network(e.to_string()));
                        continue;
                    }
                    return Err(FetchErrorKind::Network(e.to_string()));
                }
            };

            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok());
            match classify_status(resp.status(), retry_after, label) {
                StatusOutcome::Success => {}
                StatusOutcome::Retry(kind) => {
                    last_error = Some(kind);
                    continue;
                }
                StatusOutcome::Fail(kind) => return Err(kind),
            }

            match resp.json::<T>() {
                Ok(body) => return Ok(body),
                // Body read ran past the deadline
                Err(e) if e.is_timeout() => {
                    last_error = Some(self.timeout_error());
                    continue;
                }
                Err(e) => {
                    return Err(FetchErrorKind::MalformedResponse(format!(
                        "{label}: {}",
                        e.without_url()
                    )))
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchErrorKind::Network("max retries exceeded".into())))
    }

    fn timeout_error(&self) -> FetchErrorKind {
        FetchErrorKind::Timeout {
            secs: self.settings.timeout.as_secs(),
        }
    }
}

/// What to do with a response, judged by its status line alone.
#[derive(Debug, PartialEq)]
pub(crate) enum StatusOutcome {
    Success,
    Retry(FetchErrorKind),
    Fail(FetchErrorKind),
}

/// Map an HTTP status to success, a retryable error, or a final error.
///
/// 429 and 5xx are retryable; 401/403, 404 and any other non-2xx are final.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<&str>,
    label: &str,
) -> StatusOutcome {
    use reqwest::StatusCode;

    match status {
        s if s.is_success() => StatusOutcome::Success,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StatusOutcome::Fail(
            FetchErrorKind::Unauthorized(format!("HTTP {} for {label}", status.as_u16())),
        ),
        StatusCode::NOT_FOUND => StatusOutcome::Fail(FetchErrorKind::NotFound),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after_secs = retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(60);
            StatusOutcome::Retry(FetchErrorKind::RateLimited { retry_after_secs })
        }
        s if s.is_server_error() => StatusOutcome::Retry(FetchErrorKind::Http {
            status: s.as_u16(),
        }),
        s => StatusOutcome::Fail(FetchErrorKind::Http { status: s.as_u16() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use serde_json::Value;
    use std::io::Write;

    fn client(max_retries: u32, timeout: Duration) -> JsonClient {
        JsonClient::new(HttpSettings {
            timeout,
            max_retries,
            base_delay: Duration::from_millis(1),
        })
        .unwrap()
    }

    // ── Status classification ──

    #[test]
    fn success_statuses_pass() {
        assert_eq!(classify_status(StatusCode::OK, None, "x"), StatusOutcome::Success);
        assert_eq!(classify_status(StatusCode::NO_CONTENT, None, "x"), StatusOutcome::Success);
    }

    #[test]
    fn auth_failures_are_final() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            match classify_status(status, None, "BCHARTS/KRAKENUSD") {
                StatusOutcome::Fail(FetchErrorKind::Unauthorized(msg)) => {
                    assert!(msg.contains("BCHARTS/KRAKENUSD"));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn not_found_is_final() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND, None, "x"),
            StatusOutcome::Fail(FetchErrorKind::NotFound)
        );
    }

    #[test]
    fn rate_limit_is_retryable_and_reads_retry_after() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some("7"), "x"),
            StatusOutcome::Retry(FetchErrorKind::RateLimited { retry_after_secs: 7 })
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some("soon"), "x"),
            StatusOutcome::Retry(FetchErrorKind::RateLimited { retry_after_secs: 60 })
        );
    }

    #[test]
    fn server_errors_retry_client_errors_do_not() {
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "x"),
            StatusOutcome::Retry(FetchErrorKind::Http { status: 503 })
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, None, "x"),
            StatusOutcome::Fail(FetchErrorKind::Http { status: 400 })
        );
    }

    // ── Retry behaviour against a local server ──

    #[test]
    fn decodes_json_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/data")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .expect(1)
            .create();

        let body: Value = client(2, Duration::from_secs(5))
            .get_json(&format!("{}/data", server.url()), "data")
            .unwrap();
        assert_eq!(body["ok"], true);
        mock.assert();
    }

    #[test]
    fn server_errors_are_retried_up_to_the_limit() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/flaky").with_status(503).expect(3).create();

        let err = client(2, Duration::from_secs(5))
            .get_json::<Value>(&format!("{}/flaky", server.url()), "flaky")
            .unwrap_err();
        assert_eq!(err, FetchErrorKind::Http { status: 503 });
        mock.assert();
    }

    #[test]
    fn rate_limit_is_retried() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/busy")
            .with_status(429)
            .with_header("retry-after", "3")
            .expect(2)
            .create();

        let err = client(1, Duration::from_secs(5))
            .get_json::<Value>(&format!("{}/busy", server.url()), "busy")
            .unwrap_err();
        assert_eq!(err, FetchErrorKind::RateLimited { retry_after_secs: 3 });
        mock.assert();
    }

    #[test]
    fn not_found_is_not_retried() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/missing").with_status(404).expect(1).create();

        let err = client(2, Duration::from_secs(5))
            .get_json::<Value>(&format!("{}/missing", server.url()), "missing")
            .unwrap_err();
        assert_eq!(err, FetchErrorKind::NotFound);
        mock.assert();
    }

    #[test]
    fn bad_json_is_malformed_and_not_retried() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/garbled")
            .with_status(200)
            .with_body("<html>")
            .expect(1)
            .create();

        let err = client(2, Duration::from_secs(5))
            .get_json::<Value>(&format!("{}/garbled", server.url()), "garbled")
            .unwrap_err();
        assert!(matches!(err, FetchErrorKind::MalformedResponse(_)));
        mock.assert();
    }

    #[test]
    fn slow_body_is_a_timeout() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/slow")
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(b"{")?;
                std::thread::sleep(Duration::from_millis(1500));
                w.write_all(b"}")
            })
            .create();

        let err = client(0, Duration::from_millis(300))
            .get_json::<Value>(&format!("{}/slow", server.url()), "slow")
            .unwrap_err();
        assert!(matches!(err, FetchErrorKind::Timeout { .. }), "got {err:?}");
    }

    #[test]
    fn refused_connection_is_a_network_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = client(1, Duration::from_secs(2))
            .get_json::<Value>(&format!("http://127.0.0.1:{port}/"), "closed")
            .unwrap_err();
        assert!(matches!(err, FetchErrorKind::Network(_)), "got {err:?}");
    }
}
