//! HTTP probe logic.
//!
//! Performs one bounded GET against a monitor's URL and classifies the
//! outcome. There are no retries here: a failed probe is reported as-is and
//! the caller records it like any other result.

use std::time::{Duration, Instant};

use reqwest::redirect;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// User-agent sent with every probe.
pub const USER_AGENT: &str = concat!("uptime/", env!("CARGO_PKG_VERSION"));

/// Redirects followed before the next redirect response is taken as final.
pub const MAX_REDIRECTS: usize = 10;

/// Classified result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    /// Status of the final response; absent when no response arrived.
    pub status_code: Option<u16>,
    /// Milliseconds from request start to response or failure.
    pub response_time_ms: u64,
    pub is_up: bool,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A probe client bound to one timeout.
///
/// Each worker builds its own prober when it starts, so the timeout is
/// fixed for the lifetime of that worker.
#[derive(Debug, Clone)]
pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(redirect::Policy::custom(|attempt| {
                // `previous` includes the URL that produced this redirect.
                if attempt.previous().len() > MAX_REDIRECTS {
                    attempt.stop()
                } else {
                    attempt.follow()
                }
            }))
            .build()
            .map_err(ProbeError::Client)?;
        Ok(Self { client, timeout })
    }

    /// Probe `url` once.
    ///
    /// Only an unparseable URL is an error. Connection, DNS, TLS, and
    /// timeout failures are reported as a down outcome without a status.
    pub async fn probe(&self, url: &str) -> Result<ProbeOutcome, ProbeError> {
        let target = reqwest::Url::parse(url).map_err(|e| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let start = Instant::now();
        let result = self.client.get(target).send().await;
        let response_time_ms = elapsed_ms(start);

        let outcome = match result {
            Ok(resp) => {
                let code = resp.status().as_u16();
                if !is_up_status(code) {
                    debug!(status = code, %url, "probe returned failing status");
                }
                ProbeOutcome {
                    status_code: Some(code),
                    response_time_ms,
                    is_up: is_up_status(code),
                }
            }
            Err(e) => {
                if e.is_timeout() {
                    debug!(%url, timeout_ms = self.timeout.as_millis() as u64, "probe timed out");
                } else {
                    debug!(error = %e, %url, "probe request failed");
                }
                ProbeOutcome {
                    status_code: None,
                    response_time_ms,
                    is_up: false,
                }
            }
        };
        Ok(outcome)
    }
}

/// A response counts as up iff its status is in `[200, 400)`.
pub fn is_up_status(code: u16) -> bool {
    (200..400).contains(&code)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::extract::Path;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::get;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// `/r/{n}` redirects to `/r/{n-1}` until `/r/0`, which returns 200.
    async fn redirect_chain(Path(n): Path<u32>) -> impl IntoResponse {
        if n == 0 {
            StatusCode::OK.into_response()
        } else {
            (StatusCode::FOUND, [(header::LOCATION, format!("/r/{}", n - 1))]).into_response()
        }
    }

    fn prober() -> Prober {
        Prober::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn up_status_range() {
        assert!(!is_up_status(199));
        assert!(is_up_status(200));
        assert!(is_up_status(302));
        assert!(is_up_status(399));
        assert!(!is_up_status(400));
        assert!(!is_up_status(500));
    }

    #[tokio::test]
    async fn success_is_up_with_status() {
        let base = serve(Router::new().route("/", get(|| async { "ok" }))).await;

        let outcome = prober().probe(&format!("{base}/")).await.unwrap();
        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.is_up);
    }

    #[tokio::test]
    async fn server_error_is_down_with_status() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;

        let outcome = prober().probe(&format!("{base}/")).await.unwrap();
        assert_eq!(outcome.status_code, Some(503));
        assert!(!outcome.is_up);
    }

    #[tokio::test]
    async fn sends_user_agent() {
        let base = serve(Router::new().route(
            "/",
            get(|headers: axum::http::HeaderMap| async move {
                match headers.get(header::USER_AGENT) {
                    Some(ua) if ua == USER_AGENT => StatusCode::OK,
                    _ => StatusCode::BAD_REQUEST,
                }
            }),
        ))
        .await;

        let outcome = prober().probe(&format!("{base}/")).await.unwrap();
        assert_eq!(outcome.status_code, Some(200));
    }

    #[tokio::test]
    async fn follows_ten_redirects() {
        let base = serve(Router::new().route("/r/{n}", get(redirect_chain))).await;

        let outcome = prober().probe(&format!("{base}/r/10")).await.unwrap();
        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.is_up);
    }

    #[tokio::test]
    async fn eleventh_redirect_is_final_response() {
        let base = serve(Router::new().route("/r/{n}", get(redirect_chain))).await;

        let outcome = prober().probe(&format!("{base}/r/11")).await.unwrap();
        assert_eq!(outcome.status_code, Some(302));
        // 3xx is inside the up range.
        assert!(outcome.is_up);
    }

    #[tokio::test]
    async fn timeout_is_down_without_status() {
        let base = serve(Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;

        let prober = Prober::new(Duration::from_millis(200)).unwrap();
        let outcome = prober.probe(&format!("{base}/")).await.unwrap();
        assert_eq!(outcome.status_code, None);
        assert!(!outcome.is_up);
        assert!(outcome.response_time_ms >= 150);
        assert!(outcome.response_time_ms < 5_000);
    }

    #[tokio::test]
    async fn invalid_url_is_an_error() {
        let err = prober().probe("not a url").await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidUrl { .. }));
    }
}
