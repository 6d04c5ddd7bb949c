//! Axum middleware mapping admission decisions to HTTP responses
//!
//! Admitted requests pass through to the inner handler with
//! `X-RateLimit-Limit` and `X-RateLimit-Remaining` set on the response.
//! Rejected requests answer `429` with those headers, a `Retry-After`
//! in whole seconds (rounded up), and a JSON error body. Admission
//! errors answer `500`.
//!
//! # Example
//!
//! ```no_run
//! use axum::extract::Request;
//! use axum::{middleware, routing::get, Router};
//! use floodgate::http::{rate_limit, RateLimitState};
//! use floodgate::{Manager, MemoryStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let manager = Arc::new(Manager::new(
//!     10,
//!     5,
//!     Duration::from_secs(1),
//!     Duration::from_secs(600),
//!     Duration::from_secs(60),
//! )?);
//!
//! let state = RateLimitState::new(manager, |req: &Request| {
//!     req.headers()
//!         .get("x-api-key")
//!         .and_then(|value| value.to_str().ok())
//!         .unwrap_or("anonymous")
//!         .to_string()
//! });
//!
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "OK" }))
//!     .layer(middleware::from_fn_with_state(state, rate_limit::<MemoryStore>));
//! # Ok::<(), floodgate::Error>(())
//! ```

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use crate::core::{Decision, Manager, Store};

/// Shared middleware state: the manager plus a key extraction function
pub struct RateLimitState<S: Store> {
    manager: Arc<Manager<S>>,
    key_fn: Arc<dyn Fn(&Request) -> String + Send + Sync>,
}

impl<S: Store> RateLimitState<S> {
    /// Bind a manager to a key extractor
    ///
    /// The extractor derives the rate limiting key from the incoming
    /// request, for example a client IP or an API token header.
    pub fn new<F>(manager: Arc<Manager<S>>, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        RateLimitState {
            manager,
            key_fn: Arc::new(key_fn),
        }
    }
}

impl<S: Store> Clone for RateLimitState<S> {
    fn clone(&self) -> Self {
        RateLimitState {
            manager: Arc::clone(&self.manager),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

/// Admission middleware for `axum::middleware::from_fn_with_state`
pub async fn rate_limit<S: Store + 'static>(
    State(state): State<RateLimitState<S>>,
    req: Request,
    next: Next,
) -> Response {
    let key = (state.key_fn)(&req);

    let decision = match state.manager.allow_decision(&key) {
        Ok(decision) => decision,
        Err(err) => {
            error!(%err, %key, "admission check failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "rate limiter unavailable")
                .into_response();
        }
    };

    if decision.allowed {
        let mut response = next.run(req).await;
        set_limit_headers(response.headers_mut(), &decision);
        return response;
    }

    warn!(
        %key,
        retry_after_ms = decision.retry_after.as_millis() as u64,
        "rate limit exceeded"
    );

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({"error": "rate limit exceeded"})),
    )
        .into_response();
    set_limit_headers(response.headers_mut(), &decision);
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(retry_after_secs(&decision)));
    response
}

fn set_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
}

/// Seconds until retry, rounded up so clients never retry early
fn retry_after_secs(decision: &Decision) -> u64 {
    let retry_after = decision.retry_after;
    retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BucketConfig, Error, MemoryStore};
    use axum::body::{to_bytes, Body};
    use axum::{middleware, routing::get, Router};
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    fn request(key: &str) -> Request {
        axum::http::Request::builder()
            .uri("/")
            .header("x-api-key", key)
            .body(Body::empty())
            .unwrap()
    }

    fn key_by_header(req: &Request) -> String {
        req.headers()
            .get("x-api-key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("anonymous")
            .to_string()
    }

    fn app(capacity: i64) -> Router {
        let manager = Arc::new(
            Manager::new(
                capacity,
                1,
                Duration::from_secs(3600),
                Duration::from_secs(60),
                Duration::from_secs(60),
            )
            .unwrap(),
        );
        let state = RateLimitState::new(manager, key_by_header);

        Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(middleware::from_fn_with_state(
                state,
                rate_limit::<MemoryStore>,
            ))
    }

    #[tokio::test]
    async fn admitted_request_passes_with_headers() {
        let app = app(2);

        let response = app.oneshot(request("alice")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    }

    #[tokio::test]
    async fn rejected_request_gets_429_with_json_body() {
        let app = app(1);

        let first = app.clone().oneshot(request("bob")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request("bob")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()["x-ratelimit-limit"], "1");
        assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

        let retry_after: u64 = second.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 1);

        assert_eq!(
            second.headers()["content-type"],
            "application/json"
        );
        let body = to_bytes(second.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"error":"rate limit exceeded"}"#);
    }

    #[tokio::test]
    async fn keys_are_limited_independently() {
        let app = app(1);

        assert_eq!(
            app.clone().oneshot(request("a")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.clone().oneshot(request("b")).await.unwrap().status(),
            StatusCode::OK
        );
        assert_eq!(
            app.oneshot(request("a")).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    struct FailingStore;

    impl Store for FailingStore {
        fn allow(&self, _key: &str, _cfg: &BucketConfig) -> Result<Decision, Error> {
            Err(Error::Protocol("backend unavailable".into()))
        }

        fn delete_inactive(&self, _cutoff: Instant) -> Result<(), Error> {
            Ok(())
        }

        fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn admission_error_maps_to_500() {
        let manager = Arc::new(
            Manager::with_store(
                FailingStore,
                1,
                1,
                Duration::from_secs(1),
                Duration::from_secs(60),
                Duration::from_secs(60),
            )
            .unwrap(),
        );
        let state = RateLimitState::new(manager, key_by_header);

        let app = Router::new()
            .route("/", get(|| async { "OK" }))
            .layer(middleware::from_fn_with_state(
                state,
                rate_limit::<FailingStore>,
            ));

        let response = app.oneshot(request("carol")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        let decision = Decision {
            allowed: false,
            remaining: 0,
            limit: 1,
            retry_after: Duration::from_millis(1500),
        };
        assert_eq!(retry_after_secs(&decision), 2);

        let exact = Decision {
            retry_after: Duration::from_secs(3),
            ..decision
        };
        assert_eq!(retry_after_secs(&exact), 3);
    }
}
