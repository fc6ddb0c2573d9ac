//! CSRF-aware request guard.
//!
//! Every state-changing call to the league API carries an anti-forgery token.
//! The guard attaches the token, and when the backend rejects it as stale it
//! refreshes the token and retries the request exactly once. A failed retry
//! surfaces the ORIGINAL rejection to the caller, never the retry's.

pub mod token;

pub use token::{CookieShelf, CsrfError, CsrfTokenStore};

use std::sync::Arc;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Client, Method, Request, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};
use url::{Origin, Url};

pub const CSRF_HEADER: &str = "x-xsrf-token";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request rejected ({status}): {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Wraps the shared HTTP client and enforces the per-request CSRF contract.
pub struct CsrfGuard {
    http: Client,
    api_origin: Origin,
    /// Paths on the API origin that are served unauthenticated.
    public_paths: Vec<String>,
    tokens: Arc<CsrfTokenStore>,
}

impl CsrfGuard {
    pub fn new(
        http: Client,
        base: &Url,
        public_paths: Vec<String>,
        tokens: Arc<CsrfTokenStore>,
    ) -> Self {
        CsrfGuard {
            http,
            api_origin: base.origin(),
            public_paths,
            tokens,
        }
    }

    pub fn client(&self) -> &Client {
        &self.http
    }

    pub fn token_store(&self) -> &Arc<CsrfTokenStore> {
        &self.tokens
    }

    /// Send a request under the CSRF contract.
    ///
    /// Requests to other origins, to public paths, and with non-mutating
    /// methods pass through unchanged. Mutating API requests get the token
    /// header; a 403 triggers one refresh-and-retry. Token acquisition
    /// failure never blocks the call: the request goes out without a token
    /// and the backend rejects it on its own terms.
    pub async fn execute(&self, request: Request) -> Result<Response, GuardError> {
        let same_origin = request.url().origin() == self.api_origin;
        let exempt = !same_origin
            || self.is_public(request.url().path())
            || !is_mutating(request.method());
        if exempt {
            let response = self.http.execute(request).await?;
            if same_origin {
                self.tokens.shelf().absorb(&response);
            }
            return Ok(response);
        }

        let retry_request = request.try_clone();
        let mut request = request;

        let token = match self.tokens.get_token_sync() {
            Some(token) => Some(token),
            None => match self.tokens.initialize_token().await {
                Ok(token) => Some(token),
                Err(err) => {
                    warn!("csrf token unavailable ({err}); sending request without one");
                    None
                }
            },
        };
        if let Some(token) = &token {
            attach_token(&mut request, token);
        }

        let response = self.http.execute(request).await?;
        self.tokens.shelf().absorb(&response);
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        // The token was stale. Keep the original rejection: if the retry
        // fails too, that is what the caller gets.
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let original = GuardError::Rejected { status, body };

        let Some(mut retry) = retry_request else {
            return Err(original);
        };
        let fresh = match self.tokens.refresh_token().await {
            Ok(token) => token,
            Err(err) => {
                debug!("token refresh failed: {err}");
                return Err(original);
            }
        };
        attach_token(&mut retry, &fresh);
        match self.http.execute(retry).await {
            Ok(response) if response.status() != StatusCode::FORBIDDEN => {
                self.tokens.shelf().absorb(&response);
                Ok(response)
            }
            Ok(_) | Err(_) => Err(original),
        }
    }

    fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| p == path)
    }
}

fn is_mutating(method: &Method) -> bool {
    method == Method::POST
        || method == Method::PUT
        || method == Method::PATCH
        || method == Method::DELETE
}

fn attach_token(request: &mut Request, token: &str) {
    // A token that is not a valid header value can only get the request
    // rejected; leave it off and let the backend decide.
    if let Ok(value) = HeaderValue::from_str(token) {
        request
            .headers_mut()
            .insert(HeaderName::from_static(CSRF_HEADER), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::extract::State;
    use axum::http::{header, HeaderMap};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Stub backend: /users/csrf issues tok-1, tok-2, ... as cookies; the
    /// save endpoint accepts tokens numbered >= `accept_from` and rejects
    /// the rest with a numbered 403 body.
    #[derive(Clone)]
    struct Stub {
        csrf_calls: Arc<AtomicUsize>,
        save_calls: Arc<AtomicUsize>,
        accept_from: usize,
        seen_tokens: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl Stub {
        fn new(accept_from: usize) -> Stub {
            Stub {
                csrf_calls: Arc::new(AtomicUsize::new(0)),
                save_calls: Arc::new(AtomicUsize::new(0)),
                accept_from,
                seen_tokens: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    async fn csrf_handler(State(stub): State<Stub>) -> impl IntoResponse {
        let n = stub.csrf_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut headers = HeaderMap::new();
        headers.insert(
            header::SET_COOKIE,
            format!("XSRF-TOKEN=tok-{n}; Path=/").parse().unwrap(),
        );
        (headers, "ok")
    }

    async fn save_handler(State(stub): State<Stub>, headers: HeaderMap) -> impl IntoResponse {
        let call = stub.save_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let token = headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        stub.seen_tokens.lock().unwrap().push(token.clone());
        let accepted = token
            .as_deref()
            .and_then(|t| t.strip_prefix("tok-"))
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| n >= stub.accept_from);
        if accepted {
            (StatusCode::OK, "saved".to_string())
        } else {
            (StatusCode::FORBIDDEN, format!("rejection-{call}"))
        }
    }

    async fn list_handler(State(stub): State<Stub>, headers: HeaderMap) -> impl IntoResponse {
        stub.seen_tokens
            .lock()
            .unwrap()
            .push(headers.get(CSRF_HEADER).map(|_| "present".to_string()));
        "[]"
    }

    async fn stub_guard(accept_from: usize) -> (Arc<CsrfGuard>, Stub, String) {
        let stub = Stub::new(accept_from);
        let router = Router::new()
            .route("/users/csrf", post(csrf_handler))
            .route("/hockey/game/save", post(save_handler))
            .route("/hockey/game/list/banner", get(list_handler))
            .with_state(stub.clone());
        let (base, _server) = test_support::serve(router).await;
        let guard = test_support::make_guard(&base, &["/users/csrf"]);
        (guard, stub, base)
    }

    fn post_request(guard: &CsrfGuard, base: &str, path: &str) -> Request {
        guard
            .client()
            .post(format!("{base}{path}"))
            .json(&serde_json::json!({"id": 1}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_mutating_request_fetches_token_first() {
        let (guard, stub, base) = stub_guard(1).await;
        let resp = guard
            .execute(post_request(&guard, &base, "/hockey/game/save"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.csrf_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.save_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_token_refreshes_and_retries_once() {
        let (guard, stub, base) = stub_guard(1).await;
        // Pre-seed a stale token so the refresh is the only csrf call.
        guard.token_store().shelf().insert("XSRF-TOKEN", "tok-0");

        let resp = guard
            .execute(post_request(&guard, &base, "/hockey/game/save"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.csrf_calls.load(Ordering::SeqCst), 1, "one refresh");
        assert_eq!(stub.save_calls.load(Ordering::SeqCst), 2, "one retry");
        assert_eq!(
            *stub.seen_tokens.lock().unwrap(),
            vec![Some("tok-0".to_string()), Some("tok-1".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_retry_propagates_the_original_rejection() {
        // Backend never accepts any token.
        let (guard, stub, base) = stub_guard(usize::MAX).await;
        guard.token_store().shelf().insert("XSRF-TOKEN", "tok-0");

        let err = guard
            .execute(post_request(&guard, &base, "/hockey/game/save"))
            .await
            .unwrap_err();
        match err {
            GuardError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, "rejection-1", "original error, not the retry's");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert_eq!(stub.save_calls.load(Ordering::SeqCst), 2, "exactly one retry");
        assert_eq!(stub.csrf_calls.load(Ordering::SeqCst), 1, "exactly one refresh");
    }

    #[tokio::test]
    async fn test_get_requests_pass_through_untouched() {
        let (guard, stub, base) = stub_guard(1).await;
        let req = guard
            .client()
            .get(format!("{base}/hockey/game/list/banner"))
            .build()
            .unwrap();
        let resp = guard.execute(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stub.csrf_calls.load(Ordering::SeqCst), 0);
        assert_eq!(*stub.seen_tokens.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_public_paths_skip_the_token() {
        let stub = Stub::new(1);
        let router = Router::new()
            .route("/users/signin", post(save_handler))
            .with_state(stub.clone());
        let (base, _server) = test_support::serve(router).await;
        let guard = test_support::make_guard(&base, &["/users/csrf", "/users/signin"]);

        let req = post_request(&guard, &base, "/users/signin");
        let resp = guard.execute(req).await.unwrap();
        // The stub 403s (no token), but the guard must not retry or fetch
        // a token for a public path.
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(stub.csrf_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.save_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_foreign_origin_passes_through() {
        let (guard, _stub, _base) = stub_guard(1).await;

        let foreign = Stub::new(1);
        let router = Router::new()
            .route("/anything", post(save_handler))
            .with_state(foreign.clone());
        let (foreign_base, _server) = test_support::serve(router).await;

        let req = post_request(&guard, &foreign_base, "/anything");
        let resp = guard.execute(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(*foreign.seen_tokens.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_token_fetch_failure_falls_through_without_token() {
        // No csrf route at all: acquisition fails, the request still goes out.
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_by_handler = Arc::clone(&seen);
        let router = Router::new().route(
            "/hockey/game/save",
            post(move |headers: HeaderMap| {
                let seen = Arc::clone(&seen_by_handler);
                async move {
                    seen.lock()
                        .unwrap()
                        .push(headers.get(CSRF_HEADER).map(|_| "present".to_string()));
                    (StatusCode::OK, "saved")
                }
            }),
        );
        let (base, _server) = test_support::serve(router).await;
        let guard = test_support::make_guard(&base, &["/users/csrf"]);

        let resp = guard
            .execute(post_request(&guard, &base, "/hockey/game/save"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(*seen.lock().unwrap(), vec![None]);
    }
}
