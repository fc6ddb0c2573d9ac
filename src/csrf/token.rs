use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum CsrfError {
    #[error("token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned {status}")]
    Endpoint { status: StatusCode },

    /// Deployment defect, not a runtime condition to retry around.
    #[error(
        "csrf cookie '{cookie}' not visible after calling {endpoint}; if the API \
         is served from another origin the Set-Cookie header is most likely being \
         blocked and cookie delivery must be fixed at the backend/CORS layer"
    )]
    CookieNotVisible { cookie: String, endpoint: String },
}

/// In-memory cookie store for this process, the analogue of the browser's
/// cookie jar. The guard feeds it every API response's `Set-Cookie` headers;
/// the token store reads it without touching the network.
#[derive(Default)]
pub struct CookieShelf {
    inner: Mutex<HashMap<String, String>>,
}

impl CookieShelf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&self, response: &Response) {
        self.absorb_headers(response.headers());
    }

    pub fn absorb_headers(&self, headers: &HeaderMap) {
        let mut inner = self.inner.lock().unwrap();
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            // Only the name=value pair matters; attributes are the
            // transport's concern.
            let pair = raw.split(';').next().unwrap_or("");
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() {
                continue;
            }
            if value.is_empty() {
                // Backend cleared the cookie.
                inner.remove(name);
            } else {
                inner.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.lock().unwrap().get(name).cloned()
    }

    #[cfg(test)]
    pub fn insert(&self, name: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
    }
}

#[derive(Default)]
struct TokenCell {
    token: Option<String>,
    initialized: bool,
}

/// Cache for the anti-forgery token, fed by the token endpoint and the
/// cookie shelf. Constructed once at startup and shared by reference.
pub struct CsrfTokenStore {
    http: Client,
    endpoint: Url,
    cookie_name: String,
    shelf: Arc<CookieShelf>,
    cached: Mutex<TokenCell>,
    /// Single-flights cold initialization so concurrent callers share one
    /// endpoint call.
    init_lock: tokio::sync::Mutex<()>,
}

impl CsrfTokenStore {
    pub fn new(
        http: Client,
        base: &Url,
        cookie_name: &str,
        shelf: Arc<CookieShelf>,
    ) -> anyhow::Result<Self> {
        let endpoint = base.join("/users/csrf").context("invalid API base URL")?;
        Ok(CsrfTokenStore {
            http,
            endpoint,
            cookie_name: cookie_name.to_string(),
            shelf,
            cached: Mutex::new(TokenCell::default()),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn shelf(&self) -> &Arc<CookieShelf> {
        &self.shelf
    }

    fn cached_token(&self) -> Option<String> {
        let cell = self.cached.lock().unwrap();
        if cell.initialized {
            cell.token.clone()
        } else {
            None
        }
    }

    fn cache(&self, token: String) {
        let mut cell = self.cached.lock().unwrap();
        cell.token = Some(token);
        cell.initialized = true;
    }

    /// Fetch (or return the cached) anti-forgery token. Idempotent: once a
    /// token is cached no further network calls are made until it is cleared.
    ///
    /// The endpoint sets the token as a cookie. Extraction order: the cookie
    /// shelf after absorbing the response, then a direct `Set-Cookie` header
    /// parse, then a configuration error.
    pub async fn initialize_token(&self) -> Result<String, CsrfError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }
        let _inflight = self.init_lock.lock().await;
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        debug!("requesting csrf token from {}", self.endpoint);
        let response = self.http.post(self.endpoint.clone()).send().await?;
        let status = response.status();
        self.shelf.absorb(&response);

        let token = self
            .shelf
            .get(&self.cookie_name)
            .filter(|t| !t.is_empty())
            .or_else(|| token_from_set_cookie(response.headers(), &self.cookie_name));

        match token {
            Some(token) => {
                self.cache(token.clone());
                Ok(token)
            }
            None if !status.is_success() => Err(CsrfError::Endpoint { status }),
            None => Err(CsrfError::CookieNotVisible {
                cookie: self.cookie_name.clone(),
                endpoint: self.endpoint.to_string(),
            }),
        }
    }

    /// Cached token, or one synchronous shelf read. Never hits the network.
    pub fn get_token_sync(&self) -> Option<String> {
        let mut cell = self.cached.lock().unwrap();
        if let Some(token) = &cell.token {
            return Some(token.clone());
        }
        let token = self.shelf.get(&self.cookie_name).filter(|t| !t.is_empty())?;
        cell.token = Some(token.clone());
        cell.initialized = true;
        Some(token)
    }

    /// Drop the cached token and fetch a fresh one.
    pub async fn refresh_token(&self) -> Result<String, CsrfError> {
        self.clear_token();
        self.initialize_token().await
    }

    /// Forget the token entirely (sign-out).
    pub fn clear_token(&self) {
        let mut cell = self.cached.lock().unwrap();
        cell.token = None;
        cell.initialized = false;
    }
}

/// Pull the token straight out of the `Set-Cookie` headers. Redundant right
/// after the shelf has absorbed the same response; kept as a separate step so
/// a shelf that filters or drops cookies cannot hide the token.
fn token_from_set_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for value in headers.get_all(SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let pair = raw.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            if name.trim() == cookie_name && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
