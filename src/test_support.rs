//! Shared helpers for in-test stub backends.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::csrf::{CookieShelf, CsrfGuard, CsrfTokenStore};

/// Bind a stub backend on an ephemeral port and serve it in the background.
pub async fn serve(router: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

pub fn make_guard(base_url: &str, public_paths: &[&str]) -> Arc<CsrfGuard> {
    let base = url::Url::parse(base_url).unwrap();
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .cookie_store(true)
        .build()
        .unwrap();
    let shelf = Arc::new(CookieShelf::new());
    let tokens = Arc::new(CsrfTokenStore::new(http.clone(), &base, "XSRF-TOKEN", shelf).unwrap());
    Arc::new(CsrfGuard::new(
        http,
        &base,
        public_paths.iter().map(|p| p.to_string()).collect(),
        tokens,
    ))
}

pub fn make_api(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, make_guard(base_url, &["/users/csrf"])).unwrap()
}
