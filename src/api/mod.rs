pub mod models;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;
use url::Url;

use crate::csrf::CsrfGuard;
use models::{parse_banner_response, BannerItem};

/// Client for the league REST API. All traffic funnels through the CSRF
/// guard, so session cookies are absorbed and mutating calls carry a token.
#[derive(Clone)]
pub struct ApiClient {
    guard: Arc<CsrfGuard>,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, guard: Arc<CsrfGuard>) -> Result<Self> {
        let base = Url::parse(base_url).context("invalid API base URL")?;
        Ok(ApiClient { guard, base })
    }

    pub fn guard(&self) -> &Arc<CsrfGuard> {
        &self.guard
    }

    /// Fetch the current live-game banner list.
    pub async fn fetch_banner(&self) -> Result<Vec<BannerItem>> {
        let url = self.base.join("/hockey/game/list/banner")?;
        debug!("fetching banner list from {url}");
        let request = self.guard.client().get(url).build()?;
        let response = self
            .guard
            .execute(request)
            .await
            .context("banner request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("banner endpoint error: {}", response.status());
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .context("failed to parse banner response")?;
        Ok(parse_banner_response(&raw))
    }

    /// Sign in; the backend sets the session cookie on success.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        let url = self.base.join("/users/signin")?;
        let request = self
            .guard
            .client()
            .post(url)
            .json(&serde_json::json!({ "username": username, "password": password }))
            .build()?;
        let response = self
            .guard
            .execute(request)
            .await
            .context("sign-in request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("sign-in rejected: {}", response.status());
        }
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        let url = self.base.join("/users/signout")?;
        let request = self.guard.client().post(url).build()?;
        let response = self
            .guard
            .execute(request)
            .await
            .context("sign-out request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("sign-out rejected: {}", response.status());
        }
        Ok(())
    }

    /// Whether the backend still recognises this process's session cookie.
    pub async fn session_active(&self) -> Result<bool> {
        let url = self.base.join("/users/get")?;
        let request = self.guard.client().get(url).build()?;
        let response = self
            .guard
            .execute(request)
            .await
            .context("session probe failed")?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use axum::routing::get;
    use axum::{Json, Router};
    use models::GameStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_banner_parses_list() {
        let router = Router::new().route(
            "/hockey/game/list/banner",
            get(|| async {
                Json(json!([{
                    "id": 1, "home_team_id": 10, "away_team_id": 11,
                    "home_team_name": "Ice Hawks", "away_team_name": "River Rats",
                    "home_goals": 1, "away_goals": 0, "status": 2,
                }]))
            }),
        );
        let (base, _server) = test_support::serve(router).await;
        let api = test_support::make_api(&base);

        let items = api.fetch_banner().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, GameStatus::InProgress);
        assert_eq!((items[0].home_goals, items[0].away_goals), (1, 0));
    }

    #[tokio::test]
    async fn test_fetch_banner_object_payload_is_empty_list() {
        let router = Router::new().route(
            "/hockey/game/list/banner",
            get(|| async { Json(json!({"message": "no games"})) }),
        );
        let (base, _server) = test_support::serve(router).await;
        let api = test_support::make_api(&base);

        assert!(api.fetch_banner().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_banner_server_error_is_an_error() {
        let router = Router::new().route(
            "/hockey/game/list/banner",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "upstream down") }),
        );
        let (base, _server) = test_support::serve(router).await;
        let api = test_support::make_api(&base);

        assert!(api.fetch_banner().await.is_err());
    }
}
