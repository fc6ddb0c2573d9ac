use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod api;
mod auth;
mod banner;
mod config;
mod coordination;
mod csrf;
#[cfg(test)]
mod test_support;

use api::ApiClient;
use auth::AuthSession;
use banner::{BannerFeed, BannerFeedConfig};
use config::Config;
use coordination::{Broadcaster, ChannelBroadcaster, LeaderElector, LocalElector};
use csrf::{CookieShelf, CsrfGuard, CsrfTokenStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let base = url::Url::parse(&config.api_base_url)?;
    // The cookie store replays the backend's session cookie; the shelf only
    // mirrors cookie values for token extraction.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .cookie_store(true)
        .build()?;
    let shelf = Arc::new(CookieShelf::new());
    let tokens = Arc::new(CsrfTokenStore::new(
        http.clone(),
        &base,
        &config.csrf_cookie,
        Arc::clone(&shelf),
    )?);
    let guard = Arc::new(CsrfGuard::new(
        http,
        &base,
        config.public_paths.clone(),
        tokens,
    ));
    let api = ApiClient::new(&config.api_base_url, guard)?;
    let auth = AuthSession::new(api.clone());
    info!("league API: {}", config.api_base_url);

    // Establish a session before the feeds start, so the leader polls right
    // away instead of idling until sign-in.
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        auth.sign_in(username, password).await?;
    } else {
        match auth.restore().await {
            Ok(true) => info!("existing session restored"),
            Ok(false) => warn!("no active session; banner polling waits for sign-in"),
            Err(err) => warn!("session probe failed: {err:#}"),
        }
    }

    let elector: Option<Arc<dyn LeaderElector>> = if config.no_leader_election {
        None
    } else {
        Some(Arc::new(LocalElector::new()))
    };
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(ChannelBroadcaster::new());

    let feed_config = BannerFeedConfig {
        channel: config.banner_channel.clone(),
        lock: config.leader_lock.clone(),
        poll_interval: Duration::from_secs(config.poll_interval_secs),
    };

    let feeds: Vec<BannerFeed> = (0..config.instances)
        .map(|_| {
            BannerFeed::spawn(
                feed_config.clone(),
                api.clone(),
                auth.subscribe(),
                elector.clone(),
                Arc::clone(&broadcaster),
            )
        })
        .collect();
    info!("started {} banner feed instance(s)", feeds.len());

    // Log banner updates as the first instance sees them.
    let mut state_rx = feeds[0].state();
    tokio::spawn(async move {
        let mut last = banner::BannerState::default();
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow().clone();
            if state.is_leader && !last.is_leader {
                info!("this instance is the banner leader");
            }
            if state.is_authenticated != last.is_authenticated {
                info!(
                    "session {}",
                    if state.is_authenticated { "active" } else { "ended" }
                );
            }
            last = state.clone();
            if state.loading {
                continue;
            }
            if let Some(err) = &state.error {
                warn!("banner unavailable (showing last known list): {err}");
                continue;
            }
            for game in &state.items {
                info!(
                    "{} {} - {} {} [{:?}]",
                    game.home_team_name,
                    game.home_goals,
                    game.away_goals,
                    game.away_team_name,
                    game.status
                );
            }
        }
    });

    // Ask the current leader for a fresh list right away; from a follower
    // instance this relays over the broadcast channel.
    if let Some(feed) = feeds.last() {
        feed.trigger_refresh().await;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    for feed in feeds {
        feed.shutdown().await;
    }
    if config.username.is_some() {
        // We created this session, so end it.
        auth.sign_out().await;
    }
    Ok(())
}
