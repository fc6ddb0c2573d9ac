//! Leader-coordinated live-game banner feed.
//!
//! Any number of feed instances may run against one league API; instances
//! sharing a `LeaderElector` and `Broadcaster` elect exactly one poller among
//! themselves. The leader polls the banner endpoint on an interval while a
//! session is active and fans the full list out to every instance; followers
//! only display what the leader relays. An instance polls iff it is leader
//! AND authenticated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::models::BannerItem;
use crate::api::ApiClient;
use crate::coordination::{BannerMessage, Broadcaster, LeaderElector, LeadershipGuard};

/// What consumers of the banner observe. A failed poll keeps the last good
/// `items` and only sets `error`; it is never surfaced as a panic or a
/// thrown error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BannerState {
    pub items: Vec<BannerItem>,
    pub loading: bool,
    pub error: Option<String>,
    pub is_leader: bool,
    pub is_authenticated: bool,
}

#[derive(Debug, Clone)]
pub struct BannerFeedConfig {
    /// Broadcast topic shared by sibling instances.
    pub channel: String,
    /// Leader-election lock name.
    pub lock: String,
    pub poll_interval: Duration,
}

impl Default for BannerFeedConfig {
    fn default() -> BannerFeedConfig {
        BannerFeedConfig {
            channel: "game_banner_channel".into(),
            lock: "game_banner_leader".into(),
            poll_interval: Duration::from_secs(60),
        }
    }
}

enum Command {
    Refresh,
    Shutdown,
}

/// Handle to one running feed instance.
pub struct BannerFeed {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<BannerState>,
    task: tokio::task::JoinHandle<()>,
}

impl BannerFeed {
    pub fn spawn(
        config: BannerFeedConfig,
        api: ApiClient,
        auth: watch::Receiver<bool>,
        elector: Option<Arc<dyn LeaderElector>>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> BannerFeed {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(BannerState::default());
        let worker = FeedWorker {
            config,
            api,
            auth,
            elector,
            broadcaster,
            state: state_tx,
            cmd_rx,
        };
        let task = tokio::spawn(worker.run());
        BannerFeed {
            cmd_tx,
            state_rx,
            task,
        }
    }

    /// Ask for a fresh banner now. A leader with a session polls
    /// immediately; a leader without one ignores the request; a follower
    /// relays it to the leader over the channel and never polls locally.
    pub async fn trigger_refresh(&self) {
        let _ = self.cmd_tx.send(Command::Refresh).await;
    }

    pub fn state(&self) -> watch::Receiver<BannerState> {
        self.state_rx.clone()
    }

    /// Stop polling, release leadership so a successor can be elected, and
    /// drop the channel subscription.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        let _ = self.task.await;
    }
}

struct FeedWorker {
    config: BannerFeedConfig,
    api: ApiClient,
    auth: watch::Receiver<bool>,
    elector: Option<Arc<dyn LeaderElector>>,
    broadcaster: Arc<dyn Broadcaster>,
    state: watch::Sender<BannerState>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl FeedWorker {
    async fn run(mut self) {
        let mut subscription = self.broadcaster.subscribe(&self.config.channel);
        let mut authed = *self.auth.borrow();
        self.state.send_modify(|s| s.is_authenticated = authed);

        let acquire = Self::acquire_leadership(self.elector.clone(), self.config.lock.clone());
        tokio::pin!(acquire);
        let mut leadership: Option<LeadershipGuard> = None;
        let mut is_leader = false;
        let mut acquired = false;
        let mut auth_open = true;
        let mut sub_open = true;

        let mut ticker = self.new_ticker();

        loop {
            tokio::select! {
                guard = &mut acquire, if !acquired => {
                    acquired = true;
                    leadership = guard;
                    is_leader = true;
                    self.state.send_modify(|s| s.is_leader = true);
                    info!("instance became banner leader ('{}')", self.config.lock);
                    if authed {
                        // Fresh ticker: the first tick fires immediately.
                        ticker = self.new_ticker();
                    }
                }
                _ = ticker.tick(), if is_leader && authed => {
                    self.poll_and_broadcast().await;
                }
                changed = self.auth.changed(), if auth_open => {
                    if changed.is_err() {
                        // Auth stream gone; keep the last known value.
                        auth_open = false;
                        continue;
                    }
                    let now = *self.auth.borrow_and_update();
                    if now == authed {
                        continue;
                    }
                    authed = now;
                    self.state.send_modify(|s| s.is_authenticated = now);
                    if is_leader && now {
                        info!("authenticated; banner polling resumes");
                        ticker = self.new_ticker();
                    } else if is_leader {
                        info!("signed out; banner polling paused");
                    }
                }
                message = subscription.recv(), if sub_open => match message {
                    Ok(BannerMessage::BannerList { items }) => self.apply_items(items),
                    Ok(BannerMessage::RefreshRequest) => {
                        if is_leader && authed {
                            self.poll_and_broadcast().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("banner channel lagged by {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => sub_open = false,
                },
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Refresh) => {
                        if is_leader && authed {
                            self.poll_and_broadcast().await;
                        } else if !is_leader {
                            self.broadcaster
                                .publish(&self.config.channel, BannerMessage::RefreshRequest);
                        }
                        // A leader without a session ignores the request.
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        // Dropping the guard resolves the lock so a successor can win.
        drop(leadership);
        debug!("banner feed stopped");
    }

    async fn acquire_leadership(
        elector: Option<Arc<dyn LeaderElector>>,
        lock: String,
    ) -> Option<LeadershipGuard> {
        match elector {
            Some(elector) => match elector.acquire(&lock).await {
                Ok(guard) => Some(guard),
                Err(err) => {
                    // Availability over correctness: a broken election
                    // primitive must not take the banner down, even at the
                    // cost of several instances polling at once.
                    warn!("leader election failed ({err:#}); assuming leadership");
                    None
                }
            },
            None => {
                warn!("leader election unavailable; every instance will poll independently");
                None
            }
        }
    }

    fn new_ticker(&self) -> Interval {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Replace the displayed list with a broadcast one. Every list is a full
    /// replacement, so receiving the same message twice is a no-op.
    fn apply_items(&self, items: Vec<BannerItem>) {
        self.state.send_if_modified(|s| {
            let changed = s.items != items || s.error.is_some() || s.loading;
            s.items = items;
            s.error = None;
            s.loading = false;
            changed
        });
    }

    async fn poll_and_broadcast(&self) {
        self.state.send_modify(|s| s.loading = true);
        match self.api.fetch_banner().await {
            Ok(items) => {
                self.state.send_modify(|s| {
                    s.items = items.clone();
                    s.error = None;
                    s.loading = false;
                });
                self.broadcaster
                    .publish(&self.config.channel, BannerMessage::BannerList { items });
            }
            Err(err) => {
                // Keep the last good list; the next scheduled tick retries.
                warn!("banner poll failed: {err:#}");
                self.state.send_modify(|s| {
                    s.error = Some(err.to_string());
                    s.loading = false;
                });
            }
        }
    }
}
