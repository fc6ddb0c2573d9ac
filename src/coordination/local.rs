use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{BannerMessage, Broadcaster, LeaderElector, LeadershipGuard};

/// In-process leader election: one owned tokio mutex per lock name, shared by
/// every feed built from the same elector. Tokio mutexes queue waiters in
/// FIFO order, so releasing leadership hands it to the longest-waiting
/// instance.
#[derive(Default)]
pub struct LocalElector {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalElector {
    pub fn new() -> LocalElector {
        LocalElector::default()
    }
}

#[async_trait]
impl LeaderElector for LocalElector {
    async fn acquire(&self, name: &str) -> Result<LeadershipGuard> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            Arc::clone(locks.entry(name.to_string()).or_default())
        };
        let held = lock.lock_owned().await;
        debug!("acquired leader lock '{name}'");
        Ok(LeadershipGuard::new(held))
    }
}

/// One tokio broadcast channel per topic, created on first use.
#[derive(Default)]
pub struct ChannelBroadcaster {
    topics: Mutex<HashMap<String, broadcast::Sender<BannerMessage>>>,
}

impl ChannelBroadcaster {
    pub fn new() -> ChannelBroadcaster {
        ChannelBroadcaster::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BannerMessage> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, topic: &str, message: BannerMessage) {
        // send() only errs when nobody is subscribed; a banner update with
        // no listeners is fine to drop.
        let _ = self.sender(topic).send(message);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BannerMessage> {
        self.sender(topic).subscribe()
    }
}
