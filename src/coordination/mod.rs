//! Cross-instance coordination seams.
//!
//! Two narrow interfaces keep the banner feed portable: a `LeaderElector`
//! (acquire-and-hold-until-released) and a `Broadcaster` (publish/subscribe
//! by topic string). The in-process backends in `local` cover the common
//! single-process deployment; alternative backends (a file lock, an external
//! lock service) only need to implement these traits.

pub mod local;

pub use local::{ChannelBroadcaster, LocalElector};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::api::models::BannerItem;

/// Messages relayed between banner feed instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BannerMessage {
    /// Full replacement of the banner list, published by the leader.
    BannerList { items: Vec<BannerItem> },
    /// A follower asking the leader for a fresh poll.
    RefreshRequest,
}

/// Held by the current leader. Dropping it releases the lock so a successor
/// can win the next acquisition.
pub struct LeadershipGuard {
    _release: Box<dyn std::any::Any + Send>,
}

impl LeadershipGuard {
    pub fn new(release: impl std::any::Any + Send) -> LeadershipGuard {
        LeadershipGuard {
            _release: Box::new(release),
        }
    }
}

/// Mutual-exclusion primitive electing one leader per named lock.
#[async_trait]
pub trait LeaderElector: Send + Sync {
    /// Resolves once this instance holds the named lock. The lock stays held
    /// until the returned guard is dropped.
    async fn acquire(&self, name: &str) -> Result<LeadershipGuard>;
}

/// Publish/subscribe fan-out keyed by topic string.
///
/// Delivery is in send order per subscriber. A lagged subscriber may miss
/// messages; that is tolerable because every `BannerList` is a full
/// replacement of state, not an increment.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: &str, message: BannerMessage);
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BannerMessage>;
}
