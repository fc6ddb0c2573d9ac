use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::ApiClient;

/// Session state for this process: owns the authentication stream that every
/// banner feed subscribes to, and the sign-in/sign-out calls that drive it.
/// Constructed once at startup and shared by reference.
pub struct AuthSession {
    api: ApiClient,
    tx: watch::Sender<bool>,
}

impl AuthSession {
    pub fn new(api: ApiClient) -> AuthSession {
        let (tx, _) = watch::channel(false);
        AuthSession { api, tx }
    }

    /// The stream of authentication transitions banner feeds gate on.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub async fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        self.api.sign_in(username, password).await?;
        info!("signed in as {username}");
        self.tx.send_replace(true);
        Ok(())
    }

    /// End the session. Local state flips regardless of the backend call's
    /// outcome: a failed sign-out must not leave this process believing it
    /// still has a session.
    pub async fn sign_out(&self) {
        if let Err(err) = self.api.sign_out().await {
            warn!("sign-out call failed: {err:#}");
        } else {
            info!("signed out");
        }
        self.api.guard().token_store().clear_token();
        self.tx.send_replace(false);
    }

    /// Probe for an existing session cookie at startup.
    pub async fn restore(&self) -> Result<bool> {
        let active = self.api.session_active().await?;
        self.tx.send_replace(active);
        Ok(active)
    }
}
