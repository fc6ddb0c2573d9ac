use clap::Parser;

/// Live-game banner agent for the league API
#[derive(Parser, Debug, Clone)]
#[command(name = "rink-banner", version, about)]
pub struct Config {
    /// League API base URL
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:3000")]
    pub api_base_url: String,

    /// Banner polling interval in seconds (leader only)
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,

    /// Broadcast channel name shared by sibling instances
    #[arg(long, env = "BANNER_CHANNEL", default_value = "game_banner_channel")]
    pub banner_channel: String,

    /// Leader-election lock name
    #[arg(long, env = "LEADER_LOCK", default_value = "game_banner_leader")]
    pub leader_lock: String,

    /// Name of the anti-forgery cookie set by the backend
    #[arg(long, env = "CSRF_COOKIE", default_value = "XSRF-TOKEN")]
    pub csrf_cookie: String,

    /// API paths exempt from CSRF protection (comma-separated)
    #[arg(
        long,
        env = "PUBLIC_PATHS",
        value_delimiter = ',',
        default_value = "/users/csrf"
    )]
    pub public_paths: Vec<String>,

    /// Account to sign in with (otherwise an existing session is probed)
    #[arg(long, env = "LEAGUE_USERNAME")]
    pub username: Option<String>,

    /// Password for --username
    #[arg(long, env = "LEAGUE_PASSWORD")]
    pub password: Option<String>,

    /// Number of in-process feed instances
    #[arg(long, env = "INSTANCES", default_value = "1")]
    pub instances: usize,

    /// Disable leader election: every instance polls independently
    #[arg(long, env = "NO_LEADER_ELECTION", default_value = "false")]
    pub no_leader_election: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.instances == 0 {
            anyhow::bail!("instances must be at least 1");
        }
        if self.username.is_some() != self.password.is_some() {
            anyhow::bail!("--username and --password must be provided together");
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            anyhow::bail!("api_base_url is not a valid URL: {}", self.api_base_url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::parse_from(["rink-banner"])
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = base_config();
        config.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_username_without_password_rejected() {
        let mut config = base_config();
        config.username = Some("coach".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let mut config = base_config();
        config.api_base_url = "not a url".into();
        assert!(config.validate().is_err());
    }
}
