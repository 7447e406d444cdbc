use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::state::StateStore;

pub const DATA_FOLDER: &str = ".pget";
pub const DEFAULT_INCREMENT: usize = 32 * 1024;

pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct Config {
    /// Where per-download folders live. Defaults to `~/.pget`.
    pub data_dir: Option<PathBuf>,
    pub user_agent: String,
    /// Accept invalid TLS certificates.
    pub insecure: bool,
    /// Upper bound on a single file write; cancellation is checked between writes.
    pub increment: usize,
    /// Global limit in bytes per second.
    pub rate_limit: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            user_agent: concat!("pget/", env!("CARGO_PKG_VERSION")).to_string(),
            insecure: false,
            increment: DEFAULT_INCREMENT,
            rate_limit: None,
        }
    }
}

impl Config {
    pub fn resolve_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DATA_FOLDER),
        }
    }
}

/// Everything a download run needs, built once and handed down.
pub struct Context {
    pub client: Client,
    pub store: StateStore,
    pub increment: usize,
    pub rate_limiter: Option<Arc<Limiter>>,
}

impl Context {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        let rate_limiter = config
            .rate_limit
            .and_then(NonZeroU32::new)
            .map(|limit| Arc::new(RateLimiter::direct(Quota::per_second(limit))));

        // Increments larger than the limiter's burst could never be admitted.
        let mut increment = config.increment.max(1);
        if let Some(limit) = config.rate_limit.filter(|l| *l > 0) {
            increment = increment.min(limit as usize);
        }

        Ok(Self {
            client,
            store: StateStore::new(config.resolve_data_dir()),
            increment,
            rate_limiter,
        })
    }
}
