//! Background crawl and reconcile timing

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::ledger::Ledger;
use crate::overlay::PeerOverlay;

/// Initial delays and periods of the background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub reconcile_initial_delay: Duration,
    pub reconcile_interval: Duration,
    pub crawl_initial_delay: Duration,
    pub crawl_interval: Duration,
}

impl Schedule {
    fn timer(delay: Duration, period: Duration) -> Interval {
        // interval_at panics on a zero period
        let period = period.max(Duration::from_millis(1));
        let mut timer = interval_at(Instant::now() + delay, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    pub fn reconcile_timer(&self) -> Interval {
        Self::timer(self.reconcile_initial_delay, self.reconcile_interval)
    }

    pub fn crawl_timer(&self) -> Interval {
        Self::timer(self.crawl_initial_delay, self.crawl_interval)
    }
}

impl From<&SyncConfig> for Schedule {
    fn from(config: &SyncConfig) -> Self {
        Self {
            reconcile_initial_delay: Duration::from_secs(config.reconcile_initial_delay_secs),
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
            crawl_initial_delay: Duration::from_secs(config.crawl_initial_delay_secs),
            crawl_interval: Duration::from_secs(config.crawl_interval_secs),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub peers: usize,
    pub new_blocks: usize,
    pub failures: usize,
}

/// Pulls every known peer's chain into the local ledger.
pub struct Crawler {
    ledger: Arc<dyn Ledger>,
    overlay: Arc<dyn PeerOverlay>,
}

impl Crawler {
    pub fn new(ledger: Arc<dyn Ledger>, overlay: Arc<dyn PeerOverlay>) -> Self {
        Self { ledger, overlay }
    }

    /// Crawl each peer once. A failing peer is logged and skipped.
    pub async fn crawl(&self) -> CrawlReport {
        let peers = self.overlay.list_peers();
        let mut report = CrawlReport {
            peers: peers.len(),
            ..Default::default()
        };

        for peer in &peers {
            match self.ledger.crawl_chain(peer).await {
                Ok(n) => {
                    debug!(peer = %peer.public_key.short(), blocks = n, "Crawled peer");
                    report.new_blocks += n;
                }
                Err(e) => {
                    warn!(peer = %peer.public_key.short(), error = %e, "Crawl failed");
                    report.failures += 1;
                }
            }
        }

        info!(
            peers = report.peers,
            new_blocks = report.new_blocks,
            failures = report.failures,
            "Crawl finished"
        );
        report
    }
}
