use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend reachability as last observed by the probe.
///
/// Only the probe writes; everyone else just reads the flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
    last_checked_ms: Arc<AtomicI64>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Connectivity {
            online: Arc::new(AtomicBool::new(online)),
            last_checked_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    /// For setups without a probe.
    pub fn assume_online() -> Self {
        Connectivity::new(true)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Epoch millis of the last probe, if one has run.
    pub fn last_checked(&self) -> Option<i64> {
        match self.last_checked_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn record(&self, online: bool) {
        self.last_checked_ms
            .store(crate::types::now_epoch_ms(), Ordering::Release);
        let was = self.online.swap(online, Ordering::AcqRel);
        if was != online {
            if online {
                info!("Backend is reachable");
            } else {
                warn!("Backend is unreachable");
            }
        }
    }
}

pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: Url,
    connectivity: Connectivity,
}

impl ConnectivityProbe {
    pub fn new(client: reqwest::Client, url: Url, connectivity: Connectivity) -> Self {
        ConnectivityProbe {
            client,
            url,
            connectivity,
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Any HTTP answer counts as reachable; only transport failures do not.
    pub async fn probe_once(&self) -> bool {
        let online = match self
            .client
            .get(self.url.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => {
                debug!("Probe of {} answered {}", self.url, response.status());
                true
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", self.url, e);
                false
            }
        };
        self.connectivity.record(online);
        online
    }

    /// Manual re-check, e.g. from a "retry" button.
    pub async fn retry(&self) -> bool {
        info!("Re-checking backend connection...");
        self.probe_once().await
    }

    pub async fn run(self, interval: Duration) {
        loop {
            self.probe_once().await;
            sleep(interval).await;
        }
    }
}
