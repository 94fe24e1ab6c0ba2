//! # Network Monitor
//!
//! Tracks whether the API is believed reachable and announces the moments
//! connectivity comes back.
//!
//! ## Features
//!
//! - **Connectivity Detection**: online/offline status, readable at any time
//! - **Restore Edges**: listeners wake on every offline to online transition
//! - **Reachability Probe**: optional periodic `HEAD` against the API base
//!
//! Status can be driven by the embedding platform through
//! [`NetworkMonitor::set_online`], by the probe, or both.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    #[default]
    Online,
    Offline,
}

/// A change of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    WentOffline,
    Restored,
}

const EDGE_CAPACITY: usize = 16;

#[derive(Debug)]
struct MonitorShared {
    status: watch::Sender<NetworkStatus>,
    edges: broadcast::Sender<ConnectivityEvent>,
}

/// Connectivity state shared by every context in the process
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorShared>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        let (status, _) = watch::channel(initial);
        let (edges, _) = broadcast::channel(EDGE_CAPACITY);
        Self {
            inner: Arc::new(MonitorShared { status, edges }),
        }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.inner.status.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status() == NetworkStatus::Online
    }

    /// Update the status. Returns `true` when it actually changed.
    pub fn set_status(&self, status: NetworkStatus) -> bool {
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            let edge = match status {
                NetworkStatus::Online => ConnectivityEvent::Restored,
                NetworkStatus::Offline => ConnectivityEvent::WentOffline,
            };
            // No listeners is fine.
            let _ = self.inner.edges.send(edge);
            info!(?status, "connectivity changed");
        }

        changed
    }

    pub fn set_online(&self, online: bool) -> bool {
        self.set_status(if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        })
    }

    /// Watch the raw status value
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.inner.status.subscribe()
    }

    /// Listen for connectivity edges from now on
    pub fn subscribe(&self) -> ConnectivityListener {
        ConnectivityListener {
            edges: self.inner.edges.subscribe(),
            status: self.inner.status.subscribe(),
        }
    }

    /// Issue one `HEAD` request; any HTTP response counts as reachable.
    pub async fn probe_once(client: &reqwest::Client, url: &Url) -> NetworkStatus {
        match client.head(url.clone()).send().await {
            Ok(response) => {
                debug!(%url, status = response.status().as_u16(), "probe reached API");
                NetworkStatus::Online
            }
            Err(e) => {
                debug!(%url, "probe failed: {}", e);
                NetworkStatus::Offline
            }
        }
    }

    /// Probe `url` every `interval` until `cancel` fires, updating the status.
    pub fn spawn_probe(
        &self,
        url: Url,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = self.clone();

        tokio::spawn(async move {
            let client = match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    warn!("reachability probe disabled: {}", e);
                    return;
                }
            };

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = Self::probe_once(&client, &url).await;
                        monitor.set_status(status);
                    }
                }
            }

            debug!("reachability probe stopped");
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::default())
    }
}

/// Receives connectivity edges for one subscriber
#[derive(Debug)]
pub struct ConnectivityListener {
    edges: broadcast::Receiver<ConnectivityEvent>,
    status: watch::Receiver<NetworkStatus>,
}

impl ConnectivityListener {
    /// Wait for the next offline to online transition.
    ///
    /// Returns `None` once every monitor handle is gone.
    pub async fn restored(&mut self) -> Option<()> {
        loop {
            match self.edges.recv().await {
                Ok(ConnectivityEvent::Restored) => return Some(()),
                Ok(ConnectivityEvent::WentOffline) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "connectivity listener lagged");
                    if *self.status.borrow() == NetworkStatus::Online {
                        return Some(());
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
