//! Connectivity sources.

use crate::MaintenanceResult;
use parking_lot::Mutex;
use request_protocol_types::CancelToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Reports whether the network is reachable and notifies on change.
pub trait ConnectivityMonitor: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Receiver that observes every change of the connected flag.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Publish `connected` if it differs from the current value.
fn publish(state: &watch::Sender<bool>, connected: bool) -> bool {
    state.send_if_modified(|current| {
        if *current == connected {
            false
        } else {
            *current = connected;
            true
        }
    })
}

/// Connectivity set by hand, for embedders with their own network signal.
pub struct ManualConnectivity {
    state: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(connected: bool) -> Self {
        let (state, _) = watch::channel(connected);
        Self { state }
    }

    /// Returns whether the value changed.
    pub fn set(&self, connected: bool) -> bool {
        let changed = publish(&self.state, connected);
        if changed {
            info!(connected, "Connectivity changed");
        }
        changed
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Probes a health URL with `HEAD` on a fixed interval.
///
/// Any HTTP response counts as connected; only transport failures count as
/// offline. Starts out disconnected until the first probe answers.
pub struct HttpProbeConnectivity {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    state: watch::Sender<bool>,
    stop: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpProbeConnectivity {
    pub fn new(url: impl Into<String>, interval: Duration) -> MaintenanceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        let (state, _) = watch::channel(false);
        Ok(Self {
            client,
            url: url.into(),
            interval,
            state,
            stop: CancelToken::new(),
            task: Mutex::new(None),
        })
    }

    pub async fn probe_once(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(url = %self.url, status = response.status().as_u16(), "Probe answered");
                true
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Probe failed");
                false
            }
        }
    }

    /// Probe once and publish the result.
    pub async fn refresh(&self) -> bool {
        let connected = self.probe_once().await;
        if publish(&self.state, connected) {
            info!(connected, url = %self.url, "Connectivity changed");
        }
        connected
    }

    /// Start the probe task. A second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let this = self.clone();
        *task = Some(tokio::spawn(async move {
            loop {
                this.refresh().await;
                tokio::select! {
                    _ = tokio::time::sleep(this.interval) => {}
                    _ = this.stop.cancelled() => break,
                }
            }
            debug!(url = %this.url, "Connectivity probe stopped");
        }));
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl ConnectivityMonitor for HttpProbeConnectivity {
    fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
