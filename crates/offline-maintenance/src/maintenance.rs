//! The maintenance loop.

use crate::{ConnectivityMonitor, MaintenanceResult, PushRegistrar};
use delivery_coordinator::{CoordinatorError, DeliveryCoordinator};
use parking_lot::Mutex;
use request_protocol_types::CancelToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Delay before the first pass after `start()`.
    pub initial_delay: Duration,
    /// Delay between passes when nothing re-arms the timer.
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(3600),
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub submitted: usize,
    pub skipped_in_flight: usize,
    pub skipped_awaiting_user: usize,
    pub failed: usize,
}

/// Rescans queued messages on a timer and on every connectivity change.
///
/// Passes never overlap: the timer task runs them inline and
/// [`MaintenanceLoop::run_pass`] serializes callers on a pass lock.
#[derive(Clone)]
pub struct MaintenanceLoop {
    inner: Arc<Inner>,
}

struct Inner {
    coordinator: DeliveryCoordinator,
    connectivity: Arc<dyn ConnectivityMonitor>,
    registrar: Option<Arc<dyn PushRegistrar>>,
    config: MaintenanceConfig,
    trigger: Notify,
    stop: Mutex<CancelToken>,
    task: Mutex<Option<JoinHandle<()>>>,
    pass_lock: tokio::sync::Mutex<()>,
    passes: AtomicU64,
}

impl MaintenanceLoop {
    pub fn new(
        coordinator: DeliveryCoordinator,
        connectivity: Arc<dyn ConnectivityMonitor>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                coordinator,
                connectivity,
                registrar: None,
                config,
                trigger: Notify::new(),
                stop: Mutex::new(CancelToken::new()),
                task: Mutex::new(None),
                pass_lock: tokio::sync::Mutex::new(()),
                passes: AtomicU64::new(0),
            }),
        }
    }

    /// Must be called before the loop is shared or started.
    pub fn with_registrar(mut self, registrar: Arc<dyn PushRegistrar>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.registrar = Some(registrar),
            None => warn!("Maintenance loop already shared, push registrar ignored"),
        }
        self
    }

    /// Passes completed so far.
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the timer task. A second call while running is a no-op.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Maintenance loop already running");
            return;
        }

        let stop = CancelToken::new();
        *self.inner.stop.lock() = stop.clone();

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move {
            inner.run(stop).await;
        }));
        info!(
            initial_delay_secs = self.inner.config.initial_delay.as_secs(),
            interval_secs = self.inner.config.interval.as_secs(),
            "Maintenance loop started"
        );
    }

    /// Cancel the pending timer and run a pass now.
    pub fn trigger_now(&self) {
        self.inner.trigger.notify_one();
    }

    /// Stop the timer task. A pass in progress finishes first.
    pub fn stop(&self) {
        self.inner.stop.lock().cancel();
    }

    /// Stop and wait for the timer task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Maintenance task ended abnormally");
            }
        }
    }

    /// Run one pass now, waiting for any pass already in progress.
    pub async fn run_pass(&self) -> MaintenanceResult<PassReport> {
        self.inner.run_pass().await
    }
}

impl Inner {
    async fn run(&self, stop: CancelToken) {
        let mut connectivity = self.connectivity.subscribe();
        let mut watching = true;
        let mut next = Instant::now() + self.config.initial_delay;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep_until(next) => {}
                _ = self.trigger.notified() => {
                    debug!("Maintenance pass triggered");
                }
                changed = connectivity.changed(), if watching => {
                    if changed.is_err() {
                        warn!("Connectivity source closed, relying on the timer");
                        watching = false;
                        continue;
                    }
                    let connected = *connectivity.borrow_and_update();
                    info!(connected, "Connectivity changed, re-arming maintenance");
                }
            }

            if let Err(e) = self.run_pass().await {
                error!(error = %e, "Maintenance pass failed");
            }
            next = Instant::now() + self.config.interval;
        }

        info!("Maintenance loop stopped");
    }

    async fn run_pass(&self) -> MaintenanceResult<PassReport> {
        let _pass = self.pass_lock.lock().await;
        let mut report = PassReport::default();

        if !self.connectivity.is_connected() {
            self.passes.fetch_add(1, Ordering::SeqCst);
            debug!("Offline, skipping maintenance pass");
            return Ok(report);
        }

        if let Some(registrar) = &self.registrar {
            if let Err(e) = registrar.refresh_registration().await {
                warn!(error = %e, "Push registration refresh failed");
            }
        }

        let queued = self.coordinator.store().read_queued_messages();
        let queued = match queued {
            Ok(queued) => queued,
            Err(e) => {
                self.passes.fetch_add(1, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        for message in queued {
            if message.state.is_awaiting_user_action() {
                report.skipped_awaiting_user += 1;
                continue;
            }
            if self.coordinator.is_sending(&message.id) {
                report.skipped_in_flight += 1;
                continue;
            }
            match self.coordinator.send(&message.id) {
                Ok(()) => report.submitted += 1,
                Err(CoordinatorError::AlreadySending(_)) => report.skipped_in_flight += 1,
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Maintenance resend failed");
                    report.failed += 1;
                }
            }
        }

        self.passes.fetch_add(1, Ordering::SeqCst);
        info!(
            submitted = report.submitted,
            skipped_in_flight = report.skipped_in_flight,
            skipped_awaiting_user = report.skipped_awaiting_user,
            failed = report.failed,
            "Maintenance pass complete"
        );
        Ok(report)
    }
}
