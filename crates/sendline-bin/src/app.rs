//! The long-running pipeline behind `sendline run`.

use anyhow::Context;
use delivery_client::{ClientState, DeliveryClient};
use delivery_coordinator::{CoordinatorConfig, DeliveryCoordinator, DeliveryEvent};
use dispatch_engine::{DispatchEngine, EngineConfig};
use message_store::{MessageStore, SqliteMessageStore};
use offline_maintenance::{
    ConnectivityMonitor, HttpProbeConnectivity, MaintenanceConfig, MaintenanceLoop,
    ManualConnectivity,
};
use relay_provider::{HttpRelayProvider, RelayConfig};
use request_executor::{ExecutorConfig, HttpRequestExecutor};
use sendline_config_and_utils::{Config, Paths};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// How long shutdown waits for sends that are already confirming.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(config: Config, paths: Paths) -> anyhow::Result<()> {
    info!(
        relay_url = %config.relay_api_url,
        workers = config.worker_pool_size(),
        max_retries = config.max_retries,
        step_timeout_secs = config.step_timeout_secs,
        "Sendline starting"
    );

    let store = SqliteMessageStore::open(paths.database_file())
        .context("failed to open message database")?;
    let reset = store.reset_interrupted_sends()?;
    if reset > 0 {
        warn!(count = reset, "Re-queued sends interrupted by the previous run");
    }
    report_previous_run(&paths);

    let executor = HttpRequestExecutor::new(ExecutorConfig {
        chunk_size: config.upload_chunk_size,
        ..ExecutorConfig::default()
    })?;
    let engine = DispatchEngine::new(
        Arc::new(executor),
        EngineConfig {
            worker_pool_size: config.worker_pool_size(),
            buffer_ttl: config.buffer_ttl(),
        },
    );
    let client = DeliveryClient::new(engine.clone());
    client.attach();

    let coordinator = DeliveryCoordinator::new(
        Arc::new(store),
        client.clone(),
        CoordinatorConfig {
            step_timeout: config.step_timeout(),
            ..CoordinatorConfig::default()
        },
    );
    if config.relay_refresh_token.is_none() {
        warn!("No relay refresh token configured; sends will wait for sign-in");
    }
    coordinator.register_provider(Arc::new(HttpRelayProvider::new(RelayConfig {
        base_url: config.relay_api_url.clone(),
        refresh_token: config.relay_refresh_token.clone(),
        max_retries: config.max_retries,
    })?));

    let events = tokio::spawn(log_events(coordinator.clone()));

    let probe = match &config.connectivity_probe_url {
        Some(url) => {
            let probe = Arc::new(HttpProbeConnectivity::new(
                url.clone(),
                config.connectivity_probe_interval(),
            )?);
            probe.start();
            Some(probe)
        }
        None => None,
    };
    let connectivity: Arc<dyn ConnectivityMonitor> = match &probe {
        Some(probe) => probe.clone(),
        None => Arc::new(ManualConnectivity::new(true)),
    };

    let maintenance = MaintenanceLoop::new(
        coordinator.clone(),
        connectivity,
        MaintenanceConfig {
            initial_delay: config.maintenance_initial_delay(),
            interval: config.maintenance_interval(),
        },
    );
    maintenance.start();

    info!("Pipeline running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Received shutdown signal, stopping...");

    maintenance.shutdown().await;
    if let Some(probe) = &probe {
        probe.stop();
    }
    coordinator.shutdown();
    if !coordinator.wait_idle(DRAIN_TIMEOUT).await {
        warn!(
            active = coordinator.active_count(),
            "Sends still active at shutdown; they will be re-queued on next start"
        );
    }

    if let Err(e) = client.save_to_file(&paths.client_state_file()) {
        error!(error = %e, "Failed to save client state");
    }
    client.detach();
    engine.shutdown();
    events.abort();

    info!("Sendline stopped");
    Ok(())
}

/// Request ids still unresolved when the previous process stopped. Their
/// messages were re-queued above; the ids are only reported.
fn report_previous_run(paths: &Paths) {
    let path = paths.client_state_file();
    if !path.exists() {
        return;
    }
    match ClientState::read(&path) {
        Ok(state) if !state.outstanding.is_empty() => warn!(
            outstanding = state.outstanding.len(),
            "Previous run stopped with requests in flight"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Unreadable client state from previous run"),
    }
}

async fn log_events(coordinator: DeliveryCoordinator) {
    let mut rx = coordinator.subscribe();
    loop {
        match rx.recv().await {
            Ok(DeliveryEvent::Finished {
                message_id,
                remote_id,
            }) => info!(message_id = %message_id, remote_id = ?remote_id, "Delivered"),
            Ok(DeliveryEvent::Error {
                message_id,
                failure,
                will_retry,
                ..
            }) => warn!(message_id = %message_id, error = %failure, will_retry, "Delivery error"),
            Ok(DeliveryEvent::Queued { message_id }) => {
                info!(message_id = %message_id, "Left queued for a later pass")
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
