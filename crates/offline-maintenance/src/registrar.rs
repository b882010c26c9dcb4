use crate::MaintenanceResult;
use async_trait::async_trait;

/// Keeps the device's push registration token current.
#[async_trait]
pub trait PushRegistrar: Send + Sync {
    async fn refresh_registration(&self) -> MaintenanceResult<()>;
}
