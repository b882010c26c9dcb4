//! HTTP relay provider.

use crate::wire::{ConfirmRequest, ConfirmResponse, RefreshRequest, RefreshResponse};
use crate::{RelayError, RelayResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use message_store::OutboundMessage;
use parking_lot::Mutex;
use request_protocol_types::{RequestDescriptor, ResponseDescriptor};
use send_unit::{
    DefaultRecoveryPolicy, DeliveryProvider, DeliveryReceipt, RecoveryPolicy, SendFailure,
    StepContext, StepError,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub const RELAY_PROVIDER_NAME: &str = "relay";

/// Refresh this long before the relay says the token expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    /// Long-lived token exchanged for access tokens. Without one every send
    /// waits for the user to sign in.
    pub refresh_token: Option<String>,
    pub max_retries: u32,
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + ChronoDuration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

pub struct HttpRelayProvider {
    base: Url,
    refresh_token: Mutex<Option<String>>,
    token: Mutex<Option<CachedToken>>,
    policy: Arc<DefaultRecoveryPolicy>,
}

impl HttpRelayProvider {
    pub fn new(config: RelayConfig) -> RelayResult<Self> {
        let base = Url::parse(&config.base_url)?;
        if base.cannot_be_a_base() {
            return Err(RelayError::NotABase(config.base_url));
        }
        Ok(Self {
            base,
            refresh_token: Mutex::new(config.refresh_token),
            token: Mutex::new(None),
            policy: Arc::new(DefaultRecoveryPolicy::with_max_retries(config.max_retries)),
        })
    }

    /// Replace the refresh token after the user signed in again.
    pub fn set_refresh_token(&self, refresh_token: impl Into<String>) {
        *self.refresh_token.lock() = Some(refresh_token.into());
        *self.token.lock() = None;
    }

    pub fn has_fresh_token(&self) -> bool {
        self.token
            .lock()
            .as_ref()
            .map(CachedToken::is_fresh)
            .unwrap_or(false)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }

    fn bearer(&self) -> Result<String, StepError> {
        match self.token.lock().as_ref() {
            Some(token) => Ok(format!("Bearer {}", token.access_token)),
            None => Err(SendFailure::InvalidCredentials(401).into()),
        }
    }

    /// Issue an authorized round trip; a 401/403 drops the cached token.
    async fn authorized(
        &self,
        ctx: &StepContext,
        descriptor: RequestDescriptor,
    ) -> Result<ResponseDescriptor, StepError> {
        let descriptor = descriptor.with_header("Authorization", self.bearer()?);
        match ctx.round_trip(descriptor).await {
            Err(StepError::Failed(SendFailure::InvalidCredentials(status))) => {
                debug!(status, "Relay rejected access token");
                *self.token.lock() = None;
                Err(SendFailure::InvalidCredentials(status).into())
            }
            other => other,
        }
    }
}

fn encode_failure(e: serde_json::Error) -> StepError {
    SendFailure::TransportException(format!("failed to encode request: {}", e)).into()
}

#[async_trait]
impl DeliveryProvider for HttpRelayProvider {
    fn name(&self) -> &str {
        RELAY_PROVIDER_NAME
    }

    async fn refresh_token(&self, ctx: &StepContext, force: bool) -> Result<(), StepError> {
        if !force && self.has_fresh_token() {
            return Ok(());
        }

        let refresh_token = self.refresh_token.lock().clone().ok_or_else(|| {
            SendFailure::ProviderAuthorizationRequired("not signed in to the relay".into())
        })?;

        let descriptor = RequestDescriptor::post(self.endpoint("auth/v1/token"))
            .with_param("grant_type", "refresh_token")
            .with_json(&RefreshRequest { refresh_token })
            .map_err(encode_failure)?;

        let response = match ctx.round_trip(descriptor).await {
            Ok(response) => response,
            Err(StepError::Failed(
                SendFailure::InvalidCredentials(status) | SendFailure::UnknownResponseCode(status),
            )) if status < 500 => {
                warn!(status, "Relay rejected refresh token");
                *self.token.lock() = None;
                return Err(SendFailure::ProviderAuthorizationRequired(format!(
                    "relay rejected the refresh token (HTTP {})",
                    status
                ))
                .into());
            }
            Err(e) => return Err(e),
        };

        let data: RefreshResponse = response.json().map_err(|e| {
            SendFailure::TransportException(format!("malformed token response: {}", e))
        })?;

        if let Some(rotated) = data.refresh_token {
            *self.refresh_token.lock() = Some(rotated);
        }
        *self.token.lock() = Some(CachedToken {
            access_token: data.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(data.expires_in),
        });
        info!(force, expires_in = data.expires_in, "Relay token refreshed");
        Ok(())
    }

    async fn upload_payload(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<(), StepError> {
        let descriptor =
            RequestDescriptor::put(self.endpoint(&format!("v1/uploads/{}", message.delivery_key)))
                .with_header("Idempotency-Key", message.delivery_key.clone())
                .with_file(message.payload.mime_type.clone(), message.payload.path.clone());

        self.authorized(ctx, descriptor).await?;
        debug!(
            message_id = %message.id,
            size_bytes = message.payload.size_bytes,
            "Payload uploaded"
        );
        Ok(())
    }

    async fn confirm_delivery(
        &self,
        ctx: &StepContext,
        message: &OutboundMessage,
    ) -> Result<DeliveryReceipt, StepError> {
        let body = ConfirmRequest {
            recipient: message.target.recipient.clone(),
            upload_id: message.delivery_key.clone(),
            mime_type: message.payload.mime_type.clone(),
            size_bytes: message.payload.size_bytes,
            duration_ms: message.payload.duration_ms,
        };
        let descriptor = RequestDescriptor::post(self.endpoint("v1/messages"))
            .with_header("Idempotency-Key", message.delivery_key.clone())
            .with_json(&body)
            .map_err(encode_failure)?;

        let response = self.authorized(ctx, descriptor).await?;
        match response.json::<ConfirmResponse>() {
            Ok(confirmed) => Ok(DeliveryReceipt {
                remote_id: Some(confirmed.id),
            }),
            Err(e) => {
                // Delivered all the same; only the id is missing.
                warn!(message_id = %message.id, error = %e, "Relay confirmation had no message id");
                Ok(DeliveryReceipt::default())
            }
        }
    }

    async fn mark_read(&self, ctx: &StepContext, remote_id: &str) -> Result<(), StepError> {
        self.refresh_token(ctx, false).await?;
        let descriptor =
            RequestDescriptor::post(self.endpoint(&format!("v1/messages/{}/read", remote_id)));
        self.authorized(ctx, descriptor).await?;
        Ok(())
    }

    fn recovery_policy(&self) -> Arc<dyn RecoveryPolicy> {
        self.policy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery_client::DeliveryClient;
    use dispatch_engine::{DispatchEngine, EngineConfig};
    use message_store::{PayloadRef, Target};
    use request_executor::ScriptedExecutor;
    use request_protocol_types::{CancelToken, RequestBody};
    use send_unit::{SendUnit, UnitOutcome};
    use std::path::PathBuf;
    use std::time::Duration;

    const TOKEN_JSON: &str =
        r#"{"access_token":"access-1","refresh_token":"refresh-2","expires_in":3600}"#;

    fn setup(refresh_token: Option<&str>) -> (Arc<ScriptedExecutor>, DeliveryClient, HttpRelayProvider) {
        let executor = Arc::new(ScriptedExecutor::new());
        let engine = DispatchEngine::new(executor.clone(), EngineConfig::default());
        let client = DeliveryClient::new(engine);
        client.attach();
        let provider = HttpRelayProvider::new(RelayConfig {
            base_url: "https://relay.test/".into(),
            refresh_token: refresh_token.map(String::from),
            max_retries: 3,
        })
        .unwrap();
        (executor, client, provider)
    }

    fn ctx(client: &DeliveryClient) -> StepContext {
        StepContext::new(client.clone(), CancelToken::new(), Duration::from_secs(2))
    }

    fn message() -> OutboundMessage {
        OutboundMessage::new(
            Target {
                provider: RELAY_PROVIDER_NAME.into(),
                recipient: "alice".into(),
            },
            PayloadRef {
                path: PathBuf::from("/tmp/voice.ogg"),
                mime_type: "audio/ogg".into(),
                size_bytes: 2048,
                duration_ms: Some(4_000),
            },
        )
    }

    fn json_body(descriptor: &RequestDescriptor) -> serde_json::Value {
        match descriptor.body() {
            Some(RequestBody::Bytes { data, .. }) => serde_json::from_slice(data).unwrap(),
            other => panic!("expected JSON body, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn refresh_exchanges_and_caches_token() {
        let (executor, client, provider) = setup(Some("refresh-1"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(200, TOKEN_JSON));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(200, TOKEN_JSON));
        let ctx = ctx(&client);

        provider.refresh_token(&ctx, false).await.unwrap();
        provider.refresh_token(&ctx, false).await.unwrap();
        assert_eq!(executor.executed_count(), 1);
        assert!(provider.has_fresh_token());

        let first = &executor.executed()[0];
        assert_eq!(first.url(), "https://relay.test/auth/v1/token");
        assert_eq!(
            first.params().get("grant_type").map(String::as_str),
            Some("refresh_token")
        );
        assert_eq!(json_body(first)["refresh_token"], "refresh-1");

        provider.refresh_token(&ctx, true).await.unwrap();
        assert_eq!(executor.executed_count(), 2);
        assert_eq!(json_body(&executor.executed()[1])["refresh_token"], "refresh-2");
    }

    #[tokio::test]
    async fn missing_refresh_token_needs_user() {
        let (executor, client, provider) = setup(None);

        let result = provider.refresh_token(&ctx(&client), false).await;

        assert!(matches!(
            result,
            Err(StepError::Failed(SendFailure::ProviderAuthorizationRequired(_)))
        ));
        assert_eq!(executor.executed_count(), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_token_needs_user() {
        let (executor, client, provider) = setup(Some("revoked"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(400, "invalid_grant"));

        let result = provider.refresh_token(&ctx(&client), false).await;

        assert!(matches!(
            result,
            Err(StepError::Failed(SendFailure::ProviderAuthorizationRequired(_)))
        ));
        assert!(!provider.has_fresh_token());
    }

    #[tokio::test]
    async fn relay_outage_during_refresh_stays_transient() {
        let (executor, client, provider) = setup(Some("refresh-1"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(503, ""));

        let result = provider.refresh_token(&ctx(&client), false).await;

        assert_eq!(
            result,
            Err(StepError::Failed(SendFailure::UnknownResponseCode(503)))
        );
    }

    #[tokio::test]
    async fn upload_and_confirm_carry_delivery_key() {
        let (executor, client, provider) = setup(Some("refresh-1"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(200, TOKEN_JSON));
        executor.queue_for("/v1/messages", ResponseDescriptor::with_status(201, r#"{"id":"msg-77"}"#));
        let ctx = ctx(&client);
        let message = message();

        provider.refresh_token(&ctx, false).await.unwrap();
        provider.upload_payload(&ctx, &message).await.unwrap();
        let receipt = provider.confirm_delivery(&ctx, &message).await.unwrap();

        assert_eq!(receipt.remote_id.as_deref(), Some("msg-77"));

        let executed = executor.executed();
        let upload = &executed[1];
        assert_eq!(
            upload.url(),
            format!("https://relay.test/v1/uploads/{}", message.delivery_key)
        );
        assert_eq!(upload.header("authorization"), Some("Bearer access-1"));
        assert_eq!(
            upload.body(),
            Some(&RequestBody::File {
                content_type: "audio/ogg".into(),
                path: PathBuf::from("/tmp/voice.ogg"),
            })
        );

        let confirm = &executed[2];
        assert_eq!(confirm.url(), "https://relay.test/v1/messages");
        assert_eq!(
            confirm.header("idempotency-key"),
            Some(message.delivery_key.as_str())
        );
        let body = json_body(confirm);
        assert_eq!(body["recipient"], "alice");
        assert_eq!(body["upload_id"], message.delivery_key.as_str());
        assert_eq!(body["duration_ms"], 4000);
    }

    #[tokio::test]
    async fn unauthorized_confirm_drops_cached_token() {
        let (executor, client, provider) = setup(Some("refresh-1"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(200, TOKEN_JSON));
        executor.queue_for("/v1/messages", ResponseDescriptor::with_status(401, ""));
        let ctx = ctx(&client);

        provider.refresh_token(&ctx, false).await.unwrap();
        let result = provider.confirm_delivery(&ctx, &message()).await;

        assert_eq!(
            result,
            Err(StepError::Failed(SendFailure::InvalidCredentials(401)))
        );
        assert!(!provider.has_fresh_token());
    }

    #[tokio::test]
    async fn send_unit_delivers_through_relay() {
        let (executor, client, provider) = setup(Some("refresh-1"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(200, TOKEN_JSON));
        executor.queue_for("/v1/messages", ResponseDescriptor::with_status(200, r#"{"id":"msg-1"}"#));

        let unit = SendUnit::new(message(), Arc::new(provider), client)
            .with_step_timeout(Duration::from_secs(2));
        let outcome = unit.execute().await.unwrap();

        assert_eq!(
            outcome,
            UnitOutcome::Sent(DeliveryReceipt {
                remote_id: Some("msg-1".into())
            })
        );
        assert_eq!(executor.executed_count(), 3);
    }

    #[tokio::test]
    async fn mark_read_posts_to_message() {
        let (executor, client, provider) = setup(Some("refresh-1"));
        executor.queue_for("/auth/v1/token", ResponseDescriptor::with_status(200, TOKEN_JSON));

        provider.mark_read(&ctx(&client), "msg-9").await.unwrap();

        assert_eq!(
            executor.executed_urls(),
            vec![
                "https://relay.test/auth/v1/token",
                "https://relay.test/v1/messages/msg-9/read",
            ]
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        let config = |url: &str| RelayConfig {
            base_url: url.into(),
            refresh_token: None,
            max_retries: 3,
        };
        assert!(matches!(
            HttpRelayProvider::new(config("not a url")),
            Err(RelayError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpRelayProvider::new(config("mailto:ops@relay.test")),
            Err(RelayError::NotABase(_))
        ));
    }
}
