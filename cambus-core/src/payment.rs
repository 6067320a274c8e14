use async_trait::async_trait;
use cambus_shared::PaymentMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub reservation_id: Uuid,
    /// Booking reference shown to the passenger and sent to the provider.
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub status: ChargeStatus,
    pub transaction_id: Option<String>,
    /// Provider's payment reference (e.g., NKAP...)
    pub reference: Option<String>,
    pub settled_at: DateTime<Utc>,
    pub message: Option<String>,
}

impl ChargeReceipt {
    /// A charge that did not go through, with the reason to record on the attempt.
    pub fn failed(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: ChargeStatus::Failed,
            transaction_id: None,
            reference: None,
            settled_at: at,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChargeStatus::Success
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway timeout after {0}ms")]
    Timeout(u64),

    #[error("gateway failure: {0}")]
    Failure(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// External payment provider. Only the success/failure contract matters to settlement;
/// a declined payment is an `Ok` receipt with `ChargeStatus::Failed`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError>;
}
