use crate::breaker::CircuitBreaker;
use async_trait::async_trait;
use cambus_core::payment::{ChargeReceipt, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway};
use cambus_core::Clock;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_CHARGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls the payment gateway with a deadline and a circuit breaker. Whatever
/// goes wrong on the way comes back as a FAILED receipt, never as an error.
pub struct PaymentOrchestrator {
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl PaymentOrchestrator {
    pub fn new(gateway: Arc<dyn PaymentGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            clock,
            breaker: CircuitBreaker::new("payment", 5, Duration::from_secs(30)),
            timeout: DEFAULT_CHARGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_breaker(mut self, threshold: usize, reset_timeout: Duration) -> Self {
        self.breaker = CircuitBreaker::new("payment", threshold, reset_timeout);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn charge(&self, request: &ChargeRequest) -> ChargeReceipt {
        // Dropping this future mid-call drops the permit too
        let Some(permit) = self.breaker.check() else {
            warn!("Payment circuit open, not charging {}", request.reference);
            return ChargeReceipt::failed("payment gateway circuit open", self.clock.now());
        };

        let result = match tokio::time::timeout(self.timeout, self.gateway.charge(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout.as_millis() as u64)),
        };

        match result {
            Ok(receipt) => {
                // A decline still means the gateway is healthy
                permit.record_success();
                if receipt.is_success() {
                    info!("Charged {} {} for {}", request.amount, request.currency, request.reference);
                } else {
                    info!(
                        "Payment declined for {}: {}",
                        request.reference,
                        receipt.message.as_deref().unwrap_or("no reason given")
                    );
                }
                receipt
            }
            Err(e) => {
                permit.record_failure();
                error!("Payment gateway error for {}: {}", request.reference, e);
                ChargeReceipt::failed(e.to_string(), self.clock.now())
            }
        }
    }
}

/// Simulated provider: approves `success_rate` of charges after `latency`.
pub struct MockPaymentGateway {
    success_rate: f64,
    latency: Duration,
}

impl MockPaymentGateway {
    pub fn new(success_rate: f64, latency: Duration) -> Self {
        Self {
            // NaN would panic in gen_bool
            success_rate: if success_rate.is_nan() { 0.0 } else { success_rate.clamp(0.0, 1.0) },
            latency,
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, _request: &ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        tokio::time::sleep(self.latency).await;

        let (approved, suffix) = {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            (rng.gen_bool(self.success_rate), rng.gen_range(0..1000))
        };
        let now = Utc::now();
        let stamp = now.timestamp_millis();
        let reference = Some(format!("NKAP{}{}", stamp, suffix));

        if approved {
            Ok(ChargeReceipt {
                status: ChargeStatus::Success,
                transaction_id: Some(format!("TXN{}", stamp)),
                reference,
                settled_at: now,
                message: None,
            })
        } else {
            Ok(ChargeReceipt {
                status: ChargeStatus::Failed,
                transaction_id: None,
                reference,
                settled_at: now,
                message: Some("Payment declined by provider".to_string()),
            })
        }
    }
}
