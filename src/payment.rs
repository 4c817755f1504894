//! Payment collaborator — opaque confirmation of a booking.
//!
//! The session never looks inside a payment: any success confirms the
//! hold, any failure releases it. `SimulatedGateway` reproduces the
//! two-stage checkout used upstream — a gateway leg followed by backend
//! verification, each with its own success rate and latency — so the
//! full confirmation path can be exercised without a real processor.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// Outcome + interface
// ═══════════════════════════════════════════════════════════

/// Result of a confirmation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub success: bool,
    pub failure_reason: Option<String>,
}

impl PaymentOutcome {
    pub fn approved() -> Self {
        Self {
            success: true,
            failure_reason: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
        }
    }
}

/// External confirmation of a payment for `amount`.
#[allow(async_fn_in_trait)]
pub trait PaymentCollaborator {
    async fn request_confirmation(&self, amount: u32) -> PaymentOutcome;
}

// ═══════════════════════════════════════════════════════════
// SimulatedGateway
// ═══════════════════════════════════════════════════════════

/// Tuning for the simulated two-stage checkout.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Success rate of the gateway leg. Default: 0.95.
    pub gateway_success_rate: f64,
    /// Success rate of backend verification. Default: 0.96.
    pub verification_success_rate: f64,
    /// Latency of the gateway leg. Default: 1.5 s.
    pub gateway_delay: Duration,
    /// Latency of backend verification. Default: 2 s.
    pub verification_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_success_rate: 0.95,
            verification_success_rate: 0.96,
            gateway_delay: Duration::from_millis(1500),
            verification_delay: Duration::from_millis(2000),
        }
    }
}

const DECLINED_BY_GATEWAY: &str = "Payment was declined by the bank or gateway provider.";

/// Verification failure scenarios, drawn uniformly when the backend
/// verification leg fails.
const VERIFICATION_FAILURES: [&str; 4] = [
    "Network connectivity lost between the clinic servers and the bank gateway. Check your connection and try again.",
    "A possible duplicate transaction was detected for this consultation slot. Check your booking records before retrying.",
    "Transaction verification timed out. Any debited amount is refunded automatically within 24-48 hours.",
    "Bank authentication failed or the credit limit was exceeded. Try a different payment method or contact your bank.",
];

/// Simulated payment gateway: gateway leg, then backend verification.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    config: GatewayConfig,
}

impl SimulatedGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

impl PaymentCollaborator for SimulatedGateway {
    async fn request_confirmation(&self, amount: u32) -> PaymentOutcome {
        tokio::time::sleep(self.config.gateway_delay).await;
        let gateway_ok = rand::thread_rng().gen_bool(self.config.gateway_success_rate.clamp(0.0, 1.0));
        if !gateway_ok {
            tracing::warn!(amount, "gateway leg declined the payment");
            return PaymentOutcome::declined(DECLINED_BY_GATEWAY);
        }

        tokio::time::sleep(self.config.verification_delay).await;
        let mut rng = rand::thread_rng();
        let verified = rng.gen_bool(self.config.verification_success_rate.clamp(0.0, 1.0));
        if verified {
            tracing::info!(amount, "payment confirmed");
            PaymentOutcome::approved()
        } else {
            let reason = VERIFICATION_FAILURES[rng.gen_range(0..VERIFICATION_FAILURES.len())];
            tracing::warn!(amount, reason, "backend verification failed");
            PaymentOutcome::declined(reason)
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
