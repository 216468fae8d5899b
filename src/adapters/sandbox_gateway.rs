//! In-process payment gateway for local runs and tests.
//!
//! Authorizations are keyed by the request reference like a real gateway's
//! idempotency key. Payer tokens `tok_decline` and `tok_unavailable` fail
//! authorization; each operation can also be switched to a failure mode.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::ports::{AuthorizationRequest, GatewayError, PaymentGateway};

pub const DECLINE_TOKEN: &str = "tok_decline";
pub const UNAVAILABLE_TOKEN: &str = "tok_unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    Succeed,
    Decline,
    Unavailable,
    /// Never answers; the caller's timeout decides.
    Hang,
    /// Succeeds after the given delay.
    Delay(Duration),
}

pub struct SandboxGateway {
    authorize_mode: Mutex<SandboxMode>,
    capture_mode: Mutex<SandboxMode>,
    refund_mode: Mutex<SandboxMode>,
    intents: Mutex<HashMap<Uuid, String>>,
    authorize_calls: AtomicUsize,
    capture_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self {
            authorize_mode: Mutex::new(SandboxMode::Succeed),
            capture_mode: Mutex::new(SandboxMode::Succeed),
            refund_mode: Mutex::new(SandboxMode::Succeed),
            intents: Mutex::new(HashMap::new()),
            authorize_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }
}

fn read(mode: &Mutex<SandboxMode>) -> SandboxMode {
    mode.lock().map(|m| *m).unwrap_or(SandboxMode::Unavailable)
}

fn write(mode: &Mutex<SandboxMode>, value: SandboxMode) {
    if let Ok(mut m) = mode.lock() {
        *m = value;
    }
}

async fn outcome(mode: SandboxMode, operation: &str) -> Result<(), GatewayError> {
    match mode {
        SandboxMode::Succeed => Ok(()),
        SandboxMode::Decline => Err(GatewayError::Declined(format!("sandbox declined {}", operation))),
        SandboxMode::Unavailable => Err(GatewayError::Unavailable(format!(
            "sandbox {} unavailable",
            operation
        ))),
        SandboxMode::Hang => futures::future::pending().await,
        SandboxMode::Delay(delay) => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_authorize_mode(&self, mode: SandboxMode) {
        write(&self.authorize_mode, mode);
    }

    pub fn set_capture_mode(&self, mode: SandboxMode) {
        write(&self.capture_mode, mode);
    }

    pub fn set_refund_mode(&self, mode: SandboxMode) {
        write(&self.refund_mode, mode);
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String, GatewayError> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);

        match request.payer.as_str() {
            DECLINE_TOKEN => return Err(GatewayError::Declined("card declined".to_string())),
            UNAVAILABLE_TOKEN => {
                return Err(GatewayError::Unavailable("issuer unavailable".to_string()))
            }
            _ => {}
        }
        outcome(read(&self.authorize_mode), "authorization").await?;

        let mut intents = self
            .intents
            .lock()
            .map_err(|_| GatewayError::Unavailable("sandbox state poisoned".to_string()))?;
        let intent = intents
            .entry(request.reference)
            .or_insert_with(|| format!("pi_sandbox_{}", Uuid::new_v4().simple()))
            .clone();
        Ok(intent)
    }

    async fn capture(&self, _intent_ref: &str) -> Result<(), GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        outcome(read(&self.capture_mode), "capture").await
    }

    async fn refund(&self, _intent_ref: &str) -> Result<(), GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        outcome(read(&self.refund_mode), "refund").await
    }

    fn circuit_state(&self) -> String {
        "sandbox".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn request(payer: &str, reference: Uuid) -> AuthorizationRequest {
        AuthorizationRequest {
            amount: BigDecimal::from(40),
            currency: "EUR".to_string(),
            payer: payer.to_string(),
            reference,
        }
    }

    #[tokio::test]
    async fn test_authorize_is_idempotent_per_reference() {
        let gateway = SandboxGateway::new();
        let reference = Uuid::new_v4();
        let first = gateway.authorize(&request("tok_visa", reference)).await.unwrap();
        let second = gateway.authorize(&request("tok_visa", reference)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.authorize_calls(), 2);
    }

    #[tokio::test]
    async fn test_decline_token() {
        let gateway = SandboxGateway::new();
        let err = gateway
            .authorize(&request(DECLINE_TOKEN, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Declined(_)));
    }

    #[tokio::test]
    async fn test_delay_mode_answers_late() {
        let gateway = SandboxGateway::new();
        gateway.set_refund_mode(SandboxMode::Delay(Duration::from_millis(30)));
        let started = std::time::Instant::now();
        gateway.refund("pi_1").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_capture_mode_switch() {
        let gateway = SandboxGateway::new();
        gateway.set_capture_mode(SandboxMode::Unavailable);
        assert!(gateway.capture("pi_1").await.is_err());
        gateway.set_capture_mode(SandboxMode::Succeed);
        assert!(gateway.capture("pi_1").await.is_ok());
        assert_eq!(gateway.capture_calls(), 2);
    }
}
