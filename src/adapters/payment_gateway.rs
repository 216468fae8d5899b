use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

use crate::ports::{AuthorizationRequest, GatewayError, PaymentGateway};

#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    intent_ref: String,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    message: Option<String>,
}

/// HTTP client for the card payment gateway.
///
/// Consecutive transport failures and 5xx responses open the circuit
/// breaker; declines are business outcomes and never trip it.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self::with_circuit_breaker(base_url, api_key, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpPaymentGateway {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let result = self
            .circuit_breaker
            .call_with(
                |e: &GatewayError| !matches!(e, GatewayError::Declined(_)),
                call,
            )
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen(
                "payment gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn post_intent_action(&self, intent_ref: &str, action: &'static str) -> Result<(), GatewayError> {
        let request = self
            .client
            .post(self.url(&format!("/v1/authorizations/{}/{}", intent_ref, action)))
            .bearer_auth(&self.api_key);

        self.guarded(async move {
            let response = request.send().await?;
            check_status(response).await.map(|_| ())
        })
        .await
    }
}

/// Map non-success statuses onto gateway errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<GatewayErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::PAYMENT_REQUIRED | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(GatewayError::Declined(message))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Err(GatewayError::Timeout),
        _ => Err(GatewayError::Unavailable(message)),
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "payer": request.payer,
            "reference": request.reference,
        });
        let http = self
            .client
            .post(self.url("/v1/authorizations"))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", request.reference.to_string())
            .json(&body);

        self.guarded(async move {
            let response = check_status(http.send().await?).await?;
            let parsed = response
                .json::<AuthorizationResponse>()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            Ok(parsed.intent_ref)
        })
        .await
    }

    async fn capture(&self, intent_ref: &str) -> Result<(), GatewayError> {
        self.post_intent_action(intent_ref, "capture").await
    }

    async fn refund(&self, intent_ref: &str) -> Result<(), GatewayError> {
        self.post_intent_action(intent_ref, "refund").await
    }

    fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }
}
