//! Operator-visible record of a money movement that needs another attempt
//! or manual handling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    CaptureFailed,
    RefundFailed,
    /// Authorization timed out; the gateway may still hold buyer funds.
    OrphanAuthorization,
}

impl ReconciliationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationKind::CaptureFailed => "capture_failed",
            ReconciliationKind::RefundFailed => "refund_failed",
            ReconciliationKind::OrphanAuthorization => "orphan_authorization",
        }
    }
}

impl FromStr for ReconciliationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture_failed" => Ok(ReconciliationKind::CaptureFailed),
            "refund_failed" => Ok(ReconciliationKind::RefundFailed),
            "orphan_authorization" => Ok(ReconciliationKind::OrphanAuthorization),
            other => Err(format!("unknown reconciliation kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub kind: ReconciliationKind,
    pub error_reason: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationEntry {
    pub fn new(
        reservation_id: Uuid,
        payment_id: Option<Uuid>,
        kind: ReconciliationKind,
        error_reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            payment_id,
            kind,
            error_reason: error_reason.into(),
            retry_count: 0,
            created_at: Utc::now(),
            last_retry_at: None,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}
