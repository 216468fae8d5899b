//! Payment record: one authorization/capture per reservation.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Reservation;

pub const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Authorized,
    Captured,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorized" => Ok(PaymentStatus::Authorized),
            "captured" => Ok(PaymentStatus::Captured),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub gross_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub net_amount: BigDecimal,
    pub currency: String,
    pub commission_bps: i32,
    pub status: PaymentStatus,
    pub intent_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Build a payment for `reservation`. The commission split is fixed here
    /// and never recomputed.
    pub fn for_reservation(
        reservation: &Reservation,
        commission_bps: u32,
        status: PaymentStatus,
        intent_ref: Option<String>,
        failure_reason: Option<String>,
    ) -> Self {
        let (commission_amount, net_amount) =
            split_commission(&reservation.total_price, commission_bps);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reservation_id: reservation.id,
            buyer_id: reservation.buyer_id,
            seller_id: reservation.seller_id,
            gross_amount: reservation.total_price.clone(),
            commission_amount,
            net_amount,
            currency: reservation.currency.clone(),
            commission_bps: commission_bps as i32,
            status,
            intent_ref,
            failure_reason,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != PaymentStatus::Failed
    }

    pub fn with_status(&self, status: PaymentStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Split `gross` into `(commission, net)`. The commission is truncated to
/// cents so the seller receives any sub-cent remainder.
pub fn split_commission(gross: &BigDecimal, commission_bps: u32) -> (BigDecimal, BigDecimal) {
    let commission = (gross.clone() * BigDecimal::from(commission_bps as i64)
        / BigDecimal::from(BPS_DENOMINATOR))
    .with_scale(2);
    let net = gross.clone() - commission.clone();
    (commission, net)
}
