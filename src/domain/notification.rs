use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reservation,
    Payment,
    Tracking,
    Wallet,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reservation => "reservation",
            NotificationKind::Payment => "payment",
            NotificationKind::Tracking => "tracking",
            NotificationKind::Wallet => "wallet",
            NotificationKind::System => "system",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(NotificationKind::Reservation),
            "payment" => Ok(NotificationKind::Payment),
            "tracking" => Ok(NotificationKind::Tracking),
            "wallet" => Ok(NotificationKind::Wallet),
            "system" => Ok(NotificationKind::System),
            other => Err(format!("unknown notification kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    pub reservation_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        title: impl Into<String>,
        body: impl Into<String>,
        kind: NotificationKind,
        reservation_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            body: body.into(),
            kind,
            reservation_id,
            read: false,
            created_at: Utc::now(),
        }
    }
}
