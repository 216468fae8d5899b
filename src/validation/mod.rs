use bigdecimal::BigDecimal;
use std::fmt;

use crate::domain::tracking::{is_valid_tracking_status, TRACKING_STATUS_MAX_LEN};
use crate::domain::{NewListing, NewReservation};

pub const LOCATION_MAX_LEN: usize = 120;
pub const ITEM_DESCRIPTION_MAX_LEN: usize = 500;
pub const ADDRESS_MAX_LEN: usize = 255;
pub const NOTES_MAX_LEN: usize = 1000;
pub const PHONE_MAX_LEN: usize = 32;
pub const PAYMENT_METHOD_MAX_LEN: usize = 255;
pub const METADATA_MAX_BYTES: usize = 4096;
pub const MAX_REQUESTED_KG: i32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| sanitize_string(&v))
        .filter(|v| !v.is_empty())
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Money in whole cents: positive with at most two decimal places.
pub fn validate_positive_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }
    if amount.with_scale(2) != *amount {
        return Err(ValidationError::new(field, "must have at most two decimal places"));
    }

    Ok(())
}

/// ISO 4217 shape: three ASCII letters.
pub fn validate_currency(currency: &str) -> ValidationResult {
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ValidationError::new("currency", "must be a 3-letter code"));
    }

    Ok(())
}

pub fn validate_new_listing(input: NewListing) -> Result<NewListing, ValidationError> {
    let departure_location = sanitize_string(&input.departure_location);
    validate_required("departure_location", &departure_location)?;
    validate_max_len("departure_location", &departure_location, LOCATION_MAX_LEN)?;

    let arrival_location = sanitize_string(&input.arrival_location);
    validate_required("arrival_location", &arrival_location)?;
    validate_max_len("arrival_location", &arrival_location, LOCATION_MAX_LEN)?;

    if input.arrival_date < input.departure_date {
        return Err(ValidationError::new(
            "arrival_date",
            "must not be before departure_date",
        ));
    }
    if input.capacity_kg <= 0 {
        return Err(ValidationError::new("capacity_kg", "must be greater than zero"));
    }
    validate_positive_amount("price_per_kg", &input.price_per_kg)?;

    let currency = sanitize_string(&input.currency).to_uppercase();
    validate_currency(&currency)?;

    Ok(NewListing {
        departure_location,
        arrival_location,
        currency,
        ..input
    })
}

pub fn validate_new_reservation(input: NewReservation) -> Result<NewReservation, ValidationError> {
    if input.requested_kg <= 0 {
        return Err(ValidationError::new("requested_kg", "must be greater than zero"));
    }
    if input.requested_kg > MAX_REQUESTED_KG {
        return Err(ValidationError::new(
            "requested_kg",
            format!("must be at most {}", MAX_REQUESTED_KG),
        ));
    }

    let item_description = sanitize_string(&input.item_description);
    validate_required("item_description", &item_description)?;
    validate_max_len("item_description", &item_description, ITEM_DESCRIPTION_MAX_LEN)?;

    let payment_method = input.payment_method.trim().to_string();
    validate_required("payment_method", &payment_method)?;
    validate_max_len("payment_method", &payment_method, PAYMENT_METHOD_MAX_LEN)?;

    let pickup_address = sanitize_optional(input.pickup_address);
    if let Some(address) = &pickup_address {
        validate_max_len("pickup_address", address, ADDRESS_MAX_LEN)?;
    }
    let pickup_notes = sanitize_optional(input.pickup_notes);
    if let Some(notes) = &pickup_notes {
        validate_max_len("pickup_notes", notes, NOTES_MAX_LEN)?;
    }
    let recipient_phone = sanitize_optional(input.recipient_phone);
    if let Some(phone) = &recipient_phone {
        validate_max_len("recipient_phone", phone, PHONE_MAX_LEN)?;
        if !phone
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | ' ' | '-' | '(' | ')'))
        {
            return Err(ValidationError::new(
                "recipient_phone",
                "must contain only digits, spaces and + - ( )",
            ));
        }
    }

    Ok(NewReservation {
        item_description,
        payment_method,
        pickup_address,
        pickup_notes,
        recipient_phone,
        ..input
    })
}

pub fn validate_tracking_status(status: &str) -> ValidationResult {
    validate_required("status", status)?;
    validate_max_len("status", status, TRACKING_STATUS_MAX_LEN)?;
    if !is_valid_tracking_status(status) {
        return Err(ValidationError::new(
            "status",
            "must be lower snake_case, e.g. in_transit",
        ));
    }

    Ok(())
}

pub fn validate_tracking_metadata(metadata: &serde_json::Value) -> ValidationResult {
    if !metadata.is_object() {
        return Err(ValidationError::new("metadata", "must be a JSON object"));
    }
    if metadata.to_string().len() > METADATA_MAX_BYTES {
        return Err(ValidationError::new(
            "metadata",
            format!("must be at most {} bytes", METADATA_MAX_BYTES),
        ));
    }

    Ok(())
}
