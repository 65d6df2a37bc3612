//! Structural, temporal and checksum validation of inbound verification
//! requests. An invalid request is never forwarded downstream.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use vop_protocol::{iban, VerificationRequest};

/// Maximum request age before it is considered a replay risk.
pub const MAX_AGE_SECS: i64 = 5 * 60;
/// Allowed clock skew into the future.
pub const MAX_SKEW_SECS: i64 = 60;

static REQUEST_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]{1,35}$").unwrap());
static BIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{4}[A-Z]{2}[A-Z0-9]{2}([A-Z0-9]{3})?$").unwrap());
static UA_IBAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^UA[0-9]{27}$").unwrap());
static CURRENCY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        FieldError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a request against the wire contract. Collects every failing
/// field rather than stopping at the first.
pub fn validate_request(
    request: &VerificationRequest,
    now: DateTime<Utc>,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if !REQUEST_ID_RE.is_match(&request.request_id) {
        errors.push(FieldError::new(
            "requestId",
            "must be 1-35 alphanumeric or hyphen characters",
        ));
    }

    if !BIC_RE.is_match(&request.requester.bic) {
        errors.push(FieldError::new("requester.bic", "invalid BIC format"));
    }

    if !UA_IBAN_RE.is_match(&request.payee.iban) {
        errors.push(FieldError::new(
            "payee.iban",
            "must match the Ukrainian IBAN format (UA + 27 digits)",
        ));
    } else if !iban::validate_checksum(&request.payee.iban) {
        errors.push(FieldError::new("payee.iban", "invalid IBAN checksum"));
    }

    let name_len = request.payee.name.chars().count();
    if name_len == 0 || name_len > 140 {
        errors.push(FieldError::new("payee.name", "must be 1-140 characters"));
    }

    if let Some(info) = &request.additional_info {
        if let Some(amount) = info.payment_amount {
            if !amount.is_finite() || amount < 0.0 {
                errors.push(FieldError::new(
                    "additionalInfo.paymentAmount",
                    "must be a non-negative number",
                ));
            }
        }
        if let Some(currency) = &info.payment_currency {
            if !CURRENCY_RE.is_match(currency) {
                errors.push(FieldError::new(
                    "additionalInfo.paymentCurrency",
                    "must be a three-letter currency code",
                ));
            }
        }
        if let Some(purpose) = &info.payment_purpose {
            if purpose.chars().count() > 500 {
                errors.push(FieldError::new(
                    "additionalInfo.paymentPurpose",
                    "must not exceed 500 characters",
                ));
            }
        }
    }

    errors.extend(validate_timestamp(request.timestamp, now));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Freshness window check: bounds replay risk without a nonce store.
fn validate_timestamp(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if now - timestamp > Duration::seconds(MAX_AGE_SECS) {
        errors.push(FieldError::new(
            "timestamp",
            "request timestamp is too old (max 5 minutes)",
        ));
    }

    if timestamp - now > Duration::seconds(MAX_SKEW_SECS) {
        errors.push(FieldError::new(
            "timestamp",
            "request timestamp cannot be in the future",
        ));
    }

    errors
}
