use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one participating institution on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Party {
    pub bic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Personal,
    Business,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    Active,
    Inactive,
    Closed,
    Blocked,
}

/// The payee details the requester wants verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Payee {
    pub iban: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,
}

/// Optional payment context carried alongside a verification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_purpose: Option<String>,
}

/// A Verification of Payee request.
///
/// Unknown top-level fields are rejected rather than ignored so that
/// integration mistakes surface immediately instead of being silently
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerificationRequest {
    pub request_id: String,
    pub requester: Party,
    pub payee: Payee,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<PaymentContext>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Match,
    CloseMatch,
    NoMatch,
    NotSupported,
    Error,
}

/// Closed enumeration of machine-readable outcome reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReasonCode {
    /// Account name match
    Annm,
    /// Match but account name differs slightly
    Mbam,
    /// Partial / no name match
    Panm,
    /// Account not found
    Acnf,
    /// Account closed
    Clos,
    /// Account switched
    Swch,
    /// Technical error
    Tech,
    /// Not supported / institution inactive or unknown
    Nsup,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Annm => "ANNM",
            ReasonCode::Mbam => "MBAM",
            ReasonCode::Panm => "PANM",
            ReasonCode::Acnf => "ACNF",
            ReasonCode::Clos => "CLOS",
            ReasonCode::Swch => "SWCH",
            ReasonCode::Tech => "TECH",
            ReasonCode::Nsup => "NSUP",
        }
    }
}

/// A Verification of Payee response. Every request that reaches a gateway
/// orchestrator yields exactly one of these with a non-empty reason code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub request_id: String,
    pub match_status: MatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_score: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_status: Option<AccountStatus>,
    pub reason_code: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_description: Option<String>,
    pub responder: Party,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_request_json() -> serde_json::Value {
        serde_json::json!({
            "requestId": "req-001",
            "requester": { "bic": "PRBAUA2X" },
            "payee": {
                "iban": "UA743052990000026007233566001",
                "name": "ШЕВЧЕНКО ТАРАС ГРИГОРОВИЧ"
            },
            "timestamp": "2024-06-01T10:00:00Z"
        })
    }

    #[test]
    fn request_round_trips() {
        let req: VerificationRequest =
            serde_json::from_value(sample_request_json()).expect("valid request");
        assert_eq!(req.request_id, "req-001");
        assert_eq!(req.requester.bic, "PRBAUA2X");
        assert!(req.payee.account_type.is_none());

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["payee"]["iban"], "UA743052990000026007233566001");
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let mut value = sample_request_json();
        value["debugFlag"] = serde_json::json!(true);

        let result: Result<VerificationRequest, _> = serde_json::from_value(value);
        assert!(result.is_err());
    }

    #[test]
    fn reason_codes_serialize_to_iso_codes() {
        assert_eq!(serde_json::to_string(&ReasonCode::Annm).unwrap(), "\"ANNM\"");
        assert_eq!(serde_json::to_string(&ReasonCode::Nsup).unwrap(), "\"NSUP\"");
        assert_eq!(ReasonCode::Tech.as_str(), "TECH");
    }

    #[test]
    fn match_status_uses_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&MatchStatus::CloseMatch).unwrap(),
            "\"CLOSE_MATCH\""
        );
        assert_eq!(
            serde_json::to_string(&MatchStatus::NotSupported).unwrap(),
            "\"NOT_SUPPORTED\""
        );
    }

    #[test]
    fn response_omits_absent_optionals() {
        let response = VerificationResponse {
            request_id: "req-001".to_string(),
            match_status: MatchStatus::NotSupported,
            match_score: None,
            verified_name: None,
            account_type: None,
            account_status: None,
            reason_code: ReasonCode::Nsup,
            reason_description: Some("Responder bank not found for this IBAN".to_string()),
            responder: Party { bic: "UNKNOWN".to_string() },
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("matchScore").is_none());
        assert_eq!(json["reasonCode"], "NSUP");
    }
}
