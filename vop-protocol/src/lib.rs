//! Shared wire types for the VoP (Verification of Payee) protocol.
//!
//! Every participant speaks the same request/response shapes: the requester
//! client, the routing gateway and the responder services all depend on this
//! crate so that a schema change is a single edit.

pub mod iban;
pub mod types;

pub use types::{
    AccountStatus, AccountType, MatchStatus, PaymentContext, Payee, Party, ReasonCode,
    VerificationRequest, VerificationResponse,
};
