//! Verification endpoint: account lookup, name matching, verdict.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use name_matching::{MatchOutcome, NameMatcher};
use vop_protocol::{
    AccountStatus, MatchStatus, Party, ReasonCode, VerificationRequest, VerificationResponse,
};

use crate::accounts::AccountLookup;
use crate::metrics::METRICS;

pub struct ResponderState {
    pub accounts: Arc<dyn AccountLookup>,
    pub matcher: NameMatcher,
    pub bic: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/vop/verify", web::post().to(verify))
        .route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}

/// Map a similarity outcome onto the wire verdict.
pub fn classify(outcome: MatchOutcome) -> (MatchStatus, ReasonCode) {
    match outcome {
        MatchOutcome::Match => (MatchStatus::Match, ReasonCode::Annm),
        MatchOutcome::CloseMatch => (MatchStatus::CloseMatch, ReasonCode::Mbam),
        MatchOutcome::NoMatch => (MatchStatus::NoMatch, ReasonCode::Panm),
    }
}

/// Produce the business verdict for one request. `Err` covers lookup faults
/// only; every account condition is a terminal response.
pub async fn verdict(
    state: &ResponderState,
    request: &VerificationRequest,
) -> anyhow::Result<VerificationResponse> {
    let Some(account) = state.accounts.find_by_iban(&request.payee.iban).await? else {
        info!(request_id = %request.request_id, "account not found");
        return Ok(terminal(
            state,
            request,
            MatchStatus::NoMatch,
            ReasonCode::Acnf,
            Some("Account not found".to_string()),
            None,
        ));
    };

    // A closed account is never name-matched; the verdict alone already
    // tells the requester not to pay into it.
    if account.status == AccountStatus::Closed {
        info!(request_id = %request.request_id, "account closed");
        let mut response = terminal(
            state,
            request,
            MatchStatus::NoMatch,
            ReasonCode::Clos,
            Some("Account closed".to_string()),
            None,
        );
        response.account_status = Some(AccountStatus::Closed);
        return Ok(response);
    }

    let started = Instant::now();
    let result = state
        .matcher
        .compare(&request.payee.name, &account.account_holder);
    METRICS
        .match_duration_seconds
        .observe(started.elapsed().as_secs_f64());

    let (match_status, reason_code) = classify(result.outcome);

    info!(
        request_id = %request.request_id,
        match_status = ?match_status,
        score = result.score,
        "verification result"
    );

    Ok(VerificationResponse {
        request_id: request.request_id.clone(),
        match_status,
        match_score: Some(result.score.round() as u8),
        verified_name: Some(account.account_holder.clone()),
        account_type: Some(account.account_type),
        account_status: Some(account.status),
        reason_code,
        reason_description: None,
        responder: Party {
            bic: state.bic.clone(),
        },
        timestamp: Utc::now(),
    })
}

fn terminal(
    state: &ResponderState,
    request: &VerificationRequest,
    match_status: MatchStatus,
    reason_code: ReasonCode,
    description: Option<String>,
    verified_name: Option<String>,
) -> VerificationResponse {
    VerificationResponse {
        request_id: request.request_id.clone(),
        match_status,
        match_score: None,
        verified_name,
        account_type: None,
        account_status: None,
        reason_code,
        reason_description: description,
        responder: Party {
            bic: state.bic.clone(),
        },
        timestamp: Utc::now(),
    }
}

async fn verify(
    state: web::Data<Arc<ResponderState>>,
    body: web::Json<VerificationRequest>,
) -> HttpResponse {
    match verdict(&state, &body).await {
        Ok(response) => {
            METRICS
                .verifications_total
                .with_label_values(&[
                    match response.match_status {
                        MatchStatus::Match => "MATCH",
                        MatchStatus::CloseMatch => "CLOSE_MATCH",
                        MatchStatus::NoMatch => "NO_MATCH",
                        MatchStatus::NotSupported => "NOT_SUPPORTED",
                        MatchStatus::Error => "ERROR",
                    },
                    response.reason_code.as_str(),
                ])
                .inc();
            HttpResponse::Ok().json(response)
        }
        Err(e) => {
            error!(request_id = %body.request_id, error = %e, "verification failed");
            METRICS
                .verifications_total
                .with_label_values(&["ERROR", ReasonCode::Tech.as_str()])
                .inc();

            HttpResponse::InternalServerError().json(VerificationResponse {
                request_id: body.request_id.clone(),
                match_status: MatchStatus::Error,
                match_score: None,
                verified_name: None,
                account_type: None,
                account_status: None,
                reason_code: ReasonCode::Tech,
                reason_description: Some("Technical error processing request".to_string()),
                responder: Party {
                    bic: state.bic.clone(),
                },
                timestamp: Utc::now(),
            })
        }
    }
}

async fn health(state: web::Data<Arc<ResponderState>>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "bic": state.bic,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn metrics() -> HttpResponse {
    match METRICS.export() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}
