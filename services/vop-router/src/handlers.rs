//! HTTP surface of the router: the verify operation plus operational probes.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use vop_protocol::VerificationRequest;

use crate::database::{self, DbPool};
use crate::directory::DirectoryService;
use crate::errors::{Result, VopError};
use crate::metrics::METRICS;
use crate::models::AuthenticatedCaller;
use crate::orchestrator::RouterService;
use crate::validation::validate_request;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/v1/verify", web::post().to(verify))
        .route("/health", web::get().to(health))
        .route("/ready", web::get().to(ready))
        .route("/live", web::get().to(live))
        .route("/metrics", web::get().to(metrics));
}

/// POST /v1/verify. The credential gate and admission control have already
/// run; validation failures are rejected before any directory or downstream
/// work happens.
async fn verify(
    req: HttpRequest,
    body: web::Json<VerificationRequest>,
    router: web::Data<Arc<RouterService>>,
) -> Result<HttpResponse> {
    let caller = req
        .extensions()
        .get::<AuthenticatedCaller>()
        .cloned()
        .ok_or_else(|| VopError::Unauthorized("Caller identity missing".to_string()))?;

    validate_request(&body, Utc::now()).map_err(VopError::Validation)?;

    info!(
        request_id = %body.request_id,
        requester_bic = %caller.bic,
        "verification request accepted"
    );

    let response = router.process(&body, &caller).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// GET /health. Degraded dependencies flip the overall status to 503 while
/// still reporting each dependency individually.
async fn health(
    pool: web::Data<DbPool>,
    directory: web::Data<Arc<DirectoryService>>,
) -> HttpResponse {
    let database_ok = database::health_check(&pool).await;
    let store_ok = directory.health_check().await;
    let healthy = database_ok && store_ok;

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "checks": {
            "database": if database_ok { "up" } else { "down" },
            "store": if store_ok { "up" } else { "down" },
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// GET /ready. Readiness requires both backing stores.
async fn ready(
    pool: web::Data<DbPool>,
    directory: web::Data<Arc<DirectoryService>>,
) -> HttpResponse {
    if database::health_check(&pool).await && directory.health_check().await {
        HttpResponse::Ok().json(serde_json::json!({ "status": "ready" }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({ "status": "not_ready" }))
    }
}

/// GET /live. Process liveness only; no dependency checks.
async fn live() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "alive" }))
}

/// GET /metrics in Prometheus text format.
async fn metrics() -> HttpResponse {
    match METRICS.export() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn liveness_probe_answers_without_dependencies() {
        let app = test::init_service(App::new().route("/live", web::get().to(live))).await;

        let req = test::TestRequest::get().uri("/live").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn metrics_endpoint_serves_text_format() {
        let app = test::init_service(App::new().route("/metrics", web::get().to(metrics))).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }
}
