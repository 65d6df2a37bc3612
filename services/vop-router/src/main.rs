use actix_web::{web, App, HttpServer};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslFiletype, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use redis::aio::ConnectionManager;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use vop_router::config::Config;
use vop_router::database;
use vop_router::directory::DirectoryService;
use vop_router::errors::VopError;
use vop_router::forwarder::HttpForwarder;
use vop_router::handlers;
use vop_router::jwks::JwksClient;
use vop_router::middleware::auth::{AuthContext, CredentialGate};
use vop_router::middleware::rate_limit::{AdmissionControl, FixedWindowLimiter};
use vop_router::models::ClientCertificate;
use vop_router::orchestrator::RouterService;
use vop_router::registry::PgDirectoryRegistry;
use vop_router::store::RedisStore;
use vop_router::validation::FieldError;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{}", e))?;

    info!(
        "🚀 VoP Router starting on {}:{}",
        config.server.host, config.server.port
    );

    let pool = database::create_pool(&config.database).await?;
    let pool = Arc::new(pool);

    info!("Connecting to Redis: {}", config.redis.url);
    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_manager = ConnectionManager::new(redis_client).await?;
    let store = Arc::new(RedisStore::new(redis_manager));

    let registry = Arc::new(PgDirectoryRegistry::new(pool.clone()));
    let directory = Arc::new(DirectoryService::new(
        registry,
        store.clone(),
        config.directory.cache_ttl_secs,
    ));

    let auth_context = Arc::new(AuthContext {
        jwks: JwksClient::new(config.oauth.jwks_uri.clone()),
        oauth: config.oauth.clone(),
        mtls_enabled: config.tls.mtls_enabled,
    });

    let limiter = Arc::new(FixedWindowLimiter::new(
        store.clone(),
        Duration::from_millis(config.rate_limit.window_ms),
        config.rate_limit.max_requests,
    ));

    let responder_deadline = Duration::from_millis(config.timeouts.responder_timeout_ms);
    let outbound = HttpForwarder::build_client(&config.tls, responder_deadline)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    let forwarder = Arc::new(HttpForwarder::new(outbound, responder_deadline));

    let router = Arc::new(RouterService::new(
        directory.clone(),
        forwarder,
        Duration::from_millis(config.timeouts.request_timeout_ms),
    ));

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let mtls_enabled = config.tls.mtls_enabled;
    let workers = config.server.workers;
    let tls = config.tls.clone();

    let pool_data = web::Data::new(pool.as_ref().clone());
    let directory_data = web::Data::new(directory.clone());
    let router_data = web::Data::new(router);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .app_data(directory_data.clone())
            .app_data(router_data.clone())
            .app_data(json_config())
            // Registration order is inside-out: the credential gate runs
            // before admission control.
            .wrap(AdmissionControl::new(limiter.clone(), directory.clone()))
            .wrap(CredentialGate::new(auth_context.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(workers)
    .on_connect(record_client_certificate);

    if mtls_enabled {
        let acceptor = build_tls_acceptor(&tls)?;
        info!("✅ mTLS enabled, listening on https://{}", bind_address);
        server.bind_openssl(&bind_address, acceptor)?.run().await?;
    } else {
        warn!("mTLS disabled, listening on http://{}", bind_address);
        server.bind(&bind_address)?.run().await?;
    }

    Ok(())
}

/// Request bodies above 10KB or with malformed JSON are rejected with the
/// same envelope shape as field-level validation failures.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(10 * 1024)
        .error_handler(|err, _req| {
            VopError::Validation(vec![FieldError {
                field: "body".to_string(),
                message: err.to_string(),
            }])
            .into()
        })
}

fn build_tls_acceptor(tls: &vop_router::config::TlsConfig) -> anyhow::Result<SslAcceptorBuilder> {
    let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
    builder.set_private_key_file(&tls.key_path, SslFiletype::PEM)?;
    builder.set_certificate_chain_file(&tls.cert_path)?;
    builder.set_ca_file(&tls.ca_path)?;
    // Peer certificates are mandatory; unauthenticated connections are
    // refused during the handshake.
    builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
    Ok(builder)
}

/// Capture peer-certificate facts at handshake time so middleware can reach
/// them through connection data.
fn record_client_certificate(connection: &dyn Any, extensions: &mut actix_web::dev::Extensions) {
    let Some(stream) = connection
        .downcast_ref::<actix_tls::accept::openssl::TlsStream<tokio::net::TcpStream>>()
    else {
        return;
    };

    let Some(cert) = stream.ssl().peer_certificate() else {
        return;
    };

    extensions.insert(ClientCertificate {
        subject_cn: subject_field(&cert, Nid::COMMONNAME),
        subject_ou: subject_field(&cert, Nid::ORGANIZATIONALUNITNAME),
        fingerprint: fingerprint(&cert),
    });
}

fn subject_field(cert: &X509, nid: Nid) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(nid)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

fn fingerprint(cert: &X509) -> String {
    match cert.digest(MessageDigest::sha256()) {
        Ok(digest) => digest
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":"),
        Err(_) => String::new(),
    }
}
