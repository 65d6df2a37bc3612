use actix_web::{web, App, HttpServer};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod, SslVerifyMode};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

use name_matching::NameMatcher;
use vop_responder::accounts::PgAccountLookup;
use vop_responder::config::Config;
use vop_responder::handlers::{self, ResponderState};

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
        "🚀 VoP Responder ({}) starting on {}:{}",
        config.responder_bic, config.server.host, config.server.port
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let state = Arc::new(ResponderState {
        accounts: Arc::new(PgAccountLookup::new(Arc::new(pool))),
        matcher: NameMatcher::new(
            config.matching.match_threshold,
            config.matching.close_match_threshold,
        ),
        bic: config.responder_bic.clone(),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    let state_data = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::JsonConfig::default().limit(10 * 1024))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers);

    if config.tls.mtls_enabled {
        let mut builder = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
        builder.set_private_key_file(&config.tls.key_path, SslFiletype::PEM)?;
        builder.set_certificate_chain_file(&config.tls.cert_path)?;
        builder.set_ca_file(&config.tls.ca_path)?;
        builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);

        info!("✅ mTLS enabled, listening on https://{}", bind_address);
        server
            .bind_openssl(&bind_address, builder)?
            .run()
            .await?;
    } else {
        warn!("mTLS disabled, listening on http://{}", bind_address);
        server.bind(&bind_address)?.run().await?;
    }

    Ok(())
}
