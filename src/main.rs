use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use wallet_engine::{
    config::Config, database::Database, events::EventStream, handlers, outbox::OutboxRelay,
    rate_limit::RateLimiter, services::WalletService,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::from_env()?;
    config.validate().map_err(anyhow::Error::msg)?;

    info!("Starting wallet engine on port {}", config.server.port);

    // Startup order: store, event log, relay, listener.
    let db = Arc::new(
        Database::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?,
    );
    info!("Running database migrations");
    db.migrate().await?;

    let events = Arc::new(
        EventStream::connect(
            &config.nats.url,
            &config.nats.stream,
            &config.nats.subject_prefix,
        )
        .await?,
    );

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = ConnectionManager::new(redis_client).await?;
    let rate_limiter = Arc::new(RateLimiter::new(redis_conn, config.rate_limit.clone()));

    let service = Arc::new(WalletService::new(
        db.clone(),
        rate_limiter,
        config.limits.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = OutboxRelay::new(db.clone(), events.clone(), &config.outbox, shutdown_rx);
    let relay_handle = tokio::spawn(relay.run());

    let app_config = Arc::new(config.clone());
    let bind_addr = (config.server.host.clone(), config.server.port);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(service.clone()))
            .app_data(web::Data::new(app_config.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .shutdown_timeout(20)
    .bind(bind_addr)?
    .run()
    .await?;

    // Shutdown order: the listener has drained; stop the relay after its
    // in-flight batch, then close the store.
    info!("Listener stopped; stopping outbox relay");
    let _ = shutdown_tx.send(true);
    let _ = relay_handle.await;
    db.close().await;

    info!("Wallet engine stopped");

    Ok(())
}
