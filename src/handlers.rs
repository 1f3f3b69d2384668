use crate::config::Config;
use crate::errors::{Result, WalletEngineError};
use crate::models::{CreateWalletRequest, HistoryQuery, MovementRequest, TransferRequest};
use crate::services::WalletService;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Health check endpoint. Unauthenticated; bypasses the rate limiter.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "wallet-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// The glue layer verifies the shared trust key and hands the core an
/// opaque caller id.
fn caller_identity(req: &HttpRequest, config: &Config) -> Result<String> {
    let provided = req
        .headers()
        .get("X-Internal-Auth")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() || provided != config.auth.trust_key {
        return Err(WalletEngineError::Unauthorized);
    }

    let user = req
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");

    if user.is_empty() {
        return Err(WalletEngineError::Unauthorized);
    }

    Ok(user.to_string())
}

fn correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub async fn create_wallet(
    service: web::Data<Arc<WalletService>>,
    config: web::Data<Arc<Config>>,
    http: HttpRequest,
    request: web::Json<CreateWalletRequest>,
) -> Result<HttpResponse> {
    let caller = caller_identity(&http, &config)?;
    let wallet = service
        .create_wallet(&caller, request.into_inner(), &correlation_id(&http))
        .await?;
    Ok(HttpResponse::Created().json(wallet))
}

pub async fn deposit(
    service: web::Data<Arc<WalletService>>,
    config: web::Data<Arc<Config>>,
    http: HttpRequest,
    wallet_id: web::Path<Uuid>,
    request: web::Json<MovementRequest>,
) -> Result<HttpResponse> {
    let caller = caller_identity(&http, &config)?;
    let entry = service
        .deposit(
            *wallet_id,
            &caller,
            request.into_inner(),
            &correlation_id(&http),
        )
        .await?;
    Ok(HttpResponse::Ok().json(entry))
}

pub async fn withdraw(
    service: web::Data<Arc<WalletService>>,
    config: web::Data<Arc<Config>>,
    http: HttpRequest,
    wallet_id: web::Path<Uuid>,
    request: web::Json<MovementRequest>,
) -> Result<HttpResponse> {
    let caller = caller_identity(&http, &config)?;
    let entry = service
        .withdraw(
            *wallet_id,
            &caller,
            request.into_inner(),
            &correlation_id(&http),
        )
        .await?;
    Ok(HttpResponse::Ok().json(entry))
}

pub async fn transfer(
    service: web::Data<Arc<WalletService>>,
    config: web::Data<Arc<Config>>,
    http: HttpRequest,
    request: web::Json<TransferRequest>,
) -> Result<HttpResponse> {
    let caller = caller_identity(&http, &config)?;
    let result = service
        .transfer(&caller, request.into_inner(), &correlation_id(&http))
        .await?;
    Ok(HttpResponse::Ok().json(result))
}

pub async fn get_balance(
    service: web::Data<Arc<WalletService>>,
    config: web::Data<Arc<Config>>,
    http: HttpRequest,
    wallet_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let caller = caller_identity(&http, &config)?;
    let balance = service.balance(*wallet_id, &caller).await?;
    Ok(HttpResponse::Ok().json(balance))
}

pub async fn get_history(
    service: web::Data<Arc<WalletService>>,
    config: web::Data<Arc<Config>>,
    http: HttpRequest,
    wallet_id: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    let caller = caller_identity(&http, &config)?;
    let page = service
        .history(*wallet_id, &caller, query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/wallets", web::post().to(create_wallet))
            .route("/wallets/{wallet_id}/balance", web::get().to(get_balance))
            .route(
                "/wallets/{wallet_id}/transactions",
                web::get().to(get_history),
            )
            .route("/wallets/{wallet_id}/deposit", web::post().to(deposit))
            .route("/wallets/{wallet_id}/withdraw", web::post().to(withdraw))
            .route("/transfers", web::post().to(transfer)),
    )
    .route("/health", web::get().to(health_check));
}
