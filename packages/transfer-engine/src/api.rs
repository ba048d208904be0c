//! HTTP surface (spec §6.1): the thin, validated boundary in front of the
//! Orchestrator. Out of scope per spec §1 beyond this boundary shape, so
//! handlers do nothing but validate, delegate, and map `Error` to the
//! `{status, error, message, timestamp, path}` body.
//!
//! Grounded on `monitoring-engine/src/api.rs`'s actix-web server setup
//! (CORS-from-env, `middleware::Logger`, `web::Data` shared state);
//! generalized from a read-only stats/alerts surface to the five
//! read/write routes spec §6.1 names.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::cache::Cache;
use crate::ledger::LedgerStore;
use crate::lock::LeaseStore;
use crate::orchestrator::Orchestrator;
use crate::Error;

struct AppState {
    orchestrator: Arc<Orchestrator>,
    ledger: Arc<dyn LedgerStore>,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn LeaseStore>,
    start_time: std::time::Instant,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    error: String,
    message: String,
    timestamp: String,
    path: String,
}

fn error_response(err: &Error, path: &str) -> HttpResponse {
    let (status, error) = match err {
        Error::Validation(_) => (400, "VALIDATION_ERROR"),
        Error::UserNotFound(_) => (404, "USER_NOT_FOUND"),
        Error::TransferNotFound(_) => (404, "TRANSFER_NOT_FOUND"),
        Error::Conflict(_) => (409, "CONFLICT"),
        Error::InvalidTransferState(_) => (400, "INVALID_TRANSFER_STATE"),
        Error::InsufficientBalance { .. } => (400, "INSUFFICIENT_BALANCE"),
        Error::TransientStorage(_) => (500, "TRANSIENT_STORAGE_ERROR"),
        Error::TransientCache(_) => (500, "TRANSIENT_CACHE_ERROR"),
        Error::TransientMq(_) => (500, "TRANSIENT_MQ_ERROR"),
        Error::CreditFailed(_, _) => (500, "CREDIT_FAILED"),
        Error::Config(_) => (500, "CONFIGURATION_ERROR"),
        Error::Io(_) => (500, "IO_ERROR"),
    };

    let body = ErrorBody {
        status,
        error: error.to_string(),
        message: err.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        path: path.to_string(),
    };

    HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap()).json(body)
}

fn is_valid_user_id(user_id: &str) -> bool {
    (3..=50).contains(&user_id.chars().count())
}

#[derive(Debug, Deserialize, Validate)]
struct CreateUserRequest {
    #[validate(length(min = 3, max = 50))]
    user_id: String,
    initial_balance: Decimal,
}

async fn create_user(data: web::Data<AppState>, body: web::Json<CreateUserRequest>) -> HttpResponse {
    let path = "/users";
    if let Err(e) = body.validate() {
        return error_response(&Error::Validation(e.to_string()), path);
    }
    if body.initial_balance < Decimal::ZERO {
        return error_response(
            &Error::Validation("initialBalance must be >= 0".to_string()),
            path,
        );
    }

    match data.ledger.create_account(&body.user_id, body.initial_balance).await {
        Ok(account) => HttpResponse::Created().json(account),
        Err(e) => error_response(&e, path),
    }
}

async fn get_balance(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let user_id = path.into_inner();
    let route = format!("/users/{}/balance", user_id);
    if !is_valid_user_id(&user_id) {
        return error_response(
            &Error::Validation("userId must be 3-50 characters".to_string()),
            &route,
        );
    }

    match data.ledger.get_account(&user_id).await {
        Ok(Some(account)) => HttpResponse::Ok().json(serde_json::json!({
            "userId": account.user_id,
            "balance": account.balance,
        })),
        Ok(None) => error_response(&Error::UserNotFound(user_id.clone()), &route),
        Err(e) => error_response(&e, &route),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CreateTransferRequest {
    #[validate(length(min = 3, max = 50))]
    from_user_id: String,
    #[validate(length(min = 3, max = 50))]
    to_user_id: String,
    amount: Decimal,
}

async fn create_transfer(data: web::Data<AppState>, body: web::Json<CreateTransferRequest>) -> HttpResponse {
    let path = "/transfers";
    if let Err(e) = body.validate() {
        return error_response(&Error::Validation(e.to_string()), path);
    }
    if body.amount <= Decimal::ZERO {
        return error_response(&Error::Validation("amount must be > 0".to_string()), path);
    }
    if body.from_user_id == body.to_user_id {
        return error_response(
            &Error::Validation("fromUserId and toUserId must be distinct".to_string()),
            path,
        );
    }

    match data
        .orchestrator
        .create_transfer(&body.from_user_id, &body.to_user_id, body.amount)
        .await
    {
        Ok(transfer) => HttpResponse::Created().json(transfer),
        Err(e) => error_response(&e, path),
    }
}

#[derive(Debug, Deserialize)]
struct ListTransfersQuery {
    user_id: String,
    page: Option<u32>,
    size: Option<u32>,
}

async fn list_transfers(data: web::Data<AppState>, query: web::Query<ListTransfersQuery>) -> HttpResponse {
    let path = "/transfers";
    if !is_valid_user_id(&query.user_id) {
        return error_response(
            &Error::Validation("userId must be 3-50 characters".to_string()),
            path,
        );
    }
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(20).clamp(1, 100);

    match data.orchestrator.get_history(&query.user_id, page, size).await {
        Ok(transfers) => HttpResponse::Ok().json(serde_json::json!({
            "items": transfers,
            "page": page,
            "size": size,
        })),
        Err(e) => error_response(&e, path),
    }
}

async fn cancel_transfer(data: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    let transfer_id = path.into_inner();
    let route = format!("/transfers/{}/cancel", transfer_id);
    if transfer_id <= 0 {
        return error_response(
            &Error::Validation("transferId must be > 0".to_string()),
            &route,
        );
    }

    match data.orchestrator.cancel_transfer(transfer_id).await {
        Ok(transfer) => HttpResponse::Ok().json(transfer),
        Err(e) => error_response(&e, &route),
    }
}

async fn healthz(data: web::Data<AppState>) -> HttpResponse {
    let ledger_ok = data.ledger.health_check().await.unwrap_or(false);
    let cache_ok = data.cache.health_check().await.unwrap_or(false);
    let lock_ok = data.lock.health_check().await.unwrap_or(false);
    let all_ok = ledger_ok && cache_ok && lock_ok;
    let uptime = data.start_time.elapsed().as_secs();
    let status = if all_ok { "healthy" } else { "degraded" };
    let code = if all_ok {
        actix_web::http::StatusCode::OK
    } else {
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(code).json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSeconds": uptime,
        "ledger": ledger_ok,
        "cache": cache_ok,
        "lock": lock_ok,
    }))
}

fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/users", web::post().to(create_user))
        .route("/users/{userId}/balance", web::get().to(get_balance))
        .route("/transfers", web::post().to(create_transfer))
        .route("/transfers", web::get().to(list_transfers))
        .route("/transfers/{transferId}/cancel", web::post().to(cancel_transfer));
}

pub async fn start_api_server(
    orchestrator: Arc<Orchestrator>,
    ledger: Arc<dyn LedgerStore>,
    cache: Arc<dyn Cache>,
    lock: Arc<dyn LeaseStore>,
    bind_address: &str,
) -> crate::Result<()> {
    tracing::info!("starting HTTP surface on {}", bind_address);

    let state = web::Data::new(AppState {
        orchestrator,
        ledger,
        cache,
        lock,
        start_time: std::time::Instant::now(),
    });

    HttpServer::new(move || {
        let allowed_origin = std::env::var("ALLOWED_ORIGIN").ok().filter(|s| !s.is_empty());

        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
            .max_age(3600);

        if let Some(origin) = allowed_origin {
            tracing::info!(origin = %origin, "using restricted CORS origin");
            cors = cors.allowed_origin(&origin);
        } else {
            tracing::warn!("ALLOWED_ORIGIN not set, falling back to allow_any_origin (dev mode)");
            cors = cors.allow_any_origin();
        }

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .route("/healthz", web::get().to(healthz))
            .configure(configure_routes)
    })
    .bind(bind_address)
    .map_err(Error::Io)?
    .run()
    .await
    .map_err(Error::Io)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_length_bounds_are_3_to_50() {
        assert!(!is_valid_user_id("ab"));
        assert!(is_valid_user_id("abc"));
        assert!(is_valid_user_id(&"a".repeat(50)));
        assert!(!is_valid_user_id(&"a".repeat(51)));
    }

    #[test]
    fn error_response_maps_insufficient_balance_to_400() {
        let err = Error::InsufficientBalance {
            have: Decimal::new(100, 2),
            need: Decimal::new(200, 2),
        };
        let resp = error_response(&err, "/transfers");
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[test]
    fn error_response_maps_conflict_to_409() {
        let resp = error_response(&Error::Conflict("alice".to_string()), "/users");
        assert_eq!(resp.status().as_u16(), 409);
    }
}
