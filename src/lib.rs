pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod payments;
pub mod ports;
pub mod services;
pub mod use_cases;
pub mod utils;

use axum::{
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::payments::{QrBuilder, QrError, SepayClient};
use crate::ports::DepositRepository;
use crate::use_cases::{CreateDeposit, ManualSettlement, ReconcilePayment};

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<dyn DepositRepository>,
    pub deposits: Arc<CreateDeposit>,
    pub reconciler: Arc<ReconcilePayment>,
    pub manual: Arc<ManualSettlement>,
    /// Present when QRs are minted through the provider API.
    pub provider: Option<SepayClient>,
    pub sepay_webhook_secret: Option<String>,
    pub casso_webhook_secret: Option<String>,
    pub admin_api_key: Option<String>,
    pub cors_allowed_origins: Option<String>,
    /// Only used for health reporting.
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(config: &Config, repository: Arc<dyn DepositRepository>) -> Result<Self, QrError> {
        let qr_builder = QrBuilder::from_config(config)?;
        let provider = qr_builder.provider().cloned();

        Ok(AppState {
            deposits: Arc::new(CreateDeposit::new(
                repository.clone(),
                qr_builder,
                config.bank.account_number.clone(),
                config.deposit.clone(),
            )),
            reconciler: Arc::new(ReconcilePayment::new(
                repository.clone(),
                config.deposit.amount_tolerance.clone(),
            )),
            manual: Arc::new(ManualSettlement::new(repository.clone())),
            repository,
            provider,
            sepay_webhook_secret: config.provider.secret_key.clone(),
            casso_webhook_secret: config.casso_webhook_secret.clone(),
            admin_api_key: config.admin_api_key.clone(),
            cors_allowed_origins: config.cors_allowed_origins.clone(),
            db: None,
        })
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.db = Some(pool);
        self
    }
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn create_app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/auto-deposits/:id/approve",
            post(handlers::admin::approve_deposit),
        )
        .route(
            "/admin/auto-deposits/:id/reject",
            post(handlers::admin::reject_deposit),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    let cors = cors_layer(state.cors_allowed_origins.as_deref());

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/auto-deposits",
            post(handlers::deposits::create_deposit).get(handlers::deposits::list_deposits),
        )
        .route(
            "/auto-deposits/:id/status",
            get(handlers::deposits::deposit_status),
        )
        .route("/balance", get(handlers::deposits::balance))
        .route("/sepay/webhook", post(handlers::webhook::sepay_webhook))
        .route("/bank/sepay-webhook", post(handlers::webhook::bank_webhook))
        .route("/bank/casso-webhook", post(handlers::webhook::casso_webhook))
        .merge(admin_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(cors)
        .with_state(state)
}
