use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::domain::{DepositIntent, DepositStatus, LedgerEntryType, LedgerStatus, LedgerTransaction};
use crate::handlers::{self, admin, deposits, webhook};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Account Shop Core",
        description = "Automatic bank-transfer deposits: QR payment requests, webhook reconciliation and the balance ledger."
    ),
    paths(
        handlers::health,
        deposits::create_deposit,
        deposits::list_deposits,
        deposits::deposit_status,
        deposits::balance,
        webhook::sepay_webhook,
        webhook::bank_webhook,
        webhook::casso_webhook,
        admin::approve_deposit,
        admin::reject_deposit,
    ),
    components(schemas(
        handlers::HealthStatus,
        handlers::DbPoolStats,
        DepositIntent,
        DepositStatus,
        LedgerTransaction,
        LedgerEntryType,
        LedgerStatus,
        deposits::CreateDepositRequest,
        deposits::CreateDepositResponse,
        deposits::DepositStatusResponse,
        deposits::BalanceResponse,
        webhook::WebhookResult,
        webhook::BatchWebhookResult,
        admin::ManualActionRequest,
        admin::ManualActionResponse,
    )),
    modifiers(&AdminKeyAddon),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Deposits", description = "User deposit intents and balance"),
        (name = "Webhooks", description = "Signed payment notifications"),
        (name = "Admin", description = "Manual settlement")
    )
)]
pub struct ApiDoc;

struct AdminKeyAddon;

impl Modify for AdminKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_key",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
