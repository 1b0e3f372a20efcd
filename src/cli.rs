use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::adapters::PostgresDepositRepository;
use crate::config::Config;
use crate::ports::DepositRepository;
use crate::services::ExpirySweeper;
use crate::use_cases::ManualSettlement;

pub const MIGRATIONS_DIR: &str = "./migrations";

#[derive(Parser)]
#[command(name = "account-shop-core")]
#[command(about = "Account Shop Core - automatic bank-transfer deposits", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Deposit maintenance commands
    #[command(subcommand)]
    Deposits(DepositCommands),

    /// Print the resolved configuration with secrets masked
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum DepositCommands {
    /// Expire every pending deposit past its deadline
    Sweep,

    /// Complete a pending deposit and credit the user
    Approve {
        /// Deposit UUID
        #[arg(value_name = "DEPOSIT_ID")]
        id: Uuid,
        /// Operator recorded on the ledger entry
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Mark a pending deposit as failed
    Reject {
        #[arg(value_name = "DEPOSIT_ID")]
        id: Uuid,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

async fn repository(config: &Config) -> anyhow::Result<Arc<dyn DepositRepository>> {
    let pool = crate::db::create_pool(config).await?;
    Ok(Arc::new(PostgresDepositRepository::new(pool)))
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool, Path::new(MIGRATIONS_DIR)).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_deposits_sweep(config: &Config) -> anyhow::Result<()> {
    let sweeper = ExpirySweeper::new(
        repository(config).await?,
        Duration::from_secs(config.expiry_sweep_interval_secs),
    );
    let expired = sweeper.sweep(Utc::now()).await?;

    println!("✓ Expired {} pending deposit(s)", expired);
    Ok(())
}

pub async fn handle_deposits_approve(config: &Config, id: Uuid, actor: &str) -> anyhow::Result<()> {
    let manual = ManualSettlement::new(repository(config).await?);
    let approved = manual.approve(id, actor, Utc::now()).await?;

    println!(
        "✓ Deposit {} approved: {} credited to user {}, new balance {}",
        id, approved.intent.amount, approved.intent.user_id, approved.new_balance
    );
    Ok(())
}

pub async fn handle_deposits_reject(config: &Config, id: Uuid, actor: &str) -> anyhow::Result<()> {
    let manual = ManualSettlement::new(repository(config).await?);
    manual.reject(id, actor, Utc::now()).await?;

    println!("✓ Deposit {} marked as failed", id);
    Ok(())
}

pub fn handle_config_show(config: &Config) -> anyhow::Result<()> {
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Bank: {} / {} ({})", config.bank.bank_code, mask_secret(&config.bank.account_number), config.bank.account_name);
    println!("  QR Strategy: {:?}", config.qr_strategy);
    println!("  Provider Base URL: {}", config.provider.base_url);
    println!("  Provider API Key: {}", masked_option(&config.provider.api_key));
    println!("  Provider Secret: {}", masked_option(&config.provider.secret_key));
    println!("  Casso Secret: {}", masked_option(&config.casso_webhook_secret));
    println!("  Admin API Key: {}", masked_option(&config.admin_api_key));
    println!(
        "  Deposits: {}-{} VND, expire after {} min, {} per hour, tolerance {}",
        config.deposit.min_amount,
        config.deposit.max_amount,
        config.deposit.expiration_minutes,
        config.deposit.hourly_limit,
        config.deposit.amount_tolerance
    );
    println!("  Expiry Sweep Interval: {}s", config.expiry_sweep_interval_secs);

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

fn masked_option(value: &Option<String>) -> String {
    match value {
        Some(v) => mask_secret(v),
        None => "(not set)".to_string(),
    }
}
