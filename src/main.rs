use account_shop_core::adapters::PostgresDepositRepository;
use account_shop_core::cli::{self, Cli, Commands, DbCommands, DepositCommands, MIGRATIONS_DIR};
use account_shop_core::config::{Config, LogFormat};
use account_shop_core::ports::DepositRepository;
use account_shop_core::services::ExpirySweeper;
use account_shop_core::{create_app, db, AppState};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,account_shop_core=info,sqlx=warn,hyper=warn,reqwest=warn")
    });

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Deposits(DepositCommands::Sweep)) => {
            cli::handle_deposits_sweep(&config).await
        }
        Some(Commands::Deposits(DepositCommands::Approve { id, actor })) => {
            cli::handle_deposits_approve(&config, id, &actor).await
        }
        Some(Commands::Deposits(DepositCommands::Reject { id, actor })) => {
            cli::handle_deposits_reject(&config, id, &actor).await
        }
        Some(Commands::Config) => cli::handle_config_show(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool, Path::new(MIGRATIONS_DIR)).await?;

    let repository: Arc<dyn DepositRepository> =
        Arc::new(PostgresDepositRepository::new(pool.clone()));

    let sweeper = ExpirySweeper::new(
        repository.clone(),
        Duration::from_secs(config.expiry_sweep_interval_secs),
    );
    let _sweeper_handle = sweeper.spawn();

    let state = AppState::new(&config, repository)?.with_pool(pool);
    tracing::info!(qr_strategy = ?config.qr_strategy, "deposit pipeline initialized");

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
