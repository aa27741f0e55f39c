use anyhow::{Context, Result};
use clap::Parser;
use swingbot::adapters::SqliteLedger;
use swingbot::cli::{Cli, Commands};
use swingbot::config::{AppConfig, LoggingConfig};
use swingbot::notify::{format_trades, strip_tags};
use swingbot::persistence::Ledger;
use swingbot::build_bot;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    match cli.command() {
        Commands::Run => {
            let _guard = init_logging(&config.logging);
            config.validate()?;
            run_bot(&config).await?;
        }
        Commands::Trades { limit } => {
            init_logging_simple();
            let ledger = open_ledger(&config).await?;
            let trades = ledger.get_recent_trades(*limit).await?;
            println!("{}", strip_tags(&format_trades(&trades)));
        }
        Commands::Events { event_type, limit } => {
            init_logging_simple();
            let ledger = open_ledger(&config).await?;
            for event in ledger.recent_events(event_type.as_deref(), *limit).await? {
                println!(
                    "{} [{}] {}: {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.level,
                    event.event_type,
                    event.message
                );
            }
        }
        Commands::Check => {
            init_logging_simple();
            config.validate()?;
            println!(
                "config ok: venue={} symbol={} profile={} leverage={}x",
                config.venue.kind, config.venue.symbol, config.trading.profile, config.venue.leverage
            );
        }
    }

    Ok(())
}

async fn run_bot(config: &AppConfig) -> Result<()> {
    let mut bot = build_bot(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = bot.run(shutdown_rx).await {
        error!(error = %e, "bot exited with error");
        return Err(e.into());
    }
    info!("bot exited cleanly");
    Ok(())
}

async fn open_ledger(config: &AppConfig) -> Result<SqliteLedger> {
    let ledger = SqliteLedger::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open ledger at {}", config.database.url))?;
    ledger.migrate().await.context("ledger migration failed")?;
    Ok(ledger)
}

fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},swingbot=debug,sqlx=warn", logging.level))
    });

    let (file_layer, guard) = match logging.directory.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "swingbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if logging.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
    guard
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
