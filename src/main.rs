use anyhow::Context;
use bootkeys::{
    cli::{self, Cli, Commands},
    config::AppConfig,
    error::AppError,
    secrets::{EnvSnapshot, OsKeyGenerator},
    bootstrap, web,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging first. Logs go to stderr; stdout carries status lines.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bootkeys=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<AppError>()
            .map(AppError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).map_err(AppError::from)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, cli.config).await,
        Commands::Generate(opts) => {
            opts.store.apply(&mut config);
            let env = EnvSnapshot::capture([config.secrets.signing_key.as_str()]);
            let report = cli::generate(&config, &env, &OsKeyGenerator, opts.force)?;
            println!("{}", report);
            Ok(())
        }
        Commands::Keys(opts) => {
            opts.apply(&mut config);
            let [hash, block] = config.secrets.session_specs();
            let env = EnvSnapshot::capture([hash.name.as_str(), block.name.as_str()]);
            for report in cli::keys(&config, &env, &OsKeyGenerator)? {
                println!("{}", report);
            }
            Ok(())
        }
        Commands::Status(opts) => {
            opts.apply(&mut config);
            let env = EnvSnapshot::capture(config.secrets.names());
            let lines = cli::status(&config, &env)?;
            for line in &lines {
                println!("{}", line);
            }
            cli::require_present(&lines)?;
            Ok(())
        }
    }
}

/// Bootstrap secrets, then serve until interrupted.
async fn serve(config: AppConfig, config_file: Option<PathBuf>) -> anyhow::Result<()> {
    info!("Starting bootkeys v{}", env!("CARGO_PKG_VERSION"));

    let addr = config.listen_addr();
    let secrets = bootstrap::run_blocking(config, config_file)
        .await
        .map_err(AppError::from)
        .context("Required secrets unavailable, refusing to start")?;

    let app = web::create_router(web::AppState {
        secrets: Arc::new(secrets),
    });

    let listener = TcpListener::bind(&addr).await?;
    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
