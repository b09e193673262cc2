use censo::{build_router, AppConfig, AppState, Args, ConfigManager, ServeOptions, TableBackend};
use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

fn handle_early_exit_flags(args: &Args) -> Result<Option<()>> {
    if args.generate_config {
        match ConfigManager::new(censo::APP_NAME) {
            Ok(config_manager) => match config_manager.write_default_config(args.force) {
                Ok(config_path) => {
                    println!("Configuration file written to: {}", config_path.display());
                    return Ok(Some(()));
                }
                Err(e) => {
                    eprintln!("Error writing configuration file: {}", e);
                    std::process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("Error initializing config manager: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(None)
}

fn load_config(args: &Args) -> Result<AppConfig> {
    match &args.config {
        Some(path) => AppConfig::load_from_path(path),
        None => AppConfig::load(censo::APP_NAME),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(()) = handle_early_exit_flags(&args)? {
        return Ok(());
    }

    color_eyre::install()?;
    let config = load_config(&args)?;
    let options = ServeOptions::from_args_and_config(&args, &config)?;
    censo::init_tracing(&options.log_filter, options.log_format);

    let store = censo::open_store(&options, &config)?;
    match store.backend().load() {
        Ok(table) => info!(
            source = %store.backend().describe(),
            rows = table.data_row_count(),
            "census workbook ready"
        ),
        Err(e) => warn!("{}; requests will fail until it is available", e),
    }
    store.record_startup();

    let state = AppState::new(Arc::new(store), options.max_body_bytes);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(options.bind)
        .await
        .map_err(|e| eyre!("Failed to bind {}: {}", options.bind, e))?;
    info!(addr = %options.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| eyre!("Server failed: {}", e))?;
    Ok(())
}
