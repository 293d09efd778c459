use chorecredit_server::{reward, server, storage};
mod cli;

use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    use clap::Parser;
    let args = cli::Cli::parse();

    // Console-only logging with env-driven level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(true)
        .init();

    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "data/app.db".into());
    // Ensure data dir exists when using default
    if let Some(parent) = std::path::Path::new(&db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        let _ = std::fs::create_dir_all(parent);
    }
    let store = match storage::Store::connect_sqlite(&db_path).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error=%e, path=%db_path, "Failed to connect DB");
            std::process::exit(3);
        }
    };

    if let Some(cmd) = args.command {
        match cmd {
            cli::Command::ImportCodes { file, family_id } => {
                let raw = match std::fs::read_to_string(&file) {
                    Ok(s) => s,
                    Err(e) => {
                        eprintln!("Cannot read {}: {}", file.display(), e);
                        std::process::exit(2);
                    }
                };
                let outcome = match store
                    .transaction(move |conn| reward::pool::import(conn, family_id, &raw))
                    .await
                {
                    Ok(o) => o,
                    Err(e) => {
                        eprintln!("Import failed: {}", e);
                        std::process::exit(2);
                    }
                };
                println!(
                    "imported {} units, skipped {} duplicates",
                    outcome.imported, outcome.skipped
                );
                for err in &outcome.errors {
                    eprintln!("  {}", err);
                }
                if !outcome.errors.is_empty() {
                    std::process::exit(1);
                }
                return;
            }
        }
    }

    let config = match server::AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error=%e, "Failed to load config");
            std::process::exit(2);
        }
    };
    let tz = match config.tz() {
        Ok(tz) => tz,
        Err(e) => {
            tracing::error!(error=%e, "Invalid timezone in config");
            std::process::exit(2);
        }
    };

    // Seed children/tasks from config and the achievement catalog
    if let Err(e) = store
        .seed_from_config(&config.children, &config.tasks)
        .await
    {
        tracing::error!(error=%e, "Failed to seed DB");
        std::process::exit(4);
    }
    match store.transaction(reward::achievements::seed).await {
        Ok(created) if created > 0 => tracing::info!(created, "seeded achievement catalog"),
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error=%e, "Failed to seed achievements");
            std::process::exit(4);
        }
    }

    // Decide listen port: env PORT overrides config.listen_port, default 5151
    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .or(config.listen_port)
        .unwrap_or(5151);

    let state = server::AppState::new(config, store, tz);
    let app = server::router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(%err, "server error");
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("listen SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("listen SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("shutdown: received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("shutdown: received SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown: received Ctrl+C");
    }
}
