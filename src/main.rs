//! stublash: standalone CLI entry point.
//!
//! Parses flags, builds the shared [`stublash::AppState`], loads any static
//! mappings, binds the mock and admin listeners (one shared listener unless
//! `--admin` names a different port than `--port`), and runs until a
//! shutdown signal arrives.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use stublash::config::{self, Args};
use stublash::state::AppState;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install tracing subscriber");
    }

    if args.print_config {
        print_config(&args);
        return;
    }

    if args.validate {
        match validate(&args) {
            Ok(message) => println!("{message}"),
            Err(err) => {
                eprintln!("invalid configuration: {err:#}");
                std::process::exit(3);
            }
        }
        return;
    }

    if let Err(err) = run(args).await {
        tracing::error!(error = %err, "server exited with an error");
        std::process::exit(2);
    }
}

fn print_config(args: &Args) {
    let settings = args.settings();
    match serde_yaml::to_string(&settings) {
        Ok(yaml) => println!("{yaml}"),
        Err(err) => eprintln!("failed to render settings: {err}"),
    }
}

/// `--validate`: make sure the static mappings directory (if any) parses
/// cleanly, without binding a listener. Exit code 3 on invalid
/// configuration per §6's exit-code table.
fn validate(args: &Args) -> anyhow::Result<String> {
    args.socket_addr().context("invalid bind address / port")?;

    match &args.read_static_mappings {
        Some(dir) => {
            let state = AppState::new(args.settings());
            let loaded = config::load_static_mappings_dir(dir, &state)
                .with_context(|| format!("failed to read static mappings directory {dir:?}"))?;
            Ok(format!("Configuration is valid ({loaded} mapping(s) loaded from {dir:?})"))
        }
        None => Ok("Configuration is valid (no static mappings directory configured)".to_string()),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mock_addr = args.socket_addr().context("invalid bind address / port")?;
    let admin_port = args.admin_port();

    let state = AppState::new(args.settings());

    if let Some(dir) = &args.read_static_mappings {
        let loaded = config::load_static_mappings_dir(dir, &state)
            .with_context(|| format!("failed to load static mappings from {dir:?}"))?;
        info!(count = loaded, dir = ?dir, "loaded static mappings");
        if args.watch_static_mappings {
            config::spawn_static_mappings_watcher(dir.clone(), state.clone());
        }
    }

    if let Some(upstream) = &args.proxy_all {
        config::install_proxy_all_fallback(&state, upstream, args.save_mapping);
        info!(upstream, save_mapping = args.save_mapping, "installed proxy-all fallback mapping");
    }

    if admin_port == args.port {
        let listener = tokio::net::TcpListener::bind(mock_addr)
            .await
            .with_context(|| bind_failure(mock_addr))?;
        info!(addr = %mock_addr, "listening (mock + admin surfaces share one port)");
        axum::serve(
            listener,
            config::app(state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    } else {
        let admin_addr: SocketAddr = format!("{}:{}", args.bind_address, admin_port)
            .parse()
            .context("invalid admin bind address")?;

        let mock_listener = tokio::net::TcpListener::bind(mock_addr)
            .await
            .with_context(|| bind_failure(mock_addr))?;
        let admin_listener = tokio::net::TcpListener::bind(admin_addr)
            .await
            .with_context(|| bind_failure(admin_addr))?;
        info!(mock = %mock_addr, admin = %admin_addr, "listening on separate mock and admin ports");

        let mock_server = axum::serve(
            mock_listener,
            config::mock_app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());
        let admin_server = axum::serve(admin_listener, config::admin_app(state));

        tokio::try_join!(mock_server, admin_server)?;
    }

    info!("shutdown complete");
    Ok(())
}

fn bind_failure(addr: SocketAddr) -> String {
    format!("failed to bind {addr}")
}

/// Waits for Ctrl+C or SIGTERM. `axum::serve`'s own graceful-shutdown
/// machinery handles draining in-flight connections up to its own deadline
/// once this future resolves (§5, teardown).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}
