//! OrbitMesh daemon entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orbitmesh::activity::{self, ActivityOutput};
use orbitmesh::config::Config;
use orbitmesh::coordinator::{recovery, SessionCoordinator};
use orbitmesh::http::{self, AppState};
use orbitmesh::hub::Hub;
use orbitmesh::storage::FrameLog;

#[derive(Parser)]
#[command(name = "orbitmesh")]
#[command(version)]
#[command(about = "Session runtime for supervising long-running AI-agent subprocesses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the recovery sweep, then serve the HTTP/realtime surface.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "127.0.0.1:4795")]
        addr: String,
    },
    /// Run the boot recovery sweep once, print a summary, and exit.
    Recover,
    /// Replay a session's captured PTY frame log through the activity
    /// extractor, without a live subprocess. For debugging rule profiles.
    Replay {
        /// Session whose frame log to replay.
        session_id: String,
        /// Command the matching profile should apply to.
        #[arg(long)]
        command: String,
        /// Arguments the matching profile should apply to.
        #[arg(long)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match cli.command {
        Command::Serve { addr } => runtime.block_on(serve(addr)),
        Command::Recover => runtime.block_on(recover()),
        Command::Replay { session_id, command, args } => replay(session_id, command, args),
    }
}

async fn recover() -> Result<()> {
    let config = Config::from_env();
    let boot_id = recovery::mint_boot_id();
    log::info!("running recovery sweep for boot {boot_id}");
    let summary = recovery::run_boot_sweep(&config, &boot_id).context("recovery sweep failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn serve(addr: String) -> Result<()> {
    let config = Arc::new(Config::from_env());
    let boot_id = recovery::mint_boot_id();
    log::info!("starting orbitmesh, boot {boot_id}");

    let summary =
        recovery::run_boot_sweep(&config, &boot_id).context("recovery sweep failed")?;
    log::info!(
        "recovery sweep done: scanned {}, interrupted {} (restart) / {} (wait timeout) / {} (stale token)",
        summary.sessions_scanned,
        summary.interrupted_process_restart,
        summary.interrupted_wait_timeout,
        summary.interrupted_stale_token,
    );

    let coordinator = Arc::new(SessionCoordinator::new(config, boot_id));
    let hub = Arc::new(Hub::new(coordinator.clone()));
    let router = http::router(AppState { coordinator, hub });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

fn replay(session_id: String, command: String, args: Vec<String>) -> Result<()> {
    let config = Config::from_env();
    let frame_log = FrameLog::open(
        &config.sessions_dir()?,
        &session_id,
        config.frame_log_max_frame_bytes,
    )
    .context("failed to open frame log")?;

    let profile = activity::rules::load_matching_profile(&config.extractors_dir()?, &command, &args)
        .context("failed to load extractor profiles")?
        .with_context(|| format!("no extractor profile matches command {command:?}"))?;

    let (outputs, _) = activity::replay(
        profile,
        &frame_log,
        orbitmesh::constants::PTY_DEFAULT_COLS,
        orbitmesh::constants::PTY_DEFAULT_ROWS,
        config.open_window_size,
        &session_id,
    )
    .context("replay failed")?;

    for output in outputs {
        match output {
            ActivityOutput::Upsert(entry) => println!("{}", serde_json::to_string(&entry)?),
            ActivityOutput::Finalized(id) => println!(r#"{{"event":"finalized","id":"{id}"}}"#),
            ActivityOutput::Evicted(id) => println!(r#"{{"event":"evicted","id":"{id}"}}"#),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received");
}
