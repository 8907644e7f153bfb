//! examcache - command-line driver for the exam report cache.
//!
//! Signs in against the exam backend, keeps the session token encrypted at
//! rest, and prints reports from the local cache when the server is slow or
//! unreachable.

mod cli;
mod commands;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{CacheAction, Cli, Commands, ExamsAction, UploadsAction};
use examcache_core::{Config, ExamContext, SessionEvent};

/// Rolling log file name prefix
const LOG_FILE_PREFIX: &str = "examcache.log";

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g., RUST_LOG=debug). When a log
/// directory is configured, logs also go to a daily rolling file there.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    config.apply_env();
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(&config);
    info!("examcache starting");

    let ctx = ExamContext::init(config.clone())?;
    let mut expired = ctx.subscribe();

    let result = run(&ctx, &config, cli.command).await;

    if let Ok(SessionEvent::Expired) = expired.try_recv() {
        eprintln!("Your session has expired. Run `examcache login` to sign in again.");
    }

    ctx.shutdown()?;
    info!("examcache shutting down");
    result
}

async fn run(ctx: &ExamContext, config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Login { phone } => commands::login(ctx, config, phone).await,
        Commands::Register { phone, code } => commands::register(ctx, &phone, &code).await,
        Commands::SendCode { phone } => commands::send_code(ctx, &phone).await,
        Commands::Logout => commands::logout(ctx),
        Commands::Status => commands::status(ctx),
        Commands::Report {
            exam_id,
            refresh,
            output,
        } => commands::report(ctx, &exam_id, refresh, output.as_deref()).await,
        Commands::DeleteExam { exam_id } => commands::delete_exam(ctx, &exam_id).await,
        Commands::Upload { image } => commands::upload(ctx, &image).await,
        Commands::Uploads { action } => match action {
            UploadsAction::List => commands::list_uploads(ctx),
            UploadsAction::Run => commands::run_uploads(ctx).await,
            UploadsAction::Retry { id } => commands::retry_upload(ctx, &id).await,
            UploadsAction::Clear => commands::clear_uploads(ctx),
        },
        Commands::Exams { action } => match action {
            ExamsAction::Status { exam_id } => commands::exam_status(ctx, &exam_id).await,
            ExamsAction::Show { exam_id } => commands::exam_detail(ctx, &exam_id).await,
            ExamsAction::History { skip, limit } => commands::exam_history(ctx, skip, limit).await,
        },
        Commands::Cache { action } => match action {
            CacheAction::ClearExpired => commands::clear_expired(ctx),
            CacheAction::ClearAll => commands::clear_all(ctx),
            CacheAction::Show { exam_id } => commands::show_cached(ctx, &exam_id),
        },
    }
}
