use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use corral::config::{resolve_token, StoragePaths};
use corral::engine::Engine;
use corral::telemetry::{generate_session_id, init_telemetry};

#[derive(Parser)]
#[command(name = "corral", about = "Coordination service for agents working a shared GitHub backlog")]
struct Cli {
    /// GitHub token; falls back to GITHUB_TOKEN, then the gh CLI
    #[arg(long, global = true)]
    token: Option<String>,

    /// Base directory for coordination state; falls back to CORRAL_HOME,
    /// then ~/.corral
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool requests over stdio (the default)
    Serve,
    /// Run the audit log retention sweep and exit
    SweepLogs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session_id = generate_session_id();
    init_telemetry(&session_id)?;

    let paths = StoragePaths::resolve(cli.base_dir.as_deref())
        .context("could not resolve the coordination state directory")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let token = resolve_token(cli.token.as_deref())?;
            let engine = Engine::new(&token, session_id, paths)?;
            // Retention runs opportunistically at every bootstrap.
            if let Err(e) = engine.audit.sweep(chrono::Utc::now()) {
                tracing::warn!(error = %e, "audit sweep failed at startup");
            }
            corral::server::serve(engine).await
        }
        Commands::SweepLogs => {
            paths.ensure_layout()?;
            let log = corral::audit::AuditLog::new(paths.logs_dir());
            let deleted = log.sweep(chrono::Utc::now())?;
            println!("swept {deleted} audit file(s)");
            Ok(())
        }
    }
}
