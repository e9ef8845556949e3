use std::path::PathBuf;

use clap::{Parser, Subcommand};

use telegram_mcp::socket_path::{resolve_project_root, socket_path};

#[derive(Parser)]
#[command(
    name = "telegram-mcp",
    version,
    about = "Durable blocking-question relay between coding agents and a human operator"
)]
struct Cli {
    /// Project root; defaults to PROJECT_ROOT env or the current directory.
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP stdio adapter (ensures a daemon is running first).
    Adapter,
    /// Run the relay daemon in the foreground.
    Daemon,
    /// List pending questions across all sessions.
    Queue,
    /// List session logs discovered on disk.
    Sessions,
    /// Answer a pending question (the out-of-band answer-writer path).
    Answer {
        question_id: String,
        answer: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let project_root = resolve_project_root(cli.project_root.as_deref());

    match cli.command {
        Commands::Adapter => telegram_mcp::adapter::run(&project_root).await?,
        Commands::Daemon => {
            let socket = socket_path(&project_root);
            telegram_mcp::daemon::run(&project_root, &socket).await?;
        }
        Commands::Queue => telegram_mcp::cli::queue::run_queue(&project_root)?,
        Commands::Sessions => telegram_mcp::cli::queue::run_sessions(&project_root)?,
        Commands::Answer {
            question_id,
            answer,
        } => telegram_mcp::cli::queue::run_answer(&project_root, &question_id, &answer).await?,
    }

    Ok(())
}

/// Logs go to stderr; stdout is reserved for the MCP stdio protocol.
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("telegram_mcp=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();
}
