use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wizardry::agent::AgentRole;
use wizardry::config::AppConfig;
use wizardry::orchestrator::{Orchestrator, StartRequest};
use wizardry::registry::WorkflowSession;
use wizardry::server::{create_router, AppState};
use wizardry::shutdown::{graceful_shutdown, wait_for_shutdown};
use wizardry::transcript::{tail_lines, TranscriptLog};
use wizardry::workflow::WorkflowPhase;

#[derive(Parser)]
#[command(
    name = "wizardry",
    about = "Implementer/reviewer agent workflows on isolated git branches"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the dashboard API
    Serve,
    /// Run one workflow in the foreground
    Run {
        #[arg(long)]
        repo: PathBuf,
        /// Base branch to work from
        #[arg(long)]
        branch: String,
        #[arg(long)]
        task: String,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Keep the branch and worktree after success
        #[arg(long)]
        no_cleanup: bool,
    },
    /// Install editable role prompts into a repository
    Setup {
        #[arg(long)]
        repo: PathBuf,
        /// Overwrite prompts that are already installed
        #[arg(long)]
        force: bool,
    },
    /// Show configuration and prompt installation status
    Status {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// List sessions
    Sessions {
        /// Include finished sessions
        #[arg(long)]
        all: bool,
    },
    /// Print the end of a session's transcripts
    Transcripts {
        id: String,
        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
    /// Terminate a session
    Kill {
        id: String,
        /// Also remove the branch and worktree
        #[arg(long)]
        cleanup: bool,
    },
    /// Archive a session, removing its branch unless told otherwise
    Archive {
        id: String,
        #[arg(long)]
        keep_branch: bool,
    },
    /// Delete a session with its branch, worktree and transcripts
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Run {
            repo,
            branch,
            task,
            max_iterations,
            no_cleanup,
        } => {
            let request = StartRequest {
                repo_path: repo,
                base_branch: branch,
                task,
                max_iterations,
                no_cleanup,
            };
            run(config, request).await
        }
        Command::Setup { repo, force } => {
            let written = wizardry::setup::install_prompts(&repo, force).await?;
            if written.is_empty() {
                println!("Prompts already installed (use --force to overwrite)");
            }
            for path in written {
                println!("Installed {}", path.display());
            }
            Ok(())
        }
        Command::Status { repo } => status(&config, &repo).await,
        Command::Sessions { all } => {
            let orchestrator = Orchestrator::from_config(config);
            let sessions = orchestrator.list(all).await?;
            if sessions.is_empty() {
                println!("No sessions");
            }
            for session in &sessions {
                print_session(session);
            }
            Ok(())
        }
        Command::Transcripts { id, lines } => {
            let orchestrator = Orchestrator::from_config(config);
            let session = orchestrator.get(&id).await?;
            let log = TranscriptLog::new(&session.workspace_path);
            for role in AgentRole::ALL {
                let text = log.read(role).await?;
                println!("==> {} <==", log.path(role).display());
                println!("{}\n", tail_lines(&text, lines));
            }
            Ok(())
        }
        Command::Kill { id, cleanup } => {
            let orchestrator = Orchestrator::from_config(config);
            let session = orchestrator.terminate(&id, cleanup).await?;
            print_session(&session);
            Ok(())
        }
        Command::Archive { id, keep_branch } => {
            let orchestrator = Orchestrator::from_config(config);
            let session = orchestrator.archive(&id, !keep_branch).await?;
            print_session(&session);
            Ok(())
        }
        Command::Delete { id } => {
            let orchestrator = Orchestrator::from_config(config);
            orchestrator.delete(&id).await?;
            println!("Deleted {id}");
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        root = %config.workspace.root.display(),
        "Starting Wizardry server"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config));
    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}

async fn run(config: AppConfig, request: StartRequest) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config);
    let session = orchestrator.start(request).await?;
    println!("Started {} on {}", session.session_id, session.branch_name);

    let session = tokio::select! {
        finished = orchestrator.wait(&session.session_id) => finished?,
        _ = wait_for_shutdown() => {
            orchestrator.shutdown().await;
            orchestrator.get(&session.session_id).await?
        }
    };

    print_session(&session);
    if session.phase != WorkflowPhase::Completed {
        anyhow::bail!(
            "workflow {} ended {}: {}",
            session.session_id,
            session.status,
            session.last_error.as_deref().unwrap_or("no reason recorded")
        );
    }
    Ok(())
}

async fn status(config: &AppConfig, repo: &std::path::Path) -> anyhow::Result<()> {
    println!("Workspace root: {}", config.workspace.root.display());
    println!("Agent command:  {}", config.agent.command);
    println!("Max iterations: {}", config.workflow.max_iterations);
    println!(
        "Pull requests:  {}",
        if config.pr.enabled { "enabled" } else { "disabled" }
    );

    let status = wizardry::setup::check(repo).await?;
    println!("Repository:     {}", status.repo_path.display());
    for prompt in &status.prompts {
        let state = if prompt.installed { "installed" } else { "default" };
        println!("  {:<12} {:<10} {}", prompt.role.title(), state, prompt.path.display());
    }
    if !status.is_complete() {
        println!("Run `wizardry setup --repo {}` to install editable prompts", repo.display());
    }
    Ok(())
}

fn print_session(session: &WorkflowSession) {
    println!(
        "{}  {:<11}  {:<16}  iter {}/{}  {}  {}",
        session.session_id,
        session.status.as_str(),
        session.phase.as_str(),
        session.iteration_count,
        session.max_iterations,
        session.created_at.format("%Y-%m-%d %H:%M:%S"),
        session.task.lines().next().unwrap_or_default(),
    );
    if let Some(url) = &session.pr_url {
        println!("    pr: {url}");
    }
    if let Some(reason) = &session.last_error {
        println!("    reason: {reason}");
    }
}
