use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use taskvault::{
    init_tracing_once, ApiConnector, BackupService, CredentialProvider, Credentials, EnvTokenCredentials,
    ExportFormat, ExportOptions, FixtureApi, FixtureConnector, GoogleConnector, ItemFilters, JobSpinner,
    RenderOptions, RunOutcome, StaticCredentials,
};
use tracing::{info, warn};

const STORE_ROOT: &str = "./taskvault_data";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Back up task lists into a local record store and export them again.
#[derive(Parser)]
#[command(name = "taskvault", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct StoreArgs {
    /// Account the job belongs to.
    #[arg(long)]
    user: String,

    /// Record store directory.
    #[arg(long, default_value = STORE_ROOT)]
    store: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Create a job and run it, showing progress until it finishes.
    Backup {
        #[command(flatten)]
        target: StoreArgs,

        /// Serve lists from a JSON fixture instead of the remote API.
        #[arg(long, conflicts_with = "token_env")]
        fixture: Option<PathBuf>,

        /// Environment variable holding a bearer token for the remote API.
        #[arg(long, default_value = "TASKVAULT_TOKEN")]
        token_env: String,

        #[arg(long)]
        include_completed: bool,
        #[arg(long)]
        include_deleted: bool,
        #[arg(long)]
        include_hidden: bool,

        /// No spinner; log lines only.
        #[arg(long)]
        quiet: bool,
    },

    /// Show the current state of the user's job.
    Progress {
        #[command(flatten)]
        target: StoreArgs,
    },

    /// Render the stored result.
    Export {
        #[command(flatten)]
        target: StoreArgs,

        /// json, raw, csv or outline
        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// Write here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Include tasks whose parent could not be found.
        #[arg(long)]
        show_invalid: bool,
    },
}

fn open_service(store: &Path) -> Result<BackupService> {
    // Env overrides win over the CLI's retry pause; --store wins over TASKVAULT_STORE_DIR.
    let options = ExportOptions::default()
        .with_retry_delay(RETRY_DELAY)
        .with_env_overrides()
        .with_store_dir(store);
    BackupService::open(options)
}

fn main() -> Result<()> {
    init_tracing_once();
    let cli = Cli::parse();

    match cli.command {
        Command::Backup { target, fixture, token_env, include_completed, include_deleted, include_hidden, quiet } => {
            let filters = ItemFilters { include_completed, include_deleted, include_hidden };
            let (credentials, connector): (Arc<dyn CredentialProvider>, Arc<dyn ApiConnector>) = match fixture {
                Some(path) => {
                    let api = FixtureApi::from_path(&path)?;
                    info!("serving {} lists from {}", api.lists().len(), path.display());
                    let creds = StaticCredentials::new().with_user(target.user.clone(), Credentials::bearer("fixture"));
                    (Arc::new(creds), Arc::new(FixtureConnector { api }))
                }
                None => (Arc::new(EnvTokenCredentials { var: token_env }), Arc::new(GoogleConnector::default())),
            };
            run_backup(&target, filters, credentials, connector, quiet)
        }
        Command::Progress { target } => {
            let service = open_service(&target.store)?;
            let Some(view) = service.get_progress(&target.user)? else {
                bail!("no export job for {}", target.user);
            };
            println!("status:   {}", view.status);
            println!("progress: {} tasks", view.progress);
            if !view.message.is_empty() {
                println!("message:  {}", view.message);
            }
            if let Some(err) = &view.error_message {
                println!("error:    {err}");
            }
            if let Some(detail) = &view.detail {
                println!("detail:   {detail}");
            }
            Ok(())
        }
        Command::Export { target, format, out, show_invalid } => {
            let service = open_service(&target.store)?;
            let text = service.export(&target.user, format, RenderOptions { show_invalid })?;
            match out {
                Some(path) => {
                    std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{text}"),
            }
            Ok(())
        }
    }
}

fn run_backup(
    target: &StoreArgs,
    filters: ItemFilters,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn ApiConnector>,
    quiet: bool,
) -> Result<()> {
    let service = open_service(&target.store)?;
    service.start_job(&target.user, filters)?;

    let worker = service.worker(credentials, connector);
    let user = target.user.clone();
    let handle = std::thread::spawn(move || worker.run(&user));

    let spinner = if quiet { JobSpinner::hidden() } else { JobSpinner::new("Starting backup") };
    let last = loop {
        let view = service.get_progress(&target.user)?;
        if let Some(v) = &view {
            spinner.update(v);
        }
        if handle.is_finished() || view.as_ref().is_some_and(|v| v.status.is_final()) {
            break view;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let outcome = match handle.join() {
        Ok(res) => res?,
        Err(_) => bail!("backup worker panicked"),
    };
    let last = service.get_progress(&target.user)?.or(last);
    if let Some(view) = &last {
        spinner.finish(view);
        if spinner.is_hidden() {
            println!("{}: {}", view.status, view.error_message.as_deref().unwrap_or(&view.message));
        }
    }
    match outcome {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::Failed { failure, .. } => bail!("{failure}"),
        other => {
            warn!("worker finished without running the job: {other:?}");
            Ok(())
        }
    }
}
