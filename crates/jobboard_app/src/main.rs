mod cli;
mod logging;
mod preferences;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use board_logging::{board_info, board_warn};
use chrono::Utc;
use clap::Parser;
use jobboard_core::{JobId, JobStore, JobStreamFrame};
use jobboard_engine::{
    BoardSettings, ChannelSink, Config, FileJobCache, JobBoard, JobCache, MemoryJobCache,
    TriggerRequest,
};
use tokio::sync::mpsc;

use cli::{Cli, Command};
use preferences::Preferences;

fn default_state_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".jobboard"))
}

/// `--server` must be valid; a broken saved url only warns so that
/// `set-server` can still replace it.
fn build_config(cli_server: Option<String>, prefs: &Preferences) -> Result<Config> {
    if let Some(url) = cli_server {
        return Ok(Config::with_base_url(&url)?);
    }
    match &prefs.server_base_url {
        Some(url) => match Config::with_base_url(url) {
            Ok(config) => Ok(config),
            Err(err) => {
                board_warn!("Ignoring saved server: {}", err);
                Ok(Config::unconfigured())
            }
        },
        None => Ok(Config::unconfigured()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => default_state_dir()?,
    };
    logging::initialize(cli.log, &state_dir);

    let prefs = preferences::load(&state_dir);
    let config = build_config(cli.server, &prefs)?;
    let cache: Arc<dyn JobCache> = if cli.ephemeral {
        Arc::new(MemoryJobCache::new())
    } else {
        Arc::new(FileJobCache::new(&state_dir))
    };

    let board = JobBoard::with_reqwest(config, Arc::clone(&cache), BoardSettings::default())?;
    let result = run(&board, cache.as_ref(), &state_dir, cli.command).await;
    board.dispose();
    result
}

async fn run(
    board: &JobBoard,
    cache: &dyn JobCache,
    state_dir: &Path,
    command: Command,
) -> Result<()> {
    match command {
        Command::Watch => watch(board).await,
        Command::Status { issues } => status(board, cache, issues).await,
        Command::Logs { job, follow } => logs(board, JobId::new(job), follow).await,
        Command::Approve { job } => {
            require_server(board)?;
            board.client().approve(&JobId::new(job.as_str())).await?;
            println!("approved {job}");
            Ok(())
        }
        Command::Reject { job } => {
            require_server(board)?;
            board.client().reject(&JobId::new(job.as_str())).await?;
            println!("rejected {job}");
            Ok(())
        }
        Command::Trigger {
            repo,
            issue,
            command,
        } => {
            require_server(board)?;
            let request = TriggerRequest {
                repo,
                issue_number: issue,
                command,
            };
            match board.client().trigger_job(&request).await? {
                Some(id) => println!("started job {id}"),
                None => println!("job started"),
            }
            Ok(())
        }
        Command::Repos => {
            require_server(board)?;
            for repo in board.client().list_repos().await? {
                println!("{}", repo.full_name);
            }
            Ok(())
        }
        Command::SetServer { url } => set_server(board, state_dir, &url),
    }
}

fn require_server(board: &JobBoard) -> Result<()> {
    if !board.config().is_configured() {
        bail!("no job server configured; run `jobboard set-server <url>` or pass --server");
    }
    Ok(())
}

async fn watch(board: &JobBoard) -> Result<()> {
    board.start()?;
    let mut views = board.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let text = render::board(&views.borrow_and_update());
                println!("--- {} ---\n{}", Utc::now().format("%H:%M:%S"), text);
            }
        }
    }
    board_info!("Watch stopped");
    Ok(())
}

/// One-shot reconcile of the cached jobs with a fresh snapshot. When the
/// server is unreachable the cached jobs are shown with the error.
async fn status(board: &JobBoard, cache: &dyn JobCache, issues: bool) -> Result<()> {
    let mut store = JobStore::new();
    store.seed(cache.load());

    let requested_at = Utc::now();
    match board.client().fetch_status().await {
        Ok(jobs) => {
            if store.apply_snapshot(jobs, requested_at) {
                cache.save(store.jobs());
            }
        }
        Err(err) => store.record_error(err, Utc::now()),
    }

    let view = store.view(Utc::now());
    if issues {
        print!("{}", render::board(&view));
    } else {
        print!("{}", render::job_list(&view));
    }
    Ok(())
}

async fn logs(board: &JobBoard, job: JobId, follow: bool) -> Result<()> {
    require_server(board)?;
    let text = board.client().fetch_logs(&job).await?;
    print!("{text}");
    if !text.is_empty() && !text.ends_with('\n') {
        println!();
    }
    if !follow {
        return Ok(());
    }

    let (tx, mut frames) = mpsc::unbounded_channel::<JobStreamFrame>();
    let stream = board.job_stream(job, Arc::new(ChannelSink::new(tx)));
    stream.connect();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = frames.recv() => match frame {
                Some(frame) => println!("{}", render::stream_frame(&frame)),
                None => break,
            },
        }
    }
    stream.disconnect();
    Ok(())
}

fn set_server(board: &JobBoard, state_dir: &Path, raw: &str) -> Result<()> {
    let url = board.update_base_url(raw)?;
    let mut prefs = preferences::load(state_dir);
    prefs.server_base_url = Some(url.clone());
    preferences::save(state_dir, &prefs)?;
    println!("server set to {url}");
    Ok(())
}
