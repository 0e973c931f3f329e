use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "jobboard", about = "Live board of automated repository jobs", version)]
pub struct Cli {
    /// Job server base url; overrides the saved one for this run
    #[arg(long, env = "JOBBOARD_SERVER", global = true)]
    pub server: Option<String>,

    /// Directory for preferences, job cache and log file [default: ~/.jobboard]
    #[arg(long, env = "JOBBOARD_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Where log output goes
    #[arg(long, value_enum, default_value_t = LogTarget::File, global = true)]
    pub log: LogTarget,

    /// Keep the job cache in memory instead of the state directory
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    Terminal,
    File,
    Both,
}

#[derive(Subcommand)]
pub enum Command {
    /// Follow the board live until Ctrl-C
    Watch,

    /// Print the current jobs once
    Status {
        /// Group jobs into issue columns
        #[arg(long)]
        issues: bool,
    },

    /// Print the logs of a job
    Logs {
        /// Job id
        job: String,
        /// Keep streaming live output after the stored logs
        #[arg(short, long)]
        follow: bool,
    },

    /// Approve a job that is waiting for approval
    Approve {
        /// Job id
        job: String,
    },

    /// Reject a job that is waiting for approval
    Reject {
        /// Job id
        job: String,
    },

    /// Start a job for an issue
    Trigger {
        /// Repository as owner/name
        #[arg(long)]
        repo: String,
        /// Issue number
        #[arg(long)]
        issue: u64,
        /// Job command, e.g. plan or implement
        #[arg(long)]
        command: String,
    },

    /// List repositories known to the server
    Repos,

    /// Save the job server base url
    #[command(name = "set-server")]
    SetServer {
        /// Base url, e.g. http://localhost:8000
        url: String,
    },
}
