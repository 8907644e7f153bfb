//! Command-line definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// examcache - exam reports that keep working offline
#[derive(Parser)]
#[command(name = "examcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Backend base URL (overrides config and EXAMCACHE_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with phone number and password
    Login {
        /// Phone number (defaults to the last one used)
        phone: Option<String>,
    },

    /// Create an account with a texted verification code
    Register {
        phone: String,
        /// Code received via `send-code`
        #[arg(short, long)]
        code: String,
    },

    /// Text a verification code to a phone number
    SendCode { phone: String },

    /// Sign out and destroy the token key
    Logout,

    /// Show session state
    Status,

    /// Print a report's HTML, from cache when possible
    Report {
        exam_id: String,
        /// Ignore a fresh cached copy and ask the server
        #[arg(short, long)]
        refresh: bool,
        /// Write the HTML to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete an exam on the server along with its cached report
    DeleteExam { exam_id: String },

    /// Queue an exam image for upload and try to send it now
    Upload { image: PathBuf },

    /// Manage queued uploads
    Uploads {
        #[command(subcommand)]
        action: UploadsAction,
    },

    /// Look up exams on the server
    Exams {
        #[command(subcommand)]
        action: ExamsAction,
    },

    /// Manage the local report cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove reports past their seven-day expiry
    ClearExpired,
    /// Remove every cached report
    ClearAll,
    /// Show whether a report is cached and how old it is
    Show { exam_id: String },
}

#[derive(Subcommand)]
pub enum UploadsAction {
    /// List queued, finished and failed uploads
    List,
    /// Send every upload whose retry time has come
    Run,
    /// Give a failed upload a fresh set of attempts
    Retry { id: String },
    /// Forget finished and failed uploads
    Clear,
}

#[derive(Subcommand)]
pub enum ExamsAction {
    /// Grading progress of an uploaded exam
    Status { exam_id: String },
    /// Everything the server knows about an exam
    Show { exam_id: String },
    /// List your exams, newest first
    History {
        #[arg(long, default_value_t = 0)]
        skip: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}
