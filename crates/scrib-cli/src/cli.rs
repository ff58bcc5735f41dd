use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "scrib")]
#[command(about = "Scratch tabs and clipboard history from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to the local data directory
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Quick capture: scrib "my scratch text"
    #[arg(trailing_var_arg = true)]
    pub text: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Work with scratch tabs
    Tab {
        #[command(subcommand)]
        command: TabCommands,
    },
    /// Work with clipboard entries
    Clip {
        #[command(subcommand)]
        command: ClipCommands,
    },
    /// Control cross-device sync
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TabCommands {
    /// Create a new scratch tab
    #[command(alias = "new")]
    Add {
        /// Tab content
        content: Vec<String>,
        /// Display name
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Editor language tag
        #[arg(long, value_name = "LANG")]
        language: Option<String>,
    },
    /// List tabs, most recent first
    List {
        /// Number of tabs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one tab's full text
    Show {
        /// Tab ID or unique ID prefix
        id: String,
    },
    /// Delete a tab
    #[command(alias = "delete")]
    Rm {
        /// Tab ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ClipCommands {
    /// Capture a clipboard entry
    Add {
        /// Entry text
        content: Vec<String>,
    },
    /// List entries, most recent first
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an entry
    #[command(alias = "delete")]
    Rm {
        /// Entry ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Pull, merge, and push both collections once
    Now,
    /// Show sync configuration and collection state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Turn sync on and record the remote endpoint
    Enable {
        /// Base URL of the remote key-value store
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
    },
    /// Turn sync off and clear remote state
    Disable,
    /// Keep syncing on a schedule until interrupted
    Watch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
