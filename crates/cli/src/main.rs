//! semdex CLI - incremental semantic search over local folders and repositories

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use semdex::mode::ChunkingMode;

mod commands;
mod format;
mod logging;

use commands::{
  cmd_changes, cmd_clear, cmd_config_init, cmd_config_show, cmd_index, cmd_repo, cmd_search, cmd_settings, cmd_status,
  cmd_sync, cmd_watch,
};
use logging::{init_cli_logging, init_watch_logging};

#[derive(Parser)]
#[command(name = "semdex")]
#[command(about = "Incremental semantic search over local folders and repositories")]
#[command(after_help = "\
QUICK START:
  semdex index ~/notes                 # Index a folder (gist mode)
  semdex index ~/notes --mode pinpoint # Index for exact phrase lookups
  semdex search \"release checklist\"    # Search indexed content

KEEPING UP TO DATE:
  semdex watch                         # Watch indexed folders and sync changes
  semdex sync                          # Rescan indexed folders once")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `semdex repo`
#[derive(Subcommand)]
pub enum RepoCommand {
  /// Index every file of a repository checkout
  Index {
    /// Repository name, e.g. owner/name
    repository: String,
    /// Branch name
    branch: String,
    /// Checkout directory
    root: PathBuf,
    #[arg(short, long, default_value = "gist")]
    mode: ChunkingMode,
  },
  /// Reindex what changed since the branch manifest was written
  Sync {
    repository: String,
    branch: String,
    root: PathBuf,
    #[arg(short, long, default_value = "gist")]
    mode: ChunkingMode,
    /// Show the changes without indexing
    #[arg(long)]
    dry_run: bool,
  },
  /// List branch manifests
  Manifests {
    /// Only this repository
    repository: Option<String>,
    #[arg(long)]
    json: bool,
  },
  /// Delete a repository's rows and manifests
  Forget { repository: String },
}

/// Subcommands for `semdex config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration
  Show {
    /// Folder whose .semdex/config.toml takes priority (default: current directory)
    #[arg(long)]
    folder: Option<PathBuf>,
  },
  /// Write a commented config template to <folder>/.semdex/config.toml
  Init {
    #[arg(long)]
    folder: Option<PathBuf>,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Index folders
  #[command(after_help = "\
EXCLUDE PATTERNS:
  /build       anchored at the indexed folder
  target/      any directory with that name
  docs/*.md    path pattern, matched at any depth
  *.log        any single path component

Without --exclude, the patterns saved for the same folder set are reused.")]
  Index {
    /// Folders to index
    #[arg(required = true)]
    folders: Vec<PathBuf>,
    #[arg(short, long, default_value = "gist")]
    mode: ChunkingMode,
    /// Exclusion pattern (repeatable)
    #[arg(short, long = "exclude")]
    excludes: Vec<String>,
    /// Skip files larger than this many MB
    #[arg(long)]
    max_size_mb: Option<u64>,
  },
  /// Rescan indexed folders and apply the changes
  Sync {
    /// Only this mode (default: all)
    #[arg(short, long)]
    mode: Option<ChunkingMode>,
  },
  /// Watch indexed folders and sync changes as they happen
  Watch {
    /// Log to a rolling file under the data directory instead of the console
    #[arg(long)]
    log_file: bool,
  },
  /// Show index statistics and indexed folders
  Status {
    #[arg(long)]
    json: bool,
  },
  /// List pending changes in indexed folders without applying them
  Changes {
    #[arg(short, long)]
    mode: Option<ChunkingMode>,
    #[arg(long)]
    json: bool,
  },
  /// Index and sync repository checkouts
  Repo {
    #[command(subcommand)]
    command: RepoCommand,
  },
  /// Search indexed content
  Search {
    query: String,
    #[arg(short, long, default_value = "gist")]
    mode: ChunkingMode,
    #[arg(short, long, default_value = "10")]
    limit: usize,
    /// Only results under this folder
    #[arg(long)]
    folder: Option<PathBuf>,
    #[arg(long)]
    json: bool,
  },
  /// Remove a folder from the index, or everything with --all
  Clear {
    folder: Option<PathBuf>,
    /// Only this mode (default: all)
    #[arg(short, long)]
    mode: Option<ChunkingMode>,
    /// Delete all index data
    #[arg(long, conflicts_with = "folder")]
    all: bool,
  },
  /// Show saved folder settings
  Settings {
    /// Delete the settings with this key
    #[arg(long)]
    forget: Option<String>,
  },
  /// Manage configuration
  #[command(after_help = "\
CONFIG LOCATIONS:
  Folder: <folder>/.semdex/config.toml
  User:   ~/.config/semdex/config.toml")]
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // File logging for the long-running watcher, console for everything else
  let _guard = match &cli.command {
    Commands::Watch { log_file: true } => init_watch_logging(),
    _ => {
      init_cli_logging();
      None
    }
  };

  match cli.command {
    Commands::Index {
      folders,
      mode,
      excludes,
      max_size_mb,
    } => cmd_index(folders, mode, excludes, max_size_mb).await,
    Commands::Sync { mode } => cmd_sync(mode).await,
    Commands::Watch { .. } => cmd_watch().await,
    Commands::Status { json } => cmd_status(json).await,
    Commands::Changes { mode, json } => cmd_changes(mode, json).await,
    Commands::Repo { command } => cmd_repo(command).await,
    Commands::Search {
      query,
      mode,
      limit,
      folder,
      json,
    } => cmd_search(&query, mode, limit, folder.as_deref(), json).await,
    Commands::Clear { folder, mode, all } => cmd_clear(folder.as_deref(), mode, all).await,
    Commands::Settings { forget } => cmd_settings(forget.as_deref()).await,
    Commands::Config { command } => match command {
      ConfigCommand::Show { folder } => cmd_config_show(folder),
      ConfigCommand::Init { folder } => cmd_config_init(folder),
    },
  }
}
