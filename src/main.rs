//! githist CLI - import git history into a SQLite store

use clap::{Parser, Subcommand};
use githist::config::{self, GithistConfig};
use githist::orchestrator::OrchestratorConfig;
use githist::storage::DbConfig;
use githist::ImportDepth;
use std::path::{Path, PathBuf};

mod commands;

#[derive(Parser)]
#[command(name = "githist")]
#[command(version)]
#[command(about = "Import git history (references, commits, authors, patches) into SQLite")]
#[command(long_about = r#"
githist walks every reference of a local git repository and stores its
history in a normalized SQLite database:
  • Projects group repositories
  • References are imported in parallel by a pool of workers
  • Commits and authors are deduplicated across references
  • Updates import only references that are new since the last run

Example usage:
  githist init
  githist create-project linux
  githist import --project linux --path ./linux --depth 2
  githist update --project linux --path ./linux
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Path to the database file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Path to the config file (defaults to ./githist.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write githist.toml and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Register a project
    CreateProject {
        /// Project name
        name: String,
    },

    /// Import a repository (all references, or the listed ones)
    Import {
        /// Project the repository belongs to
        #[arg(short, long)]
        project: String,

        /// Repository name (defaults to the directory name)
        #[arg(short, long)]
        repository: Option<String>,

        /// Path to the local git repository
        #[arg(long)]
        path: PathBuf,

        /// Skip commits authored after this date (YYYY-MM-DD)
        #[arg(long)]
        cutoff: Option<String>,

        /// 1 = metadata, 2 = patches, 3 = patches with line detail
        #[arg(long)]
        depth: Option<u8>,

        /// Only import these references (repeat or comma separate)
        #[arg(long = "ref", value_delimiter = ',')]
        references: Vec<String>,

        /// Number of workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Import references added since the last import
    Update {
        /// Project the repository belongs to
        #[arg(short, long)]
        project: String,

        /// Repository name (defaults to the directory name)
        #[arg(short, long)]
        repository: Option<String>,

        /// Path to the local git repository
        #[arg(long)]
        path: PathBuf,

        /// Skip commits authored after this date (YYYY-MM-DD)
        #[arg(long)]
        cutoff: Option<String>,

        /// Number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Also import new commits on already imported references
        #[arg(long)]
        refresh: bool,
    },

    /// List the imported references of a repository
    Refs {
        #[arg(short, long)]
        project: String,

        #[arg(short, long)]
        repository: String,
    },

    /// Show statistics about the store or one repository
    Stats {
        #[arg(short, long, requires = "repository")]
        project: Option<String>,

        #[arg(short, long, requires = "project")]
        repository: Option<String>,
    },

    /// Delete log files from previous runs
    ClearLogs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(&self) -> bool {
        *self == OutputMode::Human
    }
}

/// Print the JSON envelope for a successful command
pub fn emit_success(mode: OutputMode, command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        let envelope = serde_json::json!({
            "ok": true,
            "command": command,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

/// Effective settings: CLI flags over githist.toml over defaults
pub struct Settings {
    pub config_path: PathBuf,
    pub database: PathBuf,
    pub workers: usize,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub busy_timeout_ms: u64,
    pub depth: ImportDepth,
}

impl Settings {
    fn resolve(cli: &Cli, file: Option<GithistConfig>) -> Self {
        let file = file.unwrap_or_default();
        let database = cli
            .database
            .clone()
            .or_else(|| file.database.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| config::default_database_path_in(Path::new(".")));

        Self {
            config_path: cli.config.clone().unwrap_or_else(config::default_config_path),
            database,
            workers: file.workers(),
            log_dir: file.log_dir(),
            log_level: file.log_level.clone().unwrap_or_else(|| "info".to_string()),
            busy_timeout_ms: file.busy_timeout_ms(),
            depth: file.depth(),
        }
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            path: self.database.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }

    pub fn orchestrator_config(&self, workers: Option<usize>) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(self.db_config())
            .with_workers(workers.unwrap_or(self.workers))
            .with_log_dir(&self.log_dir);
        config.log_level = self.log_level.clone();
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_config = config::load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, file_config);

    githist::logging::init_tracing(cli.verbose, Some(&settings.log_level));

    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    match cli.command {
        Commands::Init { force } => commands::run_init(&settings, force, mode),
        Commands::CreateProject { name } => commands::run_create_project(&settings, &name, mode),
        Commands::Import { project, repository, path, cutoff, depth, references, workers } => {
            commands::run_import(
                &settings,
                commands::ImportArgs { project, repository, path, cutoff, depth, references, workers },
                mode,
            )
        }
        Commands::Update { project, repository, path, cutoff, workers, refresh } => {
            commands::run_update(
                &settings,
                commands::UpdateArgs { project, repository, path, cutoff, workers, refresh },
                mode,
            )
        }
        Commands::Refs { project, repository } => commands::run_refs(&settings, &project, &repository, mode),
        Commands::Stats { project, repository } => {
            let target = project.zip(repository);
            commands::run_stats(&settings, target, mode)
        }
        Commands::ClearLogs => commands::run_clear_logs(&settings, mode),
    }
}
