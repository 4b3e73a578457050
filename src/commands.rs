use crate::{emit_success, OutputMode, Settings};
use githist::config::{self, GithistConfig};
use githist::model::parse_cutoff;
use githist::orchestrator::{ImportRequest, Orchestrator, RunReport, UpdateRequest};
use githist::storage::SqliteStore;
use githist::ui::{self, Icons, ProgressManager, ProgressMessage, Spinner};
use githist::{logging, ImportDepth};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

pub struct ImportArgs {
    pub project: String,
    pub repository: Option<String>,
    pub path: PathBuf,
    pub cutoff: Option<String>,
    pub depth: Option<u8>,
    pub references: Vec<String>,
    pub workers: Option<usize>,
}

pub struct UpdateArgs {
    pub project: String,
    pub repository: Option<String>,
    pub path: PathBuf,
    pub cutoff: Option<String>,
    pub workers: Option<usize>,
    pub refresh: bool,
}

fn repository_name(repository: Option<String>, path: &Path) -> String {
    repository.unwrap_or_else(|| {
        path.canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    })
}

fn parse_optional_cutoff(cutoff: Option<&str>) -> anyhow::Result<Option<chrono::NaiveDate>> {
    Ok(cutoff.map(parse_cutoff).transpose()?)
}

fn open_store(settings: &Settings) -> anyhow::Result<SqliteStore> {
    if !settings.database.exists() {
        anyhow::bail!(
            "database not found at {} (run `githist init` first)",
            settings.database.display()
        );
    }
    Ok(SqliteStore::open(&settings.db_config())?)
}

pub fn run_init(settings: &Settings, force: bool, mode: OutputMode) -> anyhow::Result<()> {
    let root = Path::new(".");
    let mut file_config = GithistConfig::with_defaults(root);
    file_config.database = Some(settings.database.to_string_lossy().into_owned());

    config::write_config(&settings.config_path, &file_config, force)?;
    config::ensure_db_dir(&settings.database)?;
    SqliteStore::open(&settings.db_config())?.close()?;
    config::ensure_gitignore(root)?;

    if mode.is_human() {
        ui::success("Initialized githist");
        ui::info("Config", &settings.config_path.display().to_string());
        ui::info("Database", &settings.database.display().to_string());
    } else {
        emit_success(
            mode,
            "init",
            serde_json::json!({
                "config": settings.config_path,
                "database": settings.database,
            }),
        )?;
    }
    Ok(())
}

pub fn run_create_project(settings: &Settings, name: &str, mode: OutputMode) -> anyhow::Result<()> {
    config::ensure_db_dir(&settings.database)?;
    let orchestrator = Orchestrator::new(settings.orchestrator_config(None));
    let id = orchestrator.create_project(name)?;

    if mode.is_human() {
        ui::success(&format!("Project {} ready (id {})", name, id));
    } else {
        emit_success(mode, "create-project", serde_json::json!({ "name": name, "id": id }))?;
    }
    Ok(())
}

/// Run `op` with a progress display in human mode
fn with_progress(
    orchestrator: Orchestrator,
    mode: OutputMode,
    op: impl FnOnce(&Orchestrator) -> anyhow::Result<RunReport>,
) -> anyhow::Result<RunReport> {
    if !mode.is_human() {
        return op(&orchestrator);
    }

    let (progress, tx) = ProgressManager::new();
    let orchestrator = orchestrator.with_progress(tx.clone());
    let result = op(&orchestrator);
    drop(orchestrator);
    let _ = tx.send(ProgressMessage::Exit);
    drop(tx);

    match &result {
        Ok(report) => progress.finish_with_summary(report),
        Err(_) => progress.finish(),
    }
    result
}

fn report_run(report: &RunReport, mode: OutputMode) -> anyhow::Result<()> {
    if mode.is_human() {
        for failure in &report.failures {
            ui::task_failed(&failure.task, &failure.error);
        }
        if report.dispatched.is_empty() {
            ui::summary_row("References", "nothing new to import");
        }
        if report.fixup.unresolved > 0 {
            ui::summary_row(
                "Unresolved parents",
                &format!("{} (outside the imported history)", report.fixup.unresolved),
            );
        }
        if let Some(log) = &report.log_file {
            ui::summary_row("Log", &log.display().to_string());
        }
    } else {
        emit_success(mode, &report.operation, serde_json::to_value(report)?)?;
    }

    if report.is_partial() {
        anyhow::bail!(
            "{} of {} references failed to import",
            report.tasks.failed,
            report.tasks.dispatched
        );
    }
    Ok(())
}

pub fn run_import(settings: &Settings, args: ImportArgs, mode: OutputMode) -> anyhow::Result<()> {
    let depth = match args.depth {
        Some(level) => ImportDepth::try_from(level)?,
        None => settings.depth,
    };
    let request = ImportRequest {
        repository: repository_name(args.repository, &args.path),
        project: args.project,
        cutoff: parse_optional_cutoff(args.cutoff.as_deref())?,
        path: args.path,
        depth,
        references: (!args.references.is_empty()).then_some(args.references),
    };

    config::ensure_db_dir(&settings.database)?;
    if mode.is_human() {
        ui::header(&format!("Importing {} into project {}", request.repository, request.project));
        ui::status(Icons::DATABASE, "Database", &settings.database.display().to_string());
        ui::status(Icons::GEAR, "Depth", &request.depth.to_string());
    }

    let orchestrator = Orchestrator::new(settings.orchestrator_config(args.workers));
    let report = with_progress(orchestrator, mode, |o| Ok(o.import(&request)?))?;
    report_run(&report, mode)
}

pub fn run_update(settings: &Settings, args: UpdateArgs, mode: OutputMode) -> anyhow::Result<()> {
    let request = UpdateRequest {
        repository: repository_name(args.repository, &args.path),
        project: args.project,
        cutoff: parse_optional_cutoff(args.cutoff.as_deref())?,
        path: args.path,
        workers: args.workers,
        refresh_existing: args.refresh,
    };

    open_store(settings)?.close()?;
    if mode.is_human() {
        ui::header(&format!("Updating {} in project {}", request.repository, request.project));
    }

    let orchestrator = Orchestrator::new(settings.orchestrator_config(None));
    let report = with_progress(orchestrator, mode, |o| Ok(o.update(&request)?))?;
    report_run(&report, mode)
}

pub fn run_refs(settings: &Settings, project: &str, repository: &str, mode: OutputMode) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let Some(project_id) = store.find_project_id(project)? else {
        anyhow::bail!("project {} does not exist", project);
    };
    let Some(record) = store.find_repository(project_id, repository)? else {
        anyhow::bail!("repository {} does not exist in project {}", repository, project);
    };
    let references = store.list_references(record.id)?;

    if mode.is_human() {
        ui::section(&format!(" {} {} ", Icons::BRANCH, repository));
        if references.is_empty() {
            println!("{}", ui::dim("No references imported yet."));
        } else {
            println!("{}", ui::references_table(&references));
        }
    } else {
        emit_success(mode, "refs", serde_json::to_value(&references)?)?;
    }
    Ok(())
}

pub fn run_stats(settings: &Settings, target: Option<(String, String)>, mode: OutputMode) -> anyhow::Result<()> {
    let spinner = mode.is_human().then(|| Spinner::new("Collecting statistics"));
    let store = open_store(settings)?;

    let (title, rows, json) = match target {
        Some((project, repository)) => {
            let Some(project_id) = store.find_project_id(&project)? else {
                anyhow::bail!("project {} does not exist", project);
            };
            let Some(record) = store.find_repository(project_id, &repository)? else {
                anyhow::bail!("repository {} does not exist in project {}", repository, project);
            };
            let stats = store.repository_stats(record.id)?;
            let rows = vec![
                ("Import depth", record.import_depth.to_string()),
                ("References", stats.references.to_string()),
                ("Commits", stats.commits.to_string()),
                ("Linked parents", stats.linked_parents.to_string()),
                ("Unresolved parents", stats.unresolved_parents.to_string()),
            ];
            (format!("{}/{}", project, repository), rows, serde_json::to_value(&stats)?)
        }
        None => {
            let stats = store.stats()?;
            let rows = vec![
                ("Projects", stats.projects.to_string()),
                ("Repositories", stats.repositories.to_string()),
                ("References", stats.references.to_string()),
                ("Commits", stats.commits.to_string()),
                ("Users", stats.users.to_string()),
                ("File modifications", stats.file_modifications.to_string()),
                ("Unresolved parents", stats.unresolved_parents.to_string()),
            ];
            (settings.database.display().to_string(), rows, serde_json::to_value(&stats)?)
        }
    };

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    if mode.is_human() {
        println!("{} {}", Icons::STATS, title.style(ui::theme().header.clone()));
        println!("{}", ui::stats_table(&rows));
    } else {
        emit_success(mode, "stats", json)?;
    }
    Ok(())
}

pub fn run_clear_logs(settings: &Settings, mode: OutputMode) -> anyhow::Result<()> {
    let removed = logging::clear_log_dir(&settings.log_dir)?;
    if mode.is_human() {
        ui::status(Icons::BROOM, "Removed log files", &removed.to_string());
    } else {
        emit_success(
            mode,
            "clear-logs",
            serde_json::json!({ "log_dir": settings.log_dir, "removed": removed }),
        )?;
    }
    Ok(())
}
