//! Run orchestration
//!
//! An import or update walks a fixed sequence of states:
//!
//! ```text
//! Init -> CatalogResolved -> WorkDispatched -> AwaitingCompletion -> Fixup -> Done
//! ```
//!
//! Any error in the orchestrator's own control flow moves the run to
//! `Failed`. Errors inside a single extraction task do not: they are counted
//! in the report and the run continues.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::NaiveDate;
use crossbeam::channel::Sender;
use serde::Serialize;
use crate::extract::{ExtractionSummary, ExtractionTask, GitExtractor, TaskRunner};
use crate::fixup::{FixupStats, ParentFixup};
use crate::git::{GitReferences, ReferenceEnumerator};
use crate::logging::{log_file_name, RunLog};
use crate::model::ImportDepth;
use crate::pool::{PoolStats, TaskFailure, WorkerPool, DEFAULT_WORKERS};
use crate::storage::{DbConfig, SqliteStore};
use crate::ui::{ProgressMessage, ProgressPhase};

/// Knobs shared by every run of an orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub db: DbConfig,
    pub workers: usize,
    /// Directory for per-run log files; no file is written when unset
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
}

impl OrchestratorConfig {
    pub fn new(db: DbConfig) -> Self {
        Self {
            db,
            workers: DEFAULT_WORKERS,
            log_dir: None,
            log_level: "info".to_string(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }
}

/// First import of a repository, or re-import of chosen references
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub project: String,
    pub repository: String,
    pub path: PathBuf,
    pub cutoff: Option<NaiveDate>,
    pub depth: ImportDepth,
    /// Import exactly these references, even if already imported
    pub references: Option<Vec<String>>,
}

/// Incremental synchronization of an imported repository
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub project: String,
    pub repository: String,
    pub path: PathBuf,
    pub cutoff: Option<NaiveDate>,
    /// Overrides the configured pool size
    pub workers: Option<usize>,
    /// Also walk already-imported references from their recorded tip
    pub refresh_existing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Init,
    CatalogResolved,
    WorkDispatched,
    AwaitingCompletion,
    Fixup,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::CatalogResolved => "catalog-resolved",
            RunState::WorkDispatched => "work-dispatched",
            RunState::AwaitingCompletion => "awaiting-completion",
            RunState::Fixup => "fixup",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Repository {repository} not found in project {project}")]
    RepositoryNotFound { project: String, repository: String },

    #[error("Run failed in state {state}: {source}")]
    Fatal {
        state: RunState,
        #[source]
        source: crate::Error,
    },
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub operation: String,
    pub project: String,
    pub repository: String,
    pub repository_id: i64,
    pub references_enumerated: usize,
    /// References a task was submitted for, in submission order
    pub dispatched: Vec<String>,
    pub tasks: PoolStats,
    pub extracted: Vec<ExtractionSummary>,
    pub failures: Vec<TaskFailure>,
    pub fixup: FixupStats,
    pub states: Vec<RunState>,
    pub elapsed: Duration,
    pub log_file: Option<PathBuf>,
}

impl RunReport {
    /// Some tasks failed; the completed subset is stored
    pub fn is_partial(&self) -> bool {
        self.tasks.failed > 0
    }

    pub fn commits_inserted(&self) -> usize {
        self.extracted.iter().map(|s| s.inserted).sum()
    }
}

/// References to submit for one run.
///
/// With a non-empty allow-list, every listed reference present in the
/// repository is returned in list order. Without one (or with an empty
/// one), enumerated references that were not imported before are returned
/// in enumeration order.
pub fn candidate_references(
    enumerated: &[String],
    existing: &HashSet<String>,
    allow_list: Option<&[String]>,
) -> Vec<String> {
    match allow_list.filter(|list| !list.is_empty()) {
        Some(list) => {
            let present: HashSet<&str> = enumerated.iter().map(String::as_str).collect();
            let mut seen = HashSet::new();
            let mut candidates = Vec::new();
            for name in list {
                if !present.contains(name.as_str()) {
                    tracing::warn!("Reference {} is not in the repository, skipping", name);
                    continue;
                }
                if seen.insert(name.as_str()) {
                    candidates.push(name.clone());
                }
            }
            candidates
        }
        None => enumerated
            .iter()
            .filter(|name| !existing.contains(name.as_str()))
            .cloned()
            .collect(),
    }
}

enum Mode<'a> {
    Import {
        depth: ImportDepth,
        references: Option<&'a [String]>,
    },
    Update {
        refresh_existing: bool,
    },
}

struct RunPlan<'a> {
    operation: &'static str,
    project: &'a str,
    repository: &'a str,
    path: &'a Path,
    cutoff: Option<NaiveDate>,
    workers: usize,
    mode: Mode<'a>,
}

struct StateTrail {
    current: RunState,
    visited: Vec<RunState>,
}

impl StateTrail {
    fn new() -> Self {
        Self { current: RunState::Init, visited: vec![RunState::Init] }
    }

    fn advance(&mut self, next: RunState) {
        tracing::debug!("Run state {} -> {}", self.current, next);
        self.current = next;
        self.visited.push(next);
    }

    fn fatal(&mut self, source: impl Into<crate::Error>) -> RunError {
        let source = source.into();
        let state = self.current;
        tracing::error!("Run failed in state {}: {}", state, source);
        self.advance(RunState::Failed);
        RunError::Fatal { state, source }
    }

    fn abort(&mut self, error: RunError) -> RunError {
        tracing::error!("Run aborted: {}", error);
        self.advance(RunState::Failed);
        error
    }
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    enumerator: Arc<dyn ReferenceEnumerator>,
    runner: Arc<dyn TaskRunner>,
    progress: Option<Sender<ProgressMessage>>,
}

impl Orchestrator {
    /// Orchestrator backed by libgit2 for enumeration and extraction
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_collaborators(config, Arc::new(GitReferences), Arc::new(GitExtractor::new()))
    }

    pub fn with_collaborators(
        config: OrchestratorConfig,
        enumerator: Arc<dyn ReferenceEnumerator>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self { config, enumerator, runner, progress: None }
    }

    pub fn with_progress(mut self, tx: Sender<ProgressMessage>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Register a project; returns its id, creating it if needed
    pub fn create_project(&self, name: &str) -> crate::Result<i64> {
        let store = SqliteStore::open(&self.config.db)?;
        let id = store.create_project(name)?;
        store.close()?;
        tracing::info!("Project {} has id {}", name, id);
        Ok(id)
    }

    /// Import a repository's references into `request.project`
    pub fn import(&self, request: &ImportRequest) -> Result<RunReport, RunError> {
        self.execute(RunPlan {
            operation: "import",
            project: &request.project,
            repository: &request.repository,
            path: &request.path,
            cutoff: request.cutoff,
            workers: self.config.workers,
            mode: Mode::Import {
                depth: request.depth,
                references: request.references.as_deref(),
            },
        })
    }

    /// Import references added since the repository was last imported
    pub fn update(&self, request: &UpdateRequest) -> Result<RunReport, RunError> {
        self.execute(RunPlan {
            operation: "update",
            project: &request.project,
            repository: &request.repository,
            path: &request.path,
            cutoff: request.cutoff,
            workers: request.workers.unwrap_or(self.config.workers),
            mode: Mode::Update { refresh_existing: request.refresh_existing },
        })
    }

    fn execute(&self, plan: RunPlan<'_>) -> Result<RunReport, RunError> {
        let run_log = match &self.config.log_dir {
            Some(dir) => {
                let name = log_file_name(plan.operation, plan.project, plan.repository);
                let log = RunLog::create(dir, &name, &self.config.log_level).map_err(|source| {
                    tracing::error!(
                        "Run failed in state {}: cannot open log {}: {}",
                        RunState::Init,
                        name,
                        source
                    );
                    RunError::Fatal { state: RunState::Init, source }
                })?;
                Some(log)
            }
            None => None,
        };

        let result = match &run_log {
            Some(log) => log.in_scope(|| self.drive(&plan)),
            None => self.drive(&plan),
        };

        let log_file = run_log.map(RunLog::close);
        result.map(|mut report| {
            report.log_file = log_file;
            report
        })
    }

    fn drive(&self, plan: &RunPlan<'_>) -> Result<RunReport, RunError> {
        let span = tracing::info_span!(
            "run",
            op = plan.operation,
            project = plan.project,
            repository = plan.repository
        );
        let _entered = span.enter();
        let started = Instant::now();
        let mut trail = StateTrail::new();
        tracing::info!(
            "Starting {} of {} from {}",
            plan.operation,
            plan.repository,
            plan.path.display()
        );

        // Init
        let store = SqliteStore::open(&self.config.db).map_err(|e| trail.fatal(e))?;
        let enumerated = self.enumerator.enumerate(plan.path).map_err(|e| trail.fatal(e))?;
        tracing::debug!("{} references in {}", enumerated.len(), plan.path.display());

        // CatalogResolved
        let Some(project_id) = store.find_project_id(plan.project).map_err(|e| trail.fatal(e))? else {
            return Err(trail.abort(RunError::ProjectNotFound(plan.project.to_string())));
        };
        let (repository_id, depth) = match &plan.mode {
            Mode::Import { depth, .. } => {
                let id = store
                    .find_or_create_repository(project_id, plan.repository, *depth)
                    .map_err(|e| trail.fatal(e))?;
                (id, *depth)
            }
            Mode::Update { .. } => {
                match store.find_repository(project_id, plan.repository).map_err(|e| trail.fatal(e))? {
                    Some(record) => (record.id, record.import_depth),
                    None => {
                        return Err(trail.abort(RunError::RepositoryNotFound {
                            project: plan.project.to_string(),
                            repository: plan.repository.to_string(),
                        }));
                    }
                }
            }
        };
        trail.advance(RunState::CatalogResolved);

        // WorkDispatched
        let allow_list = match &plan.mode {
            Mode::Import { references, .. } => (*references).filter(|list| !list.is_empty()),
            Mode::Update { .. } => None,
        };
        let existing = if allow_list.is_some() {
            HashSet::new()
        } else {
            store.existing_references(repository_id).map_err(|e| trail.fatal(e))?
        };

        let make_task = |reference: String, since: Option<String>| ExtractionTask {
            repository_id,
            repo_path: plan.path.to_path_buf(),
            cutoff: plan.cutoff,
            depth,
            reference,
            db: self.config.db.clone(),
            since,
        };
        let mut tasks: Vec<ExtractionTask> = candidate_references(&enumerated, &existing, allow_list)
            .into_iter()
            .map(|reference| make_task(reference, None))
            .collect();

        if let Mode::Update { refresh_existing: true } = plan.mode {
            let tips = store.reference_tips(repository_id).map_err(|e| trail.fatal(e))?;
            for name in enumerated.iter().filter(|name| existing.contains(name.as_str())) {
                let since = tips.get(name).cloned().flatten();
                tasks.push(make_task(name.clone(), since));
            }
        }

        let dispatched: Vec<String> = tasks.iter().map(|t| t.reference.clone()).collect();
        if tasks.is_empty() {
            tracing::info!("No references to import");
        } else {
            tracing::info!(
                "Dispatching {} references to {} workers",
                tasks.len(),
                plan.workers.max(1)
            );
        }
        self.send(ProgressMessage::Started {
            phase: ProgressPhase::Extraction,
            total: tasks.len(),
        });

        let mut pool = WorkerPool::new(plan.workers);
        if let Some(tx) = &self.progress {
            pool = pool.with_progress(tx.clone());
        }
        let runner = Arc::clone(&self.runner);
        let mut running = pool
            .start(move |task: &ExtractionTask| runner.run(task))
            .map_err(|e| trail.fatal(e))?;
        for task in tasks {
            running.submit(task);
        }
        running.shutdown();
        trail.advance(RunState::WorkDispatched);

        // AwaitingCompletion
        trail.advance(RunState::AwaitingCompletion);
        let outcome = running.join();
        self.send(ProgressMessage::Finished { phase: ProgressPhase::Extraction });
        if outcome.stats.failed > 0 {
            tracing::warn!(
                "{} of {} references failed",
                outcome.stats.failed,
                outcome.stats.dispatched
            );
        }

        // Fixup
        trail.advance(RunState::Fixup);
        self.send(ProgressMessage::Started { phase: ProgressPhase::Fixup, total: 1 });
        let fixup = ParentFixup::new(&store).run(repository_id).map_err(|e| trail.fatal(e))?;
        self.send(ProgressMessage::Finished { phase: ProgressPhase::Fixup });

        // Done
        store.close().map_err(|e| trail.fatal(e))?;
        trail.advance(RunState::Done);
        let elapsed = started.elapsed();
        tracing::info!("Finished {} of {} in {:.2?}", plan.operation, plan.repository, elapsed);

        Ok(RunReport {
            operation: plan.operation.to_string(),
            project: plan.project.to_string(),
            repository: plan.repository.to_string(),
            repository_id,
            references_enumerated: enumerated.len(),
            dispatched,
            tasks: outcome.stats,
            extracted: outcome.results,
            failures: outcome.failures,
            fixup,
            states: trail.visited,
            elapsed,
            log_file: None,
        })
    }

    fn send(&self, message: ProgressMessage) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidates_skip_existing() {
        let enumerated = names(&["feature-x", "main", "v1.0"]);
        let existing = HashSet::from(["main".to_string()]);
        assert_eq!(
            candidate_references(&enumerated, &existing, None),
            names(&["feature-x", "v1.0"])
        );
    }

    #[test]
    fn test_allow_list_overrides_existing() {
        let enumerated = names(&["feature-x", "main"]);
        let existing = HashSet::from(["main".to_string()]);
        let allow = names(&["main", "ghost", "main"]);
        assert_eq!(
            candidate_references(&enumerated, &existing, Some(allow.as_slice())),
            names(&["main"])
        );
    }

    #[test]
    fn test_empty_allow_list_means_incremental() {
        let enumerated = names(&["feature-x", "main"]);
        let existing = HashSet::from(["main".to_string()]);
        let allow: Vec<String> = Vec::new();
        assert_eq!(
            candidate_references(&enumerated, &existing, Some(allow.as_slice())),
            names(&["feature-x"])
        );
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::AwaitingCompletion.to_string(), "awaiting-completion");
        let err = RunError::Fatal {
            state: RunState::Fixup,
            source: crate::Error::Config("bad".to_string()),
        };
        assert_eq!(err.to_string(), "Run failed in state fixup: Config error: bad");
    }
}
