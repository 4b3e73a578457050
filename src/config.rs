use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::model::ImportDepth;
use crate::pool::DEFAULT_WORKERS;
use crate::storage::DEFAULT_BUSY_TIMEOUT_MS;

/// Contents of `githist.toml`. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GithistConfig {
    pub database: Option<String>,
    pub workers: Option<usize>,
    pub log_dir: Option<String>,
    pub log_level: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub depth: Option<ImportDepth>,
}

impl GithistConfig {
    /// Values written by `githist init`
    pub fn with_defaults(base: &Path) -> Self {
        Self {
            database: Some(default_database_path_in(base).to_string_lossy().into_owned()),
            workers: Some(DEFAULT_WORKERS),
            log_dir: Some(default_log_dir().to_string_lossy().into_owned()),
            log_level: Some("info".to_string()),
            busy_timeout_ms: Some(DEFAULT_BUSY_TIMEOUT_MS),
            depth: Some(ImportDepth::default()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or(DEFAULT_WORKERS).max(1)
    }

    pub fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)
    }

    pub fn depth(&self) -> ImportDepth {
        self.depth.unwrap_or_default()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.as_ref().map(PathBuf::from).unwrap_or_else(default_log_dir)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("githist.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".githist").join("githist.db")
}

pub fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<GithistConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: GithistConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &GithistConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entries = [".githist/", "logs/"];

    let mut content = if gitignore_path.exists() {
        std::fs::read_to_string(&gitignore_path)?
    } else {
        String::new()
    };
    let missing: Vec<_> = entries
        .iter()
        .filter(|entry| !content.lines().any(|line| line.trim() == **entry))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for entry in missing {
        content.push_str(entry);
        content.push('\n');
    }
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}
