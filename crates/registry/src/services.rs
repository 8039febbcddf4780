//! Host services the registry consults while registering and resolving walkthroughs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use glob::{MatchOptions, Pattern};
use guidepost_util::{ContextKeyService, InMemoryContextService, InMemoryStorage, StorageService};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Source of experiment-driven overrides for a walkthrough's `when` expression.
#[async_trait]
pub trait ExperimentService: Send + Sync {
    /// Returns the overriding expression, or `None` to keep the declared one.
    async fn when_override(&self, walkthrough_id: &str) -> Option<String>;
}

/// Experiment service that never overrides anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExperiments;

#[async_trait]
impl ExperimentService for NoExperiments {
    async fn when_override(&self, _walkthrough_id: &str) -> Option<String> {
        None
    }
}

/// Experiment service answering from a fixed table.
#[derive(Debug, Default, Clone)]
pub struct StaticExperiments {
    overrides: HashMap<String, String>,
}

impl StaticExperiments {
    pub fn new(overrides: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            overrides: overrides.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ExperimentService for StaticExperiments {
    async fn when_override(&self, walkthrough_id: &str) -> Option<String> {
        self.overrides.get(walkthrough_id).cloned()
    }
}

/// Answers whether the open workspace contains files matching any glob.
#[async_trait]
pub trait WorkspaceFileSearch: Send + Sync {
    async fn any_match(&self, globs: &[String]) -> Result<bool>;
}

/// Search used when no workspace is open. Never matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWorkspace;

#[async_trait]
impl WorkspaceFileSearch for NoWorkspace {
    async fn any_match(&self, _globs: &[String]) -> Result<bool> {
        Ok(false)
    }
}

/// Walks workspace folders on the blocking pool, matching `glob` patterns against paths
/// relative to each folder.
///
/// Dropping the `any_match` future (for instance when a timeout elapses) stops the walk at
/// the next directory entry.
#[derive(Debug, Clone)]
pub struct GlobWorkspaceSearch {
    folders: Vec<PathBuf>,
}

impl GlobWorkspaceSearch {
    pub fn new(folders: Vec<PathBuf>) -> Self {
        Self { folders }
    }
}

/// Raises the flag when dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn compile_globs(globs: &[String]) -> Result<Vec<Pattern>> {
    globs
        .iter()
        .map(|raw| Pattern::new(raw.trim_start_matches("./")).with_context(|| format!("invalid featuredFor glob '{raw}'")))
        .collect()
}

fn walk_for_match(folders: &[PathBuf], patterns: &[Pattern], cancelled: &AtomicBool) -> bool {
    let options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::new()
    };
    for folder in folders {
        for entry in WalkDir::new(folder).into_iter().filter_map(|entry| entry.ok()) {
            if cancelled.load(Ordering::Relaxed) {
                debug!(folder = %folder.display(), "Workspace search cancelled");
                return false;
            }
            let Ok(relative) = entry.path().strip_prefix(folder) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            if let Some(pattern) = patterns.iter().find(|pattern| pattern.matches_path_with(relative, options)) {
                debug!(folder = %folder.display(), pattern = %pattern, path = %relative.display(), "Workspace matches featured glob");
                return true;
            }
        }
        trace!(folder = %folder.display(), "No workspace match");
    }
    false
}

#[async_trait]
impl WorkspaceFileSearch for GlobWorkspaceSearch {
    async fn any_match(&self, globs: &[String]) -> Result<bool> {
        if self.folders.is_empty() || globs.is_empty() {
            return Ok(false);
        }
        let patterns = compile_globs(globs)?;
        let folders = self.folders.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(cancelled.clone());
        tokio::task::spawn_blocking(move || walk_for_match(&folders, &patterns, &cancelled))
            .await
            .context("workspace search task failed")
    }
}

/// Wall clock abstraction so recency can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

/// Everything the registry borrows from its host.
#[derive(Clone)]
pub struct RegistryServices {
    pub storage: Arc<dyn StorageService>,
    pub context: Arc<dyn ContextKeyService>,
    pub experiments: Arc<dyn ExperimentService>,
    pub workspace: Arc<dyn WorkspaceFileSearch>,
    pub clock: Arc<dyn Clock>,
}

impl RegistryServices {
    /// Ephemeral services: in-memory storage and context, no experiments, no workspace.
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::new()),
            context: Arc::new(InMemoryContextService::new()),
            experiments: Arc::new(NoExperiments),
            workspace: Arc::new(NoWorkspace),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageService>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextKeyService>) -> Self {
        self.context = context;
        self
    }

    pub fn with_experiments(mut self, experiments: Arc<dyn ExperimentService>) -> Self {
        self.experiments = experiments;
        self
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn WorkspaceFileSearch>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn glob_search_finds_nested_files() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src").join("main.rs"), "fn main() {}").unwrap();

        let search = GlobWorkspaceSearch::new(vec![dir.path().to_path_buf()]);
        assert!(search.any_match(&["**/*.rs".to_string()]).await.unwrap());
        assert!(!search.any_match(&["**/*.py".to_string()]).await.unwrap());
    }

    #[tokio::test]
    async fn folder_names_are_not_treated_as_patterns() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("[draft] site");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("package.json"), "{}").unwrap();

        let search = GlobWorkspaceSearch::new(vec![folder]);
        assert!(search.any_match(&["package.json".to_string()]).await.unwrap());
    }

    #[test]
    fn raised_flag_stops_the_walk() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        let patterns = compile_globs(&["*.rs".to_string()]).unwrap();

        assert!(walk_for_match(&[dir.path().to_path_buf()], &patterns, &AtomicBool::new(false)));
        assert!(!walk_for_match(&[dir.path().to_path_buf()], &patterns, &AtomicBool::new(true)));
    }

    #[test]
    fn dropping_the_guard_raises_the_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        drop(CancelOnDrop(flag.clone()));
        assert!(flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn invalid_glob_is_an_error() {
        let dir = tempdir().unwrap();
        let search = GlobWorkspaceSearch::new(vec![dir.path().to_path_buf()]);
        assert!(search.any_match(&["[".to_string()]).await.is_err());
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::days(2));
        assert_eq!(clock.now() - start, Duration::days(2));
    }
}
