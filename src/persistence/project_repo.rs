//! Project store backed by `projects.json`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::models::project::Project;
use crate::persistence::snapshot;
use crate::{AppError, Result};

/// Partial update applied by [`ProjectStore::update`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ProjectUpdate {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New working directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Flat JSON array of projects.
#[derive(Debug)]
pub struct ProjectStore {
    path: Option<PathBuf>,
    projects: Mutex<Vec<Project>>,
}

impl ProjectStore {
    /// Load the snapshot at `path`; a missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the file cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let projects: Vec<Project> = snapshot::read_json(&path)?;
        info!(path = %path.display(), projects = projects.len(), "projects loaded");
        Ok(Self {
            path: Some(path),
            projects: Mutex::new(projects),
        })
    }

    /// Store with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            projects: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Project>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self, projects: &[Project]) -> Result<()> {
        match &self.path {
            Some(path) => snapshot::write_json(path, projects),
            None => Ok(()),
        }
    }

    /// All projects, newest `updated_at` first.
    #[must_use]
    pub fn list(&self) -> Vec<Project> {
        let mut projects = self.lock().clone();
        projects.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        projects
    }

    /// Project with `id`, if any.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Project> {
        self.lock().iter().find(|project| project.id == id).cloned()
    }

    /// Working directory of project `id`, if it exists.
    #[must_use]
    pub fn path_of(&self, id: u64) -> Option<PathBuf> {
        self.get(id).map(|project| project.path)
    }

    /// Create a project.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidRequest` if `name` is blank or `path` does not exist.
    /// - `AppError::Storage` if the snapshot cannot be written.
    pub fn create(&self, name: &str, path: &Path) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidRequest("project name is required".into()));
        }
        if path.as_os_str().is_empty() {
            return Err(AppError::InvalidRequest("project path is required".into()));
        }
        if !path.exists() {
            return Err(AppError::InvalidRequest(format!(
                "project path does not exist: {}",
                path.display()
            )));
        }

        let mut projects = self.lock();
        let next = projects.iter().map(|p| p.id).max().map_or(0, |id| id + 1);
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let project = Project::new(now_ms.max(next), name.to_owned(), path.to_path_buf());
        projects.push(project.clone());
        self.flush(&projects)?;
        info!(project_id = project.id, name = %project.name, "project created");
        Ok(project)
    }

    /// Apply `update` to project `id`. Blank fields are left unchanged.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no such project exists.
    /// - `AppError::Storage` if the snapshot cannot be written.
    pub fn update(&self, id: u64, update: ProjectUpdate) -> Result<Project> {
        let mut projects = self.lock();
        let project = projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or_else(|| AppError::NotFound(format!("project {id}")))?;

        if let Some(name) = update.name.filter(|name| !name.trim().is_empty()) {
            project.name = name.trim().to_owned();
        }
        if let Some(path) = update.path.filter(|path| !path.as_os_str().is_empty()) {
            project.path = path;
        }
        project.updated_at = Utc::now();

        let updated = project.clone();
        self.flush(&projects)?;
        info!(project_id = id, "project updated");
        Ok(updated)
    }

    /// Delete project `id`.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no such project exists.
    /// - `AppError::Storage` if the snapshot cannot be written.
    pub fn delete(&self, id: u64) -> Result<()> {
        let mut projects = self.lock();
        let before = projects.len();
        projects.retain(|project| project.id != id);
        if projects.len() == before {
            return Err(AppError::NotFound(format!("project {id}")));
        }
        self.flush(&projects)?;
        info!(project_id = id, "project deleted");
        Ok(())
    }
}
