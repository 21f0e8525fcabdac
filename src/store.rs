//! Persistent project storage.
//!
//! Keyed by project path, last writer wins. The JSON file holds a plain
//! array of projects.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::project::{Project, ProjectUpdate};

/// Contract the core expects from project persistence.
pub trait ProjectStore {
    fn list(&self) -> Vec<Project>;

    fn get(&self, path: &Path) -> Option<Project> {
        self.list().into_iter().find(|project| project.path == path)
    }

    /// Adds a project unless one with the same path exists.
    fn add(&mut self, project: Project) -> Result<Vec<Project>>;

    /// Removes a project, optionally deleting its directory from disk.
    fn remove(&mut self, path: &Path, delete_files: bool) -> Result<Vec<Project>>;

    /// Applies a partial update. Returns the updated project when it exists.
    fn update(&mut self, path: &Path, update: &ProjectUpdate) -> Result<Option<Project>>;
}

/// File-backed store.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    projects: Vec<Project>,
}

impl JsonStore {
    /// Opens the store, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let projects = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read project store {}", path.display()))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw).with_context(|| {
                    format!("failed to parse project store {}", path.display())
                })?
            }
        } else {
            Vec::new()
        };
        debug!(store = %path.display(), count = projects.len(), "project store opened");
        Ok(Self { path, projects })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(&self.projects)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ProjectStore for JsonStore {
    fn list(&self) -> Vec<Project> {
        self.projects.clone()
    }

    fn add(&mut self, project: Project) -> Result<Vec<Project>> {
        if !self.projects.iter().any(|p| p.path == project.path) {
            info!(project = %project.path.display(), kind = %project.kind, "project added");
            self.projects.push(project);
            self.persist()?;
        }
        Ok(self.list())
    }

    fn remove(&mut self, path: &Path, delete_files: bool) -> Result<Vec<Project>> {
        self.projects.retain(|p| p.path != path);
        self.persist()?;
        if delete_files {
            info!(project = %path.display(), "deleting project files");
            match fs::remove_dir_all(path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to delete project files at {}", path.display())
                    });
                }
            }
        }
        Ok(self.list())
    }

    fn update(&mut self, path: &Path, update: &ProjectUpdate) -> Result<Option<Project>> {
        let Some(project) = self.projects.iter_mut().find(|p| p.path == path) else {
            return Ok(None);
        };
        let changed = project.apply(update);
        let snapshot = project.clone();
        if changed {
            self.persist()?;
        }
        Ok(Some(snapshot))
    }
}

/// In-memory store, used when no persistence is wanted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Vec<Project>,
}

impl MemoryStore {
    pub fn new(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

impl ProjectStore for MemoryStore {
    fn list(&self) -> Vec<Project> {
        self.projects.clone()
    }

    fn add(&mut self, project: Project) -> Result<Vec<Project>> {
        if !self.projects.iter().any(|p| p.path == project.path) {
            self.projects.push(project);
        }
        Ok(self.list())
    }

    fn remove(&mut self, path: &Path, _delete_files: bool) -> Result<Vec<Project>> {
        self.projects.retain(|p| p.path != path);
        Ok(self.list())
    }

    fn update(&mut self, path: &Path, update: &ProjectUpdate) -> Result<Option<Project>> {
        Ok(self
            .projects
            .iter_mut()
            .find(|p| p.path == path)
            .map(|project| {
                project.apply(update);
                project.clone()
            }))
    }
}
