//! Project data model.
//!
//! A project is identified by its filesystem path. Status and port are
//! mutated by the supervisor and the ghost reconciler; everything else is
//! set on import.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Closed set of project kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Node,
    Python,
    Rust,
    Go,
    Docker,
    Other,
    #[default]
    Unknown,
}

impl ProjectKind {
    pub fn label(&self) -> &'static str {
        match self {
            ProjectKind::Node => "node",
            ProjectKind::Python => "python",
            ProjectKind::Rust => "rust",
            ProjectKind::Go => "go",
            ProjectKind::Docker => "docker",
            ProjectKind::Other => "other",
            ProjectKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle status of a project's dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Running,
    #[default]
    Stopped,
}

impl ProjectStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ProjectStatus::Running => "running",
            ProjectStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A tracked local repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub path: PathBuf,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ProjectKind,
    /// Clone origin URL, or `"local"` for imported directories.
    #[serde(default = "local_origin")]
    pub url: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub port: Option<u16>,
    /// Advisory only, refreshed from `.git/HEAD`.
    #[serde(default)]
    pub branch: Option<String>,
}

fn local_origin() -> String {
    "local".to_string()
}

impl Project {
    /// Builds a stopped project for a directory, detecting its kind.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            kind: detect_kind(&path),
            branch: current_branch(&path),
            name,
            path,
            url: local_origin(),
            status: ProjectStatus::Stopped,
            port: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProjectStatus::Running
    }

    /// Applies a partial update, returning true if anything changed.
    pub fn apply(&mut self, update: &ProjectUpdate) -> bool {
        let before = self.clone();
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(kind) = update.kind {
            self.kind = kind;
        }
        if let Some(branch) = &update.branch {
            self.branch = branch.clone();
        }
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        *self != before
    }
}

/// Partial field update for the project store.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub kind: Option<ProjectKind>,
    pub status: Option<ProjectStatus>,
    pub port: Option<Option<u16>>,
    pub branch: Option<Option<String>>,
}

impl ProjectUpdate {
    pub fn status(status: ProjectStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn port(port: Option<u16>) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    /// Stopped status with the port cleared.
    pub fn stopped() -> Self {
        Self {
            status: Some(ProjectStatus::Stopped),
            port: Some(None),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Detects the project kind from marker files in its root.
pub fn detect_kind(path: &Path) -> ProjectKind {
    let Ok(entries) = fs::read_dir(path) else {
        return ProjectKind::Unknown;
    };
    let names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    let has = |file: &str| names.iter().any(|name| name == file);
    if has("package.json") {
        ProjectKind::Node
    } else if has("requirements.txt") {
        ProjectKind::Python
    } else if has("Cargo.toml") {
        ProjectKind::Rust
    } else if has("go.mod") {
        ProjectKind::Go
    } else if has("docker-compose.yml") {
        ProjectKind::Docker
    } else {
        ProjectKind::Other
    }
}

/// Reads the `scripts` table from a node project's `package.json`.
pub fn node_scripts(path: &Path) -> BTreeMap<String, String> {
    let Ok(raw) = fs::read_to_string(path.join("package.json")) else {
        return BTreeMap::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
        return BTreeMap::new();
    };
    value
        .get("scripts")
        .and_then(|scripts| scripts.as_object())
        .map(|scripts| {
            scripts
                .iter()
                .filter_map(|(name, cmd)| Some((name.clone(), cmd.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Script started from the UI: `dev` when the project defines one.
pub fn preferred_script(project: &Project) -> Option<String> {
    if project.kind != ProjectKind::Node {
        return None;
    }
    node_scripts(&project.path)
        .contains_key("dev")
        .then(|| "dev".to_string())
}

/// Current branch name from `.git/HEAD`, without invoking git.
pub fn current_branch(path: &Path) -> Option<String> {
    let head = fs::read_to_string(path.join(".git").join("HEAD")).ok()?;
    let head = head.trim();
    if let Some(reference) = head.strip_prefix("ref:") {
        let reference = reference.trim();
        return Some(
            reference
                .strip_prefix("refs/heads/")
                .unwrap_or(reference)
                .to_string(),
        );
    }
    if head.is_empty() {
        None
    } else {
        Some(head.chars().take(7).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detect_kind_prefers_node_over_rust() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_kind(dir.path()), ProjectKind::Node);
    }

    #[test]
    fn detect_kind_falls_back_to_other_and_unknown() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_kind(dir.path()), ProjectKind::Other);
        fs::write(dir.path().join("go.mod"), "module x").unwrap();
        assert_eq!(detect_kind(dir.path()), ProjectKind::Go);
        assert_eq!(
            detect_kind(&dir.path().join("missing")),
            ProjectKind::Unknown
        );
    }

    #[test]
    fn node_scripts_reads_package_json() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"dev": "vite", "build": "vite build"}}"#,
        )
        .unwrap();
        let scripts = node_scripts(dir.path());
        assert_eq!(scripts.get("dev").map(String::as_str), Some("vite"));
        assert_eq!(scripts.len(), 2);
        let project = Project::from_path(dir.path());
        assert_eq!(preferred_script(&project).as_deref(), Some("dev"));
    }

    #[test]
    fn preferred_script_falls_back_to_start() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"scripts": {"start": "node ."}}"#).unwrap();
        assert_eq!(preferred_script(&Project::from_path(dir.path())), None);
    }

    #[test]
    fn current_branch_handles_ref_and_detached() {
        let dir = TempDir::new().unwrap();
        assert_eq!(current_branch(dir.path()), None);
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        assert_eq!(current_branch(dir.path()).as_deref(), Some("main"));
        fs::write(dir.path().join(".git/HEAD"), "0123456789abcdef\n").unwrap();
        assert_eq!(current_branch(dir.path()).as_deref(), Some("0123456"));
    }

    #[test]
    fn apply_reports_changes_only() {
        let mut project = Project::from_path("/tmp/devrack-apply");
        assert!(!project.apply(&ProjectUpdate::stopped()));
        assert!(project.apply(&ProjectUpdate {
            status: Some(ProjectStatus::Running),
            port: Some(Some(4000)),
            ..ProjectUpdate::default()
        }));
        assert_eq!(project.port, Some(4000));
        assert!(project.apply(&ProjectUpdate::stopped()));
        assert_eq!(project.port, None);
    }

    #[test]
    fn project_round_trips_with_type_field() {
        let json = r#"{"path":"/p","name":"p","type":"node","status":"running","port":3000}"#;
        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.kind, ProjectKind::Node);
        assert_eq!(project.url, "local");
        assert_eq!(project.port, Some(3000));
    }
}
