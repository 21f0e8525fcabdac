//! AI backend seam.
//!
//! The backend is an opaque text generator: a question plus a context
//! bundle goes in, a stream of `AiEvent`s comes back on the event channel.
//! `CliBackend` drives an external CLI (the `gemini` command by default).

use std::env;
use std::ffi::OsStr;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ManagerError;
use crate::events::{Event, EventSink};
use crate::output::ChunkDecoder;
use crate::project::{Project, ProjectKind};

const README_LIMIT: usize = 2000;
const DEPENDENCY_LIMIT: usize = 10;

/// One step of a streamed AI response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiEvent {
    Chunk(String),
    Error(String),
    Complete,
}

/// Project facts sent along with a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub kind: ProjectKind,
    pub name: String,
    pub path: PathBuf,
    pub recent_logs: Option<String>,
}

impl QueryContext {
    pub fn for_project(project: &Project, recent_logs: Option<String>) -> Self {
        Self {
            kind: project.kind,
            name: project.name.clone(),
            path: project.path.clone(),
            recent_logs: recent_logs.filter(|logs| !logs.trim().is_empty()),
        }
    }

    /// Builds the full prompt: project facts, README excerpt, package
    /// summary for node projects, recent logs, then the question.
    pub fn render(&self, question: &str) -> String {
        let mut prompt = String::new();
        let _ = write!(
            prompt,
            "Project: {}\nType: {}\nLocation: {}\n\n",
            self.name,
            self.kind,
            self.path.display()
        );

        if let Some(readme) = read_readme(&self.path) {
            let _ = write!(prompt, "README:\n{}\n\n", readme);
        }

        if self.kind == ProjectKind::Node {
            if let Some(summary) = package_summary(&self.path) {
                prompt.push_str(&summary);
                prompt.push('\n');
            }
        }

        if let Some(logs) = &self.recent_logs {
            let _ = write!(prompt, "Recent Logs:\n{}\n\n", logs);
        }

        let _ = write!(prompt, "User Question: {}", question);
        prompt
    }
}

fn read_readme(project: &Path) -> Option<String> {
    ["README.md", "README.txt", "readme.md"]
        .iter()
        .map(|name| project.join(name))
        .find(|path| path.is_file())
        .and_then(|path| fs::read_to_string(path).ok())
        .map(|content| content.chars().take(README_LIMIT).collect())
}

fn package_summary(project: &Path) -> Option<String> {
    let raw = fs::read_to_string(project.join("package.json")).ok()?;
    let pkg: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let field = |key: &str| pkg.get(key).and_then(|value| value.as_str());

    let mut summary = String::from("Package Info:\n");
    let _ = writeln!(summary, "- Name: {}", field("name").unwrap_or("undefined"));
    let _ = writeln!(summary, "- Version: {}", field("version").unwrap_or("undefined"));
    let _ = writeln!(summary, "- Description: {}", field("description").unwrap_or("N/A"));
    if let Some(scripts) = pkg.get("scripts").and_then(|v| v.as_object()) {
        let names: Vec<&str> = scripts.keys().map(String::as_str).collect();
        let _ = writeln!(summary, "- Scripts: {}", names.join(", "));
    }
    if let Some(deps) = pkg.get("dependencies").and_then(|v| v.as_object()) {
        let names: Vec<&str> = deps
            .keys()
            .take(DEPENDENCY_LIMIT)
            .map(String::as_str)
            .collect();
        let more = if deps.len() > DEPENDENCY_LIMIT { "..." } else { "" };
        let _ = writeln!(summary, "- Dependencies: {}{}", names.join(", "), more);
    }
    Some(summary)
}

/// A question bound to the project it is asked about.
#[derive(Debug, Clone)]
pub struct AiRequest {
    pub question: String,
    pub context: QueryContext,
}

pub trait AiBackend: Send + Sync {
    fn is_available(&self) -> bool;

    /// Human-readable backend name for messages.
    fn name(&self) -> &str;

    /// Starts a query. Every response event is delivered as
    /// `Event::Ai { query, .. }`, ending with `Complete` or `Error`.
    fn query(&self, request: AiRequest, query: u64, events: EventSink);
}

/// Runs a CLI in the project directory with the prompt as its last argument.
#[derive(Debug, Clone)]
pub struct CliBackend {
    command: String,
    args: Vec<String>,
}

impl CliBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

impl AiBackend for CliBackend {
    fn is_available(&self) -> bool {
        let path_var = env::var_os("PATH").unwrap_or_default();
        find_executable(&self.command, &path_var).is_some()
    }

    fn name(&self) -> &str {
        &self.command
    }

    fn query(&self, request: AiRequest, query: u64, events: EventSink) {
        let prompt = request.context.render(&request.question);
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(prompt)
            .current_dir(&request.context.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let program = self.command.clone();
        info!(query, command = %program, project = %request.context.path.display(), "AI query");

        tokio::spawn(async move {
            let emit = |event: AiEvent| {
                let events = events.clone();
                async move { events.send(Event::Ai { query, event }).await }
            };

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(err) => {
                    warn!(query, error = %err, "AI backend failed to start");
                    emit(query_failed(format!("failed to run {}: {}", program, err))).await;
                    return;
                }
            };

            let stderr_task = child.stderr.take().map(|stderr| {
                tokio::spawn(async move {
                    let mut text = String::new();
                    let _ = BufReader::new(stderr).read_to_string(&mut text).await;
                    text
                })
            });

            if let Some(mut stdout) = child.stdout.take() {
                let mut buffer = vec![0u8; 4096];
                let mut decoder = ChunkDecoder::new();
                loop {
                    let read = match stdout.read(&mut buffer).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => read,
                    };
                    let text = decoder.decode(&buffer[..read]);
                    if !text.is_empty() {
                        emit(AiEvent::Chunk(text)).await;
                    }
                }
            }

            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(query, "AI query complete");
                    emit(AiEvent::Complete).await;
                }
                Ok(status) => {
                    let detail = stderr.trim();
                    let message = if detail.is_empty() {
                        format!("{} exited with {}", program, status)
                    } else {
                        format!("{} error: {}", program, detail)
                    };
                    warn!(query, %status, "AI query failed");
                    emit(query_failed(message)).await;
                }
                Err(err) => {
                    emit(query_failed(format!("{} failed: {}", program, err))).await;
                }
            }
        });
    }
}

fn query_failed(detail: String) -> AiEvent {
    AiEvent::Error(ManagerError::AiQueryFailed(detail).to_string())
}

/// Resolves `command` against a `PATH`-style list, like `which`.
pub fn find_executable(command: &str, path_var: &OsStr) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    env::split_paths(path_var)
        .map(|dir| dir.join(command))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file() || path.with_extension("cmd").is_file()
}
