//! The single persistent shell of a manager, plus one-off commands.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, Result};
use crate::events::{Event, EventSink};
use crate::output::ChunkDecoder;

/// `$SHELL`, falling back to the platform shell.
pub fn default_shell() -> String {
    if cfg!(windows) {
        return std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string());
    }
    std::env::var("SHELL")
        .ok()
        .filter(|shell| !shell.trim().is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

#[derive(Debug)]
struct ShellHandle {
    project: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Owns at most one persistent shell. Starting a new one supersedes the old.
#[derive(Debug)]
pub struct TerminalSession {
    shell: Option<ShellHandle>,
    shell_program: String,
    events: EventSink,
}

impl TerminalSession {
    pub fn new(shell_program: impl Into<String>, events: EventSink) -> Self {
        Self {
            shell: None,
            shell_program: shell_program.into(),
            events,
        }
    }

    pub fn has_shell(&self) -> bool {
        self.shell.is_some()
    }

    /// Project the active shell works in.
    pub fn shell_project(&self) -> Option<&Path> {
        self.shell.as_ref().map(|shell| shell.project.as_path())
    }

    #[cfg(test)]
    pub fn shell_pid(&self) -> Option<u32> {
        self.shell.as_ref().and_then(|shell| shell.child.id())
    }

    pub fn start_shell(&mut self, project: &Path) -> Result<()> {
        self.kill_shell();

        let mut command = Command::new(&self.shell_program);
        command
            .current_dir(project)
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| ManagerError::ChildSpawnFailed {
            command: self.shell_program.clone(),
            source,
        })?;

        spawn_readers(&mut child, project, &self.events);
        info!(project = %project.display(), shell = %self.shell_program, pid = ?child.id(), "shell started");
        let stdin = child.stdin.take();
        self.shell = Some(ShellHandle {
            project: project.to_path_buf(),
            child,
            stdin,
        });
        Ok(())
    }

    /// Writes raw bytes to the active shell. No-op without one.
    pub async fn input(&mut self, bytes: &[u8]) -> Result<()> {
        let Some(shell) = self.shell.as_mut() else {
            return Ok(());
        };
        let Some(stdin) = shell.stdin.as_mut() else {
            return Ok(());
        };
        let write = async {
            stdin.write_all(bytes).await?;
            stdin.flush().await
        };
        if let Err(source) = write.await {
            warn!(project = %shell.project.display(), error = %source, "shell input closed");
            shell.stdin = None;
            return Err(ManagerError::Io {
                path: shell.project.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Runs `command` in the persistent shell, or as a detached one-off
    /// process in `project` when there is no shell.
    pub async fn execute_once(&mut self, command: &str, project: &Path) -> Result<()> {
        if self.shell.is_some() {
            debug!(command, "executing in persistent shell");
            let line = format!("{}\n", command);
            return self.input(line.as_bytes()).await;
        }

        let mut child = one_off_command(command)
            .current_dir(project)
            .env("FORCE_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ManagerError::ChildSpawnFailed {
                command: command.to_string(),
                source,
            })?;
        info!(project = %project.display(), command, "running one-off command");
        spawn_readers(&mut child, project, &self.events);

        let events = self.events.clone();
        let project = project.to_path_buf();
        tokio::spawn(async move {
            let line = match child.wait().await {
                Ok(status) => match status.code() {
                    Some(code) => format!("\n[command exited with code {}]\n", code),
                    None => "\n[command terminated]\n".to_string(),
                },
                Err(err) => format!("\n[command failed: {}]\n", err),
            };
            events
                .send(Event::TerminalOutput { project, text: line })
                .await;
        });
        Ok(())
    }

    /// Notices a shell that exited on its own. Called on every tick.
    pub fn poll(&mut self) {
        let Some(shell) = self.shell.as_mut() else {
            return;
        };
        match shell.child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                info!(project = %shell.project.display(), code = ?status.code(), "shell exited");
                self.events.emit(Event::TerminalOutput {
                    project: shell.project.clone(),
                    text: format!("\n[shell exited: {}]\n", status),
                });
                self.shell = None;
            }
            Err(err) => {
                warn!(error = %err, "failed to poll shell");
                self.shell = None;
            }
        }
    }

    pub fn kill_shell(&mut self) {
        let Some(mut shell) = self.shell.take() else {
            return;
        };
        debug!(project = %shell.project.display(), "terminating shell");
        shell.stdin = None;
        let _ = shell.child.start_kill();
        tokio::spawn(async move {
            let _ = shell.child.wait().await;
        });
    }
}

#[cfg(unix)]
fn one_off_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn one_off_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn spawn_readers(child: &mut Child, project: &Path, events: &EventSink) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(project.to_path_buf(), stdout, events.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(project.to_path_buf(), stderr, events.clone()));
    }
}

async fn forward_output<R>(project: PathBuf, mut reader: R, events: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; 4096];
    let mut decoder = ChunkDecoder::new();
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(read) => read,
        };
        let text = decoder.decode(&buffer[..read]);
        if text.is_empty() {
            continue;
        }
        let event = Event::TerminalOutput {
            project: project.clone(),
            text,
        };
        if !events.send(event).await {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::channel;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc::Receiver;

    async fn output_containing(rx: &mut Receiver<Event>, needle: &str) -> Option<PathBuf> {
        let mut seen = String::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
                Ok(Some(Event::TerminalOutput { project, text })) => {
                    seen.push_str(&text);
                    if seen.contains(needle) {
                        return Some(project);
                    }
                }
                Ok(Some(_)) | Err(_) => {}
                Ok(None) => break,
            }
        }
        None
    }

    #[tokio::test]
    async fn input_without_shell_is_a_no_op() {
        let (sink, _rx) = channel(16);
        let mut session = TerminalSession::new("/bin/sh", sink);
        session.input(b"echo hi\n").await.unwrap();
        assert!(!session.has_shell());
    }

    #[tokio::test]
    async fn shell_output_is_keyed_by_project() {
        let dir = TempDir::new().unwrap();
        let (sink, mut rx) = channel(64);
        let mut session = TerminalSession::new("/bin/sh", sink);
        session.start_shell(dir.path()).unwrap();
        session.input(b"echo shell-says-hi\n").await.unwrap();

        let project = output_containing(&mut rx, "shell-says-hi").await;
        assert_eq!(project.as_deref(), Some(dir.path()));
        session.kill_shell();
    }

    #[tokio::test]
    async fn new_shell_supersedes_old() {
        let first_dir = TempDir::new().unwrap();
        let second_dir = TempDir::new().unwrap();
        let (sink, _rx) = channel(64);
        let mut session = TerminalSession::new("/bin/sh", sink);
        session.start_shell(first_dir.path()).unwrap();
        let first_pid = session.shell_pid().unwrap();

        session.start_shell(second_dir.path()).unwrap();
        assert_eq!(session.shell_project(), Some(second_dir.path()));
        assert_ne!(session.shell_pid(), Some(first_pid));

        let mut gone = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if unsafe { libc::kill(first_pid as i32, 0) } != 0 {
                gone = true;
                break;
            }
        }
        assert!(gone);
        session.kill_shell();
    }

    #[tokio::test]
    async fn execute_once_without_shell_runs_detached() {
        let dir = TempDir::new().unwrap();
        let (sink, mut rx) = channel(64);
        let mut session = TerminalSession::new("/bin/sh", sink);
        session.execute_once("echo one-off && pwd", dir.path()).await.unwrap();
        assert!(!session.has_shell());
        assert!(output_containing(&mut rx, "exited with code 0").await.is_some());
    }

    #[tokio::test]
    async fn execute_once_prefers_persistent_shell() {
        let dir = TempDir::new().unwrap();
        let (sink, mut rx) = channel(64);
        let mut session = TerminalSession::new("/bin/sh", sink);
        session.start_shell(dir.path()).unwrap();
        session.execute_once("X=kept; echo \"var-$X\"", dir.path()).await.unwrap();
        session.execute_once("echo \"again-$X\"", dir.path()).await.unwrap();
        assert!(output_containing(&mut rx, "again-kept").await.is_some());
        session.kill_shell();
    }

    #[tokio::test]
    async fn shell_exit_is_noticed() {
        let dir = TempDir::new().unwrap();
        let (sink, _rx) = channel(64);
        let mut session = TerminalSession::new("/bin/sh", sink);
        session.start_shell(dir.path()).unwrap();
        session.input(b"exit 0\n").await.unwrap();
        for _ in 0..100 {
            session.poll();
            if !session.has_shell() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!session.has_shell());
    }
}
