//! Dev-server process supervision.
//!
//! `ProcessSupervisor` starts a project's dev server, wires its output
//! through the port sniffer and the marker-line filter, and stops it with a
//! graceful signal followed by a forced kill after a grace period. All
//! outcomes, including failures, are reported as events.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, Result};
use crate::events::{Event, EventSink};
use crate::inspect::ProcessInspector;
use crate::output::{sanitize_chunk, sniff_port, ChunkDecoder, StreamKind};
use crate::ports::PortAllocator;
use crate::project::{Project, ProjectKind, ProjectStatus};
use crate::registry::{ManagedProcess, ProcessRegistry};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Program and arguments used to launch a dev server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Parses a shell-style command line such as `npm run dev -- --host`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = shell_words::split(line).ok()?;
        if parts.is_empty() {
            return None;
        }
        let program = parts.remove(0);
        Some(Self {
            program,
            args: parts,
        })
    }

    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.args.len());
        parts.push(self.program.clone());
        parts.extend(self.args.clone());
        shell_words::join(parts)
    }
}

/// The fixed per-kind launch table.
pub fn launch_command(kind: ProjectKind, script: Option<&str>) -> Option<LaunchCommand> {
    match kind {
        ProjectKind::Node => Some(match script {
            Some(script) => LaunchCommand::new("npm", &["run", script]),
            None => LaunchCommand::new("npm", &["start"]),
        }),
        ProjectKind::Python => Some(LaunchCommand::new("python", &["main.py"])),
        ProjectKind::Rust => Some(LaunchCommand::new("cargo", &["run"])),
        ProjectKind::Go => Some(LaunchCommand::new("go", &["run", "."])),
        ProjectKind::Docker | ProjectKind::Other | ProjectKind::Unknown => None,
    }
}

/// Per-start options from the caller.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Preferred port; the configured default is used when absent.
    pub port: Option<u16>,
    /// Explicit command that replaces the per-kind table entry.
    pub command: Option<LaunchCommand>,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub default_port: u16,
    pub stop_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

// A child that was asked to terminate and is force-killed at `deadline`.
#[derive(Debug)]
struct PendingStop {
    project: PathBuf,
    child: Child,
    deadline: tokio::time::Instant,
}

pub struct ProcessSupervisor {
    registry: ProcessRegistry,
    stopping: Vec<PendingStop>,
    allocator: PortAllocator,
    inspector: Arc<dyn ProcessInspector>,
    events: EventSink,
    settings: SupervisorSettings,
}

impl ProcessSupervisor {
    pub fn new(
        events: EventSink,
        inspector: Arc<dyn ProcessInspector>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            registry: ProcessRegistry::new(),
            stopping: Vec::new(),
            allocator: PortAllocator::new(),
            inspector,
            events,
            settings,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn is_running(&self, project: &Path) -> bool {
        self.registry.contains(project)
    }

    pub fn pending_stops(&self) -> usize {
        self.stopping.len()
    }

    /// Starts the project's dev server.
    ///
    /// Output, port detection, status and exit are reported on the event
    /// channel. A spawn failure is reported there too and also returned.
    pub async fn start(
        &mut self,
        project: &Project,
        script: Option<&str>,
        options: StartOptions,
    ) -> Result<()> {
        let path = project.path.clone();
        if self.registry.contains(&path) {
            self.events
                .output(&path, "\n[devrack] already running, stop it first\n");
            return Ok(());
        }

        let Some(launch) = options
            .command
            .clone()
            .or_else(|| launch_command(project.kind, script))
        else {
            self.events.output(
                &path,
                format!("[devrack] no launch command for {} projects\n", project.kind),
            );
            return Ok(());
        };

        let requested = options.port.unwrap_or(self.settings.default_port);
        let port = match self.allocator.allocate(requested).await {
            Ok(port) => port,
            Err(err) => {
                warn!(project = %path.display(), error = %err, "starting without a verified free port");
                requested
            }
        };
        if port != requested {
            self.events.output(
                &path,
                format!("[devrack] port {} is in use, using {}\n", requested, port),
            );
        }

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(&path)
            .env("FORCE_COLOR", "1")
            .env("CLICOLOR_FORCE", "1")
            .env("PYTHONUNBUFFERED", "1")
            .env("PORT", port.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
            command.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = ManagerError::ChildSpawnFailed {
                    command: launch.display(),
                    source,
                };
                warn!(project = %path.display(), error = %err, "spawn failed");
                self.events.emit(Event::Output {
                    project: path.clone(),
                    text: format!("[devrack] {}\n", err),
                    stream: StreamKind::Stderr,
                });
                self.events.emit(Event::StatusChanged {
                    project: path,
                    status: ProjectStatus::Stopped,
                });
                return Err(err);
            }
        };

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_chunks(
                path.clone(),
                StreamKind::Stdout,
                stdout,
                self.events.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_chunks(
                path.clone(),
                StreamKind::Stderr,
                stderr,
                self.events.clone(),
            ));
        }

        let process = ManagedProcess::new(path.clone(), child, port);
        info!(
            project = %path.display(),
            pid = ?process.pid,
            port,
            command = %launch.display(),
            "dev server started"
        );
        self.registry.register(process);
        self.events.emit(Event::StatusChanged {
            project: path,
            status: ProjectStatus::Running,
        });
        Ok(())
    }

    /// Stops the project's dev server.
    ///
    /// Without a registered child (the manager restarted while the server
    /// kept running) the listener on the project's last known port is
    /// force-killed instead. Stopped status is reported either way.
    pub async fn stop(&mut self, project: &Project) {
        let path = project.path.clone();
        if let Some(mut process) = self.registry.unregister(&path) {
            process.stdin = None;
            match process.pid {
                Some(pid) => {
                    info!(project = %path.display(), pid, "sending graceful termination");
                    terminate(pid);
                }
                None => debug!(project = %path.display(), "child already reaped"),
            }
            self.stopping.push(PendingStop {
                project: path.clone(),
                child: process.child,
                deadline: tokio::time::Instant::now() + self.settings.stop_grace,
            });
        } else if let Some(port) = project.port {
            match self.lookup_port_owners(port).await {
                Ok(pids) if !pids.is_empty() => {
                    for pid in pids {
                        info!(project = %path.display(), pid, port, "killing untracked listener");
                        force_kill(pid);
                    }
                }
                Ok(_) => debug!(project = %path.display(), port, "no listener found"),
                Err(err) => debug!(project = %path.display(), error = %err, "port lookup failed"),
            }
        } else {
            debug!(project = %path.display(), "stop requested with nothing to stop");
        }

        self.events.output(&path, "\n[Stopped by user]\n");
        self.events.emit(Event::StatusChanged {
            project: path,
            status: ProjectStatus::Stopped,
        });
    }

    async fn lookup_port_owners(&self, port: u16) -> Result<Vec<u32>> {
        let inspector = Arc::clone(&self.inspector);
        tokio::task::spawn_blocking(move || inspector.pids_on_port(port))
            .await
            .map_err(|err| ManagerError::ProcessLookupFailed(err.to_string()))?
    }

    /// Writes raw bytes to a supervised child's stdin.
    pub async fn send_input(&mut self, project: &Path, bytes: &[u8]) -> Result<()> {
        let Some(process) = self.registry.get_mut(project) else {
            return Ok(());
        };
        let Some(stdin) = process.stdin.as_mut() else {
            return Ok(());
        };
        if bytes.is_empty() {
            return Ok(());
        }
        let io_err = |source| ManagerError::Io {
            path: project.to_path_buf(),
            source,
        };
        stdin.write_all(bytes).await.map_err(io_err)?;
        stdin.flush().await.map_err(io_err)?;
        Ok(())
    }

    /// Reaps exited children and escalates overdue stops. Called on every tick.
    pub fn poll_exits(&mut self) {
        let mut exited = Vec::new();
        for (path, process) in self.registry.iter_mut() {
            match process.child.try_wait() {
                Ok(Some(status)) => exited.push((path.clone(), status.code(), process.started_at)),
                Ok(None) => {}
                Err(err) => {
                    warn!(project = %path.display(), error = %err, "failed to poll child");
                    exited.push((path.clone(), None, process.started_at));
                }
            }
        }
        for (path, code, started_at) in exited {
            self.registry.unregister(&path);
            info!(
                project = %path.display(),
                code = ?code,
                uptime_secs = started_at.elapsed().as_secs(),
                "dev server exited"
            );
            let line = match code {
                Some(code) => format!("\nProcess exited with code {}\n", code),
                None => "\nProcess exited\n".to_string(),
            };
            self.events.output(&path, line);
            self.events.emit(Event::ProcessExited {
                project: path.clone(),
                code,
            });
            self.events.emit(Event::StatusChanged {
                project: path,
                status: ProjectStatus::Stopped,
            });
        }
        self.poll_stopping();
    }

    fn poll_stopping(&mut self) {
        let now = tokio::time::Instant::now();
        self.stopping.retain_mut(|pending| match pending.child.try_wait() {
            Ok(Some(status)) => {
                debug!(project = %pending.project.display(), code = ?status.code(), "stopped child exited");
                false
            }
            Ok(None) if now >= pending.deadline => {
                warn!(project = %pending.project.display(), "grace period elapsed, killing");
                if let Some(pid) = pending.child.id() {
                    force_kill(pid);
                }
                let _ = pending.child.start_kill();
                false
            }
            Ok(None) => true,
            Err(_) => false,
        });
    }

    /// Terminates everything this supervisor owns. Used on manager exit.
    pub async fn shutdown_all(&mut self) {
        let mut children: Vec<Child> = self
            .registry
            .drain()
            .into_iter()
            .map(|process| process.child)
            .chain(self.stopping.drain(..).map(|pending| pending.child))
            .collect();
        for child in &children {
            if let Some(pid) = child.id() {
                terminate(pid);
            }
        }
        for child in &mut children {
            if wait_for_exit(child, self.settings.stop_grace).await.is_none() {
                if let Some(pid) = child.id() {
                    force_kill(pid);
                }
                let _ = child.kill().await;
            }
        }
    }
}

/// SIGTERM to the child's process group and the child itself.
#[cfg(unix)]
pub fn terminate(pid: u32) {
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, libc::SIGTERM);
        let _ = libc::kill(pid, libc::SIGTERM);
    }
}

#[cfg(windows)]
pub fn terminate(pid: u32) {
    use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows_sys::Win32::System::Console::CTRL_BREAK_EVENT;
    // CTRL_BREAK is the closest console signal Windows offers.
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
    }
}

#[cfg(all(not(unix), not(windows)))]
pub fn terminate(_pid: u32) {}

/// SIGKILL to the process group and the process.
#[cfg(unix)]
pub fn force_kill(pid: u32) {
    unsafe {
        let pid = pid as i32;
        let _ = libc::kill(-pid, libc::SIGKILL);
        let _ = libc::kill(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

async fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    if timeout.is_zero() {
        return None;
    }
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => None,
    }
}

/// Forwards a child's stream chunk by chunk, sniffing ports and dropping
/// marker lines on the way.
pub async fn read_chunks<R>(project: PathBuf, stream: StreamKind, mut reader: R, events: EventSink)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; 8192];
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
        if let Some(port) = sniff_port(&text) {
            events
                .send(Event::PortDetected {
                    project: project.clone(),
                    port,
                })
                .await;
        }
        let Some(text) = sanitize_chunk(&text) else {
            continue;
        };
        let delivered = events
            .send(Event::Output {
                project: project.clone(),
                text,
                stream,
            })
            .await;
        if !delivered {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, drain};
    use crate::inspect::ProcessInfo;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeInspector {
        port_owners: Mutex<HashMap<u16, Vec<u32>>>,
    }

    impl ProcessInspector for FakeInspector {
        fn processes(&self) -> Result<Vec<ProcessInfo>> {
            Ok(Vec::new())
        }

        fn listening_ports(&self, _pids: &[u32]) -> Result<HashMap<u32, u16>> {
            Ok(HashMap::new())
        }

        fn pids_on_port(&self, port: u16) -> Result<Vec<u32>> {
            Ok(self
                .port_owners
                .lock()
                .unwrap()
                .get(&port)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn supervisor(
        inspector: Arc<FakeInspector>,
    ) -> (ProcessSupervisor, tokio::sync::mpsc::Receiver<Event>) {
        let (sink, rx) = channel(256);
        let settings = SupervisorSettings {
            default_port: 3000,
            stop_grace: Duration::from_millis(200),
        };
        (ProcessSupervisor::new(sink, inspector, settings), rx)
    }

    fn project(dir: &TempDir, kind: ProjectKind) -> Project {
        let mut project = Project::from_path(dir.path());
        project.kind = kind;
        project
    }

    fn shell(script: &str) -> StartOptions {
        StartOptions {
            port: None,
            command: Some(LaunchCommand::new("sh", &["-c", script])),
        }
    }

    async fn free_port() -> u16 {
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    }

    async fn collect_until<F>(rx: &mut tokio::sync::mpsc::Receiver<Event>, mut done: F) -> Vec<Event>
    where
        F: FnMut(&[Event]) -> bool,
    {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done(&events) && tokio::time::Instant::now() < deadline {
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(50), rx.recv()).await
            {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn launch_table_by_kind() {
        assert_eq!(
            launch_command(ProjectKind::Node, Some("dev")),
            Some(LaunchCommand::new("npm", &["run", "dev"]))
        );
        assert_eq!(
            launch_command(ProjectKind::Node, None),
            Some(LaunchCommand::new("npm", &["start"]))
        );
        assert_eq!(
            launch_command(ProjectKind::Python, None),
            Some(LaunchCommand::new("python", &["main.py"]))
        );
        assert_eq!(
            launch_command(ProjectKind::Rust, None).map(|c| c.display()),
            Some("cargo run".to_string())
        );
        assert!(launch_command(ProjectKind::Unknown, None).is_none());
        assert!(launch_command(ProjectKind::Other, Some("dev")).is_none());
    }

    #[test]
    fn launch_command_parse_splits_words() {
        let parsed = LaunchCommand::parse("python -m 'http.server' 8000").unwrap();
        assert_eq!(parsed.program, "python");
        assert_eq!(parsed.args, vec!["-m", "http.server", "8000"]);
        assert!(LaunchCommand::parse("   ").is_none());
    }

    #[tokio::test]
    async fn start_without_launch_command_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        supervisor
            .start(&project(&dir, ProjectKind::Other), None, StartOptions::default())
            .await
            .unwrap();
        assert_eq!(supervisor.registry().len(), 0);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .all(|event| !matches!(event, Event::StatusChanged { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_twice_registers_once() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Other);
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        supervisor
            .start(&project, None, shell("sleep 5"))
            .await
            .unwrap();
        supervisor
            .start(&project, None, shell("sleep 5"))
            .await
            .unwrap();
        assert_eq!(supervisor.registry().len(), 1);

        let events = drain(&mut rx);
        let running = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    Event::StatusChanged {
                        status: ProjectStatus::Running,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(running, 1);
        supervisor.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_sees_allocated_port_and_it_is_sniffed() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Other);
        let port = free_port().await;
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        let options = StartOptions {
            port: Some(port),
            ..shell("echo \"listening on port $PORT\"")
        };
        supervisor.start(&project, None, options).await.unwrap();

        let events = collect_until(&mut rx, |events| {
            events
                .iter()
                .any(|event| matches!(event, Event::PortDetected { .. }))
        })
        .await;
        let detected = events.iter().find_map(|event| match event {
            Event::PortDetected { port, .. } => Some(*port),
            _ => None,
        });
        assert_eq!(detected, Some(port));
        supervisor.shutdown_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn busy_port_is_reported_before_output() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Other);
        let held = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = held.local_addr().unwrap().port();
        if port == u16::MAX {
            return;
        }
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        let options = StartOptions {
            port: Some(port),
            ..shell("sleep 5")
        };
        supervisor.start(&project, None, options).await.unwrap();

        let events = drain(&mut rx);
        match events.first() {
            Some(Event::Output { text, .. }) => {
                assert!(text.contains(&format!("port {} is in use", port)))
            }
            other => panic!("expected diagnostic first, got {:?}", other),
        }
        supervisor.shutdown_all().await;
    }

    #[tokio::test]
    async fn spawn_failure_reports_stopped() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Other);
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        let options = StartOptions {
            port: None,
            command: Some(LaunchCommand::new("devrack-no-such-binary", &[])),
        };
        let err = supervisor.start(&project, None, options).await.unwrap_err();
        assert!(matches!(err, ManagerError::ChildSpawnFailed { .. }));
        assert_eq!(supervisor.registry().len(), 0);

        let events = drain(&mut rx);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Output {
                stream: StreamKind::Stderr,
                ..
            }
        )));
        assert!(matches!(
            events.last(),
            Some(Event::StatusChanged {
                status: ProjectStatus::Stopped,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn stop_without_process_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Node);
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        supervisor.stop(&project).await;
        supervisor.stop(&project).await;

        let stopped = drain(&mut rx)
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    Event::StatusChanged {
                        status: ProjectStatus::Stopped,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(stopped, 2);
        assert_eq!(supervisor.pending_stops(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_is_reported_with_code() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Other);
        let (mut supervisor, mut rx) = supervisor(Arc::default());
        supervisor
            .start(&project, None, shell("exit 3"))
            .await
            .unwrap();

        let mut events = Vec::new();
        for _ in 0..100 {
            supervisor.poll_exits();
            events.extend(drain(&mut rx));
            if supervisor.registry().len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(events.iter().any(|event| matches!(
            event,
            Event::ProcessExited { code: Some(3), .. }
        )));
        assert!(matches!(
            events.last(),
            Some(Event::StatusChanged {
                status: ProjectStatus::Stopped,
                ..
            })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_escalates_to_kill_after_grace() {
        let dir = TempDir::new().unwrap();
        let project = project(&dir, ProjectKind::Other);
        let (mut supervisor, _rx) = supervisor(Arc::default());
        supervisor
            .start(
                &project,
                None,
                shell("trap '' TERM; while :; do sleep 0.05; done"),
            )
            .await
            .unwrap();
        let pid = supervisor.registry().get(&project.path).unwrap().pid.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        supervisor.stop(&project).await;
        assert!(!supervisor.is_running(&project.path));
        assert_eq!(supervisor.pending_stops(), 1);

        for _ in 0..100 {
            supervisor.poll_exits();
            if supervisor.pending_stops() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(supervisor.pending_stops(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let alive = unsafe { libc::kill(pid as i32, 0) } == 0;
        let zombie_or_gone = !alive || {
            let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).unwrap_or_default();
            stat.is_empty() || stat.contains(") Z")
        };
        assert!(zombie_or_gone);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_falls_back_to_port_owner() {
        let dir = TempDir::new().unwrap();
        let mut project = project(&dir, ProjectKind::Node);
        project.port = Some(4555);
        let mut ghost = Command::new("sleep").arg("30").spawn().unwrap();
        let ghost_pid = ghost.id().unwrap();

        let inspector = Arc::new(FakeInspector::default());
        inspector
            .port_owners
            .lock()
            .unwrap()
            .insert(4555, vec![ghost_pid]);
        let (mut supervisor, mut rx) = supervisor(inspector);
        supervisor.stop(&project).await;

        let status = tokio::time::timeout(Duration::from_secs(5), ghost.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert!(drain(&mut rx).iter().any(|event| matches!(
            event,
            Event::StatusChanged {
                status: ProjectStatus::Stopped,
                ..
            }
        )));
    }
}
