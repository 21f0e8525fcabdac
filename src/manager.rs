//! Orchestration of the process and terminal core.
//!
//! `Manager` owns every piece of mutable state: the project store, the
//! supervisor and its registry, the terminal session and the interceptor.
//! It is driven from a single loop: commands come from the UI or CLI,
//! everything else arrives as an `Event`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::ai::{AiBackend, AiRequest, QueryContext};
use crate::config::Settings;
use crate::error::ManagerError;
use crate::events::{Event, EventSink};
use crate::inspect::ProcessInspector;
use crate::interceptor::{Action, AiInterceptor, Mode, PROMPT};
use crate::output::LogBuffer;
use crate::project::{Project, ProjectStatus, ProjectUpdate};
use crate::reconcile::{spawn_observation, GhostReconciler, Observation};
use crate::store::ProjectStore;
use crate::supervisor::{ProcessSupervisor, StartOptions, SupervisorSettings};
use crate::terminal::TerminalSession;

const CONTEXT_LOG_LINES: usize = 30;

pub struct Manager {
    store: Box<dyn ProjectStore>,
    supervisor: ProcessSupervisor,
    reconciler: GhostReconciler,
    terminal: TerminalSession,
    interceptor: AiInterceptor,
    backend: Arc<dyn AiBackend>,
    inspector: Arc<dyn ProcessInspector>,
    events: EventSink,
    logs: HashMap<PathBuf, LogBuffer>,
    console: LogBuffer,
    focus: Option<PathBuf>,
    settings: Settings,
    scan_in_flight: bool,
}

impl Manager {
    pub fn new(
        settings: Settings,
        store: Box<dyn ProjectStore>,
        inspector: Arc<dyn ProcessInspector>,
        backend: Arc<dyn AiBackend>,
        events: EventSink,
    ) -> Self {
        let supervisor = ProcessSupervisor::new(
            events.clone(),
            Arc::clone(&inspector),
            SupervisorSettings {
                default_port: settings.default_port,
                stop_grace: settings.stop_grace,
            },
        );
        Self {
            store,
            supervisor,
            reconciler: GhostReconciler::new(events.clone()),
            terminal: TerminalSession::new(settings.shell.clone(), events.clone()),
            interceptor: AiInterceptor::new(backend.name().to_string()),
            backend,
            inspector,
            console: LogBuffer::new(settings.max_lines),
            logs: HashMap::new(),
            focus: None,
            events,
            settings,
            scan_in_flight: false,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn projects(&self) -> Vec<Project> {
        self.store.list()
    }

    pub fn project(&self, path: &Path) -> Option<Project> {
        self.store.get(path)
    }

    pub fn logs(&self, path: &Path) -> Option<&LogBuffer> {
        self.logs.get(path)
    }

    /// The terminal pane: shell output plus interceptor text.
    pub fn console(&self) -> &LogBuffer {
        &self.console
    }

    pub fn mode(&self) -> Mode {
        self.interceptor.mode()
    }

    pub fn interceptor(&self) -> &AiInterceptor {
        &self.interceptor
    }

    pub fn shell_project(&self) -> Option<&Path> {
        self.terminal.shell_project()
    }

    pub fn is_supervised(&self, path: &Path) -> bool {
        self.supervisor.is_running(path)
    }

    /// Sets the project AI questions are asked about.
    pub fn focus(&mut self, path: &Path) {
        self.focus = Some(path.to_path_buf());
    }

    pub fn add_project(&mut self, project: Project) -> Result<Vec<Project>> {
        self.store.add(project)
    }

    pub async fn remove_project(&mut self, path: &Path, delete_files: bool) -> Result<Vec<Project>> {
        if let Some(project) = self.store.get(path) {
            if self.supervisor.is_running(path) || project.is_running() {
                self.supervisor.stop(&project).await;
            }
        }
        if self.terminal.shell_project() == Some(path) {
            self.terminal.kill_shell();
        }
        self.logs.remove(path);
        self.store.remove(path, delete_files)
    }

    pub async fn start(&mut self, path: &Path, script: Option<&str>, port: Option<u16>) -> Result<()> {
        let options = StartOptions {
            port,
            command: None,
        };
        self.start_with(path, script, options).await
    }

    pub async fn start_with(
        &mut self,
        path: &Path,
        script: Option<&str>,
        options: StartOptions,
    ) -> Result<()> {
        let project = self
            .store
            .get(path)
            .ok_or_else(|| anyhow!("unknown project {}", path.display()))?;
        self.supervisor.start(&project, script, options).await?;
        if let Some(process) = self.supervisor.registry().get(path) {
            self.update_project(path, &ProjectUpdate::port(Some(process.port)));
        }
        Ok(())
    }

    pub async fn stop(&mut self, path: &Path) -> Result<()> {
        let project = self
            .store
            .get(path)
            .ok_or_else(|| anyhow!("unknown project {}", path.display()))?;
        self.supervisor.stop(&project).await;
        self.update_project(path, &ProjectUpdate::stopped());
        Ok(())
    }

    /// Starts a reconciliation scan unless one is already running.
    pub fn check_all_statuses(&mut self) {
        if self.scan_in_flight {
            debug!("reconciliation already in flight");
            return;
        }
        let projects: Vec<PathBuf> = self
            .store
            .list()
            .into_iter()
            .map(|project| project.path)
            .collect();
        if projects.is_empty() {
            return;
        }
        self.scan_in_flight = true;
        spawn_observation(Arc::clone(&self.inspector), projects, self.events.clone());
    }

    pub fn start_shell(&mut self, path: &Path) {
        self.focus(path);
        if let Err(err) = self.terminal.start_shell(path) {
            warn!(project = %path.display(), error = %err, "shell failed to start");
            self.console.push_tty(&format!("\x1b[31m{}\x1b[0m\r\n", err));
        }
    }

    /// Raw terminal input, routed through the interceptor.
    pub async fn send_input(&mut self, bytes: &[u8]) {
        let actions = self.interceptor.handle_input(bytes);
        self.perform(actions).await;
    }

    /// Writes to a supervised dev server's stdin.
    pub async fn send_to_server(&mut self, path: &Path, bytes: &[u8]) {
        if let Err(err) = self.supervisor.send_input(path, bytes).await {
            warn!(project = %path.display(), error = %err, "dev server input closed");
        }
    }

    /// A line typed in shell mode: goes to the persistent shell, or runs as
    /// a one-off command in the focused project when no shell is open.
    pub async fn run_line(&mut self, line: &str) {
        if self.terminal.has_shell() {
            self.console.push_tty(&format!("{}{}\r\n", PROMPT, line));
            let bytes = format!("{}\n", line).into_bytes();
            self.perform(vec![Action::Forward(bytes)]).await;
            return;
        }
        if line.trim().is_empty() {
            return;
        }
        match self.focus.clone() {
            Some(path) => self.execute_once(line, &path).await,
            None => self
                .console
                .push_tty("\x1b[33mNo project selected for this command\x1b[0m\r\n"),
        }
    }

    pub async fn toggle_ai(&mut self) {
        let actions = self.interceptor.toggle();
        self.perform(actions).await;
    }

    pub async fn execute_once(&mut self, command: &str, path: &Path) {
        self.console.push_tty(&format!("{}{}\r\n", PROMPT, command));
        if let Err(err) = self.terminal.execute_once(command, path).await {
            warn!(command, error = %err, "command failed to run");
            self.console.push_tty(&format!("\x1b[31m{}\x1b[0m\r\n", err));
        }
    }

    /// One typing-effect step of the AI answer.
    pub async fn drain_ai(&mut self) -> bool {
        let actions = self.interceptor.drain_tick();
        let changed = !actions.is_empty();
        self.perform(actions).await;
        changed
    }

    pub fn clear_console(&mut self) {
        self.console.clear();
    }

    /// Reaps exited children and shells.
    pub fn tick(&mut self) {
        self.supervisor.poll_exits();
        self.terminal.poll();
    }

    /// Applies one event. Returns true when visible state changed.
    pub async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Output { project, text, stream } => {
                let max_lines = self.settings.max_lines;
                self.logs
                    .entry(project)
                    .or_insert_with(|| LogBuffer::new(max_lines))
                    .push_chunk(&text, stream);
                true
            }
            Event::TerminalOutput { text, .. } => {
                self.console.push_tty(&text);
                true
            }
            Event::StatusChanged { project, status } => {
                let update = match status {
                    ProjectStatus::Stopped => ProjectUpdate::stopped(),
                    ProjectStatus::Running => ProjectUpdate::status(ProjectStatus::Running),
                };
                self.update_project(&project, &update)
            }
            Event::PortDetected { project, port } => {
                // Late matches from a server that is shutting down must not
                // put a port back on a stopped project.
                let running = self.supervisor.is_running(&project)
                    || self.store.get(&project).is_some_and(|p| p.is_running());
                if !running {
                    debug!(project = %project.display(), port, "ignoring port for stopped project");
                    return false;
                }
                self.update_project(&project, &ProjectUpdate::port(Some(port)))
            }
            Event::ProcessExited { project, code } => {
                debug!(project = %project.display(), ?code, "exit noted");
                false
            }
            Event::Observed(observation) => {
                self.apply_observation(&observation);
                true
            }
            Event::ScanFailed => {
                self.scan_in_flight = false;
                false
            }
            Event::Ai { query, event } => {
                let actions = self.interceptor.on_ai_event(query, event);
                let changed = !actions.is_empty();
                self.perform(actions).await;
                changed
            }
            Event::ExecuteDue { query } => {
                let Some(scheduled) = self.interceptor.take_scheduled(query) else {
                    return false;
                };
                self.execute_once(&scheduled.command, &scheduled.project).await;
                self.schedule(Event::RecheckStatuses, self.settings.status_recheck);
                true
            }
            Event::RecheckStatuses => {
                self.check_all_statuses();
                false
            }
            Event::Key(_) | Event::Resize { .. } | Event::Stdin(_) | Event::Shutdown => false,
        }
    }

    fn apply_observation(&mut self, observation: &Observation) {
        self.scan_in_flight = false;
        let supervisor = &self.supervisor;
        self.reconciler
            .apply(self.store.as_mut(), |path| supervisor.is_running(path), observation);
    }

    fn update_project(&mut self, path: &Path, update: &ProjectUpdate) -> bool {
        let before = self.store.get(path);
        match self.store.update(path, update) {
            Ok(after) => after != before,
            Err(err) => {
                warn!(project = %path.display(), error = %err, "failed to persist project update");
                false
            }
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Forward(bytes) => {
                    if let Err(err) = self.terminal.input(&bytes).await {
                        self.console.push_tty(&format!("\x1b[31m{}\x1b[0m\r\n", err));
                    }
                }
                Action::Display(text) => self.console.push_tty(&text),
                Action::Submit(question) => self.submit(question),
                Action::Schedule { query } => {
                    self.schedule(Event::ExecuteDue { query }, self.settings.execute_delay);
                }
            }
        }
    }

    fn submit(&mut self, question: String) {
        let Some(path) = self
            .focus
            .clone()
            .or_else(|| self.terminal.shell_project().map(Path::to_path_buf))
        else {
            let actions = self.interceptor.backend_unavailable("No project selected");
            self.display(actions);
            return;
        };
        let Some(project) = self.store.get(&path) else {
            let actions = self
                .interceptor
                .backend_unavailable(&format!("Unknown project {}", path.display()));
            self.display(actions);
            return;
        };
        if !self.backend.is_available() {
            let err = ManagerError::AiBackendUnavailable(format!(
                "`{}` was not found in PATH",
                self.backend.name()
            ));
            warn!(error = %err, "AI query refused");
            let actions = self.interceptor.backend_unavailable(&err.to_string());
            self.display(actions);
            return;
        }

        let recent_logs = self
            .logs
            .get(&path)
            .map(|logs| logs.tail(CONTEXT_LOG_LINES));
        let request = AiRequest {
            question: question.clone(),
            context: QueryContext::for_project(&project, recent_logs),
        };
        let (query, waiting) = self.interceptor.begin_query(question, path);
        self.display(vec![waiting]);
        self.backend.query(request, query, self.events.clone());
    }

    fn display(&mut self, actions: Vec<Action>) {
        for action in actions {
            if let Action::Display(text) = action {
                self.console.push_tty(&text);
            }
        }
    }

    fn schedule(&self, event: Event, delay: std::time::Duration) {
        let deadline = tokio::time::Instant::now() + delay;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            events.send(event).await;
        });
    }

    pub async fn shutdown(&mut self) {
        info!(
            servers = self.supervisor.registry().len(),
            stopping = self.supervisor.pending_stops(),
            "shutting down"
        );
        self.terminal.kill_shell();
        self.supervisor.shutdown_all().await;
    }
}
