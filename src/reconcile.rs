//! Ghost reconciliation.
//!
//! The OS scan (`observe`) is blocking and runs off the loop; its result is
//! delivered as an `Event::Observed` and folded into project state by
//! `GhostReconciler::apply` on the loop itself.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{Event, EventSink};
use crate::inspect::ProcessInspector;
use crate::project::{Project, ProjectStatus, ProjectUpdate};
use crate::store::ProjectStore;

/// An untracked process that appears to serve a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ghost {
    pub pid: u32,
    pub port: u16,
}

/// One OS scan: for every scanned project, the ghost found for it, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub ghosts: HashMap<PathBuf, Option<Ghost>>,
}

impl Observation {
    pub fn ghost(&self, project: &Path) -> Option<Ghost> {
        self.ghosts.get(project).copied().flatten()
    }

    pub fn scanned(&self, project: &Path) -> bool {
        self.ghosts.contains_key(project)
    }
}

/// Scans the process table for processes working inside each project.
///
/// A process counts only if it also holds a listening TCP socket. The
/// manager's own pid is never a candidate.
pub fn observe(inspector: &dyn ProcessInspector, projects: &[PathBuf]) -> Result<Observation> {
    let own_pid = std::process::id();
    let processes = inspector.processes()?;

    let mut candidates: HashMap<&PathBuf, Vec<u32>> = HashMap::new();
    for project in projects {
        let mut pids: Vec<u32> = processes
            .iter()
            .filter(|process| process.pid != own_pid && process.cwd.starts_with(project))
            .map(|process| process.pid)
            .collect();
        pids.sort_unstable();
        candidates.insert(project, pids);
    }

    let mut all_pids: Vec<u32> = candidates.values().flatten().copied().collect();
    all_pids.sort_unstable();
    all_pids.dedup();
    let listening = inspector.listening_ports(&all_pids)?;

    let ghosts = candidates
        .into_iter()
        .map(|(project, pids)| {
            let ghost = pids.into_iter().find_map(|pid| {
                listening.get(&pid).map(|port| Ghost { pid, port: *port })
            });
            (project.clone(), ghost)
        })
        .collect();
    Ok(Observation { ghosts })
}

/// Runs `observe` on the blocking pool and posts the result to the loop.
///
/// Every scan ends in exactly one event: `Observed` on success, otherwise
/// `ScanFailed`, which leaves project state unchanged.
pub fn spawn_observation(
    inspector: Arc<dyn ProcessInspector>,
    projects: Vec<PathBuf>,
    events: EventSink,
) {
    tokio::spawn(async move {
        let scan = tokio::task::spawn_blocking(move || observe(inspector.as_ref(), &projects)).await;
        let event = match scan {
            Ok(Ok(observation)) => Event::Observed(observation),
            Ok(Err(err)) => {
                debug!(error = %err, "process scan failed, keeping state");
                Event::ScanFailed
            }
            Err(err) => {
                warn!(error = %err, "process scan task failed");
                Event::ScanFailed
            }
        };
        events.send(event).await;
    });
}

/// Folds observations into stored project state.
#[derive(Debug, Clone)]
pub struct GhostReconciler {
    events: EventSink,
}

impl GhostReconciler {
    pub fn new(events: EventSink) -> Self {
        Self { events }
    }

    /// The update that brings `project` in line with `observation`.
    ///
    /// Contains only fields that actually differ; registered projects are
    /// never marked stopped by a scan. An unregistered project without a
    /// ghost ends up stopped with no port.
    pub fn plan(project: &Project, registered: bool, observation: &Observation) -> ProjectUpdate {
        let mut update = ProjectUpdate::default();
        if !observation.scanned(&project.path) {
            return update;
        }
        match observation.ghost(&project.path) {
            Some(ghost) => {
                if project.status != ProjectStatus::Running {
                    update.status = Some(ProjectStatus::Running);
                }
                if project.port != Some(ghost.port) {
                    update.port = Some(Some(ghost.port));
                }
            }
            None if registered => {}
            None => {
                if project.is_running() {
                    update.status = Some(ProjectStatus::Stopped);
                }
                if project.port.is_some() {
                    update.port = Some(None);
                }
            }
        }
        update
    }

    /// Applies an observation to the store and emits a notification per
    /// changed field. Returns the updated project list.
    pub fn apply(
        &self,
        store: &mut dyn ProjectStore,
        is_registered: impl Fn(&Path) -> bool,
        observation: &Observation,
    ) -> Vec<Project> {
        for project in store.list() {
            let update = Self::plan(&project, is_registered(&project.path), observation);
            if update.is_empty() {
                continue;
            }
            debug!(project = %project.path.display(), ?update, "reconciled");
            if let Err(err) = store.update(&project.path, &update) {
                warn!(project = %project.path.display(), error = %err, "failed to persist reconciled state");
            }
            if let Some(status) = update.status {
                self.events.emit(Event::StatusChanged {
                    project: project.path.clone(),
                    status,
                });
            }
            if let Some(Some(port)) = update.port {
                self.events.emit(Event::PortDetected {
                    project: project.path.clone(),
                    port,
                });
            }
        }
        store.list()
    }
}
