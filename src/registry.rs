//! In-memory registry of supervised children.
//!
//! Maps project path to the live child this manager spawned. It is rebuilt
//! empty on every manager start, which is why ghost reconciliation exists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::process::{Child, ChildStdin};

/// A child process the supervisor spawned and still tracks.
#[derive(Debug)]
pub struct ManagedProcess {
    pub project: PathBuf,
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    pub pid: Option<u32>,
    pub port: u16,
    pub started_at: Instant,
}

impl ManagedProcess {
    pub fn new(project: PathBuf, mut child: Child, port: u16) -> Self {
        let stdin = child.stdin.take();
        let pid = child.id();
        Self {
            project,
            child,
            stdin,
            pid,
            port,
            started_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: HashMap<PathBuf, ManagedProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a process. Returns the previous entry, if any, so the caller
    /// can terminate it; a path never maps to two processes.
    pub fn register(&mut self, process: ManagedProcess) -> Option<ManagedProcess> {
        self.processes.insert(process.project.clone(), process)
    }

    pub fn unregister(&mut self, project: &Path) -> Option<ManagedProcess> {
        self.processes.remove(project)
    }

    pub fn get(&self, project: &Path) -> Option<&ManagedProcess> {
        self.processes.get(project)
    }

    pub fn get_mut(&mut self, project: &Path) -> Option<&mut ManagedProcess> {
        self.processes.get_mut(project)
    }

    pub fn contains(&self, project: &Path) -> bool {
        self.processes.contains_key(project)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PathBuf, &mut ManagedProcess)> {
        self.processes.iter_mut()
    }

    pub fn drain(&mut self) -> Vec<ManagedProcess> {
        self.processes.drain().map(|(_, process)| process).collect()
    }
}
