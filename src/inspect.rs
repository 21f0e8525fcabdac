//! OS process inspection.
//!
//! Enumerates processes with their working directories (sysinfo) and finds
//! listening TCP sockets by pid or by port (`lsof`). These calls block, so
//! callers run them on the blocking pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;

use sysinfo::{ProcessRefreshKind, System, UpdateKind};
use tracing::debug;

use crate::error::{ManagerError, Result};

/// A process as seen in the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cwd: PathBuf,
}

pub trait ProcessInspector: Send + Sync {
    /// All processes whose working directory could be read.
    fn processes(&self) -> Result<Vec<ProcessInfo>>;

    /// Listening TCP ports held by any of `pids`, first port per pid.
    fn listening_ports(&self, pids: &[u32]) -> Result<HashMap<u32, u16>>;

    /// Pids holding a listening socket on `port`.
    fn pids_on_port(&self, port: u16) -> Result<Vec<u32>>;
}

/// Inspector backed by sysinfo and lsof.
#[derive(Debug, Default)]
pub struct SystemInspector;

impl ProcessInspector for SystemInspector {
    fn processes(&self) -> Result<Vec<ProcessInfo>> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cwd(UpdateKind::Always));
        let processes: Vec<ProcessInfo> = sys
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let cwd = process.cwd()?;
                if cwd.as_os_str().is_empty() {
                    return None;
                }
                Some(ProcessInfo {
                    pid: pid.as_u32(),
                    cwd: cwd.to_path_buf(),
                })
            })
            .collect();
        debug!(count = processes.len(), "enumerated processes");
        Ok(processes)
    }

    fn listening_ports(&self, pids: &[u32]) -> Result<HashMap<u32, u16>> {
        if pids.is_empty() {
            return Ok(HashMap::new());
        }
        let pid_list = pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let stdout = run_lsof(&[
            "-nP",
            "-a",
            "-p",
            &pid_list,
            "-iTCP",
            "-sTCP:LISTEN",
            "-Fpn",
        ])?;
        Ok(parse_lsof_fields(&stdout))
    }

    fn pids_on_port(&self, port: u16) -> Result<Vec<u32>> {
        let selector = format!("-iTCP:{}", port);
        let stdout = run_lsof(&["-nP", "-t", &selector, "-sTCP:LISTEN"])?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect())
    }
}

// lsof exits 1 when nothing matches; that is an empty answer, not a failure.
fn run_lsof(args: &[&str]) -> Result<String> {
    let output = Command::new("lsof")
        .args(args)
        .output()
        .map_err(|err| ManagerError::ProcessLookupFailed(format!("lsof: {}", err)))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() || output.status.code() == Some(1) || !stdout.trim().is_empty() {
        return Ok(stdout);
    }
    Err(ManagerError::ProcessLookupFailed(format!(
        "lsof exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

/// Parses `lsof -Fpn` output: `p<pid>` lines followed by `n<addr>:<port>`.
pub fn parse_lsof_fields(stdout: &str) -> HashMap<u32, u16> {
    let mut ports = HashMap::new();
    let mut current = None;
    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            current = pid.trim().parse::<u32>().ok();
        } else if let Some(name) = line.strip_prefix('n') {
            let Some(pid) = current else { continue };
            let port = name
                .rsplit_once(':')
                .and_then(|(_, port)| port.trim().parse::<u16>().ok());
            if let Some(port) = port {
                ports.entry(pid).or_insert(port);
            }
        }
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_lsof_fields_keeps_first_port_per_pid() {
        let out = "p101\nf23\nn*:3000\nf24\nn[::1]:3001\np202\nf5\nn127.0.0.1:8080\n";
        let ports = parse_lsof_fields(out);
        assert_eq!(ports.get(&101), Some(&3000));
        assert_eq!(ports.get(&202), Some(&8080));
        assert_eq!(ports.len(), 2);
    }

    #[test]
    fn parse_lsof_fields_ignores_garbage() {
        let ports = parse_lsof_fields("nfoo\npxyz\nn*:1234\n");
        assert!(ports.is_empty());
    }
}
