use anyhow::Result;
#[cfg(test)]
use mockall::automock;
use sysinfo::System;

/// One process observed in a snapshot of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
}

/// Source of process-table snapshots.
///
/// Each call returns the processes running right now; snapshots are never
/// cached across calls.
#[cfg_attr(test, automock)]
pub trait ProcessList {
    fn processes(&mut self) -> Result<Vec<ProcessInfo>>;
}

/// Process lister backed by the OS process table.
pub struct SystemProcesses {
    sys: System,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessList for SystemProcesses {
    fn processes(&mut self) -> Result<Vec<ProcessInfo>> {
        self.sys.refresh_processes();

        Ok(self
            .sys
            .processes()
            .iter()
            .map(|(pid, proc)| ProcessInfo {
                pid: pid.as_u32(),
                parent_pid: proc.parent().map(|p| p.as_u32()),
                name: proc.name().to_string(),
            })
            .collect())
    }
}
