//! The polling supervision loop.

pub mod actions;

pub use actions::{Action, OutputSwitch, SwapOutput};

use crate::proc::{PriorityExecutable, ProcessList};
use crate::swap::Swap;
use anyhow::Result;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default seconds between polls of the process table.
const DEFAULT_POLL_INTERVAL: u64 = 10;

/// One configured swap and its supervision bookkeeping.
struct SwapSlot {
    swap: Box<dyn Swap>,
    running: bool,
    stop_failures: u32,
}

/// The supervision loop.
///
/// Polls the process table, and swaps running processes for priority
/// executables: when any priority executable appears all running swaps are
/// stopped, and when none are running the swaps are started again.
///
/// All state lives on the instance; independent loops do not interfere
/// with each other.
pub struct Loop {
    /// Number of cycles to run; 0 means run forever.
    limit: u32,
    loop_count: u32,
    poll_interval: u64,
    priorities: Vec<PriorityExecutable>,
    /// Script run once each time priorities go from inactive to active.
    priority_script: Option<PathBuf>,
    ps: Box<dyn ProcessList>,
    /// Whether the swap processes are currently running.
    started: bool,
    slots: Vec<SwapSlot>,
    actions_enabled: bool,
    output_switch: Arc<OutputSwitch>,
}

impl Loop {
    pub fn new(ps: Box<dyn ProcessList>) -> Self {
        Self {
            limit: 0,
            loop_count: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            priorities: Vec::new(),
            priority_script: None,
            ps,
            started: false,
            slots: Vec::new(),
            actions_enabled: false,
            output_switch: Arc::new(OutputSwitch::new()),
        }
    }

    pub fn with_priorities(mut self, priorities: Vec<PriorityExecutable>) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn with_swaps(mut self, swaps: Vec<Box<dyn Swap>>) -> Self {
        self.slots = swaps
            .into_iter()
            .map(|swap| SwapSlot {
                swap,
                running: false,
                stop_failures: 0,
            })
            .collect();
        self
    }

    pub fn with_priority_script(mut self, script: PathBuf) -> Self {
        self.priority_script = Some(script);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, seconds: u64) -> Self {
        self.poll_interval = seconds;
        self
    }

    pub fn with_actions_enabled(mut self, enabled: bool) -> Self {
        self.actions_enabled = enabled;
        self
    }

    /// Run cycles until the limit is reached, or forever if there is none.
    ///
    /// Internal errors never end the loop; they are logged and the loop
    /// retries at the next poll.
    pub fn run(&mut self) {
        if self.actions_enabled {
            let actions = actions::default_actions(Arc::clone(&self.output_switch));
            actions::print_action_descriptions(&actions);
            actions::spawn_listener(actions);
        }

        loop {
            if self.done() {
                break;
            }

            self.cycle();
            self.wait();
        }
    }

    fn done(&self) -> bool {
        self.limit > 0 && self.loop_count >= self.limit
    }

    fn wait(&self) {
        thread::sleep(Duration::from_secs(self.poll_interval));
    }

    fn cycle(&mut self) {
        match self.list_running_priorities() {
            Ok(running_priorities) => self.transition(&running_priorities),
            // No transition under uncertainty; retry at the next poll.
            Err(e) => error!("error listing currently running processes: {e:#}"),
        }

        self.loop_count += 1;
    }

    /// The names of configured priorities present in the current process
    /// table, deduplicated and sorted for reproducible logs.
    fn list_running_priorities(&mut self) -> Result<Vec<String>> {
        let processes = self.ps.processes()?;

        let running: std::collections::HashSet<String> =
            processes.into_iter().map(|p| p.name.to_lowercase()).collect();

        let mut names: Vec<String> = self
            .priorities
            .iter()
            .filter(|priority| running.contains(&priority.name().to_lowercase()))
            .map(|priority| priority.name().to_string())
            .collect();

        names.sort_by_key(|name| name.to_lowercase());
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));

        Ok(names)
    }

    fn transition(&mut self, running_priorities: &[String]) {
        let first_cycle = self.loop_count == 0;
        let any_running = !running_priorities.is_empty();

        if any_running && !self.started && first_cycle {
            warn!(
                "not starting swap processes, priority processes already running: {}",
                running_priorities.join(", ")
            );
        } else if any_running && self.started {
            info!("priority {}", running_priorities.join(", "));

            self.started = false;
            self.stop_swaps();
            self.run_priority_script();
        } else if !any_running && !self.started {
            self.started = true;
            self.start_swaps();
        }
        // Remaining cases: priorities still running while everything is
        // stopped, or swaps already running with nothing to preempt them.
    }

    /// Start every configured swap that is not already running. A failure
    /// excludes that swap from the running set but never aborts the batch.
    fn start_swaps(&mut self) {
        for slot in &mut self.slots {
            if slot.running {
                continue;
            }

            match slot.swap.start() {
                Ok(()) => {
                    info!(
                        "start {} (pid {})",
                        slot.swap.path().display(),
                        slot.swap.pid()
                    );
                    slot.running = true;
                }
                Err(e) => {
                    error!(
                        "error starting swap process {}: {e:#}",
                        slot.swap.path().display()
                    );
                }
            }
        }

        self.refresh_output_switch();
    }

    /// Kill every running swap. A swap whose kill fails stays in the
    /// running set and is retried at the next stop edge.
    fn stop_swaps(&mut self) {
        for slot in &mut self.slots {
            if !slot.running {
                continue;
            }

            match slot.swap.kill() {
                Ok(()) => {
                    info!("stop {}", slot.swap.path().display());
                    slot.running = false;
                    slot.stop_failures = 0;
                }
                Err(e) => {
                    slot.stop_failures += 1;
                    if slot.stop_failures > 1 {
                        error!(
                            "error stopping swap process {} (still failing after {} attempts): {e:#}",
                            slot.swap.path().display(),
                            slot.stop_failures
                        );
                    } else {
                        error!(
                            "error stopping swap process {}: {e:#}",
                            slot.swap.path().display()
                        );
                    }
                }
            }
        }

        self.refresh_output_switch();
    }

    /// Hand the listener fresh visibility handles for the running swaps.
    fn refresh_output_switch(&self) {
        let outputs = self
            .slots
            .iter()
            .filter(|slot| slot.running)
            .map(|slot| SwapOutput {
                path: slot.swap.path().display().to_string(),
                visible: slot.swap.output_flag(),
            })
            .collect();

        self.output_switch.replace(outputs);
    }

    /// Run the priority script, waiting for it to complete. Failures are
    /// logged and never fatal to the loop.
    fn run_priority_script(&mut self) {
        let Some(script) = &self.priority_script else {
            return;
        };

        info!("priority script {}", script.display());

        match Command::new(script).status() {
            Ok(status) if status.success() => {
                info!("priority script completed successfully");
            }
            Ok(status) => {
                warn!("priority script exited with non-zero code: {:?}", status.code());
            }
            Err(e) => {
                error!("error running priority script {}: {e}", script.display());
            }
        }
    }
}

/// Reject configurations where a swap basename is also a priority
/// basename. Comparison is case-insensitive, like all priority matching.
pub fn validate_disjoint(priorities: &[PriorityExecutable], swaps: &[PathBuf]) -> Result<()> {
    for swap in swaps {
        let name = basename(swap);
        if priorities.iter().any(|priority| priority.matches(name)) {
            anyhow::bail!("{name} found in both priorities and swaps, this would be bad; exiting");
        }
    }

    Ok(())
}

fn basename(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{MockProcessList, ProcessInfo};
    use crate::swap::MockSwap;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    fn priority(path: &str) -> PriorityExecutable {
        PriorityExecutable::new(PathBuf::from(path))
    }

    fn process(name: &str) -> ProcessInfo {
        ProcessInfo {
            pid: 1234,
            parent_pid: Some(1),
            name: name.to_string(),
        }
    }

    /// A mock swap expecting `starts` start calls and `kills` kill calls.
    fn mock_swap(starts: usize, kills: usize) -> MockSwap {
        let mut swap = MockSwap::new();
        swap.expect_path().return_const(PathBuf::from("swap.sh"));
        swap.expect_pid().return_const(42);
        swap.expect_output_flag()
            .returning(|| Arc::new(AtomicBool::new(false)));
        swap.expect_start().times(starts).returning(|| Ok(()));
        swap.expect_kill().times(kills).returning(|| Ok(()));
        swap
    }

    fn empty_snapshots() -> MockProcessList {
        let mut ps = MockProcessList::new();
        ps.expect_processes().returning(|| Ok(vec![]));
        ps
    }

    #[test]
    fn test_starts_swaps_after_one_cycle_without_priorities() {
        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(mock_swap(1, 0))];

        let mut swap_loop = Loop::new(Box::new(empty_snapshots()))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(1)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(swap_loop.started);
        assert!(swap_loop.slots[0].running);
    }

    #[test]
    fn test_priority_on_first_cycle_blocks_start() {
        let mut ps = MockProcessList::new();
        ps.expect_processes()
            .returning(|| Ok(vec![process("APPA.exe")]));

        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(mock_swap(0, 0))];

        let mut swap_loop = Loop::new(Box::new(ps))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(1)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(!swap_loop.started);
        assert!(!swap_loop.slots[0].running);
    }

    #[test]
    fn test_priority_appearing_stops_running_swaps() {
        // First cycle: nothing running, swaps start. Second cycle: the
        // priority appears, swaps are killed.
        let mut ps = MockProcessList::new();
        let mut calls = 0;
        ps.expect_processes().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![])
            } else {
                Ok(vec![process("appa.exe")])
            }
        });

        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(mock_swap(1, 1))];

        let mut swap_loop = Loop::new(Box::new(ps))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(2)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(!swap_loop.started);
        assert!(!swap_loop.slots[0].running);
    }

    #[test]
    fn test_priority_script_runs_once_per_edge() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let script = dir.path().join("priority.sh");
        fs::write(
            &script,
            format!("#!/bin/sh\necho ran >> {}\n", marker.display()),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        // Start, stop (script fires), then two more cycles with the
        // priority still running where nothing further happens.
        let mut ps = MockProcessList::new();
        let mut calls = 0;
        ps.expect_processes().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![])
            } else {
                Ok(vec![process("appa.exe")])
            }
        });

        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(mock_swap(1, 1))];

        let mut swap_loop = Loop::new(Box::new(ps))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_priority_script(script)
            .with_limit(4)
            .with_poll_interval(0);

        swap_loop.run();

        let ran = fs::read_to_string(&marker).unwrap();
        assert_eq!(ran.lines().count(), 1);
    }

    #[test]
    fn test_listing_error_skips_transition() {
        let mut ps = MockProcessList::new();
        ps.expect_processes()
            .returning(|| Err(anyhow::anyhow!("error listing processes")));

        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(mock_swap(0, 0))];

        let mut swap_loop = Loop::new(Box::new(ps))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(2)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(!swap_loop.started);
        assert_eq!(swap_loop.loop_count, 2);
    }

    #[test]
    fn test_unchanged_snapshots_are_idempotent() {
        // Three cycles without priorities issue exactly one start and no
        // kills.
        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(mock_swap(1, 0))];

        let mut swap_loop = Loop::new(Box::new(empty_snapshots()))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(3)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(swap_loop.started);
    }

    #[test]
    fn test_failed_start_excludes_swap_but_loop_continues() {
        let mut failing = MockSwap::new();
        failing
            .expect_path()
            .return_const(PathBuf::from("missing.sh"));
        failing
            .expect_start()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("exec error")));
        failing.expect_kill().times(0);
        failing
            .expect_output_flag()
            .returning(|| Arc::new(AtomicBool::new(false)));

        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(failing), Box::new(mock_swap(1, 0))];

        let mut swap_loop = Loop::new(Box::new(empty_snapshots()))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(1)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(swap_loop.started);
        assert!(!swap_loop.slots[0].running);
        assert!(swap_loop.slots[1].running);
    }

    #[test]
    fn test_failed_kill_retries_on_next_stop_edge() {
        // Cycle 1: start. Cycle 2: priority appears, kill fails, the swap
        // stays in the running set. Cycle 3: priority gone; the still
        // running swap must not be started again. Cycle 4: priority back,
        // kill retried and succeeds.
        let mut ps = MockProcessList::new();
        let mut calls = 0;
        ps.expect_processes().returning(move || {
            calls += 1;
            match calls {
                1 | 3 => Ok(vec![]),
                _ => Ok(vec![process("appa.exe")]),
            }
        });

        let mut swap = MockSwap::new();
        swap.expect_path().return_const(PathBuf::from("swap.sh"));
        swap.expect_pid().return_const(42);
        swap.expect_output_flag()
            .returning(|| Arc::new(AtomicBool::new(false)));
        swap.expect_start().times(1).returning(|| Ok(()));
        let mut kill_calls = 0;
        swap.expect_kill().times(2).returning(move || {
            kill_calls += 1;
            if kill_calls == 1 {
                Err(anyhow::anyhow!("error stopping swap"))
            } else {
                Ok(())
            }
        });

        let swaps: Vec<Box<dyn Swap>> = vec![Box::new(swap)];

        let mut swap_loop = Loop::new(Box::new(ps))
            .with_priorities(vec![priority("/apps/appA.exe")])
            .with_swaps(swaps)
            .with_limit(4)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(!swap_loop.slots[0].running);
        assert_eq!(swap_loop.slots[0].stop_failures, 0);
    }

    #[test]
    fn test_running_priorities_are_sorted_and_deduplicated() {
        let mut ps = MockProcessList::new();
        ps.expect_processes().returning(|| {
            Ok(vec![
                process("zeta.exe"),
                process("Alpha.exe"),
                process("alpha.exe"),
            ])
        });

        let mut swap_loop = Loop::new(Box::new(ps)).with_priorities(vec![
            priority("/apps/zeta.exe"),
            priority("/apps/Alpha.exe"),
            priority("/apps/alpha.exe"),
        ]);

        let names = swap_loop.list_running_priorities().unwrap();

        assert_eq!(names.len(), 2);
        assert!(names[0].eq_ignore_ascii_case("alpha.exe"));
        assert_eq!(names[1], "zeta.exe");
    }

    #[test]
    #[serial]
    fn test_one_cycle_with_real_echo_swap() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("echo.sh");
        fs::write(&script, "#!/bin/sh\necho swapped\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let swaps: Vec<Box<dyn Swap>> =
            vec![Box::new(crate::swap::SwapProcess::new(script))];

        let mut swap_loop = Loop::new(Box::new(crate::proc::SystemProcesses::new()))
            .with_swaps(swaps)
            .with_limit(1)
            .with_poll_interval(0);

        swap_loop.run();

        assert!(swap_loop.started);
        assert!(swap_loop.slots[0].running);
        assert!(swap_loop.slots[0].swap.pid() > 0);
    }

    #[test]
    fn test_validate_disjoint_rejects_overlap() {
        let priorities = vec![priority("/apps/appA.exe")];

        let overlapping = vec![PathBuf::from("/swaps/APPA.EXE")];
        assert!(validate_disjoint(&priorities, &overlapping).is_err());

        let distinct = vec![PathBuf::from("/swaps/swap.sh")];
        assert!(validate_disjoint(&priorities, &distinct).is_ok());
    }
}
