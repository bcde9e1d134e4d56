use super::{Swap, SwapState};
use crate::proc::{ProcessList, SystemProcesses};
use anyhow::{Context, Result, bail};
use log::debug;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// A swap command owned by the supervision loop.
///
/// Each started swap gets background reader threads that drain its stdout
/// and stderr for the whole process lifetime. Lines are printed only while
/// the shared visibility flag is set; they are always consumed so the OS
/// pipe buffer never fills up and stalls the child.
pub struct SwapProcess {
    path: PathBuf,
    child: Option<Child>,
    pid: Option<u32>,
    state: SwapState,
    show_output: Arc<AtomicBool>,
    ps: Box<dyn ProcessList>,
}

impl SwapProcess {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            child: None,
            pid: None,
            state: SwapState::NotStarted,
            show_output: Arc::new(AtomicBool::new(false)),
            ps: Box::new(SystemProcesses::new()),
        }
    }

    /// Replace the process lister used to find child processes.
    pub fn with_process_list(mut self, ps: Box<dyn ProcessList>) -> Self {
        self.ps = ps;
        self
    }

    /// Kill every process whose parent pid is `parent`. Direct children
    /// only, grandchildren are left alone. All children are attempted; the
    /// first failure is returned afterwards.
    fn kill_child_processes(&mut self, parent: u32) -> Result<()> {
        let processes = self.ps.processes()?;

        let mut first_failure = None;
        for process in processes {
            if process.parent_pid != Some(parent) {
                continue;
            }

            debug!("killing child process {} (pid {})", process.name, process.pid);

            let killed = signal::kill(Pid::from_raw(process.pid as i32), Signal::SIGKILL)
                .with_context(|| format!("error killing process {}", process.name));
            if let Err(e) = killed {
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Swap for SwapProcess {
    fn path(&self) -> &Path {
        &self.path
    }

    fn pid(&self) -> i32 {
        self.pid.map_or(-1, |p| p as i32)
    }

    fn state(&self) -> SwapState {
        self.state
    }

    fn start(&mut self) -> Result<()> {
        let mut cmd = Command::new(&self.path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = SwapState::FailedToStart;
                return Err(e.into());
            }
        };

        if let Some(stdout) = child.stdout.take() {
            spawn_output_reader(stdout, Arc::clone(&self.show_output));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_reader(stderr, Arc::clone(&self.show_output));
        }

        self.pid = Some(child.id());
        self.child = Some(child);
        self.state = SwapState::Running;

        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        let Some(pid) = self.pid.filter(|_| self.child.is_some()) else {
            bail!("no command to kill");
        };

        // Children go first so none are orphaned and left running.
        if let Err(e) = self.kill_child_processes(pid) {
            self.state = SwapState::FailedToStop;
            return Err(e)
                .with_context(|| format!("error killing child processes for {}", self.path.display()));
        }

        let Some(child) = self.child.as_mut() else {
            bail!("no command to kill");
        };

        if let Err(e) = child.kill() {
            self.state = SwapState::FailedToStop;
            return Err(e).with_context(|| format!("error killing process {}", self.path.display()));
        }

        if let Err(e) = child.wait() {
            self.state = SwapState::FailedToStop;
            return Err(e).with_context(|| {
                format!("error waiting on process to be killed {}", self.path.display())
            });
        }

        self.child = None;
        self.state = SwapState::Stopped;

        Ok(())
    }

    fn show_output(&self, show: bool) {
        self.show_output.store(show, Ordering::Relaxed);
    }

    fn output_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.show_output)
    }
}

/// Drain one output stream line by line until the child closes it.
fn spawn_output_reader<R>(stream: R, visible: Arc<AtomicBool>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };

            // The flag is checked per line, so toggling visibility never
            // applies retroactively.
            if visible.load(Ordering::Relaxed) {
                println!("{line}");
            }
        }
    });
}
