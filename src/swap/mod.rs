mod process;

pub use process::SwapProcess;

use anyhow::Result;
#[cfg(test)]
use mockall::automock;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Lifecycle of a swap process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    NotStarted,
    Running,
    Stopped,
    FailedToStart,
    FailedToStop,
}

/// A supervised swap command.
///
/// The supervision loop only ever talks to swaps through this trait, which
/// keeps the loop testable against mocks.
#[cfg_attr(test, automock)]
pub trait Swap {
    /// Path of the configured command.
    fn path(&self) -> &Path;

    /// OS pid recorded at the most recent launch, -1 if never started.
    fn pid(&self) -> i32;

    fn state(&self) -> SwapState;

    /// Launch the command and begin draining its output in the background.
    fn start(&mut self) -> Result<()>;

    /// Kill the command's direct children, then the command itself, then
    /// reap it.
    fn kill(&mut self) -> Result<()>;

    /// Toggle whether drained output lines are printed. Applies only to
    /// lines read after the call.
    fn show_output(&self, show: bool);

    /// Shared visibility flag read by the output readers.
    fn output_flag(&self) -> Arc<AtomicBool>;
}
