pub mod discovery;
pub mod snapshot;

pub use discovery::{PriorityExecutable, list_executables};
pub use snapshot::{ProcessInfo, ProcessList, SystemProcesses};

#[cfg(test)]
pub use snapshot::MockProcessList;
