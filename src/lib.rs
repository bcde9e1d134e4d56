pub mod common;
pub mod proc;
pub mod supervisor;
pub mod swap;

pub use proc::{PriorityExecutable, ProcessInfo, ProcessList, SystemProcesses};
pub use supervisor::Loop;
pub use swap::{Swap, SwapProcess, SwapState};
