mod registry;
mod selectors;

pub use registry::{DispatchMode, PayloadShape, PollPolicy, TargetRegistry, TargetSpec};
pub use selectors::{Fallback, SelectionError, TargetSelection, TargetSelector};
