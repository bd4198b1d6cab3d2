//! Simulation plumbing that lives outside the core: the process-backed runner and the
//! built-in `external` descriptor.

pub mod external;
pub mod process;

pub use process::ProcessRunner;
