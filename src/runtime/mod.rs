//! Rama's process runtime
//!
//! Containers are supervised processes, not sandboxes: this module starts
//! them, tracks their identity and stops them.

pub mod process;
pub mod syscall;

pub use process::{
    spawn, Liveness, ProcessConfig, ProcessHandle, StopPolicy, Termination,
};
