//! Windows kernel object model.
//!
//! - [`process`] - Process and thread enumeration over the kernel's object lists
//! - [`apc`] - Per-thread `_KAPC_STATE` decoding and APC queue reconstruction

pub mod apc;
pub mod process;

pub use apc::{scan_thread, ApcEntry, ApcMode, ApcQueue, ApcStateView, ThreadOutcome};
pub use process::{
    list_processes, list_threads, process_list_head, ProcessHandle, ProcessIter, ThreadHandle,
    ThreadIter,
};
