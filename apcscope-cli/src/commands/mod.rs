pub mod apc;
pub mod common;
pub mod pslist;
