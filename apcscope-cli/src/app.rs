use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// apcscope - list queued Asynchronous Procedure Calls in Windows kernel memory images
#[derive(Debug, Parser)]
#[command(name = "apcscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Where the image and its symbols come from, and how addresses are translated.
#[derive(Debug, Args)]
pub struct ImageOptions {
    /// Path to the memory image.
    #[arg(value_name = "IMAGE")]
    pub path: PathBuf,

    /// ISF symbol table (JSON) of the kernel build in the image.
    #[arg(long, value_name = "FILE")]
    pub isf: PathBuf,

    /// Directory table base (CR3) for x86-64 paging, hex like 0x1ad000 or decimal.
    #[arg(long, value_name = "ADDRESS", conflicts_with = "segment")]
    pub dtb: Option<String>,

    /// Map LEN bytes at file offset OFF to virtual address VA. Repeatable.
    #[arg(long, value_name = "VA:OFF:LEN")]
    pub segment: Vec<String>,

    /// Kernel load address the ISF symbol offsets are relative to.
    #[arg(long, value_name = "ADDRESS", default_value = "0")]
    pub kernel_base: String,

    /// Address of PsActiveProcessHead, overriding the symbol lookup.
    #[arg(long, value_name = "ADDRESS")]
    pub ps_head: Option<String>,

    /// Maximum number of entries followed in any one kernel list.
    #[arg(long, value_name = "N")]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the APCs queued on every thread.
    Apc {
        #[command(flatten)]
        image: ImageOptions,

        /// Only scan processes with this ID. Repeatable.
        #[arg(short, long, value_name = "PID")]
        pid: Vec<u64>,
    },

    /// List the processes in the active process list.
    Pslist {
        #[command(flatten)]
        image: ImageOptions,
    },
}
