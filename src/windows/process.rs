//! Process and thread enumeration.
//!
//! Processes are found by walking the kernel's `PsActiveProcessHead` list through
//! `_EPROCESS.ActiveProcessLinks`, the threads of a process by walking
//! `_EPROCESS.ThreadListHead` through `_ETHREAD.ThreadListEntry`. Both walks use
//! [`crate::list::ListWalker`] and therefore terminate on corrupted lists.
//!
//! Enumeration is lazy. [`ProcessIter`] and [`ThreadIter`] yield one `Result` per object:
//! an object that cannot be decoded is reported as an `Err` item and the iteration moves
//! on to the next one. Only the failure to start a walk is returned from
//! [`list_processes`] / [`list_threads`] themselves.

use std::iter::FusedIterator;

use serde::Serialize;

use crate::{
    config::{PidFilter, ScanConfig},
    list::{ListWalker, DEFAULT_MAX_LIST_ENTRIES},
    object::{Context, StructReader},
    Result,
};

/// Upper bound on the number of bytes decoded from `_EPROCESS.ImageFileName`.
pub const IMAGE_NAME_MAX: usize = 256;

/// A process found in the process list.
///
/// Only valid for the enumeration pass that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    /// Address of the `_EPROCESS`
    pub address: u64,
    /// `UniqueProcessId`
    pub pid: u64,
    /// `ImageFileName`, truncated by the kernel to 15 bytes and decoded lossily
    pub name: String,
}

/// A thread found in a process's thread list.
///
/// Both IDs come from the thread's own `Cid`; in a damaged image `pid` can differ from
/// the ID of the process the thread was listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadHandle {
    /// Address of the `_ETHREAD`
    pub address: u64,
    /// `Cid.UniqueProcess`
    pub pid: u64,
    /// `Cid.UniqueThread`
    pub tid: u64,
}

/// Locates `PsActiveProcessHead`.
///
/// An explicit [`ScanConfig::process_list_head`] wins; otherwise the symbol is looked up and
/// relocated by [`ScanConfig::kernel_base`].
///
/// # Errors
///
/// Returns [`crate::Error::SymbolNotFound`] if neither source is available.
pub fn process_list_head(ctx: Context<'_>, config: &ScanConfig) -> Result<u64> {
    if let Some(address) = config.process_list_head {
        log::debug!("Using PsActiveProcessHead override {:#x}", address);
        return Ok(address);
    }

    let rva = ctx.symbols.symbol_address("PsActiveProcessHead")?;
    let head = config.kernel_base.wrapping_add(rva);
    log::debug!("PsActiveProcessHead at {:#x}", head);
    Ok(head)
}

/// Decodes the `_EPROCESS` at `address`.
///
/// # Errors
///
/// Returns the field access error of the first member that cannot be read.
pub fn read_process(ctx: Context<'_>, address: u64) -> Result<ProcessHandle> {
    let process = StructReader::new(ctx, address, "_EPROCESS");

    let pid = process.read_pointer("UniqueProcessId")?;
    let name = process.read_string("ImageFileName", IMAGE_NAME_MAX)?;

    Ok(ProcessHandle { address, pid, name })
}

/// Decodes the `_ETHREAD` at `address`.
///
/// # Errors
///
/// Returns the field access error of the first member that cannot be read.
pub fn read_thread(ctx: Context<'_>, address: u64) -> Result<ThreadHandle> {
    let cid = StructReader::new(ctx, address, "_ETHREAD").member("Cid")?;

    Ok(ThreadHandle {
        address,
        pid: cid.read_pointer("UniqueProcess")?,
        tid: cid.read_pointer("UniqueThread")?,
    })
}

/// Starts enumerating the processes linked into the list at `head`.
///
/// When `filter` is given, processes whose ID is not in it are skipped.
///
/// # Errors
///
/// Returns an error if `_EPROCESS.ActiveProcessLinks` cannot be resolved or the list head
/// cannot be read.
pub fn list_processes<'a>(
    ctx: Context<'a>,
    head: u64,
    filter: Option<PidFilter>,
) -> Result<ProcessIter<'a>> {
    ctx.read_pointer(head)?;
    let walker = ListWalker::new(ctx, head, "_EPROCESS", "ActiveProcessLinks")?;

    Ok(ProcessIter {
        ctx,
        walker,
        filter,
        walked: 0,
        max_entries: DEFAULT_MAX_LIST_ENTRIES,
        finished: false,
    })
}

/// Iterator over the processes of one process list.
pub struct ProcessIter<'a> {
    ctx: Context<'a>,
    walker: ListWalker<'a>,
    filter: Option<PidFilter>,
    walked: usize,
    max_entries: usize,
    finished: bool,
}

impl ProcessIter<'_> {
    /// Sets the maximum number of list entries followed.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.walker = self.walker.with_max_entries(max_entries);
        self.max_entries = max_entries;
        self
    }
}

impl Iterator for ProcessIter<'_> {
    type Item = Result<ProcessHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let Some(address) = self.walker.next() else {
                if self.walked >= self.max_entries {
                    log::warn!(
                        "Process list hit the limit of {} entries, results may be truncated",
                        self.max_entries
                    );
                }
                log::debug!("Process list walk ended after {} entries", self.walked);
                self.finished = true;
                return None;
            };
            self.walked += 1;

            match read_process(self.ctx, address) {
                Ok(process) => {
                    if let Some(filter) = &self.filter {
                        if !filter.contains(process.pid) {
                            continue;
                        }
                    }
                    log::trace!(
                        "Process {} ({}) at {:#x}",
                        process.pid,
                        process.name,
                        address
                    );
                    return Some(Ok(process));
                }
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

impl FusedIterator for ProcessIter<'_> {}

/// Starts enumerating the threads of `process`.
///
/// # Errors
///
/// Returns an error if `_EPROCESS.ThreadListHead` or `_ETHREAD.ThreadListEntry` cannot be
/// resolved or the list head cannot be read.
pub fn list_threads<'a>(ctx: Context<'a>, process: &ProcessHandle) -> Result<ThreadIter<'a>> {
    let head =
        StructReader::new(ctx, process.address, "_EPROCESS").field_address("ThreadListHead")?;
    ctx.read_pointer(head)?;

    Ok(ThreadIter {
        ctx,
        walker: ListWalker::new(ctx, head, "_ETHREAD", "ThreadListEntry")?,
    })
}

/// Iterator over the threads of one process.
pub struct ThreadIter<'a> {
    ctx: Context<'a>,
    walker: ListWalker<'a>,
}

impl ThreadIter<'_> {
    /// Sets the maximum number of list entries followed.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.walker = self.walker.with_max_entries(max_entries);
        self
    }
}

impl Iterator for ThreadIter<'_> {
    type Item = Result<ThreadHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.walker.next()?;
        Some(read_thread(self.ctx, address))
    }
}

impl FusedIterator for ThreadIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{self, image::*, ImageBuilder},
        Error,
    };

    #[test]
    fn list_head() {
        let symbols = test::symbols();
        let layer = test::layer(ImageBuilder::new());
        let ctx = Context::new(&layer, &symbols);

        let config = ScanConfig::new().with_kernel_base(BASE);
        assert_eq!(process_list_head(ctx, &config).unwrap(), PS_ACTIVE_PROCESS_HEAD);

        let config = config.with_process_list_head(0xffff_f800_1234_0000);
        assert_eq!(process_list_head(ctx, &config).unwrap(), 0xffff_f800_1234_0000);

        let symbols = crate::SymbolTable::from_isf_str(
            &ISF.replace("PsActiveProcessHead", "PsInitialSystemProcess"),
        )
        .unwrap();
        let ctx = Context::new(&layer, &symbols);
        assert!(matches!(
            process_list_head(ctx, &ScanConfig::new()),
            Err(Error::SymbolNotFound(_))
        ));
    }

    #[test]
    fn processes_and_threads() {
        let mut image = ImageBuilder::new();
        let system = image.process(4, "System");
        let t1 = image.thread(system, 8);
        let t2 = image.thread(system, 12);
        let explorer = image.process(1234, "explorer.exe");
        let t3 = image.thread_with_cid(explorer, 999, 1300);
        let symbols = test::symbols();
        let layer = test::layer(image);
        let ctx = Context::new(&layer, &symbols);

        let processes: Vec<_> = list_processes(ctx, PS_ACTIVE_PROCESS_HEAD, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            processes,
            vec![
                ProcessHandle {
                    address: system,
                    pid: 4,
                    name: "System".to_string()
                },
                ProcessHandle {
                    address: explorer,
                    pid: 1234,
                    name: "explorer.exe".to_string()
                },
            ]
        );

        let threads: Vec<_> = list_threads(ctx, &processes[0])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            threads,
            vec![
                ThreadHandle {
                    address: t1,
                    pid: 4,
                    tid: 8
                },
                ThreadHandle {
                    address: t2,
                    pid: 4,
                    tid: 12
                },
            ]
        );

        let threads: Vec<_> = list_threads(ctx, &processes[1])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            threads,
            vec![ThreadHandle {
                address: t3,
                pid: 999,
                tid: 1300
            }]
        );
    }

    #[test]
    fn pid_filter() {
        let mut image = ImageBuilder::new();
        image.process(4, "System");
        image.process(88, "Registry");
        image.process(1234, "explorer.exe");
        let symbols = test::symbols();
        let layer = test::layer(image);
        let ctx = Context::new(&layer, &symbols);

        let pids: Vec<u64> = list_processes(
            ctx,
            PS_ACTIVE_PROCESS_HEAD,
            Some(PidFilter::new([1234, 4, 77])),
        )
        .unwrap()
        .map(|process| process.unwrap().pid)
        .collect();
        assert_eq!(pids, vec![4, 1234]);
    }

    #[test]
    fn long_names_are_truncated() {
        let mut image = ImageBuilder::new();
        image.process(4200, "MsMpEngCP.exe_with_suffix");
        let symbols = test::symbols();
        let layer = test::layer(image);
        let ctx = Context::new(&layer, &symbols);

        let process = list_processes(ctx, PS_ACTIVE_PROCESS_HEAD, None)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(process.name, "MsMpEngCP.exe_w");
    }

    #[test]
    fn undecodable_process_is_reported_and_skipped() {
        let mut image = ImageBuilder::new();
        image.process(4, "System");
        let broken = image.process(88, "Registry");
        image.process(1234, "explorer.exe");
        image.unmap(broken + EPROCESS_UNIQUE_PROCESS_ID, 8);
        let symbols = test::symbols();
        let layer = test::layer(image);
        let ctx = Context::new(&layer, &symbols);

        let results: Vec<_> = list_processes(ctx, PS_ACTIVE_PROCESS_HEAD, None)
            .unwrap()
            .collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().pid, 4);
        assert!(matches!(results[1], Err(Error::Unreadable { .. })));
        assert_eq!(results[2].as_ref().unwrap().pid, 1234);
    }

    #[test]
    fn max_entries() {
        let mut image = ImageBuilder::new();
        for pid in 0..10 {
            image.process(pid * 4, "svchost.exe");
        }
        let symbols = test::symbols();
        let layer = test::layer(image);
        let ctx = Context::new(&layer, &symbols);

        let count = list_processes(ctx, PS_ACTIVE_PROCESS_HEAD, None)
            .unwrap()
            .with_max_entries(3)
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn start_failures() {
        let mut image = ImageBuilder::new();
        let system = image.process(4, "System");
        let registry = image.process(88, "Registry");
        image.unmap(system + EPROCESS_THREAD_LIST_HEAD, 16);
        let symbols = test::symbols();
        let layer = test::layer(image);
        let ctx = Context::new(&layer, &symbols);

        assert!(matches!(
            list_processes(ctx, BASE + SIZE as u64, None),
            Err(Error::Unreadable { .. })
        ));

        let process = read_process(ctx, system).unwrap();
        assert!(matches!(
            list_threads(ctx, &process),
            Err(Error::Unreadable { .. })
        ));

        let symbols =
            crate::SymbolTable::from_isf_str(&ISF.replace("ThreadListEntry", "ThreadListEntryX"))
                .unwrap();
        let ctx = Context::new(&layer, &symbols);
        let process = read_process(ctx, registry).unwrap();
        assert!(matches!(
            list_threads(ctx, &process),
            Err(Error::BadOffset { .. })
        ));
    }
}
