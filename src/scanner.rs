//! The APC scan pipeline.
//!
//! [`ApcScanner`] drives the whole traversal as one lazy iterator:
//!
//! ```text
//! PsActiveProcessHead ─► _EPROCESS ─► ThreadListHead ─► _ETHREAD ─► Tcb.ApcState
//!                                                                    ├─ ApcListHead[0] ─► _KAPC ...
//!                                                                    └─ ApcListHead[1] ─► _KAPC ...
//! ```
//!
//! Each call to `next` advances until one [`ApcRecord`] is ready. Records come out in process
//! list order, then thread list order, then queue index, then link order within the queue.
//! Nothing is buffered beyond the thread currently being read, and dropping the scanner early
//! leaves nothing behind.
//!
//! # Failure handling
//!
//! - A thread whose APC state or one of whose APCs cannot be read is abandoned. Records
//!   already yielded for it stay valid; the failure goes to [`Diagnostics`] and the `debug`
//!   log, and the scan continues with the next thread.
//! - A process or thread object that cannot be decoded is skipped the same way.
//! - A process whose thread list cannot be started is skipped with a
//!   [`DiagnosticCategory::List`] entry; later processes are still scanned.
//! - Corrupted lists are truncated silently by [`crate::list::ListWalker`].
//! - Only a process list that cannot be started is fatal: [`ApcScanner::new`] fails.
//!
//! Diagnostic severities follow [`Diagnostic::from_error`].
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use apcscope::prelude::*;
//!
//! let symbols = SymbolTable::from_file("ntkrnlmp.json")?;
//! let layer = Amd64Layer::new(Physical::new("memory.raw")?, 0x1ad000);
//! let ctx = Context::new(&layer, &symbols);
//!
//! let config = ScanConfig::new()
//!     .with_kernel_base(0xfffff805_1e000000)
//!     .with_pids([4, 1234]);
//! let diagnostics = Diagnostics::new();
//!
//! for record in ApcScanner::new(ctx, &config, &diagnostics)? {
//!     println!("{} {} {:#x} {}", record.pid, record.tid, record.kernel_routine, record.mode);
//! }
//! eprint!("{}", diagnostics.summary());
//! # Ok::<(), apcscope::Error>(())
//! ```

use std::iter::FusedIterator;

use crate::{
    config::ScanConfig,
    diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics},
    object::Context,
    record::{ApcRecord, RecordEmitter, RowSink},
    windows::{
        apc::{ApcQueue, ApcStateView, KERNEL_QUEUE, QUEUE_COUNT},
        process::{
            list_processes, list_threads, process_list_head, ProcessHandle, ProcessIter,
            ThreadHandle, ThreadIter,
        },
    },
    Error, Result,
};

/// The thread whose queues are being walked.
struct ThreadScan<'a> {
    process: ProcessHandle,
    thread: ThreadHandle,
    state: ApcStateView,
    queue: ApcQueue<'a>,
    next_queue: usize,
}

/// Lazy iterator over every queued APC in a memory image.
pub struct ApcScanner<'a> {
    ctx: Context<'a>,
    diagnostics: &'a Diagnostics,
    max_entries: usize,
    processes: ProcessIter<'a>,
    threads: Option<(ProcessHandle, ThreadIter<'a>)>,
    current: Option<ThreadScan<'a>>,
    finished: bool,
}

impl<'a> ApcScanner<'a> {
    /// Starts a scan.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Address space and symbol table of the image
    /// * `config` - Process filter, list bound and process list location
    /// * `diagnostics` - Receives one entry per skipped process or thread
    ///
    /// # Errors
    ///
    /// Returns an error if the process list head cannot be located or read, or if
    /// `_EPROCESS.ActiveProcessLinks` cannot be resolved.
    pub fn new(
        ctx: Context<'a>,
        config: &ScanConfig,
        diagnostics: &'a Diagnostics,
    ) -> Result<Self> {
        let head = process_list_head(ctx, config)?;
        let processes = list_processes(ctx, head, config.pid_filter.clone())?
            .with_max_entries(config.max_list_entries);

        Ok(ApcScanner {
            ctx,
            diagnostics,
            max_entries: config.max_list_entries,
            processes,
            threads: None,
            current: None,
            finished: false,
        })
    }

    /// Runs the scan to completion, emitting every record into `emitter`.
    ///
    /// Returns the number of records emitted by this call.
    pub fn emit_into<S: RowSink>(self, emitter: &mut RecordEmitter<S>) -> usize {
        let before = emitter.emitted();
        for record in self {
            emitter.emit(&record);
        }
        emitter.emitted() - before
    }

    fn skip_thread(&self, thread: &ThreadHandle, error: &Error) {
        log::debug!("Error scanning thread {}: {}", thread.tid, error);
        self.diagnostics.push(
            Diagnostic::from_error(DiagnosticCategory::Thread, error)
                .with_pid(thread.pid)
                .with_tid(thread.tid)
                .with_address(thread.address),
        );
    }

    fn skip_process(&self, process: &ProcessHandle, error: &Error) {
        log::debug!("Error walking threads of process {}: {}", process.pid, error);
        self.diagnostics.push(
            Diagnostic::from_error(DiagnosticCategory::List, error)
                .with_pid(process.pid)
                .with_address(process.address),
        );
    }

    fn start_thread(&mut self, process: ProcessHandle, thread: ThreadHandle) {
        let started = ApcStateView::read(self.ctx, &thread).and_then(|state| {
            let queue = state.queue(self.ctx, KERNEL_QUEUE, self.max_entries)?;
            Ok((state, queue))
        });

        match started {
            Ok((state, queue)) => {
                self.current = Some(ThreadScan {
                    process,
                    thread,
                    state,
                    queue,
                    next_queue: KERNEL_QUEUE + 1,
                });
            }
            Err(error) => self.skip_thread(&thread, &error),
        }
    }

    /// Advances the current thread; returns a record or `None` when the thread is done.
    fn step_thread(&mut self) -> Option<ApcRecord> {
        let scan = self.current.as_mut()?;

        match scan.queue.next() {
            Some(Ok(entry)) => Some(ApcRecord::new(
                &scan.process,
                &scan.thread,
                &scan.state,
                &entry,
            )),
            Some(Err(error)) => {
                let thread = scan.thread;
                self.current = None;
                self.skip_thread(&thread, &error);
                None
            }
            None if scan.next_queue < QUEUE_COUNT => {
                match scan.state.queue(self.ctx, scan.next_queue, self.max_entries) {
                    Ok(queue) => {
                        scan.queue = queue;
                        scan.next_queue += 1;
                    }
                    Err(error) => {
                        let thread = scan.thread;
                        self.current = None;
                        self.skip_thread(&thread, &error);
                    }
                }
                None
            }
            None => {
                self.current = None;
                None
            }
        }
    }
}

impl Iterator for ApcScanner<'_> {
    type Item = ApcRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.current.is_some() {
                if let Some(record) = self.step_thread() {
                    return Some(record);
                }
                continue;
            }

            if let Some((process, threads)) = self.threads.as_mut() {
                match threads.next() {
                    Some(Ok(thread)) => {
                        let process = process.clone();
                        self.start_thread(process, thread);
                    }
                    Some(Err(error)) => {
                        log::debug!("Error reading thread of process {}: {}", process.pid, error);
                        self.diagnostics.push(
                            Diagnostic::from_error(DiagnosticCategory::Thread, &error)
                                .with_pid(process.pid),
                        );
                    }
                    None => self.threads = None,
                }
                continue;
            }

            match self.processes.next() {
                Some(Ok(process)) => match list_threads(self.ctx, &process) {
                    Ok(threads) => {
                        self.threads = Some((process, threads.with_max_entries(self.max_entries)));
                    }
                    Err(error) => self.skip_process(&process, &error),
                },
                Some(Err(error)) => {
                    log::debug!("Error reading process: {}", error);
                    self.diagnostics
                        .push(Diagnostic::from_error(DiagnosticCategory::Process, &error));
                }
                None => self.finished = true,
            }
        }

        None
    }
}

impl FusedIterator for ApcScanner<'_> {}
