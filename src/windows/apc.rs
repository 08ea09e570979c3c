//! Reconstruction of the APC queues of a thread.
//!
//! Every `_KTHREAD` embeds a `_KAPC_STATE` (`Tcb.ApcState`) holding two list heads, one per
//! processor mode, plus the flags describing delivery in progress or pending:
//!
//! ```text
//! _KAPC_STATE
//!   ApcListHead[0]   kernel-mode queue ─┐
//!   ApcListHead[1]   user-mode queue    │   _KAPC                _KAPC
//!   InProgressFlags  bit 0 / bit 1      └─► ApcListEntry ──────► ApcListEntry ──► ...
//!   KernelApcPending                        KernelRoutine        KernelRoutine
//!   UserApcPending                          NormalRoutine        NormalRoutine
//!                                           ApcMode, Inserted    ApcMode, Inserted
//! ```
//!
//! [`ApcStateView::read`] decodes the state of one thread, [`ApcStateView::queue`] walks one
//! of its queues and yields an [`ApcEntry`] per queued `_KAPC`. [`scan_thread`] does both for
//! both queues and returns the whole outcome for one thread.
//!
//! The mode reported for an entry always comes from the entry's own `ApcMode` field, never
//! from the queue it was found in.

use serde::Serialize;
use strum::Display;

use crate::{
    list::ListWalker,
    object::{Context, StructReader},
    windows::process::ThreadHandle,
    Error, Result,
};

/// Index of the kernel-mode queue in `ApcListHead`.
pub const KERNEL_QUEUE: usize = 0;
/// Index of the user-mode queue in `ApcListHead`.
pub const USER_QUEUE: usize = 1;
/// Number of APC queues per thread.
pub const QUEUE_COUNT: usize = 2;

/// `InProgressFlags` bit set while a normal kernel APC is delivered.
pub const KERNEL_APC_IN_PROGRESS: u64 = 1 << 0;
/// `InProgressFlags` bit set while a special kernel APC is delivered.
pub const SPECIAL_APC_IN_PROGRESS: u64 = 1 << 1;

/// Processor mode an APC is delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
pub enum ApcMode {
    /// `KernelMode` (0)
    Kernel,
    /// `UserMode`, or any other non-zero value
    User,
}

impl ApcMode {
    /// Decodes a raw `KPROCESSOR_MODE` value.
    pub fn from_raw(raw: u64) -> Self {
        if raw == 0 {
            ApcMode::Kernel
        } else {
            ApcMode::User
        }
    }
}

/// The decoded `_KAPC_STATE` of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApcStateView {
    /// Address of the `_KAPC_STATE`
    pub address: u64,
    /// Addresses of `ApcListHead[0]` and `ApcListHead[1]`
    pub queue_heads: [u64; QUEUE_COUNT],
    /// Bit 0 of `InProgressFlags`
    pub kernel_apc_in_progress: bool,
    /// Bit 1 of `InProgressFlags`
    pub special_apc_in_progress: bool,
    /// `KernelApcPending`
    pub kernel_apc_pending: bool,
    /// `UserApcPending`
    pub user_apc_pending: bool,
}

impl ApcStateView {
    /// Reads the APC state of `thread`.
    ///
    /// Builds without `InProgressFlags` (before Windows 10) declare `KernelApcInProgress`
    /// as a member of its own and may lack `SpecialApcInProgress`; both layouts are
    /// accepted.
    ///
    /// # Errors
    ///
    /// Returns the access error of the first member that cannot be resolved or read,
    /// including the two queue heads.
    pub fn read(ctx: Context<'_>, thread: &ThreadHandle) -> Result<Self> {
        let state = StructReader::new(ctx, thread.address, "_ETHREAD")
            .member("Tcb")?
            .member("ApcState")?;

        let (kernel_apc_in_progress, special_apc_in_progress) =
            match state.read_unsigned("InProgressFlags") {
                Ok(flags) => (
                    flags & KERNEL_APC_IN_PROGRESS != 0,
                    flags & SPECIAL_APC_IN_PROGRESS != 0,
                ),
                Err(Error::BadOffset { .. }) => {
                    let kernel = state.read_bool("KernelApcInProgress")?;
                    let special = match state.read_bool("SpecialApcInProgress") {
                        Ok(special) => special,
                        Err(Error::BadOffset { .. }) => false,
                        Err(error) => return Err(error),
                    };
                    (kernel, special)
                }
                Err(error) => return Err(error),
            };

        let kernel_apc_pending = state.read_bool("KernelApcPending")?;
        let user_apc_pending = state.read_bool("UserApcPending")?;

        let mut queue_heads = [0_u64; QUEUE_COUNT];
        for (index, head) in queue_heads.iter_mut().enumerate() {
            *head = state.element_address("ApcListHead", index as u64)?;
            ctx.read_pointer(*head)?;
        }

        Ok(ApcStateView {
            address: state.address(),
            queue_heads,
            kernel_apc_in_progress,
            special_apc_in_progress,
            kernel_apc_pending,
            user_apc_pending,
        })
    }

    /// Starts walking queue `index` ([`KERNEL_QUEUE`] or [`USER_QUEUE`]).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] for any other index and the symbol table error
    /// if `_KAPC.ApcListEntry` cannot be resolved.
    pub fn queue<'a>(
        &self,
        ctx: Context<'a>,
        index: usize,
        max_entries: usize,
    ) -> Result<ApcQueue<'a>> {
        let Some(&head) = self.queue_heads.get(index) else {
            return Err(Error::NotSupported);
        };

        Ok(ApcQueue {
            ctx,
            index,
            walker: ListWalker::new(ctx, head, "_KAPC", "ApcListEntry")?
                .with_max_entries(max_entries),
        })
    }
}

/// One queued `_KAPC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApcEntry {
    /// Address of the `_KAPC`
    pub address: u64,
    /// Index of the queue the entry was linked into
    pub queue: usize,
    /// `KernelRoutine`
    pub kernel_routine: u64,
    /// `NormalRoutine`, zero for special kernel APCs
    pub normal_routine: u64,
    /// `ApcMode`
    pub mode: ApcMode,
    /// `Inserted`; may be false for an entry caught during delivery
    pub inserted: bool,
}

impl ApcEntry {
    /// Decodes the `_KAPC` at `address` found in queue `queue`.
    ///
    /// # Errors
    ///
    /// Returns the access error of the first member that cannot be read.
    pub fn read(ctx: Context<'_>, address: u64, queue: usize) -> Result<Self> {
        let apc = StructReader::new(ctx, address, "_KAPC");

        Ok(ApcEntry {
            address,
            queue,
            kernel_routine: apc.read_pointer("KernelRoutine")?,
            normal_routine: apc.read_pointer("NormalRoutine")?,
            mode: ApcMode::from_raw(apc.read_unsigned("ApcMode")?),
            inserted: apc.read_bool("Inserted")?,
        })
    }
}

/// Iterator over the entries of one APC queue, in link order.
pub struct ApcQueue<'a> {
    ctx: Context<'a>,
    index: usize,
    walker: ListWalker<'a>,
}

impl ApcQueue<'_> {
    /// Returns the queue index.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Iterator for ApcQueue<'_> {
    type Item = Result<ApcEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.walker.next()?;
        Some(ApcEntry::read(self.ctx, address, self.index))
    }
}

/// Result of reconstructing the APC queues of one thread.
#[derive(Debug)]
pub enum ThreadOutcome {
    /// Both queues were read completely.
    Scanned {
        /// The thread
        thread: ThreadHandle,
        /// Its APC state
        state: ApcStateView,
        /// Entries of the kernel queue followed by those of the user queue
        entries: Vec<ApcEntry>,
    },
    /// The thread could not be analyzed.
    Skipped {
        /// The thread
        thread: ThreadHandle,
        /// What went wrong
        reason: Error,
    },
}

impl ThreadOutcome {
    /// Returns the thread this outcome is about.
    pub fn thread(&self) -> &ThreadHandle {
        match self {
            ThreadOutcome::Scanned { thread, .. } | ThreadOutcome::Skipped { thread, .. } => {
                thread
            }
        }
    }

    /// Returns the entries found, empty for a skipped thread.
    pub fn entries(&self) -> &[ApcEntry] {
        match self {
            ThreadOutcome::Scanned { entries, .. } => entries,
            ThreadOutcome::Skipped { .. } => &[],
        }
    }

    /// Returns `true` if the thread was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, ThreadOutcome::Skipped { .. })
    }
}

/// Reconstructs both APC queues of `thread`.
///
/// Any failure, whether reading the state or one of the entries, skips the whole thread.
pub fn scan_thread(ctx: Context<'_>, thread: &ThreadHandle, max_entries: usize) -> ThreadOutcome {
    let collect = || -> Result<(ApcStateView, Vec<ApcEntry>)> {
        let state = ApcStateView::read(ctx, thread)?;

        let mut entries = Vec::new();
        for index in [KERNEL_QUEUE, USER_QUEUE] {
            for entry in state.queue(ctx, index, max_entries)? {
                entries.push(entry?);
            }
        }
        Ok((state, entries))
    };

    match collect() {
        Ok((state, entries)) => ThreadOutcome::Scanned {
            thread: *thread,
            state,
            entries,
        },
        Err(reason) => {
            log::debug!("Error scanning thread {}: {}", thread.tid, reason);
            ThreadOutcome::Skipped {
                thread: *thread,
                reason,
            }
        }
    }
}
