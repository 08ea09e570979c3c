//! Traversal of `_LIST_ENTRY` lists embedded in kernel structures.
//!
//! Windows chains most of its objects through intrusive circular doubly-linked lists: a
//! `_LIST_ENTRY { Flink, Blink }` member inside every element, plus one standalone
//! `_LIST_ENTRY` acting as the head. [`ListWalker`] follows the `Flink` chain from a head and
//! yields the address of each *containing* structure, i.e. the link address minus the offset
//! of the link member.
//!
//! Memory images are snapshots of a running system, and lists are routinely caught
//! half-updated, partially paged out or overwritten. The walker therefore never fails once
//! it has been created. It ends the sequence when any of these occur:
//!
//! 1. the chain returns to the head (the normal end of a list)
//! 2. the configured maximum number of entries has been yielded
//! 3. a `Flink` is zero, non-canonical or points to memory that cannot be read
//! 4. a `Flink` points to an entry that was already visited (a cycle not through the head)
//!
//! Cases 2 to 4 are logged at `trace` level.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use apcscope::list::ListWalker;
//!
//! let head = ctx.symbols.symbol_address("PsActiveProcessHead")? + kernel_base;
//! for eprocess in ListWalker::new(ctx, head, "_EPROCESS", "ActiveProcessLinks")? {
//!     println!("_EPROCESS at {:#x}", eprocess);
//! }
//! ```

use std::iter::FusedIterator;

use rustc_hash::FxHashSet;

use crate::{image::is_canonical, object::Context, Result};

/// Default upper bound on the number of entries yielded by one walk.
pub const DEFAULT_MAX_LIST_ENTRIES: usize = 4096;

/// Iterator over the structures linked into one `_LIST_ENTRY` list.
///
/// Each walker owns its cursor, counter and visited set; create a new one to walk the same
/// list again.
pub struct ListWalker<'a> {
    ctx: Context<'a>,
    head: u64,
    link_offset: u64,
    cursor: u64,
    yielded: usize,
    max_entries: usize,
    visited: FxHashSet<u64>,
    finished: bool,
}

impl<'a> ListWalker<'a> {
    /// Creates a walker over the list whose head `_LIST_ENTRY` is at `head`.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Address space and symbol table to read through
    /// * `head` - Virtual address of the list head
    /// * `structure` - Type of the linked elements, e.g. `_KAPC`
    /// * `link_field` - Name of the `_LIST_ENTRY` member inside `structure`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TypeNotFound`] or [`crate::Error::BadOffset`] if the link
    /// member cannot be resolved. The head itself is not read until the first call to
    /// [`Iterator::next`].
    pub fn new(ctx: Context<'a>, head: u64, structure: &str, link_field: &str) -> Result<Self> {
        let link_offset = ctx.symbols.field(structure, link_field)?.offset;

        Ok(ListWalker {
            ctx,
            head,
            link_offset,
            cursor: head,
            yielded: 0,
            max_entries: DEFAULT_MAX_LIST_ENTRIES,
            visited: FxHashSet::default(),
            finished: false,
        })
    }

    /// Sets the maximum number of entries this walk yields.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Returns the address of the list head.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Returns the offset of the link member inside each element.
    pub fn link_offset(&self) -> u64 {
        self.link_offset
    }

    fn stop(&mut self) -> Option<u64> {
        self.finished = true;
        None
    }
}

impl Iterator for ListWalker<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.finished {
            return None;
        }

        if self.yielded >= self.max_entries {
            log::trace!(
                "List at {:#x} truncated after {} entries",
                self.head,
                self.max_entries
            );
            return self.stop();
        }

        let flink = match self.ctx.read_pointer(self.cursor) {
            Ok(flink) => flink,
            Err(error) => {
                log::trace!(
                    "List at {:#x}: cannot read Flink at {:#x}: {}",
                    self.head,
                    self.cursor,
                    error
                );
                return self.stop();
            }
        };

        if flink == self.head {
            return self.stop();
        }

        let link_size = self.ctx.symbols.pointer_size() * 2;
        if flink == 0 || !is_canonical(flink) || !self.ctx.layer.is_valid(flink, link_size) {
            log::trace!(
                "List at {:#x}: invalid Flink {:#x} at {:#x}",
                self.head,
                flink,
                self.cursor
            );
            return self.stop();
        }

        if !self.visited.insert(flink) {
            log::trace!("List at {:#x}: cycle at {:#x}", self.head, flink);
            return self.stop();
        }

        self.cursor = flink;
        self.yielded += 1;
        Some(flink.wrapping_sub(self.link_offset))
    }
}

impl FusedIterator for ListWalker<'_> {}
