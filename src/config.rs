//! Scan configuration
//!
//! This module provides the options that control one APC scan: which processes to look at,
//! how far to follow kernel lists before assuming corruption, and where to find the process
//! list when the symbol table alone is not enough.

use std::collections::BTreeSet;

use crate::list::DEFAULT_MAX_LIST_ENTRIES;

/// A set of process IDs to restrict a scan to.
///
/// # Examples
///
/// ```rust
/// use apcscope::PidFilter;
///
/// let filter: PidFilter = [4, 1234].into_iter().collect();
/// assert!(filter.contains(4));
/// assert!(!filter.contains(8));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidFilter(BTreeSet<u64>);

impl PidFilter {
    /// Creates a filter from any collection of process IDs.
    pub fn new(pids: impl IntoIterator<Item = u64>) -> Self {
        PidFilter(pids.into_iter().collect())
    }

    /// Returns `true` if `pid` passes the filter.
    pub fn contains(&self, pid: u64) -> bool {
        self.0.contains(&pid)
    }

    /// Returns the process IDs in ascending order.
    pub fn pids(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }

    /// Returns the number of process IDs in the filter.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the filter holds no process IDs, i.e. rejects every process.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u64> for PidFilter {
    fn from_iter<T: IntoIterator<Item = u64>>(iter: T) -> Self {
        PidFilter::new(iter)
    }
}

/// Configuration for one APC scan
///
/// The process list head is located, in order of preference, from
/// [`ScanConfig::process_list_head`] or from `PsActiveProcessHead` in the symbol table
/// relocated by [`ScanConfig::kernel_base`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Only scan processes whose ID is in this set; `None` scans all processes
    pub pid_filter: Option<PidFilter>,

    /// Maximum number of entries followed in any one kernel list (default: 4096)
    pub max_list_entries: usize,

    /// Load address of the kernel image, added to symbol addresses (default: 0)
    pub kernel_base: u64,

    /// Absolute address of `PsActiveProcessHead`, bypassing the symbol lookup
    pub process_list_head: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pid_filter: None,
            max_list_entries: DEFAULT_MAX_LIST_ENTRIES,
            kernel_base: 0,
            process_list_head: None,
        }
    }
}

impl ScanConfig {
    /// Creates the default configuration: every process, default list bound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the scan to the given process IDs.
    #[must_use]
    pub fn with_pids(mut self, pids: impl IntoIterator<Item = u64>) -> Self {
        self.pid_filter = Some(PidFilter::new(pids));
        self
    }

    /// Sets the maximum number of entries followed per list.
    #[must_use]
    pub fn with_max_list_entries(mut self, max_list_entries: usize) -> Self {
        self.max_list_entries = max_list_entries;
        self
    }

    /// Sets the kernel load address symbols are relocated by.
    #[must_use]
    pub fn with_kernel_base(mut self, kernel_base: u64) -> Self {
        self.kernel_base = kernel_base;
        self
    }

    /// Uses an explicit `PsActiveProcessHead` address.
    #[must_use]
    pub fn with_process_list_head(mut self, address: u64) -> Self {
        self.process_list_head = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ScanConfig::new();
        assert_eq!(config, ScanConfig::default());
        assert!(config.pid_filter.is_none());
        assert_eq!(config.max_list_entries, DEFAULT_MAX_LIST_ENTRIES);
        assert_eq!(config.kernel_base, 0);
        assert!(config.process_list_head.is_none());
    }

    #[test]
    fn builders() {
        let config = ScanConfig::new()
            .with_pids([1234, 4, 4])
            .with_max_list_entries(16)
            .with_kernel_base(0xfffff800_00000000)
            .with_process_list_head(0xfffff800_00c1e000);

        let filter = config.pid_filter.unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.pids().collect::<Vec<_>>(), vec![4, 1234]);
        assert_eq!(config.max_list_entries, 16);
        assert_eq!(config.kernel_base, 0xfffff800_00000000);
        assert_eq!(config.process_list_head, Some(0xfffff800_00c1e000));
    }

    #[test]
    fn empty_filter() {
        let filter = PidFilter::default();
        assert!(filter.is_empty());
        assert!(!filter.contains(0));
    }
}
