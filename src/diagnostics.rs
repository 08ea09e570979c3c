//! Diagnostics collection for APC scans.
//!
//! Memory images are full of half-written structures and paged-out memory, so a scan is
//! expected to lose some threads and processes along the way. Each loss is recorded here
//! instead of aborting the scan: the result table may be shorter than for a perfectly
//! consistent image, and the diagnostics explain every omission.
//!
//! # Key Components
//!
//! - [`Diagnostics`] - Thread-safe, append-only container for diagnostic entries
//! - [`Diagnostic`] - Individual entry with severity, category and location
//! - [`DiagnosticSeverity`] - Severity level (Warning, Error)
//! - [`DiagnosticCategory`] - Which stage of the traversal reported the entry
//!
//! # Usage Examples
//!
//! ```rust
//! use apcscope::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};
//!
//! let diagnostics = Diagnostics::new();
//!
//! diagnostics.push(
//!     Diagnostic::new(
//!         DiagnosticSeverity::Warning,
//!         DiagnosticCategory::Thread,
//!         "Address 0xffffc00000001000 (8 bytes) is not readable",
//!     )
//!     .with_tid(1337)
//!     .with_address(0xffffc000_00000f68),
//! );
//!
//! assert_eq!(diagnostics.by_category(DiagnosticCategory::Thread).len(), 1);
//! for entry in diagnostics.iter() {
//!     println!("{}", entry);
//! }
//! ```
//!
//! # Thread Safety
//!
//! The container uses `boxcar::Vec` internally, which provides lock-free concurrent append
//! operations. It can be shared by reference between the scanner and its consumer.

use std::fmt::{self, Write};

use strum::Display;

use crate::Error;

/// Severity level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DiagnosticSeverity {
    /// Image memory could not be read; the scan went on without the affected object.
    #[strum(to_string = "WARN")]
    Warning,

    /// The symbol table does not describe the image; every object of the affected type is lost.
    #[strum(to_string = "ERROR")]
    Error,
}

/// Category indicating which stage of the traversal reported a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DiagnosticCategory {
    /// A process object could not be decoded.
    Process,

    /// A thread's APC state or one of its APCs could not be read.
    Thread,

    /// A process's thread list could not be started.
    List,
}

/// A single diagnostic entry with context information.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level of this diagnostic.
    pub severity: DiagnosticSeverity,

    /// Category indicating the source of this diagnostic.
    pub category: DiagnosticCategory,

    /// Human-readable description of the issue.
    pub message: String,

    /// Virtual address of the object the issue was found in.
    pub address: Option<u64>,

    /// Process ID of the affected process.
    pub pid: Option<u64>,

    /// Thread ID of the affected thread.
    pub tid: Option<u64>,
}

impl Diagnostic {
    /// Creates a new diagnostic entry.
    ///
    /// # Arguments
    ///
    /// * `severity` - Severity level of the diagnostic
    /// * `category` - Category of the diagnostic source
    /// * `message` - Human-readable description
    pub fn new(
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            address: None,
            pid: None,
            tid: None,
        }
    }

    /// Creates an entry for an object skipped because of `error`.
    ///
    /// Symbol table mismatches ([`Error::is_symbol_mismatch`]) are errors, since they repeat
    /// for every object of the affected type. Anything else is a warning.
    pub fn from_error(category: DiagnosticCategory, error: &Error) -> Self {
        let severity = if error.is_symbol_mismatch() {
            DiagnosticSeverity::Error
        } else {
            DiagnosticSeverity::Warning
        };
        Self::new(severity, category, error.to_string())
    }

    /// Adds the address of the affected object.
    #[must_use]
    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    /// Adds the affected process ID.
    #[must_use]
    pub fn with_pid(mut self, pid: u64) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Adds the affected thread ID.
    #[must_use]
    pub fn with_tid(mut self, tid: u64) -> Self {
        self.tid = Some(tid);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.category, self.message)?;

        if let Some(pid) = self.pid {
            write!(f, " (pid: {})", pid)?;
        }

        if let Some(tid) = self.tid {
            write!(f, " (tid: {})", tid)?;
        }

        if let Some(address) = self.address {
            write!(f, " (address: {:#x})", address)?;
        }

        Ok(())
    }
}

/// Thread-safe container for collecting diagnostic entries.
#[derive(Debug)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates a new empty diagnostics container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
        }
    }

    /// Adds a diagnostic entry.
    pub fn push(&self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// Returns true if any diagnostics have been collected.
    pub fn has_any(&self) -> bool {
        self.entries.count() > 0
    }

    /// Returns the total number of diagnostics.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Returns the number of diagnostics with the given severity.
    pub fn count_of(&self, severity: DiagnosticSeverity) -> usize {
        self.entries
            .iter()
            .filter(|(_, d)| d.severity == severity)
            .count()
    }

    /// Returns an iterator over all diagnostics in the order they were reported.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Returns diagnostics filtered by category.
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }

    /// Formats a summary of all diagnostics for display.
    pub fn summary(&self) -> String {
        let mut output = String::new();

        let error_count = self.count_of(DiagnosticSeverity::Error);
        let warning_count = self.count_of(DiagnosticSeverity::Warning);

        let _ = writeln!(
            output,
            "Diagnostics: {} error(s), {} warning(s)",
            error_count, warning_count
        );

        for severity in [DiagnosticSeverity::Error, DiagnosticSeverity::Warning] {
            if self.count_of(severity) == 0 {
                continue;
            }
            let _ = writeln!(output);
            for diag in self.iter().filter(|d| d.severity == severity) {
                let _ = writeln!(output, "  {diag}");
            }
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
