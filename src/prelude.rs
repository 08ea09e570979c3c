//! # apcscope Prelude
//!
//! Convenient re-exports of the types needed for a typical scan. Import this module to
//! open an image, load a symbol table and enumerate APCs without spelling out module paths.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all apcscope operations
pub use crate::Error;

/// The result type used throughout apcscope
pub use crate::Result;

// ================================================================================================
// Image Access
// ================================================================================================

/// Image backends and address spaces
pub use crate::image::{Amd64Layer, Backend, Layer, Memory, Physical, SegmentedLayer};

// ================================================================================================
// Symbols and Structure Access
// ================================================================================================

/// Symbol table and structure readers
pub use crate::{
    object::{Context, StructReader, Value},
    symbols::SymbolTable,
};

// ================================================================================================
// Scanning
// ================================================================================================

/// Scan configuration
pub use crate::config::{PidFilter, ScanConfig};

/// The streaming scanner and its output
pub use crate::{
    record::{ApcRecord, Column, RecordEmitter, Row, RowSink},
    scanner::ApcScanner,
};

/// Windows object model
pub use crate::windows::{ApcMode, ApcStateView, ProcessHandle, ThreadHandle};

/// Loss reporting
pub use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};
