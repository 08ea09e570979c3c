// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]

//! # apcscope
//!
//! Enumerates the Asynchronous Procedure Calls queued on every thread of a Windows kernel
//! memory image.
//!
//! An APC is a callback the kernel delivers to one specific thread. Each thread keeps two
//! APC queues in its `_KAPC_STATE`, one for kernel-mode and one for user-mode APCs, and
//! each queue is a circular doubly-linked list of `_KAPC` objects. Malware uses APCs for
//! code injection and stealthy execution, so listing the queued callbacks of a memory
//! image is a staple of memory forensics.
//!
//! `apcscope` reads everything through a debug-symbol table in ISF (JSON) form, so one
//! binary handles every Windows build for which such a table exists.
//!
//! ## Features
//!
//! - **Symbol-driven decoding** - No hardcoded structure offsets
//! - **Robust list walking** - Corrupted, cyclic and smeared lists always terminate
//! - **Streaming results** - One record per APC, produced lazily
//! - **Loss accounting** - Every skipped process or thread lands in [`Diagnostics`]
//! - **Memory-mapped images** - Raw dumps are mapped, never copied
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apcscope::prelude::*;
//!
//! let symbols = SymbolTable::from_file("ntkrnlmp.json")?;
//! let layer = Amd64Layer::new(Physical::new("memory.raw")?, 0x1ad000);
//! let ctx = Context::new(&layer, &symbols);
//!
//! let config = ScanConfig::new().with_kernel_base(0xfffff805_1e000000);
//! let diagnostics = Diagnostics::new();
//!
//! for record in ApcScanner::new(ctx, &config, &diagnostics)? {
//!     println!(
//!         "{} {} {} {:#x} {:#x} {}",
//!         record.process_name, record.pid, record.tid,
//!         record.kernel_routine, record.normal_routine, record.mode
//!     );
//! }
//! # Ok::<(), apcscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`image`] - Image backends and virtual address spaces
//! - [`symbols`] - ISF symbol tables: type layouts and symbol addresses
//! - [`object`] - Typed structure access on top of a layer and a symbol table
//! - [`list`] - Bounded, cycle-safe `_LIST_ENTRY` traversal
//! - [`windows`] - Processes, threads, APC state and APC queues
//! - [`scanner`] - The streaming traversal producing [`ApcRecord`]s
//! - [`record`] - Record layout, table columns and row emission
//! - [`config`] and [`diagnostics`] - Scan options and loss reporting
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, Error>`](Result). Failures confined to one
//! thread or process never surface as errors; they are skipped and reported through
//! [`Diagnostics`]:
//!
//! ```rust,no_run
//! use apcscope::{Error, SymbolTable};
//!
//! match SymbolTable::from_file("ntkrnlmp.json.xz") {
//!     Ok(symbols) => println!("pointer size {}", symbols.pointer_size()),
//!     Err(Error::FileError(io_err)) => println!("Cannot read symbol table: {}", io_err),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
//!     Err(e) => println!("Error: {}", e),
//! }
//! ```
#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

pub mod config;
pub mod diagnostics;
pub mod image;
pub mod list;
pub mod object;
pub mod prelude;
pub mod record;
pub mod scanner;
pub mod symbols;
pub mod windows;

/// `apcscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `apcscope` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use apcscope::{Error, SymbolTable};
///
/// match SymbolTable::from_file("ntkrnlmp.json") {
///     Ok(_) => println!("Loaded"),
///     Err(Error::TypeNotFound(name)) => println!("Missing type {}", name),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Symbol table of one kernel build.
///
/// See [`symbols::SymbolTable`].
pub use symbols::SymbolTable;

/// Scan options.
pub use config::{PidFilter, ScanConfig};

/// Loss reporting.
pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};

/// Structure access.
pub use object::{Context, StructReader, Value};

/// Scan results.
pub use record::{ApcRecord, Column, RecordEmitter, Row, RowSink, COLUMNS};

/// Main entry point for scanning an image.
///
/// See [`scanner::ApcScanner`].
pub use scanner::ApcScanner;
