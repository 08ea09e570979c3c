use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Field access errors ([`Error::Unreadable`], [`Error::BadOffset`], [`Error::BadType`],
/// [`Error::TypeNotFound`]) describe a single read that went wrong; the scanner absorbs them
/// per thread or process and keeps going. The symbol-table ones among them are reported with
/// a higher severity, see [`Error::is_symbol_mismatch`]. Everything else describes a problem
/// with the inputs as a whole and is propagated to the caller.
///
/// # Error Categories
///
/// ## Field Access Errors
/// - [`Error::Unreadable`] - The address is not mapped in the analyzed address space
/// - [`Error::BadOffset`] - The symbol table has no offset for the requested field
/// - [`Error::BadType`] - The field exists but cannot be read as the requested kind of value
/// - [`Error::TypeNotFound`] - The symbol table does not describe the requested structure
///
/// ## Input Errors
/// - [`Error::Malformed`] - Corrupted or invalid input structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a backend
/// - [`Error::SymbolNotFound`] - A required kernel symbol is missing
/// - [`Error::NotSupported`] - Unsupported input or feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::IsfError`] - JSON errors while loading a symbol table
///
/// # Examples
///
/// ```rust,no_run
/// use apcscope::{Error, SymbolTable};
///
/// match SymbolTable::from_file("ntkrnlmp.json") {
///     Ok(symbols) => println!("pointer size: {}", symbols.pointer_size()),
///     Err(Error::FileError(io_err)) => eprintln!("I/O error: {}", io_err),
///     Err(Error::IsfError(json_err)) => eprintln!("Not an ISF file: {}", json_err),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted on a backend.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A virtual address could not be translated or read.
    ///
    /// Raised by address-space layers for unmapped pages, non-canonical addresses and
    /// physical addresses past the end of the image.
    #[error("Address {address:#x} ({len} bytes) is not readable")]
    Unreadable {
        /// The first virtual address of the failed read
        address: u64,
        /// The number of bytes requested
        len: usize,
    },

    /// The symbol table has no offset for a structure member.
    #[error("No offset for {structure}.{field}")]
    BadOffset {
        /// The structure that was queried
        structure: String,
        /// The member that could not be resolved
        field: String,
    },

    /// A structure member cannot be decoded as the requested kind of value.
    #[error("{structure}.{field} cannot be read as {expected}")]
    BadType {
        /// The structure that was queried
        structure: String,
        /// The member that was read
        field: String,
        /// What the caller asked for
        expected: &'static str,
    },

    /// The symbol table does not describe the requested structure.
    #[error("Type not found in symbol table - {0}")]
    TypeNotFound(String),

    /// A required symbol is missing from the symbol table.
    #[error("Symbol not found in symbol table - {0}")]
    SymbolNotFound(String),

    /// This input or feature is not supported.
    #[error("This input is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The symbol table JSON could not be decoded.
    #[error("{0}")]
    IsfError(#[from] serde_json::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` if the symbol table does not describe the image.
    ///
    /// Unlike an unreadable page, such an error repeats for every object of the same type.
    pub fn is_symbol_mismatch(&self) -> bool {
        matches!(
            self,
            Error::BadOffset { .. }
                | Error::BadType { .. }
                | Error::TypeNotFound(_)
                | Error::SymbolNotFound(_)
        )
    }
}
