//! Kernel type and symbol resolution.
//!
//! A [`SymbolTable`] answers the two questions every structure read depends on: where does a
//! member live inside its structure, and what type does it have. Offsets differ between
//! Windows builds, so nothing else in the crate hardcodes them; they are always looked up
//! here by structure and member name.
//!
//! Tables are loaded from Volatility3 ISF JSON files, see [`isf`]. Symbol packs ship them
//! xz-compressed (`.json.xz`); compressed input is recognised by its magic and unpacked
//! before parsing.
//!
//! # Usage Examples
//!
//! ```rust
//! use apcscope::SymbolTable;
//!
//! let symbols = SymbolTable::from_isf_str(r#"{
//!     "base_types": { "pointer": { "size": 8, "signed": false, "kind": "int", "endian": "little" } },
//!     "user_types": { "_LIST_ENTRY": { "kind": "struct", "size": 16, "fields": {
//!         "Flink": { "offset": 0, "type": { "kind": "pointer" } },
//!         "Blink": { "offset": 8, "type": { "kind": "pointer" } } } } },
//!     "symbols": { "PsActiveProcessHead": { "address": 4096 } }
//! }"#)?;
//!
//! assert_eq!(symbols.field("_LIST_ENTRY", "Blink")?.offset, 8);
//! assert_eq!(symbols.type_size("_LIST_ENTRY"), Some(16));
//! assert_eq!(symbols.symbol_address("PsActiveProcessHead")?, 0x1000);
//! # Ok::<(), apcscope::Error>(())
//! ```

pub mod isf;

use std::path::Path;

pub use isf::{BaseType, EnumType, Field, TypeDescriptor, UserType};

use crate::{
    image::{Backend, Physical},
    Error, Result,
};
use isf::IsfDocument;

const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Type and symbol information for one kernel build.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    document: IsfDocument,
    pointer_size: usize,
}

impl SymbolTable {
    /// Parses an ISF document held in a string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::IsfError`] for invalid JSON and [`crate::Error::Malformed`] if
    /// the document lacks a usable `pointer` base type.
    pub fn from_isf_str(json: &str) -> Result<Self> {
        Self::from_document(serde_json::from_str(json)?)
    }

    /// Parses an ISF document from raw bytes, plain or xz-compressed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::Malformed`] for a
    /// corrupt xz stream and otherwise the errors of [`SymbolTable::from_isf_str`].
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Empty);
        }
        if data.starts_with(&XZ_MAGIC) {
            let json = decompress_xz(data)?;
            return Self::from_document(serde_json::from_slice(&json)?);
        }
        Self::from_document(serde_json::from_slice(data)?)
    }

    /// Loads an ISF file from disk, either `.json` or `.json.xz`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be opened and the errors of
    /// [`SymbolTable::from_slice`] for invalid content.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = Physical::new(path)?;
        let symbols = Self::from_slice(file.data())?;
        log::debug!(
            "Loaded symbol table {} ({} types)",
            path.display(),
            symbols.document.user_types.len()
        );
        Ok(symbols)
    }

    fn from_document(document: IsfDocument) -> Result<Self> {
        let Some(pointer) = document.base_types.get("pointer") else {
            return Err(malformed_error!("ISF document has no 'pointer' base type"));
        };

        let pointer_size = match pointer.size {
            4 => 4,
            8 => 8,
            other => {
                return Err(malformed_error!(
                    "Unsupported pointer size {} in ISF document",
                    other
                ))
            }
        };

        Ok(SymbolTable {
            document,
            pointer_size,
        })
    }

    /// Returns the pointer width of the described kernel, 4 or 8 bytes.
    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Looks up a structure, union or class by name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TypeNotFound`] if the table does not describe it.
    pub fn user_type(&self, name: &str) -> Result<&UserType> {
        self.document
            .user_types
            .get(name)
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))
    }

    /// Looks up a member of a structure.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TypeNotFound`] for an unknown structure and
    /// [`crate::Error::BadOffset`] for an unknown member.
    pub fn field(&self, structure: &str, field: &str) -> Result<&Field> {
        self.user_type(structure)?
            .fields
            .get(field)
            .ok_or_else(|| Error::BadOffset {
                structure: structure.to_string(),
                field: field.to_string(),
            })
    }

    /// Returns `true` if `structure` exists and has a member called `field`.
    pub fn has_field(&self, structure: &str, field: &str) -> bool {
        self.field(structure, field).is_ok()
    }

    /// Looks up a primitive type.
    pub fn base_type(&self, name: &str) -> Option<&BaseType> {
        self.document.base_types.get(name)
    }

    /// Looks up an enumeration.
    pub fn enumeration(&self, name: &str) -> Option<&EnumType> {
        self.document.enums.get(name)
    }

    /// Returns the size of a named user, base or enum type.
    pub fn type_size(&self, name: &str) -> Option<u64> {
        if let Some(user) = self.document.user_types.get(name) {
            return Some(user.size);
        }
        if let Some(base) = self.document.base_types.get(name) {
            return Some(base.size);
        }
        self.document.enums.get(name).map(|enumeration| enumeration.size)
    }

    /// Returns the size in bytes of a value described by `descriptor`.
    ///
    /// Functions and unknown kinds have no size.
    pub fn descriptor_size(&self, descriptor: &TypeDescriptor) -> Option<u64> {
        match descriptor {
            TypeDescriptor::Pointer { .. } => Some(self.pointer_size as u64),
            TypeDescriptor::Base { name } => self.base_type(name).map(|base| base.size),
            TypeDescriptor::Struct { name }
            | TypeDescriptor::Union { name }
            | TypeDescriptor::Class { name } => self.type_size(name),
            TypeDescriptor::Array { count, subtype } => {
                self.descriptor_size(subtype)?.checked_mul(*count)
            }
            TypeDescriptor::Bitfield { storage, .. } => self.descriptor_size(storage),
            TypeDescriptor::Enum { name } => self.enumeration(name).map(|e| e.size),
            TypeDescriptor::Function | TypeDescriptor::Unknown => None,
        }
    }

    /// Returns the address of a symbol relative to the module base.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::SymbolNotFound`] if the table has no such symbol.
    pub fn symbol_address(&self, name: &str) -> Result<u64> {
        self.document
            .symbols
            .get(name)
            .map(|symbol| symbol.address)
            .ok_or_else(|| Error::SymbolNotFound(name.to_string()))
    }
}

fn decompress_xz(data: &[u8]) -> Result<Vec<u8>> {
    let mut json = Vec::with_capacity(data.len() * 8);
    lzma_rs::xz_decompress(&mut &data[..], &mut json)
        .map_err(|error| malformed_error!("Invalid xz stream: {}", error))?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::test::image::ISF;

    #[test]
    fn fixture_layout() {
        let symbols = SymbolTable::from_isf_str(ISF).unwrap();

        assert_eq!(symbols.pointer_size(), 8);
        assert_eq!(symbols.field("_KTHREAD", "ApcState").unwrap().offset, 0x98);
        assert_eq!(symbols.field("_KAPC", "ApcListEntry").unwrap().offset, 0x10);
        assert_eq!(symbols.type_size("_KAPC_STATE"), Some(0x30));
        assert_eq!(symbols.type_size("unsigned char"), Some(1));
        assert!(symbols.has_field("_EPROCESS", "ImageFileName"));
        assert!(!symbols.has_field("_EPROCESS", "Peb"));

        let heads = symbols.field("_KAPC_STATE", "ApcListHead").unwrap();
        assert_eq!(symbols.descriptor_size(&heads.descriptor), Some(0x20));

        let name = symbols.field("_EPROCESS", "ImageFileName").unwrap();
        assert_eq!(symbols.descriptor_size(&name.descriptor), Some(15));

        let mode = symbols.field("_KAPC", "ApcMode").unwrap();
        assert_eq!(symbols.descriptor_size(&mode.descriptor), Some(1));
    }

    #[test]
    fn lookup_errors() {
        let symbols = SymbolTable::from_isf_str(ISF).unwrap();

        assert!(matches!(
            symbols.field("_KTIMER", "Header"),
            Err(Error::TypeNotFound(name)) if name == "_KTIMER"
        ));
        match symbols.field("_KTHREAD", "Header") {
            Err(Error::BadOffset { structure, field }) => {
                assert_eq!((structure.as_str(), field.as_str()), ("_KTHREAD", "Header"));
            }
            other => panic!("expected BadOffset, got {other:?}"),
        }
        assert!(matches!(
            symbols.symbol_address("KiDispatchInterrupt"),
            Err(Error::SymbolNotFound(_))
        ));
        assert_eq!(symbols.symbol_address("PsActiveProcessHead").unwrap(), 0x100);
        assert_eq!(symbols.type_size("_KTIMER"), None);
        assert_eq!(symbols.descriptor_size(&TypeDescriptor::Function), None);
    }

    #[test]
    fn invalid_documents() {
        assert!(matches!(
            SymbolTable::from_isf_str("{ not json"),
            Err(Error::IsfError(_))
        ));
        assert!(matches!(
            SymbolTable::from_isf_str(r#"{ "user_types": {} }"#),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            SymbolTable::from_isf_str(
                r#"{ "base_types": { "pointer": { "size": 2, "kind": "int" } } }"#
            ),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(SymbolTable::from_slice(&[]), Err(Error::Empty)));

        let mut truncated = XZ_MAGIC.to_vec();
        truncated.extend_from_slice(&[0x00, 0x04, 0xe6, 0xd6]);
        assert!(matches!(
            SymbolTable::from_slice(&truncated),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ISF.as_bytes()).unwrap();
        file.flush().unwrap();

        let symbols = SymbolTable::from_file(file.path()).unwrap();
        assert_eq!(symbols.field("_ETHREAD", "Cid").unwrap().offset, 0x478);
    }

    #[test]
    fn from_compressed_file() {
        let mut compressed = Vec::new();
        lzma_rs::xz_compress(&mut ISF.as_bytes(), &mut compressed).unwrap();
        assert!(compressed.starts_with(&XZ_MAGIC));

        let mut file = tempfile::Builder::new()
            .suffix(".json.xz")
            .tempfile()
            .unwrap();
        file.write_all(&compressed).unwrap();
        file.flush().unwrap();

        let symbols = SymbolTable::from_file(file.path()).unwrap();
        assert_eq!(symbols.pointer_size(), 8);
        assert_eq!(symbols.field("_ETHREAD", "Cid").unwrap().offset, 0x478);
        assert_eq!(symbols.symbol_address("PsActiveProcessHead").unwrap(), 0x100);
    }
}
