//! Volatility3 Intermediate Symbol Format (ISF) document model.
//!
//! ISF files are JSON documents generated from Microsoft PDBs. They describe every type of one
//! kernel build (`user_types`), the primitive types those are composed of (`base_types`),
//! enumerations and symbol addresses relative to the image base. Only the parts needed to
//! resolve structure members are modelled; unknown keys are ignored.
//!
//! ```json
//! {
//!   "base_types": { "pointer": { "size": 8, "signed": false, "kind": "int", "endian": "little" } },
//!   "user_types": {
//!     "_LIST_ENTRY": {
//!       "kind": "struct", "size": 16,
//!       "fields": { "Flink": { "offset": 0, "type": { "kind": "pointer" } } }
//!     }
//!   },
//!   "enums": {},
//!   "symbols": { "PsActiveProcessHead": { "address": 13641040 } }
//! }
//! ```

use rustc_hash::FxHashMap;
use serde::Deserialize;

/// The type of a structure member or symbol.
///
/// The `kind` key selects the variant; kinds this crate has no use for deserialize to
/// [`TypeDescriptor::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDescriptor {
    /// A primitive from `base_types`
    Base {
        /// Key into `base_types`
        name: String,
    },
    /// A pointer, sized by the `pointer` base type
    Pointer {
        /// Pointee type, absent in some generated files
        #[serde(default)]
        subtype: Option<Box<TypeDescriptor>>,
    },
    /// An embedded structure
    Struct {
        /// Key into `user_types`
        name: String,
    },
    /// An embedded union
    Union {
        /// Key into `user_types`
        name: String,
    },
    /// An embedded class
    Class {
        /// Key into `user_types`
        name: String,
    },
    /// A fixed-length array
    Array {
        /// Number of elements
        count: u64,
        /// Element type
        subtype: Box<TypeDescriptor>,
    },
    /// A bit range inside an integer
    Bitfield {
        /// Lowest bit of the range
        bit_position: u32,
        /// Number of bits
        bit_length: u32,
        /// Integer the bits are stored in
        #[serde(rename = "type")]
        storage: Box<TypeDescriptor>,
    },
    /// An enumeration from `enums`
    Enum {
        /// Key into `enums`
        name: String,
    },
    /// A function (only ever pointed to)
    Function,
    /// Any kind not listed above
    #[serde(other)]
    Unknown,
}

impl TypeDescriptor {
    /// Returns the name of the structure, union or class this descriptor embeds.
    pub fn aggregate_name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::Struct { name }
            | TypeDescriptor::Union { name }
            | TypeDescriptor::Class { name } => Some(name),
            _ => None,
        }
    }

    /// Returns a short lowercase label for the kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            TypeDescriptor::Base { .. } => "base",
            TypeDescriptor::Pointer { .. } => "pointer",
            TypeDescriptor::Struct { .. } => "struct",
            TypeDescriptor::Union { .. } => "union",
            TypeDescriptor::Class { .. } => "class",
            TypeDescriptor::Array { .. } => "array",
            TypeDescriptor::Bitfield { .. } => "bitfield",
            TypeDescriptor::Enum { .. } => "enum",
            TypeDescriptor::Function => "function",
            TypeDescriptor::Unknown => "unknown",
        }
    }
}

/// A member of a user type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Field {
    /// Byte offset from the start of the containing type
    pub offset: u64,
    /// Type of the member
    #[serde(rename = "type")]
    pub descriptor: TypeDescriptor,
}

/// A structure, union or class.
#[derive(Debug, Clone, Deserialize)]
pub struct UserType {
    /// `struct`, `union` or `class`
    #[serde(default)]
    pub kind: String,
    /// Size in bytes
    pub size: u64,
    /// Members by name
    #[serde(default)]
    pub fields: FxHashMap<String, Field>,
}

/// A primitive type.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseType {
    /// Size in bytes
    pub size: u64,
    /// Whether values are two's complement signed
    #[serde(default)]
    pub signed: bool,
    /// `int`, `char`, `bool`, `float` or `void`
    #[serde(default)]
    pub kind: String,
    /// `little` or `big`
    #[serde(default)]
    pub endian: String,
}

/// An enumeration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumType {
    /// Size in bytes
    pub size: u64,
    /// Name of the underlying base type
    #[serde(default)]
    pub base: String,
    /// Constant values by name
    #[serde(default)]
    pub constants: FxHashMap<String, i64>,
}

/// A symbol, relative to the image base of the module the file describes.
#[derive(Debug, Clone, Deserialize)]
pub struct Symbol {
    /// Offset from the module base
    pub address: u64,
    /// Type of the object at the address, when known
    #[serde(rename = "type", default)]
    pub descriptor: Option<TypeDescriptor>,
}

/// A whole ISF document.
#[derive(Debug, Clone, Deserialize)]
pub struct IsfDocument {
    /// Primitive types
    #[serde(default)]
    pub base_types: FxHashMap<String, BaseType>,
    /// Structures, unions and classes
    #[serde(default)]
    pub user_types: FxHashMap<String, UserType>,
    /// Enumerations
    #[serde(default)]
    pub enums: FxHashMap<String, EnumType>,
    /// Symbols
    #[serde(default)]
    pub symbols: FxHashMap<String, Symbol>,
}
