//! Typed access to kernel structures in a memory image.
//!
//! [`StructReader`] combines an address, a structure name and a [`Context`] (address space +
//! symbol table) into an accessor for that structure's members. Every member is located and
//! decoded through the symbol table, so callers never deal with offsets, sizes or bit
//! positions themselves.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use apcscope::object::{Context, StructReader};
//!
//! let ctx = Context::new(&layer, &symbols);
//! let thread = StructReader::new(ctx, ethread_address, "_ETHREAD");
//!
//! let cid = thread.member("Cid")?;
//! let tid = cid.read_pointer("UniqueThread")?;
//! let state = thread.member("Tcb")?.member("ApcState")?;
//! let pending = state.read_bool("KernelApcPending")?;
//! ```
//!
//! # Error Handling
//!
//! Failures are reported per member:
//!
//! - [`crate::Error::TypeNotFound`] / [`crate::Error::BadOffset`] if the symbol table does not
//!   describe the structure or member
//! - [`crate::Error::BadType`] if the member cannot be decoded as requested
//! - [`crate::Error::Unreadable`] if the bytes are not mapped

use crate::{
    image::{io::read_le_sized, io::sign_extend, Layer},
    symbols::{Field, SymbolTable, TypeDescriptor},
    Error, Result,
};

/// The address space and symbol table a traversal reads through.
///
/// Both are borrowed immutably, so a context is cheap to copy into every reader and
/// iterator created during a scan.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    /// Virtual address space of the analyzed kernel
    pub layer: &'a dyn Layer,
    /// Types of the analyzed kernel build
    pub symbols: &'a SymbolTable,
}

impl<'a> Context<'a> {
    /// Creates a new context.
    pub fn new(layer: &'a dyn Layer, symbols: &'a SymbolTable) -> Self {
        Context { layer, symbols }
    }

    /// Reads a pointer of the kernel's native width at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Unreadable`] if the address is not mapped.
    pub fn read_pointer(&self, address: u64) -> Result<u64> {
        self.layer.read_pointer(address, self.symbols.pointer_size())
    }
}

/// A decoded structure member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// An integer or enumeration. Signed types are sign-extended to 64 bits.
    Integer(u64),
    /// A pointer value
    Address(u64),
    /// A `bool` base type or a single-bit bitfield
    Bool(bool),
    /// A character array, truncated at the first NUL and decoded lossily
    String(String),
}

/// Accessor for one structure instance.
#[derive(Clone, Copy)]
pub struct StructReader<'a> {
    ctx: Context<'a>,
    address: u64,
    structure: &'a str,
}

impl<'a> StructReader<'a> {
    /// Creates a reader for the `structure` at `address`.
    ///
    /// Nothing is read or resolved until a member is accessed.
    pub fn new(ctx: Context<'a>, address: u64, structure: &'a str) -> Self {
        StructReader {
            ctx,
            address,
            structure,
        }
    }

    /// Returns the address of the structure.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the name of the structure.
    pub fn structure(&self) -> &'a str {
        self.structure
    }

    /// Looks up a member in the symbol table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TypeNotFound`] or [`crate::Error::BadOffset`].
    pub fn field(&self, name: &str) -> Result<&'a Field> {
        self.ctx.symbols.field(self.structure, name)
    }

    /// Returns the virtual address of a member.
    ///
    /// # Errors
    ///
    /// See [`StructReader::field`].
    pub fn field_address(&self, name: &str) -> Result<u64> {
        Ok(self.address.wrapping_add(self.field(name)?.offset))
    }

    /// Returns a reader for an embedded structure, union or class member.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] if the member is not an aggregate.
    pub fn member(&self, name: &str) -> Result<StructReader<'a>> {
        let field = self.field(name)?;
        let Some(structure) = field.descriptor.aggregate_name() else {
            return Err(self.bad_type(name, "structure"));
        };

        Ok(StructReader::new(
            self.ctx,
            self.address.wrapping_add(field.offset),
            structure,
        ))
    }

    /// Returns the address of element `index` of an array member.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] if the member is not an array, the index is out of
    /// range or the element size is unknown.
    pub fn element_address(&self, name: &str, index: u64) -> Result<u64> {
        let field = self.field(name)?;
        let TypeDescriptor::Array { count, subtype } = &field.descriptor else {
            return Err(self.bad_type(name, "array"));
        };
        if index >= *count {
            return Err(self.bad_type(name, "array index in range"));
        }
        let Some(stride) = self.ctx.symbols.descriptor_size(subtype) else {
            return Err(self.bad_type(name, "array of sized elements"));
        };

        Ok(self
            .address
            .wrapping_add(field.offset)
            .wrapping_add(stride.wrapping_mul(index)))
    }

    /// Reads and decodes a member according to its declared type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] for aggregates, functions and arrays that are not
    /// character strings, and [`crate::Error::Unreadable`] if the bytes are not mapped.
    pub fn read_field(&self, name: &str) -> Result<Value> {
        let field = self.field(name)?;
        let address = self.address.wrapping_add(field.offset);
        self.decode(name, address, &field.descriptor)
    }

    fn decode(&self, name: &str, address: u64, descriptor: &TypeDescriptor) -> Result<Value> {
        let symbols = self.ctx.symbols;
        match descriptor {
            TypeDescriptor::Pointer { .. } => Ok(Value::Address(self.ctx.read_pointer(address)?)),
            TypeDescriptor::Base { name: base } => {
                let Some(base) = symbols.base_type(base) else {
                    return Err(self.bad_type(name, "known base type"));
                };
                let value = self.read_integer(name, address, base.size, base.signed)?;
                if base.kind == "bool" {
                    Ok(Value::Bool(value != 0))
                } else {
                    Ok(Value::Integer(value))
                }
            }
            TypeDescriptor::Enum { name: enumeration } => {
                let Some(enumeration) = symbols.enumeration(enumeration) else {
                    return Err(self.bad_type(name, "known enumeration"));
                };
                let signed = symbols
                    .base_type(&enumeration.base)
                    .is_some_and(|base| base.signed);
                let value = self.read_integer(name, address, enumeration.size, signed)?;
                Ok(Value::Integer(value))
            }
            TypeDescriptor::Bitfield {
                bit_position,
                bit_length,
                storage,
            } => {
                let Some(size) = symbols.descriptor_size(storage) else {
                    return Err(self.bad_type(name, "sized bitfield storage"));
                };
                if *bit_length == 0 || bit_position + bit_length > (size as u32) * 8 {
                    return Err(self.bad_type(name, "bitfield within its storage"));
                }

                let raw = self.read_integer(name, address, size, false)?;
                let mask = if *bit_length >= 64 {
                    u64::MAX
                } else {
                    (1_u64 << bit_length) - 1
                };
                let bits = (raw >> bit_position) & mask;

                if *bit_length == 1 {
                    Ok(Value::Bool(bits != 0))
                } else {
                    Ok(Value::Integer(bits))
                }
            }
            TypeDescriptor::Array { count, subtype } if self.is_character(subtype) => {
                let len = usize::try_from(*count).map_err(|_| self.bad_type(name, "string"))?;
                Ok(Value::String(self.read_bytes_lossy(address, len)?))
            }
            _ => Err(self.bad_type(name, "scalar")),
        }
    }

    /// Reads an integer member, zero- or sign-extended to 64 bits.
    ///
    /// Pointers and booleans are accepted and returned as their numeric value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] for strings and non-scalar members.
    pub fn read_unsigned(&self, name: &str) -> Result<u64> {
        match self.read_field(name)? {
            Value::Integer(value) | Value::Address(value) => Ok(value),
            Value::Bool(value) => Ok(u64::from(value)),
            Value::String(_) => Err(self.bad_type(name, "integer")),
        }
    }

    /// Reads a pointer member.
    ///
    /// Integer members are accepted as well, some builds declare handles and routine
    /// addresses as plain integers.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] for booleans, strings and non-scalar members.
    pub fn read_pointer(&self, name: &str) -> Result<u64> {
        match self.read_field(name)? {
            Value::Address(value) | Value::Integer(value) => Ok(value),
            Value::Bool(_) | Value::String(_) => Err(self.bad_type(name, "pointer")),
        }
    }

    /// Reads a boolean member.
    ///
    /// `bool` base types and single-bit bitfields decode directly; byte-sized flag integers
    /// are `true` when non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] for pointers, strings and non-scalar members.
    pub fn read_bool(&self, name: &str) -> Result<bool> {
        match self.read_field(name)? {
            Value::Bool(value) => Ok(value),
            Value::Integer(value) => Ok(value != 0),
            Value::Address(_) | Value::String(_) => Err(self.bad_type(name, "boolean")),
        }
    }

    /// Reads a character array member as a string of at most `max_length` bytes.
    ///
    /// The result stops at the first NUL byte; invalid UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BadType`] if the member is not an array of 1-byte elements.
    pub fn read_string(&self, name: &str, max_length: usize) -> Result<String> {
        let field = self.field(name)?;
        let TypeDescriptor::Array { count, subtype } = &field.descriptor else {
            return Err(self.bad_type(name, "string"));
        };
        if !self.is_character(subtype) {
            return Err(self.bad_type(name, "string"));
        }

        let len = usize::try_from(*count).unwrap_or(usize::MAX).min(max_length);
        self.read_bytes_lossy(self.address.wrapping_add(field.offset), len)
    }

    fn is_character(&self, descriptor: &TypeDescriptor) -> bool {
        match descriptor {
            TypeDescriptor::Base { name } => self
                .ctx
                .symbols
                .base_type(name)
                .is_some_and(|base| base.size == 1 && base.kind != "bool"),
            _ => false,
        }
    }

    fn read_bytes_lossy(&self, address: u64, len: usize) -> Result<String> {
        let mut buffer = vec![0_u8; len];
        self.ctx.layer.read(address, &mut buffer)?;

        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        Ok(String::from_utf8_lossy(&buffer[..end]).into_owned())
    }

    fn read_integer(&self, name: &str, address: u64, size: u64, signed: bool) -> Result<u64> {
        let size = match size {
            1 | 2 | 4 | 8 => size as usize,
            _ => return Err(self.bad_type(name, "1, 2, 4 or 8 byte integer")),
        };

        let mut buffer = [0_u8; 8];
        self.ctx.layer.read(address, &mut buffer[..size])?;
        let value = read_le_sized(&buffer, size)?;

        if signed {
            Ok(sign_extend(value, size) as u64)
        } else {
            Ok(value)
        }
    }

    fn bad_type(&self, field: &str, expected: &'static str) -> Error {
        Error::BadType {
            structure: self.structure.to_string(),
            field: field.to_string(),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{Memory, SegmentedLayer},
        test::image::ISF,
    };

    const BASE: u64 = 0xffff_f800_0000_0000;

    /// One `_ETHREAD` at BASE with recognizable member values.
    fn sample() -> (SegmentedLayer, SymbolTable) {
        let mut data = vec![0_u8; 0x600];

        // Cid
        data[0x478..0x480].copy_from_slice(&1234_u64.to_le_bytes());
        data[0x480..0x488].copy_from_slice(&5678_u64.to_le_bytes());

        // Tcb.ApcState: InProgressFlags = 0b10, KernelApcPending = 1, UserApcPendingAll = 0b10
        data[0x98 + 0x28] = 0b10;
        data[0x98 + 0x29] = 1;
        data[0x98 + 0x2a] = 0b10;

        let mut layer = SegmentedLayer::new(Memory::new(data));
        layer.add_segment(BASE, 0, 0x600).unwrap();
        (layer, SymbolTable::from_isf_str(ISF).unwrap())
    }

    #[test]
    fn members_and_scalars() {
        let (layer, symbols) = sample();
        let ctx = Context::new(&layer, &symbols);
        let thread = StructReader::new(ctx, BASE, "_ETHREAD");

        assert_eq!(thread.address(), BASE);
        assert_eq!(thread.structure(), "_ETHREAD");

        let cid = thread.member("Cid").unwrap();
        assert_eq!(cid.structure(), "_CLIENT_ID");
        assert_eq!(cid.address(), BASE + 0x478);
        assert_eq!(cid.read_field("UniqueProcess").unwrap(), Value::Address(1234));
        assert_eq!(cid.read_pointer("UniqueThread").unwrap(), 5678);

        let state = thread.member("Tcb").unwrap().member("ApcState").unwrap();
        assert_eq!(state.address(), BASE + 0x98);
        assert_eq!(state.read_unsigned("InProgressFlags").unwrap(), 0b10);
        assert_eq!(state.read_field("KernelApcInProgress").unwrap(), Value::Bool(false));
        assert!(state.read_bool("SpecialApcInProgress").unwrap());
        assert!(state.read_bool("KernelApcPending").unwrap());
        assert!(state.read_bool("UserApcPending").unwrap());
        assert!(!state.read_bool("SpecialUserApcPending").unwrap());

        assert_eq!(
            state.element_address("ApcListHead", 1).unwrap(),
            BASE + 0x98 + 0x10
        );
    }

    #[test]
    fn signed_values() {
        let mut data = vec![0_u8; 0x58];
        data[0x51] = 0xff;
        data[0x52] = 0xff;
        let mut layer = SegmentedLayer::new(Memory::new(data));
        layer.add_segment(BASE, 0, 0x58).unwrap();
        let symbols = SymbolTable::from_isf_str(ISF).unwrap();
        let apc = StructReader::new(Context::new(&layer, &symbols), BASE, "_KAPC");

        // ApcMode is a signed char, Inserted an unsigned one
        assert_eq!(apc.read_field("ApcMode").unwrap(), Value::Integer(u64::MAX));
        assert_eq!(apc.read_unsigned("Inserted").unwrap(), 0xff);
        assert!(apc.read_bool("Inserted").unwrap());
    }

    #[test]
    fn strings() {
        let mut data = vec![0_u8; 0x600];
        data[0x5a8..0x5b7].copy_from_slice(b"averyverylongna");
        data[0x5a8 + 4] = 0xff;
        let mut layer = SegmentedLayer::new(Memory::new(data));
        layer.add_segment(BASE, 0, 0x600).unwrap();
        let symbols = SymbolTable::from_isf_str(ISF).unwrap();
        let process = StructReader::new(Context::new(&layer, &symbols), BASE, "_EPROCESS");

        assert_eq!(
            process.read_string("ImageFileName", 256).unwrap(),
            "aver\u{fffd}verylongna"
        );
        assert_eq!(process.read_string("ImageFileName", 3).unwrap(), "ave");
        assert_eq!(
            process.read_field("ImageFileName").unwrap(),
            Value::String("aver\u{fffd}verylongna".to_string())
        );
    }

    #[test]
    fn errors() {
        let (layer, symbols) = sample();
        let ctx = Context::new(&layer, &symbols);
        let thread = StructReader::new(ctx, BASE, "_ETHREAD");

        assert!(matches!(
            thread.member("Cid").unwrap().member("UniqueThread"),
            Err(Error::BadType {
                expected: "structure",
                ..
            })
        ));
        assert!(matches!(thread.read_field("Tcb"), Err(Error::BadType { .. })));
        assert!(matches!(thread.read_field("Win32Thread"), Err(Error::BadOffset { .. })));
        assert!(matches!(
            StructReader::new(ctx, BASE, "_KTIMER").read_field("Header"),
            Err(Error::TypeNotFound(_))
        ));
        assert!(matches!(
            thread.member("Cid").unwrap().read_bool("UniqueThread"),
            Err(Error::BadType { expected: "boolean", .. })
        ));

        let state = thread.member("Tcb").unwrap().member("ApcState").unwrap();
        assert!(matches!(
            state.element_address("ApcListHead", 2),
            Err(Error::BadType { .. })
        ));
        assert!(matches!(
            state.read_string("KernelApcPending", 16),
            Err(Error::BadType { expected: "string", .. })
        ));

        let unmapped = StructReader::new(ctx, BASE + 0x1000, "_ETHREAD");
        assert!(matches!(
            unmapped.member("Cid").unwrap().read_pointer("UniqueThread"),
            Err(Error::Unreadable { .. })
        ));
    }
}
