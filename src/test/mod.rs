//! Helper functions and fixtures for testing
//!
//! The synthetic image layout lives in [`image`]; the functions here turn a finished
//! [`ImageBuilder`] into the address space and symbol table the library reads through.


pub use image::{ImageBuilder, BASE, ISF, PS_ACTIVE_PROCESS_HEAD};

use crate::{
    image::{Memory, SegmentedLayer},
    SymbolTable,
};

/// Maps a built image at [`BASE`], leaving out its unmapped ranges.
pub fn layer(builder: ImageBuilder) -> SegmentedLayer {
    let segments = builder.segments();
    let mut layer = SegmentedLayer::new(Memory::new(builder.into_data()));
    for (virtual_address, offset, length) in segments {
        layer.add_segment(virtual_address, offset, length).unwrap();
    }
    layer
}

/// Parses the fixture symbol table.
pub fn symbols() -> SymbolTable {
    SymbolTable::from_isf_str(ISF).unwrap()
}
