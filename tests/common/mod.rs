//! Shared fixtures for the integration tests and benchmarks.
//!
//! The synthetic image builder is the one used by the unit tests, compiled a second time
//! against the public API.

#![allow(dead_code)]

#[path = "../../src/test/image.rs"]
pub mod image;

pub use image::*;

use apcscope::{
    image::{Memory, SegmentedLayer},
    ScanConfig, SymbolTable,
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

/// Scan options matching the fixture image.
pub fn config() -> ScanConfig {
    ScanConfig::new().with_kernel_base(BASE)
}
