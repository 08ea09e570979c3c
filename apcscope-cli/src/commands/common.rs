use anyhow::{bail, Context as _};
use apcscope::{
    image::{Amd64Layer, Layer, Physical, SegmentedLayer},
    Context, ScanConfig, SymbolTable,
};

use crate::app::ImageOptions;

/// A memory image opened with its address translation and symbol table.
pub struct LoadedImage {
    layer: Box<dyn Layer>,
    symbols: SymbolTable,
}

impl LoadedImage {
    /// Structure access context over this image.
    pub fn ctx(&self) -> Context<'_> {
        Context::new(self.layer.as_ref(), &self.symbols)
    }
}

/// Open the image and symbol table named by `opts`.
pub fn load_image(opts: &ImageOptions) -> anyhow::Result<LoadedImage> {
    let symbols = SymbolTable::from_file(&opts.isf)
        .with_context(|| format!("failed to load symbol table: {}", opts.isf.display()))?;
    let physical = Physical::new(&opts.path)
        .with_context(|| format!("failed to open image: {}", opts.path.display()))?;

    let layer: Box<dyn Layer> = if let Some(dtb) = &opts.dtb {
        let dtb = parse_address(dtb)?;
        log::debug!("Translating through page tables at {:#x}", dtb);
        Box::new(Amd64Layer::new(physical, dtb))
    } else if !opts.segment.is_empty() {
        let mut layer = SegmentedLayer::new(physical);
        for segment in &opts.segment {
            let (virtual_address, offset, length) = parse_segment(segment)?;
            layer
                .add_segment(virtual_address, offset, length)
                .with_context(|| format!("invalid segment: {segment}"))?;
        }
        Box::new(layer)
    } else {
        bail!("an address space is required: pass --dtb or at least one --segment");
    };

    Ok(LoadedImage { layer, symbols })
}

/// Build the scan configuration from the image options and an optional PID list.
pub fn scan_config(opts: &ImageOptions, pids: &[u64]) -> anyhow::Result<ScanConfig> {
    let mut config = ScanConfig::new().with_kernel_base(parse_address(&opts.kernel_base)?);

    if let Some(head) = &opts.ps_head {
        config = config.with_process_list_head(parse_address(head)?);
    }
    if let Some(max_entries) = opts.max_entries {
        config = config.with_max_list_entries(max_entries);
    }
    if !pids.is_empty() {
        config = config.with_pids(pids.iter().copied());
    }

    Ok(config)
}

/// Parse an address supporting hex (0x...) and decimal.
pub fn parse_address(s: &str) -> anyhow::Result<u64> {
    let trimmed = s.trim().replace('`', "");
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex address: {s}"))
    } else {
        trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid address: {s}"))
    }
}

/// Parse a `VA:OFF:LEN` segment description.
pub fn parse_segment(s: &str) -> anyhow::Result<(u64, usize, usize)> {
    let parts: Vec<&str> = s.split(':').collect();
    let [virtual_address, offset, length] = parts.as_slice() else {
        bail!("invalid segment {s}: expected VA:OFF:LEN");
    };

    let offset = usize::try_from(parse_address(offset)?)
        .with_context(|| format!("segment offset out of range: {s}"))?;
    let length = usize::try_from(parse_address(length)?)
        .with_context(|| format!("segment length out of range: {s}"))?;

    Ok((parse_address(virtual_address)?, offset, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses() {
        assert_eq!(parse_address("0x1ad000").unwrap(), 0x1ad000);
        assert_eq!(parse_address("0XFF").unwrap(), 0xff);
        assert_eq!(parse_address("4096").unwrap(), 4096);
        assert_eq!(
            parse_address("0xfffff805`1e000000").unwrap(),
            0xfffff805_1e000000
        );
        assert!(parse_address("0xzz").is_err());
        assert!(parse_address("kernel").is_err());
    }

    #[test]
    fn segments() {
        assert_eq!(
            parse_segment("0xfffff80000000000:0x1000:4096").unwrap(),
            (0xfffff800_00000000, 0x1000, 4096)
        );
        assert!(parse_segment("0x1000:0").is_err());
        assert!(parse_segment("0x1000:0:1:2").is_err());
    }
}
