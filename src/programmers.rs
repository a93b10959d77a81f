//! Programmer registration and dispatch
//!
//! A programmer string names the bus back-end and its parameters:
//! `name` or `name:key1=value1,key2=value2`.

use std::collections::HashMap;

use norflash_core::flash::{FlashConfig, NorFlash};
use norflash_core::geometry::MemoryLayout;
use norflash_physmap::PhysmapBus;
use norflash_sim::{SimConfig, SimFamily, SimFlash, Size};

use crate::cli::FlashArgs;
use crate::handle::{Device, FlashHandle};
use crate::registry::programmer_names_short;

/// Base address the simulated window is placed at unless `base=` is given
const SIM_DEFAULT_BASE: u64 = 0x1000_0000;

/// Parsed programmer parameters
#[derive(Debug)]
pub struct ProgrammerParams {
    /// Programmer name as given
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

impl ProgrammerParams {
    fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    fn number(&self, key: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
        self.get(key)
            .map(|v| parse_size(v).ok_or_else(|| format!("Invalid value for {}: '{}'", key, v).into()))
            .transpose()
    }
}

/// Parse a programmer string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2"
pub fn parse_programmer_params(s: &str) -> Result<ProgrammerParams, Box<dyn std::error::Error>> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.trim().to_string(), value.trim().to_string());
            } else {
                return Err(
                    format!("Invalid parameter format: '{}' (expected key=value)", opt).into(),
                );
            }
        }
    }

    Ok(ProgrammerParams {
        name: name.to_string(),
        params,
    })
}

/// Parse a size or address: decimal, `0x` hex, or with a K/M suffix
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, scale) = match s.as_bytes().last()? {
        b'K' | b'k' => (&s[..s.len() - 1], 1024),
        b'M' | b'm' => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };
    value.checked_mul(scale)
}

/// Open the programmer named in `args` and initialize the part behind it
pub fn open_flash(args: &FlashArgs) -> Result<FlashHandle, Box<dyn std::error::Error>> {
    let params = parse_programmer_params(&args.programmer)?;

    let device = match params.name.as_str() {
        "sim" | "dummy" => open_sim(&params, args)?,
        "physmap" | "mmio" => open_physmap(&params, args)?,
        _ => return Err(unknown_programmer_error(&params.name)),
    };
    let handle = FlashHandle::new(device)?;

    log::info!(
        "Found: {:04X}:{:04X} ({} bytes, {})",
        handle.properties().part_id.manufacturer,
        handle.properties().part_id.device,
        handle.size(),
        handle.geometry().layout().name()
    );
    Ok(handle)
}

fn flash_config(base: u64, bus_width: u8, args: &FlashArgs) -> FlashConfig {
    FlashConfig::new(base, bus_width)
        .with_platform_flash(args.platform_flash)
        .with_poll_limit(args.poll_limit)
}

/// Describe the simulated part from a RON file or from inline parameters
fn sim_config(params: &ProgrammerParams) -> Result<SimConfig, Box<dyn std::error::Error>> {
    if let Some(path) = params.get("config") {
        log::info!("Loading simulated part from {}", path);
        return Ok(SimConfig::load(path)?);
    }

    let family = match params.get("family") {
        Some(name) => SimFamily::from_name(name)
            .ok_or_else(|| format!("Unknown family '{}' (expected intel or amd)", name))?,
        None => SimFamily::Intel,
    };
    let layout = match params.get("layout") {
        Some(name) => MemoryLayout::from_name(name)
            .ok_or_else(|| format!("Unknown layout '{}'", name))?,
        None => MemoryLayout::X16X16X1,
    };
    let size = params.number("size")?.unwrap_or(1 << 21);
    let block = params.number("block")?.unwrap_or(1 << 16);
    let size = u32::try_from(size).map_err(|_| "size does not fit in 32 bits")?;
    let block = u32::try_from(block).map_err(|_| "block does not fit in 32 bits")?;

    let mut config = SimConfig::uniform(family, layout, size, block);
    if let Some(buffer) = params.number("buffer")? {
        let buffer = u32::try_from(buffer).map_err(|_| "buffer does not fit in 32 bits")?;
        config.write_buffer = Size::B(buffer);
    }
    config.validate()?;
    Ok(config)
}

fn open_sim(
    params: &ProgrammerParams,
    args: &FlashArgs,
) -> Result<Device, Box<dyn std::error::Error>> {
    let config = sim_config(params)?;
    let base = params.number("base")?.unwrap_or(SIM_DEFAULT_BASE);
    let bus_width = config.layout.bus_width() as u8;
    let mut sim = SimFlash::new(config, base)?;

    let image = params.get("image").map(std::path::PathBuf::from);
    if let Some(path) = image.as_ref().filter(|p| p.exists()) {
        let contents = std::fs::read(path)?;
        let array = sim.data_mut();
        if contents.len() != array.len() {
            return Err(format!(
                "Image {} is {} bytes, simulated part is {} bytes",
                path.display(),
                contents.len(),
                array.len()
            )
            .into());
        }
        array.copy_from_slice(&contents);
        log::debug!("Loaded simulated array from {}", path.display());
    }

    let flash = NorFlash::initialize(sim, flash_config(base, bus_width, args))?;
    Ok(Device::Sim { flash, image })
}

fn open_physmap(
    params: &ProgrammerParams,
    args: &FlashArgs,
) -> Result<Device, Box<dyn std::error::Error>> {
    let usage = "Usage: physmap:base=<addr>,size=<bytes>[,width=1|2|4|8]";
    let base = params
        .number("base")?
        .ok_or_else(|| format!("physmap requires base=<addr>\n{}", usage))?;
    let size = params
        .number("size")?
        .ok_or_else(|| format!("physmap requires size=<bytes>\n{}", usage))?;
    let width = params.number("width")?.unwrap_or(2);
    let width = u8::try_from(width).map_err(|_| format!("Invalid bus width {}", width))?;
    let size = usize::try_from(size).map_err(|_| "size does not fit in memory")?;

    log::info!("Mapping {:#x} bytes of flash at {:#x}...", size, base);
    let bus = PhysmapBus::open(base, size).map_err(|e| {
        format!(
            "Failed to map flash window: {}\nMake sure you have root privileges.",
            e
        )
    })?;
    let flash = NorFlash::initialize(bus, flash_config(base, width, args))?;
    Ok(Device::Physmap(flash))
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    format!(
        "Unknown programmer: {}\nAvailable: {}\nUse 'norflash list-programmers' for more details",
        name,
        programmer_names_short()
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(programmer: &str) -> FlashArgs {
        FlashArgs {
            programmer: programmer.to_string(),
            platform_flash: false,
            poll_limit: None,
        }
    }

    #[test]
    fn test_parse_params() {
        let p = parse_programmer_params("sim:family=amd,size=0x100000").unwrap();
        assert_eq!(p.name, "sim");
        assert_eq!(p.get("family"), Some("amd"));
        assert_eq!(p.number("size").unwrap(), Some(0x100000));
        assert_eq!(p.number("block").unwrap(), None);

        let p = parse_programmer_params("physmap").unwrap();
        assert!(p.params.is_empty());

        assert!(parse_programmer_params("sim:family").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("0x1000"), Some(0x1000));
        assert_eq!(parse_size("64K"), Some(0x10000));
        assert_eq!(parse_size("2M"), Some(0x200000));
        assert_eq!(parse_size("0x10k"), Some(0x4000));
        assert_eq!(parse_size("twelve"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_open_sim() {
        let mut handle = open_flash(&args("sim:family=amd,size=1M,block=64K")).unwrap();
        assert_eq!(handle.size(), 1 << 20);
        assert_eq!(handle.geometry().num_blocks(), 16);
        handle.erase(0, 1).unwrap();
        handle.write(0, b"norflash").unwrap();
        let mut buf = [0u8; 8];
        handle.read(0, &mut buf).unwrap();
        assert_eq!(&buf, b"norflash");
        handle.close().unwrap();
    }

    #[test]
    fn test_open_errors() {
        assert!(open_flash(&args("ch341a")).is_err());
        assert!(open_flash(&args("sim:family=zilog")).is_err());
        assert!(open_flash(&args("sim:layout=x99")).is_err());
        assert!(open_flash(&args("sim:size=3M")).is_err());
        assert!(open_flash(&args("physmap:size=0x1000")).is_err());
    }
}
