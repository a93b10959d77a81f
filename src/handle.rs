//! Programmer independent flash handle
//!
//! `NorFlash` is generic over its bus; the handle erases the bus type so
//! the commands do not care which programmer backs the part.

use std::path::PathBuf;

use norflash_core::cfi::Properties;
use norflash_core::flash::{DeviceCommand, DeviceResponse, NorFlash};
use norflash_core::geometry::Geometry;
use norflash_core::{Error, Result};
use norflash_physmap::PhysmapBus;
use norflash_sim::SimFlash;

/// Flash instance with its concrete bus
pub enum Device {
    /// Simulated part, optionally backed by an image file
    Sim {
        flash: NorFlash<SimFlash>,
        image: Option<PathBuf>,
    },
    /// Memory mapped part
    Physmap(NorFlash<PhysmapBus>),
}

macro_rules! with_flash {
    ($device:expr, $flash:ident => $body:expr) => {
        match $device {
            Device::Sim { flash: $flash, .. } => $body,
            Device::Physmap($flash) => $body,
        }
    };
}

/// An initialized flash part behind one of the supported programmers
pub struct FlashHandle {
    device: Device,
    geometry: Geometry,
    properties: Properties,
}

impl FlashHandle {
    /// Wrap an initialized device
    pub fn new(device: Device) -> Result<Self> {
        let (geometry, properties) = with_flash!(&device, f => {
            match (f.geometry(), f.properties()) {
                (Some(g), Some(p)) => (g.clone(), *p),
                _ => return Err(Error::NotInitialized),
            }
        });
        Ok(Self {
            device,
            geometry,
            properties,
        })
    }

    /// Geometry found at initialization
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Properties found at initialization
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Device size in bytes
    pub fn size(&self) -> u32 {
        self.geometry.device_size()
    }

    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<()> {
        with_flash!(&mut self.device, f => f.read(offset, buf))
    }

    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        with_flash!(&mut self.device, f => f.write(offset, data))
    }

    pub fn erase(&mut self, offset: u32, len: usize) -> Result<()> {
        with_flash!(&mut self.device, f => f.erase(offset, len))
    }

    pub fn lock(&mut self, offset: u32, len: usize) -> Result<()> {
        with_flash!(&mut self.device, f => f.lock(offset, len))
    }

    pub fn unlock(&mut self, offset: u32, len: usize) -> Result<()> {
        with_flash!(&mut self.device, f => f.unlock(offset, len))
    }

    pub fn erase_chip(&mut self) -> Result<()> {
        with_flash!(&mut self.device, f => f.erase_chip())
    }

    pub fn device_control(&mut self, command: DeviceCommand) -> Result<DeviceResponse> {
        with_flash!(&mut self.device, f => f.device_control(command))
    }

    /// Return the part to read array mode and persist simulated contents
    pub fn close(mut self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        with_flash!(&mut self.device, f => f.reset())?;
        if let Device::Sim {
            flash,
            image: Some(path),
        } = &self.device
        {
            std::fs::write(path, flash.bus().data())?;
            log::debug!("Saved simulated array to {}", path.display());
        }
        Ok(())
    }
}
