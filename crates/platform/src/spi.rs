//! SPI bus link over a Linux spidev character device.

use std::path::Path;

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::{Error, Result};

/// SPI clock mode (CPOL, CPHA).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0.
    Mode0,
    /// CPOL=0, CPHA=1.
    Mode1,
    /// CPOL=1, CPHA=0.
    Mode2,
    /// CPOL=1, CPHA=1.
    Mode3,
}

impl SpiMode {
    fn flags(self) -> SpiModeFlags {
        match self {
            SpiMode::Mode0 => SpiModeFlags::SPI_MODE_0,
            SpiMode::Mode1 => SpiModeFlags::SPI_MODE_1,
            SpiMode::Mode2 => SpiModeFlags::SPI_MODE_2,
            SpiMode::Mode3 => SpiModeFlags::SPI_MODE_3,
        }
    }
}

/// Transport seam for SPI-attached peripherals.
///
/// Drivers stay generic over this trait so tests can substitute recording
/// links or small device models for the character device.
pub trait SpiLink {
    /// Shift `frame` out on the wire.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Shift `tx` out, then clock `rx.len()` bytes back in a second
    /// transfer while sending all-ones fill.
    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;
}

impl<L: SpiLink + ?Sized> SpiLink for &mut L {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        (**self).write(frame)
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        (**self).write_then_read(tx, rx)
    }
}

impl<L: SpiLink + ?Sized> SpiLink for Box<L> {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        (**self).write(frame)
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        (**self).write_then_read(tx, rx)
    }
}

/// Production link over `/dev/spidevB.C`.
pub struct SpidevLink {
    dev: Spidev,
}

impl SpidevLink {
    /// Open `path` and apply clock mode, word size and maximum clock rate.
    pub fn open(
        path: impl AsRef<Path>,
        mode: SpiMode,
        bits_per_word: u8,
        max_speed_hz: u32,
    ) -> Result<Self> {
        let mut dev = Spidev::open(path).map_err(Error::Spi)?;
        let options = SpidevOptions::new()
            .bits_per_word(bits_per_word)
            .max_speed_hz(max_speed_hz)
            .mode(mode.flags())
            .build();
        dev.configure(&options).map_err(Error::Spi)?;
        Ok(Self { dev })
    }
}

impl SpiLink for SpidevLink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let mut transfer = SpidevTransfer::write(frame);
        self.dev.transfer(&mut transfer).map_err(Error::Spi)
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.write(tx)?;
        let fill = vec![0xff; rx.len()];
        let mut transfer = SpidevTransfer::read_write(&fill, rx);
        self.dev.transfer(&mut transfer).map_err(Error::Spi)
    }
}
