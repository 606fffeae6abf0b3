//! I2C register-bank link with SMBus semantics.
//!
//! Multi-byte values cross the wire in whatever order the chip's datasheet
//! dictates; the owning peripheral does the swapping, never the link.

use std::path::Path;

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;

use crate::Result;

/// Transport seam for I2C-attached register banks.
pub trait I2cLink {
    /// Read an 8-bit register.
    fn read_byte(&mut self, reg: u8) -> Result<u8>;

    /// Write an 8-bit register.
    fn write_byte(&mut self, reg: u8, val: u8) -> Result<()>;

    /// Read a 16-bit register (SMBus word order).
    fn read_word(&mut self, reg: u8) -> Result<u16>;

    /// Write a 16-bit register (SMBus word order).
    fn write_word(&mut self, reg: u8, val: u16) -> Result<()>;

    /// Read `buf.len()` bytes starting at register `reg`.
    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> Result<()>;

    /// Write a block of bytes starting at register `reg`.
    fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<()>;
}

impl<L: I2cLink + ?Sized> I2cLink for Box<L> {
    fn read_byte(&mut self, reg: u8) -> Result<u8> {
        (**self).read_byte(reg)
    }

    fn write_byte(&mut self, reg: u8, val: u8) -> Result<()> {
        (**self).write_byte(reg, val)
    }

    fn read_word(&mut self, reg: u8) -> Result<u16> {
        (**self).read_word(reg)
    }

    fn write_word(&mut self, reg: u8, val: u16) -> Result<()> {
        (**self).write_word(reg, val)
    }

    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        (**self).read_block(reg, buf)
    }

    fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<()> {
        (**self).write_block(reg, data)
    }
}

/// Production link over `/dev/i2c-N` with a fixed slave address.
pub struct I2cDevLink {
    dev: LinuxI2CDevice,
}

impl I2cDevLink {
    /// Open the bus device node and select `slave_addr`.
    pub fn open(path: impl AsRef<Path>, slave_addr: u16) -> Result<Self> {
        let dev = LinuxI2CDevice::new(path, slave_addr)?;
        Ok(Self { dev })
    }
}

impl I2cLink for I2cDevLink {
    fn read_byte(&mut self, reg: u8) -> Result<u8> {
        Ok(self.dev.smbus_read_byte_data(reg)?)
    }

    fn write_byte(&mut self, reg: u8, val: u8) -> Result<()> {
        Ok(self.dev.smbus_write_byte_data(reg, val)?)
    }

    fn read_word(&mut self, reg: u8) -> Result<u16> {
        Ok(self.dev.smbus_read_word_data(reg)?)
    }

    fn write_word(&mut self, reg: u8, val: u16) -> Result<()> {
        Ok(self.dev.smbus_write_word_data(reg, val)?)
    }

    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        // set the address pointer, then sequential-read
        self.dev.write(&[reg])?;
        Ok(self.dev.read(buf)?)
    }

    fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(1 + data.len());
        frame.push(reg);
        frame.extend_from_slice(data);
        Ok(self.dev.write(&frame)?)
    }
}
