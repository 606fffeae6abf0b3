//! Peripheral layer for the VP measurement/stimulation controller.
//!
//! One module per hardware block, each owning its bus link:
//!
//! - [`spi`] / [`i2c`] — bus link traits plus the `/dev/spidev*` and
//!   `/dev/i2c-*` production implementations
//! - [`gpio`] — sysfs-backed single-bit lines
//! - [`adc`] — IIO sysfs voltage readback
//! - [`ad5522`] — four-channel parametric measurement unit
//! - [`pmu`] — analog-board coordinator around the AD5522 (supply rails,
//!   offset DAC, clamped output sequencing, measurements)
//! - [`mcdc04`] — tri-stimulus color sensor
//! - [`tlc5948a`] — 16-channel constant-current LED driver
//! - [`se97`] — JC42-family temperature sensor with board-identity EEPROM
//! - [`identity`] — board/box identity readout from sysfs/1-Wire files
//!
//! Every bus-touching operation returns [`Result`]; argument-range
//! rejections are typed errors so callers decide whether to swallow them.
//! Drivers are generic over their link trait, which is what the [`mocks`]
//! implementations plug into under test.

pub mod adc;
pub mod ad5522;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod identity;
pub mod mcdc04;
pub mod pmu;
pub mod se97;
pub mod spi;
pub mod tlc5948a;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use error::{Error, Result};
pub use i2c::{I2cDevLink, I2cLink};
pub use spi::{SpiLink, SpidevLink};
