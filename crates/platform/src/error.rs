//! Error type shared by every bus-touching operation in this crate.

use std::io;
use std::path::PathBuf;

/// Errors raised by the peripheral layer.
///
/// Transport variants wrap the underlying OS failure; the argument-range
/// variants exist so the script-binding layer can keep the warn-and-ignore
/// surface while programmatic callers get a hard error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SPI device-node setup or transfer failed.
    #[error("spi transfer failed: {0}")]
    Spi(#[source] io::Error),

    /// I2C/SMBus transfer failed.
    #[error("i2c transfer failed: {0}")]
    I2c(#[from] i2cdev::linux::LinuxI2CError),

    /// Sysfs GPIO value file could not be accessed.
    #[error("gpio {path}: {source}")]
    Gpio {
        /// Path of the value file.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// IIO ADC attribute could not be read or parsed.
    #[error("adc readback via {path}: {reason}")]
    Adc {
        /// Path of the raw-voltage attribute.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// PMU channel index outside [0, 3].
    #[error("invalid pmu channel {0}")]
    InvalidChannel(u8),

    /// Mode selector outside the device's mode table.
    #[error("invalid mode {0}")]
    InvalidMode(u8),

    /// Current range selector outside [0, 4].
    #[error("invalid current range {0}")]
    InvalidRange(u8),

    /// LED channel outside [0, 15].
    #[error("invalid led channel {0}")]
    InvalidLedChannel(u8),

    /// Gain index outside the device's gain table.
    #[error("invalid gain index {0}")]
    InvalidGain(u8),

    /// Operation the hardware revision does not support.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Identity source file or directory was missing or malformed.
    #[error("identity readout failed: {0}")]
    Identity(String),
}

impl Error {
    /// True for argument-range rejections (as opposed to transport faults).
    ///
    /// The script bindings swallow these with a warning, preserving the
    /// historical no-op behavior; transport faults always surface.
    pub fn is_argument_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidChannel(_)
                | Error::InvalidMode(_)
                | Error::InvalidRange(_)
                | Error::InvalidLedChannel(_)
                | Error::InvalidGain(_)
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
