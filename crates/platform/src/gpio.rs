//! Sysfs-backed single-bit GPIO lines.
//!
//! Lines are addressed by the full path of their `value` file and opened per
//! operation, so a line survives the kernel re-exporting the pin underneath
//! us.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// One output or input bit behind a sysfs `value` file.
#[derive(Debug, Clone)]
pub struct GpioLine {
    path: PathBuf,
}

impl GpioLine {
    /// Address the line at `path` (usually `/sys/class/gpio/gpioN/value`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the value file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drive the line high or low.
    pub fn set(&self, high: bool) -> Result<()> {
        fs::write(&self.path, if high { "1" } else { "0" }).map_err(|source| Error::Gpio {
            path: self.path.clone(),
            source,
        })
    }

    /// Read the line level.
    pub fn get(&self) -> Result<bool> {
        let raw = fs::read_to_string(&self.path).map_err(|source| Error::Gpio {
            path: self.path.clone(),
            source,
        })?;
        Ok(raw.trim_end().starts_with('1'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "0\n").unwrap();

        let line = GpioLine::new(&path);
        assert!(!line.get().unwrap());
        line.set(true).unwrap();
        assert!(line.get().unwrap());
        line.set(false).unwrap();
        assert!(!line.get().unwrap());
    }

    #[test]
    fn missing_value_file_is_a_gpio_error() {
        let line = GpioLine::new("/nonexistent/gpio/value");
        assert!(matches!(line.get(), Err(Error::Gpio { .. })));
        assert!(matches!(line.set(true), Err(Error::Gpio { .. })));
    }

    #[test]
    fn trailing_newline_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "1\n").unwrap();
        assert!(GpioLine::new(&path).get().unwrap());
    }
}
