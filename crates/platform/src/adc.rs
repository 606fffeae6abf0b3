//! Measurement ADC readback through the industrial-I/O sysfs interface.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::{Error, Result};

/// Raw-voltage attribute inside the IIO device directory.
const RAW_ATTR: &str = "in_voltage0_raw";

/// Pause between the triggering read and the one that is kept.
const RESAMPLE_DELAY: Duration = Duration::from_micros(10);

/// Reader for `iio:deviceN/in_voltage0_raw`.
#[derive(Debug, Clone)]
pub struct AdcReader {
    attr: PathBuf,
}

impl AdcReader {
    /// Address the ADC under the IIO device directory `iio_dir`.
    pub fn new(iio_dir: impl AsRef<Path>) -> Self {
        Self {
            attr: iio_dir.as_ref().join(RAW_ATTR),
        }
    }

    /// Read the raw conversion result.
    ///
    /// Reads the attribute twice: the first read triggers the sample, so
    /// only the second result is valid.
    pub fn read_raw(&self) -> Result<i32> {
        let _ = self.read_once()?;
        thread::sleep(RESAMPLE_DELAY);
        self.read_once()
    }

    fn read_once(&self) -> Result<i32> {
        let raw = fs::read_to_string(&self.attr).map_err(|e| Error::Adc {
            path: self.attr.clone(),
            reason: e.to_string(),
        })?;
        raw.trim().parse().map_err(|e| Error::Adc {
            path: self.attr.clone(),
            reason: format!("not a number: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_raw_attribute() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_voltage0_raw"), "40123\n").unwrap();
        let adc = AdcReader::new(dir.path());
        assert_eq!(adc.read_raw().unwrap(), 40123);
    }

    #[test]
    fn garbage_is_an_adc_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in_voltage0_raw"), "not-a-number").unwrap();
        let adc = AdcReader::new(dir.path());
        assert!(matches!(adc.read_raw(), Err(Error::Adc { .. })));
    }

    #[test]
    fn missing_device_is_an_adc_error() {
        let adc = AdcReader::new("/nonexistent/iio:device9");
        assert!(matches!(adc.read_raw(), Err(Error::Adc { .. })));
    }
}
