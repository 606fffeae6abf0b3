//! Board and box identity readout.
//!
//! The board identity is the tail of an EEPROM image exported through
//! sysfs; the box identity comes from the 1-Wire subsystem, which exposes
//! one directory per slave named `<family>.<serial>`. The box ID slave
//! carries family code 0x23.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Length of the board identity tail in the EEPROM image.
const BOARD_ID_SIZE: usize = 6;

/// 1-Wire family code prefix of the box identity slave.
const BOX_ID_FAMILY_PREFIX: &str = "23.";

/// Identity sources plus the firmware version string reported to clients.
#[derive(Debug, Clone)]
pub struct Identity {
    board_id_path: PathBuf,
    box_id_path: PathBuf,
    version: String,
}

impl Identity {
    /// Address the identity sources.
    pub fn new(
        board_id_path: impl Into<PathBuf>,
        box_id_path: impl Into<PathBuf>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            board_id_path: board_id_path.into(),
            box_id_path: box_id_path.into(),
            version: version.into(),
        }
    }

    /// Unique board ID: the last six EEPROM bytes as uppercase hex.
    pub fn board_id(&self) -> Result<String> {
        let mut file = fs::File::open(&self.board_id_path)
            .map_err(|e| Error::Identity(format!("{}: {e}", self.board_id_path.display())))?;
        file.seek(SeekFrom::End(-(BOARD_ID_SIZE as i64)))
            .map_err(|e| Error::Identity(format!("seek: {e}")))?;
        let mut tail = [0u8; BOARD_ID_SIZE];
        file.read_exact(&mut tail)
            .map_err(|e| Error::Identity(format!("read: {e}")))?;
        Ok(tail.iter().map(|b| format!("{b:02X}")).collect())
    }

    /// Unique box ID: the address of the first family-0x23 slave on the
    /// 1-Wire bus directory.
    pub fn box_id(&self) -> Result<String> {
        let entries = fs::read_dir(&self.box_id_path)
            .map_err(|e| Error::Identity(format!("{}: {e}", self.box_id_path.display())))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(BOX_ID_FAMILY_PREFIX) {
                return read_address_file(&entry.path().join("address"));
            }
        }
        Err(Error::Identity(format!(
            "no family-23 slave under {}",
            self.box_id_path.display()
        )))
    }

    /// Firmware version string.
    pub fn version(&self) -> &str {
        &self.version
    }
}

fn read_address_file(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Identity(format!("{}: {e}", path.display())))?;
    Ok(raw.trim_end().to_owned())
}
