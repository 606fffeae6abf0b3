//! TLC5948A 16-channel constant-current LED driver (SPI).
//!
//! One 257-bit shift register feeds two latches, selected by the MSB of the
//! first transmitted byte: 1 targets the control latch (dot correction,
//! global brightness, function control), 0 the grayscale latch. Grayscale
//! codes are 16-bit big-endian and the channel order is reversed across the
//! wire: channel ch occupies bytes `1 + (15 - ch) * 2` and the one after.

use std::thread;
use std::time::Duration;

use crate::spi::SpiLink;
use crate::{Error, Result};

/// Number of constant-current outputs.
pub const CHANNEL_COUNT: usize = 16;

/// Shift register length in bytes (257 bits).
pub const REGISTER_SIZE: usize = 33;

/// Pause after the control-latch write before grayscale data follows.
const LATCH_SETTLE: Duration = Duration::from_millis(1);

/// Power-on control latch: latch-select MSB, default function control,
/// full global brightness and dot correction.
const CTRL_DEFAULT: [u8; REGISTER_SIZE] = [
    0x01, // control latch select bit
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // bits 192..255
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // bits 128..191
    0x85, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // bits  64..127
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // bits   0..63
];

/// Driver state: the two latch images and the stored "on" brightness.
pub struct LedDriver<L: SpiLink> {
    link: L,
    ctrl_reg: [u8; REGISTER_SIZE],
    gs_reg: [u8; REGISTER_SIZE],
    on_brightness: [u16; CHANNEL_COUNT],
}

impl<L: SpiLink> LedDriver<L> {
    /// Open the driver: program the default control latch, then clear the
    /// grayscale latch so every channel starts dark. Stored brightness
    /// defaults to full scale.
    pub fn new(link: L) -> Result<Self> {
        let mut driver = Self {
            link,
            ctrl_reg: CTRL_DEFAULT,
            gs_reg: [0; REGISTER_SIZE],
            on_brightness: [0xffff; CHANNEL_COUNT],
        };
        driver.send_ctrl()?;
        thread::sleep(LATCH_SETTLE);
        driver.turn_all_off()?;
        Ok(driver)
    }

    fn send_ctrl(&mut self) -> Result<()> {
        let frame = self.ctrl_reg;
        self.link.write(&frame)
    }

    fn send_grayscale(&mut self) -> Result<()> {
        let frame = self.gs_reg;
        self.link.write(&frame)
    }

    fn check_channel(ch: u8) -> Result<usize> {
        if usize::from(ch) >= CHANNEL_COUNT {
            return Err(Error::InvalidLedChannel(ch));
        }
        Ok(usize::from(ch))
    }

    /// Place `level` in the grayscale image slot of `ch`. Buffer only, no
    /// transmission.
    fn set_grayscale_slot(&mut self, ch: usize, level: u16) {
        let offset = 1 + (CHANNEL_COUNT - 1 - ch) * 2;
        self.gs_reg[offset] = (level >> 8) as u8;
        self.gs_reg[offset + 1] = (level & 0xff) as u8;
    }

    /// Store the brightness `turn_on` will use for `ch`. Does not touch
    /// the grayscale latch.
    pub fn set_brightness(&mut self, ch: u8, level: u16) -> Result<()> {
        let ch = Self::check_channel(ch)?;
        self.on_brightness[ch] = level;
        Ok(())
    }

    /// Light `ch` at its stored brightness and transmit the latch.
    pub fn turn_on(&mut self, ch: u8) -> Result<()> {
        let ch = Self::check_channel(ch)?;
        self.set_grayscale_slot(ch, self.on_brightness[ch]);
        self.send_grayscale()
    }

    /// Darken `ch` and transmit the latch.
    pub fn turn_off(&mut self, ch: u8) -> Result<()> {
        let ch = Self::check_channel(ch)?;
        self.set_grayscale_slot(ch, 0);
        self.send_grayscale()
    }

    /// Zero the whole grayscale latch and transmit it. Stored brightness
    /// values are untouched.
    pub fn turn_all_off(&mut self) -> Result<()> {
        self.gs_reg = [0; REGISTER_SIZE];
        self.send_grayscale()
    }

    /// Current grayscale latch image.
    pub fn grayscale_image(&self) -> &[u8; REGISTER_SIZE] {
        &self.gs_reg
    }

    /// Stored "on" brightness for `ch`.
    pub fn brightness(&self, ch: u8) -> Result<u16> {
        let ch = Self::check_channel(ch)?;
        Ok(self.on_brightness[ch])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingSpi;

    fn driver() -> (LedDriver<RecordingSpi>, RecordingSpi) {
        let link = RecordingSpi::new();
        let handle = link.clone();
        (LedDriver::new(link).unwrap(), handle)
    }

    #[test]
    fn construction_sends_control_then_cleared_grayscale() {
        let (_driver, spi) = driver();
        let writes = spi.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].len(), REGISTER_SIZE);
        assert_eq!(writes[0][0], 0x01, "first frame selects the control latch");
        assert_eq!(writes[1], vec![0u8; REGISTER_SIZE]);
        assert_eq!(writes[1][0], 0x00, "second frame selects the grayscale latch");
    }

    #[test]
    fn turn_on_places_stored_brightness_in_the_reversed_slot() {
        let (mut driver, spi) = driver();
        driver.turn_on(5).unwrap();
        // channel 5 occupies bytes 21 and 22
        let image = driver.grayscale_image();
        assert_eq!(image[21], 0xff);
        assert_eq!(image[22], 0xff);
        let untouched: Vec<usize> = (0..REGISTER_SIZE).filter(|i| *i != 21 && *i != 22).collect();
        for i in untouched {
            assert_eq!(image[i], 0, "byte {i} must stay zero");
        }
        assert_eq!(spi.writes().last().unwrap(), image.as_slice());
    }

    #[test]
    fn turn_off_zeroes_only_that_channel() {
        let (mut driver, _spi) = driver();
        driver.set_brightness(0, 0x1234).unwrap();
        driver.turn_on(0).unwrap();
        driver.turn_on(15).unwrap();
        driver.turn_off(0).unwrap();
        let image = driver.grayscale_image();
        // channel 0 sits at the far end, channel 15 at the front
        assert_eq!(&image[31..33], &[0, 0]);
        assert_eq!(&image[1..3], &[0xff, 0xff]);
    }

    #[test]
    fn set_brightness_feeds_the_next_turn_on() {
        let (mut driver, _spi) = driver();
        driver.set_brightness(3, 0xabcd).unwrap();
        driver.turn_on(3).unwrap();
        let offset = 1 + (15 - 3) * 2;
        assert_eq!(driver.grayscale_image()[offset], 0xab);
        assert_eq!(driver.grayscale_image()[offset + 1], 0xcd);
    }

    #[test]
    fn turn_all_off_clears_slots_but_keeps_brightness() {
        let (mut driver, _spi) = driver();
        driver.set_brightness(7, 0x4242).unwrap();
        driver.turn_on(7).unwrap();
        driver.turn_all_off().unwrap();
        assert_eq!(driver.grayscale_image(), &[0u8; REGISTER_SIZE]);
        assert_eq!(driver.brightness(7).unwrap(), 0x4242);
        driver.turn_on(7).unwrap();
        let offset = 1 + (15 - 7) * 2;
        assert_eq!(driver.grayscale_image()[offset], 0x42);
    }

    #[test]
    fn channel_16_is_rejected_without_transmitting() {
        let (mut driver, spi) = driver();
        let sent = spi.writes().len();
        assert!(matches!(
            driver.turn_on(16),
            Err(Error::InvalidLedChannel(16))
        ));
        assert!(driver.set_brightness(16, 1).is_err());
        assert_eq!(spi.writes().len(), sent, "no frame may go out");
    }
}
