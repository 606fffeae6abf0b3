//! Mock bus links for tests.
//!
//! Shared-state doubles: cloning a mock yields a handle onto the same
//! underlying state, so a test can move one clone into the driver under
//! test and keep the other for inspection.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::i2c::I2cLink;
use crate::spi::SpiLink;
use crate::Result;

/// SPI link that records every transmitted frame and answers readbacks
/// with zeros.
#[derive(Clone, Default)]
pub struct RecordingSpi {
    writes: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl RecordingSpi {
    /// Fresh recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame transmitted so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.borrow().clone()
    }
}

impl SpiLink for RecordingSpi {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.writes.borrow_mut().push(frame.to_vec());
        Ok(())
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.writes.borrow_mut().push(tx.to_vec());
        rx.fill(0);
        Ok(())
    }
}

/// Register-level model of the AD5522 shift-register protocol.
///
/// Decodes write frames into the system/PMU/DAC register spaces and plays
/// the registers back through the two-transaction readback exchange, so
/// read-modify-write sequences observe real device state.
#[derive(Debug)]
pub struct PmuModel {
    /// System control register (22 bits).
    pub sysctrl: u32,
    /// Comparator status register.
    pub comp: u32,
    /// Alarm status register.
    pub alarm: u32,
    /// Per-channel PMU registers.
    pub pmu: [u32; 4],
    /// Global offset DAC (X1 of DAC address 0).
    pub offset_dac: u16,
    /// Per-channel DAC latches keyed by (channel, latch, address).
    pub dac: HashMap<(u8, u8, u8), u16>,
    /// Every write frame seen, oldest first.
    pub frames: Vec<[u8; 4]>,
    /// Number of readback exchanges served.
    pub readbacks: usize,
}

impl Default for PmuModel {
    fn default() -> Self {
        Self {
            sysctrl: 0,
            comp: 0,
            alarm: 0,
            pmu: [0; 4],
            offset_dac: 0,
            dac: HashMap::new(),
            frames: Vec::new(),
            readbacks: 0,
        }
    }
}

impl PmuModel {
    fn apply_write(&mut self, word: u32) {
        let mask = ((word >> 24) & 0xf) as u8;
        let latch = ((word >> 22) & 0x3) as u8;
        if mask == 0 {
            let sel = (word >> 22) & 0x3f;
            let val = word & 0x3f_ffff;
            match sel {
                0x00 => self.sysctrl = val,
                0x01 => self.comp = val,
                0x03 => self.alarm = val,
                _ => {}
            }
        } else if latch == 0 {
            let val = word & 0x3f_ffff;
            for ch in 0..4 {
                if mask & (1 << ch) != 0 {
                    self.pmu[ch as usize] = val;
                }
            }
        } else {
            let addr = ((word >> 16) & 0x3f) as u8;
            let val = (word & 0xffff) as u16;
            if addr == 0 {
                self.offset_dac = val;
            } else {
                for ch in 0..4 {
                    if mask & (1 << ch) != 0 {
                        self.dac.insert((ch, latch, addr), val);
                    }
                }
            }
        }
    }

    fn fetch(&self, word: u32) -> u32 {
        let mask = ((word >> 24) & 0xf) as u8;
        let latch = ((word >> 22) & 0x3) as u8;
        if mask == 0 {
            match (word >> 22) & 0x3f {
                0x00 => self.sysctrl,
                0x01 => self.comp,
                0x03 => self.alarm,
                _ => 0,
            }
        } else if latch == 0 {
            let ch = mask.trailing_zeros() as usize;
            self.pmu[ch]
        } else {
            let addr = ((word >> 16) & 0x3f) as u8;
            if addr == 0 {
                return u32::from(self.offset_dac);
            }
            let ch = mask.trailing_zeros() as u8;
            let default = match latch {
                2 => 0xffff, // C latch power-on default
                _ => 0x8000, // M and X1 power-on default
            };
            u32::from(*self.dac.get(&(ch, latch, addr)).unwrap_or(&default))
        }
    }

    /// Convenience accessor for a FIN X1 latch.
    pub fn fin_x1(&self, ch: u8, addr: u8) -> Option<u16> {
        self.dac.get(&(ch, 3, addr)).copied()
    }
}

/// [`SpiLink`] handle onto a shared [`PmuModel`].
#[derive(Clone, Default)]
pub struct PmuModelLink {
    state: Rc<RefCell<PmuModel>>,
}

impl PmuModelLink {
    /// Fresh model with power-on register state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the model for inspection and seeding.
    pub fn state(&self) -> Rc<RefCell<PmuModel>> {
        self.state.clone()
    }
}

impl SpiLink for PmuModelLink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        if let Ok(bytes) = <[u8; 4]>::try_from(frame) {
            let mut model = self.state.borrow_mut();
            model.frames.push(bytes);
            let word = u32::from_be_bytes(bytes);
            if word & (1 << 28) == 0 {
                model.apply_write(word);
            }
        }
        Ok(())
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let mut model = self.state.borrow_mut();
        model.readbacks += 1;
        let word = tx
            .get(..4)
            .and_then(|b| <[u8; 4]>::try_from(b).ok())
            .map(u32::from_be_bytes)
            .unwrap_or(0);
        let val = model.fetch(word);
        if rx.len() >= 3 {
            rx[0] = ((val >> 16) & 0x3f) as u8;
            rx[1] = (val >> 8) as u8;
            rx[2] = val as u8;
        }
        Ok(())
    }
}

/// One logged I2C operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cOp {
    /// Byte register read.
    ReadByte(u8),
    /// Byte register write.
    WriteByte(u8, u8),
    /// Word register read.
    ReadWord(u8),
    /// Word register write.
    WriteWord(u8, u16),
    /// Block read.
    ReadBlock(u8),
    /// Block write.
    WriteBlock(u8, Vec<u8>),
}

/// Backing store of a [`RegisterFileI2c`].
#[derive(Debug, Default)]
pub struct I2cRegFile {
    /// 8-bit registers.
    pub bytes: HashMap<u8, u8>,
    /// 16-bit registers (SMBus word order).
    pub words: HashMap<u8, u16>,
    /// Block regions keyed by start register.
    pub blocks: HashMap<u8, Vec<u8>>,
    /// Every operation, oldest first.
    pub log: Vec<I2cOp>,
}

impl I2cRegFile {
    /// How many word reads hit `reg`.
    pub fn reads_of(&self, reg: u8) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, I2cOp::ReadWord(r) if *r == reg))
            .count()
    }
}

/// I2C link over an in-memory register file, with an operation log.
#[derive(Clone, Default)]
pub struct RegisterFileI2c {
    state: Rc<RefCell<I2cRegFile>>,
}

impl RegisterFileI2c {
    /// Fresh register file, all registers reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the register file for inspection and seeding.
    pub fn state(&self) -> Rc<RefCell<I2cRegFile>> {
        self.state.clone()
    }
}

impl I2cLink for RegisterFileI2c {
    fn read_byte(&mut self, reg: u8) -> Result<u8> {
        let mut state = self.state.borrow_mut();
        state.log.push(I2cOp::ReadByte(reg));
        Ok(state.bytes.get(&reg).copied().unwrap_or(0))
    }

    fn write_byte(&mut self, reg: u8, val: u8) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.log.push(I2cOp::WriteByte(reg, val));
        state.bytes.insert(reg, val);
        Ok(())
    }

    fn read_word(&mut self, reg: u8) -> Result<u16> {
        let mut state = self.state.borrow_mut();
        state.log.push(I2cOp::ReadWord(reg));
        Ok(state.words.get(&reg).copied().unwrap_or(0))
    }

    fn write_word(&mut self, reg: u8, val: u16) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.log.push(I2cOp::WriteWord(reg, val));
        state.words.insert(reg, val);
        Ok(())
    }

    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.log.push(I2cOp::ReadBlock(reg));
        buf.fill(0);
        if let Some(block) = state.blocks.get(&reg) {
            let n = block.len().min(buf.len());
            buf[..n].copy_from_slice(&block[..n]);
        }
        Ok(())
    }

    fn write_block(&mut self, reg: u8, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.log.push(I2cOp::WriteBlock(reg, data.to_vec()));
        state.blocks.insert(reg, data.to_vec());
        Ok(())
    }
}
