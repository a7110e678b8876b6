//! I2C EEPROM driver for the Boot-Strap Data device.
//!
//! The 256 KiB part is tiled over four consecutive slave addresses,
//! 64 KiB each. Every transfer carries a 2-byte big-endian on-slave
//! address prefix; reads use a dummy write followed by the read message
//! so the part keeps its address pointer, writes are one combined
//! message followed by the part's 10 ms write cycle.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;

pub mod plan;
mod sys;

pub use plan::{page_plan, PageChunk, PAGE_SIZE};

/// EEPROM internal write cycle.
const WRITE_SETTLE: Duration = Duration::from_millis(10);

/// Default I2C bus of the Boot-Strap Data EEPROM.
pub const DEFAULT_BUS: u8 = 1;

/// Default slave base address.
pub const DEFAULT_SLAVE_ADDR: u8 = 0x50;

#[derive(Debug, thiserror::Error)]
pub enum EepromError {
    #[error("I2C device not found at {addr:#04x}")]
    DeviceNotFound { addr: u8 },
    #[error("short I2C transfer")]
    ShortTransfer,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An open I2C bus bound to one EEPROM.
pub struct EepromDevice {
    file: File,
    slave_base: u8,
}

impl EepromDevice {
    /// Opens `/dev/i2c-<bus>`.
    pub fn open(bus: u8, slave_base: u8) -> Result<Self, EepromError> {
        let path = format!("/dev/i2c-{bus}");
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { file, slave_base })
    }

    /// Probes the device with a zero-length write.
    pub fn probe(&mut self) -> Result<(), EepromError> {
        let fd = self.file.as_raw_fd();
        unsafe { sys::i2c_slave(fd, i32::from(self.slave_base)) }
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        let rc = unsafe { libc::write(fd, std::ptr::null(), 0) };
        if rc < 0 {
            return Err(EepromError::DeviceNotFound {
                addr: self.slave_base,
            });
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes starting at the 24-bit logical `offset`.
    pub fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), EepromError> {
        let total = buf.len();
        let mut done = 0usize;
        for chunk in page_plan(offset, buf.len()) {
            log::debug!("reading from EEPROM: {done}/{total}");
            self.read_page(&chunk, &mut buf[done..done + chunk.len])?;
            done += chunk.len;
        }
        Ok(())
    }

    /// Writes `data` starting at the 24-bit logical `offset`.
    pub fn write_at(&mut self, offset: u32, data: &[u8]) -> Result<(), EepromError> {
        let total = data.len();
        let mut done = 0usize;
        for chunk in page_plan(offset, data.len()) {
            log::debug!("programming EEPROM: {done}/{total}");
            self.write_page(&chunk, &data[done..done + chunk.len])?;
            done += chunk.len;
        }
        Ok(())
    }

    fn read_page(&mut self, chunk: &PageChunk, buf: &mut [u8]) -> Result<(), EepromError> {
        let slave = u16::from(self.slave_base + chunk.slave_delta);
        let mut addr = chunk.on_slave.to_be_bytes();
        let mut msgs = [
            sys::I2cMsg {
                addr: slave,
                flags: 0,
                len: addr.len() as u16,
                buf: addr.as_mut_ptr(),
            },
            sys::I2cMsg {
                addr: slave,
                flags: sys::I2C_M_RD | sys::I2C_M_NOSTART,
                len: buf.len() as u16,
                buf: buf.as_mut_ptr(),
            },
        ];
        let data = sys::I2cRdwrIoctlData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        let sent = unsafe { sys::i2c_rdwr(self.file.as_raw_fd(), &data) }
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        if sent != msgs.len() as i32 {
            return Err(EepromError::ShortTransfer);
        }
        Ok(())
    }

    fn write_page(&mut self, chunk: &PageChunk, data: &[u8]) -> Result<(), EepromError> {
        let slave = u16::from(self.slave_base + chunk.slave_delta);
        let mut payload = Vec::with_capacity(2 + data.len());
        payload.extend_from_slice(&chunk.on_slave.to_be_bytes());
        payload.extend_from_slice(data);
        let mut msg = sys::I2cMsg {
            addr: slave,
            flags: 0,
            len: payload.len() as u16,
            buf: payload.as_mut_ptr(),
        };
        let data = sys::I2cRdwrIoctlData {
            msgs: &mut msg,
            nmsgs: 1,
        };
        let sent = unsafe { sys::i2c_rdwr(self.file.as_raw_fd(), &data) }
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        if sent != 1 {
            return Err(EepromError::ShortTransfer);
        }
        thread::sleep(WRITE_SETTLE);
        Ok(())
    }
}
