//! MTD character-device driver.
//!
//! Wraps `/dev/mtdN` with the three primitives the filesystem adapter
//! needs: erase-block erase, byte-granular read and staged program.
//! The device is opened `O_RDWR | O_SYNC`, so writes reach the flash
//! before the call returns.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

mod sys;

pub use sys::MtdInfoUser;

/// Staging-buffer size for `program`.
const STAGE_SIZE: usize = 10 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MtdError {
    #[error("erase offset {offset:#x} not aligned to erase block size {block_size:#x}")]
    MisalignedErase { offset: u32, block_size: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An open MTD device and its geometry.
pub struct MtdDevice {
    file: File,
    info: MtdInfoUser,
}

impl MtdDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MtdError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path.as_ref())?;
        let mut info = MtdInfoUser::default();
        unsafe { sys::mtd_mem_get_info(file.as_raw_fd(), &mut info) }
            .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
        log::debug!(
            "MTD {}: size {:#x}, erase block {:#x}",
            path.as_ref().display(),
            info.size,
            info.erasesize
        );
        Ok(Self { file, info })
    }

    /// Total device size in bytes.
    pub fn size(&self) -> u32 {
        self.info.size
    }

    /// Erase-block size in bytes.
    pub fn erase_block_size(&self) -> u32 {
        self.info.erasesize
    }

    /// Erases the smallest run of erase blocks covering
    /// `[offset, offset + length)`. `offset` must be block-aligned.
    pub fn erase(&mut self, offset: u32, length: u32) -> Result<(), MtdError> {
        let block_size = self.info.erasesize;
        if offset % block_size != 0 {
            return Err(MtdError::MisalignedErase { offset, block_size });
        }
        let blocks = length.div_ceil(block_size);
        let mut erase = sys::EraseInfoUser {
            start: offset,
            length: block_size,
        };
        for block in 1..=blocks {
            log::debug!("erasing blocks: {block}/{blocks}");
            unsafe { sys::mtd_mem_erase(self.file.as_raw_fd(), &erase) }
                .map_err(|errno| io::Error::from_raw_os_error(errno as i32))?;
            erase.start += block_size;
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes at `offset`; a short read is an error.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), MtdError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Programs `data` at `offset` through the staging buffer. The
    /// target range must have been erased; a short write is an error.
    pub fn program(&mut self, offset: u64, data: &[u8]) -> Result<(), MtdError> {
        self.file.seek(SeekFrom::Start(offset))?;
        let total = data.len();
        let mut written = 0usize;
        for chunk in data.chunks(STAGE_SIZE) {
            self.file.write_all(chunk)?;
            written += chunk.len();
            log::debug!("writing data: {}k/{}k", written / 1024, total / 1024);
        }
        Ok(())
    }
}

impl Read for MtdDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for MtdDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}
