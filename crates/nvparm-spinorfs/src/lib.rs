//! LittleFS adapter over an MTD partition window.
//!
//! The filesystem library sees the partition as `block_count` erase
//! blocks through the read/prog/erase/sync callbacks below; block
//! arithmetic is translated into byte offsets against the MTD device.
//! The adapter writes through to the device on every callback, so the
//! littlefs `sync` hook has nothing to flush.
//!
//! Mount policy: a failed mount formats the window and retries once.
//! That is first-use bring-up behavior; the format silently discards
//! whatever occupied the partition.

use std::ffi::CString;
use std::marker::PhantomData;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::slice;

use bitflags::bitflags;
use littlefs2_sys as ll;
use nvparm_mtd::MtdDevice;

/// Read, program and cache size handed to littlefs (the SPI-NOR page).
const FS_READ_PROG_SIZE: u32 = 512;

/// Lookahead window; tracks 16 * 8 = 128 blocks.
const FS_LOOKAHEAD_SIZE: u32 = 16;

/// Block-level wear-levelling disabled.
const FS_BLOCK_CYCLES: i32 = -1;

// Stable littlefs ABI values; the bindgen constant names vary between
// binding releases, the numbers do not.
const LFS_ERR_IO: c_int = -5;
const LFS_ERR_INVAL: c_int = -22;
const LFS_SEEK_SET: c_int = 0;

bitflags! {
    /// File open flags, mirroring `lfs_open_flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: c_int {
        const RDONLY = 0x1;
        const WRONLY = 0x2;
        const RDWR = 0x3;
        const CREAT = 0x0100;
        const EXCL = 0x0200;
        const TRUNC = 0x0400;
        const APPEND = 0x0800;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("cannot mount filesystem (littlefs error {0})")]
    MountFailed(c_int),
    #[error("invalid file name")]
    BadFileName,
    #[error("littlefs error {0}")]
    Lfs(c_int),
}

fn lfs_result(code: c_int) -> Result<c_int, FsError> {
    if code < 0 {
        Err(FsError::Lfs(code))
    } else {
        Ok(code)
    }
}

/// Callback context: the device window the filesystem lives in.
struct BlockDev {
    dev: *mut MtdDevice,
    base: u64,
    block_size: u32,
    block_count: u32,
}

impl BlockDev {
    /// Byte offset of `(block, off)` on the MTD device.
    fn byte_offset(&self, block: u32, off: u32) -> u64 {
        self.base + u64::from(block) * u64::from(self.block_size) + u64::from(off)
    }
}

unsafe fn block_dev<'a>(c: *const ll::lfs_config) -> &'a mut BlockDev {
    &mut *((*c).context as *mut BlockDev)
}

unsafe extern "C" fn bd_read(
    c: *const ll::lfs_config,
    block: ll::lfs_block_t,
    off: ll::lfs_off_t,
    buffer: *mut c_void,
    size: ll::lfs_size_t,
) -> c_int {
    let bd = block_dev(c);
    if block > bd.block_count {
        return LFS_ERR_INVAL;
    }
    let buf = slice::from_raw_parts_mut(buffer as *mut u8, size as usize);
    match (*bd.dev).read_at(bd.byte_offset(block, off), buf) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("flash read failed at block {block}: {err}");
            LFS_ERR_IO
        }
    }
}

unsafe extern "C" fn bd_prog(
    c: *const ll::lfs_config,
    block: ll::lfs_block_t,
    off: ll::lfs_off_t,
    buffer: *const c_void,
    size: ll::lfs_size_t,
) -> c_int {
    let bd = block_dev(c);
    if block > bd.block_count {
        return LFS_ERR_INVAL;
    }
    let data = slice::from_raw_parts(buffer as *const u8, size as usize);
    match (*bd.dev).program(bd.byte_offset(block, off), data) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("flash program failed at block {block}: {err}");
            LFS_ERR_IO
        }
    }
}

unsafe extern "C" fn bd_erase(c: *const ll::lfs_config, block: ll::lfs_block_t) -> c_int {
    let bd = block_dev(c);
    if block > bd.block_count {
        return LFS_ERR_INVAL;
    }
    let offset = bd.byte_offset(block, 0);
    match (*bd.dev).erase(offset as u32, bd.block_size) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("flash erase failed at block {block}: {err}");
            LFS_ERR_IO
        }
    }
}

unsafe extern "C" fn bd_sync(_c: *const ll::lfs_config) -> c_int {
    // Writes go straight to the device; nothing is buffered above it.
    0
}

/// A mounted filesystem on one partition window of the MTD device.
///
/// Unmounts on drop, before the borrowed device can be closed.
pub struct SpinorFs<'d> {
    lfs: Box<ll::lfs_t>,
    _cfg: Box<ll::lfs_config>,
    _bd: Box<BlockDev>,
    _read_buf: Box<[u8; FS_READ_PROG_SIZE as usize]>,
    _prog_buf: Box<[u8; FS_READ_PROG_SIZE as usize]>,
    _lookahead_buf: Box<[u32; FS_LOOKAHEAD_SIZE as usize / 4]>,
    _dev: PhantomData<&'d mut MtdDevice>,
}

impl<'d> SpinorFs<'d> {
    /// Mounts the `[offset, offset + size)` window of `dev`, formatting
    /// and retrying once if the first mount fails.
    pub fn mount(dev: &'d mut MtdDevice, offset: u64, size: u64) -> Result<Self, FsError> {
        let block_size = dev.erase_block_size();
        let block_count = (size / u64::from(block_size)) as u32;
        let mut bd = Box::new(BlockDev {
            dev: dev as *mut MtdDevice,
            base: offset,
            block_size,
            block_count,
        });
        let mut read_buf = Box::new([0u8; FS_READ_PROG_SIZE as usize]);
        let mut prog_buf = Box::new([0u8; FS_READ_PROG_SIZE as usize]);
        let mut lookahead_buf = Box::new([0u32; FS_LOOKAHEAD_SIZE as usize / 4]);

        let mut cfg: Box<ll::lfs_config> = Box::new(unsafe { mem::zeroed() });
        cfg.context = &mut *bd as *mut BlockDev as *mut c_void;
        cfg.read = Some(bd_read);
        cfg.prog = Some(bd_prog);
        cfg.erase = Some(bd_erase);
        cfg.sync = Some(bd_sync);
        cfg.read_size = FS_READ_PROG_SIZE;
        cfg.prog_size = FS_READ_PROG_SIZE;
        cfg.block_size = block_size;
        cfg.block_count = block_count;
        cfg.block_cycles = FS_BLOCK_CYCLES;
        cfg.cache_size = FS_READ_PROG_SIZE;
        cfg.lookahead_size = FS_LOOKAHEAD_SIZE;
        cfg.read_buffer = read_buf.as_mut_ptr() as *mut c_void;
        cfg.prog_buffer = prog_buf.as_mut_ptr() as *mut c_void;
        cfg.lookahead_buffer = lookahead_buf.as_mut_ptr() as *mut c_void;

        let mut lfs: Box<ll::lfs_t> = Box::new(unsafe { mem::zeroed() });
        let mut err = unsafe { ll::lfs_mount(&mut *lfs, &*cfg) };
        if err < 0 {
            log::warn!("mount failed ({err}); formatting partition and retrying");
            unsafe { ll::lfs_format(&mut *lfs, &*cfg) };
            err = unsafe { ll::lfs_mount(&mut *lfs, &*cfg) };
            if err < 0 {
                return Err(FsError::MountFailed(err));
            }
        }
        log::debug!("mounted {block_count} blocks of {block_size:#x} bytes at {offset:#x}");

        Ok(Self {
            lfs,
            _cfg: cfg,
            _bd: bd,
            _read_buf: read_buf,
            _prog_buf: prog_buf,
            _lookahead_buf: lookahead_buf,
            _dev: PhantomData,
        })
    }

    /// Opens `name`. The `&mut` borrow enforces one open file at a time.
    pub fn open(&mut self, name: &str, flags: OpenFlags) -> Result<FsFile<'_, 'd>, FsError> {
        let cname = CString::new(name).map_err(|_| FsError::BadFileName)?;
        let mut cache = Box::new([0u8; FS_READ_PROG_SIZE as usize]);
        let mut file_cfg: Box<ll::lfs_file_config> = Box::new(unsafe { mem::zeroed() });
        file_cfg.buffer = cache.as_mut_ptr() as *mut c_void;
        let mut file: Box<ll::lfs_file_t> = Box::new(unsafe { mem::zeroed() });
        let err = unsafe {
            ll::lfs_file_opencfg(
                &mut *self.lfs,
                &mut *file,
                cname.as_ptr(),
                flags.bits(),
                &*file_cfg,
            )
        };
        lfs_result(err)?;
        Ok(FsFile {
            fs: self,
            file,
            _file_cfg: file_cfg,
            _cache: cache,
        })
    }
}

impl Drop for SpinorFs<'_> {
    fn drop(&mut self) {
        let err = unsafe { ll::lfs_unmount(&mut *self.lfs) };
        if err < 0 {
            log::error!("unmount failed ({err})");
        }
    }
}

/// An open file; closed on drop.
pub struct FsFile<'fs, 'd> {
    fs: &'fs mut SpinorFs<'d>,
    file: Box<ll::lfs_file_t>,
    _file_cfg: Box<ll::lfs_file_config>,
    _cache: Box<[u8; FS_READ_PROG_SIZE as usize]>,
}

impl FsFile<'_, '_> {
    fn seek_to(&mut self, offset: u32) -> Result<(), FsError> {
        let pos = unsafe {
            ll::lfs_file_seek(
                &mut *self.fs.lfs,
                &mut *self.file,
                offset as ll::lfs_soff_t,
                LFS_SEEK_SET,
            )
        };
        if pos < 0 {
            return Err(FsError::Lfs(pos));
        }
        if pos as u32 != offset {
            return Err(FsError::Lfs(LFS_ERR_IO));
        }
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the absolute `offset`; returns
    /// the byte count, 0 at end of file.
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, FsError> {
        self.seek_to(offset)?;
        let n = unsafe {
            ll::lfs_file_read(
                &mut *self.fs.lfs,
                &mut *self.file,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as ll::lfs_size_t,
            )
        };
        lfs_result(n).map(|n| n as usize)
    }

    /// Writes `data` at the absolute `offset`; returns the byte count.
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<usize, FsError> {
        self.seek_to(offset)?;
        let n = unsafe {
            ll::lfs_file_write(
                &mut *self.fs.lfs,
                &mut *self.file,
                data.as_ptr() as *const c_void,
                data.len() as ll::lfs_size_t,
            )
        };
        lfs_result(n).map(|n| n as usize)
    }
}

impl Drop for FsFile<'_, '_> {
    fn drop(&mut self) {
        let err = unsafe { ll::lfs_file_close(&mut *self.fs.lfs, &mut *self.file) };
        if err < 0 {
            log::error!("close failed ({err})");
        }
    }
}
