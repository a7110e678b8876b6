//! Kernel ABI for the MTD ioctls consumed here.
//!
//! Mirrors `struct mtd_info_user` and `struct erase_info_user` from
//! `<mtd/mtd-user.h>`; field order and widths must match the kernel.

/// `struct mtd_info_user`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MtdInfoUser {
    pub mtd_type: u8,
    pub flags: u32,
    pub size: u32,
    pub erasesize: u32,
    pub writesize: u32,
    pub oobsize: u32,
    pub padding: u64,
}

/// `struct erase_info_user`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EraseInfoUser {
    pub start: u32,
    pub length: u32,
}

// MEMGETINFO = _IOR('M', 1, struct mtd_info_user)
nix::ioctl_read!(mtd_mem_get_info, b'M', 1, MtdInfoUser);
// MEMERASE = _IOW('M', 2, struct erase_info_user)
nix::ioctl_write_ptr!(mtd_mem_erase, b'M', 2, EraseInfoUser);
