//! Kernel ABI for `/dev/i2c-*` transfers, from `<linux/i2c.h>` and
//! `<linux/i2c-dev.h>`.

/// `struct i2c_msg`.
#[repr(C)]
pub struct I2cMsg {
    pub addr: u16,
    pub flags: u16,
    pub len: u16,
    pub buf: *mut u8,
}

/// `struct i2c_rdwr_ioctl_data`.
#[repr(C)]
pub struct I2cRdwrIoctlData {
    pub msgs: *mut I2cMsg,
    pub nmsgs: u32,
}

pub const I2C_M_RD: u16 = 0x0001;
pub const I2C_M_NOSTART: u16 = 0x4000;

const I2C_SLAVE: i32 = 0x0703;
const I2C_RDWR: i32 = 0x0707;

nix::ioctl_write_int_bad!(i2c_slave, I2C_SLAVE);
nix::ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrIoctlData);
