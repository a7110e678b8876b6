//! Host MTD partition discovery through `/proc/mtd`.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context};

const PROC_MTD: &str = "/proc/mtd";

/// Name the host SPI flash carries in the MTD partition table.
const HOST_SPI_FLASH_MTD_NAME: &str = "hnor";

/// Resolves `/dev/mtdN` for the host SPI flash.
pub fn host_mtd_device() -> anyhow::Result<PathBuf> {
    let listing = fs::read_to_string(PROC_MTD)
        .with_context(|| format!("unable to open {PROC_MTD} to get MTD info"))?;
    find_mtd_device(&listing, HOST_SPI_FLASH_MTD_NAME)
        .ok_or_else(|| anyhow!("unable to find the host SPI MTD partition"))
}

/// Picks the first line naming `part` and turns its `mtdN` token into a
/// device path.
fn find_mtd_device(listing: &str, part: &str) -> Option<PathBuf> {
    for line in listing.lines() {
        if !line.contains(part) {
            continue;
        }
        let token = line.split(':').next()?;
        let number: u32 = token.trim().strip_prefix("mtd")?.parse().ok()?;
        return Some(PathBuf::from(format!("/dev/mtd{number}")));
    }
    None
}
