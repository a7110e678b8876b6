//! Boot-Strap Data dispatcher.
//!
//! The EEPROM image is one fixed record: 32 bytes of Boot-Strap Vector
//! data, the `NVPBERLY` header, an 8-byte valid-bit bitmap and the
//! field array. The BSV prefix is part of the checksummed record, so
//! blob operations and the checksum window both start at offset 0,
//! and the checksum byte lives at the fixed offset 44.

use std::fs;
use std::io;

use anyhow::{bail, Context};
use nvparm_eeprom::{EepromDevice, DEFAULT_BUS, DEFAULT_SLAVE_ADDR};
use nvparm_record::{NvpHeader, NvpRecord, NvpStore};

use crate::{operate, Args};

/// GPT name reserved for the Boot-Strap Data partition.
pub const BSD_PARTITION_NAME: &str = "nvparamb";

/// The only NVP "file" the EEPROM holds, also the record signature.
pub const BSD_NVP_FILE: &str = "NVPBERLY";

/// The EEPROM starts with 32 bytes of BSV.
const BSD_OFFSET: u32 = 32;

/// Fixed location of the record checksum byte.
const BSD_CHECKSUM_OFFSET: u32 = 44;

/// The bitmap size is fixed regardless of the field count.
const BSD_VALID_BIT_ARR_SIZE: usize = 8;

struct BsdStore<'a> {
    dev: &'a mut EepromDevice,
}

impl NvpStore for BsdStore<'_> {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<()> {
        self.dev.read_at(offset, buf).map_err(io::Error::other)
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()> {
        self.dev.write_at(offset, data).map_err(io::Error::other)
    }

    fn header_offset(&self) -> u32 {
        BSD_OFFSET
    }

    fn bitmap_len(&self, _header: &NvpHeader) -> usize {
        BSD_VALID_BIT_ARR_SIZE
    }

    fn checksum_always(&self) -> bool {
        true
    }

    fn commit_checksum(&mut self, header: &NvpHeader) -> io::Result<()> {
        self.write_at(BSD_CHECKSUM_OFFSET, &[header.checksum])
    }
}

pub fn run(args: &Args) -> anyhow::Result<()> {
    if let Some(file) = &args.file {
        if file != BSD_NVP_FILE {
            bail!("unsupported nvp file: {file}");
        }
    }
    let bus = args.bus.unwrap_or(DEFAULT_BUS);
    let slave = args.slave.unwrap_or(DEFAULT_SLAVE_ADDR);
    let mut dev = EepromDevice::open(bus, slave)
        .with_context(|| format!("failed to open /dev/i2c-{bus}"))?;
    dev.probe().context("I2C device not found")?;

    let mut store = BsdStore { dev: &mut dev };
    let length = {
        let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY"))?;
        if record.checksum_residue()? != 0 {
            log::warn!("current checksum invalid");
        }
        record.length()
    };

    if let Some(dump) = &args.dump {
        // The record includes the BSV data, so the blob starts at 0.
        let mut blob = vec![0u8; length as usize];
        store.dev.read_at(0, &mut blob)?;
        fs::write(dump, &blob)
            .with_context(|| format!("cannot write file {}", dump.display()))?;
        return Ok(());
    }
    if let Some(upload) = &args.upload {
        let data = fs::read(upload)
            .with_context(|| format!("cannot open file {}", upload.display()))?;
        store.dev.write_at(0, &data)?;
        return Ok(());
    }

    let index = args.index.context("option -i must be specified")?;
    let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY"))?;
    operate(&mut record, args, index)
}
