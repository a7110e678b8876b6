//! NVPARAM record model and mutation engine.
//!
//! A record is a header, a valid-bit bitmap and a fixed-width field
//! array on some storage substrate. The two substrates (an NVP file on
//! a SPI-NOR partition, the Boot-Strap Data EEPROM) differ only in
//! where the header sits, how the bitmap is sized and how a fresh
//! checksum is committed; [`NvpStore`] captures those differences and
//! [`NvpRecord`] implements the field operations over it.

use std::fmt;
use std::io;

use nvparm_common::sum8;
use zerocopy::{FromBytes, IntoBytes};

mod header;

pub use header::{HeaderFlags, NvpHeader, ValidBit};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to validate NVP signature")]
    BadSignature,
    #[error("unsupported field size: {0}")]
    UnsupportedFieldSize(u8),
    #[error("field index {index} out of range (record has {count} fields)")]
    FieldIndexOutOfRange { index: u64, count: u8 },
    #[error("value {value:#x} does not fit a {size}-byte field")]
    ValueTooWide { value: u64, size: u8 },
    #[error("unsupported valid bit value {0:#04x}")]
    BadValidBit(u8),
    #[error("checksum offset {0} outside record of {1} bytes")]
    ChecksumOutsideRecord(u32, u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A storage substrate holding one NVP record.
///
/// Offsets are absolute in the substrate's address space. The BSD
/// EEPROM keeps its header at offset 32 with the Boot-Strap Vector in
/// front of it, and that prefix is part of the record: `data_offset`
/// and the `[0, length)` checksum window count from substrate zero on
/// both substrates.
pub trait NvpStore {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()>;

    /// Offset of the NVP header.
    fn header_offset(&self) -> u32 {
        0
    }

    /// Size of the valid-bit bitmap that follows the header.
    fn bitmap_len(&self, header: &NvpHeader) -> usize {
        header.bitmap_len()
    }

    /// Whether mutations refresh the checksum even when the header's
    /// `CHECKSUM_VALID` flag is clear. Flash records honor the flag;
    /// the BSD EEPROM always maintains its checksum.
    fn checksum_always(&self) -> bool {
        false
    }

    /// Commits a recomputed checksum. The default rewrites the whole
    /// header, which is how flash-resident records store it; the BSD
    /// substrate overrides this with a single-byte write.
    fn commit_checksum(&mut self, header: &NvpHeader) -> io::Result<()> {
        self.write_at(self.header_offset(), header.as_bytes())
    }
}

/// Value and validity of one field, formatted as the tool prints it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldValue {
    pub value: u64,
    pub valid: bool,
    width: u8,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid = u8::from(self.valid);
        match self.width {
            1 => write!(f, "0x{:02x} 0x{:02x}", valid, self.value),
            4 => write!(f, "0x{:02x} 0x{:08x}", valid, self.value),
            _ => write!(f, "0x{:02x} 0x{:016x}", valid, self.value),
        }
    }
}

/// An opened NVP record.
pub struct NvpRecord<'s, S: NvpStore> {
    store: &'s mut S,
    header: NvpHeader,
}

impl<'s, S: NvpStore> NvpRecord<'s, S> {
    /// Reads and validates the header. `expected_signature` is matched
    /// byte-for-byte when given; the BSD dispatcher passes `NVPBERLY`,
    /// flash records are identified by their file name instead.
    pub fn open(
        store: &'s mut S,
        expected_signature: Option<&[u8; 8]>,
    ) -> Result<Self, RecordError> {
        let mut buf = [0u8; NvpHeader::LEN];
        store.read_at(store.header_offset(), &mut buf)?;
        let header = NvpHeader::read_from_bytes(&buf).expect("buffer is one header");

        if let Some(signature) = expected_signature {
            if &header.signature != signature {
                return Err(RecordError::BadSignature);
            }
        }
        if !matches!(header.field_size, 1 | 4 | 8) {
            return Err(RecordError::UnsupportedFieldSize(header.field_size));
        }
        log::debug!(
            "NVP header: count {}, field_size {}, data_offset {}, length {}, flags {:#04x}",
            header.count,
            header.field_size,
            header.data_offset,
            header.length.get(),
            header.flags
        );
        Ok(Self { store, header })
    }

    pub fn header(&self) -> &NvpHeader {
        &self.header
    }

    /// Whole-record length in bytes, which is also the checksum window.
    pub fn length(&self) -> u32 {
        u32::from(self.header.length.get())
    }

    /// Sums the record as stored; zero means the checksum holds.
    pub fn checksum_residue(&mut self) -> Result<u8, RecordError> {
        let mut blob = vec![0u8; self.length() as usize];
        self.store.read_at(0, &mut blob)?;
        Ok(sum8(&blob).wrapping_neg())
    }

    pub fn read_field(&mut self, index: u64) -> Result<FieldValue, RecordError> {
        let offset = self.field_offset(index)?;
        let size = usize::from(self.header.field_size);
        let mut raw = [0u8; 8];
        self.store.read_at(offset, &mut raw[..size])?;
        let bitmap = self.load_bitmap()?;
        Ok(FieldValue {
            value: u64::from_le_bytes(raw),
            valid: bit_of(&bitmap, index),
            width: self.header.field_size,
        })
    }

    /// Writes `value` into field `index`. Without an explicit
    /// `valid_bit` the field's bit is set; `Ignore` clears it.
    pub fn write_field(
        &mut self,
        index: u64,
        value: u64,
        valid_bit: Option<ValidBit>,
    ) -> Result<(), RecordError> {
        let offset = self.field_offset(index)?;
        let size = self.header.field_size;
        if size < 8 && value >> (u32::from(size) * 8) != 0 {
            return Err(RecordError::ValueTooWide { value, size });
        }
        self.store
            .write_at(offset, &value.to_le_bytes()[..usize::from(size)])?;

        let mut bitmap = self.load_bitmap()?;
        match valid_bit.unwrap_or(ValidBit::Set) {
            ValidBit::Set => set_bit(&mut bitmap, index),
            ValidBit::Ignore => clear_bit(&mut bitmap, index),
        }
        self.store_bitmap(&bitmap)?;
        self.refresh_checksum()
    }

    /// Updates only the valid bit of field `index`.
    pub fn set_valid(&mut self, index: u64, valid_bit: ValidBit) -> Result<(), RecordError> {
        self.field_offset(index)?;
        let mut bitmap = self.load_bitmap()?;
        match valid_bit {
            ValidBit::Set => set_bit(&mut bitmap, index),
            ValidBit::Ignore => clear_bit(&mut bitmap, index),
        }
        self.store_bitmap(&bitmap)?;
        self.refresh_checksum()
    }

    /// Returns field `index` to its erased state (all ones) and clears
    /// its valid bit.
    pub fn erase_field(&mut self, index: u64) -> Result<(), RecordError> {
        let offset = self.field_offset(index)?;
        let erased = [0xFFu8; 8];
        self.store
            .write_at(offset, &erased[..usize::from(self.header.field_size)])?;

        let mut bitmap = self.load_bitmap()?;
        clear_bit(&mut bitmap, index);
        self.store_bitmap(&bitmap)?;
        self.refresh_checksum()
    }

    fn field_offset(&self, index: u64) -> Result<u32, RecordError> {
        if index >= u64::from(self.header.count) {
            return Err(RecordError::FieldIndexOutOfRange {
                index,
                count: self.header.count,
            });
        }
        Ok(u32::from(self.header.data_offset)
            + index as u32 * u32::from(self.header.field_size))
    }

    fn bitmap_offset(&self) -> u32 {
        self.store.header_offset() + NvpHeader::LEN as u32
    }

    fn load_bitmap(&mut self) -> Result<Vec<u8>, RecordError> {
        let mut bitmap = vec![0u8; self.store.bitmap_len(&self.header)];
        let offset = self.bitmap_offset();
        self.store.read_at(offset, &mut bitmap)?;
        Ok(bitmap)
    }

    fn store_bitmap(&mut self, bitmap: &[u8]) -> Result<(), RecordError> {
        let offset = self.bitmap_offset();
        self.store.write_at(offset, bitmap)?;
        Ok(())
    }

    /// Second media round-trip of a mutation: reread the record with
    /// the checksum byte zeroed, recompute, commit.
    fn refresh_checksum(&mut self) -> Result<(), RecordError> {
        if !self.store.checksum_always()
            && !self.header.flags().contains(HeaderFlags::CHECKSUM_VALID)
        {
            return Ok(());
        }
        let length = self.length();
        let checksum_at = self.store.header_offset() + NvpHeader::CHECKSUM_OFFSET;
        if checksum_at >= length {
            return Err(RecordError::ChecksumOutsideRecord(checksum_at, length));
        }
        let mut blob = vec![0u8; length as usize];
        self.store.read_at(0, &mut blob)?;
        blob[checksum_at as usize] = 0;
        self.header.checksum = sum8(&blob);
        log::debug!("new checksum: {:#04x}", self.header.checksum);
        self.store.commit_checksum(&self.header)?;
        Ok(())
    }
}

fn bit_of(bitmap: &[u8], index: u64) -> bool {
    let byte = (index / 8) as usize;
    bitmap.get(byte).is_some_and(|&b| (b >> (index % 8)) & 1 == 1)
}

fn set_bit(bitmap: &mut [u8], index: u64) {
    if let Some(byte) = bitmap.get_mut((index / 8) as usize) {
        *byte |= 1 << (index % 8);
    }
}

fn clear_bit(bitmap: &mut [u8], index: u64) {
    if let Some(byte) = bitmap.get_mut((index / 8) as usize) {
        *byte &= !(1 << (index % 8));
    }
}
