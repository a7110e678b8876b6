use bitflags::bitflags;
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// The record maintains a checksum and must be rewritten on
        /// any mutation.
        const CHECKSUM_VALID = 0x01;
    }
}

/// NVPARAM record header as stored on media, little-endian.
///
/// The valid-bit bitmap follows immediately, then (possibly after
/// padding, per `data_offset`) the fixed-width field array. `length`
/// is the whole-record extent and the checksum window.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct NvpHeader {
    pub signature: [u8; 8],
    pub length: U16,
    pub count: u8,
    pub data_offset: u8,
    pub checksum: u8,
    pub field_size: u8,
    pub flags: u8,
}

impl NvpHeader {
    /// On-media header length.
    pub const LEN: usize = 15;

    /// Header-relative offset of the checksum byte.
    pub const CHECKSUM_OFFSET: u32 = 12;

    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags)
    }

    /// Bitmap size for records that scale it with the field count.
    pub fn bitmap_len(&self) -> usize {
        usize::from(self.count).div_ceil(8)
    }
}

/// Explicit valid-bit argument of a field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidBit {
    /// Firmware ignores the field.
    Ignore,
    /// Firmware consumes the field.
    Set,
}

impl TryFrom<u8> for ValidBit {
    type Error = crate::RecordError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ignore),
            1 => Ok(Self::Set),
            other => Err(crate::RecordError::BadValidBit(other)),
        }
    }
}
