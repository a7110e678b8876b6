//! GPT discovery for NVPARAM partitions.
//!
//! The scan reads the protective MBR at LBA 0, the primary GPT header
//! at LBA 1 and the partition entry array, and keeps every in-use entry
//! in memory for name/GUID lookup. Header and entry-array CRCs are
//! deliberately not verified; the tool only needs to locate partitions.

use std::io::{Read, Seek, SeekFrom};

use nvparm_common::Guid;
use zerocopy::FromBytes;

pub mod layout;

pub use layout::{GptEntry, GptHeader, MbrPartitionRecord, ProtectiveMbr};
use layout::{GPT_HEADER_SIGNATURE, GPT_MIN_ENTRY_SIZE, GPT_MIN_HEADER_SIZE, MBR_SIGNATURE};

/// Logical block size used for all LBA arithmetic.
pub const LBA_SIZE: u64 = 512;

/// LBA of the primary GPT header.
const GPT_PRIMARY_HEADER_LBA: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum GptError {
    #[error("invalid protective MBR signature {0:#06x}")]
    BadMbrSignature(u16),
    #[error("no protective partition record in MBR")]
    NoProtectiveRecord,
    #[error("protective record starts at LBA {0}, expected 1")]
    BadProtectiveStart(u64),
    #[error("invalid GPT header signature")]
    BadHeaderSignature,
    #[error("GPT header size {0} out of range")]
    BadHeaderSize(u32),
    #[error("partition entry size {0} too small")]
    BadEntrySize(u32),
    #[error("partition not found: {0}")]
    PartitionNotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Byte range of a partition on flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSpan {
    pub offset: u64,
    pub size: u64,
}

/// An in-use entry together with its slot in the entry array, which is
/// how the listing numbers partitions.
pub struct UsedPartition {
    pub slot: u32,
    pub entry: GptEntry,
}

/// The in-use entries of a scanned GPT disk.
pub struct GptDisk {
    entries: Vec<UsedPartition>,
}

impl GptDisk {
    /// Scans the protective MBR, primary header and entry array.
    pub fn scan<R: Read + Seek>(dev: &mut R) -> Result<Self, GptError> {
        let mut lba = [0u8; LBA_SIZE as usize];

        dev.seek(SeekFrom::Start(0))?;
        dev.read_exact(&mut lba)?;
        let mbr = ProtectiveMbr::read_from_bytes(&lba).expect("one LBA is one MBR");
        if mbr.signature.get() != MBR_SIGNATURE {
            return Err(GptError::BadMbrSignature(mbr.signature.get()));
        }
        let record = mbr
            .protective_record()
            .ok_or(GptError::NoProtectiveRecord)?;
        if u64::from(record.starting_lba.get()) != GPT_PRIMARY_HEADER_LBA {
            return Err(GptError::BadProtectiveStart(record.starting_lba.get().into()));
        }

        dev.seek(SeekFrom::Start(GPT_PRIMARY_HEADER_LBA * LBA_SIZE))?;
        dev.read_exact(&mut lba)?;
        let (header, _) =
            GptHeader::read_from_prefix(&lba).expect("one LBA holds a GPT header");
        if header.signature != GPT_HEADER_SIGNATURE {
            return Err(GptError::BadHeaderSignature);
        }
        let header_size = header.header_size.get();
        if header_size < GPT_MIN_HEADER_SIZE || u64::from(header_size) > LBA_SIZE {
            return Err(GptError::BadHeaderSize(header_size));
        }
        let entry_size = header.partition_entry_size.get();
        if entry_size < GPT_MIN_ENTRY_SIZE {
            return Err(GptError::BadEntrySize(entry_size));
        }

        let entry_num = header.num_partition_entries.get();
        log::trace!(
            "GPT: {entry_num} entries of {entry_size} bytes at LBA {}",
            header.partition_entry_lba.get()
        );

        dev.seek(SeekFrom::Start(header.partition_entry_lba.get() * LBA_SIZE))?;
        let mut entry_buf = vec![0u8; entry_size as usize];
        let mut entries = Vec::new();
        for slot in 0..entry_num {
            dev.read_exact(&mut entry_buf)?;
            let (entry, _) =
                GptEntry::read_from_prefix(&entry_buf).expect("entry size checked above");
            if entry.is_used() {
                entries.push(UsedPartition { slot, entry });
            }
        }
        log::debug!("GPT: {} partitions in use", entries.len());

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[UsedPartition] {
        &self.entries
    }

    /// Locates a partition by its collapsed name.
    pub fn by_name(&self, name: &str) -> Result<PartitionSpan, GptError> {
        self.entries
            .iter()
            .find(|part| part.entry.name() == name)
            .map(span_of)
            .ok_or_else(|| GptError::PartitionNotFound(name.to_string()))
    }

    /// Locates a partition by its unique GUID.
    pub fn by_guid(&self, guid: &Guid) -> Result<PartitionSpan, GptError> {
        self.entries
            .iter()
            .find(|part| part.entry.unique_partition_guid == *guid)
            .map(span_of)
            .ok_or_else(|| GptError::PartitionNotFound(guid.to_string()))
    }
}

fn span_of(part: &UsedPartition) -> PartitionSpan {
    let (offset, size) = part.entry.byte_span();
    PartitionSpan { offset, size }
}
