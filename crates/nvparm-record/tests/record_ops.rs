use std::io;

use nvparm_common::sum8;
use nvparm_record::{NvpHeader, NvpRecord, NvpStore, RecordError, ValidBit};

/// A flash-file record image: header at offset 0, bitmap scaled to the
/// field count, checksum committed by rewriting the whole header.
struct MemStore {
    data: Vec<u8>,
}

impl NvpStore for MemStore {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// A BSD EEPROM image: 32 bytes of Boot-Strap Vector data, header at
/// 32, fixed 8-byte bitmap, checksum committed as a single byte at the
/// fixed offset 44.
struct BsdMemStore {
    data: Vec<u8>,
}

const BSD_OFFSET: u32 = 32;
const BSD_CHECKSUM_OFFSET: usize = 44;
const BSD_BITMAP_LEN: usize = 8;

impl NvpStore for BsdMemStore {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn header_offset(&self) -> u32 {
        BSD_OFFSET
    }

    fn bitmap_len(&self, _header: &NvpHeader) -> usize {
        BSD_BITMAP_LEN
    }

    fn checksum_always(&self) -> bool {
        true
    }

    fn commit_checksum(&mut self, header: &NvpHeader) -> io::Result<()> {
        self.data[BSD_CHECKSUM_OFFSET] = header.checksum;
        Ok(())
    }
}

/// Builds the record of the read/write/erase scenarios: three 4-byte
/// fields at data offset 16, fields 0 and 1 valid.
fn sample_record(flags: u8) -> MemStore {
    let mut data = vec![0u8; 28];
    data[0..8].copy_from_slice(b"NVPDYNMC");
    data[8..10].copy_from_slice(&28u16.to_le_bytes());
    data[10] = 3; // count
    data[11] = 16; // data_offset
    data[12] = 0; // checksum
    data[13] = 4; // field_size
    data[14] = flags;
    data[15] = 0x03; // valid bits for fields 0 and 1
    data[16..20].copy_from_slice(&0x01020304u32.to_le_bytes());
    data[20..24].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
    data[24..28].copy_from_slice(&0xFFFFFFFFu32.to_le_bytes());
    if flags & 0x01 != 0 {
        data[12] = sum8(&data);
        assert_eq!(total(&data), 0);
    }
    MemStore { data }
}

fn total(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[test]
fn read_field_and_valid_bit() {
    let mut store = sample_record(0);
    let mut record = NvpRecord::open(&mut store, None).unwrap();

    let field = record.read_field(1).unwrap();
    assert_eq!(field.value, 0xDEADBEEF);
    assert!(field.valid);
    assert_eq!(field.to_string(), "0x01 0xdeadbeef");

    let field = record.read_field(2).unwrap();
    assert_eq!(field.value, 0xFFFFFFFF);
    assert!(!field.valid);
    assert_eq!(field.to_string(), "0x00 0xffffffff");
}

#[test]
fn write_field_updates_bitmap_and_checksum() {
    let mut store = sample_record(0x01);
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    record.write_field(2, 0xCAFEBABE, None).unwrap();

    assert_eq!(&store.data[24..28], &0xCAFEBABEu32.to_le_bytes());
    assert_eq!(store.data[15], 0x07);
    assert_eq!(total(&store.data), 0);
}

#[test]
fn erase_field_clears_data_and_valid_bit() {
    let mut store = sample_record(0x01);
    {
        let mut record = NvpRecord::open(&mut store, None).unwrap();
        record.write_field(2, 0xCAFEBABE, None).unwrap();
        record.erase_field(1).unwrap();
    }

    assert_eq!(&store.data[20..24], &[0xFF; 4]);
    assert_eq!(store.data[15], 0x05);
    assert_eq!(total(&store.data), 0);

    let mut record = NvpRecord::open(&mut store, None).unwrap();
    let field = record.read_field(1).unwrap();
    assert_eq!(field.value, 0xFFFFFFFF);
    assert!(!field.valid);
}

#[test]
fn checksum_holds_across_mutation_sequences() {
    let mut store = sample_record(0x01);
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    record.write_field(0, 0x11223344, None).unwrap();
    record.set_valid(1, ValidBit::Ignore).unwrap();
    record.erase_field(0).unwrap();
    record.write_field(1, 0x55, Some(ValidBit::Set)).unwrap();
    drop(record);
    assert_eq!(total(&store.data), 0);
}

#[test]
fn explicit_ignore_clears_the_bit_on_write() {
    let mut store = sample_record(0);
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    record
        .write_field(1, 0x1234, Some(ValidBit::Ignore))
        .unwrap();
    assert_eq!(store.data[15], 0x01);
}

#[test]
fn set_valid_touches_only_the_bitmap() {
    let mut store = sample_record(0);
    let before = store.data.clone();
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    record.set_valid(2, ValidBit::Set).unwrap();
    assert_eq!(store.data[15], 0x07);
    assert_eq!(store.data[..15], before[..15]);
    assert_eq!(store.data[16..], before[16..]);
}

#[test]
fn rejects_out_of_range_index() {
    let mut store = sample_record(0);
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    assert!(matches!(
        record.read_field(3),
        Err(RecordError::FieldIndexOutOfRange { index: 3, count: 3 })
    ));
}

#[test]
fn rejects_oversized_value() {
    let mut store = sample_record(0);
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    assert!(matches!(
        record.write_field(0, 0x1_0000_0000, None),
        Err(RecordError::ValueTooWide { .. })
    ));
}

#[test]
fn rejects_bad_field_size() {
    let mut store = sample_record(0);
    store.data[13] = 2;
    assert!(matches!(
        NvpRecord::open(&mut store, None),
        Err(RecordError::UnsupportedFieldSize(2))
    ));
}

#[test]
fn rejects_wrong_signature() {
    let mut store = sample_record(0);
    assert!(matches!(
        NvpRecord::open(&mut store, Some(b"NVPBERLY")),
        Err(RecordError::BadSignature)
    ));
}

/// Builds a 148-byte BSD EEPROM image: BSV prefix, `NVPBERLY` header
/// at 32, 8-byte bitmap at 47, sixteen 4-byte fields at 56.
fn bsd_record(flags: u8) -> BsdMemStore {
    let mut data = vec![0u8; 256];
    for (i, byte) in data.iter_mut().take(32).enumerate() {
        *byte = i as u8 ^ 0x5A;
    }
    data[32..40].copy_from_slice(b"NVPBERLY");
    data[40..42].copy_from_slice(&148u16.to_le_bytes());
    data[42] = 16; // count
    data[43] = 56; // data_offset
    data[44] = 0; // checksum
    data[45] = 4; // field_size
    data[46] = flags;
    data[47] = 0b0000_0101; // fields 0 and 2 valid
    for field in 0..16u32 {
        let at = 56 + field as usize * 4;
        data[at..at + 4].copy_from_slice(&(0xA000_0000 + field).to_le_bytes());
    }
    data[BSD_CHECKSUM_OFFSET] = sum8(&data[..148]);
    assert_eq!(total(&data[..148]), 0);
    BsdMemStore { data }
}

#[test]
fn bsd_mutations_keep_the_checksum_window() {
    let mut store = bsd_record(0x01);
    let before = store.data.clone();
    let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY")).unwrap();
    assert_eq!(record.checksum_residue().unwrap(), 0);
    record.write_field(5, 0x1234_5678, None).unwrap();
    drop(record);

    // The sum over the 148-byte window, BSV prefix included, holds.
    assert_eq!(total(&store.data[..148]), 0);

    // Outside the touched field and the bitmap, only the checksum
    // byte at the fixed offset moved.
    let field_at = 56 + 5 * 4;
    for (i, (&was, &now)) in before.iter().zip(store.data.iter()).enumerate() {
        let in_field = (field_at..field_at + 4).contains(&i);
        let in_bitmap = (47..47 + BSD_BITMAP_LEN).contains(&i);
        if !in_field && !in_bitmap && i != BSD_CHECKSUM_OFFSET {
            assert_eq!(was, now, "byte {i} changed");
        }
    }
    assert_eq!(store.data[47], 0b0010_0101);
}

#[test]
fn bsd_erase_and_set_valid_round_trip() {
    let mut store = bsd_record(0x01);
    let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY")).unwrap();
    record.erase_field(2).unwrap();
    record.set_valid(0, ValidBit::Ignore).unwrap();
    drop(record);

    assert_eq!(&store.data[56 + 8..56 + 12], &[0xFF; 4]);
    assert_eq!(store.data[47], 0);
    assert_eq!(total(&store.data[..148]), 0);
}

#[test]
fn bsd_stale_checksum_is_reported() {
    let mut store = bsd_record(0x01);
    store.data[20] ^= 0xFF;
    let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY")).unwrap();
    assert_ne!(record.checksum_residue().unwrap(), 0);
}

#[test]
fn bsd_updates_the_checksum_even_without_the_flag() {
    // The EEPROM record always maintains its checksum; the header flag
    // only gates flash-resident records.
    let mut store = bsd_record(0x00);
    let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY")).unwrap();
    record.write_field(3, 0xFEED, None).unwrap();
    record.set_valid(2, ValidBit::Ignore).unwrap();
    record.erase_field(0).unwrap();
    drop(record);
    assert_eq!(total(&store.data[..148]), 0);
}

#[test]
fn bsd_high_field_index_lands_in_second_bitmap_byte() {
    let mut store = bsd_record(0x01);
    let mut record = NvpRecord::open(&mut store, Some(b"NVPBERLY")).unwrap();
    record.write_field(10, 0xB0B0, None).unwrap();
    drop(record);
    assert_eq!(store.data[48], 1 << 2);
    assert_eq!(total(&store.data[..148]), 0);
}

/// A record of eight 1-byte fields, checksum maintained.
fn byte_record() -> MemStore {
    let mut data = vec![0u8; 24];
    data[0..8].copy_from_slice(b"NVPVALDN");
    data[8..10].copy_from_slice(&24u16.to_le_bytes());
    data[10] = 8; // count
    data[11] = 16; // data_offset
    data[13] = 1; // field_size
    data[14] = 0x01;
    data[15] = 0xFF; // every field valid
    for (i, byte) in data[16..24].iter_mut().enumerate() {
        *byte = 0x10 + i as u8;
    }
    data[12] = sum8(&data);
    MemStore { data }
}

#[test]
fn one_byte_fields_format_and_mutate() {
    let mut store = byte_record();
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    assert_eq!(record.read_field(7).unwrap().to_string(), "0x01 0x17");

    record.write_field(4, 0xAB, Some(ValidBit::Ignore)).unwrap();
    assert!(matches!(
        record.write_field(4, 0x100, None),
        Err(RecordError::ValueTooWide { .. })
    ));
    drop(record);
    assert_eq!(store.data[20], 0xAB);
    assert_eq!(store.data[15], 0xFF & !(1 << 4));
    assert_eq!(total(&store.data), 0);
}

/// A record of two 8-byte fields, no checksum flag.
fn wide_record() -> MemStore {
    let mut data = vec![0u8; 32];
    data[0..8].copy_from_slice(b"NVPSTATC");
    data[8..10].copy_from_slice(&32u16.to_le_bytes());
    data[10] = 2; // count
    data[11] = 16; // data_offset
    data[13] = 8; // field_size
    data[15] = 0x01;
    data[16..24].copy_from_slice(&0x0123_4567_89AB_CDEFu64.to_le_bytes());
    data[24..32].copy_from_slice(&u64::MAX.to_le_bytes());
    MemStore { data }
}

#[test]
fn eight_byte_fields_take_any_value() {
    let mut store = wide_record();
    let checksum_before = store.data[12];
    let mut record = NvpRecord::open(&mut store, None).unwrap();
    assert_eq!(
        record.read_field(0).unwrap().to_string(),
        "0x01 0x0123456789abcdef"
    );
    record.write_field(1, u64::MAX, None).unwrap();
    assert_eq!(record.read_field(1).unwrap().value, u64::MAX);
    drop(record);
    // Flash records honor the flag: without CHECKSUM_VALID the
    // checksum byte is left alone.
    assert_eq!(store.data[12], checksum_before);
}
