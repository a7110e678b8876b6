use core::fmt;
use core::str::FromStr;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Length of the canonical string form `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
pub const GUID_STR_LEN: usize = 36;

/// On-wire byte position for each hex pair of the canonical string.
///
/// The first three groups are little-endian on media, the last two
/// big-endian.
const GUID_INDEX: [usize; 16] = [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15];

/// String index of the first hex digit of each pair.
const GUID_STR_INDEX: [usize; 16] = [0, 2, 4, 6, 9, 11, 14, 16, 19, 21, 24, 26, 28, 30, 32, 34];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid GUID string")]
pub struct GuidParseError;

/// A 16-byte GUID in its on-media byte order.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// True for the all-zero GUID, which marks an unused GPT entry.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl FromStr for Guid {
    type Err = GuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = s.as_bytes();
        if b.len() != GUID_STR_LEN {
            return Err(GuidParseError);
        }
        for (i, &c) in b.iter().enumerate() {
            let ok = match i {
                8 | 13 | 18 | 23 => c == b'-',
                _ => c.is_ascii_hexdigit(),
            };
            if !ok {
                return Err(GuidParseError);
            }
        }

        let mut out = [0u8; 16];
        for (pair, &si) in GUID_STR_INDEX.iter().enumerate() {
            let hi = hex_val(b[si]);
            let lo = hex_val(b[si + 1]);
            out[GUID_INDEX[pair]] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => unreachable!("validated as hex digit"),
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = &self.0;
        write!(
            f,
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            g[3], g[2], g[1], g[0],
            g[5], g[4],
            g[7], g[6],
            g[8], g[9],
            g[10], g[11], g[12], g[13], g[14], g[15]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known() {
        let guid: Guid = "00010203-0405-0607-0809-0A0B0C0D0E0F".parse().unwrap();
        assert_eq!(
            guid.as_bytes(),
            &[3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn display_roundtrip() {
        let bytes = [
            0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x10, 0x32,
            0x54, 0x76,
        ];
        let guid = Guid::from_bytes(bytes);
        let parsed: Guid = guid.to_string().parse().unwrap();
        assert_eq!(parsed, guid);
    }

    #[test]
    fn rejects_bad_input() {
        assert!("".parse::<Guid>().is_err());
        assert!("0".parse::<Guid>().is_err());
        assert!("00010203-0405-0607-0809-0A0B0C0D0E0".parse::<Guid>().is_err());
        assert!("00010203x0405-0607-0809-0A0B0C0D0E0F".parse::<Guid>().is_err());
        assert!("0001020g-0405-0607-0809-0A0B0C0D0E0F".parse::<Guid>().is_err());
    }

    #[test]
    fn lowercase_accepted() {
        let upper: Guid = "DEADBEEF-0123-4567-89AB-CDEF10325476".parse().unwrap();
        let lower: Guid = "deadbeef-0123-4567-89ab-cdef10325476".parse().unwrap();
        assert_eq!(upper, lower);
    }
}
