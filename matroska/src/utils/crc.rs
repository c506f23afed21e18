//! CRC-32 validation for EBML master elements.
//!
//! Matroska stores the checksum of a master element's payload in an optional
//! `CRC-32` child (ID `0xBF`) that must be the first child. The algorithm is
//! the reflected IEEE 802.3 CRC-32 with the checksum stored little-endian.

/// CRC parameters: polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
    xorout: T,
}

/// CRC-32 algorithm used by the EBML `CRC-32` element.
pub const CRC_EBML_ALG: Algorithm<u32> = Algorithm {
    poly: 0xEDB8_8320,
    init: 0xFFFF_FFFF,
    xorout: 0xFFFF_FFFF,
};

/// Shifts a single table index through eight rounds of the reflected polynomial.
#[inline(always)]
pub const fn crc32_reflected(poly: u32, mut value: u32, len: usize) -> u32 {
    let mut i = 0;
    while i < len {
        value = (value >> 1) ^ ((value & 1) * poly);
        i += 1;
    }

    value
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32_reflected(poly, i as u32, 8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    pub xorout: u32,
    table: [u32; 256],
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            xorout: algorithm.xorout,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = self.table_entry(crc ^ bytes[i] as u32) ^ (crc >> 8);
            i += 1;
        }

        crc
    }

    #[inline(always)]
    pub const fn checksum(&self, bytes: &[u8]) -> u32 {
        self.update(self.init, bytes) ^ self.xorout
    }
}

pub static CRC_EBML: Crc32 = Crc32::new(&CRC_EBML_ALG);

#[test]
fn crc32_check_value() {
    // Standard check input for CRC-32/ISO-HDLC.
    assert_eq!(CRC_EBML.checksum(b"123456789"), 0xCBF4_3926);
    assert_eq!(CRC_EBML.checksum(&[]), 0);
}

#[test]
fn crc32_incremental_matches_oneshot() {
    let data = b"Matroska CRC-32 element payload";
    let (head, tail) = data.split_at(11);
    let partial = CRC_EBML.update(CRC_EBML.init, head);
    let whole = CRC_EBML.update(partial, tail) ^ CRC_EBML.xorout;
    assert_eq!(whole, CRC_EBML.checksum(data));
}
