//! CRC-16/CCITT (zero init, a.k.a. XMODEM) as computed by the IAP firmware.
//!
//! The target recomputes this checksum from flash after every page, one byte
//! at a time, MSB first, polynomial `0x1021`, no reflection, no final XOR.
//! The accumulator is supplied by the caller so a page can be started from
//! zero and folded frame by frame.

/// Generator polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Fold one byte into a running CRC.
#[must_use]
pub const fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc ^ ((byte as u16) << 8);
    let mut bit = 0;
    while bit < 8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ CRC16_POLY
        } else {
            crc << 1
        };
        bit += 1;
    }
    crc
}

/// Fold a byte slice into a running CRC.
#[must_use]
pub fn crc16_extend(crc: u16, data: &[u8]) -> u16 {
    data.iter()
        .fold(crc, |acc, &byte| crc16_update(acc, byte))
}

/// CRC of a whole buffer, starting from zero.
#[must_use]
pub fn crc16_ccitt_zero(data: &[u8]) -> u16 {
    crc16_extend(0, data)
}
