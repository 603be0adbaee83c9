//! SmartMedia-style Hamming ECC as computed by the BB NAND controller.
//!
//! Each 256-byte half page gets 3 bytes in SmartMedia order:
//!
//! | byte | bits 7..0                               |
//! |------|-----------------------------------------|
//! | 0    | LP07 LP06 LP05 LP04 LP03 LP02 LP01 LP00 |
//! | 1    | LP15 LP14 LP13 LP12 LP11 LP10 LP09 LP08 |
//! | 2    | CP5 CP4 CP3 CP2 CP1 CP0 1 1             |
//!
//! LP(2k+1) covers bytes whose address bit k is set, LP(2k) the rest. This is
//! the Linux `nand_ecc` layout with `CONFIG_MTD_NAND_ECC_SW_HAMMING_SMC`; the
//! older Linux default has bytes 0 and 1 swapped. All parity bits are stored
//! inverted so that erased flash (all 0xFF) carries an all-0xFF code.

use crate::geometry::PAGE_SIZE;

pub type Ecc = [u8; 3];

pub const ECC_CHUNK: usize = 256;

/// Bits 0..6: column parities CP0..CP5, bit 6: parity of the whole byte.
static PARITY_TABLE: [u8; 256] = build_parity_table();

const fn parity(x: u8) -> u8 {
    (x.count_ones() & 1) as u8
}

const fn build_parity_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let b = i as u8;
        table[i] = parity(b & 0x55)
            | parity(b & 0xAA) << 1
            | parity(b & 0x33) << 2
            | parity(b & 0xCC) << 3
            | parity(b & 0x0F) << 4
            | parity(b & 0xF0) << 5
            | parity(b) << 6;
        i += 1;
    }
    table
}

/// Interleaves the odd-line (`lp_odd`) and even-line (`lp_even`) parity
/// registers into `(LP15..LP08, LP07..LP00)`.
fn interleave_line_parity(lp_even: u8, lp_odd: u8) -> (u8, u8) {
    let mut out = [0u8; 2];
    for (half, byte) in out.iter_mut().enumerate() {
        for i in 0..4 {
            let src = 7 - (half * 4 + i);
            if lp_odd & (1 << src) != 0 {
                *byte |= 0x80 >> (i * 2);
            }
            if lp_even & (1 << src) != 0 {
                *byte |= 0x40 >> (i * 2);
            }
        }
    }
    (out[0], out[1])
}

/// ECC for one 256-byte chunk.
///
/// # Panics
/// Panics if `data` is not exactly [`ECC_CHUNK`] bytes long.
pub fn calc_ecc_256(data: &[u8]) -> Ecc {
    assert_eq!(data.len(), ECC_CHUNK, "ECC chunk must be 256 bytes");

    let mut column = 0u8;
    let mut lp_odd = 0u8;
    let mut lp_even = 0u8;

    for (index, &byte) in data.iter().enumerate() {
        let bits = PARITY_TABLE[byte as usize];
        column ^= bits & 0x3F;
        if bits & 0x40 != 0 {
            lp_odd ^= index as u8;
            lp_even ^= !(index as u8);
        }
    }

    let (lp_high, lp_low) = interleave_line_parity(lp_even, lp_odd);
    [!lp_low, !lp_high, (!column << 2) | 0x03]
}

/// ECC for a full page, returned as `(first_half, second_half)`.
pub fn calc_ecc_512(page: &[u8]) -> (Ecc, Ecc) {
    assert_eq!(page.len(), PAGE_SIZE, "page must be 512 bytes");
    let (first, second) = page.split_at(ECC_CHUNK);
    (calc_ecc_256(first), calc_ecc_256(second))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccOutcome {
    Clean,
    /// A single data bit was flipped and has been repaired.
    CorrectedData { byte: usize, bit: u8 },
    /// The stored code itself had a single flipped bit; data is intact.
    CorrectedEcc,
    Uncorrectable,
}

/// Checks `data` against `stored` and repairs a single-bit data error in place.
pub fn correct_ecc_256(data: &mut [u8], stored: Ecc) -> EccOutcome {
    let calc = calc_ecc_256(data);
    let d = [calc[0] ^ stored[0], calc[1] ^ stored[1], calc[2] ^ stored[2]];

    if d == [0, 0, 0] {
        return EccOutcome::Clean;
    }

    let paired = |x: u8, mask: u8| (x ^ (x >> 1)) & mask == mask;
    if paired(d[0], 0x55) && paired(d[1], 0x55) && paired(d[2], 0x54) {
        let mut byte = 0usize;
        for (i, &diff) in [d[1], d[0]].iter().enumerate() {
            for j in 0..4 {
                if diff & (0x80 >> (j * 2)) != 0 {
                    byte |= 0x80 >> (i * 4 + j);
                }
            }
        }
        let mut bit = 0u8;
        for j in 0..3 {
            if d[2] & (0x80 >> (j * 2)) != 0 {
                bit |= 0x04 >> j;
            }
        }
        data[byte] ^= 1 << bit;
        return EccOutcome::CorrectedData { byte, bit };
    }

    if d.iter().map(|x| x.count_ones()).sum::<u32>() == 1 {
        EccOutcome::CorrectedEcc
    } else {
        EccOutcome::Uncorrectable
    }
}
