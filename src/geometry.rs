//! Fixed geometry of the 64 MiB BB NAND and its spare area.

use std::ops::Range;

pub const PAGE_SIZE: usize = 0x200;
pub const PAGES_PER_BLOCK: usize = 32;
pub const BLOCK_SIZE: usize = PAGE_SIZE * PAGES_PER_BLOCK;
pub const NUM_BLOCKS: usize = 0x1000;
pub const NAND_SIZE: usize = BLOCK_SIZE * NUM_BLOCKS;

pub const SPARE_SIZE: usize = 0x10;
pub const NUM_PAGES: usize = NUM_BLOCKS * PAGES_PER_BLOCK;

pub const BLOCK_SPARE_SIZE: usize = SPARE_SIZE * NUM_BLOCKS;
pub const PAGE_SPARE_SIZE: usize = SPARE_SIZE * NUM_PAGES;

/// Bytes captured per block by an overdump: the block's spare record plus
/// 0xF0 junk bytes.
pub const OVERDUMP_STRIDE: usize = 0x100;
pub const OVERDUMP_SPARE_SIZE: usize = OVERDUMP_STRIDE * NUM_BLOCKS;

pub const NUM_FS_BLOCKS: usize = 16;
pub const FS_FIRST_BLOCK: usize = NUM_BLOCKS - NUM_FS_BLOCKS;

pub const SK_SIZE: usize = 4 * BLOCK_SIZE;
pub const SIG_AREA_SIZE: usize = BLOCK_SIZE;

/// Smallest image that still holds the first filesystem copy.
pub const MIN_IMAGE_SIZE: usize = (FS_FIRST_BLOCK + 1) * BLOCK_SIZE;

#[inline]
pub const fn block_offset(block: usize) -> usize {
    block * BLOCK_SIZE
}

#[inline]
pub fn block_range(block: usize) -> Range<usize> {
    let start = block_offset(block);
    start..start + BLOCK_SIZE
}

#[inline]
pub fn page_range(page: usize) -> Range<usize> {
    let start = page * PAGE_SIZE;
    start..start + PAGE_SIZE
}

/// Image offsets of every redundant filesystem copy, oldest slot first.
pub fn fs_candidate_blocks() -> Range<usize> {
    FS_FIRST_BLOCK..NUM_BLOCKS
}
