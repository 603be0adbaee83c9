//! Spare (out-of-band) data: the three dump encodings, normalisation to the
//! canonical block-spare layout, and ECC regeneration from page payloads.

pub mod ecc;

use std::fmt;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{NandError, Result};
use crate::geometry::{
    BLOCK_SPARE_SIZE, NUM_BLOCKS, NUM_PAGES, OVERDUMP_SPARE_SIZE, OVERDUMP_STRIDE, PAGE_SIZE,
    PAGE_SPARE_SIZE, PAGES_PER_BLOCK, SPARE_SIZE, page_range,
};
use ecc::{ECC_CHUNK, Ecc, EccOutcome, calc_ecc_512, correct_ecc_256};

const SA_LINK_RANGE: std::ops::Range<usize> = 0..3;
const BAD_BLOCK_OFFSET: usize = 5;
const DUMP_FLAG_OFFSET: usize = 6;
const SECOND_ECC_OFFSET: usize = 8;
const FIRST_ECC_OFFSET: usize = 13;
const STATUS_LEN: usize = 8;

/// Offset of the last page's record inside one block of page-spare data.
const LAST_PAGE_RECORD: usize = (PAGES_PER_BLOCK - 1) * SPARE_SIZE;

const ERASED_PAGE: [u8; PAGE_SIZE] = [0xFF; PAGE_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpareFormat {
    /// One record per block (0x10000 bytes).
    BlockSpare,
    /// 16 spare bytes followed by 0xF0 junk bytes, per block (0x100000 bytes).
    Overdump,
    /// One record per page (0x200000 bytes).
    PageSpare,
}

impl SpareFormat {
    pub fn detect(len: usize) -> Result<Self> {
        match len {
            BLOCK_SPARE_SIZE => Ok(SpareFormat::BlockSpare),
            OVERDUMP_SPARE_SIZE => Ok(SpareFormat::Overdump),
            PAGE_SPARE_SIZE => Ok(SpareFormat::PageSpare),
            other => Err(NandError::UnrecognizedSpareFormat(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpareFormat::BlockSpare => "block-spare",
            SpareFormat::Overdump => "overdump",
            SpareFormat::PageSpare => "page-spare",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SpareLayout {
    /// 4096 records, one per block (its last page).
    #[default]
    Block,
    /// 4096 × 32 records, one per page.
    Page,
}

impl SpareLayout {
    pub fn record_count(&self) -> usize {
        match self {
            SpareLayout::Block => NUM_BLOCKS,
            SpareLayout::Page => NUM_PAGES,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SpareLayout::Block => "block",
            SpareLayout::Page => "page",
        }
    }
}

/// A spare record whose stored ECC disagrees with one half of its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EccMismatch {
    /// Index into the table's records.
    pub record: usize,
    pub page: usize,
    /// 0 for the first 256 bytes of the page, 1 for the second.
    pub half: usize,
    /// `CorrectedData` means the image, not the spare, holds the flipped bit.
    pub outcome: EccOutcome,
}

/// One 16-byte spare record.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PageSpare([u8; SPARE_SIZE]);

impl PageSpare {
    /// Status bytes written when no captured spare exists for a page.
    pub const FRESH: PageSpare = PageSpare([
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xFF,
    ]);

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut record = [0u8; SPARE_SIZE];
        record.copy_from_slice(&bytes[..SPARE_SIZE]);
        PageSpare(record)
    }

    pub fn as_bytes(&self) -> &[u8; SPARE_SIZE] {
        &self.0
    }

    /// Canonical block-spare form: the dump-method flag cleared.
    pub fn normalized(mut self) -> Self {
        self.0[DUMP_FLAG_OFFSET] = 0;
        self
    }

    pub fn dump_flag(&self) -> u8 {
        self.0[DUMP_FLAG_OFFSET]
    }

    /// System-app chain link; the three stored copies are majority-voted.
    pub fn sa_link(&self) -> u8 {
        let [a, b, c] = [self.0[0], self.0[1], self.0[2]];
        if a == b || a == c { a } else { c }
    }

    pub fn is_bad(&self) -> bool {
        self.0[BAD_BLOCK_OFFSET].count_zeros() > 1
    }

    pub fn ecc_first(&self) -> Ecc {
        self.ecc_at(FIRST_ECC_OFFSET)
    }

    pub fn ecc_second(&self) -> Ecc {
        self.ecc_at(SECOND_ECC_OFFSET)
    }

    fn ecc_at(&self, offset: usize) -> Ecc {
        [self.0[offset], self.0[offset + 1], self.0[offset + 2]]
    }

    pub fn with_ecc(mut self, first: Ecc, second: Ecc) -> Self {
        self.0[FIRST_ECC_OFFSET..FIRST_ECC_OFFSET + 3].copy_from_slice(&first);
        self.0[SECOND_ECC_OFFSET..SECOND_ECC_OFFSET + 3].copy_from_slice(&second);
        self
    }

    /// Takes the status bytes from `status`, keeping this record's ECC.
    fn with_status_of(self, status: &PageSpare) -> Self {
        let mut record = self.0;
        record[..STATUS_LEN].copy_from_slice(&status.0[..STATUS_LEN]);
        PageSpare(record)
    }

    fn sa_link_copies(&self) -> &[u8] {
        &self.0[SA_LINK_RANGE]
    }
}

impl fmt::Debug for PageSpare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageSpare({})", hex::encode_upper(self.0))
    }
}

/// A decoded spare file, either reduced to one record per block or kept at
/// one record per page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpareTable {
    layout: SpareLayout,
    records: Vec<PageSpare>,
}

impl SpareTable {
    /// Decodes a raw spare capture.
    ///
    /// With `retain_full` a page-spare input is kept verbatim; block-spare
    /// input is returned as block-spare since no page detail exists, and an
    /// overdump is rejected.
    pub fn parse(raw: &[u8], retain_full: bool) -> Result<Self> {
        let format = SpareFormat::detect(raw.len())?;
        debug!(format = format.name(), retain_full, "decoding spare data");

        let table = match (format, retain_full) {
            (SpareFormat::Overdump, true) => return Err(NandError::FullSpareFromOverdump),
            (SpareFormat::PageSpare, true) => SpareTable {
                layout: SpareLayout::Page,
                records: raw.chunks_exact(SPARE_SIZE).map(PageSpare::from_slice).collect(),
            },
            (SpareFormat::BlockSpare, _) => Self::strided(raw, 0, SPARE_SIZE),
            (SpareFormat::PageSpare, false) => {
                Self::strided(raw, LAST_PAGE_RECORD, SPARE_SIZE * PAGES_PER_BLOCK)
            }
            (SpareFormat::Overdump, false) => Self::strided(raw, 0, OVERDUMP_STRIDE),
        };

        Ok(table)
    }

    fn strided(raw: &[u8], start: usize, stride: usize) -> Self {
        let records = raw[start..]
            .chunks(stride)
            .map(|chunk| PageSpare::from_slice(chunk).normalized())
            .collect();
        SpareTable {
            layout: SpareLayout::Block,
            records,
        }
    }

    /// A table with fresh status bytes and no ECC.
    pub fn blank(layout: SpareLayout) -> Self {
        SpareTable {
            layout,
            records: vec![PageSpare::FRESH; layout.record_count()],
        }
    }

    pub fn layout(&self) -> SpareLayout {
        self.layout
    }

    pub fn records(&self) -> &[PageSpare] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The record describing `block` (the last page's record for page layout).
    pub fn block_record(&self, block: usize) -> Option<&PageSpare> {
        match self.layout {
            SpareLayout::Block => self.records.get(block),
            SpareLayout::Page => self.records.get(block * PAGES_PER_BLOCK + PAGES_PER_BLOCK - 1),
        }
    }

    /// Drops page detail, keeping each block's last-page record.
    pub fn reduce(&self) -> SpareTable {
        match self.layout {
            SpareLayout::Block => self.clone(),
            SpareLayout::Page => SpareTable {
                layout: SpareLayout::Block,
                records: self
                    .records
                    .chunks_exact(PAGES_PER_BLOCK)
                    .map(|pages| pages[PAGES_PER_BLOCK - 1].normalized())
                    .collect(),
            },
        }
    }

    /// Pads to page layout by repeating each block record over its pages.
    /// Lossy in the sense that per-page ECC is not recovered.
    pub fn expand(&self) -> SpareTable {
        match self.layout {
            SpareLayout::Page => self.clone(),
            SpareLayout::Block => SpareTable {
                layout: SpareLayout::Page,
                records: self
                    .records
                    .iter()
                    .flat_map(|record| std::iter::repeat_n(*record, PAGES_PER_BLOCK))
                    .collect(),
            },
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.records
            .iter()
            .flat_map(|record| record.as_bytes().iter().copied())
            .collect()
    }

    pub fn bad_blocks(&self) -> Vec<usize> {
        (0..NUM_BLOCKS)
            .filter(|&block| self.block_record(block).is_some_and(PageSpare::is_bad))
            .collect()
    }

    /// Index of the next block in the system-app chain, if any.
    pub fn sa_link(&self, block: usize) -> Option<u8> {
        let record = self.block_record(block)?;
        if record.sa_link_copies().iter().all(|&b| b == 0xFF) {
            return None;
        }
        Some(record.sa_link())
    }

    /// Compares each record's stored ECC with the page it covers in `image`.
    /// Only halves that disagree are returned, in record order.
    pub fn check_against_image(&self, image: &[u8]) -> Vec<EccMismatch> {
        let layout = self.layout;
        self.records
            .par_iter()
            .enumerate()
            .flat_map_iter(|(record, spare)| {
                let page = record_page(layout, record);
                let (first, second) = page_or_erased(image, page).split_at(ECC_CHUNK);
                [(0, first, spare.ecc_first()), (1, second, spare.ecc_second())]
                    .into_iter()
                    .filter_map(move |(half, chunk, stored)| {
                        let mut chunk = chunk.to_vec();
                        match correct_ecc_256(&mut chunk, stored) {
                            EccOutcome::Clean => None,
                            outcome => Some(EccMismatch {
                                record,
                                page,
                                half,
                                outcome,
                            }),
                        }
                    })
            })
            .collect()
    }

    /// Recomputes every record's ECC from `image` and overwrites the records
    /// whose ECC disagrees. Status bytes are kept. Returns the number of
    /// records changed.
    pub fn correct_with_image(&mut self, image: &[u8]) -> usize {
        let corrected = self.refresh_ecc(image);
        if corrected > 0 {
            warn!(corrected, layout = self.layout.name(), "corrected spare ECC from image");
        }
        corrected
    }

    fn refresh_ecc(&mut self, image: &[u8]) -> usize {
        let layout = self.layout;
        let corrected: usize = self
            .records
            .par_iter_mut()
            .enumerate()
            .map(|(index, record)| {
                let (first, second) = record_ecc(image, layout, index);
                if record.ecc_first() == first && record.ecc_second() == second {
                    0
                } else {
                    *record = record.with_ecc(first, second);
                    1
                }
            })
            .sum();
        corrected
    }
}

/// Decodes any recognised spare capture into the canonical block-spare table.
pub fn normalize_spare(raw: &[u8]) -> Result<SpareTable> {
    SpareTable::parse(raw, false)
}

/// Serialises a table as block-spare (0x10000 bytes) or page-spare
/// (0x200000 bytes).
pub fn expand_spare(table: &SpareTable, to_full: bool) -> Vec<u8> {
    if to_full {
        table.expand().to_bytes()
    } else {
        table.reduce().to_bytes()
    }
}

/// Builds spare data from scratch using the page payloads of `image`.
pub fn generate_spare_from_image(image: &[u8], layout: SpareLayout) -> SpareTable {
    let mut table = SpareTable::blank(layout);
    let filled = table.refresh_ecc(image);
    debug!(filled, layout = layout.name(), "generated spare data");
    table
}

/// Repairs the ECC of a separately captured spare table against `image`.
pub fn correct_spare_with_image(candidate: &mut SpareTable, image: &[u8]) -> usize {
    candidate.correct_with_image(image)
}

/// Same as [`generate_spare_from_image`], but keeps the status bytes of `base`
/// where the layouts match.
pub fn regenerate_spare(image: &[u8], layout: SpareLayout, base: Option<&SpareTable>) -> SpareTable {
    match base {
        Some(base) => {
            let mut table = match layout {
                SpareLayout::Block => base.reduce(),
                SpareLayout::Page => base.expand(),
            };
            let fresh = generate_spare_from_image(image, layout);
            for (record, generated) in table.records.iter_mut().zip(fresh.records()) {
                *record = generated.with_status_of(record);
            }
            table
        }
        None => generate_spare_from_image(image, layout),
    }
}

/// The page whose ECC a record carries: the block's last page for block-spare.
fn record_page(layout: SpareLayout, index: usize) -> usize {
    match layout {
        SpareLayout::Block => index * PAGES_PER_BLOCK + PAGES_PER_BLOCK - 1,
        SpareLayout::Page => index,
    }
}

fn record_ecc(image: &[u8], layout: SpareLayout, index: usize) -> (Ecc, Ecc) {
    calc_ecc_512(page_or_erased(image, record_page(layout, index)))
}

/// Pages past the end of a truncated image read as erased flash.
fn page_or_erased(image: &[u8], page: usize) -> &[u8] {
    image.get(page_range(page)).unwrap_or(&ERASED_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_rejects_unknown_sizes() {
        assert!(matches!(
            SpareFormat::detect(0x12345),
            Err(NandError::UnrecognizedSpareFormat(0x12345))
        ));
        assert_eq!(
            SpareFormat::detect(0x100000).unwrap(),
            SpareFormat::Overdump
        );
    }

    #[test]
    fn test_block_spare_zeroes_flag() {
        let raw = vec![0x11u8; BLOCK_SPARE_SIZE];
        let table = normalize_spare(&raw).unwrap();
        assert_eq!(table.len(), NUM_BLOCKS);
        for record in table.records() {
            assert_eq!(record.dump_flag(), 0);
            assert_eq!(record.as_bytes()[5], 0x11);
        }
    }

    #[test]
    fn test_page_spare_keeps_last_page() {
        let mut raw = vec![0u8; PAGE_SPARE_SIZE];
        for (page, record) in raw.chunks_exact_mut(SPARE_SIZE).enumerate() {
            record.fill((page % PAGES_PER_BLOCK) as u8);
        }
        let table = normalize_spare(&raw).unwrap();
        assert_eq!(table.len(), NUM_BLOCKS);
        assert!(table.records().iter().all(|r| r.as_bytes()[0] == 31));
        assert!(table.records().iter().all(|r| r.dump_flag() == 0));
    }

    #[test]
    fn test_overdump_full_retention_rejected() {
        let raw = vec![0u8; OVERDUMP_SPARE_SIZE];
        assert!(matches!(
            SpareTable::parse(&raw, true),
            Err(NandError::FullSpareFromOverdump)
        ));
    }

    #[test]
    fn test_page_spare_full_retention_is_verbatim() {
        let raw: Vec<u8> = (0..PAGE_SPARE_SIZE).map(|i| (i % 251) as u8).collect();
        let table = SpareTable::parse(&raw, true).unwrap();
        assert_eq!(table.layout(), SpareLayout::Page);
        assert_eq!(table.to_bytes(), raw);
    }

    #[test]
    fn test_sa_link_majority() {
        let mut bytes = [0xFFu8; SPARE_SIZE];
        bytes[..3].copy_from_slice(&[0x12, 0x12, 0x34]);
        assert_eq!(PageSpare::from_slice(&bytes).sa_link(), 0x12);
        bytes[..3].copy_from_slice(&[0x56, 0x34, 0x34]);
        assert_eq!(PageSpare::from_slice(&bytes).sa_link(), 0x34);
    }

    #[test]
    fn test_bad_block_indicator() {
        let mut bytes = [0xFFu8; SPARE_SIZE];
        assert!(!PageSpare::from_slice(&bytes).is_bad());
        bytes[5] = 0xFE;
        assert!(!PageSpare::from_slice(&bytes).is_bad());
        bytes[5] = 0x00;
        assert!(PageSpare::from_slice(&bytes).is_bad());
    }

    #[test]
    fn test_generated_erased_image_has_ff_ecc() {
        let table = generate_spare_from_image(&[], SpareLayout::Block);
        assert_eq!(table.len(), NUM_BLOCKS);
        assert!(table.records().iter().all(|r| *r == PageSpare::FRESH));
    }

    #[test]
    fn test_check_finds_bit_flip_in_image() {
        let image: Vec<u8> = (0..2 * PAGES_PER_BLOCK * PAGE_SIZE).map(|i| (i % 253) as u8).collect();
        let table = generate_spare_from_image(&image, SpareLayout::Block);
        assert!(table.check_against_image(&image).is_empty());

        let mut flipped = image.clone();
        let last_page_of_block_1 = (2 * PAGES_PER_BLOCK - 1) * PAGE_SIZE;
        flipped[last_page_of_block_1 + ECC_CHUNK + 0x41] ^= 0x10;

        let mismatches = table.check_against_image(&flipped);
        assert_eq!(
            mismatches,
            vec![EccMismatch {
                record: 1,
                page: 2 * PAGES_PER_BLOCK - 1,
                half: 1,
                outcome: EccOutcome::CorrectedData { byte: 0x41, bit: 4 },
            }]
        );
    }

    #[test]
    fn test_check_flags_stale_spare() {
        // Zeroed ECC against erased pages differs in every bit.
        let table = normalize_spare(&vec![0x00u8; BLOCK_SPARE_SIZE]).unwrap();
        let mismatches = table.check_against_image(&[]);

        assert_eq!(mismatches.len(), 2 * NUM_BLOCKS);
        assert_eq!(mismatches[0].record, 0);
        assert_eq!(mismatches[1].half, 1);
        assert_eq!(mismatches[2].page, 2 * PAGES_PER_BLOCK - 1);
        assert!(mismatches.iter().all(|m| m.outcome == EccOutcome::Uncorrectable));
    }

    #[test]
    fn test_correction_keeps_status_bytes() {
        let mut image = vec![0xFFu8; 2 * PAGES_PER_BLOCK * PAGE_SIZE];
        image[(PAGES_PER_BLOCK - 1) * PAGE_SIZE] = 0xFE;

        let mut raw = vec![0xFFu8; BLOCK_SPARE_SIZE];
        raw[0] = 0x07;
        raw[1] = 0x07;
        raw[2] = 0x07;
        let mut table = normalize_spare(&raw).unwrap();

        let changed = correct_spare_with_image(&mut table, &image);
        assert_eq!(changed, 1);
        let record = table.block_record(0).unwrap();
        assert_eq!(record.sa_link(), 0x07);
        assert_ne!(record.ecc_first(), [0xFF; 3]);
        assert_eq!(record.ecc_second(), [0xFF; 3]);
    }
}
