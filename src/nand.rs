use serde::Serialize;
use std::ops::Range;
use tracing::debug;

use crate::error::{NandError, Result};
use crate::fs::{
    CandidateStatus, FilesystemBlock, FsCandidate, Inode, InodeTableOffset, inode_extents,
    select_filesystem_block,
};
use crate::geometry::MIN_IMAGE_SIZE;
use crate::report::{self, NandSummary};
use crate::sksa::{self, SksaRegion};
use crate::spare::{SpareLayout, SpareTable, correct_spare_with_image, regenerate_spare};

/// How a dump is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NandConfig {
    /// Accept filesystem copies whose checksum does not match.
    pub skip_checksum: bool,
    pub inode_table_offset: InodeTableOffset,
}

impl NandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_checksum(mut self, skip: bool) -> Self {
        self.skip_checksum = skip;
        self
    }

    pub fn with_inode_table_offset(mut self, offset: InodeTableOffset) -> Self {
        self.inode_table_offset = offset;
        self
    }

    /// Shorthand for `with_inode_table_offset(BadDump)`.
    pub fn bad_dump(self) -> Self {
        self.with_inode_table_offset(InodeTableOffset::BadDump)
    }
}

/// A loaded NAND image with its filesystem copy already selected.
///
/// The image is never modified. Everything handed out borrows from it, so a
/// memory-mapped dump can back the engine without being copied.
#[derive(Debug)]
pub struct Nand<D = Vec<u8>> {
    image: D,
    config: NandConfig,
    selected: FsCandidate,
    candidates: Vec<FsCandidate>,
    inodes: Vec<Inode>,
}

impl<D: AsRef<[u8]>> Nand<D> {
    pub fn open(image: D, config: NandConfig) -> Result<Self> {
        let len = image.as_ref().len();
        if len < MIN_IMAGE_SIZE {
            return Err(NandError::ImageTooShort {
                needed: MIN_IMAGE_SIZE,
                actual: len,
            });
        }

        let selection = select_filesystem_block(
            image.as_ref(),
            config.skip_checksum,
            config.inode_table_offset,
        )?;
        let selected = selection.block.candidate;
        let inodes = selection.block.inodes()?;
        let candidates = selection.candidates;
        debug!(
            inodes = inodes.len(),
            valid = inodes.iter().filter(|i| i.is_valid()).count(),
            "parsed inode table"
        );

        Ok(Self {
            image,
            config,
            selected,
            candidates,
            inodes,
        })
    }

    pub fn image(&self) -> &[u8] {
        self.image.as_ref()
    }

    pub fn len(&self) -> usize {
        self.image().len()
    }

    pub fn is_empty(&self) -> bool {
        self.image().is_empty()
    }

    pub fn config(&self) -> NandConfig {
        self.config
    }

    pub fn filesystem(&self) -> FilesystemBlock<'_> {
        FilesystemBlock::new(self.image(), self.selected, self.config.inode_table_offset)
    }

    /// Every filesystem slot inspected at open time, in slot order.
    pub fn candidates(&self) -> &[FsCandidate] {
        &self.candidates
    }

    pub fn selected_candidate(&self) -> &FsCandidate {
        &self.selected
    }

    /// True when the selected copy only passed because checksums were skipped.
    pub fn recovered_from_corruption(&self) -> bool {
        self.selected.status == CandidateStatus::BadChecksum
    }

    /// All inode slots, valid or not, in table order.
    pub fn inodes(&self) -> &[Inode] {
        &self.inodes
    }

    pub fn valid_inodes(&self) -> impl Iterator<Item = &Inode> {
        self.inodes.iter().filter(|inode| inode.is_valid())
    }

    pub fn inode_by_index(&self, index: usize) -> Option<&Inode> {
        self.inodes.get(index)
    }

    pub fn inode_extents(&self, inode: &Inode) -> Result<Vec<Range<usize>>> {
        inode_extents(&self.filesystem(), self.len(), inode)
    }

    /// The file contents of `inode`, gathered from its block chain.
    pub fn inode_data(&self, inode: &Inode) -> Result<Vec<u8>> {
        let image = self.image();
        let extents = self.inode_extents(inode)?;
        let mut data = Vec::with_capacity(inode.size as usize);
        for range in extents {
            data.extend_from_slice(&image[range]);
        }
        Ok(data)
    }

    /// The raw SKSA bytes at the start of the image.
    pub fn extract_sksa(&self) -> Result<&[u8]> {
        sksa::extract_sksa(self.image())
    }

    pub fn sksa(&self) -> Result<SksaRegion<'_>> {
        sksa::parse_sksa(self.image())
    }

    /// Spare data computed from the page payloads of this image.
    pub fn generate_spare_data(&self, layout: SpareLayout) -> SpareTable {
        regenerate_spare(self.image(), layout, None)
    }

    /// Like [`Nand::generate_spare_data`], keeping the status bytes of `base`.
    pub fn regenerate_spare_data(&self, layout: SpareLayout, base: &SpareTable) -> SpareTable {
        regenerate_spare(self.image(), layout, Some(base))
    }

    /// Fixes the ECC bytes of a separately captured spare table in place.
    pub fn correct_spare(&self, spare: &mut SpareTable) -> usize {
        correct_spare_with_image(spare, self.image())
    }

    /// Human-readable report of the image.
    pub fn describe(&self, full_detail: bool, show_all_candidates: bool) -> String {
        report::describe(self, full_detail, show_all_candidates)
    }

    pub fn summary(&self) -> NandSummary {
        NandSummary::from_nand(self)
    }
}
