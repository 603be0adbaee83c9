//! Picks the authoritative filesystem copy out of the redundant slots at the
//! end of the NAND. Copies are written log-style, so the newest sequence
//! number with a good checksum wins.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{FS_CHECKSUM, FilesystemBlock, FsFooter, InodeTableOffset, block_checksum};
use crate::error::{NandError, Result};
use crate::geometry::{BLOCK_SIZE, block_offset, fs_candidate_blocks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandidateStatus {
    /// The slot lies past the end of the image.
    Missing,
    /// No `BBFS` footer; erased or never written.
    NoMagic,
    /// `BBFL` footer: a FAT link block, not a filesystem copy.
    LinkBlock,
    /// Footer present but the block sum is not 0xCAD7.
    BadChecksum,
    Valid,
}

impl CandidateStatus {
    pub fn is_readable(&self) -> bool {
        matches!(self, CandidateStatus::BadChecksum | CandidateStatus::Valid)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            CandidateStatus::Missing => "missing (image too short)",
            CandidateStatus::NoMagic => "no filesystem magic",
            CandidateStatus::LinkBlock => "link block (BBFL)",
            CandidateStatus::BadChecksum => "checksum mismatch",
            CandidateStatus::Valid => "valid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsCandidate {
    pub slot: usize,
    pub block: usize,
    pub offset: usize,
    pub status: CandidateStatus,
    pub seqno: u32,
    pub link_block: u16,
    /// Sum over the whole block; equals 0xCAD7 for an intact copy.
    pub sum: u16,
}

impl FsCandidate {
    fn inspect(image: &[u8], slot: usize, block: usize) -> Self {
        let offset = block_offset(block);
        let Some((data, footer)) = image
            .get(offset..offset + BLOCK_SIZE)
            .and_then(|data| Some((data, FsFooter::parse(data).ok()?)))
        else {
            return Self {
                slot,
                block,
                offset,
                status: CandidateStatus::Missing,
                seqno: 0,
                link_block: 0,
                sum: 0,
            };
        };

        let sum = block_checksum(data);
        let status = if footer.is_link() {
            CandidateStatus::LinkBlock
        } else if !footer.is_filesystem() {
            CandidateStatus::NoMagic
        } else if sum != FS_CHECKSUM {
            CandidateStatus::BadChecksum
        } else {
            CandidateStatus::Valid
        };

        Self {
            slot,
            block,
            offset,
            status,
            seqno: footer.seqno,
            link_block: footer.link_block,
            sum,
        }
    }
}

/// Outcome of the candidate search: the chosen copy plus what was found in
/// every slot.
#[derive(Debug, Clone)]
pub struct FsSelection<'a> {
    pub block: FilesystemBlock<'a>,
    pub candidates: Vec<FsCandidate>,
}

impl FsSelection<'_> {
    /// True when the chosen copy failed its checksum and was only accepted
    /// because checksum verification was disabled.
    pub fn recovered_from_corruption(&self) -> bool {
        self.block.candidate.status == CandidateStatus::BadChecksum
    }
}

pub fn scan_candidates(image: &[u8]) -> Vec<FsCandidate> {
    fs_candidate_blocks()
        .enumerate()
        .map(|(slot, block)| {
            let candidate = FsCandidate::inspect(image, slot, block);
            debug!(
                slot,
                block = %format!("0x{block:03X}"),
                seqno = candidate.seqno,
                sum = %format!("0x{:04X}", candidate.sum),
                status = candidate.status.describe(),
                "filesystem candidate"
            );
            candidate
        })
        .collect()
}

/// Picks the readable candidate with the highest sequence number. Unless
/// `skip_checksum` is set only checksum-valid candidates qualify. On equal
/// sequence numbers the lower slot wins.
pub fn select_filesystem_block(
    image: &[u8],
    skip_checksum: bool,
    inode_offset: InodeTableOffset,
) -> Result<FsSelection<'_>> {
    let candidates = scan_candidates(image);

    let chosen = candidates
        .iter()
        .filter(|c| match c.status {
            CandidateStatus::Valid => true,
            CandidateStatus::BadChecksum => skip_checksum,
            _ => false,
        })
        .max_by(|a, b| a.seqno.cmp(&b.seqno).then(b.slot.cmp(&a.slot)))
        .copied()
        .ok_or(NandError::NoValidFilesystemBlock {
            candidates: candidates.len(),
        })?;

    for bad in candidates
        .iter()
        .filter(|c| c.status == CandidateStatus::BadChecksum)
    {
        warn!(
            block = %format!("0x{:03X}", bad.block),
            seqno = bad.seqno,
            sum = %format!("0x{:04X}", bad.sum),
            tolerated = skip_checksum,
            "filesystem block checksum mismatch"
        );
    }

    info!(
        block = %format!("0x{:03X}", chosen.block),
        seqno = chosen.seqno,
        status = chosen.status.describe(),
        "selected filesystem block"
    );

    Ok(FsSelection {
        block: FilesystemBlock::new(image, chosen, inode_offset),
        candidates,
    })
}
