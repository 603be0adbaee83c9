use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{self, Cursor, Read};

pub mod inode;
pub mod selector;

pub use inode::{Inode, InodeTableOffset, inode_extents};
pub use selector::{CandidateStatus, FsCandidate, FsSelection, select_filesystem_block};

use crate::geometry::BLOCK_SIZE;

pub const FAT_ENTRIES: usize = 0x1000;
pub const INODE_TABLE_START: usize = FAT_ENTRIES * 2;
pub const INODE_SIZE: usize = 0x14;
pub const INODE_SLOTS: usize = 409;
pub const FOOTER_OFFSET: usize = INODE_TABLE_START + INODE_SLOTS * INODE_SIZE;

pub const FS_MAGIC: [u8; 4] = *b"BBFS";
pub const FS_LINK_MAGIC: [u8; 4] = *b"BBFL";
pub const FS_CHECKSUM: u16 = 0xCAD7;

const FAT_FREE: u16 = 0x0000;
const FAT_END_OF_CHAIN: u16 = 0xFFFF;
const FAT_BAD_BLOCK: u16 = 0xFFFE;
const FAT_RESERVED: u16 = 0xFFFD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FatEntry {
    Free,
    EndOfChain,
    BadBlock,
    Reserved,
    Chain(u16),
}

impl From<u16> for FatEntry {
    fn from(raw: u16) -> Self {
        match raw {
            FAT_FREE => FatEntry::Free,
            FAT_END_OF_CHAIN => FatEntry::EndOfChain,
            FAT_BAD_BLOCK => FatEntry::BadBlock,
            FAT_RESERVED => FatEntry::Reserved,
            next => FatEntry::Chain(next),
        }
    }
}

impl FatEntry {
    pub fn raw(&self) -> u16 {
        match *self {
            FatEntry::Free => FAT_FREE,
            FatEntry::EndOfChain => FAT_END_OF_CHAIN,
            FatEntry::BadBlock => FAT_BAD_BLOCK,
            FatEntry::Reserved => FAT_RESERVED,
            FatEntry::Chain(next) => next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsFooter {
    pub magic: [u8; 4],
    pub seqno: u32,
    pub link_block: u16,
    pub checksum: u16,
}

impl FsFooter {
    /// Reads the footer from the last 12 bytes of a filesystem block.
    pub fn parse(block: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(block.get(FOOTER_OFFSET..).unwrap_or(&[]));
        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        Ok(Self {
            magic,
            seqno: cursor.read_u32::<BigEndian>()?,
            link_block: cursor.read_u16::<BigEndian>()?,
            checksum: cursor.read_u16::<BigEndian>()?,
        })
    }

    /// `BBFS`: a copy of the filesystem proper.
    pub fn is_filesystem(&self) -> bool {
        self.magic == FS_MAGIC
    }

    /// `BBFL`: a link block extending the FAT of a larger NAND.
    pub fn is_link(&self) -> bool {
        self.magic == FS_LINK_MAGIC
    }

    pub fn magic_string(&self) -> String {
        String::from_utf8_lossy(&self.magic).into_owned()
    }
}

/// Wrapping sum of the block's big-endian 16-bit words.
pub fn block_checksum(block: &[u8]) -> u16 {
    block
        .chunks_exact(2)
        .fold(0u16, |sum, word| sum.wrapping_add(u16::from_be_bytes([word[0], word[1]])))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FatUsage {
    pub free: usize,
    pub used: usize,
    pub bad: usize,
    pub reserved: usize,
}

/// Read-only view of the selected filesystem copy.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemBlock<'a> {
    pub candidate: FsCandidate,
    data: &'a [u8],
    inode_offset: InodeTableOffset,
}

impl<'a> FilesystemBlock<'a> {
    /// # Panics
    /// Panics if `candidate` does not lie inside `image`; candidates come
    /// from [`select_filesystem_block`] which only yields in-bounds ones.
    pub fn new(image: &'a [u8], candidate: FsCandidate, inode_offset: InodeTableOffset) -> Self {
        let data = &image[candidate.offset..candidate.offset + BLOCK_SIZE];
        Self {
            candidate,
            data,
            inode_offset,
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn footer(&self) -> io::Result<FsFooter> {
        FsFooter::parse(self.data)
    }

    pub fn seqno(&self) -> u32 {
        self.candidate.seqno
    }

    pub fn inode_offset(&self) -> InodeTableOffset {
        self.inode_offset
    }

    pub fn fat_entry(&self, block: u16) -> Option<FatEntry> {
        let index = block as usize;
        if index >= FAT_ENTRIES {
            return None;
        }
        let raw = &self.data[index * 2..index * 2 + 2];
        Some(FatEntry::from(u16::from_be_bytes([raw[0], raw[1]])))
    }

    pub fn fat(&self) -> impl Iterator<Item = FatEntry> + 'a {
        self.data[..INODE_TABLE_START]
            .chunks_exact(2)
            .map(|raw| FatEntry::from(u16::from_be_bytes([raw[0], raw[1]])))
    }

    pub fn fat_usage(&self) -> FatUsage {
        self.fat().fold(FatUsage::default(), |mut usage, entry| {
            match entry {
                FatEntry::Free => usage.free += 1,
                FatEntry::BadBlock => usage.bad += 1,
                FatEntry::Reserved => usage.reserved += 1,
                FatEntry::EndOfChain | FatEntry::Chain(_) => usage.used += 1,
            }
            usage
        })
    }

    /// Every inode slot in on-disk order, including invalid ones.
    pub fn inodes(&self) -> io::Result<Vec<Inode>> {
        inode::parse_inode_table(self.data, self.inode_offset)
    }
}
