use byteorder::{BigEndian, ReadBytesExt};
use serde::Serialize;
use std::io::{self, Cursor, Read};
use std::ops::Range;

use super::{FOOTER_OFFSET, FatEntry, FilesystemBlock, INODE_SIZE, INODE_SLOTS, INODE_TABLE_START};
use crate::error::{NandError, Result};
use crate::geometry::{BLOCK_SIZE, NUM_BLOCKS, block_range};

/// Where the inode table starts relative to its usual position. Some dumps
/// carry one stray 16-byte spare record in front of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum InodeTableOffset {
    #[default]
    Standard,
    BadDump,
}

impl InodeTableOffset {
    pub fn bytes(&self) -> usize {
        match self {
            InodeTableOffset::Standard => 0,
            InodeTableOffset::BadDump => 0x10,
        }
    }

    /// Number of whole inode slots that fit before the footer.
    pub fn slots(&self) -> usize {
        ((FOOTER_OFFSET - INODE_TABLE_START - self.bytes()) / INODE_SIZE).min(INODE_SLOTS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inode {
    /// Slot index in the inode table.
    pub index: usize,
    pub name: String,
    #[serde(skip)]
    pub raw_name: [u8; 8],
    #[serde(skip)]
    pub raw_ext: [u8; 3],
    pub valid: u8,
    pub start_block: u16,
    pub size: u32,
}

impl Inode {
    /// Decodes one `INODE_SIZE`-byte table entry.
    pub fn parse(index: usize, raw: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(raw);
        let mut raw_name = [0u8; 8];
        let mut raw_ext = [0u8; 3];
        cursor.read_exact(&mut raw_name)?;
        cursor.read_exact(&mut raw_ext)?;
        let valid = cursor.read_u8()?;
        let start_block = cursor.read_u16::<BigEndian>()?;
        let _padding = cursor.read_u16::<BigEndian>()?;
        let size = cursor.read_u32::<BigEndian>()?;

        Ok(Self {
            index,
            name: display_name(&raw_name, &raw_ext),
            raw_name,
            raw_ext,
            valid,
            start_block,
            size,
        })
    }

    /// Unused slots have a zero valid byte or an empty/erased name.
    pub fn is_valid(&self) -> bool {
        self.valid != 0 && self.raw_name[0] != 0 && self.raw_name[0] != 0xFF
    }

    pub fn block_count(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }
}

fn trimmed(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn display_name(name: &[u8], ext: &[u8]) -> String {
    let name = trimmed(name);
    let ext = trimmed(ext);
    if ext.is_empty() {
        name
    } else {
        format!("{name}.{ext}")
    }
}

pub(crate) fn parse_inode_table(block: &[u8], offset: InodeTableOffset) -> io::Result<Vec<Inode>> {
    let start = INODE_TABLE_START + offset.bytes();
    block[start..FOOTER_OFFSET]
        .chunks_exact(INODE_SIZE)
        .take(offset.slots())
        .enumerate()
        .map(|(index, raw)| Inode::parse(index, raw))
        .collect()
}

/// Follows the inode's FAT chain and returns the byte ranges of the image
/// holding its data, adjacent blocks merged. The last range is cut to the
/// declared file size.
pub fn inode_extents(
    fs: &FilesystemBlock<'_>,
    image_len: usize,
    inode: &Inode,
) -> Result<Vec<Range<usize>>> {
    let mut extents: Vec<Range<usize>> = Vec::with_capacity(inode.block_count());
    let mut remaining = inode.size as usize;
    let mut entry = FatEntry::from(inode.start_block);
    let mut from_block = inode.start_block;
    let mut visited = 0usize;

    while remaining > 0 {
        let block = match entry {
            FatEntry::Chain(block) if visited < NUM_BLOCKS => block,
            other => {
                return Err(NandError::BrokenChain {
                    index: inode.index,
                    block: from_block,
                    entry: other.raw(),
                });
            }
        };
        visited += 1;

        let range = block_range(block as usize);
        if range.end > image_len {
            return Err(NandError::TruncatedInode {
                index: inode.index,
                block,
            });
        }

        let take = remaining.min(BLOCK_SIZE);
        let piece = range.start..range.start + take;
        match extents.last_mut() {
            Some(last) if last.end == piece.start => last.end = piece.end,
            _ => extents.push(piece),
        }
        remaining -= take;

        if remaining > 0 {
            entry = fs.fat_entry(block).ok_or(NandError::TruncatedInode {
                index: inode.index,
                block,
            })?;
            from_block = block;
        }
    }

    Ok(extents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_inode(name: &[u8], ext: &[u8], valid: u8, start: u16, size: u32) -> Vec<u8> {
        let mut raw = vec![0u8; INODE_SIZE];
        raw[..name.len()].copy_from_slice(name);
        raw[8..8 + ext.len()].copy_from_slice(ext);
        raw[11] = valid;
        raw[12..14].copy_from_slice(&start.to_be_bytes());
        raw[16..20].copy_from_slice(&size.to_be_bytes());
        raw
    }

    #[test]
    fn test_parse_inode_fields() {
        let inode = Inode::parse(3, &raw_inode(b"00bbc0de", b"app", 1, 0x0123, 0x8000)).unwrap();
        assert_eq!(inode.index, 3);
        assert_eq!(inode.name, "00bbc0de.app");
        assert_eq!(inode.start_block, 0x0123);
        assert_eq!(inode.size, 0x8000);
        assert_eq!(inode.block_count(), 2);
        assert!(inode.is_valid());
    }

    #[test]
    fn test_name_without_extension() {
        let inode = Inode::parse(0, &raw_inode(b"ticket", b"", 1, 5, 10)).unwrap();
        assert_eq!(inode.name, "ticket");
    }

    #[test]
    fn test_invalid_markers() {
        let parse = |raw: &[u8]| Inode::parse(0, raw).unwrap();
        assert!(!parse(&raw_inode(b"gone", b"sys", 0, 5, 10)).is_valid());
        assert!(!parse(&raw_inode(b"", b"", 1, 5, 10)).is_valid());
        assert!(!parse(&[0xFF; INODE_SIZE]).is_valid());
    }

    #[test]
    fn test_short_entry_is_rejected() {
        let err = Inode::parse(0, b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let raw = raw_inode(b"ticket", b"sys", 1, 5, 10);
        assert!(Inode::parse(0, &raw[..INODE_SIZE - 1]).is_err());
    }

    #[test]
    fn test_bad_dump_slot_count() {
        assert_eq!(InodeTableOffset::Standard.slots(), INODE_SLOTS);
        assert_eq!(InodeTableOffset::BadDump.slots(), INODE_SLOTS - 1);
    }

    #[test]
    fn test_bad_dump_shifts_table() {
        let mut block = vec![0u8; BLOCK_SIZE];
        let start = INODE_TABLE_START + 0x10;
        block[start..start + INODE_SIZE].copy_from_slice(&raw_inode(b"cert", b"sys", 1, 7, 9));

        let standard = parse_inode_table(&block, InodeTableOffset::Standard).unwrap();
        assert!(!standard[0].is_valid());

        let shifted = parse_inode_table(&block, InodeTableOffset::BadDump).unwrap();
        assert_eq!(shifted.len(), INODE_SLOTS - 1);
        assert_eq!(shifted[0].name, "cert.sys");
    }
}
