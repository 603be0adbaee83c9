#![allow(dead_code)]

use bbnand::fs::{FOOTER_OFFSET, FS_CHECKSUM, INODE_SIZE, INODE_TABLE_START, block_checksum};
use bbnand::geometry::{BLOCK_SIZE, FS_FIRST_BLOCK, NAND_SIZE, SIG_AREA_SIZE, SK_SIZE, block_range};

pub const AUTHORITY_ADDR_OFFSET: usize = 0x90C;

/// Fully erased 64 MiB image.
pub fn erased_image() -> Vec<u8> {
    vec![0xFF; NAND_SIZE]
}

/// Builds one filesystem block: FAT, inode table and footer.
pub struct FsBlockBuilder {
    block: Vec<u8>,
    inode_shift: usize,
    fix_checksum: bool,
}

impl FsBlockBuilder {
    pub fn new(seqno: u32) -> Self {
        let mut block = vec![0u8; BLOCK_SIZE];
        block[FOOTER_OFFSET..FOOTER_OFFSET + 4].copy_from_slice(b"BBFS");
        block[FOOTER_OFFSET + 4..FOOTER_OFFSET + 8].copy_from_slice(&seqno.to_be_bytes());
        Self {
            block,
            inode_shift: 0,
            fix_checksum: true,
        }
    }

    /// Writes inodes 0x10 bytes late, as bad dumps do.
    pub fn bad_dump(mut self) -> Self {
        self.inode_shift = 0x10;
        self
    }

    /// Writes a `BBFL` link-block footer instead of `BBFS`.
    pub fn link_block(mut self) -> Self {
        self.block[FOOTER_OFFSET..FOOTER_OFFSET + 4].copy_from_slice(b"BBFL");
        self
    }

    /// Leaves the checksum adjust word alone so the block fails verification.
    pub fn corrupt_checksum(mut self) -> Self {
        self.fix_checksum = false;
        self
    }

    pub fn fat(mut self, block: u16, value: u16) -> Self {
        let at = block as usize * 2;
        self.block[at..at + 2].copy_from_slice(&value.to_be_bytes());
        self
    }

    /// Marks `blocks` as one chain ending with 0xFFFF.
    pub fn chain(mut self, blocks: &[u16]) -> Self {
        for pair in blocks.windows(2) {
            self = self.fat(pair[0], pair[1]);
        }
        if let Some(&last) = blocks.last() {
            self = self.fat(last, 0xFFFF);
        }
        self
    }

    pub fn inode(mut self, slot: usize, name: &str, ext: &str, valid: u8, start: u16, size: u32) -> Self {
        let at = INODE_TABLE_START + self.inode_shift + slot * INODE_SIZE;
        let raw = &mut self.block[at..at + INODE_SIZE];
        raw.fill(0);
        raw[..name.len()].copy_from_slice(name.as_bytes());
        raw[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
        raw[11] = valid;
        raw[12..14].copy_from_slice(&start.to_be_bytes());
        raw[16..20].copy_from_slice(&size.to_be_bytes());
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let adjust = BLOCK_SIZE - 2;
        self.block[adjust..].copy_from_slice(&[0, 0]);
        let sum = block_checksum(&self.block);
        let mut word = FS_CHECKSUM.wrapping_sub(sum);
        if !self.fix_checksum {
            word = word.wrapping_add(1);
        }
        self.block[adjust..].copy_from_slice(&word.to_be_bytes());
        self.block
    }
}

pub fn put_fs_block(image: &mut [u8], slot: usize, block: &[u8]) {
    image[block_range(FS_FIRST_BLOCK + slot)].copy_from_slice(block);
}

/// Spreads `data` over `blocks`, one block each.
pub fn put_file(image: &mut [u8], blocks: &[u16], data: &[u8]) {
    for (chunk, &block) in data.chunks(BLOCK_SIZE).zip(blocks) {
        let start = block_range(block as usize).start;
        image[start..start + chunk.len()].copy_from_slice(chunk);
    }
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i.wrapping_mul(131).wrapping_add(seed as usize)) % 251) as u8)
        .collect()
}

fn put_str(raw: &mut [u8], at: usize, s: &str) {
    raw[at..at + s.len()].copy_from_slice(s.as_bytes());
}

fn put_u32(raw: &mut [u8], at: usize, value: u32) {
    raw[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// A signature-area block announcing a payload of `content_size` bytes.
pub fn sig_area(content_size: u32, content_id: u32, authority_addr: u32) -> Vec<u8> {
    let mut raw = vec![0u8; SIG_AREA_SIZE];
    put_u32(&mut raw, 0x0C, content_size);
    put_str(&mut raw, 0x58, "Root-CA00000001-CP00000002");
    put_u32(&mut raw, 0x98, content_id);

    // subject certificate
    put_u32(&mut raw, 0x1AC, 1);
    put_str(&mut raw, 0x1AC + 12, "Root-CA00000001");
    put_str(&mut raw, 0x1AC + 76, "CP00000002");
    // authority certificate
    put_u32(&mut raw, 0x53C, 1);
    put_str(&mut raw, 0x53C + 12, "Root");
    put_str(&mut raw, 0x53C + 76, "CA00000001");

    raw[0x8CC..0x904].fill(0x5A);
    put_u32(&mut raw, 0x904, 0x1234);
    put_u32(&mut raw, 0x908, 0x5678);
    put_u32(&mut raw, AUTHORITY_ADDR_OFFSET, authority_addr);
    raw[0x910..0x920].fill(0xA5);

    // CRL head
    put_u32(&mut raw, 0x920 + 512 + 12, 3);
    put_str(&mut raw, 0x920 + 512 + 20, "Root-CA00000001");

    // trailing padding must survive a round trip
    raw[0xB78..].fill(0xEE);
    raw
}

/// Writes a kernel plus SA1 (and optionally SA2) at the start of `image`.
/// Returns the SKSA length.
pub fn put_sksa(image: &mut [u8], sa1_size: u32, sa2_size: Option<u32>) -> usize {
    image[..SK_SIZE].copy_from_slice(&pattern(SK_SIZE, 1));

    let mut at = SK_SIZE;
    image[at..at + SIG_AREA_SIZE].copy_from_slice(&sig_area(sa1_size, 0x0010_0001, 0x53C));
    at += SIG_AREA_SIZE;
    image[at..at + sa1_size as usize].copy_from_slice(&pattern(sa1_size as usize, 2));
    at += sa1_size as usize;

    if let Some(sa2_size) = sa2_size {
        image[at..at + SIG_AREA_SIZE].copy_from_slice(&sig_area(sa2_size, 0x0010_0002, 0x53C));
        at += SIG_AREA_SIZE;
        image[at..at + sa2_size as usize].copy_from_slice(&pattern(sa2_size as usize, 3));
        at += sa2_size as usize;
    }
    at
}

/// A full image with one intact filesystem copy in slot 15 holding:
/// slot 0 `cert.sys` (1 block at 0x100), slot 1 `00bbc0de.app` (3 blocks
/// 0x200, 0x201, 0x300), slot 2 an invalid entry, slot 3 `ticket.sys`
/// (partial block at 0x400).
pub fn sample_image() -> Vec<u8> {
    let mut image = erased_image();
    put_sksa(&mut image, 0x8000, Some(0x4000));

    put_file(&mut image, &[0x100], &pattern(BLOCK_SIZE, 10));
    put_file(&mut image, &[0x200, 0x201, 0x300], &pattern(3 * BLOCK_SIZE - 100, 20));
    put_file(&mut image, &[0x400], &pattern(0x1234, 30));

    let fs = FsBlockBuilder::new(42)
        .chain(&[0x100])
        .chain(&[0x200, 0x201, 0x300])
        .chain(&[0x400])
        .fat(0x500, 0xFFFE)
        .fat(0x0000, 0xFFFD)
        .inode(0, "cert", "sys", 1, 0x100, BLOCK_SIZE as u32)
        .inode(1, "00bbc0de", "app", 1, 0x200, (3 * BLOCK_SIZE - 100) as u32)
        .inode(2, "deleted", "rec", 0, 0x600, 10)
        .inode(3, "ticket", "sys", 1, 0x400, 0x1234)
        .build();
    put_fs_block(&mut image, 15, &fs);
    image
}
