use std::io;
use thiserror::Error;

/// Errors produced while decoding a NAND image or its spare data.
#[derive(Error, Debug)]
pub enum NandError {
    #[error(
        "Unrecognized spare format: 0x{0:X} bytes (expected 0x10000 block-spare, 0x100000 overdump or 0x200000 page-spare)"
    )]
    UnrecognizedSpareFormat(usize),

    #[error("Full page-spare retention is only possible with page/block-spare input, not overdumps")]
    FullSpareFromOverdump,

    #[error("No valid filesystem block found ({candidates} candidates inspected)")]
    NoValidFilesystemBlock { candidates: usize },

    #[error("Inode {index} references block 0x{block:04X} outside the image")]
    TruncatedInode { index: usize, block: u16 },

    #[error("Inode {index} chain broken at block 0x{block:04X} (FAT entry 0x{entry:04X})")]
    BrokenChain { index: usize, block: u16, entry: u16 },

    #[error("Unrecognized SKSA layout: authority address 0x{0:X} (expected 0x53C)")]
    UnrecognizedSksaLayout(u32),

    #[error("SKSA needs 0x{needed:X} bytes but only 0x{actual:X} are available")]
    TruncatedSksa { needed: usize, actual: usize },

    #[error("Image too short: needed 0x{needed:X} bytes, got 0x{actual:X}")]
    ImageTooShort { needed: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, NandError>;
