pub mod error;
pub mod extraction;
pub mod fs;
pub mod geometry;
pub mod io;
pub mod nand;
pub mod report;
pub mod sksa;
pub mod spare;

pub use error::{NandError, Result};
pub use extraction::{ExtractionReport, InodeFilter, extract_inodes};
pub use fs::{
    CandidateStatus, FatEntry, FilesystemBlock, FsCandidate, FsSelection, Inode, InodeTableOffset,
    select_filesystem_block,
};
pub use io::{MappedImage, map_image, read_spare};
pub use nand::{Nand, NandConfig};
pub use report::{NandReport, NandSummary};
pub use sksa::{SksaRegion, SysApp, extract_sksa, parse_sksa};
pub use spare::{
    PageSpare, SpareFormat, SpareLayout, SpareTable, correct_spare_with_image, expand_spare,
    generate_spare_from_image, normalize_spare,
};
