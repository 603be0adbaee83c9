use memmap2::Mmap;
use std::fs::{self, File};
use std::ops::Deref;
use std::path::Path;

use crate::error::{NandError, Result};
use crate::geometry::MIN_IMAGE_SIZE;
use crate::spare::SpareTable;

/// A NAND dump mapped read-only into memory.
pub struct MappedImage {
    mmap: Mmap,
}

impl MappedImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len() as usize;

        if size == 0 {
            return Err(NandError::ImageTooShort {
                needed: MIN_IMAGE_SIZE,
                actual: 0,
            });
        }

        // The dump is only ever read; nothing else is expected to write it
        // while it is open.
        let mmap = unsafe { Mmap::map(&file) }?;

        #[cfg(unix)]
        {
            use memmap2::Advice;
            let _ = mmap.advise(Advice::WillNeed);
        }

        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl Deref for MappedImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.mmap
    }
}

impl AsRef<[u8]> for MappedImage {
    fn as_ref(&self) -> &[u8] {
        &self.mmap
    }
}

pub fn map_image(path: impl AsRef<Path>) -> Result<MappedImage> {
    MappedImage::open(path)
}

/// Loads and decodes a spare capture. See [`SpareTable::parse`].
pub fn read_spare(path: impl AsRef<Path>, retain_full: bool) -> Result<SpareTable> {
    let raw = fs::read(path.as_ref())?;
    SpareTable::parse(&raw, retain_full)
}
