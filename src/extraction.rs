use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::error::Result;
use crate::fs::Inode;
use crate::nand::Nand;

pub const MANIFEST_NAME: &str = "manifest.json";

/// Which inodes an extraction run writes out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeFilter {
    /// Every valid inode.
    All,
    /// The listed table slots; invalid or unknown slots are skipped.
    Indices(Vec<usize>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFile {
    pub index: usize,
    pub name: String,
    /// Name written under the output directory.
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedInode {
    pub index: usize,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub output_dir: PathBuf,
    pub extracted: Vec<ExtractedFile>,
    pub failed: Vec<FailedInode>,
    pub skipped: Vec<usize>,
}

impl ExtractionReport {
    pub fn bytes_written(&self) -> u64 {
        self.extracted.iter().map(|f| f.size).sum()
    }
}

fn select_inodes<'a, D: AsRef<[u8]>>(
    nand: &'a Nand<D>,
    filter: &InodeFilter,
) -> (Vec<&'a Inode>, Vec<usize>) {
    match filter {
        InodeFilter::All => (nand.valid_inodes().collect(), Vec::new()),
        InodeFilter::Indices(indices) => {
            let mut selected = Vec::with_capacity(indices.len());
            let mut skipped = Vec::new();
            for &index in indices {
                match nand.inode_by_index(index) {
                    Some(inode) if inode.is_valid() => selected.push(inode),
                    Some(_) => {
                        warn!(index, "inode slot is not valid, skipping");
                        skipped.push(index);
                    }
                    None => {
                        warn!(index, "no such inode slot, skipping");
                        skipped.push(index);
                    }
                }
            }
            (selected, skipped)
        }
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.chars().any(char::is_control)
}

/// Output file names for `inodes`. Names shared by several inodes get the
/// inode index appended, unusable names are replaced by `inode_<index>`.
pub fn output_names(inodes: &[&Inode]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for inode in inodes {
        *counts.entry(inode.name.as_str()).or_default() += 1;
    }

    inodes
        .iter()
        .map(|inode| {
            if !is_safe_name(&inode.name) {
                format!("inode_{:03}", inode.index)
            } else if counts[inode.name.as_str()] > 1 {
                format!("{}_{}", inode.name, inode.index)
            } else {
                inode.name.clone()
            }
        })
        .collect()
}

fn write_inode<D: AsRef<[u8]>>(
    nand: &Nand<D>,
    inode: &Inode,
    file_name: &str,
    output_dir: &Path,
) -> Result<ExtractedFile> {
    let data = nand.inode_data(inode)?;

    let mut out = BufWriter::new(File::create(output_dir.join(file_name))?);
    out.write_all(&data)?;
    out.flush()?;

    Ok(ExtractedFile {
        index: inode.index,
        name: inode.name.clone(),
        file_name: file_name.to_string(),
        size: data.len() as u64,
        sha256: hex::encode(Sha256::digest(&data)),
    })
}

/// Writes the selected inodes to `output_dir` in parallel, followed by a
/// `manifest.json` describing the run. A failing inode is recorded in the
/// report and does not stop the others.
pub fn extract_inodes<D: AsRef<[u8]> + Sync>(
    nand: &Nand<D>,
    filter: &InodeFilter,
    output_dir: &Path,
    progress: Option<&(dyn Fn(usize, usize) + Sync)>,
) -> Result<ExtractionReport> {
    fs::create_dir_all(output_dir)?;

    let (inodes, skipped) = select_inodes(nand, filter);
    let names = output_names(&inodes);
    let total = inodes.len();
    let done = AtomicUsize::new(0);

    let results: Vec<_> = inodes
        .par_iter()
        .zip(names.par_iter())
        .map(|(inode, file_name)| {
            let result = write_inode(nand, inode, file_name, output_dir);
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(cb) = progress {
                cb(current, total);
            }
            (*inode, result)
        })
        .collect();

    let mut extracted = Vec::with_capacity(total);
    let mut failed = Vec::new();
    for (inode, result) in results {
        match result {
            Ok(file) => extracted.push(file),
            Err(e) => {
                warn!(index = inode.index, name = %inode.name, error = %e, "failed to extract inode");
                failed.push(FailedInode {
                    index: inode.index,
                    name: inode.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let report = ExtractionReport {
        output_dir: output_dir.to_path_buf(),
        extracted,
        failed,
        skipped,
    };

    let manifest = BufWriter::new(File::create(output_dir.join(MANIFEST_NAME))?);
    serde_json::to_writer_pretty(manifest, &report).map_err(std::io::Error::from)?;

    info!(
        extracted = report.extracted.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "extraction finished"
    );

    Ok(report)
}
