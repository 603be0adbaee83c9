use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bbnand")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and recover iQue Player NAND dumps", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a NAND image: list, extract files and the SKSA, generate spare data
    Nand(NandArgs),

    /// Convert overdump/page-spare captures to block-spare, optionally fixing
    /// the ECC against a NAND image
    Sparefix(SparefixArgs),
}

#[derive(Args)]
pub struct NandArgs {
    /// NAND image (usually 64 MiB)
    pub image: PathBuf,

    /// Print basic info about the image
    #[arg(short, long)]
    pub info: bool,

    /// Write detailed info to <image>.txt
    #[arg(long)]
    pub write_info: bool,

    /// Print the image summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Extract every valid file
    #[arg(short = 'x', long)]
    pub extract: bool,

    /// Extract the inodes with these slot indexes (decimal or 0x hex)
    #[arg(long, value_delimiter = ',', value_parser = parse_index)]
    pub extract_ids: Vec<usize>,

    /// Extract the secure kernel and system apps (SKSA)
    #[arg(short = 'k', long)]
    pub extract_sksa: bool,

    /// Show every filesystem block found, not just the selected one
    #[arg(long)]
    pub show_all_fs: bool,

    /// Generate spare/ECC data for this image into the given file
    #[arg(long, value_name = "SPARE")]
    pub gen_spare: Option<PathBuf>,

    /// Keep the status bytes of this spare capture when generating
    #[arg(long, value_name = "SPARE", requires = "gen_spare")]
    pub base_spare: Option<PathBuf>,

    /// Generate page-spare data (32 records per block) instead of block-spare
    #[arg(long)]
    pub full_spare: bool,

    /// Accept filesystem blocks whose checksum does not match
    #[arg(long)]
    pub skip_checksums: bool,

    /// Read the inode table with a 0x10 byte offset
    #[arg(long)]
    pub bad_dump: bool,

    /// Output directory (default: <image>_extracted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct SparefixArgs {
    /// Spare capture: block-spare, overdump or page-spare
    pub spare: PathBuf,

    /// NAND image to correct the spare ECC against
    pub nand: Option<PathBuf>,

    /// Output file (default: <spare>_fixed)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep page-spare detail instead of reducing to block-spare
    #[arg(long)]
    pub full_spare: bool,
}

fn parse_index(s: &str) -> std::result::Result<usize, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid inode index '{s}': {e}"))
}

/// `path` with `suffix` appended to its final component.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

pub struct ProgressReporter {
    bar: Arc<ProgressBar>,
}

impl ProgressReporter {
    pub fn for_extraction(total_files: u64) -> Result<Self> {
        let bar = ProgressBar::new(total_files);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files")?
                .progress_chars("#>-"),
        );
        bar.set_message("Extracting files...".to_string());
        Ok(Self { bar: Arc::new(bar) })
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn extraction_callback(&self) -> Box<dyn Fn(usize, usize) + Send + Sync> {
        let bar = Arc::clone(&self.bar);
        Box::new(move |current: usize, total: usize| {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        })
    }
}
