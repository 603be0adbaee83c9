mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use humansize::{BINARY, format_size};
use std::fs;
use std::path::Path;
use tracing::Level;

use bbnand::extraction::{self, InodeFilter};
use bbnand::geometry::PAGE_SIZE;
use bbnand::spare::ecc::{ECC_CHUNK, EccOutcome};
use bbnand::{MappedImage, Nand, NandConfig, SpareLayout, SpareTable, io, spare};
use cli::{Cli, Commands, NandArgs, ProgressReporter, SparefixArgs, with_suffix};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug)?;

    match cli.command {
        Commands::Nand(args) => run_nand(&args),
        Commands::Sparefix(args) => run_sparefix(&args),
    }
}

fn init_tracing(verbose: bool, debug: bool) -> Result<()> {
    let level = if debug {
        Level::TRACE
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize logger: {err}"))
}

fn run_nand(args: &NandArgs) -> Result<()> {
    println!("Opening NAND image from {}...", args.image.display());

    let image = io::map_image(&args.image)
        .with_context(|| format!("Failed to open NAND image: {}", args.image.display()))?;

    let mut config = NandConfig::new().with_skip_checksum(args.skip_checksums);
    if args.bad_dump {
        config = config.bad_dump();
    }

    let nand = Nand::open(image, config).context("Failed to read NAND image")?;
    println!(
        "Loaded {} image, filesystem block 0x{:03X} (seqno {})",
        format_size(nand.len() as u64, BINARY),
        nand.selected_candidate().block,
        nand.selected_candidate().seqno
    );
    if nand.recovered_from_corruption() {
        println!("[!] Selected filesystem block failed its checksum, contents may be corrupt");
    }

    let acted = args.extract
        || !args.extract_ids.is_empty()
        || args.extract_sksa
        || args.gen_spare.is_some()
        || args.write_info
        || args.json;

    if args.info || !acted {
        println!();
        print!("{}", nand.describe(false, args.show_all_fs));
    }

    if args.json {
        let summary = serde_json::to_string_pretty(&nand.summary())?;
        println!("{summary}");
    }

    if args.write_info {
        let path = with_suffix(&args.image, ".txt");
        fs::write(&path, nand.describe(true, args.show_all_fs))
            .with_context(|| format!("Failed to write info to {}", path.display()))?;
        println!("Wrote NAND info to {}", path.display());
    }

    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| with_suffix(&args.image, "_extracted"));

    if args.extract || !args.extract_ids.is_empty() {
        let filter = if args.extract {
            InodeFilter::All
        } else {
            InodeFilter::Indices(args.extract_ids.clone())
        };
        run_extraction(&nand, &filter, &output_dir)?;
    }

    if args.extract_sksa {
        let sksa = nand.extract_sksa().context("Failed to locate SKSA")?;
        fs::create_dir_all(&output_dir)?;
        let path = output_dir.join("sksa.bin");
        fs::write(&path, sksa)
            .with_context(|| format!("Failed to write SKSA to {}", path.display()))?;
        println!(
            "Extracted SKSA ({}) to {}",
            format_size(sksa.len() as u64, BINARY),
            path.display()
        );
    }

    if let Some(spare_path) = &args.gen_spare {
        let layout = if args.full_spare {
            SpareLayout::Page
        } else {
            SpareLayout::Block
        };
        let table = match &args.base_spare {
            Some(base) => {
                let base = io::read_spare(base, args.full_spare)
                    .with_context(|| format!("Failed to read spare from {}", base.display()))?;
                nand.regenerate_spare_data(layout, &base)
            }
            None => nand.generate_spare_data(layout),
        };
        fs::write(spare_path, table.to_bytes())
            .with_context(|| format!("Failed to write spare to {}", spare_path.display()))?;
        println!(
            "Generated {}-spare data ({} records) to {}",
            layout.name(),
            table.len(),
            spare_path.display()
        );
    }

    Ok(())
}

fn run_extraction(nand: &Nand<MappedImage>, filter: &InodeFilter, output_dir: &Path) -> Result<()> {
    let total = match filter {
        InodeFilter::All => nand.valid_inodes().count(),
        InodeFilter::Indices(ids) => ids.len(),
    };

    println!();
    println!("Extracting {} files to {}...", total, output_dir.display());

    let progress = ProgressReporter::for_extraction(total as u64)?;
    let callback = progress.extraction_callback();
    let report = extraction::extract_inodes(nand, filter, output_dir, Some(&*callback))
        .with_context(|| format!("Failed to extract files to {}", output_dir.display()))?;
    progress.finish("done");

    println!();
    println!(
        "Files extracted: {} ({})",
        report.extracted.len(),
        format_size(report.bytes_written(), BINARY)
    );
    if !report.failed.is_empty() {
        println!("Failed:          {}", report.failed.len());
        for failed in &report.failed {
            println!("  [{}] {}: {}", failed.index, failed.name, failed.error);
        }
    }
    if !report.skipped.is_empty() {
        println!("Skipped slots:   {:?}", report.skipped);
    }
    println!("Output folder:   {}", output_dir.display());

    Ok(())
}

fn run_sparefix(args: &SparefixArgs) -> Result<()> {
    println!("Reading spare from {}...", args.spare.display());

    let raw = fs::read(&args.spare)
        .with_context(|| format!("Failed to read spare from {}", args.spare.display()))?;
    let format = spare::SpareFormat::detect(raw.len())
        .context("Spare isn't an overdump, page-spare or block-spare dump")?;
    println!("Detected {} ({} bytes)", format.name(), raw.len());

    let mut table = SpareTable::parse(&raw, args.full_spare)
        .context("Invalid spare for the requested output layout")?;

    if let Some(nand_path) = &args.nand {
        let image = io::map_image(nand_path)
            .with_context(|| format!("Failed to open NAND image: {}", nand_path.display()))?;
        for mismatch in table.check_against_image(&image) {
            if let EccOutcome::CorrectedData { byte, bit } = mismatch.outcome {
                let offset = mismatch.page * PAGE_SIZE + mismatch.half * ECC_CHUNK + byte;
                println!(
                    "[!] NAND byte 0x{offset:X} bit {bit} disagrees with the captured ECC (likely a flipped bit in the image)"
                );
            }
        }
        let corrected = spare::correct_spare_with_image(&mut table, &image);
        println!("Corrected {corrected} spare records using {}", nand_path.display());
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| with_suffix(&args.spare, "_fixed"));
    fs::write(&output, table.to_bytes())
        .with_context(|| format!("Failed to write spare to {}", output.display()))?;
    println!("Saved fixed spare to {}!", output.display());

    Ok(())
}
