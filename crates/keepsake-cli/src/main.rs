//! Keepsake CLI - inspect and read preserved disk images
//!
//! Opens raw and VHD containers (including differencing chains) and exposes
//! their logical disk for inspection, extraction and digests.

mod digest;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use digest::{digest_reader, DigestAlgorithm};
use keepsake_core::{format_size, Vault, SECTOR_SIZE};
use keepsake_vaults::{
    open_vault, open_vault_as, supported_formats, VaultConfig, VaultType, VhdImage,
    DEFAULT_MAX_CHAIN_DEPTH,
};
use std::fmt::Write as _;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(about = "Inspect and read preserved disk images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Read container files without memory mapping
    #[arg(long, global = true)]
    no_mmap: bool,

    /// Maximum number of parents behind a differencing image
    #[arg(
        long,
        global = true,
        env = "KEEPSAKE_MAX_CHAIN_DEPTH",
        default_value_t = DEFAULT_MAX_CHAIN_DEPTH
    )]
    max_chain_depth: usize,

    /// Open images with this handler instead of detecting the format
    #[arg(long, global = true, value_parser = parse_format)]
    format: Option<VaultType>,

    /// Log level
    #[arg(long, global = true, env = "RUST_LOG", default_value = "warn")]
    log_level: String,
}

fn parse_format(name: &str) -> std::result::Result<VaultType, String> {
    VaultType::from_name(name).ok_or_else(|| format!("unknown format '{}' (try: raw, vhd)", name))
}

#[derive(Subcommand)]
enum Command {
    /// Display vault information
    Info {
        image: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List every image of a differencing chain
    Chain { image: PathBuf },

    /// Show which blocks of a sparse VHD are allocated
    Map { image: PathBuf },

    /// Read sectors of the logical disk
    Read {
        image: PathBuf,

        /// First sector
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Number of sectors
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Write raw bytes to this file instead of a hex dump
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Digest the logical disk content
    Digest {
        image: PathBuf,

        /// Algorithms to compute
        #[arg(long, short, value_enum, default_values_t = [DigestAlgorithm::Sha256])]
        algorithm: Vec<DigestAlgorithm>,
    },

    /// List supported container formats
    Formats,
}

impl Cli {
    fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            use_mmap: !self.no_mmap,
            max_chain_depth: self.max_chain_depth,
        }
    }

    /// Open `path` with the forced handler, or detect its format
    fn open(&self, path: &Path) -> Result<Box<dyn Vault>> {
        let config = self.vault_config();
        let vault = match self.format {
            Some(vault_type) => open_vault_as(path, vault_type, config),
            None => open_vault(path, config),
        };
        vault.with_context(|| format!("Failed to open {}", path.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.vault_config();
    match &cli.command {
        Command::Info { image, json } => cmd_info(&cli, image, *json),
        Command::Chain { image } => cmd_chain(image, &config),
        Command::Map { image } => cmd_map(image, &config),
        Command::Read {
            image,
            start,
            count,
            output,
        } => cmd_read(&cli, image, *start, *count, output.as_deref()),
        Command::Digest { image, algorithm } => cmd_digest(&cli, image, algorithm),
        Command::Formats => {
            cmd_formats();
            Ok(())
        }
    }
}

fn cmd_info(cli: &Cli, path: &Path, json: bool) -> Result<()> {
    let vault = cli.open(path)?;
    let summary = vault.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("=== Vault Information ===");
    println!("Path:    {}", path.display());
    println!("Type:    {}", summary.format);
    println!("Size:    {} bytes ({})", summary.length, format_size(summary.length));
    println!("Sectors: {}", summary.length / summary.sector_size as u64);
    if let Some(created) = summary.created {
        println!("Created: {}", created.to_rfc3339());
    }
    if let Some(id) = &summary.unique_id {
        println!("UUID:    {}", id);
    }
    if let Some(creator) = &summary.creator {
        println!("Creator: {}", creator);
    }
    if let (Some(block_size), Some((allocated, total))) =
        (summary.block_size, summary.allocated_blocks)
    {
        println!(
            "Blocks:  {} of {} allocated ({} each)",
            allocated,
            total,
            format_size(block_size as u64)
        );
    }
    if let Some(parent) = &summary.parent {
        println!("Parent:  {}", parent);
        println!("Chain:   {} images", summary.chain_depth());
    }

    Ok(())
}

fn open_vhd(path: &Path, config: &VaultConfig) -> Result<VhdImage> {
    VhdImage::open(path, config).with_context(|| format!("Failed to open VHD {}", path.display()))
}

fn cmd_chain(path: &Path, config: &VaultConfig) -> Result<()> {
    let image = open_vhd(path, config)?;

    for (depth, link) in image.chain().enumerate() {
        let footer = link.footer();
        let location = link
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<stream>".to_string());
        println!(
            "{:>2}  {:<13} {:>10}  {}  {}",
            depth,
            footer.disk_type.name(),
            format_size(footer.current_size),
            footer.unique_id(),
            location
        );
    }

    Ok(())
}

fn cmd_map(path: &Path, config: &VaultConfig) -> Result<()> {
    let image = open_vhd(path, config)?;
    let Some(bat) = image.bat() else {
        bail!("{} is a fixed image; every sector is stored in place", path.display());
    };
    let spb = image.sectors_per_block();

    println!("Block size: {}", format_size(spb as u64 * SECTOR_SIZE as u64));
    println!("Blocks:     {} of {} allocated", bat.allocated_count(), bat.len());
    println!();

    for index in 0..bat.len() as u64 {
        let Some(sector) = bat.block_sector(index)? else {
            continue;
        };
        let bitmap = image.block_bitmap(index)?;
        let dirty = bitmap.map(|b| b.dirty_count(spb)).unwrap_or(0);
        println!(
            "block {:>6}  sector {:>10}  {:>6}/{} sectors present",
            index, sector, dirty, spb
        );
    }

    Ok(())
}

fn cmd_read(cli: &Cli, path: &Path, start: u64, count: u32, output: Option<&Path>) -> Result<()> {
    let mut vault = cli.open(path)?;
    let data = read_range(vault.as_mut(), start, count)?;

    match output {
        Some(out) => {
            std::fs::write(out, &data)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            tracing::info!(bytes = data.len(), output = %out.display(), "Wrote sectors");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(hex_dump(&data, start * SECTOR_SIZE as u64).as_bytes())?;
        }
    }

    Ok(())
}

/// Read whole sectors through a vault's content stream
fn read_range(vault: &mut dyn Vault, start: u64, count: u32) -> Result<Vec<u8>> {
    let sector_size = SECTOR_SIZE as u64;
    let sectors = vault.length() / sector_size;
    match start.checked_add(count as u64) {
        Some(end) if end <= sectors => {}
        _ => bail!(
            "Sectors {}..{} are outside the disk ({} sectors)",
            start,
            start.saturating_add(count as u64),
            sectors
        ),
    }

    let content = vault.content();
    content.seek(SeekFrom::Start(start * sector_size))?;
    let mut data = vec![0u8; count as usize * SECTOR_SIZE as usize];
    content.read_exact(&mut data)?;
    Ok(data)
}

/// Classic 16-byte-per-line hex dump
fn hex_dump(data: &[u8], base: u64) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", base + i as u64 * 16);
        for col in 0..16 {
            match line.get(col) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
            if col == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

fn cmd_digest(cli: &Cli, path: &Path, algorithms: &[DigestAlgorithm]) -> Result<()> {
    let mut vault = cli.open(path)?;
    let report = digest_reader(vault.content(), algorithms)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    for digest in &report.digests {
        println!("{:<7} {}  {}", digest.algorithm.name(), digest.hex, path.display());
    }
    tracing::info!(bytes = report.bytes, "Digest complete");

    Ok(())
}

fn cmd_formats() {
    println!("Supported formats:");
    for (name, extensions) in supported_formats() {
        println!("  {:<18} .{}", name, extensions.join(", ."));
    }
}
