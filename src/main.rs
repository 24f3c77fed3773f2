//! Build minimal-perfect-hash maps from an ARPA language model.
//!
//! Usage:
//!   arpa2mph --config lm.json
//!   arpa2mph --arpa model.arpa.gz --prefix model-bin
//!
//! The prefix directory is deleted and recreated.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use arpa2mph::{build_from_config, LmConfig};
use clap::{ArgAction, Parser};
use env_logger::Env;

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert an ARPA language model into per-order MPH maps")]
struct Cli {
    /// JSON config with an `mph-language-model` table
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["arpa", "prefix"])]
    config: Option<PathBuf>,

    /// ARPA file to read (plain or .gz)
    #[arg(long, value_name = "PATH", requires = "prefix")]
    arpa: Option<PathBuf>,

    /// Output directory (destroyed and recreated)
    #[arg(long, value_name = "DIR", requires = "arpa")]
    prefix: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, action = ArgAction::Count)]
    quiet: u8,
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-2 => "off",
        -1 => "warn",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(level)).try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = match (cli.config, cli.arpa, cli.prefix) {
        (Some(path), _, _) => {
            LmConfig::load(&path).with_context(|| format!("load {}", path.display()))?
        }
        (None, Some(arpa), Some(prefix)) => LmConfig::new(arpa, prefix),
        _ => bail!("pass either --config or both --arpa and --prefix"),
    };

    let table = &config.mph_language_model;
    let report = build_from_config(&config).with_context(|| {
        format!(
            "build {} into {}",
            table.arpa_file.display(),
            table.binary_file_prefix.display()
        )
    })?;

    println!("=== ARPA -> MPH maps ===");
    println!("Input:  {}", table.arpa_file.display());
    println!("Prefix: {}", table.binary_file_prefix.display());
    for (order, count) in report.counts.iter().enumerate() {
        println!("  {}-grams: {}", order + 1, count);
    }
    println!("Highest order built: {}", report.highest_order + 1);
    println!("Elapsed: {:.2?}", report.elapsed);
    Ok(())
}
