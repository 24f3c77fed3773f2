//! ARPA file -> directory of per-order maps.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::info;
use serde::{Deserialize, Serialize};

use crate::arpa::{open_arpa, ArpaEvent};
use crate::config::LmConfig;
use crate::error::{IoContext, LmError, Result};
use crate::handler::NGramHandler;

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

/// Written last; its presence marks a complete build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub version: u32,
    /// Number of orders, i.e. the N of the N-gram model.
    pub orders: usize,
    /// Declared count per order, which is also each map's key count.
    pub counts: Vec<u64>,
    pub source: PathBuf,
}

impl Manifest {
    pub fn load(prefix: impl AsRef<Path>) -> Result<Self> {
        let path = prefix.as_ref().join(MANIFEST_FILE);
        let data = fs::read(&path).at(&path)?;
        let manifest: Manifest = serde_json::from_slice(&data)
            .map_err(|e| LmError::format(&path, e.to_string()))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(LmError::format(
                &path,
                format!("unsupported manifest version {}", manifest.version),
            ));
        }
        if manifest.orders == 0 || manifest.counts.len() != manifest.orders {
            return Err(LmError::format(&path, "order count disagrees with counts"));
        }
        Ok(manifest)
    }

    fn save(&self, prefix: &Path) -> Result<()> {
        let path = prefix.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| LmError::format(&path, e.to_string()))?;
        fs::write(&path, json).at(&path)
    }
}

/// Outcome of a successful build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    /// Highest order built, 0-based.
    pub highest_order: usize,
    pub counts: Vec<u64>,
    pub elapsed: Duration,
}

/// Builds every order of `arpa_file` under `prefix`.
///
/// **Destructive**: anything already at `prefix` is removed first. A failed
/// build leaves a partial directory without a manifest; discard it before
/// retrying.
pub fn build(arpa_file: impl AsRef<Path>, prefix: impl AsRef<Path>) -> Result<BuildReport> {
    let arpa_file = arpa_file.as_ref();
    let prefix = prefix.as_ref();
    info!("Building language model from .arpa file: {}", arpa_file.display());

    let start = Instant::now();
    if prefix.exists() {
        fs::remove_dir_all(prefix).at(prefix)?;
    }
    fs::create_dir_all(prefix).at(prefix)?;

    let mut reader = open_arpa(arpa_file)?;
    let mut handler = NGramHandler::new(prefix);
    while let Some(event) = reader.next_event()? {
        let handled = match event {
            ArpaEvent::Count { count, .. } => handler.count(count),
            ArpaEvent::Gram(gram) => {
                handler.handle(gram.order, &gram.text, gram.probability, gram.backoff)
            }
        };
        handled.map_err(|e| with_line(e, reader.line_number()))?;
    }
    let highest_order = handler.finish()?;

    let manifest = Manifest {
        version: MANIFEST_VERSION,
        orders: handler.counts().len(),
        counts: handler.counts().to_vec(),
        source: arpa_file.to_path_buf(),
    };
    manifest.save(prefix)?;

    let elapsed = start.elapsed();
    info!("Done. ({}ms)", elapsed.as_millis());
    Ok(BuildReport {
        highest_order,
        counts: manifest.counts,
        elapsed,
    })
}

/// Builds from the `mph-language-model` table of a configuration.
pub fn build_from_config(config: &LmConfig) -> Result<BuildReport> {
    let table = &config.mph_language_model;
    build(&table.arpa_file, &table.binary_file_prefix)
}

/// Pins controller parse errors to the line that triggered them.
fn with_line(err: LmError, line_no: u64) -> LmError {
    match err {
        LmError::Parse { line: 0, message } => LmError::Parse {
            line: line_no,
            message,
        },
        other => other,
    }
}
