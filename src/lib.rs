//! ARPA n-gram language models as minimal-perfect-hash indexed maps on disk.
//!
//! [`build`] reads an ARPA file once, order by order, writing one
//! [`NGramMap`] per order under an output prefix (`prefix/0`, `prefix/1`, ...).
//! Unigram slots become word ids; higher orders are keyed by id sequences.
//! [`LanguageModel`] opens a finished prefix for backoff scoring.
//!
//! ```no_run
//! use arpa2mph::{build, LanguageModel};
//!
//! # fn main() -> arpa2mph::Result<()> {
//! let report = build("model.arpa", "model-bin")?;
//! println!("built {} orders", report.highest_order + 1);
//!
//! let lm = LanguageModel::open("model-bin")?;
//! let p = lm.log_prob(&["the", "cat"]);
//! # Ok(())
//! # }
//! ```

pub mod arpa;
pub mod config;
pub mod error;
pub mod handler;
pub mod language_model;
pub mod mph;
pub mod ngram_map;
pub mod pipeline;

pub use arpa::{open_arpa, ArpaEvent, ArpaReader, GramRecord};
pub use config::LmConfig;
pub use error::{LmError, Result};
pub use handler::NGramHandler;
pub use language_model::LanguageModel;
pub use ngram_map::{
    LastMap, MapValue, MiddleMap, NGramMap, NGramMapBuilder, ProbBackoff, UnigramMap,
};
pub use pipeline::{build, build_from_config, BuildReport, Manifest};
