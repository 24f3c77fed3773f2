//! Order transition controller.
//!
//! Receives declared counts and gram records in file order and keeps exactly
//! one map builder open. When the order advances, the finished builder is
//! consumed into its on-disk map. The unigram map is then reopened read-only
//! and owned by the controller as the vocabulary that turns tokens into ids
//! for every higher order.

use std::mem;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{LmError, Result};
use crate::ngram_map::{
    LastMapBuilder, MiddleMapBuilder, ProbBackoff, UnigramMap, UnigramMapBuilder,
};

enum Stage {
    AwaitingCounts,
    Unigrams(UnigramMapBuilder),
    Middle {
        vocabulary: UnigramMap,
        builder: MiddleMapBuilder,
    },
    Last {
        vocabulary: UnigramMap,
        builder: LastMapBuilder,
    },
    Done {
        vocabulary: Option<UnigramMap>,
    },
}

/// Drives the per-order builders for one output prefix.
pub struct NGramHandler {
    prefix: PathBuf,
    counts: Vec<u64>,
    order: usize,
    observed: u64,
    stage: Stage,
}

impl NGramHandler {
    /// `prefix` must already exist; order `k` is written to `prefix/k`.
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        Self {
            prefix: prefix.as_ref().to_path_buf(),
            counts: Vec::new(),
            order: 0,
            observed: 0,
            stage: Stage::AwaitingCounts,
        }
    }

    /// Order currently being built (0-based).
    pub fn order(&self) -> usize {
        self.order
    }

    /// Counts declared so far.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Grams seen for the current order.
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// The unigram map, once order 0 has been finalized.
    pub fn vocabulary(&self) -> Option<&UnigramMap> {
        match &self.stage {
            Stage::Middle { vocabulary, .. } | Stage::Last { vocabulary, .. } => Some(vocabulary),
            Stage::Done { vocabulary } => vocabulary.as_ref(),
            Stage::AwaitingCounts | Stage::Unigrams(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.stage, Stage::Done { .. })
    }

    fn order_prefix(&self, order: usize) -> PathBuf {
        self.prefix.join(order.to_string())
    }

    /// Records the declared count of the next order. The first count opens
    /// the unigram builder.
    pub fn count(&mut self, ngram_count: u64) -> Result<()> {
        let accepting = match &self.stage {
            Stage::AwaitingCounts => true,
            Stage::Unigrams(builder) => builder.is_empty(),
            _ => false,
        };
        if !accepting {
            return Err(LmError::parse(0, "n-gram count declared after data"));
        }

        self.counts.push(ngram_count);
        info!("{}-gram count: {}", self.counts.len(), ngram_count);
        if ngram_count == 0 {
            warn!("{}-grams declared empty", self.counts.len());
        }
        if self.counts.len() == 1 {
            let builder = UnigramMapBuilder::new(self.order_prefix(0), ngram_count)?;
            self.stage = Stage::Unigrams(builder);
        }
        Ok(())
    }

    /// Adds one gram. Moving to a higher order first finalizes every order
    /// below it.
    pub fn handle(&mut self, order: usize, ngram: &str, prob: f32, backoff: f32) -> Result<()> {
        if self.counts.is_empty() {
            return Err(LmError::parse(0, "n-gram data before any `ngram k=n` count"));
        }
        if order < self.order {
            return Err(LmError::OrderRegression {
                current: self.order,
                got: order,
            });
        }
        if order >= self.counts.len() {
            return Err(LmError::parse(
                0,
                format!("{}-grams are not declared in the header", order + 1),
            ));
        }
        while self.order < order {
            self.finish_order()?;
            self.order += 1;
        }

        self.observed += 1;
        if self.observed > self.counts[order] {
            return Err(LmError::TooManyGrams { order });
        }

        let value = ProbBackoff { prob, backoff };
        match &mut self.stage {
            Stage::Unigrams(builder) => builder.insert(ngram, value),
            Stage::Middle {
                vocabulary,
                builder,
            } => {
                let ids = resolve(vocabulary, ngram, order)?;
                builder.insert(&ids, value)
            }
            Stage::Last {
                vocabulary,
                builder,
            } => {
                let ids = resolve(vocabulary, ngram, order)?;
                builder.insert(&ids, prob)
            }
            Stage::AwaitingCounts | Stage::Done { .. } => Err(LmError::BuilderMisuse(format!(
                "no builder open for {}-grams",
                order + 1
            ))),
        }
    }

    /// Writes the current order's map and opens the builder for the next
    /// declared order, if any.
    pub fn finish_order(&mut self) -> Result<()> {
        let expected = match self.counts.get(self.order) {
            Some(&n) => n,
            None => return Err(LmError::parse(0, "no n-gram counts declared")),
        };
        if self.observed != expected {
            return Err(LmError::TooFewGrams {
                order: self.order,
                expected,
                observed: self.observed,
            });
        }
        info!("Finalizing {}-grams ({})", self.order + 1, self.observed);
        self.observed = 0;

        let next = self.order + 1;
        let stage = mem::replace(&mut self.stage, Stage::Done { vocabulary: None });
        self.stage = match stage {
            Stage::Unigrams(builder) => {
                let path = builder.finalize()?;
                if next < self.counts.len() {
                    let vocabulary = UnigramMap::open(path)?;
                    info!("Loaded unigram map ({} words)", vocabulary.len());
                    self.open_next(vocabulary, next)?
                } else {
                    Stage::Done { vocabulary: None }
                }
            }
            Stage::Middle {
                vocabulary,
                builder,
            } => {
                builder.finalize()?;
                self.open_next(vocabulary, next)?
            }
            Stage::Last {
                vocabulary,
                builder,
            } => {
                builder.finalize()?;
                Stage::Done {
                    vocabulary: Some(vocabulary),
                }
            }
            Stage::AwaitingCounts | Stage::Done { .. } => {
                return Err(LmError::BuilderMisuse(format!(
                    "no {}-gram builder to finalize",
                    self.order + 1
                )))
            }
        };
        Ok(())
    }

    fn open_next(&self, vocabulary: UnigramMap, next: usize) -> Result<Stage> {
        let prefix = self.order_prefix(next);
        let expected = self.counts[next];
        Ok(if next + 1 == self.counts.len() {
            Stage::Last {
                vocabulary,
                builder: LastMapBuilder::new(prefix, expected)?,
            }
        } else {
            Stage::Middle {
                vocabulary,
                builder: MiddleMapBuilder::new(prefix, expected)?,
            }
        })
    }

    /// Closes the current order and any declared orders that never received
    /// data (which must then be declared empty). Returns the highest order
    /// built.
    pub fn finish(&mut self) -> Result<usize> {
        if self.counts.is_empty() {
            return Err(LmError::parse(0, "no n-gram counts declared"));
        }
        self.finish_order()?;
        while self.order + 1 < self.counts.len() {
            self.order += 1;
            self.finish_order()?;
        }
        Ok(self.order)
    }
}

fn resolve(vocabulary: &UnigramMap, ngram: &str, order: usize) -> Result<Vec<u64>> {
    let mut ids = Vec::with_capacity(order + 1);
    for token in ngram.split_whitespace() {
        let id = vocabulary
            .index(token)
            .ok_or_else(|| LmError::UnknownUnigram {
                token: token.to_string(),
            })?;
        ids.push(id);
    }
    if ids.len() != order + 1 {
        return Err(LmError::parse(
            0,
            format!(
                "{}-gram {ngram:?} has {} tokens",
                order + 1,
                ids.len()
            ),
        ));
    }
    Ok(ids)
}
