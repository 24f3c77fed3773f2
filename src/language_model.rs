//! Backoff scoring over a built prefix.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;
use crate::ngram_map::{LastMap, MiddleMap, UnigramMap};
use crate::pipeline::Manifest;

pub const UNKNOWN: &str = "<unk>";
pub const SENTENCE_START: &str = "<s>";
pub const SENTENCE_END: &str = "</s>";

/// Read-only view over every order of a built model.
pub struct LanguageModel {
    prefix: PathBuf,
    manifest: Manifest,
    unigrams: UnigramMap,
    middles: Vec<MiddleMap>,
    last: Option<LastMap>,
}

impl LanguageModel {
    /// Opens all orders listed in the prefix's manifest. Prefixes from
    /// aborted builds have no manifest and are refused.
    pub fn open(prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = prefix.as_ref().to_path_buf();
        let manifest = Manifest::load(&prefix)?;
        let orders = manifest.orders;

        let unigrams = UnigramMap::open(prefix.join("0"))?;
        let middles = (1..orders.saturating_sub(1))
            .map(|k| MiddleMap::open(prefix.join(k.to_string())))
            .collect::<Result<Vec<_>>>()?;
        let last = if orders > 1 {
            Some(LastMap::open(prefix.join((orders - 1).to_string()))?)
        } else {
            None
        };
        info!("Opened {}-gram model at {}", orders, prefix.display());
        Ok(Self {
            prefix,
            manifest,
            unigrams,
            middles,
            last,
        })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// N of the N-gram model.
    pub fn order(&self) -> usize {
        self.manifest.orders
    }

    pub fn counts(&self) -> &[u64] {
        &self.manifest.counts
    }

    pub fn unigrams(&self) -> &UnigramMap {
        &self.unigrams
    }

    /// Id of a word, falling back to `<unk>` when the model has one.
    pub fn word_id(&self, word: &str) -> Option<u64> {
        self.unigrams
            .index(word)
            .or_else(|| self.unigrams.index(UNKNOWN))
    }

    /// `(prob, backoff)` of an id sequence; the highest order reports a
    /// backoff of 0.
    pub fn ngram(&self, ids: &[u64]) -> Option<(f32, f32)> {
        match ids.len() {
            0 => None,
            1 => self
                .unigrams
                .value_at(ids[0])
                .map(|v| (v.prob, v.backoff)),
            n if n == self.order() => self.last.as_ref()?.lookup(ids).map(|p| (p, 0.0)),
            n if n < self.order() => self.middles[n - 2].lookup(ids).map(|v| (v.prob, v.backoff)),
            _ => None,
        }
    }

    /// log10 P(last id | preceding ids), backing off to shorter histories.
    /// Only the last `order()` ids are considered.
    pub fn log_prob_ids(&self, ids: &[u64]) -> Option<f32> {
        let ids = &ids[ids.len().saturating_sub(self.order())..];
        let mut backoff = 0.0f32;
        for start in 0..ids.len() {
            let gram = &ids[start..];
            if let Some((prob, _)) = self.ngram(gram) {
                return Some(prob + backoff);
            }
            if let Some((_, weight)) = self.ngram(&gram[..gram.len() - 1]) {
                backoff += weight;
            }
        }
        None
    }

    /// log10 P(last token | preceding tokens). `None` when a token is not in
    /// the vocabulary and the model has no `<unk>`.
    pub fn log_prob(&self, tokens: &[&str]) -> Option<f32> {
        let ids = tokens
            .iter()
            .map(|t| self.word_id(t))
            .collect::<Option<Vec<u64>>>()?;
        self.log_prob_ids(&ids)
    }

    /// Per-token log10 probabilities of a whitespace-separated sentence,
    /// wrapped in `<s>`/`</s>` when the vocabulary has them. `<s>` itself is
    /// not scored.
    pub fn token_scores<'a>(&self, sentence: &'a str) -> Option<Vec<(&'a str, f32)>> {
        let mut tokens: Vec<&'a str> = Vec::new();
        let mut ids = Vec::new();
        let start = self.unigrams.index(SENTENCE_START);
        if let Some(id) = start {
            ids.push(id);
        }
        for word in sentence.split_whitespace() {
            tokens.push(word);
            ids.push(self.word_id(word)?);
        }
        if let Some(id) = self.unigrams.index(SENTENCE_END) {
            tokens.push(SENTENCE_END);
            ids.push(id);
        }

        let skip = usize::from(start.is_some());
        tokens
            .iter()
            .enumerate()
            .map(|(i, &tok)| {
                let end = skip + i + 1;
                self.log_prob_ids(&ids[..end]).map(|p| (tok, p))
            })
            .collect()
    }

    /// Total log10 probability of a sentence.
    pub fn score_sentence(&self, sentence: &str) -> Option<f32> {
        Some(self.token_scores(sentence)?.iter().map(|(_, p)| p).sum())
    }

    /// `10^(-log10 P / tokens)` over the scored tokens of a sentence.
    pub fn perplexity(&self, sentence: &str) -> Option<f64> {
        let scores = self.token_scores(sentence)?;
        if scores.is_empty() {
            return None;
        }
        let total: f64 = scores.iter().map(|(_, p)| f64::from(*p)).sum();
        Some(10f64.powf(-total / scores.len() as f64))
    }
}
