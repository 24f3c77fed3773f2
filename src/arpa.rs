//! Single-pass ARPA reader.
//!
//! The reader yields the declared per-order counts first, then every data
//! line as a [`GramRecord`], in file order. It holds one line at a time.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{IoContext, LmError, Result};

/// One data line of an ARPA file.
#[derive(Debug, Clone, PartialEq)]
pub struct GramRecord {
    /// 0-based order (0 = unigrams).
    pub order: usize,
    /// Space-separated tokens, exactly as written.
    pub text: String,
    /// log10 probability.
    pub probability: f32,
    /// log10 backoff weight; 0.0 when the line carries none.
    pub backoff: f32,
}

/// Something the reader found in the input.
#[derive(Debug, Clone, PartialEq)]
pub enum ArpaEvent {
    /// `ngram k=n` header line, reported as `(k - 1, n)`.
    Count { order: usize, count: u64 },
    /// A data line.
    Gram(GramRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Data(usize),
}

/// Streaming ARPA parser over any buffered reader.
pub struct ArpaReader<R> {
    inner: R,
    buffer: String,
    line_no: u64,
    section: Section,
    declared: usize,
    path: Option<PathBuf>,
}

/// Opens an ARPA file, decompressing it on the fly when it ends in `.gz`.
pub fn open_arpa(path: impl AsRef<Path>) -> Result<ArpaReader<Box<dyn BufRead>>> {
    let path = path.as_ref();
    let file = File::open(path).at(path)?;
    let reader: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(BufReader::with_capacity(1 << 20, GzDecoder::new(file)))
    } else {
        Box::new(BufReader::with_capacity(1 << 20, file))
    };
    Ok(ArpaReader::new(reader).with_path(path))
}

impl<R: BufRead> ArpaReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: String::new(),
            line_no: 0,
            section: Section::Header,
            declared: 0,
            path: None,
        }
    }

    /// Names the input in IO errors.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Current 1-based line number (0 before anything was read).
    pub fn line_number(&self) -> u64 {
        self.line_no
    }

    /// Reads until the next count or gram. `Ok(None)` at end of input.
    pub fn next_event(&mut self) -> Result<Option<ArpaEvent>> {
        loop {
            self.buffer.clear();
            let read = match self.inner.read_line(&mut self.buffer) {
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    return Err(LmError::parse(self.line_no + 1, format!("unreadable line: {e}")))
                }
                Err(e) => {
                    let path = self.path.as_deref().unwrap_or(Path::new("<input>"));
                    return Err(LmError::io(e, path));
                }
            };
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buffer.trim_end_matches(['\n', '\r']);

            match self.section {
                Section::Header => {
                    if let Some(decl) = line.strip_prefix("ngram ") {
                        let (order, count) = parse_count(decl, self.line_no)?;
                        if order != self.declared {
                            return Err(LmError::parse(
                                self.line_no,
                                format!(
                                    "expected count for {}-grams, found {}-grams",
                                    self.declared + 1,
                                    order + 1
                                ),
                            ));
                        }
                        self.declared += 1;
                        return Ok(Some(ArpaEvent::Count { order, count }));
                    }
                    if line.starts_with("\\1-grams:") {
                        self.section = Section::Data(0);
                    }
                }
                Section::Data(order) => {
                    if line.is_empty() || line.starts_with("\\end\\") {
                        continue;
                    }
                    if let Some(marker) = line.strip_prefix('\\') {
                        let next = order + 1;
                        if let Some(n) = section_order(marker) {
                            if n != next {
                                return Err(LmError::parse(
                                    self.line_no,
                                    format!("expected \\{}-grams:, found {line}", next + 1),
                                ));
                            }
                        }
                        self.section = Section::Data(next);
                        continue;
                    }
                    let record = parse_gram(line, order, self.line_no)?;
                    return Ok(Some(ArpaEvent::Gram(record)));
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for ArpaReader<R> {
    type Item = Result<ArpaEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// `"k=n"` -> `(k - 1, n)`
fn parse_count(decl: &str, line_no: u64) -> Result<(usize, u64)> {
    let (k, n) = decl
        .split_once('=')
        .ok_or_else(|| LmError::parse(line_no, format!("malformed count line {decl:?}")))?;
    let k: usize = k
        .trim()
        .parse()
        .map_err(|_| LmError::parse(line_no, format!("bad order in {decl:?}")))?;
    let n: u64 = n
        .trim()
        .parse()
        .map_err(|_| LmError::parse(line_no, format!("bad count in {decl:?}")))?;
    if k == 0 {
        return Err(LmError::parse(line_no, "n-gram orders start at 1"));
    }
    Ok((k - 1, n))
}

/// `"3-grams:"` -> `Some(2)`; anything else -> `None`.
fn section_order(marker: &str) -> Option<usize> {
    let n: usize = marker.strip_suffix("-grams:")?.parse().ok()?;
    n.checked_sub(1)
}

fn parse_gram(line: &str, order: usize, line_no: u64) -> Result<GramRecord> {
    let mut fields = line.splitn(3, '\t');
    let prob = fields.next().unwrap_or_default();
    let text = fields
        .next()
        .ok_or_else(|| LmError::parse(line_no, format!("truncated record {line:?}")))?;
    let probability: f32 = prob
        .trim()
        .parse()
        .map_err(|_| LmError::parse(line_no, format!("bad probability {prob:?}")))?;
    let backoff = match fields.next() {
        Some(b) => b
            .trim()
            .parse()
            .map_err(|_| LmError::parse(line_no, format!("bad backoff {b:?}")))?,
        None => 0.0,
    };
    Ok(GramRecord {
        order,
        text: text.to_string(),
        probability,
        backoff,
    })
}
