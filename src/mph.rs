//! Minimal perfect hash over 64-bit key hashes.
//!
//! BBHash-style multi-level construction: each level is a bitset of
//! `gamma * remaining` bins; keys that land alone in a bin are placed there,
//! the rest fall through to the next, smaller level. The dense index of a key
//! is the rank of its bit across all levels, answered in O(1) through a rank
//! directory holding one cumulative popcount per 512 bits.
//!
//! Construction is expected O(n) since level sizes shrink geometrically.
//! With `gamma = 2` the bitsets cost about `gamma * e` bits per key and the
//! rank directory adds 1/8 of that again.
//!
//! Keys are hashed once with `ahash` under fixed seeds; the seed of each level
//! is mixed into that hash, so the original keys are never needed after
//! [`key_hash`]. A canary hash is stored with the function to catch files built
//! by a binary whose hasher behaves differently.

use std::hash::Hash;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ahash::RandomState;
use log::debug;

use crate::error::{LmError, Result};

const MAGIC: u32 = 0x4D50_4846; // "MPHF"
const VERSION: u32 = 1;

const GAMMA: f64 = 2.0;
const MAX_LEVELS: usize = 64;
const MAX_EMPTY_ATTEMPTS: usize = 16;
const WORDS_PER_RANK: usize = 8;

const FINGERPRINT_SEED: u64 = 0x5EED_F1A6_2B0C_4D31;
const CANARY_KEY: &str = "arpa2mph canary key";

fn hasher() -> &'static RandomState {
    static HASHER: OnceLock<RandomState> = OnceLock::new();
    HASHER.get_or_init(|| {
        RandomState::with_seeds(
            0x243F_6A88_85A3_08D3,
            0x1319_8A2E_0370_7344,
            0xA409_3822_299F_31D0,
            0x082E_FA98_EC4E_6C89,
        )
    })
}

/// Hashes a key the way both builders and maps expect.
///
/// `str`/`String` and `[u64]`/`Vec<u64>` hash identically, so either form
/// can be used at build and query time.
pub fn key_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    hasher().hash_one(key)
}

/// 32-bit key check stored next to each value.
pub fn fingerprint(hash: u64) -> u32 {
    (mix(hash.rotate_left(29) ^ FINGERPRINT_SEED) >> 32) as u32
}

/// splitmix64 finaliser
#[inline]
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[inline]
fn bin(hash: u64, seed: u64, len: u64) -> u64 {
    ((mix(hash ^ seed) as u128 * len as u128) >> 64) as u64
}

#[inline]
fn get_bit(words: &[u64], idx: u64) -> bool {
    (words[(idx >> 6) as usize] >> (idx & 63)) & 1 == 1
}

#[inline]
fn set_bit(words: &mut [u64], idx: u64) {
    words[(idx >> 6) as usize] |= 1u64 << (idx & 63);
}

#[inline]
fn clear_bit(words: &mut [u64], idx: u64) {
    words[(idx >> 6) as usize] &= !(1u64 << (idx & 63));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Level {
    seed: u64,
    /// bit offset into the concatenated bitsets, always a multiple of 64
    offset: u64,
    len: u64,
}

/// A minimal perfect hash function over a fixed set of key hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MphFunction {
    num_keys: u64,
    levels: Vec<Level>,
    bits: Vec<u64>,
    ranks: Vec<u64>,
}

impl MphFunction {
    /// Builds a function mapping each of `hashes` to a distinct index in
    /// `[0, hashes.len())`.
    ///
    /// Fails with [`LmError::Construction`] when some hashes cannot be
    /// separated, which in practice means the key set held duplicates.
    pub fn build(hashes: &[u64]) -> Result<Self> {
        let mut remaining: Vec<u64> = hashes.to_vec();
        let mut levels = Vec::new();
        let mut bits: Vec<u64> = Vec::new();
        let mut empty_attempts = 0;
        let mut attempt: u64 = 0;

        while !remaining.is_empty() {
            if levels.len() >= MAX_LEVELS {
                return Err(LmError::Construction(format!(
                    "{} keys left after {MAX_LEVELS} levels",
                    remaining.len()
                )));
            }
            let words = ((remaining.len() as f64 * GAMMA).ceil() as usize).div_ceil(64).max(1);
            let len = (words * 64) as u64;
            let seed = mix(attempt.wrapping_add(0x9E37_79B9_7F4A_7C15));
            attempt += 1;

            let mut seen = vec![0u64; words];
            let mut unique = vec![0u64; words];
            for &h in &remaining {
                let b = bin(h, seed, len);
                if get_bit(&seen, b) {
                    clear_bit(&mut unique, b);
                } else {
                    set_bit(&mut seen, b);
                    set_bit(&mut unique, b);
                }
            }

            let before = remaining.len();
            remaining.retain(|&h| !get_bit(&unique, bin(h, seed, len)));
            let placed = before - remaining.len();
            if placed == 0 {
                empty_attempts += 1;
                if empty_attempts >= MAX_EMPTY_ATTEMPTS {
                    return Err(LmError::Construction(format!(
                        "{before} keys collide under every seed; duplicate keys?"
                    )));
                }
                continue;
            }
            empty_attempts = 0;
            debug!(
                "mph level {}: {} bins, {} placed, {} remaining",
                levels.len(),
                len,
                placed,
                remaining.len()
            );

            levels.push(Level {
                seed,
                offset: (bits.len() * 64) as u64,
                len,
            });
            bits.extend_from_slice(&unique);
        }

        let ranks = rank_directory(&bits);
        Ok(Self {
            num_keys: hashes.len() as u64,
            levels,
            bits,
            ranks,
        })
    }

    /// Number of keys the function was built over.
    pub fn num_keys(&self) -> u64 {
        self.num_keys
    }

    /// Dense index for a key hash. Members always get their own index;
    /// non-members get `None` or an arbitrary index, which callers must
    /// reject with a fingerprint.
    pub fn index(&self, hash: u64) -> Option<u64> {
        for level in &self.levels {
            let pos = level.offset + bin(hash, level.seed, level.len);
            if get_bit(&self.bits, pos) {
                return Some(self.rank(pos));
            }
        }
        None
    }

    /// Number of set bits strictly before `pos`.
    fn rank(&self, pos: u64) -> u64 {
        let word = (pos >> 6) as usize;
        let block = word / WORDS_PER_RANK;
        let mut rank = self.ranks[block];
        for w in &self.bits[block * WORDS_PER_RANK..word] {
            rank += u64::from(w.count_ones());
        }
        let mask = (1u64 << (pos & 63)) - 1;
        rank + u64::from((self.bits[word] & mask).count_ones())
    }

    /// Size of the serialised descriptor in bytes.
    pub fn size_in_bytes(&self) -> usize {
        40 + self.levels.len() * 24 + 16 + (self.bits.len() + self.ranks.len()) * 8
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&MAGIC.to_le_bytes())?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&self.num_keys.to_le_bytes())?;
        out.write_all(&key_hash(CANARY_KEY).to_le_bytes())?;
        out.write_all(&(self.levels.len() as u64).to_le_bytes())?;
        out.write_all(&[0u8; 8])?; // reserved
        for level in &self.levels {
            out.write_all(&level.seed.to_le_bytes())?;
            out.write_all(&level.offset.to_le_bytes())?;
            out.write_all(&level.len.to_le_bytes())?;
        }
        out.write_all(&(self.bits.len() as u64).to_le_bytes())?;
        for w in &self.bits {
            out.write_all(&w.to_le_bytes())?;
        }
        out.write_all(&(self.ranks.len() as u64).to_le_bytes())?;
        for r in &self.ranks {
            out.write_all(&r.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads a descriptor written by [`MphFunction::write_to`] and checks it
    /// is internally consistent.
    pub fn read_from(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        if cursor.u32()? != MAGIC {
            return Err(cursor.error("bad perfect hash magic"));
        }
        let version = cursor.u32()?;
        if version != VERSION {
            return Err(cursor.error(format!("unsupported perfect hash version {version}")));
        }
        let num_keys = cursor.u64()?;
        if cursor.u64()? != key_hash(CANARY_KEY) {
            return Err(cursor.error("built with an incompatible key hasher"));
        }
        let num_levels = cursor.len()?;
        cursor.skip(8)?;

        let mut levels = Vec::with_capacity(num_levels.min(MAX_LEVELS));
        for _ in 0..num_levels {
            levels.push(Level {
                seed: cursor.u64()?,
                offset: cursor.u64()?,
                len: cursor.u64()?,
            });
        }
        let bits = cursor.u64_vec()?;
        let ranks = cursor.u64_vec()?;

        let total_bits = bits.len() as u64 * 64;
        let levels_ok = levels
            .iter()
            .all(|l| {
                l.offset % 64 == 0
                    && l.len > 0
                    && l.offset.checked_add(l.len).is_some_and(|end| end <= total_bits)
            });
        if !levels_ok || ranks.len() != bits.len().div_ceil(WORDS_PER_RANK).max(1) {
            return Err(cursor.error("perfect hash levels do not fit its bitset"));
        }
        if ranks != rank_directory(&bits) {
            return Err(cursor.error("perfect hash rank directory does not match its bitset"));
        }
        let function = Self {
            num_keys,
            levels,
            bits,
            ranks,
        };
        let ones: u64 = function.bits.iter().map(|w| u64::from(w.count_ones())).sum();
        if ones != num_keys {
            return Err(cursor.error(format!(
                "perfect hash places {ones} keys but declares {num_keys}"
            )));
        }
        Ok(function)
    }
}

fn rank_directory(bits: &[u64]) -> Vec<u64> {
    let mut ranks = Vec::with_capacity(bits.len() / WORDS_PER_RANK + 1);
    let mut total = 0u64;
    for block in bits.chunks(WORDS_PER_RANK) {
        ranks.push(total);
        total += block.iter().map(|w| u64::from(w.count_ones())).sum::<u64>();
    }
    if ranks.is_empty() {
        ranks.push(0);
    }
    ranks
}

/// Bounds-checked little-endian reader over a loaded file.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    path: PathBuf,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], path: &Path) -> Self {
        Self {
            data,
            pos: 0,
            path: path.to_path_buf(),
        }
    }

    pub fn error(&self, message: impl Into<String>) -> LmError {
        LmError::format(&self.path, message)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| self.error(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// A u64 length that must fit in the remaining bytes at 8 bytes each.
    fn len(&mut self) -> Result<usize> {
        let n = self.u64()?;
        let left = (self.data.len() - self.pos) as u64 / 8;
        if n > left {
            return Err(self.error(format!("length {n} exceeds file size")));
        }
        Ok(n as usize)
    }

    fn u64_vec(&mut self) -> Result<Vec<u64>> {
        let n = self.len()?;
        (0..n).map(|_| self.u64()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}
