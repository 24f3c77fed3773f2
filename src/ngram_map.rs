//! Immutable, disk-resident n-gram maps indexed by a minimal perfect hash.
//!
//! A map lives in its own directory:
//!
//! ```text
//! hash.bin          header + perfect hash descriptor
//! fingerprints.bin  u32 key check per slot
//! values.bin        fixed-size values, one per slot
//! ```
//!
//! [`NGramMapBuilder`] accepts keys in any order. Only a 64-bit hash per key
//! stays in memory; values are appended to a staging file and scattered into
//! their slots when the builder is finalised.

use std::fs::{self, File};
use std::hash::Hash;
use std::io::{BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log::debug;
use memmap2::{Mmap, MmapMut};

use crate::error::{IoContext, LmError, Result};
use crate::mph::{fingerprint, key_hash, ByteCursor, MphFunction};

const MAGIC: u32 = 0x4E47_4D50; // "NGMP"
const VERSION: u32 = 1;

pub const HASH_FILE: &str = "hash.bin";
pub const FINGERPRINT_FILE: &str = "fingerprints.bin";
pub const VALUE_FILE: &str = "values.bin";
const STAGING_FILE: &str = "values.staging";

/// Fixed-width value stored in a map.
pub trait MapValue: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;
    /// Tag written to the header so a map is never opened with the wrong value type.
    const KIND: u32;

    fn encode(&self, out: &mut [u8]);
    fn decode(bytes: &[u8]) -> Self;
}

/// log10 probability and backoff weight of an n-gram below the highest order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbBackoff {
    pub prob: f32,
    pub backoff: f32,
}

impl MapValue for ProbBackoff {
    const SIZE: usize = 8;
    const KIND: u32 = 1;

    fn encode(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.prob.to_le_bytes());
        out[4..8].copy_from_slice(&self.backoff.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            prob: f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            backoff: f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Highest-order n-grams carry a probability only.
impl MapValue for f32 {
    const SIZE: usize = 4;
    const KIND: u32 = 2;

    fn encode(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Unigrams: word -> probability/backoff. Slots double as word ids.
pub type UnigramMap = NGramMap<str, ProbBackoff>;
/// Orders between the first and the last: id sequence -> probability/backoff.
pub type MiddleMap = NGramMap<[u64], ProbBackoff>;
/// Highest order: id sequence -> probability.
pub type LastMap = NGramMap<[u64], f32>;

pub type UnigramMapBuilder = NGramMapBuilder<str, ProbBackoff>;
pub type MiddleMapBuilder = NGramMapBuilder<[u64], ProbBackoff>;
pub type LastMapBuilder = NGramMapBuilder<[u64], f32>;

/// Streaming builder for one [`NGramMap`].
pub struct NGramMapBuilder<K: ?Sized, V> {
    prefix: PathBuf,
    expected: u64,
    hashes: Vec<u64>,
    staging: BufWriter<File>,
    scratch: Vec<u8>,
    _marker: PhantomData<(fn(&K), V)>,
}

impl<K: Hash + ?Sized, V: MapValue> NGramMapBuilder<K, V> {
    /// Starts a map in `prefix`, creating the directory if needed.
    ///
    /// The directory must not hold anything yet.
    pub fn new(prefix: impl AsRef<Path>, expected_keys: u64) -> Result<Self> {
        let prefix = prefix.as_ref().to_path_buf();
        fs::create_dir_all(&prefix).at(&prefix)?;
        if fs::read_dir(&prefix).at(&prefix)?.next().is_some() {
            return Err(LmError::BuilderMisuse(format!(
                "output directory {} is not empty",
                prefix.display()
            )));
        }
        let staging_path = prefix.join(STAGING_FILE);
        let staging = BufWriter::new(File::create(&staging_path).at(&staging_path)?);
        Ok(Self {
            prefix,
            expected: expected_keys,
            hashes: Vec::with_capacity(expected_keys.min(1 << 24) as usize),
            staging,
            scratch: vec![0u8; V::SIZE],
            _marker: PhantomData,
        })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn expected_keys(&self) -> u64 {
        self.expected
    }

    /// Keys inserted so far.
    pub fn len(&self) -> u64 {
        self.hashes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Adds one key. Keys may arrive in any order but must be distinct.
    pub fn insert(&mut self, key: &K, value: V) -> Result<()> {
        if self.len() >= self.expected {
            return Err(LmError::BuilderMisuse(format!(
                "more than the {} expected keys inserted into {}",
                self.expected,
                self.prefix.display()
            )));
        }
        value.encode(&mut self.scratch);
        self.staging
            .write_all(&self.scratch)
            .at(self.prefix.join(STAGING_FILE))?;
        self.hashes.push(key_hash(key));
        Ok(())
    }

    /// Computes the perfect hash and writes the map. Returns the map's
    /// directory, ready for [`NGramMap::open`].
    ///
    /// Fails when fewer keys than expected were inserted.
    pub fn finalize(self) -> Result<PathBuf> {
        let Self {
            prefix,
            expected,
            hashes,
            staging,
            ..
        } = self;
        let staging_path = prefix.join(STAGING_FILE);
        if hashes.len() as u64 != expected {
            return Err(LmError::BuilderMisuse(format!(
                "finalized {} with {} of {} expected keys",
                prefix.display(),
                hashes.len(),
                expected
            )));
        }
        staging
            .into_inner()
            .map_err(|e| LmError::io(e.into_error(), &staging_path))?
            .sync_all()
            .at(&staging_path)?;

        let mph = MphFunction::build(&hashes)?;
        let n = hashes.len();

        let hash_path = prefix.join(HASH_FILE);
        let mut out = BufWriter::new(File::create(&hash_path).at(&hash_path)?);
        out.write_all(&MAGIC.to_le_bytes()).at(&hash_path)?;
        out.write_all(&VERSION.to_le_bytes()).at(&hash_path)?;
        out.write_all(&(n as u64).to_le_bytes()).at(&hash_path)?;
        out.write_all(&(V::SIZE as u32).to_le_bytes()).at(&hash_path)?;
        out.write_all(&V::KIND.to_le_bytes()).at(&hash_path)?;
        mph.write_to(&mut out).at(&hash_path)?;
        out.flush().at(&hash_path)?;

        // scatter staged values into their slots
        let value_path = prefix.join(VALUE_FILE);
        let value_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&value_path)
            .at(&value_path)?;
        value_file
            .set_len((n * V::SIZE) as u64)
            .at(&value_path)?;

        let mut fingerprints = vec![0u32; n];
        if n > 0 {
            let mut values = unsafe { MmapMut::map_mut(&value_file).at(&value_path)? };
            let mut staged =
                BufReader::with_capacity(1 << 20, File::open(&staging_path).at(&staging_path)?);
            for &h in &hashes {
                let slot = mph
                    .index(h)
                    .ok_or_else(|| LmError::Construction("inserted key has no slot".into()))?
                    as usize;
                fingerprints[slot] = fingerprint(h);
                let start = slot * V::SIZE;
                staged
                    .read_exact(&mut values[start..start + V::SIZE])
                    .at(&staging_path)?;
            }
            values.flush().at(&value_path)?;
        }

        let fp_path = prefix.join(FINGERPRINT_FILE);
        let mut fp_out = BufWriter::new(File::create(&fp_path).at(&fp_path)?);
        for fp in &fingerprints {
            fp_out.write_all(&fp.to_le_bytes()).at(&fp_path)?;
        }
        fp_out.flush().at(&fp_path)?;

        fs::remove_file(&staging_path).at(&staging_path)?;
        debug!(
            "wrote {} keys to {} ({:.2} hash bits/key)",
            n,
            prefix.display(),
            if n == 0 {
                0.0
            } else {
                mph.size_in_bytes() as f64 * 8.0 / n as f64
            }
        );
        Ok(prefix)
    }
}

/// Read-only map opened from a directory written by [`NGramMapBuilder`].
pub struct NGramMap<K: ?Sized, V> {
    prefix: PathBuf,
    mph: MphFunction,
    fingerprints: Option<Mmap>,
    values: Option<Mmap>,
    _marker: PhantomData<(fn(&K), V)>,
}

impl<K: Hash + ?Sized, V: MapValue> NGramMap<K, V> {
    /// Loads the hash descriptor and maps the slot arrays.
    pub fn open(prefix: impl AsRef<Path>) -> Result<Self> {
        let prefix = prefix.as_ref().to_path_buf();
        let hash_path = prefix.join(HASH_FILE);
        let data = fs::read(&hash_path).at(&hash_path)?;
        let mut cursor = ByteCursor::new(&data, &hash_path);

        if cursor.u32()? != MAGIC {
            return Err(cursor.error("not an n-gram map"));
        }
        let version = cursor.u32()?;
        if version != VERSION {
            return Err(cursor.error(format!("unsupported map version {version}")));
        }
        let num_keys = cursor.u64()?;
        let value_size = cursor.u32()? as usize;
        let kind = cursor.u32()?;
        if value_size != V::SIZE || kind != V::KIND {
            return Err(cursor.error(format!(
                "stores values of kind {kind} ({value_size} bytes), expected kind {} ({} bytes)",
                V::KIND,
                V::SIZE
            )));
        }
        let mph = MphFunction::read_from(&mut cursor)?;
        if mph.num_keys() != num_keys {
            return Err(cursor.error("perfect hash key count disagrees with header"));
        }

        let n = num_keys as usize;
        let fingerprints = map_slots(&prefix.join(FINGERPRINT_FILE), n * 4)?;
        let values = map_slots(&prefix.join(VALUE_FILE), n * V::SIZE)?;
        Ok(Self {
            prefix,
            mph,
            fingerprints,
            values,
            _marker: PhantomData,
        })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn len(&self) -> u64 {
        self.mph.num_keys()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dense slot of a key in `[0, len())`, or `None` when the key was never
    /// inserted.
    pub fn index(&self, key: &K) -> Option<u64> {
        let h = key_hash(key);
        let slot = self.mph.index(h).filter(|&slot| slot < self.len())?;
        let fps = self.fingerprints.as_ref()?;
        let at = slot as usize * 4;
        let stored = u32::from_le_bytes([fps[at], fps[at + 1], fps[at + 2], fps[at + 3]]);
        (stored == fingerprint(h)).then_some(slot)
    }

    /// Value stored for `key`, or `None` when it is absent.
    pub fn lookup(&self, key: &K) -> Option<V> {
        self.index(key).and_then(|slot| self.value_at(slot))
    }

    /// Value in a given slot.
    pub fn value_at(&self, slot: u64) -> Option<V> {
        if slot >= self.len() {
            return None;
        }
        let values = self.values.as_ref()?;
        let start = slot as usize * V::SIZE;
        Some(V::decode(&values[start..start + V::SIZE]))
    }
}

/// Maps a slot array after checking its size. Empty arrays are not mapped.
fn map_slots(path: &Path, expected_len: usize) -> Result<Option<Mmap>> {
    let file = File::open(path).at(path)?;
    let len = file.metadata().at(path)?.len();
    if len != expected_len as u64 {
        return Err(LmError::format(
            path,
            format!("expected {expected_len} bytes, found {len}"),
        ));
    }
    if expected_len == 0 {
        return Ok(None);
    }
    let mmap = unsafe { Mmap::map(&file).at(path)? };
    Ok(Some(mmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn build_words(dir: &Path, n: usize) -> Vec<(String, ProbBackoff)> {
        let entries: Vec<(String, ProbBackoff)> = (0..n)
            .map(|i| {
                (
                    format!("w{i}"),
                    ProbBackoff {
                        prob: -(i as f32) / 7.0,
                        backoff: i as f32 * 0.25,
                    },
                )
            })
            .collect();
        let mut builder = UnigramMapBuilder::new(dir, n as u64).unwrap();
        // insertion order differs from any slot order
        for (word, value) in entries.iter().rev() {
            builder.insert(word, *value).unwrap();
        }
        builder.finalize().unwrap();
        entries
    }

    #[test]
    fn every_inserted_key_round_trips() {
        let dir = tempdir().unwrap();
        let entries = build_words(dir.path(), 3000);
        let map = UnigramMap::open(dir.path()).unwrap();
        assert_eq!(map.len(), 3000);
        for (word, value) in &entries {
            let got = map.lookup(word.as_str()).unwrap();
            assert_eq!(got.prob.to_bits(), value.prob.to_bits());
            assert_eq!(got.backoff.to_bits(), value.backoff.to_bits());
        }
        assert!(!dir.path().join(STAGING_FILE).exists());
    }

    #[test]
    fn indices_are_dense_and_distinct() {
        let dir = tempdir().unwrap();
        let entries = build_words(dir.path(), 500);
        let map = UnigramMap::open(dir.path()).unwrap();
        let mut ids: Vec<u64> = entries
            .iter()
            .map(|(w, _)| map.index(w.as_str()).unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..500).collect::<Vec<u64>>());
    }

    #[test]
    fn absent_keys_are_rejected() {
        let dir = tempdir().unwrap();
        build_words(dir.path(), 200);
        let map = UnigramMap::open(dir.path()).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let false_positives = (0..100_000)
            .filter(|_| {
                let key = format!("absent-{}", rng.gen::<u64>());
                map.lookup(key.as_str()).is_some()
            })
            .count();
        assert_eq!(false_positives, 0);
    }

    #[test]
    fn id_sequence_keys() {
        let dir = tempdir().unwrap();
        let keys: Vec<Vec<u64>> = (0..100u64).map(|i| vec![i, i * 3 % 17, 5]).collect();
        let mut builder = LastMapBuilder::new(dir.path(), keys.len() as u64).unwrap();
        for (i, key) in keys.iter().enumerate() {
            builder.insert(key, -(i as f32)).unwrap();
        }
        builder.finalize().unwrap();

        let map = LastMap::open(dir.path()).unwrap();
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.lookup(key), Some(-(i as f32)));
        }
        assert_eq!(map.lookup(&[5, 0, 0]), None);
        assert_eq!(map.lookup(&[0, 0]), None);
    }

    #[test]
    fn too_few_keys_fails_at_finalize() {
        let dir = tempdir().unwrap();
        let mut builder = UnigramMapBuilder::new(dir.path(), 3).unwrap();
        builder.insert("a", ProbBackoff::default()).unwrap();
        builder.insert("b", ProbBackoff::default()).unwrap();
        assert!(matches!(
            builder.finalize(),
            Err(LmError::BuilderMisuse(_))
        ));
        assert!(!dir.path().join(HASH_FILE).exists());
    }

    #[test]
    fn too_many_keys_fails_at_insert() {
        let dir = tempdir().unwrap();
        let mut builder = UnigramMapBuilder::new(dir.path(), 1).unwrap();
        builder.insert("a", ProbBackoff::default()).unwrap();
        assert!(matches!(
            builder.insert("b", ProbBackoff::default()),
            Err(LmError::BuilderMisuse(_))
        ));
    }

    #[test]
    fn duplicate_keys_fail_to_build() {
        let dir = tempdir().unwrap();
        let mut builder = UnigramMapBuilder::new(dir.path(), 2).unwrap();
        builder.insert("a", ProbBackoff::default()).unwrap();
        builder.insert("a", ProbBackoff::default()).unwrap();
        assert!(matches!(
            builder.finalize(),
            Err(LmError::Construction(_))
        ));
    }

    #[test]
    fn non_empty_prefix_is_refused() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("leftover"), b"x").unwrap();
        assert!(matches!(
            UnigramMapBuilder::new(dir.path(), 1),
            Err(LmError::BuilderMisuse(_))
        ));
    }

    #[test]
    fn wrong_value_kind_is_a_format_error() {
        let dir = tempdir().unwrap();
        build_words(dir.path(), 10);
        assert!(matches!(
            NGramMap::<str, f32>::open(dir.path()),
            Err(LmError::Format { .. })
        ));
    }

    #[test]
    fn truncated_value_array_is_a_format_error() {
        let dir = tempdir().unwrap();
        build_words(dir.path(), 10);
        let values = dir.path().join(VALUE_FILE);
        let data = fs::read(&values).unwrap();
        fs::write(&values, &data[..data.len() - 1]).unwrap();
        assert!(matches!(
            UnigramMap::open(dir.path()),
            Err(LmError::Format { .. })
        ));
    }

    #[test]
    fn corrupt_hash_file_fails_to_open() {
        let dir = tempdir().unwrap();
        build_words(dir.path(), 3);
        let hash = dir.path().join(HASH_FILE);
        let mut data = fs::read(&hash).unwrap();
        let at = data.len() - 8;
        data[at..].copy_from_slice(&1_000_000u64.to_le_bytes());
        fs::write(&hash, &data).unwrap();
        assert!(matches!(
            UnigramMap::open(dir.path()),
            Err(LmError::Format { .. })
        ));
    }

    #[test]
    fn missing_map_is_an_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            UnigramMap::open(dir.path().join("nope")),
            Err(LmError::Io { .. })
        ));
    }

    #[test]
    fn empty_map() {
        let dir = tempdir().unwrap();
        UnigramMapBuilder::new(dir.path(), 0)
            .unwrap()
            .finalize()
            .unwrap();
        let map = UnigramMap::open(dir.path()).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.lookup("a"), None);
    }
}
