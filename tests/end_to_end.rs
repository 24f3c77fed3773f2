use std::fs;
use std::io::Write;
use std::path::Path;

use arpa2mph::{
    build, LanguageModel, LastMap, LmError, Manifest, MiddleMap, ProbBackoff, UnigramMap,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

const BIGRAM: &str = "\\data\\
ngram 1=3
ngram 2=2

\\1-grams:
-1.0\ta\t-0.3
-2.0\tb\t-0.1
-3.0\t<unk>\t0.0

\\2-grams:
-0.5\ta b
-0.7\tb a

\\end\\
";

fn write_arpa(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write arpa");
    path
}

#[test]
fn bigram_model_round_trip() {
    let dir = tempdir().unwrap();
    let arpa = write_arpa(dir.path(), "lm.arpa", BIGRAM);
    let prefix = dir.path().join("bin");

    let report = build(&arpa, &prefix).unwrap();
    assert_eq!(report.highest_order, 1);
    assert_eq!(report.counts, vec![3, 2]);

    let unigrams = UnigramMap::open(prefix.join("0")).unwrap();
    assert_eq!(
        unigrams.lookup("a"),
        Some(ProbBackoff {
            prob: -1.0,
            backoff: -0.3
        })
    );
    assert_eq!(unigrams.lookup("c"), None);

    let a = unigrams.index("a").unwrap();
    let b = unigrams.index("b").unwrap();
    let bigrams = LastMap::open(prefix.join("1")).unwrap();
    assert_eq!(bigrams.lookup(&[b, a]), Some(-0.7));
    assert_eq!(bigrams.lookup(&[a, b]), Some(-0.5));
    assert_eq!(bigrams.lookup(&[a, a]), None);

    let manifest = Manifest::load(&prefix).unwrap();
    assert_eq!(manifest.orders, 2);
    assert_eq!(manifest.source, arpa);
}

#[test]
fn unknown_words_fall_back_to_unk() {
    let dir = tempdir().unwrap();
    let arpa = write_arpa(dir.path(), "lm.arpa", BIGRAM);
    build(&arpa, dir.path().join("bin")).unwrap();
    let lm = LanguageModel::open(dir.path().join("bin")).unwrap();

    assert_eq!(lm.word_id("c"), lm.unigrams().index("<unk>"));
    // "a <unk>" unseen: bo(a) + P(<unk>)
    let p = lm.log_prob(&["a", "c"]).unwrap();
    assert!((p - (-0.3 + -3.0)).abs() < 1e-6, "{p}");
    assert_eq!(lm.log_prob(&["b", "a"]), Some(-0.7));
}

#[test]
fn extra_unigram_line_is_too_many() {
    let dir = tempdir().unwrap();
    let arpa = write_arpa(
        dir.path(),
        "lm.arpa",
        "\\data\\\nngram 1=2\n\n\\1-grams:\n-1\ta\n-1\tb\n-1\tc\n\n\\end\\\n",
    );
    match build(&arpa, dir.path().join("bin")) {
        Err(LmError::TooManyGrams { order }) => assert_eq!(order, 0),
        other => panic!("unexpected {other:?}"),
    }
    assert!(Manifest::load(dir.path().join("bin")).is_err());
}

#[test]
fn bigram_with_undeclared_word_is_rejected() {
    let dir = tempdir().unwrap();
    let text = BIGRAM.replace("-0.7\tb a", "-0.7\tb zzz");
    let arpa = write_arpa(dir.path(), "lm.arpa", &text);
    let prefix = dir.path().join("bin");
    match build(&arpa, &prefix) {
        Err(LmError::UnknownUnigram { token }) => assert_eq!(token, "zzz"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(LastMap::open(prefix.join("1")).is_err());
    assert!(LanguageModel::open(&prefix).is_err());
}

#[test]
fn missing_bigram_is_too_few() {
    let dir = tempdir().unwrap();
    let text = BIGRAM.replace("-0.7\tb a\n", "");
    let arpa = write_arpa(dir.path(), "lm.arpa", &text);
    assert!(matches!(
        build(&arpa, dir.path().join("bin")),
        Err(LmError::TooFewGrams {
            order: 1,
            expected: 2,
            observed: 1
        })
    ));
}

#[test]
fn empty_middle_section_is_built_empty() {
    let dir = tempdir().unwrap();
    let arpa = write_arpa(
        dir.path(),
        "lm.arpa",
        "\\data\\\nngram 1=2\nngram 2=0\nngram 3=1\n\n\\1-grams:\n-1.0\ta\t-0.3\n-2.0\tb\t-0.1\n\n\\2-grams:\n\n\\3-grams:\n-0.9\ta b a\n\n\\end\\\n",
    );
    let prefix = dir.path().join("bin");
    let report = build(&arpa, &prefix).unwrap();
    assert_eq!(report.highest_order, 2);
    assert_eq!(report.counts, vec![2, 0, 1]);

    assert!(MiddleMap::open(prefix.join("1")).unwrap().is_empty());
    let unigrams = UnigramMap::open(prefix.join("0")).unwrap();
    let a = unigrams.index("a").unwrap();
    let b = unigrams.index("b").unwrap();
    let trigrams = LastMap::open(prefix.join("2")).unwrap();
    assert_eq!(trigrams.lookup(&[a, b, a]), Some(-0.9));
}

#[test]
fn gzip_input_is_decompressed() {
    let dir = tempdir().unwrap();
    let arpa = dir.path().join("lm.arpa.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&arpa).unwrap(), Compression::default());
    encoder.write_all(BIGRAM.as_bytes()).unwrap();
    encoder.finish().unwrap();

    build(&arpa, dir.path().join("bin")).unwrap();
    let lm = LanguageModel::open(dir.path().join("bin")).unwrap();
    assert_eq!(lm.log_prob(&["a", "b"]), Some(-0.5));
}

#[test]
fn larger_trigram_model_round_trips() {
    let words: Vec<String> = (0..200).map(|i| format!("w{i}")).collect();
    let bigrams: Vec<(usize, usize)> = (0..200).map(|i| (i, (i * 7 + 3) % 200)).collect();
    let trigrams: Vec<(usize, usize, usize)> = bigrams
        .iter()
        .map(|&(x, y)| (x, y, (y * 11 + 1) % 200))
        .collect();

    let mut text = format!(
        "\\data\\\nngram 1={}\nngram 2={}\nngram 3={}\n\n\\1-grams:\n",
        words.len(),
        bigrams.len(),
        trigrams.len()
    );
    for (i, w) in words.iter().enumerate() {
        text.push_str(&format!("-{}.25\t{w}\t-0.{}\n", i % 7 + 1, i % 9 + 1));
    }
    text.push_str("\n\\2-grams:\n");
    for (i, (x, y)) in bigrams.iter().enumerate() {
        text.push_str(&format!("-0.{}\t{} {}\t-0.5\n", i % 9 + 1, words[*x], words[*y]));
    }
    text.push_str("\n\\3-grams:\n");
    for (i, (x, y, z)) in trigrams.iter().enumerate() {
        text.push_str(&format!(
            "-0.{}5\t{} {} {}\n",
            i % 9 + 1,
            words[*x],
            words[*y],
            words[*z]
        ));
    }
    text.push_str("\n\\end\\\n");

    let dir = tempdir().unwrap();
    let arpa = write_arpa(dir.path(), "tri.arpa", &text);
    let report = build(&arpa, dir.path().join("bin")).unwrap();
    assert_eq!(report.highest_order, 2);

    let lm = LanguageModel::open(dir.path().join("bin")).unwrap();
    for (i, (x, y, z)) in trigrams.iter().enumerate() {
        let expected: f32 = format!("-0.{}5", i % 9 + 1).parse().unwrap();
        assert_eq!(
            lm.log_prob(&[words[*x].as_str(), words[*y].as_str(), words[*z].as_str()]),
            Some(expected)
        );
    }
    for (i, (x, y)) in bigrams.iter().enumerate() {
        let ids = [
            lm.word_id(&words[*x]).unwrap(),
            lm.word_id(&words[*y]).unwrap(),
        ];
        let expected: f32 = format!("-0.{}", i % 9 + 1).parse().unwrap();
        assert_eq!(lm.ngram(&ids), Some((expected, -0.5)));
    }
}
