//! Spot-check a built prefix against its ARPA source.
//!
//! Samples grams from the ARPA file with a fixed seed and checks each one
//! resolves to a bit-identical value.
//!
//! Usage: test_integrity <model.arpa> <prefix> [--rate R]

use anyhow::{bail, Context, Result};
use arpa2mph::{open_arpa, ArpaEvent, LanguageModel};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <model.arpa> <prefix> [--rate R]", args[0]);
        eprintln!("  --rate R : fraction of grams to check (default: 0.01)");
        std::process::exit(2);
    }
    let arpa_path = &args[1];
    let prefix = &args[2];
    let rate: f64 = args
        .iter()
        .position(|a| a == "--rate")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|r| r.is_finite())
        .unwrap_or(0.01)
        .clamp(0.0, 1.0);

    let lm = LanguageModel::open(prefix).with_context(|| format!("open model at {prefix}"))?;
    println!("Loaded {}-gram model, counts {:?}", lm.order(), lm.counts());
    println!("Checking ~{:.1}% of grams...\n", rate * 100.0);

    let mut rng = StdRng::seed_from_u64(1);
    let mut passed = 0u64;
    let mut failed = 0u64;
    let mut reader = open_arpa(arpa_path).with_context(|| format!("open {arpa_path}"))?;

    while let Some(event) = reader.next_event()? {
        let ArpaEvent::Gram(gram) = event else {
            continue;
        };
        if !rng.gen_bool(rate) {
            continue;
        }
        let ids: Option<Vec<u64>> = gram
            .text
            .split_whitespace()
            .map(|t| lm.unigrams().index(t))
            .collect();
        let Some(ids) = ids else {
            println!("FAIL: {:?} has a token missing from the unigram map", gram.text);
            failed += 1;
            continue;
        };

        let last = gram.order > 0 && gram.order + 1 == lm.order();
        let expected_backoff = if last { 0.0 } else { gram.backoff };
        match lm.ngram(&ids) {
            Some((prob, backoff))
                if prob.to_bits() == gram.probability.to_bits()
                    && backoff.to_bits() == expected_backoff.to_bits() =>
            {
                passed += 1
            }
            Some((prob, backoff)) => {
                println!(
                    "FAIL: {:?} stored ({prob}, {backoff}), arpa has ({}, {})",
                    gram.text, gram.probability, expected_backoff
                );
                failed += 1;
            }
            None => {
                println!("FAIL: {:?} not found", gram.text);
                failed += 1;
            }
        }
    }

    println!("\nResults: {passed} passed, {failed} failed");
    if failed > 0 {
        bail!("Integrity check failed with {failed} errors");
    }
    println!("OK: sampled grams match the ARPA source.");
    Ok(())
}
