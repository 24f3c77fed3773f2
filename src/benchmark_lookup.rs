//! Lookup latency over a built model.
//!
//! Usage: benchmark_lookup <prefix> [--queries N]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use arpa2mph::LanguageModel;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <prefix> [--queries N]", args[0]);
        std::process::exit(2);
    }
    let prefix = &args[1];
    let queries: usize = args
        .iter()
        .position(|a| a == "--queries")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);

    println!("=== Benchmark: MPH n-gram lookups ===");
    let start_load = Instant::now();
    let lm = LanguageModel::open(prefix).with_context(|| format!("open model at {prefix}"))?;
    println!("Model opened in {:.2?}", start_load.elapsed());

    let vocab_size = lm.unigrams().len();
    if vocab_size == 0 {
        println!("Empty vocabulary, nothing to query.");
        return Ok(());
    }

    let mut rng = StdRng::seed_from_u64(7);
    let mut latencies: Vec<Duration> = Vec::with_capacity(queries);
    let mut hits = 0usize;
    for _ in 0..queries {
        let len = rng.gen_range(1..=lm.order());
        let ids: Vec<u64> = (0..len).map(|_| rng.gen_range(0..vocab_size)).collect();
        let start = Instant::now();
        let found = lm.ngram(&ids).is_some();
        latencies.push(start.elapsed());
        if found {
            hits += 1;
        }
    }

    if latencies.is_empty() {
        return Ok(());
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let pct = |p: f64| latencies[((latencies.len() as f64 * p) as usize).min(latencies.len() - 1)];
    println!("\nQueries: {} ({} hits)", latencies.len(), hits);
    println!("Mean:    {:?}", total / latencies.len() as u32);
    println!("P50:     {:?}", pct(0.50));
    println!("P99:     {:?}", pct(0.99));
    println!("Max:     {:?}", latencies[latencies.len() - 1]);
    Ok(())
}
