//! Score sentences against a built model.
//!
//! Usage: query_lm <prefix> "sentence..." ["another sentence..."]

use anyhow::{Context, Result};
use arpa2mph::LanguageModel;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <prefix> \"sentence...\" [...]", args[0]);
        std::process::exit(2);
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let prefix = &args[1];
    let lm = LanguageModel::open(prefix).with_context(|| format!("open model at {prefix}"))?;
    println!("Model: {}-gram, counts {:?}", lm.order(), lm.counts());

    for sentence in &args[2..] {
        println!("\n{sentence}");
        match lm.token_scores(sentence) {
            Some(scores) => {
                for (token, p) in &scores {
                    println!("  {:20} {:8.4}", token, p);
                }
                let total: f32 = scores.iter().map(|(_, p)| p).sum();
                println!("  {:20} {:8.4}", "total", total);
                if let Some(ppl) = lm.perplexity(sentence) {
                    println!("  {:20} {:8.4}", "perplexity", ppl);
                }
            }
            None => println!("  (contains words outside the vocabulary and no <unk>)"),
        }
    }
    Ok(())
}
