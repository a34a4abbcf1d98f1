use accelconv::case::ConvCase;
use accelconv::check::{run_case, CaseReport};
use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "convcheck", version, about = "Compare the reference convolution against the emulated accelerator")]
struct Args {
    /// JSON file with an array of cases
    #[arg(long)]
    cases: Option<PathBuf>,

    /// Number of additional random int8 cases
    #[arg(long, default_value_t = 0)]
    random: usize,

    /// Seed for random case generation
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    /// Worker threads
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Write a JSON report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print every case, not only failures
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut cases = match args.cases.as_deref() {
        Some(path) => ConvCase::load_all(path)?,
        None => Vec::new(),
    };
    let mut rng = SmallRng::seed_from_u64(args.seed);
    for i in 0..args.random {
        cases.push(ConvCase::random(&mut rng, format!("random-{i}")));
    }
    if cases.is_empty() {
        bail!("nothing to run: pass --cases <file> and/or --random <n>");
    }

    let pb = ProgressBar::new(cases.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let pool = rayon::ThreadPoolBuilder::new().num_threads(args.threads.max(1)).build().context("thread pool")?;
    let t0 = Instant::now();
    let results: Vec<Result<CaseReport>> = pool.install(|| {
        cases
            .par_iter()
            .map(|case| {
                let r = run_case(case);
                pb.inc(1);
                r
            })
            .collect()
    });
    pb.finish_and_clear();

    let mut reports = Vec::with_capacity(results.len());
    for r in results {
        reports.push(r?);
    }

    let failed: Vec<&CaseReport> = reports.iter().filter(|r| !r.passed()).collect();
    for r in &reports {
        if args.verbose || !r.passed() {
            let status = if r.passed() { "ok" } else { "MISMATCH" };
            println!("{:<24} {:?} {:>6} elems  {}", r.name, r.width, r.output_shape.iter().product::<usize>(), status);
            if let Some(m) = &r.first_mismatch {
                println!("    first at {}: reference {} accelerator {}", m.index, m.reference, m.accelerated);
            }
        }
    }
    let instructions: u64 = reports.iter().filter_map(|r| r.accelerator).map(|s| s.instructions).sum();
    println!(
        "{} cases, {} failed, {} accelerator instructions in {:.3}s",
        reports.len(),
        failed.len(),
        instructions,
        t0.elapsed().as_secs_f64()
    );

    if let Some(path) = args.report.as_deref() {
        let payload = serde_json::json!({ "seed": args.seed, "cases": reports });
        std::fs::write(path, serde_json::to_string_pretty(&payload)?)
            .with_context(|| format!("write report: {}", path.display()))?;
    }

    if !failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
