//! Pipeline latency benchmark: whole run plus per-stage breakdown.
//!
//! Runs the twelve q7 stages on the sample image with synthetic weights.
//! Wall-clock latency comes from `Instant`; the per-stage table uses the
//! emulated SysTick readings the console would print.
//!
//! Usage:
//!   cargo run --release --bin bench_pipeline
//!   cargo run --release --bin bench_pipeline -- --iterations 2000 --seed 7

use anyhow::Result;
use psoc6_driver::{InferencePipeline, Stage};
use psoc6_models::{Cifar10Model, Image};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_ITERATIONS: usize = 500;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS).max(1);
    let seed = u32::try_from(parse_arg(&args, "--seed", 1)).unwrap_or(1);

    let model = Arc::new(Cifar10Model::synthetic(seed));
    let parameters = model.parameter_count();
    let mut pipeline = InferencePipeline::new(model);
    let image = Image::sample();

    println!("q7 pipeline latency benchmark");
    println!("=============================");
    println!("Model      : CIFAR-10, 3× conv5 + fc, {parameters} parameters");
    println!("Iterations : {iterations}");
    println!();

    for _ in 0..20 {
        pipeline.run(&image);
    }

    let mut latencies_us = Vec::with_capacity(iterations);
    let mut stage_ns = vec![0u64; Stage::ALL.len()];
    let mut last_scores = [0i8; 10];

    for _ in 0..iterations {
        let t0 = Instant::now();
        let run = pipeline.run(&image);
        latencies_us.push(t0.elapsed().as_secs_f64() * 1e6);

        for (acc, timing) in stage_ns.iter_mut().zip(&run.timings) {
            *acc += timing.elapsed().reported_ns();
        }
        last_scores = run.scores;
    }

    latencies_us.sort_by(f64::total_cmp);
    let mean = latencies_us.iter().sum::<f64>() / iterations as f64;
    let p50 = latencies_us[iterations / 2];
    let p95 = latencies_us[(iterations as f64 * 0.95) as usize];
    let p99 = latencies_us[(iterations as f64 * 0.99) as usize];

    println!("Whole run");
    println!("---------");
    println!("  mean : {mean:.1} µs  ({:.0} Hz)", 1e6 / mean);
    println!("  min  : {:.1} µs", latencies_us[0]);
    println!("  p50  : {p50:.1} µs");
    println!("  p95  : {p95:.1} µs");
    println!("  p99  : {p99:.1} µs");
    println!("  max  : {:.1} µs", latencies_us[iterations - 1]);
    println!();

    let total_ns: u64 = stage_ns.iter().sum::<u64>().max(1);
    println!("Per stage (SysTick, mean)");
    println!("-------------------------");
    println!("  {:<12}  {:>10}  {:>6}", "stage", "µs", "share");
    for (stage, ns) in Stage::ALL.iter().zip(&stage_ns) {
        println!(
            "  {:<12}  {:>10.1}  {:>5.1}%",
            stage.label(),
            *ns as f64 / iterations as f64 / 1e3,
            *ns as f64 * 100.0 / total_ns as f64
        );
    }
    println!();
    println!("Scores: {last_scores:?}");

    Ok(())
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
