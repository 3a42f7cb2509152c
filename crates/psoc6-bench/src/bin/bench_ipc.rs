//! Cross-core pipe benchmark: send → callback copy → release round trip.
//!
//! The endpoint runs on its own thread with the real dispatcher, so each
//! round trip includes the 3072-byte copy into the inbox. The sender spins
//! on the ready flag exactly as the M0+ does before its next send.
//!
//! Usage:
//!   cargo run --release --bin bench_ipc
//!   cargo run --release --bin bench_ipc -- --iterations 100000

use anyhow::{bail, Result};
use psoc6_chip::ipc::{message_size, PointerWidth};
use psoc6_driver::{dispatcher, pipe, Direction, Inbox, RuntimeConfig};
use psoc6_models::Image;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const DEFAULT_ITERATIONS: usize = 20_000;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS).max(1);

    println!("Cross-core pipe round trip");
    println!("==========================");
    println!(
        "Message    : {} bytes on target, image 3072 bytes",
        message_size(PointerWidth::Bits32)
    );
    println!("Iterations : {iterations}");
    println!();

    let (tx, mut endpoint) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::headless());
    let inbox = Arc::new(Inbox::new());
    endpoint.register_callback(Direction::Cm0ToCm4.client_id(), dispatcher(Arc::clone(&inbox)));
    let irq = thread::Builder::new()
        .name("cm4-irq".into())
        .spawn(move || endpoint.run())?;

    let image = Image::sample();
    for _ in 0..100 {
        tx.send_image(image.clone())?;
        if !tx.wait_ready() {
            bail!("endpoint stopped during warmup");
        }
    }

    let mut latencies_ns = Vec::with_capacity(iterations);
    let t_all = Instant::now();
    for _ in 0..iterations {
        let frame = image.clone();
        let t0 = Instant::now();
        tx.send_image(frame)?;
        if !tx.wait_ready() {
            bail!("endpoint stopped");
        }
        latencies_ns.push(t0.elapsed().as_nanos() as f64);
    }
    let wall = t_all.elapsed();

    let (sent, released) = tx.counts();
    drop(tx);
    irq.join()
        .map_err(|_| anyhow::anyhow!("endpoint thread panicked"))?;

    latencies_ns.sort_by(f64::total_cmp);
    let mean = latencies_ns.iter().sum::<f64>() / iterations as f64;
    let p50 = latencies_ns[iterations / 2];
    let p99 = latencies_ns[(iterations as f64 * 0.99) as usize];
    let (received, overwritten) = inbox.stats();

    println!("send → release");
    println!("--------------");
    println!("  mean : {:.2} µs", mean / 1e3);
    println!("  p50  : {:.2} µs", p50 / 1e3);
    println!("  p99  : {:.2} µs", p99 / 1e3);
    println!(
        "  rate : {:.0} msg/s",
        iterations as f64 / wall.as_secs_f64()
    );
    println!();
    println!("sent {sent}, released {released}, copied {received}, superseded {overwritten}");

    Ok(())
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
