//! Classify the compiled-in sample image once and print every stage.
//!
//! Run with: cargo run -p psoc6-driver --example classify_sample

use psoc6_driver::{InferencePipeline, Stage};
use psoc6_models::{Cifar10Model, Image};
use std::sync::Arc;

fn main() {
    let model = Arc::new(Cifar10Model::synthetic(1));
    let mut pipeline = InferencePipeline::new(model);

    let run = pipeline.run_observed(&Image::sample(), |stage, out| {
        let min = out.iter().copied().min().unwrap_or(0);
        let max = out.iter().copied().max().unwrap_or(0);
        println!("{:<12} {:>6} values in [{min}, {max}]", stage.label(), out.len());
    });

    println!();
    for timing in &run.timings {
        println!("{:<12} {}", timing.stage.label(), timing.elapsed());
    }
    println!();
    println!("scores    {:?}", run.scores);
    println!("top class {}", run.top_class());
    assert_eq!(run.stages_executed(), Stage::ALL.len());
}
