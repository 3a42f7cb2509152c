//! The staged q7 inference pipeline.
//!
//! Twelve operator stages run strictly in order on the two scratch
//! buffers, each one writing the buffer the previous stage did not:
//!
//! ```text
//! stage        reads   writes   elements out
//! preprocess   image   B        32×32×3
//! conv1        B       A        32×32×32
//! relu1        A       B        32×32×32
//! pool1        B       A        16×16×32
//! conv2        A       B        16×16×16
//! relu2        B       A        16×16×16
//! pool2        A       B         8× 8×16
//! conv3        B       A         8× 8×32
//! relu3        A       B         8× 8×32
//! pool3        B       A         4× 4×32
//! fc           A       B        10
//! softmax      B       A        10
//! ```
//!
//! Each stage is timed with the [`TickSource`]; timings are traced after
//! the run so the hot loops carry no logging.

use crate::kernels;
use crate::scratch::{Buffer, Scratch, StageBuffers};
use crate::timing::{Elapsed, SysTick, TickSource, TimingSample};
use psoc6_chip::cifar10::{CLASS_COUNT, IMAGE_BYTES};
use psoc6_models::cifar10::{Conv1, Conv2, Conv3, Ip1, Pool1, Pool2, Pool3};
use psoc6_models::{Cifar10Model, Image};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span};

/// One operator stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Mean subtraction and requantization of the raw image.
    Preprocess,
    /// First convolution.
    Conv1,
    /// First ReLU.
    Relu1,
    /// First max-pool.
    Pool1,
    /// Second convolution.
    Conv2,
    /// Second ReLU.
    Relu2,
    /// Second max-pool.
    Pool2,
    /// Third convolution.
    Conv3,
    /// Third ReLU.
    Relu3,
    /// Third max-pool.
    Pool3,
    /// Fully-connected classifier.
    FullyConnected,
    /// Softmax over the class logits.
    Softmax,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Self; 12] = [
        Self::Preprocess,
        Self::Conv1,
        Self::Relu1,
        Self::Pool1,
        Self::Conv2,
        Self::Relu2,
        Self::Pool2,
        Self::Conv3,
        Self::Relu3,
        Self::Pool3,
        Self::FullyConnected,
        Self::Softmax,
    ];

    /// Short name used in traces.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Preprocess => "preprocess",
            Self::Conv1 => "conv1",
            Self::Relu1 => "relu1",
            Self::Pool1 => "pool1",
            Self::Conv2 => "conv2",
            Self::Relu2 => "relu2",
            Self::Pool2 => "pool2",
            Self::Conv3 => "conv3",
            Self::Relu3 => "relu3",
            Self::Pool3 => "pool3",
            Self::FullyConnected => "fc",
            Self::Softmax => "softmax",
        }
    }

    /// Console banners printed before and after the stage.
    pub const fn banners(self) -> (&'static str, &'static str) {
        match self {
            Self::Preprocess => ("Input Pre-processing", "Input Pre-processing completed"),
            Self::Conv1 => (
                "Performing first convolution RGB\r\narm_convolve_HWC_q7_RGB()",
                "Convolution RGB completed",
            ),
            Self::Relu1 => ("Performing first arm_relu_q7", "First arm_relu_q7 completed"),
            Self::Pool1 => (
                "Performing first arm_maxpool_q7_HWC",
                "First arm_maxpool_q7_HWC completed",
            ),
            Self::Conv2 => (
                "Performing second convolution\r\narm_convolve_HWC_q7_fast()",
                "Second convolution completed",
            ),
            Self::Relu2 => ("Performing second arm_relu_q7", "Second arm_relu_q7 completed"),
            Self::Pool2 => (
                "Performing second arm_maxpool_q7_HWC",
                "Second arm_maxpool_q7_HWC completed",
            ),
            Self::Conv3 => (
                "Performing third convolution\r\narm_convolve_HWC_q7_fast()",
                "Third convolution completed",
            ),
            Self::Relu3 => ("Performing third arm_relu_q7", "Third arm_relu_q7 completed"),
            Self::Pool3 => (
                "Performing third arm_maxpool_q7_HWC",
                "Third arm_maxpool_q7_HWC completed",
            ),
            Self::FullyConnected => (
                "Performing arm_fully_connected_q7",
                "arm_fully_connected_q7 completed",
            ),
            Self::Softmax => ("Performing arm_softmax_q7", "arm_softmax_q7 completed"),
        }
    }

    /// Buffer this stage writes.
    pub const fn output(self) -> Buffer {
        match self {
            Self::Preprocess
            | Self::Relu1
            | Self::Conv2
            | Self::Pool2
            | Self::Relu3
            | Self::FullyConnected => Buffer::B,
            Self::Conv1
            | Self::Pool1
            | Self::Relu2
            | Self::Conv3
            | Self::Pool3
            | Self::Softmax => Buffer::A,
        }
    }

    /// Buffer this stage reads (the preprocessing stage reads the image).
    pub const fn input(self) -> Buffer {
        self.output().other()
    }

    /// Elements this stage writes.
    pub const fn output_len(self) -> usize {
        match self {
            Self::Preprocess => IMAGE_BYTES,
            Self::Conv1 | Self::Relu1 => Conv1::OUTPUT_LEN,
            Self::Pool1 => Pool1::OUTPUT_LEN,
            Self::Conv2 | Self::Relu2 => Conv2::OUTPUT_LEN,
            Self::Pool2 => Pool2::OUTPUT_LEN,
            Self::Conv3 | Self::Relu3 => Conv3::OUTPUT_LEN,
            Self::Pool3 => Pool3::OUTPUT_LEN,
            Self::FullyConnected | Self::Softmax => Ip1::OUTPUT_LEN,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Timing of one executed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    /// Stage.
    pub stage: Stage,
    /// Raw counter readings.
    pub sample: TimingSample,
}

impl StageTiming {
    /// Reported duration.
    pub fn elapsed(&self) -> Elapsed {
        self.sample.elapsed()
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    /// 1-based run number on this pipeline.
    pub run: u64,
    /// Softmax output per class.
    pub scores: [i8; CLASS_COUNT],
    /// Per-stage timings in execution order.
    pub timings: Vec<StageTiming>,
}

impl PipelineRun {
    /// Highest-scoring class; the lowest index wins ties.
    pub fn top_class(&self) -> usize {
        self.scores
            .iter()
            .enumerate()
            .fold(0, |best, (i, &s)| if s > self.scores[best] { i } else { best })
    }

    /// Number of stages that ran.
    pub fn stages_executed(&self) -> usize {
        self.timings.len()
    }
}

/// The inference engine of the M4.
pub struct InferencePipeline {
    model: Arc<Cifar10Model>,
    scratch: Scratch,
    ticks: Box<dyn TickSource>,
    runs: u64,
}

impl fmt::Debug for InferencePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferencePipeline")
            .field("runs", &self.runs)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

impl InferencePipeline {
    /// Pipeline timed with the emulated SysTick.
    pub fn new(model: Arc<Cifar10Model>) -> Self {
        Self::with_tick_source(model, Box::new(SysTick::new()))
    }

    /// Pipeline timed with a custom tick source.
    pub fn with_tick_source(model: Arc<Cifar10Model>, ticks: Box<dyn TickSource>) -> Self {
        Self {
            model,
            scratch: Scratch::new(),
            ticks,
            runs: 0,
        }
    }

    /// Runs completed so far.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Model parameters.
    pub fn model(&self) -> &Cifar10Model {
        &self.model
    }

    /// Run every stage on `image`.
    pub fn run(&mut self, image: &Image) -> PipelineRun {
        self.run_observed(image, |_, _| {})
    }

    /// Run every stage, handing each stage's output to `observe` once the
    /// stage has finished. Observation happens outside the timed region.
    pub fn run_observed<F>(&mut self, image: &Image, mut observe: F) -> PipelineRun
    where
        F: FnMut(Stage, &[i8]),
    {
        self.runs += 1;
        let mut timings = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            let mark = self.ticks.mark_start();
            self.execute(stage, image);
            let sample = self.ticks.mark_end(mark);
            timings.push(StageTiming { stage, sample });
            observe(stage, &self.scratch.buffer(stage.output())[..stage.output_len()]);
        }

        let mut scores = [0i8; CLASS_COUNT];
        scores.copy_from_slice(&self.scratch.buffer(Stage::Softmax.output())[..CLASS_COUNT]);

        let span = info_span!("pipeline", run = self.runs);
        let _enter = span.enter();
        for t in &timings {
            debug!(stage = t.stage.label(), "{}", t.elapsed());
        }
        debug!("scores {:?}", scores);

        PipelineRun {
            run: self.runs,
            scores,
            timings,
        }
    }

    fn execute(&mut self, stage: Stage, image: &Image) {
        let model = &*self.model;
        let StageBuffers { src, dst, col } = self.scratch.stage(stage.input());
        let len = stage.output_len();

        match stage {
            Stage::Preprocess => kernels::preprocess(image.as_bytes(), &model.input, dst),
            Stage::Conv1 => kernels::convolve_hwc_q7(src, &model.conv1, col, dst),
            Stage::Conv2 => kernels::convolve_hwc_q7(src, &model.conv2, col, dst),
            Stage::Conv3 => kernels::convolve_hwc_q7(src, &model.conv3, col, dst),
            Stage::Relu1 | Stage::Relu2 | Stage::Relu3 => {
                kernels::relu_q7(&src[..len], &mut dst[..len]);
            }
            Stage::Pool1 => kernels::maxpool_hwc_q7(src, &model.pool1, dst),
            Stage::Pool2 => kernels::maxpool_hwc_q7(src, &model.pool2, dst),
            Stage::Pool3 => kernels::maxpool_hwc_q7(src, &model.pool3, dst),
            Stage::FullyConnected => kernels::fully_connected_q7(src, &model.ip1, col, dst),
            Stage::Softmax => kernels::softmax_q7(&src[..len], &mut dst[..len]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_alternate_buffers() {
        for pair in Stage::ALL.windows(2) {
            assert_eq!(pair[1].input(), pair[0].output());
            assert_ne!(pair[1].output(), pair[1].input());
        }
        assert_eq!(Stage::Preprocess.output(), Buffer::B);
        assert_eq!(Stage::Softmax.output(), Buffer::A);
    }

    #[test]
    fn stage_output_lengths_shrink_to_classes() {
        assert_eq!(Stage::Conv1.output_len(), 32 * 32 * 32);
        assert_eq!(Stage::Pool1.output_len(), 16 * 16 * 32);
        assert_eq!(Stage::Pool3.output_len(), 512);
        assert_eq!(Stage::Softmax.output_len(), 10);
    }

    #[test]
    fn run_executes_every_stage_in_order() {
        let mut pipeline = InferencePipeline::new(Arc::new(Cifar10Model::synthetic(5)));
        let mut seen = Vec::new();
        let run = pipeline.run_observed(&Image::sample(), |stage, out| {
            assert_eq!(out.len(), stage.output_len());
            seen.push(stage);
        });
        assert_eq!(seen, Stage::ALL.to_vec());
        assert_eq!(run.stages_executed(), 12);
        assert_eq!(run.run, 1);
        assert_eq!(pipeline.runs(), 1);
    }

    #[test]
    fn relu_outputs_are_non_negative() {
        let mut pipeline = InferencePipeline::new(Arc::new(Cifar10Model::synthetic(9)));
        pipeline.run_observed(&Image::sample(), |stage, out| {
            if matches!(stage, Stage::Relu1 | Stage::Relu2 | Stage::Relu3 | Stage::Pool3) {
                assert!(out.iter().all(|&v| v >= 0), "{stage} produced a negative value");
            }
        });
    }

    #[test]
    fn top_class_prefers_lowest_index_on_ties() {
        let run = PipelineRun {
            run: 1,
            scores: [3, 9, 9, 0, 0, 0, 0, 0, 0, 0],
            timings: Vec::new(),
        };
        assert_eq!(run.top_class(), 1);
    }
}
