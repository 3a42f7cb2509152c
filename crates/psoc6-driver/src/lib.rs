//! Dual-core runtime for the PSoC 6 CIFAR-10 image classifier.
//!
//! The M0+ owns the console and the image source, the M4 owns the q7
//! inference pipeline. An image crosses the core boundary through a
//! single-slot pipe, is copied into M4-local memory by the receive
//! callback and classified by the polling loop.
//!
//! # Layers
//!
//! ```text
//! Message channel  ipc       one slot per direction, ready flag, release
//! Bottom half      dispatch  copy-in + pending flag
//! Pipeline         pipeline  12 timed q7 stages on ping-pong scratch
//! Timing           timing    SysTick down-counter + rollover count
//! Cores            system    M0+ console side, M4 irq + polling threads
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use psoc6_driver::{Console, DualCoreSystem, RuntimeConfig, StaticCamera};
//! use psoc6_models::Cifar10Model;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = Arc::new(Cifar10Model::synthetic(1));
//! let mut system = DualCoreSystem::new(model, Console::stdout(), RuntimeConfig::default())
//!     .start(StaticCamera::sample())?;
//!
//! // ENTER on stdin sends the sample frame; EOF shuts down.
//! system.run_console(std::io::stdin().lock())?;
//! let summary = system.shutdown()?;
//! println!("{} images classified", summary.cm4.classified);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod camera;
pub mod config;
pub mod console;
pub mod dispatch;
mod error;
pub mod ipc;
pub mod kernels;
pub mod pipeline;
pub mod scratch;
mod system;
pub mod timing;

pub use camera::{FrameSequence, ImageSource, StaticCamera};
pub use config::RuntimeConfig;
pub use console::{Capture, Console, LineDiscipline};
pub use dispatch::{dispatcher, Inbox, Pending};
pub use error::{DriverError, Result};
pub use ipc::{pipe, Direction, Endpoint, Message, PipeCounters, SlotState};
pub use pipeline::{InferencePipeline, PipelineRun, Stage, StageTiming};
pub use system::{
    Cm0Core, Cm4Core, Cm4Stats, DualCoreSystem, RunOutcome, RunningSystem, SessionSummary,
};
pub use timing::{elapsed_ns, Elapsed, Mark, SysTick, TickSource, TimingSample};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Console, DriverError, DualCoreSystem, Elapsed, InferencePipeline, PipelineRun, Result,
        RunOutcome, RuntimeConfig, Stage, StaticCamera,
    };
}
