//! The two simulated cores and their wiring.
//!
//! ```text
//!  M0+ thread (caller)          cm4-irq thread            cm4-main thread
//!  ───────────────────          ──────────────            ───────────────
//!  console bytes                Endpoint::run             Inbox::wait_into
//!  LineDiscipline ── ENTER ──►  dispatcher ── copy ──►    sentinel check
//!  Sender::send_image           release ─┐                InferencePipeline
//!        ▲                               │                console report
//!        └──────── ready flag ◄──────────┘
//! ```
//!
//! Dropping the M0+ side drops the pipe sender; the interrupt thread sees
//! the disconnect, closes the inbox and the polling loop drains and exits.

use crate::camera::ImageSource;
use crate::config::RuntimeConfig;
use crate::console::{render_run, Console, KeyAction, LineDiscipline, MISSING_INPUT, PROMPT, STARTUP_BANNER};
use crate::dispatch::{dispatcher, Inbox, Pending};
use crate::error::{DriverError, Result};
use crate::ipc::{self, Direction, Sender};
use crate::pipeline::{InferencePipeline, PipelineRun};
use psoc6_models::{Cifar10Model, Image};
use std::io::Read;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the inference core did with one delivered image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The pipeline ran.
    Classified(PipelineRun),
    /// The image's first byte was zero; the pipeline was skipped.
    MissingInput,
}

impl RunOutcome {
    /// Scores, if the pipeline ran.
    pub fn scores(&self) -> Option<&[i8]> {
        match self {
            Self::Classified(run) => Some(&run.scores),
            Self::MissingInput => None,
        }
    }
}

/// Counters kept by the inference core's polling loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cm4Stats {
    /// Pipeline runs.
    pub classified: u64,
    /// Images rejected by the sentinel check.
    pub missing_input: u64,
}

/// The M4: polling loop plus inference pipeline.
pub struct Cm4Core {
    inbox: Arc<Inbox>,
    pipeline: InferencePipeline,
    console: Console,
    missing_input_delay: Duration,
    verbose: bool,
    outcomes: Option<mpsc::Sender<RunOutcome>>,
    stats: Cm4Stats,
}

impl std::fmt::Debug for Cm4Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cm4Core")
            .field("pipeline", &self.pipeline)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Cm4Core {
    /// Core reading from `inbox`.
    pub fn new(
        inbox: Arc<Inbox>,
        pipeline: InferencePipeline,
        console: Console,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            inbox,
            pipeline,
            console,
            missing_input_delay: config.missing_input_delay,
            verbose: config.verbose,
            outcomes: None,
            stats: Cm4Stats::default(),
        }
    }

    /// Publish every outcome on `tx`.
    #[must_use]
    pub fn with_outcomes(mut self, tx: mpsc::Sender<RunOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> Cm4Stats {
        self.stats
    }

    /// Handle one local image copy: sentinel check, pipeline, console report.
    ///
    /// A zero first byte is taken to mean no image was sent. A genuinely
    /// black image is rejected the same way.
    ///
    /// # Errors
    ///
    /// Returns error if the console cannot be written.
    pub fn process(&mut self, image: &Image) -> Result<RunOutcome> {
        if image.sentinel() == 0 {
            warn!("CM4: image sentinel is zero, pipeline skipped");
            self.stats.missing_input += 1;
            if !self.missing_input_delay.is_zero() {
                thread::sleep(self.missing_input_delay);
            }
            self.console.put_str(MISSING_INPUT)?;
            self.console.put_str(PROMPT)?;
            return Ok(RunOutcome::MissingInput);
        }

        let run = self.pipeline.run(image);
        self.stats.classified += 1;
        info!(
            run = run.run,
            top_class = run.top_class(),
            "CM4: classification complete"
        );
        self.console.put_str(&render_run(&run, self.verbose))?;
        Ok(RunOutcome::Classified(run))
    }

    /// Poll the inbox until it is closed and drained.
    ///
    /// # Errors
    ///
    /// Returns error if the inbox lock is poisoned or the console fails.
    pub fn run(mut self) -> Result<Cm4Stats> {
        info!("CM4: polling loop started");
        let mut local = Image::zeroed();
        loop {
            match self.inbox.wait_into(&mut local)? {
                Pending::Closed => break,
                Pending::Image => {
                    let outcome = self.process(&local)?;
                    if let Some(tx) = &self.outcomes {
                        // A dropped receiver only means nobody is listening.
                        let _ = tx.send(outcome);
                    }
                }
            }
        }
        info!(
            classified = self.stats.classified,
            missing_input = self.stats.missing_input,
            "CM4: polling loop stopped"
        );
        Ok(self.stats)
    }
}

/// The M0+: console input, image source and the sending end of the pipe.
pub struct Cm0Core {
    sender: Sender,
    camera: Box<dyn ImageSource>,
    console: Console,
    discipline: LineDiscipline,
}

impl std::fmt::Debug for Cm0Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cm0Core")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl Cm0Core {
    /// Core sending frames from `camera` through `sender`.
    pub fn new(sender: Sender, camera: Box<dyn ImageSource>, console: Console) -> Self {
        Self {
            sender,
            camera,
            console,
            discipline: LineDiscipline::new(),
        }
    }

    /// Sending end of the pipe.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Print the start-up banner and the first prompt.
    ///
    /// # Errors
    ///
    /// Returns error if the console cannot be written.
    pub fn start(&self) -> Result<()> {
        self.console.put_str(STARTUP_BANNER)
    }

    /// Capture a frame and send it once the slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::PeerDisconnected`] if the inference core is
    /// gone, or the camera's error.
    pub fn trigger(&mut self) -> Result<()> {
        if !self.sender.wait_ready() {
            return Err(DriverError::PeerDisconnected {
                direction: self.sender.direction(),
            });
        }
        let image = self.camera.capture()?;
        debug!("CM0+: sending image, sentinel {}", image.sentinel());
        self.sender.send_image(image)
    }

    /// Feed one console byte. Returns whether it triggered a send.
    ///
    /// # Errors
    ///
    /// See [`Cm0Core::trigger`].
    pub fn handle_byte(&mut self, byte: u8) -> Result<bool> {
        let action = self.discipline.feed(byte);
        self.console.put_bytes(&action.echo())?;
        if action == KeyAction::Submit {
            self.trigger()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Read console bytes until end of input. A byte is only taken while
    /// the pipe is ready, as the UART FIFO holds input until release.
    /// Returns the number of images sent.
    ///
    /// # Errors
    ///
    /// Returns error on a read failure or a lost peer.
    pub fn run<R: Read>(&mut self, reader: R) -> Result<u64> {
        let mut sent = 0;
        let mut bytes = reader.bytes();
        loop {
            if !self.sender.wait_ready() {
                return Err(DriverError::PeerDisconnected {
                    direction: self.sender.direction(),
                });
            }
            let Some(byte) = bytes.next() else { break };
            if self.handle_byte(byte?)? {
                sent += 1;
            }
        }
        info!("CM0+: console input ended after {sent} sends");
        Ok(sent)
    }
}

/// Totals reported by [`RunningSystem::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Messages the M0+ sent.
    pub sent: u64,
    /// Messages the M4 released.
    pub released: u64,
    /// Images that replaced one the polling loop had not yet taken.
    pub overwritten: u64,
    /// Inference core counters.
    pub cm4: Cm4Stats,
}

/// Builder for a running pair of cores.
#[derive(Debug)]
pub struct DualCoreSystem {
    model: Arc<Cifar10Model>,
    console: Console,
    config: RuntimeConfig,
}

impl DualCoreSystem {
    /// System running `model`, printing to `console`.
    pub fn new(model: Arc<Cifar10Model>, console: Console, config: RuntimeConfig) -> Self {
        Self {
            model,
            console,
            config,
        }
    }

    /// Wire the pipe and spawn the M4 threads.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] if a thread cannot be spawned.
    pub fn start<C: ImageSource + 'static>(self, camera: C) -> Result<RunningSystem> {
        let Self {
            model,
            console,
            config,
        } = self;

        let (sender, mut endpoint) = ipc::pipe(Direction::Cm0ToCm4, &config);
        let inbox = Arc::new(Inbox::new());
        endpoint.register_callback(
            Direction::Cm0ToCm4.client_id(),
            dispatcher(Arc::clone(&inbox)),
        );

        let mut cm4 = Cm4Core::new(
            Arc::clone(&inbox),
            InferencePipeline::new(model),
            console.clone(),
            &config,
        );
        let outcomes = if config.report_outcomes {
            let (tx, rx) = mpsc::channel();
            cm4 = cm4.with_outcomes(tx);
            Some(rx)
        } else {
            None
        };

        let irq_inbox = Arc::clone(&inbox);
        let irq = thread::Builder::new()
            .name("cm4-irq".into())
            .spawn(move || {
                endpoint.run();
                irq_inbox.close();
            })?;
        let main = thread::Builder::new()
            .name("cm4-main".into())
            .spawn(move || cm4.run())?;

        info!("Dual-core system started");
        Ok(RunningSystem {
            cm0: Cm0Core::new(sender, Box::new(camera), console),
            inbox,
            irq,
            main,
            outcomes,
        })
    }
}

/// Handle to the started system. The caller's thread plays the M0+.
#[derive(Debug)]
pub struct RunningSystem {
    cm0: Cm0Core,
    inbox: Arc<Inbox>,
    irq: JoinHandle<()>,
    main: JoinHandle<Result<Cm4Stats>>,
    outcomes: Option<mpsc::Receiver<RunOutcome>>,
}

impl RunningSystem {
    /// The M0+ core.
    pub fn cm0(&mut self) -> &mut Cm0Core {
        &mut self.cm0
    }

    /// Take the outcome stream; `None` unless outcomes were enabled or if
    /// already taken.
    pub fn take_outcomes(&mut self) -> Option<mpsc::Receiver<RunOutcome>> {
        self.outcomes.take()
    }

    /// Print the banner and drive the M0+ from `reader` until it ends.
    ///
    /// # Errors
    ///
    /// See [`Cm0Core::run`].
    pub fn run_console<R: Read>(&mut self, reader: R) -> Result<u64> {
        self.cm0.start()?;
        self.cm0.run(reader)
    }

    /// Drop the sender and wait for the M4 to drain and stop.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CoreFault`] if an M4 thread panicked, or the
    /// polling loop's own error.
    pub fn shutdown(self) -> Result<SessionSummary> {
        let Self {
            cm0,
            inbox,
            irq,
            main,
            ..
        } = self;
        let counters = cm0.sender.counters();
        drop(cm0);

        irq.join()
            .map_err(|_| DriverError::core_fault("CM4", "interrupt thread panicked"))?;
        // read after the join so a release still in flight is counted
        let (sent, released) = counters.counts();
        let cm4 = main
            .join()
            .map_err(|_| DriverError::core_fault("CM4", "polling thread panicked"))??;
        let (_, overwritten) = inbox.stats();

        info!(sent, released, classified = cm4.classified, "Dual-core system stopped");
        Ok(SessionSummary {
            sent,
            released,
            overwritten,
            cm4,
        })
    }
}
