//! The shared UART console.
//!
//! Both cores print to the same console. The M0+ owns the input side and
//! its line discipline; the M4 prints stage reports and scores.

use crate::error::{DriverError, Result};
use crate::pipeline::{PipelineRun, StageTiming};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Banner printed by the M0+ at start-up, ending in the first prompt.
pub const STARTUP_BANNER: &str = "\r\n---- IPC Pipes Code Example (Image) --------\r\n\
                                  \r\n---- Press ENTER to send 32x32 RGB image ---\r\n\
                                  \r\n--------------------------------------------\n\n\r> ";

/// Input prompt.
pub const PROMPT: &str = "> ";

/// Printed when a message arrives without an image.
pub const MISSING_INPUT: &str = "\r\n\n\nERROR!\r\n\n";

/// Printed after the score list.
pub const SCORES_TRAILER: &str = "\r\n\n> ";

/// Handle to the console output, shared between cores.
#[derive(Clone)]
pub struct Console {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    /// Console writing to `out`.
    pub fn new<W: Write + Send + 'static>(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    /// Console on the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Console that discards everything.
    pub fn sink() -> Self {
        Self::new(io::sink())
    }

    /// Console writing into memory, plus a handle to read it back.
    pub fn capture() -> (Self, Capture) {
        let capture = Capture::default();
        (Self::new(capture.clone()), capture)
    }

    /// Write `s` and flush.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or another writer panicked.
    pub fn put_str(&self, s: &str) -> Result<()> {
        self.put_bytes(s.as_bytes())
    }

    /// Write raw bytes and flush.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails or another writer panicked.
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| DriverError::core_fault("UART", "console lock poisoned"))?;
        out.write_all(bytes)?;
        out.flush()?;
        Ok(())
    }
}

/// In-memory console contents.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        self.bytes
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "capture lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What a received byte asks the M0+ to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Line terminator: send the current image.
    Submit,
    /// Erase the last echoed character.
    Erase,
    /// Echo the byte.
    Echo(u8),
    /// Swallow the byte (the `\n` of a `\r\n` pair).
    Ignore,
}

impl KeyAction {
    /// Bytes written back to the terminal.
    pub fn echo(self) -> Vec<u8> {
        match self {
            Self::Submit => b"\n\r".to_vec(),
            Self::Erase => b"\x08 \x08".to_vec(),
            Self::Echo(byte) => vec![byte],
            Self::Ignore => Vec::new(),
        }
    }
}

/// M0+ input handling: `\r` submits, `\b` erases, anything else echoes.
///
/// A bare `\n` also submits, for hosts whose terminals send only line
/// feeds; the `\n` of a `\r\n` pair is swallowed.
#[derive(Debug, Clone, Default)]
pub struct LineDiscipline {
    after_cr: bool,
}

impl LineDiscipline {
    /// Fresh discipline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one input byte.
    pub fn feed(&mut self, byte: u8) -> KeyAction {
        let after_cr = std::mem::replace(&mut self.after_cr, byte == b'\r');
        match byte {
            b'\r' => KeyAction::Submit,
            b'\n' if after_cr => KeyAction::Ignore,
            b'\n' => KeyAction::Submit,
            0x08 => KeyAction::Erase,
            other => KeyAction::Echo(other),
        }
    }
}

/// Banner, timing line and completion banner for one stage.
pub fn render_stage(timing: &StageTiming) -> String {
    let (performing, completed) = timing.stage.banners();
    format!(
        "{performing}\r\n{}\r\n{completed}\r\n\n\n",
        timing.elapsed()
    )
}

/// Score lines (`i: v`) followed by the prompt.
pub fn render_scores(scores: &[i8]) -> String {
    let mut out = String::new();
    for (i, score) in scores.iter().enumerate() {
        let _ = write!(out, "{i}: {score}\r\n");
    }
    out.push_str(SCORES_TRAILER);
    out
}

/// Full console report of a run; stage banners only when `verbose`.
pub fn render_run(run: &PipelineRun, verbose: bool) -> String {
    let mut out = String::new();
    if verbose {
        for timing in &run.timings {
            out.push_str(&render_stage(timing));
        }
    }
    out.push_str(&render_scores(&run.scores));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use crate::timing::TimingSample;

    #[test]
    fn line_discipline_matches_firmware() {
        let mut ld = LineDiscipline::new();
        assert_eq!(ld.feed(b'a'), KeyAction::Echo(b'a'));
        assert_eq!(ld.feed(0x08), KeyAction::Erase);
        assert_eq!(ld.feed(b'\r'), KeyAction::Submit);
        assert_eq!(KeyAction::Submit.echo(), b"\n\r");
        assert_eq!(KeyAction::Erase.echo(), b"\x08 \x08");
    }

    #[test]
    fn crlf_submits_once() {
        let mut ld = LineDiscipline::new();
        assert_eq!(ld.feed(b'\r'), KeyAction::Submit);
        assert_eq!(ld.feed(b'\n'), KeyAction::Ignore);
        assert_eq!(ld.feed(b'\n'), KeyAction::Submit);
    }

    #[test]
    fn capture_collects_output() {
        let (console, capture) = Console::capture();
        console.put_str(PROMPT).unwrap();
        console.put_bytes(b"x").unwrap();
        assert_eq!(capture.contents(), "> x");
    }

    #[test]
    fn scores_render_as_index_value_pairs() {
        let text = render_scores(&[127, 0, -3]);
        assert_eq!(text, "0: 127\r\n1: 0\r\n2: -3\r\n\r\n\n> ");
    }

    #[test]
    fn stage_report_wraps_timing_line() {
        let timing = StageTiming {
            stage: Stage::Relu1,
            sample: TimingSample {
                start: 1000,
                end: 900,
                rollovers: 0,
            },
        };
        assert_eq!(
            render_stage(&timing),
            "Performing first arm_relu_q7\r\nTotal time in nano seconds = 12500 \r\nFirst arm_relu_q7 completed\r\n\n\n"
        );
    }

    #[test]
    fn banner_ends_with_prompt() {
        assert!(STARTUP_BANNER.contains("Press ENTER to send 32x32 RGB image"));
        assert!(STARTUP_BANNER.ends_with(PROMPT));
    }
}
