//! Ping-pong scratch buffers.
//!
//! Two activation buffers, `A` and `B`, each sized to the largest
//! activation map (conv1's 32×32×32 output), plus a q15 column buffer for
//! im2col and the dense layer's widened input. A stage borrows one buffer
//! to read and the other to write, so the borrow checker rules out a stage
//! reading and writing the same buffer.

use psoc6_chip::cifar10::{COL_BUFFER_LEN, SCRATCH_BYTES};
use std::fmt;

/// One of the two activation buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Buffer {
    /// First buffer.
    A,
    /// Second buffer.
    B,
}

impl Buffer {
    /// The other buffer.
    pub const fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::B => "B",
        })
    }
}

/// Borrowed views for one stage.
pub struct StageBuffers<'a> {
    /// Buffer the stage reads.
    pub src: &'a [i8],
    /// Buffer the stage writes.
    pub dst: &'a mut [i8],
    /// Column buffer.
    pub col: &'a mut [i16],
}

/// The scratch memory of the inference core.
pub struct Scratch {
    a: Box<[i8; SCRATCH_BYTES]>,
    b: Box<[i8; SCRATCH_BYTES]>,
    col: Box<[i16; COL_BUFFER_LEN]>,
}

impl fmt::Debug for Scratch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scratch")
            .field("buffer_bytes", &SCRATCH_BYTES)
            .field("col_len", &COL_BUFFER_LEN)
            .finish()
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

impl Scratch {
    /// Zeroed buffers.
    pub fn new() -> Self {
        Self {
            a: Box::new([0; SCRATCH_BYTES]),
            b: Box::new([0; SCRATCH_BYTES]),
            col: Box::new([0; COL_BUFFER_LEN]),
        }
    }

    /// Read `src`, write the other buffer.
    pub fn stage(&mut self, src: Buffer) -> StageBuffers<'_> {
        let (src, dst) = match src {
            Buffer::A => (&self.a[..], &mut self.b[..]),
            Buffer::B => (&self.b[..], &mut self.a[..]),
        };
        StageBuffers {
            src,
            dst,
            col: &mut self.col[..],
        }
    }

    /// Write-only access to one buffer, for the first stage.
    pub fn buffer_mut(&mut self, which: Buffer) -> &mut [i8] {
        match which {
            Buffer::A => &mut self.a[..],
            Buffer::B => &mut self.b[..],
        }
    }

    /// Read access to one buffer.
    pub fn buffer(&self, which: Buffer) -> &[i8] {
        match which {
            Buffer::A => &self.a[..],
            Buffer::B => &self.b[..],
        }
    }
}
