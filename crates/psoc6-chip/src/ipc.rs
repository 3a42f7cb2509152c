//! IPC pipe constants and the packed message layout.
//!
//! The M0+ and M4 talk through the PDL "CyPipe": one IPC channel per
//! endpoint, one message slot per direction, a release interrupt back to the
//! sender once the receiver's callback has run.
//!
//! ```text
//! offset  size  field
//! ──────  ────  ──────────────────────────────────────────
//!   0      1    client_id    0 = M0+ → M4, 1 = M4 → M0+
//!   1      1    user_code    reserved, always 0
//!   2      2    intr_mask    forwarded to the notify primitive (LE)
//!   4     4|8   image_ref    address of the sender's image buffer (LE)
//! ```
//!
//! The struct is `packed, aligned(4)`, so the total size is
//! `4 + pointer width` bytes.

/// Client id used by the M0+ when sending to the M4.
pub const CLIENT_CM0_TO_CM4: u8 = 0;

/// Client id used by the M4 when sending to the M0+.
pub const CLIENT_CM4_TO_CM0: u8 = 1;

/// PDL endpoint address of the M0+ side of the pipe.
pub const EP_CYPIPE_CM0_ADDR: u32 = 0;

/// PDL endpoint address of the M4 side of the pipe.
pub const EP_CYPIPE_CM4_ADDR: u32 = 1;

/// Interrupt used by pipe endpoint 0.
pub const INTR_CYPIPE_EP0: u16 = 1;

/// Interrupt used by pipe endpoint 1.
pub const INTR_CYPIPE_EP1: u16 = 2;

/// `CY_SYS_CYPIPE_INTR_MASK`: both pipe interrupts.
pub const CYPIPE_INTR_MASK: u16 = (1 << INTR_CYPIPE_EP0) | (1 << INTR_CYPIPE_EP1);

/// Size of the fixed header word (client id, user code, interrupt mask).
pub const HEADER_BYTES: usize = 4;

/// Alignment of the packed message struct.
pub const MESSAGE_ALIGN: usize = 4;

/// Native address width of the platform carrying the image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerWidth {
    /// 32-bit Cortex-M address space (the real target).
    #[default]
    Bits32,
    /// 64-bit host address space.
    Bits64,
}

impl PointerWidth {
    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Pointer width of the machine running this code.
    #[must_use]
    pub const fn native() -> Self {
        if usize::BITS == 64 {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }
}

/// Total size of one message for the given pointer width.
#[must_use]
pub const fn message_size(width: PointerWidth) -> usize {
    HEADER_BYTES + width.bytes()
}

/// The header word of a pipe message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    /// Sender/channel identifier.
    pub client_id: u8,
    /// User-defined opcode, currently always 0.
    pub user_code: u8,
    /// Notification mask handed to the notify primitive.
    pub intr_mask: u16,
}

impl MessageHeader {
    /// Header of the image message the M0+ sends to the M4.
    #[must_use]
    pub const fn cm0_to_cm4() -> Self {
        Self {
            client_id: CLIENT_CM0_TO_CM4,
            user_code: 0,
            intr_mask: CYPIPE_INTR_MASK,
        }
    }
}

/// Encode a message into its packed little-endian wire form.
///
/// Returns `None` if `image_ref` does not fit the requested pointer width.
#[must_use]
pub fn encode(header: MessageHeader, image_ref: u64, width: PointerWidth) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(message_size(width));
    out.push(header.client_id);
    out.push(header.user_code);
    out.extend_from_slice(&header.intr_mask.to_le_bytes());
    match width {
        PointerWidth::Bits32 => {
            let addr = u32::try_from(image_ref).ok()?;
            out.extend_from_slice(&addr.to_le_bytes());
        }
        PointerWidth::Bits64 => out.extend_from_slice(&image_ref.to_le_bytes()),
    }
    Some(out)
}

/// Decode a packed message. Returns `None` if `bytes` has the wrong length.
#[must_use]
pub fn decode(bytes: &[u8], width: PointerWidth) -> Option<(MessageHeader, u64)> {
    if bytes.len() != message_size(width) {
        return None;
    }
    let header = MessageHeader {
        client_id: bytes[0],
        user_code: bytes[1],
        intr_mask: u16::from_le_bytes([bytes[2], bytes[3]]),
    };
    let addr = &bytes[HEADER_BYTES..];
    let image_ref = match width {
        PointerWidth::Bits32 => u64::from(u32::from_le_bytes(addr.try_into().ok()?)),
        PointerWidth::Bits64 => u64::from_le_bytes(addr.try_into().ok()?),
    };
    Some((header, image_ref))
}
