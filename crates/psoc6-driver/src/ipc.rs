//! The cross-core message pipe.
//!
//! One [`pipe`] is one direction between the cores: a single message slot,
//! a producer-side ready flag and a release signal that comes back from the
//! consumer once its callback has run.
//!
//! ```text
//!   Sender::send ──► [slot, capacity 1] ──► Endpoint::service
//!        ▲                                        │ callback(client_id)
//!        └──────────── release ◄──────────────────┘
//! ```
//!
//! Per direction the slot moves `Idle → Sent → Released → Sent → ...`.
//! `Idle` only exists before the first send; after that `Released` is the
//! idle state, with the ready flag set and no reference outstanding. A
//! send while the slot is `Sent` is rejected with
//! [`DriverError::SlotBusy`]; nothing is queued. There is no timeout: if
//! the consumer never releases, the direction stays blocked.
//!
//! Messages carry an owned [`Image`] instead of an address. The header and
//! a per-pipe numeric reference travel in the packed wire layout, which the
//! endpoint decodes with its own pointer width before dispatching.

use crate::config::RuntimeConfig;
use crate::error::{DriverError, Result};
use psoc6_chip::ipc::{
    self, MessageHeader, PointerWidth, CLIENT_CM0_TO_CM4, CLIENT_CM4_TO_CM0, EP_CYPIPE_CM0_ADDR,
    EP_CYPIPE_CM4_ADDR,
};
use psoc6_models::Image;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvError, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Direction of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// M0+ (console side) to M4 (inference side).
    Cm0ToCm4,
    /// M4 back to M0+.
    Cm4ToCm0,
}

impl Direction {
    /// Client id carried by messages in this direction.
    pub const fn client_id(self) -> u8 {
        match self {
            Self::Cm0ToCm4 => CLIENT_CM0_TO_CM4,
            Self::Cm4ToCm0 => CLIENT_CM4_TO_CM0,
        }
    }

    /// PDL address of the endpoint that receives this direction.
    pub const fn endpoint_addr(self) -> u32 {
        match self {
            Self::Cm0ToCm4 => EP_CYPIPE_CM4_ADDR,
            Self::Cm4ToCm0 => EP_CYPIPE_CM0_ADDR,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cm0ToCm4 => f.write_str("CM0+ -> CM4"),
            Self::Cm4ToCm0 => f.write_str("CM4 -> CM0+"),
        }
    }
}

/// Slot state of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Nothing sent yet.
    Idle = 0,
    /// A message is outstanding; the ready flag is clear.
    Sent = 1,
    /// The consumer released the last message; the ready flag is set and
    /// the slot accepts the next send, as in `Idle`.
    Released = 2,
}

impl SlotState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Sent,
            2 => Self::Released,
            _ => Self::Idle,
        }
    }
}

/// One pipe message: the header word plus the image it hands over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    image: Option<Image>,
}

impl Message {
    /// Message carrying `image`.
    pub fn new(header: MessageHeader, image: Image) -> Self {
        Self {
            header,
            image: Some(image),
        }
    }

    /// Message with a null image reference.
    pub fn without_image(header: MessageHeader) -> Self {
        Self {
            header,
            image: None,
        }
    }

    /// Header word.
    pub fn header(&self) -> MessageHeader {
        self.header
    }

    /// Carried image, `None` for a null reference.
    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

struct Envelope {
    wire: Vec<u8>,
    image: Option<Image>,
    on_release: Option<ReleaseFn>,
}

#[derive(Debug)]
struct Slot {
    direction: Direction,
    state: AtomicU8,
    image_ref: AtomicU64,
    next_ref: AtomicU64,
    endpoint_alive: AtomicBool,
    sent: AtomicU64,
    released: AtomicU64,
}

impl Slot {
    fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }

    fn release(&self, image_ref: u64) {
        // Clear the reference before the ready flag becomes visible.
        let _ = self
            .image_ref
            .compare_exchange(image_ref, 0, Ordering::AcqRel, Ordering::Acquire);
        self.released.fetch_add(1, Ordering::Release);
        self.state.store(SlotState::Released as u8, Ordering::Release);
    }
}

/// Create one pipe direction.
pub fn pipe(direction: Direction, config: &RuntimeConfig) -> (Sender, Endpoint) {
    let (tx, rx) = mpsc::sync_channel(1);
    let slot = Arc::new(Slot {
        direction,
        state: AtomicU8::new(SlotState::Idle as u8),
        image_ref: AtomicU64::new(0),
        next_ref: AtomicU64::new(1),
        endpoint_alive: AtomicBool::new(true),
        sent: AtomicU64::new(0),
        released: AtomicU64::new(0),
    });
    debug!(
        "Pipe {direction} created: endpoint {}, {}-byte messages",
        direction.endpoint_addr(),
        ipc::message_size(config.pointer_width)
    );
    (
        Sender {
            slot: Arc::clone(&slot),
            tx,
            width: config.pointer_width,
            notify_mask: config.notify_mask,
        },
        Endpoint {
            slot,
            rx,
            width: config.pointer_width,
            callbacks: HashMap::new(),
        },
    )
}

/// Producer side of a pipe.
pub struct Sender {
    slot: Arc<Slot>,
    tx: SyncSender<Envelope>,
    width: PointerWidth,
    notify_mask: u16,
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("direction", &self.slot.direction)
            .field("state", &self.slot.state())
            .finish_non_exhaustive()
    }
}

impl Sender {
    /// Direction this sender feeds.
    pub fn direction(&self) -> Direction {
        self.slot.direction
    }

    /// Ready flag: `true` unless a message is outstanding.
    pub fn is_ready(&self) -> bool {
        self.slot.state() != SlotState::Sent
    }

    /// Spin until the ready flag is set. Returns `false` if the endpoint
    /// went away while the message was outstanding.
    pub fn wait_ready(&self) -> bool {
        while !self.is_ready() {
            if !self.peer_alive() {
                return false;
            }
            std::thread::yield_now();
        }
        true
    }

    /// Current slot state.
    pub fn state(&self) -> SlotState {
        self.slot.state()
    }

    /// Reference of the outstanding message, `None` once released.
    pub fn outstanding_ref(&self) -> Option<u64> {
        match self.slot.image_ref.load(Ordering::Acquire) {
            0 => None,
            r => Some(r),
        }
    }

    /// Whether the consuming endpoint still exists.
    pub fn peer_alive(&self) -> bool {
        self.slot.endpoint_alive.load(Ordering::Acquire)
    }

    /// Messages accepted and messages released so far.
    pub fn counts(&self) -> (u64, u64) {
        self.counters().counts()
    }

    /// Handle on this pipe's counters that stays valid after the sender
    /// is dropped.
    pub fn counters(&self) -> PipeCounters {
        PipeCounters {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Header for this direction with the configured notification mask.
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            client_id: self.slot.direction.client_id(),
            user_code: 0,
            intr_mask: self.notify_mask,
        }
    }

    /// Hand `image` to the peer with this direction's header.
    ///
    /// # Errors
    ///
    /// See [`Sender::send`].
    pub fn send_image(&self, image: Image) -> Result<()> {
        self.send(Message::new(self.header(), image))
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::SlotBusy`] if the previous message has not
    /// been released, [`DriverError::PeerDisconnected`] if the endpoint is
    /// gone, or [`DriverError::InvalidState`] if the pipe's next reference
    /// no longer fits the configured pointer width.
    pub fn send(&self, message: Message) -> Result<()> {
        self.send_inner(message, None)
    }

    /// Send a message and run `on_release` once the consumer releases it.
    ///
    /// # Errors
    ///
    /// See [`Sender::send`].
    pub fn send_with_release<F>(&self, message: Message, on_release: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send_inner(message, Some(Box::new(on_release)))
    }

    fn send_inner(&self, message: Message, on_release: Option<ReleaseFn>) -> Result<()> {
        let direction = self.slot.direction;

        // Ready flag gate: clear it, or reject.
        let prev = self.slot.state.load(Ordering::Acquire);
        if prev == SlotState::Sent as u8
            || self
                .slot
                .state
                .compare_exchange(prev, SlotState::Sent as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            debug!("Pipe {direction}: send rejected, slot busy");
            return Err(DriverError::SlotBusy { direction });
        }

        let image_ref = if message.image.is_some() {
            self.slot.next_ref.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        let Some(wire) = ipc::encode(message.header, image_ref, self.width) else {
            self.slot.state.store(prev, Ordering::Release);
            return Err(DriverError::invalid_state(format!(
                "pipe {direction}: reference {image_ref:#x} does not fit a {}-byte address",
                self.width.bytes()
            )));
        };
        self.slot.image_ref.store(image_ref, Ordering::Release);
        debug!("Pipe {direction}: message {:02x?}", wire);

        // The channel write is the slot write and the notification in one
        // step: the receiver cannot observe the message before it is complete.
        let envelope = Envelope {
            wire,
            image: message.image,
            on_release,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.slot.sent.fetch_add(1, Ordering::Release);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                // Unreachable while the gate holds; leave the slot marked Sent.
                Err(DriverError::SlotBusy { direction })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.slot.image_ref.store(0, Ordering::Release);
                self.slot.state.store(prev, Ordering::Release);
                Err(DriverError::PeerDisconnected { direction })
            }
        }
    }
}

/// Send and release totals of one pipe.
#[derive(Debug, Clone)]
pub struct PipeCounters {
    slot: Arc<Slot>,
}

impl PipeCounters {
    /// Messages accepted and messages released so far.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.slot.sent.load(Ordering::Acquire),
            self.slot.released.load(Ordering::Acquire),
        )
    }
}

/// Callback run for each message addressed to a registered client id.
pub type MessageCallback = Box<dyn FnMut(&Message) + Send>;

/// Consumer side of a pipe.
///
/// [`Endpoint::service`] is the receiving core's interrupt handler: it runs
/// the callback registered for the message's client id, then releases the
/// slot back to the sender.
pub struct Endpoint {
    slot: Arc<Slot>,
    rx: Receiver<Envelope>,
    width: PointerWidth,
    callbacks: HashMap<u8, MessageCallback>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("direction", &self.slot.direction)
            .field("clients", &self.callbacks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Register the callback for `client_id`, replacing any previous one.
    pub fn register_callback<F>(&mut self, client_id: u8, callback: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        debug!(
            "Pipe {}: callback registered for client {client_id}",
            self.slot.direction
        );
        self.callbacks.insert(client_id, Box::new(callback));
    }

    /// Address width this endpoint decodes with.
    pub fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    /// Block for the next message and handle it.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::PeerDisconnected`] once the sender is dropped
    /// and the slot is empty.
    pub fn service(&mut self) -> Result<()> {
        match self.rx.recv() {
            Ok(envelope) => {
                self.handle(envelope);
                Ok(())
            }
            Err(RecvError) => Err(DriverError::PeerDisconnected {
                direction: self.slot.direction,
            }),
        }
    }

    /// Handle a pending message if there is one. Returns whether one was handled.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::PeerDisconnected`] once the sender is dropped
    /// and the slot is empty.
    pub fn try_service(&mut self) -> Result<bool> {
        match self.rx.try_recv() {
            Ok(envelope) => {
                self.handle(envelope);
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => Err(DriverError::PeerDisconnected {
                direction: self.slot.direction,
            }),
        }
    }

    /// Service messages until the sender goes away.
    pub fn run(mut self) {
        info!("Pipe {} endpoint running", self.slot.direction);
        while self.service().is_ok() {}
        info!("Pipe {} endpoint stopped: sender dropped", self.slot.direction);
    }

    fn handle(&mut self, envelope: Envelope) {
        let Envelope {
            wire,
            image,
            on_release,
        } = envelope;
        let direction = self.slot.direction;

        let image_ref = match ipc::decode(&wire, self.width) {
            Some((header, image_ref)) => {
                debug!(
                    "Pipe {direction}: client {} code {} mask {:#06x} ref {image_ref:#x}",
                    header.client_id, header.user_code, header.intr_mask
                );
                let message = Message { header, image };
                match self.callbacks.get_mut(&header.client_id) {
                    Some(callback) => callback(&message),
                    None => warn!(
                        "Pipe {direction}: no callback for client {}, releasing unhandled",
                        header.client_id
                    ),
                }
                image_ref
            }
            None => {
                warn!(
                    "Pipe {direction}: {}-byte message does not decode as {:?}, releasing unhandled",
                    wire.len(),
                    self.width
                );
                self.slot.image_ref.load(Ordering::Acquire)
            }
        };

        // The sender's copy is no longer needed once the callback returns.
        self.slot.release(image_ref);
        if let Some(on_release) = on_release {
            on_release();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.slot.endpoint_alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn image(fill: u8) -> Image {
        Image::solid([fill, fill, fill])
    }

    #[test]
    fn second_send_rejected_until_release() {
        let (tx, mut ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        assert_eq!(tx.state(), SlotState::Idle);

        tx.send_image(image(1)).unwrap();
        assert!(!tx.is_ready());
        assert!(matches!(
            tx.send_image(image(2)),
            Err(DriverError::SlotBusy {
                direction: Direction::Cm0ToCm4
            })
        ));

        assert!(ep.try_service().unwrap());
        assert_eq!(tx.state(), SlotState::Released);
        tx.send_image(image(3)).unwrap();
        assert_eq!(tx.counts(), (2, 1));
    }

    #[test]
    fn release_clears_reference_then_runs_callback() {
        let (tx, mut ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        tx.send_with_release(Message::new(tx.header(), image(9)), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        assert!(tx.outstanding_ref().is_some());

        ep.try_service().unwrap();
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(tx.outstanding_ref(), None);
        assert!(tx.is_ready());
    }

    #[test]
    fn callback_keyed_by_client_id() {
        let (tx, mut ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        ep.register_callback(CLIENT_CM0_TO_CM4, move |msg| {
            assert_eq!(msg.image().map(Image::sentinel), Some(4));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send_image(image(4)).unwrap();
        ep.try_service().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Unknown client: released without dispatch.
        let stray = MessageHeader {
            client_id: 7,
            ..tx.header()
        };
        tx.send(Message::new(stray, image(5))).unwrap();
        ep.try_service().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(tx.is_ready());
    }

    #[test]
    fn header_carries_configured_mask() {
        let config = RuntimeConfig::default().with_notify_mask(0x0010);
        let (tx, _ep) = pipe(Direction::Cm4ToCm0, &config);
        let header = tx.header();
        assert_eq!(header.client_id, CLIENT_CM4_TO_CM0);
        assert_eq!(header.user_code, 0);
        assert_eq!(header.intr_mask, 0x0010);
    }

    #[test]
    fn null_reference_has_no_outstanding_ref() {
        let (tx, _ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        tx.send(Message::without_image(tx.header())).unwrap();
        assert!(!tx.is_ready());
        assert_eq!(tx.outstanding_ref(), None);
    }

    #[test]
    fn send_after_endpoint_dropped() {
        let (tx, ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        drop(ep);
        assert!(!tx.peer_alive());
        assert!(matches!(
            tx.send_image(image(1)),
            Err(DriverError::PeerDisconnected { .. })
        ));
        assert!(tx.is_ready());
    }

    #[test]
    fn endpoint_sees_disconnect() {
        let (tx, mut ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        drop(tx);
        assert!(matches!(
            ep.try_service(),
            Err(DriverError::PeerDisconnected { .. })
        ));
    }

    #[test]
    fn released_is_the_ready_state() {
        let (tx, mut ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        assert_eq!(tx.state(), SlotState::Idle);
        assert!(tx.is_ready());

        for fill in 1..=3 {
            tx.send_image(image(fill)).unwrap();
            assert_eq!(tx.state(), SlotState::Sent);
            ep.try_service().unwrap();
            // never back to Idle, but ready all the same
            assert_eq!(tx.state(), SlotState::Released);
            assert!(tx.is_ready());
            assert_eq!(tx.outstanding_ref(), None);
        }
    }

    #[test]
    fn endpoint_decodes_with_its_pointer_width() {
        let config = RuntimeConfig::default().with_pointer_width(PointerWidth::Bits64);
        let (tx, mut ep) = pipe(Direction::Cm4ToCm0, &config);
        assert_eq!(ep.pointer_width(), PointerWidth::Bits64);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        ep.register_callback(CLIENT_CM4_TO_CM0, move |msg| {
            assert_eq!(msg.header().intr_mask, ipc::CYPIPE_INTR_MASK);
            assert_eq!(msg.image().map(Image::sentinel), Some(6));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // a reference only the 64-bit layout can carry
        tx.slot.next_ref.store(1 << 40, Ordering::SeqCst);
        tx.send_image(image(6)).unwrap();
        assert_eq!(tx.outstanding_ref(), Some(1 << 40));
        ep.try_service().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(tx.outstanding_ref(), None);
    }

    #[test]
    fn reference_too_wide_for_layout_is_a_state_error() {
        let (tx, _ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        tx.slot.next_ref.store(1 << 32, Ordering::SeqCst);

        let err = tx.send_image(image(1)).unwrap_err();
        assert!(matches!(err, DriverError::InvalidState { .. }));
        assert!(err.to_string().contains("4-byte address"));
        // the gate reopens and nothing was counted
        assert_eq!(tx.state(), SlotState::Idle);
        assert!(tx.is_ready());
        assert_eq!(tx.counts(), (0, 0));
    }

    #[test]
    fn endpoint_addresses_point_at_the_receiver() {
        assert_eq!(Direction::Cm0ToCm4.endpoint_addr(), EP_CYPIPE_CM4_ADDR);
        assert_eq!(Direction::Cm4ToCm0.endpoint_addr(), EP_CYPIPE_CM0_ADDR);
    }

    #[test]
    fn counters_outlive_the_sender() {
        let (tx, mut ep) = pipe(Direction::Cm0ToCm4, &RuntimeConfig::default());
        let counters = tx.counters();
        tx.send_image(image(2)).unwrap();
        drop(tx);

        assert_eq!(counters.counts(), (1, 0));
        // the buffered message is still delivered and released
        assert!(ep.try_service().unwrap());
        assert_eq!(counters.counts(), (1, 1));
        assert!(ep.try_service().is_err());
    }
}
