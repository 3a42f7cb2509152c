//! Bottom-half dispatch on the inference core.
//!
//! The pipe callback runs in the receiving core's interrupt context. It
//! only copies the image into the core-local [`Inbox`] and raises the
//! pending flag; the polling loop picks the copy up and runs the pipeline
//! outside the callback.
//!
//! Copy and flag are published together under the inbox lock, so a loop
//! that observes `pending` always observes the complete copy.

use crate::error::{DriverError, Result};
use crate::ipc::Message;
use psoc6_models::Image;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct InboxState {
    image: Image,
    pending: bool,
    closed: bool,
    received: u64,
    overwritten: u64,
}

/// Core-local image buffer plus the work-pending flag.
#[derive(Debug, Default)]
pub struct Inbox {
    state: Mutex<InboxState>,
    ready: Condvar,
}

/// What [`Inbox::wait_into`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// A fresh image was copied out.
    Image,
    /// The inbox was closed and holds nothing pending.
    Closed,
}

impl Inbox {
    /// Empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InboxState>> {
        self.state
            .lock()
            .map_err(|_| DriverError::core_fault("CM4", "inbox lock poisoned"))
    }

    /// Copy `image` in and raise the pending flag.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CoreFault`] if the lock is poisoned.
    pub fn deliver(&self, image: &Image) -> Result<()> {
        let mut state = self.lock()?;
        if state.pending {
            // The loop has not consumed the previous copy yet; the newer
            // image wins, as with the single local buffer on the target.
            state.overwritten += 1;
        }
        state.image.as_bytes_mut().copy_from_slice(image.as_bytes());
        state.received += 1;
        state.pending = true;
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Wait until an image is pending or the inbox is closed, copying a
    /// pending image into `local` and clearing the flag.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CoreFault`] if the lock is poisoned.
    pub fn wait_into(&self, local: &mut Image) -> Result<Pending> {
        let mut state = self.lock()?;
        while !state.pending && !state.closed {
            state = self
                .ready
                .wait(state)
                .map_err(|_| DriverError::core_fault("CM4", "inbox lock poisoned"))?;
        }
        Ok(Self::take(&mut state, local))
    }

    /// Non-blocking form of [`Inbox::wait_into`]; `None` if nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::CoreFault`] if the lock is poisoned.
    pub fn try_take_into(&self, local: &mut Image) -> Result<Option<Pending>> {
        let mut state = self.lock()?;
        if state.pending || state.closed {
            Ok(Some(Self::take(&mut state, local)))
        } else {
            Ok(None)
        }
    }

    fn take(state: &mut InboxState, local: &mut Image) -> Pending {
        if state.pending {
            local.as_bytes_mut().copy_from_slice(state.image.as_bytes());
            state.pending = false;
            Pending::Image
        } else {
            Pending::Closed
        }
    }

    /// Whether an image is waiting.
    pub fn is_pending(&self) -> bool {
        self.lock().map(|s| s.pending).unwrap_or(false)
    }

    /// Images delivered so far, and how many replaced an unconsumed one.
    pub fn stats(&self) -> (u64, u64) {
        self.lock()
            .map(|s| (s.received, s.overwritten))
            .unwrap_or_default()
    }

    /// Wake the polling loop for shutdown. A pending image is still handed
    /// out before [`Pending::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.lock() {
            state.closed = true;
        }
        self.ready.notify_all();
    }
}

/// Build the pipe callback that feeds `inbox`.
///
/// A message with a null image reference is dropped without touching the
/// inbox.
pub fn dispatcher(inbox: Arc<Inbox>) -> impl FnMut(&Message) + Send + 'static {
    move |message: &Message| {
        let Some(image) = message.image() else {
            warn!("Dispatch: message without image reference ignored");
            return;
        };
        match inbox.deliver(image) {
            Ok(()) => debug!("Dispatch: image copied, work pending"),
            Err(e) => warn!("Dispatch: {e}"),
        }
    }
}
