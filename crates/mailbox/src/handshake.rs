//! Two-flag publish/acknowledge handshake

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Shared state behind both halves
struct Slot<T> {
    /// Set by the producer once `value` holds an unread value
    written: AtomicBool,
    /// Set by the consumer once it has moved `value` out
    read: AtomicBool,
    value: UnsafeCell<Option<T>>,
}

// SAFETY: `value` is written by the producer only while it is not awaiting
// an acknowledgement (the consumer has released the slot through the
// Release store on `read`, observed with an Acquire CAS), and is read by the
// consumer only after it wins the Acquire CAS on `written`, which pairs with
// the producer's Release store.
unsafe impl<T: Send> Sync for Slot<T> {}

/// Create a connected sender/receiver pair
pub fn channel<T>() -> (MailboxSender<T>, MailboxReceiver<T>) {
    let slot = Arc::new(Slot {
        written: AtomicBool::new(false),
        read: AtomicBool::new(false),
        value: UnsafeCell::new(None),
    });
    (
        MailboxSender {
            slot: Arc::clone(&slot),
            awaiting_read: false,
        },
        MailboxReceiver { slot },
    )
}

/// Returned by [`MailboxSender::publish`] when the previous value has not
/// been acknowledged yet. Carries the rejected value back to the caller.
#[derive(Error)]
#[error("mailbox is still awaiting acknowledgement of the previous value")]
pub struct MailboxBusy<T>(pub T);

impl<T> MailboxBusy<T> {
    /// Recover the value that could not be published
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for MailboxBusy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MailboxBusy { .. }")
    }
}

/// Producer half
pub struct MailboxSender<T> {
    slot: Arc<Slot<T>>,
    /// Producer-owned: a value was published and not yet acknowledged
    awaiting_read: bool,
}

impl<T> MailboxSender<T> {
    /// Publish a value for the consumer.
    ///
    /// Publishing while a previous value is unacknowledged is a usage error:
    /// the value is handed back in `Err` and the slot is left untouched.
    pub fn publish(&mut self, value: T) -> Result<(), MailboxBusy<T>> {
        if self.awaiting_read {
            debug_assert!(false, "publish while awaiting acknowledgement");
            return Err(MailboxBusy(value));
        }

        // SAFETY: not awaiting a read, so the consumer is done with the slot.
        unsafe {
            *self.slot.value.get() = Some(value);
        }
        self.awaiting_read = true;
        self.slot.written.store(true, Ordering::Release);
        Ok(())
    }

    /// Reclaim the slot if the consumer has taken the last value. Returns
    /// true exactly once per published value.
    pub fn try_acknowledge(&mut self) -> bool {
        if !self.awaiting_read {
            return false;
        }

        if self
            .slot
            .read
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.awaiting_read = false;
            true
        } else {
            false
        }
    }

    /// A published value has not been acknowledged yet
    pub fn awaiting_read(&self) -> bool {
        self.awaiting_read
    }

    /// The slot can accept a new value
    pub fn is_free(&self) -> bool {
        !self.awaiting_read
    }
}

/// Consumer half
pub struct MailboxReceiver<T> {
    slot: Arc<Slot<T>>,
}

impl<T> MailboxReceiver<T> {
    /// Take the pending value, if any. Each published value is returned
    /// exactly once.
    pub fn try_take(&mut self) -> Option<T> {
        if self
            .slot
            .written
            .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        // SAFETY: winning the CAS on `written` gives exclusive access until
        // `read` is stored below.
        let value = unsafe { (*self.slot.value.get()).take() };
        self.slot.read.store(true, Ordering::Release);
        value
    }

    /// A value is waiting to be taken
    pub fn has_pending(&self) -> bool {
        self.slot.written.load(Ordering::Acquire)
    }
}
