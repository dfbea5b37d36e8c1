//! Single-Slot Mailbox
//!
//! A one-item cell shared by exactly one producer and one consumer. The
//! producer publishes a value, the consumer takes it exactly once, and the
//! producer must observe the acknowledgement before the slot is reused.
//! At most one value is ever in flight, so values are delivered in the order
//! they were published.

mod handshake;

pub use handshake::{channel, MailboxBusy, MailboxReceiver, MailboxSender};
