//! Fixed-capacity single-producer/single-consumer ring buffer of
//! length-prefixed byte payloads, with a configurable full-queue policy.
//!
//! Slots are arena-allocated as one contiguous byte buffer. The producer and
//! consumer each own one end of the ring (`head`/`tail`) and communicate
//! through a lock-free release/acquire handoff; see the module-level
//! comment in `ring.rs` for the exact protocol, including the drop-oldest
//! exception where `tail` gets a second writer.

mod backoff;
mod config;
mod invariants;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use config::{Config, OverflowPolicy};
pub use reservation::{ReadSlot, WriteSlot};
pub use ring::{Ring, RingError};
